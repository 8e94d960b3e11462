use proptest::prelude::*;
use sdk::errors::{EngineError, EstateErrorExt};
use sdk::types::{NumericRange, PropertyRef, ResultSource, SearchResult};

fn property_ref() -> impl Strategy<Value = PropertyRef> {
    ("p[0-9]{1,3}", proptest::option::of(-0.5..1.5f64)).prop_map(|(id, score)| PropertyRef {
        property_id: id,
        score,
    })
}

// Every constructed result is sorted by score descending, unscored last,
// ties by ascending property id, and every score lies in [0,1]
proptest! {
    #[test]
    fn test_search_result_ordering(refs in proptest::collection::vec(property_ref(), 0..40)) {
        let result = SearchResult::ranked(refs, 40, ResultSource::Semantic);

        for r in result.results() {
            if let Some(s) = r.score {
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }

        for pair in result.results().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match (a.score, b.score) {
                (Some(x), Some(y)) => {
                    prop_assert!(x >= y);
                    if x == y {
                        prop_assert!(a.property_id <= b.property_id);
                    }
                }
                (None, Some(_)) => prop_assert!(false, "unscored entry ranked above scored one"),
                (None, None) => prop_assert!(a.property_id <= b.property_id),
                (Some(_), None) => {}
            }
        }
    }
}

// Strict comparisons exclude their bound, inclusive ones keep it
proptest! {
    #[test]
    fn test_range_bound_semantics(bound in 1.0..1e9f64, delta in 0.01..1e6f64) {
        prop_assert!(!NumericRange::below(bound).contains(bound));
        prop_assert!(NumericRange::below(bound).contains(bound - delta));
        prop_assert!(NumericRange::at_most(bound).contains(bound));
        prop_assert!(!NumericRange::above(bound).contains(bound));
        prop_assert!(NumericRange::above(bound).contains(bound + delta));
        prop_assert!(NumericRange::at_least(bound).contains(bound));
        prop_assert!(NumericRange::between(bound, bound + delta).contains(bound + delta));
    }
}

proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "\\PC*") {
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::ClassificationAmbiguous(detail.clone()),
            EngineError::PlanConstruction(detail.clone()),
            EngineError::missing(detail.clone()),
            EngineError::unavailable("vector_index", detail.clone()),
            EngineError::MemoryConflict { session_id: detail.clone(), reason: detail.clone() },
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains("Error"));
        }
    }
}
