//! Retrieval Agent
//!
//! Sends the semantic fragment of a query to the vector index and returns the
//! hits as a semantic `SearchResult` with scores normalised into [0,1].
//!
//! Given a seed property instead of text, the seed's description (or a
//! description composed from its record) is searched for and the seed itself
//! is left out of the hits.

use crate::agents::{call_collaborator, Agent, CallPolicy};
use crate::conductor::planner::params;
use crate::conductor::types::AgentTarget;
use async_trait::async_trait;
use sdk::collaborators::{RelationalStore, SimilarityHit, SimilarityRequest, VectorIndex};
use sdk::errors::EngineError;
use sdk::types::{AgentInput, AgentOutput, PropertyRecord, PropertyRef, ResultSource, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct RetrievalAgent {
    index: Option<Arc<dyn VectorIndex>>,
    store: Arc<dyn RelationalStore>,
    limit: usize,
    embedding_model: String,
    policy: CallPolicy,
}

impl RetrievalAgent {
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        store: Arc<dyn RelationalStore>,
        limit: usize,
        embedding_model: String,
        policy: CallPolicy,
    ) -> Self {
        Self {
            index,
            store,
            limit,
            embedding_model,
            policy,
        }
    }

    /// Search text standing in for a seed property
    async fn seed_text(&self, seed: &str) -> Result<String, EngineError> {
        let ids = [seed.to_string()];
        let store = &self.store;
        let records = call_collaborator(store.name(), self.policy, || store.fetch(&ids)).await?;

        records
            .first()
            .map(describe)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| EngineError::missing(params::SEED_PROPERTY))
    }
}

/// The record's own description, else one composed from its fields
pub fn describe(record: &PropertyRecord) -> String {
    if let Some(text) = record.description.as_deref().map(str::trim) {
        if !text.is_empty() {
            return text.to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(beds) = record.bedrooms {
        parts.push(format!("{} bedroom", beds));
    }
    parts.push(
        record
            .property_type
            .clone()
            .unwrap_or_else(|| "property".to_string()),
    );
    if !record.location.trim().is_empty() {
        parts.push(format!("in {}", record.location.trim()));
    }
    parts.join(" ")
}

/// Collapse duplicate ids to their best score and map scores into [0,1]
///
/// Scores already inside the unit interval are kept. Otherwise they are
/// min-max rescaled; when every score is equal each maps to 1.0. NaN hits
/// are dropped.
pub fn normalize_hits(hits: Vec<SimilarityHit>) -> Vec<PropertyRef> {
    let mut best: HashMap<String, f64> = HashMap::new();
    for hit in hits.into_iter().filter(|h| !h.score.is_nan()) {
        best.entry(hit.property_id)
            .and_modify(|s| *s = s.max(hit.score))
            .or_insert(hit.score);
    }

    let in_unit = best.values().all(|s| (0.0..=1.0).contains(s));
    let min = best.values().copied().fold(f64::INFINITY, f64::min);
    let max = best.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    best.into_iter()
        .map(|(id, score)| {
            let normalized = if in_unit {
                score
            } else if span > 0.0 && span.is_finite() {
                (score - min) / span
            } else {
                1.0
            };
            PropertyRef::scored(id, normalized)
        })
        .collect()
}

#[async_trait]
impl Agent for RetrievalAgent {
    fn target(&self) -> AgentTarget {
        AgentTarget::Retrieval
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        let seed = input
            .param_str_opt(params::SEED_PROPERTY)
            .filter(|s| !s.trim().is_empty());

        let index = self
            .index
            .as_ref()
            .ok_or_else(|| EngineError::unavailable("vector_index", "no endpoint configured"))?;

        let (text, limit) = match &seed {
            // One extra hit leaves room for the seed matching itself
            Some(seed) => (self.seed_text(seed).await?, self.limit + 1),
            None => {
                let text = input.param_str(params::TEXT)?;
                if text.trim().is_empty() {
                    return Err(EngineError::missing(params::TEXT));
                }
                (text, self.limit)
            }
        };

        let request = SimilarityRequest {
            text: text.trim().to_string(),
            limit,
            embedding_model: self.embedding_model.clone(),
        };

        let hits = call_collaborator(index.name(), self.policy, || index.search(&request)).await?;
        let total_considered = hits.len();

        let mut result =
            SearchResult::ranked(normalize_hits(hits), total_considered, ResultSource::Semantic);
        if let Some(seed) = &seed {
            result = result.without(seed);
        }
        result.truncate(self.limit);

        debug!(
            "Retrieval returned {} hits for '{}'",
            result.len(),
            request.text
        );

        Ok(AgentOutput::Search(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use serde_json::json;
    use std::sync::Mutex;

    fn catalog() -> Arc<dyn RelationalStore> {
        Arc::new(JsonCatalog::from_records(vec![
            PropertyRecord {
                property_id: "h2".to_string(),
                location: "Jubilee Hills, Hyderabad".to_string(),
                price: 9_000_000.0,
                description: Some("Corner villa with a rooftop garden".to_string()),
                ..Default::default()
            },
            PropertyRecord {
                property_id: "h3".to_string(),
                location: "Gachibowli, Hyderabad".to_string(),
                price: 7_000_000.0,
                bedrooms: Some(3),
                property_type: Some("Apartment".to_string()),
                ..Default::default()
            },
        ]))
    }

    struct FixedIndex {
        hits: Vec<SimilarityHit>,
        seen: Mutex<Vec<SimilarityRequest>>,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(
            &self,
            request: &SimilarityRequest,
        ) -> Result<Vec<SimilarityHit>, EngineError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.hits.clone())
        }
    }

    fn hit(id: &str, score: f64) -> SimilarityHit {
        SimilarityHit {
            property_id: id.to_string(),
            score,
        }
    }

    fn score_of(refs: &[PropertyRef], id: &str) -> f64 {
        refs.iter()
            .find(|r| r.property_id == id)
            .and_then(|r| r.score)
            .unwrap()
    }

    #[test]
    fn test_unit_scores_pass_through() {
        let refs = normalize_hits(vec![hit("a", 0.8), hit("b", 0.3)]);
        assert_eq!(score_of(&refs, "a"), 0.8);
        assert_eq!(score_of(&refs, "b"), 0.3);
    }

    #[test]
    fn test_out_of_range_scores_are_rescaled() {
        let refs = normalize_hits(vec![hit("a", 12.0), hit("b", 2.0), hit("c", 7.0)]);
        assert_eq!(score_of(&refs, "a"), 1.0);
        assert_eq!(score_of(&refs, "b"), 0.0);
        assert_eq!(score_of(&refs, "c"), 0.5);
    }

    #[test]
    fn test_duplicates_keep_best_and_nan_dropped() {
        let refs = normalize_hits(vec![hit("a", 0.2), hit("a", 0.6), hit("b", f64::NAN)]);
        assert_eq!(refs.len(), 1);
        assert_eq!(score_of(&refs, "a"), 0.6);
    }

    #[tokio::test]
    async fn test_run_ranks_and_sends_model() {
        let index = Arc::new(FixedIndex {
            hits: vec![hit("p2", 0.4), hit("p1", 0.9), hit("p3", 0.4)],
            seen: Mutex::new(Vec::new()),
        });
        let agent = RetrievalAgent::new(
            Some(Arc::clone(&index) as Arc<dyn VectorIndex>),
            catalog(),
            5,
            "all-MiniLM-L6-v2".to_string(),
            CallPolicy::default(),
        );

        let output = agent
            .run(AgentInput::new().with_param(params::TEXT, json!(" with a sea view ")))
            .await
            .unwrap();

        let search = output.as_search().unwrap();
        assert_eq!(search.property_ids(), vec!["p1", "p2", "p3"]);
        assert_eq!(search.source(), ResultSource::Semantic);

        let seen = index.seen.lock().unwrap();
        assert_eq!(seen[0].text, "with a sea view");
        assert_eq!(seen[0].embedding_model, "all-MiniLM-L6-v2");
    }

    #[tokio::test]
    async fn test_seed_property_is_excluded_from_its_neighbours() {
        let index = Arc::new(FixedIndex {
            hits: vec![hit("h2", 0.99), hit("h7", 0.8), hit("h5", 0.7), hit("h9", 0.6)],
            seen: Mutex::new(Vec::new()),
        });
        let agent = RetrievalAgent::new(
            Some(Arc::clone(&index) as Arc<dyn VectorIndex>),
            catalog(),
            2,
            "m".to_string(),
            CallPolicy::default(),
        );

        let output = agent
            .run(AgentInput::new().with_param(params::SEED_PROPERTY, json!("h2")))
            .await
            .unwrap();
        assert_eq!(output.as_search().unwrap().property_ids(), vec!["h7", "h5"]);

        let seen = index.seen.lock().unwrap();
        assert_eq!(seen[0].text, "Corner villa with a rooftop garden");
        assert_eq!(seen[0].limit, 3);
    }

    #[tokio::test]
    async fn test_unknown_seed_is_insufficient() {
        let index: Arc<dyn VectorIndex> = Arc::new(FixedIndex {
            hits: Vec::new(),
            seen: Mutex::new(Vec::new()),
        });
        let agent = RetrievalAgent::new(Some(index), catalog(), 5, "m".to_string(), CallPolicy::default());
        let err = agent
            .run(AgentInput::new().with_param(params::SEED_PROPERTY, json!("nope")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AgentInputInsufficient { ref field } if field == "seed_property_id"
        ));
    }

    #[test]
    fn test_describe_falls_back_to_record_fields() {
        let record = PropertyRecord {
            property_id: "h3".to_string(),
            location: "Gachibowli, Hyderabad".to_string(),
            bedrooms: Some(3),
            property_type: Some("Apartment".to_string()),
            description: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(describe(&record), "3 bedroom Apartment in Gachibowli, Hyderabad");
    }

    #[tokio::test]
    async fn test_without_index_is_unavailable() {
        let agent = RetrievalAgent::new(None, catalog(), 5, "m".to_string(), CallPolicy::default());
        let err = agent
            .run(AgentInput::new().with_param(params::TEXT, json!("quiet garden")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CollaboratorUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_blank_text_is_insufficient() {
        let agent = RetrievalAgent::new(None, catalog(), 5, "m".to_string(), CallPolicy::default());
        let err = agent
            .run(AgentInput::new().with_param(params::TEXT, json!("   ")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AgentInputInsufficient { .. }));
    }
}
