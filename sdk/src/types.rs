//! Shared data model
//!
//! Everything that crosses an agent or collaborator boundary lives here:
//! property identities, ranked search results, filter descriptors, estimates,
//! report descriptors and the agent parameter bag.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Full property record as returned by the relational collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PropertyRecord {
    pub property_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub square_feet: Option<f64>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub listing_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Minimal property identity passed between agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyRef {
    pub property_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl PropertyRef {
    pub fn new(property_id: impl Into<String>) -> Self {
        Self {
            property_id: property_id.into(),
            score: None,
        }
    }

    pub fn scored(property_id: impl Into<String>, score: f64) -> Self {
        Self {
            property_id: property_id.into(),
            score: Some(score),
        }
    }
}

/// Ranking order shared by every `SearchResult`
///
/// Scores descending, unscored entries after scored ones, ties broken by
/// ascending property id.
pub fn rank_order(a: &PropertyRef, b: &PropertyRef) -> Ordering {
    let by_score = match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score.then_with(|| a.property_id.cmp(&b.property_id))
}

/// Provenance of a search result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Structured,
    Semantic,
    Hybrid,
}

impl ResultSource {
    /// Provenance after merging results of two sources
    pub fn combine(self, other: ResultSource) -> ResultSource {
        if self == other {
            self
        } else {
            ResultSource::Hybrid
        }
    }
}

/// Ranked set of property references with provenance
///
/// Construction always ranks, so the ordering invariant holds for every
/// value, including deserialised ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "SearchResultRepr")]
pub struct SearchResult {
    results: Vec<PropertyRef>,
    total_considered: usize,
    source: ResultSource,
}

#[derive(Deserialize)]
struct SearchResultRepr {
    results: Vec<PropertyRef>,
    total_considered: usize,
    source: ResultSource,
}

impl From<SearchResultRepr> for SearchResult {
    fn from(repr: SearchResultRepr) -> Self {
        SearchResult::ranked(repr.results, repr.total_considered, repr.source)
    }
}

impl SearchResult {
    /// Build a result, clamping scores into [0,1] and ranking the entries
    pub fn ranked(
        mut results: Vec<PropertyRef>,
        total_considered: usize,
        source: ResultSource,
    ) -> Self {
        for r in &mut results {
            r.score = r.score.filter(|s| !s.is_nan()).map(|s| s.clamp(0.0, 1.0));
        }
        results.sort_by(rank_order);
        Self {
            results,
            total_considered,
            source,
        }
    }

    pub fn empty(source: ResultSource) -> Self {
        Self::ranked(Vec::new(), 0, source)
    }

    /// Keep the `limit` best-ranked entries
    pub fn truncate(&mut self, limit: usize) {
        self.results.truncate(limit);
    }

    /// Drop one property, keeping the rank of the rest
    pub fn without(mut self, property_id: &str) -> Self {
        self.results.retain(|r| r.property_id != property_id);
        self
    }

    pub fn results(&self) -> &[PropertyRef] {
        &self.results
    }

    pub fn total_considered(&self) -> usize {
        self.total_considered
    }

    pub fn source(&self) -> ResultSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn first(&self) -> Option<&PropertyRef> {
        self.results.first()
    }

    pub fn property_ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.property_id.clone()).collect()
    }
}

/// One side of a numeric range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bound {
    pub value: f64,
    pub inclusive: bool,
}

/// Numeric range filter
///
/// Bounds are inclusive unless built from strict comparison language, in
/// which case only that side is exclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct NumericRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Bound>,
}

impl NumericRange {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(Bound {
                value: min,
                inclusive: true,
            }),
            max: Some(Bound {
                value: max,
                inclusive: true,
            }),
        }
    }

    pub fn exactly(value: f64) -> Self {
        Self::between(value, value)
    }

    /// Strictly less than `value` ("under", "below")
    pub fn below(value: f64) -> Self {
        Self {
            min: None,
            max: Some(Bound {
                value,
                inclusive: false,
            }),
        }
    }

    /// Strictly greater than `value` ("over", "above")
    pub fn above(value: f64) -> Self {
        Self {
            min: Some(Bound {
                value,
                inclusive: false,
            }),
            max: None,
        }
    }

    pub fn at_most(value: f64) -> Self {
        Self {
            min: None,
            max: Some(Bound {
                value,
                inclusive: true,
            }),
        }
    }

    pub fn at_least(value: f64) -> Self {
        Self {
            min: Some(Bound {
                value,
                inclusive: true,
            }),
            max: None,
        }
    }

    /// Combine two ranges, keeping the tighter bound on each side
    pub fn intersect(self, other: NumericRange) -> NumericRange {
        fn tighter(a: Option<Bound>, b: Option<Bound>, lower: bool) -> Option<Bound> {
            match (a, b) {
                (Some(x), Some(y)) => {
                    let pick_x = match x.value.total_cmp(&y.value) {
                        Ordering::Equal => !x.inclusive,
                        Ordering::Greater => lower,
                        Ordering::Less => !lower,
                    };
                    Some(if pick_x { x } else { y })
                }
                (x, None) => x,
                (None, y) => y,
            }
        }
        NumericRange {
            min: tighter(self.min, other.min, true),
            max: tighter(self.max, other.max, false),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above_min = match self.min {
            Some(b) if b.inclusive => value >= b.value,
            Some(b) => value > b.value,
            None => true,
        };
        let below_max = match self.max {
            Some(b) if b.inclusive => value <= b.value,
            Some(b) => value < b.value,
            None => true,
        };
        above_min && below_max
    }
}

/// Structured filter descriptor handed to the relational collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FilterDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_feet: Option<NumericRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Restrict matches to these ids ("those properties")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FilterDescriptor {
    /// True when no constraint is set (limit aside)
    pub fn is_unconstrained(&self) -> bool {
        self.location.is_none()
            && self.price.is_none()
            && self.bedrooms.is_none()
            && self.square_feet.is_none()
            && self.property_type.is_none()
            && self.status.is_none()
            && self.property_ids.is_none()
    }

    /// Evaluate the filter against a full record
    ///
    /// Text fields match case-insensitively by substring, numeric fields use
    /// the range bound semantics. A numeric constraint on a missing field
    /// does not match.
    pub fn matches(&self, record: &PropertyRecord) -> bool {
        fn contains_ci(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }

        if let Some(ids) = &self.property_ids {
            if !ids.iter().any(|id| id == &record.property_id) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !contains_ci(&record.location, location) {
                return false;
            }
        }
        if let Some(range) = &self.price {
            if !range.contains(record.price) {
                return false;
            }
        }
        if let Some(range) = &self.bedrooms {
            match record.bedrooms {
                Some(b) if range.contains(f64::from(b)) => {}
                _ => return false,
            }
        }
        if let Some(range) = &self.square_feet {
            match record.square_feet {
                Some(s) if range.contains(s) => {}
                _ => return false,
            }
        }
        if let Some(kind) = &self.property_type {
            match &record.property_type {
                Some(t) if contains_ci(t, kind) => {}
                _ => return false,
            }
        }
        if let Some(status) = &self.status {
            match &record.status {
                Some(s) if s.eq_ignore_ascii_case(status) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Renovation quality tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RenovationTier {
    Basic,
    Moderate,
    HighEnd,
    Luxury,
}

impl RenovationTier {
    pub const ALL: [RenovationTier; 4] = [
        RenovationTier::Basic,
        RenovationTier::Moderate,
        RenovationTier::HighEnd,
        RenovationTier::Luxury,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenovationTier::Basic => "basic",
            RenovationTier::Moderate => "moderate",
            RenovationTier::HighEnd => "high_end",
            RenovationTier::Luxury => "luxury",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Cost categories of a renovation breakdown
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Materials,
    Labor,
    Permits,
}

/// Deterministic renovation cost estimate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenovationEstimate {
    pub basis_square_feet: f64,
    pub unit_cost_rate: f64,
    pub tier: RenovationTier,
    pub computed_total: f64,
    pub breakdown: BTreeMap<CostCategory, f64>,
    /// Property the size was taken from, when not given explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
}

/// Estimates for every tier over the same size, cheapest tier first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierComparison {
    pub basis_square_feet: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub estimates: Vec<RenovationEstimate>,
}

impl TierComparison {
    pub fn estimate_for(&self, tier: RenovationTier) -> Option<&RenovationEstimate> {
        self.estimates.iter().find(|e| e.tier == tier)
    }
}

/// Report flavour requested by the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    Summary,
    Detailed,
    Comparison,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Summary => "summary",
            ReportType::Detailed => "detailed",
            ReportType::Comparison => "comparison",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(ReportType::Summary),
            "detailed" => Some(ReportType::Detailed),
            "comparison" => Some(ReportType::Comparison),
            _ => None,
        }
    }
}

/// Kind of a report section
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Table,
    Narrative,
    ChartSpec,
}

/// One section of a report descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub section_title: String,
    pub section_kind: SectionKind,
    pub payload: serde_json::Value,
}

/// Structured report consumed by a rendering collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportDescriptor {
    pub report_type: ReportType,
    pub title: String,
    pub sections: Vec<ReportSection>,
}

/// Price distribution bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBucket {
    pub label: String,
    pub count: usize,
}

/// Aggregate statistics over a set of properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PropertyStatistics {
    pub total_properties: usize,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub locations: Vec<String>,
    pub price_distribution: Vec<PriceBucket>,
}

/// Output of a single agent invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AgentOutput {
    Search(SearchResult),
    Estimate(RenovationEstimate),
    TierComparison(TierComparison),
    Report(ReportDescriptor),
    Statistics(PropertyStatistics),
}

impl AgentOutput {
    pub fn as_search(&self) -> Option<&SearchResult> {
        match self {
            AgentOutput::Search(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_estimate(&self) -> Option<&RenovationEstimate> {
        match self {
            AgentOutput::Estimate(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_tier_comparison(&self) -> Option<&TierComparison> {
        match self {
            AgentOutput::TierComparison(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&ReportDescriptor> {
        match self {
            AgentOutput::Report(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_statistics(&self) -> Option<&PropertyStatistics> {
        match self {
            AgentOutput::Statistics(s) => Some(s),
            _ => None,
        }
    }
}

/// Resolved input parameters handed to an agent
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentInput {
    pub params: BTreeMap<String, serde_json::Value>,
}

impl AgentInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, EngineError> {
        self.param_str_opt(key)
            .ok_or_else(|| EngineError::missing(key))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional positive number parameter
    pub fn param_f64_opt(&self, key: &str) -> Option<f64> {
        self.params
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|v| *v > 0.0)
    }

    /// Get an optional unsigned parameter
    pub fn param_usize_opt(&self, key: &str) -> Option<usize> {
        self.params
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Deserialize a parameter into a typed value
    pub fn param_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, EngineError> {
        let value = self
            .params
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::missing(key))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Values of every parameter whose key starts with `prefix`, in key order
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a serde_json::Value)> + 'a {
        self.params
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_result_ranks_on_construction() {
        let result = SearchResult::ranked(
            vec![
                PropertyRef::scored("p3", 0.5),
                PropertyRef::new("p0"),
                PropertyRef::scored("p2", 0.9),
                PropertyRef::scored("p1", 0.5),
            ],
            4,
            ResultSource::Semantic,
        );
        let ids = result.property_ids();
        assert_eq!(ids, vec!["p2", "p1", "p3", "p0"]);
    }

    #[test]
    fn test_search_result_clamps_scores() {
        let result = SearchResult::ranked(
            vec![PropertyRef::scored("a", 1.7), PropertyRef::scored("b", -0.2)],
            2,
            ResultSource::Semantic,
        );
        assert_eq!(result.results()[0].score, Some(1.0));
        assert_eq!(result.results()[1].score, Some(0.0));
    }

    #[test]
    fn test_deserialized_search_result_is_ranked() {
        let raw = json!({
            "results": [{"property_id": "b", "score": 0.1}, {"property_id": "a", "score": 0.8}],
            "total_considered": 2,
            "source": "semantic"
        });
        let result: SearchResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.property_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_range_strictness() {
        let under = NumericRange::below(25_000_000.0);
        assert!(under.contains(24_999_999.0));
        assert!(!under.contains(25_000_000.0));

        let between = NumericRange::between(10.0, 20.0);
        assert!(between.contains(10.0));
        assert!(between.contains(20.0));
        assert!(!between.contains(20.5));

        let over = NumericRange::above(5.0);
        assert!(!over.contains(5.0));
        assert!(over.contains(5.1));
    }

    #[test]
    fn test_range_intersection_keeps_tighter_bounds() {
        let r = NumericRange::at_least(10.0).intersect(NumericRange::below(50.0));
        assert!(r.contains(10.0));
        assert!(!r.contains(50.0));

        let tighter = NumericRange::at_most(50.0).intersect(NumericRange::below(50.0));
        assert_eq!(tighter.max.map(|b| b.inclusive), Some(false));
    }

    #[test]
    fn test_filter_matches_record() {
        let record = PropertyRecord {
            property_id: "h1".into(),
            location: "Banjara Hills, Hyderabad".into(),
            price: 12_000_000.0,
            bedrooms: Some(3),
            status: Some("Active".into()),
            ..Default::default()
        };

        let filter = FilterDescriptor {
            location: Some("hyderabad".into()),
            price: Some(NumericRange::below(25_000_000.0)),
            bedrooms: Some(NumericRange::exactly(3.0)),
            status: Some("active".into()),
            ..Default::default()
        };
        assert!(filter.matches(&record));

        let by_size = FilterDescriptor {
            square_feet: Some(NumericRange::at_least(1000.0)),
            ..Default::default()
        };
        assert!(!by_size.matches(&record), "missing size never matches");

        let restricted = FilterDescriptor {
            property_ids: Some(vec!["other".into()]),
            ..Default::default()
        };
        assert!(!restricted.matches(&record));
    }

    #[test]
    fn test_agent_input_params() {
        let input = AgentInput::new()
            .with_param("text", json!("sea view"))
            .with_param("square_feet", json!(1500))
            .with_param("source.t1", json!(1))
            .with_param("source.t2", json!(2));

        assert_eq!(input.param_str("text").unwrap(), "sea view");
        assert_eq!(input.param_f64_opt("square_feet"), Some(1500.0));
        assert!(matches!(
            input.param_str("missing"),
            Err(EngineError::AgentInputInsufficient { field }) if field == "missing"
        ));
        assert_eq!(input.with_prefix("source.").count(), 2);
    }

    #[test]
    fn test_agent_output_tagging() {
        let output = AgentOutput::Search(SearchResult::empty(ResultSource::Structured));
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["kind"], "search");
        assert_eq!(json["data"]["source"], "structured");
    }
}
