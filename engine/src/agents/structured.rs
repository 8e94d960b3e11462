//! Structured Query Agent
//!
//! Translates filter parameters into a `FilterDescriptor` for the relational
//! collaborator and returns the matches as a structured `SearchResult`.

use crate::agents::{call_collaborator, Agent, CallPolicy};
use crate::conductor::planner::params;
use crate::conductor::types::AgentTarget;
use async_trait::async_trait;
use sdk::collaborators::RelationalStore;
use sdk::errors::EngineError;
use sdk::types::{AgentInput, AgentOutput, FilterDescriptor, PropertyRef, ResultSource, SearchResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct StructuredQueryAgent {
    store: Arc<dyn RelationalStore>,
    limit: usize,
    policy: CallPolicy,
}

impl StructuredQueryAgent {
    pub fn new(store: Arc<dyn RelationalStore>, limit: usize, policy: CallPolicy) -> Self {
        Self {
            store,
            limit,
            policy,
        }
    }
}

#[async_trait]
impl Agent for StructuredQueryAgent {
    fn target(&self) -> AgentTarget {
        AgentTarget::StructuredQuery
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        let mut filter: FilterDescriptor = input.param_as(params::FILTER)?;
        let limit = filter.limit.map_or(self.limit, |l| l.min(self.limit));
        filter.limit = Some(limit);

        // Intersection with an empty reference set matches nothing
        if filter.property_ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            return Ok(AgentOutput::Search(SearchResult::empty(ResultSource::Structured)));
        }

        let store = &self.store;
        let records =
            call_collaborator(store.name(), self.policy, || store.query(&filter)).await?;
        let total_considered = records.len();

        // Bounds are re-checked locally so strictness never depends on the store
        let mut seen = HashSet::new();
        let refs: Vec<PropertyRef> = records
            .iter()
            .filter(|r| filter.matches(r))
            .filter(|r| seen.insert(r.property_id.clone()))
            .map(|r| PropertyRef::new(r.property_id.clone()))
            .collect();
        let matched = refs.len();

        // Rank the full match set before cutting it to the limit
        let mut result = SearchResult::ranked(refs, total_considered, ResultSource::Structured);
        result.truncate(limit);

        debug!(
            "Structured query matched {} of {} records, returning {}",
            matched,
            total_considered,
            result.len()
        );

        Ok(AgentOutput::Search(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use sdk::types::{NumericRange, PropertyRecord};
    use serde_json::json;

    fn record(id: &str, location: &str, price: f64) -> PropertyRecord {
        PropertyRecord {
            property_id: id.to_string(),
            location: location.to_string(),
            price,
            ..Default::default()
        }
    }

    fn agent(limit: usize) -> StructuredQueryAgent {
        let catalog = JsonCatalog::from_records(vec![
            record("p1", "Bandra, Mumbai", 9_000_000.0),
            record("p2", "Andheri, Mumbai", 25_000_000.0),
            record("p3", "Powai, Mumbai", 12_000_000.0),
            record("p4", "Koregaon Park, Pune", 7_000_000.0),
        ]);
        StructuredQueryAgent::new(Arc::new(catalog), limit, CallPolicy::default())
    }

    fn input(filter: FilterDescriptor) -> AgentInput {
        AgentInput::new().with_param(params::FILTER, json!(filter))
    }

    #[tokio::test]
    async fn test_exclusive_bound_excludes_equal_price() {
        let filter = FilterDescriptor {
            price: Some(NumericRange::below(25_000_000.0)),
            ..Default::default()
        };

        let output = agent(50).run(input(filter)).await.unwrap();
        let search = output.as_search().unwrap();
        assert_eq!(search.property_ids(), vec!["p1", "p3", "p4"]);
        assert_eq!(search.source(), ResultSource::Structured);
        assert!(search.results().iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn test_configured_limit_caps_request() {
        let filter = FilterDescriptor {
            location: Some("Mumbai".to_string()),
            limit: Some(10),
            ..Default::default()
        };

        let output = agent(2).run(input(filter)).await.unwrap();
        assert_eq!(output.as_search().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_limit_keeps_best_ranked_not_first_returned() {
        // A store that ignores the limit and returns rows unsorted
        struct UnorderedStore(Vec<PropertyRecord>);

        #[async_trait]
        impl RelationalStore for UnorderedStore {
            async fn query(
                &self,
                _filter: &FilterDescriptor,
            ) -> Result<Vec<PropertyRecord>, EngineError> {
                Ok(self.0.clone())
            }

            async fn fetch(&self, _ids: &[String]) -> Result<Vec<PropertyRecord>, EngineError> {
                Ok(Vec::new())
            }
        }

        let store = UnorderedStore(vec![
            record("z9", "Thane, Mumbai", 5_000_000.0),
            record("a1", "Worli, Mumbai", 5_000_000.0),
            record("m5", "Juhu, Mumbai", 5_000_000.0),
        ]);
        let agent = StructuredQueryAgent::new(Arc::new(store), 2, CallPolicy::default());
        let filter = FilterDescriptor {
            location: Some("Mumbai".to_string()),
            ..Default::default()
        };

        let output = agent.run(input(filter)).await.unwrap();
        let search = output.as_search().unwrap();
        assert_eq!(search.property_ids(), vec!["a1", "m5"]);
        assert_eq!(search.total_considered(), 3);
    }

    #[tokio::test]
    async fn test_empty_reference_set_matches_nothing() {
        let filter = FilterDescriptor {
            property_ids: Some(Vec::new()),
            ..Default::default()
        };

        let output = agent(50).run(input(filter)).await.unwrap();
        assert!(output.as_search().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_filter_is_insufficient_input() {
        let err = agent(50).run(AgentInput::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AgentInputInsufficient { ref field } if field == "filter"
        ));
    }
}
