//! Statistics Agent
//!
//! Aggregate figures over the properties matching a filter: count, price
//! average and range, distinct locations and a price distribution.

use crate::agents::{call_collaborator, Agent, CallPolicy};
use crate::conductor::planner::params;
use crate::conductor::types::AgentTarget;
use async_trait::async_trait;
use sdk::collaborators::RelationalStore;
use sdk::errors::EngineError;
use sdk::types::{AgentInput, AgentOutput, FilterDescriptor, PriceBucket, PropertyRecord, PropertyStatistics};
use std::sync::Arc;

const MAX_LOCATIONS: usize = 10;

/// Upper bounds (exclusive) and labels of the price distribution
const BUCKETS: [(f64, &str); 5] = [
    (5_000_000.0, "Under 50L"),
    (10_000_000.0, "50L-1Cr"),
    (20_000_000.0, "1Cr-2Cr"),
    (50_000_000.0, "2Cr-5Cr"),
    (f64::INFINITY, "5Cr+"),
];

/// Summarise records. Unpriced records count toward the total only.
pub fn summarize(records: &[PropertyRecord]) -> PropertyStatistics {
    let prices: Vec<f64> = records
        .iter()
        .map(|r| r.price)
        .filter(|p| *p > 0.0)
        .collect();

    let (average_price, min_price, max_price) = if prices.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let sum: f64 = prices.iter().sum();
        (
            sum / prices.len() as f64,
            prices.iter().copied().fold(f64::INFINITY, f64::min),
            prices.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };

    let mut locations: Vec<String> = Vec::new();
    for record in records {
        let location = record.location.trim();
        if location.is_empty() || locations.iter().any(|l| l == location) {
            continue;
        }
        locations.push(location.to_string());
        if locations.len() == MAX_LOCATIONS {
            break;
        }
    }

    let price_distribution = BUCKETS
        .iter()
        .enumerate()
        .map(|(i, (upper, label))| {
            let lower = if i == 0 { 0.0 } else { BUCKETS[i - 1].0 };
            PriceBucket {
                label: label.to_string(),
                count: prices.iter().filter(|p| **p >= lower && **p < *upper).count(),
            }
        })
        .collect();

    PropertyStatistics {
        total_properties: records.len(),
        average_price,
        min_price,
        max_price,
        locations,
        price_distribution,
    }
}

pub struct StatisticsAgent {
    store: Arc<dyn RelationalStore>,
    policy: CallPolicy,
}

impl StatisticsAgent {
    pub fn new(store: Arc<dyn RelationalStore>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl Agent for StatisticsAgent {
    fn target(&self) -> AgentTarget {
        AgentTarget::Statistics
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        // No filter means the whole catalog
        let mut filter: FilterDescriptor = if input.params.contains_key(params::FILTER) {
            input.param_as(params::FILTER)?
        } else {
            FilterDescriptor::default()
        };
        filter.limit = None;

        let store = &self.store;
        let records = call_collaborator(store.name(), self.policy, || store.query(&filter)).await?;
        let matched: Vec<PropertyRecord> = records.into_iter().filter(|r| filter.matches(r)).collect();

        Ok(AgentOutput::Statistics(summarize(&matched)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use serde_json::json;

    fn record(id: &str, location: &str, price: f64) -> PropertyRecord {
        PropertyRecord {
            property_id: id.to_string(),
            location: location.to_string(),
            price,
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_figures() {
        let stats = summarize(&[
            record("a", "Pune", 4_000_000.0),
            record("b", "Pune", 8_000_000.0),
            record("c", "Delhi", 30_000_000.0),
            record("d", "Delhi", 0.0),
        ]);

        assert_eq!(stats.total_properties, 4);
        assert_eq!(stats.min_price, 4_000_000.0);
        assert_eq!(stats.max_price, 30_000_000.0);
        assert_eq!(stats.average_price, 14_000_000.0);
        assert_eq!(stats.locations, vec!["Pune", "Delhi"]);

        let counts: Vec<usize> = stats.price_distribution.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 1, 0]);
    }

    #[test]
    fn test_empty_input() {
        let stats = summarize(&[]);
        assert_eq!(stats.total_properties, 0);
        assert_eq!(stats.average_price, 0.0);
        assert_eq!(stats.price_distribution.len(), 5);
    }

    #[test]
    fn test_locations_are_capped() {
        let records: Vec<PropertyRecord> = (0..15)
            .map(|i| record(&format!("p{}", i), &format!("City{}", i), 1.0))
            .collect();
        assert_eq!(summarize(&records).locations.len(), 10);
    }

    #[tokio::test]
    async fn test_agent_applies_filter() {
        let catalog = JsonCatalog::from_records(vec![
            record("a", "Pune", 4_000_000.0),
            record("b", "Mumbai", 90_000_000.0),
        ]);
        let agent = StatisticsAgent::new(Arc::new(catalog), CallPolicy::default());

        let all = agent.run(AgentInput::new()).await.unwrap();
        assert_eq!(all.as_statistics().unwrap().total_properties, 2);

        let pune = agent
            .run(AgentInput::new().with_param(params::FILTER, json!({"location": "pune"})))
            .await
            .unwrap();
        assert_eq!(pune.as_statistics().unwrap().total_properties, 1);
    }
}
