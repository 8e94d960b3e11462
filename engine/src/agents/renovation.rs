//! Renovation Estimator Agent
//!
//! `computed_total = basis_square_feet × rate(tier)`, split into fixed
//! category shares. The size comes either from an explicit parameter or from
//! the property record fetched through the relational store. With
//! `compare_tiers` set, every tier is estimated over that size instead.

use crate::agents::{call_collaborator, Agent, CallPolicy};
use crate::conductor::planner::params;
use crate::conductor::types::AgentTarget;
use crate::config::RatesConfig;
use async_trait::async_trait;
use sdk::collaborators::RelationalStore;
use sdk::errors::EngineError;
use sdk::types::{
    AgentInput, AgentOutput, CostCategory, RenovationEstimate, RenovationTier, TierComparison,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Share of the total per cost category. Sums to 1.0.
pub const COST_SHARES: [(CostCategory, f64); 3] = [
    (CostCategory::Materials, 0.50),
    (CostCategory::Labor, 0.40),
    (CostCategory::Permits, 0.10),
];

/// Pure estimate for a known size, tier and rate
pub fn estimate(basis_square_feet: f64, tier: RenovationTier, rate: f64) -> RenovationEstimate {
    let computed_total = basis_square_feet * rate;
    let breakdown: BTreeMap<CostCategory, f64> = COST_SHARES
        .iter()
        .map(|(category, share)| (*category, computed_total * share))
        .collect();

    RenovationEstimate {
        basis_square_feet,
        unit_cost_rate: rate,
        tier,
        computed_total,
        breakdown,
        property_id: None,
    }
}

pub struct RenovationEstimatorAgent {
    store: Arc<dyn RelationalStore>,
    rates: RatesConfig,
    default_tier: RenovationTier,
    policy: CallPolicy,
}

impl RenovationEstimatorAgent {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        rates: RatesConfig,
        default_tier: RenovationTier,
        policy: CallPolicy,
    ) -> Self {
        Self {
            store,
            rates,
            default_tier,
            policy,
        }
    }

    async fn size_of(&self, property_id: &str) -> Result<f64, EngineError> {
        let ids = [property_id.to_string()];
        let store = &self.store;
        let records = call_collaborator(store.name(), self.policy, || store.fetch(&ids)).await?;

        records
            .first()
            .and_then(|r| r.square_feet)
            .filter(|s| *s > 0.0)
            .ok_or_else(|| EngineError::missing(params::SQUARE_FEET))
    }
}

#[async_trait]
impl Agent for RenovationEstimatorAgent {
    fn target(&self) -> AgentTarget {
        AgentTarget::RenovationEstimator
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        let (basis, property_id) = match input.param_f64_opt(params::SQUARE_FEET) {
            Some(size) => (size, None),
            None => {
                let id = input
                    .param_str_opt(params::PROPERTY_ID)
                    .ok_or_else(|| EngineError::missing(params::SQUARE_FEET))?;
                (self.size_of(&id).await?, Some(id))
            }
        };

        let compare = input
            .params
            .get(params::COMPARE_TIERS)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if compare {
            let estimates: Vec<RenovationEstimate> = RenovationTier::ALL
                .into_iter()
                .map(|tier| {
                    let mut e = estimate(basis, tier, self.rates.rate(tier));
                    e.property_id = property_id.clone();
                    e
                })
                .collect();
            debug!(
                "Compared {} tiers over {} sqft",
                estimates.len(),
                basis
            );
            return Ok(AgentOutput::TierComparison(TierComparison {
                basis_square_feet: basis,
                property_id,
                estimates,
            }));
        }

        let tier = input
            .param_str_opt(params::TIER)
            .and_then(|t| RenovationTier::parse(&t))
            .unwrap_or(self.default_tier);
        let mut result = estimate(basis, tier, self.rates.rate(tier));
        result.property_id = property_id;

        debug!(
            "Estimated {} renovation of {} sqft at {}: {}",
            tier.as_str(),
            basis,
            result.unit_cost_rate,
            result.computed_total
        );

        Ok(AgentOutput::Estimate(result))
    }
}
