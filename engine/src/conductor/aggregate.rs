//! Result aggregation
//!
//! Fuses the outcomes of a terminal plan into one response. Search results
//! merge by concatenation with de-duplication on property id, keeping the
//! higher score. The first output of every other kind passes through
//! unchanged.

use crate::conductor::context::keys;
use crate::conductor::planner::params;
use crate::conductor::types::{AgentTarget, Intent, ParamValue, Plan, PlanStatus, TaskStatus};
use sdk::errors::TaskError;
use sdk::types::{
    AgentOutput, FilterDescriptor, PropertyRef, PropertyStatistics, RenovationEstimate,
    ReportDescriptor, ResultSource, SearchResult, TierComparison,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Overall outcome of a turn as seen by the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Every task succeeded
    Complete,
    /// Some sections are missing
    Partial,
    /// The plan deadline expired with at least one result present
    Incomplete,
    /// Nothing succeeded
    Failed,
}

/// Per-task status line of a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionStatus {
    pub task_id: String,
    pub agent: AgentTarget,
    pub intent: Intent,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl SectionStatus {
    /// Short human-readable note for a section that did not succeed
    pub fn note(&self) -> Option<String> {
        let what = section_label(self.agent);
        match self.status {
            TaskStatus::Failed => Some(match &self.error {
                Some(TaskError {
                    field: Some(field), ..
                }) => format!("{} unavailable: missing {}", what, field),
                Some(e) => format!("{} unavailable: {}", what, e.message),
                None => format!("{} unavailable", what),
            }),
            TaskStatus::Skipped => Some(format!(
                "{} skipped: {}",
                what,
                self.skip_reason.as_deref().unwrap_or("not run")
            )),
            _ => None,
        }
    }
}

fn section_label(agent: AgentTarget) -> &'static str {
    match agent {
        AgentTarget::StructuredQuery => "property search",
        AgentTarget::Retrieval => "similarity search",
        AgentTarget::Statistics => "statistics",
        AgentTarget::RenovationEstimator => "renovation estimate",
        AgentTarget::Report => "report",
    }
}

/// Fused response for one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedResponse {
    pub plan_id: String,
    pub session_id: String,
    pub turn_index: u64,
    pub intents: Vec<Intent>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<RenovationEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_comparison: Option<TierComparison>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<PropertyStatistics>,
    pub sections: Vec<SectionStatus>,
    /// Present when no task succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    /// The plan deadline expired before every task finished
    pub incomplete: bool,
    /// The turn reached the memory store
    pub memory_recorded: bool,
}

impl AggregatedResponse {
    /// Notes for every section that did not succeed
    pub fn warnings(&self) -> Vec<String> {
        self.sections.iter().filter_map(SectionStatus::note).collect()
    }

    pub fn section(&self, task_id: &str) -> Option<&SectionStatus> {
        self.sections.iter().find(|s| s.task_id == task_id)
    }
}

/// Merge search results
///
/// Duplicates keep the higher score; a present score beats an absent one.
/// Provenance becomes `hybrid` when sources differ.
pub fn merge_searches<'a>(searches: impl IntoIterator<Item = &'a SearchResult>) -> Option<SearchResult> {
    let mut source: Option<ResultSource> = None;
    let mut total_considered = 0;
    let mut best: HashMap<String, Option<f64>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for search in searches {
        source = Some(source.map_or(search.source(), |s| s.combine(search.source())));
        total_considered += search.total_considered();

        for r in search.results() {
            match best.get_mut(&r.property_id) {
                Some(existing) => {
                    let better = match (*existing, r.score) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                    *existing = better;
                }
                None => {
                    order.push(r.property_id.clone());
                    best.insert(r.property_id.clone(), r.score);
                }
            }
        }
    }

    let source = source?;
    let refs: Vec<PropertyRef> = order
        .into_iter()
        .map(|id| {
            let score = best.get(&id).copied().flatten();
            PropertyRef {
                property_id: id,
                score,
            }
        })
        .collect();

    Some(SearchResult::ranked(refs, total_considered, source))
}

/// Plan status implied by the task outcomes
pub fn plan_status(plan: &Plan, timed_out: bool) -> PlanStatus {
    let succeeded = plan
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Succeeded)
        .count();

    if timed_out {
        PlanStatus::TimedOut
    } else if plan.tasks.is_empty() || succeeded == 0 {
        PlanStatus::Failed
    } else if succeeded == plan.tasks.len() {
        PlanStatus::Succeeded
    } else {
        PlanStatus::PartiallyFailed
    }
}

/// Build the response for a terminal plan
pub fn aggregate(
    plan: &Plan,
    session_id: &str,
    turn_index: u64,
    intents: Vec<Intent>,
) -> AggregatedResponse {
    let outputs: Vec<(&str, &AgentOutput)> = plan
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Succeeded)
        .filter_map(|t| t.result.as_ref().map(|r| (t.task_id.as_str(), r)))
        .collect();

    let search = merge_searches(outputs.iter().filter_map(|(_, o)| o.as_search()));
    let estimate = first_of(&outputs, "estimate", AgentOutput::as_estimate);
    let tier_comparison = first_of(&outputs, "tier comparison", AgentOutput::as_tier_comparison);
    let report = first_of(&outputs, "report", AgentOutput::as_report);
    let statistics = first_of(&outputs, "statistics", AgentOutput::as_statistics);

    let sections: Vec<SectionStatus> = plan
        .tasks
        .iter()
        .map(|t| SectionStatus {
            task_id: t.task_id.clone(),
            agent: t.agent_target,
            intent: t.intent,
            status: t.status,
            duration_ms: t.duration_ms,
            error: t.error.clone(),
            skip_reason: t.skip_reason.clone(),
        })
        .collect();

    let incomplete = plan.overall_status == PlanStatus::TimedOut;
    let status = if outputs.is_empty() {
        ResponseStatus::Failed
    } else if incomplete {
        ResponseStatus::Incomplete
    } else if outputs.len() == plan.tasks.len() {
        ResponseStatus::Complete
    } else {
        ResponseStatus::Partial
    };

    let failure_summary = (status == ResponseStatus::Failed).then(|| {
        let notes: Vec<String> = sections.iter().filter_map(SectionStatus::note).collect();
        if notes.is_empty() {
            "No part of the request could be completed".to_string()
        } else {
            format!("No part of the request could be completed: {}", notes.join("; "))
        }
    });

    AggregatedResponse {
        plan_id: plan.plan_id.clone(),
        session_id: session_id.to_string(),
        turn_index,
        intents,
        status,
        search,
        estimate,
        tier_comparison,
        report,
        statistics,
        sections,
        failure_summary,
        incomplete,
        memory_recorded: false,
    }
}

fn first_of<T: Clone>(
    outputs: &[(&str, &AgentOutput)],
    what: &str,
    pick: impl Fn(&AgentOutput) -> Option<&T>,
) -> Option<T> {
    let mut found = outputs.iter().filter_map(|(id, o)| pick(o).map(|v| (*id, v)));
    let first = found.next().map(|(_, v)| v.clone());
    for (task_id, _) in found {
        warn!("Ignoring extra {} from task {}", what, task_id);
    }
    first
}

/// First structured filter the plan ran with, if any
pub fn plan_filter(plan: &Plan) -> Option<FilterDescriptor> {
    plan.tasks
        .iter()
        .filter(|t| t.agent_target == AgentTarget::StructuredQuery)
        .find_map(|t| match t.input_parameters.get(params::FILTER) {
            Some(ParamValue::Literal { value }) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        })
}

/// Entities recorded for a turn so later turns can refer back to it
pub fn turn_entities(
    response: &AggregatedResponse,
    raw_text: &str,
    filter: Option<&FilterDescriptor>,
    named: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    let mut entities = BTreeMap::new();
    entities.insert(keys::QUERY.to_string(), serde_json::json!(raw_text));
    entities.insert(keys::INTENTS.to_string(), serde_json::json!(response.intents));
    entities.insert(keys::STATUS.to_string(), serde_json::json!(response.status));

    let mut put = |key: &str, value: Option<serde_json::Value>| {
        if let Some(v) = value {
            entities.insert(key.to_string(), v);
        }
    };
    put(keys::SEARCH, response.search.as_ref().and_then(|s| serde_json::to_value(s).ok()));
    put(keys::FILTER, filter.and_then(|f| serde_json::to_value(f).ok()));
    put(keys::ESTIMATE, response.estimate.as_ref().and_then(|e| serde_json::to_value(e).ok()));
    put(
        keys::TIER_COMPARISON,
        response.tier_comparison.as_ref().and_then(|c| serde_json::to_value(c).ok()),
    );
    put(keys::REPORT, response.report.as_ref().and_then(|r| serde_json::to_value(r).ok()));
    put(
        keys::STATISTICS,
        response.statistics.as_ref().and_then(|s| serde_json::to_value(s).ok()),
    );
    if !named.is_empty() {
        put(keys::ENTITIES, serde_json::to_value(named).ok());
    }

    entities
}

/// One-line summary stored as the memory entry content
pub fn turn_summary(response: &AggregatedResponse) -> String {
    let intents: Vec<&str> = response.intents.iter().map(|i| i.as_str()).collect();
    let mut parts = vec![format!("[{}] {:?}", intents.join(", "), response.status).to_lowercase()];

    if let Some(search) = &response.search {
        parts.push(format!("{} properties", search.len()));
    }
    if let Some(estimate) = &response.estimate {
        parts.push(format!("estimate {:.0}", estimate.computed_total));
    }
    if let Some(comparison) = &response.tier_comparison {
        parts.push(format!(
            "tier comparison over {:.0} sq ft",
            comparison.basis_square_feet
        ));
    }
    if let Some(report) = &response.report {
        parts.push(format!("report '{}'", report.title));
    }
    if let Some(stats) = &response.statistics {
        parts.push(format!("statistics over {}", stats.total_properties));
    }

    parts.join("; ")
}
