//! Task Planner
//!
//! Expands a classification into a `Plan` through a fixed intent-to-agent
//! table. Tasks are sequenced in three stages (search and statistics
//! producers, then the renovation estimator, then the report); within a stage
//! they keep the order their intents appeared in the text. Task ids are
//! `t1..tn` in sequence order, so re-planning the same classification against
//! the same state yields the same shape.

use crate::conductor::context::{entity, preference, ConversationState};
use crate::conductor::extract::Evidence;
use crate::conductor::router::Classification;
use crate::conductor::types::{AgentTarget, Intent, ParamValue, Plan, Selector, Task};
use sdk::errors::EngineError;
use sdk::types::{AgentOutput, FilterDescriptor, RenovationTier, ReportType};
use tracing::{debug, info};

/// Skip reason for an estimator whose upstream search matched nothing
pub const NO_PROPERTY_TO_SIZE: &str = "no property to size from";

/// Parameter names shared by the planner and the agents
pub mod params {
    pub const FILTER: &str = "filter";
    pub const TEXT: &str = "text";
    pub const SQUARE_FEET: &str = "square_feet";
    pub const PROPERTY_ID: &str = "property_id";
    pub const TIER: &str = "tier";
    pub const COMPARE_TIERS: &str = "compare_tiers";
    /// Property whose description anchors a similarity search
    pub const SEED_PROPERTY: &str = "seed_property_id";
    pub const REPORT_TYPE: &str = "report_type";
    pub const LOCATIONS: &str = "locations";
    /// Prefix of report source parameters
    pub const SOURCE_PREFIX: &str = "source.";

    /// Report source key for the output at `position`
    ///
    /// The position is zero-padded so the key order the report agent reads
    /// sources in matches plan order past nine tasks.
    pub fn source_key(position: usize, label: &str) -> String {
        format!("{}{:03}.{}", SOURCE_PREFIX, position, label)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskPlanner;

impl TaskPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Build the plan for one classified query
    ///
    /// # Errors
    ///
    /// `EngineError::PlanConstruction` when the produced graph is not a
    /// forward-only DAG. That indicates a defect in the template table.
    pub fn plan(
        &self,
        classification: &Classification,
        state: &ConversationState,
        session_id: &str,
    ) -> Result<Plan, EngineError> {
        let mut tasks: Vec<Task> = Vec::new();
        let next_id = |tasks: &Vec<Task>| format!("t{}", tasks.len() + 1);

        // Stage 0: producers in text order
        for detected in &classification.intents {
            match detected.intent {
                Intent::StructuredFilter => {
                    for filter in structured_filters(classification, state) {
                        let task = Task::new(
                            next_id(&tasks),
                            AgentTarget::StructuredQuery,
                            Intent::StructuredFilter,
                        )
                        .with_param(params::FILTER, ParamValue::literal(serde_json::to_value(&filter)?));
                        tasks.push(task);
                    }
                }
                Intent::SemanticSearch => {
                    let task = Task::new(
                        next_id(&tasks),
                        AgentTarget::Retrieval,
                        Intent::SemanticSearch,
                    );
                    let task = match &classification.facts.seed_property_id {
                        Some(seed) => {
                            task.with_param(params::SEED_PROPERTY, ParamValue::literal(seed.as_str()))
                        }
                        None => task.with_param(
                            params::TEXT,
                            ParamValue::literal(semantic_fragment(classification)),
                        ),
                    };
                    tasks.push(task);
                }
                Intent::StatisticsRequest => {
                    let mut filter = classification.facts.filter(None);
                    if classification.facts.referential {
                        filter.property_ids = state.last_property_ids();
                    }
                    let task = Task::new(
                        next_id(&tasks),
                        AgentTarget::Statistics,
                        Intent::StatisticsRequest,
                    )
                    .with_param(params::FILTER, ParamValue::literal(serde_json::to_value(&filter)?));
                    tasks.push(task);
                }
                Intent::RenovationEstimate | Intent::ReportRequest | Intent::Compound => {}
            }
        }

        // Stage 1: the estimator
        if classification.has(Intent::RenovationEstimate) {
            let task = self.estimator_task(next_id(&tasks), classification, state, &tasks);
            tasks.push(task);
        }

        // Stage 2: the report
        if classification.has(Intent::ReportRequest) {
            let task = self.report_task(next_id(&tasks), classification, state, &tasks)?;
            tasks.push(task);
        }

        let plan = Plan::new(session_id, tasks)?;

        info!(
            "Created plan {} with {} tasks for [{}]",
            plan.plan_id,
            plan.tasks.len(),
            classification
                .intent_list()
                .iter()
                .map(|i| i.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        for task in &plan.tasks {
            debug!(
                "  {} -> {} (depends on {:?})",
                task.task_id, task.agent_target, task.depends_on
            );
        }

        Ok(plan)
    }

    fn estimator_task(
        &self,
        task_id: String,
        classification: &Classification,
        state: &ConversationState,
        earlier: &[Task],
    ) -> Task {
        let facts = &classification.facts;
        let mut task = Task::new(
            task_id,
            AgentTarget::RenovationEstimator,
            Intent::RenovationEstimate,
        );

        if facts.compare_tiers {
            task = task.with_param(params::COMPARE_TIERS, ParamValue::literal(true));
        } else {
            // A tier from an earlier estimate still applies, then the
            // session's preferred tier
            let tier = facts
                .tier
                .or_else(|| state.entity_str(entity::TIER).and_then(RenovationTier::parse))
                .or_else(|| {
                    state
                        .preference_str(preference::RENOVATION_TIER)
                        .and_then(RenovationTier::parse)
                });
            if let Some(tier) = tier {
                task = task.with_param(params::TIER, ParamValue::literal(tier.as_str()));
            }
        }

        if let Some(square_feet) = facts.square_feet {
            return task.with_param(params::SQUARE_FEET, ParamValue::literal(square_feet));
        }

        let search_source = earlier
            .iter()
            .find(|t| t.agent_target == AgentTarget::StructuredQuery)
            .or_else(|| {
                earlier
                    .iter()
                    .find(|t| t.agent_target == AgentTarget::Retrieval)
            });

        if let Some(source) = search_source {
            return task
                .with_param(
                    params::PROPERTY_ID,
                    ParamValue::from_task(source.task_id.clone(), Selector::FirstPropertyId)
                        .or_skip(NO_PROPERTY_TO_SIZE),
                )
                .depending_on(source.task_id.clone());
        }

        if let Some(property_id) = state.last_first_property() {
            return task.with_param(params::PROPERTY_ID, ParamValue::literal(property_id));
        }

        // Nothing to size from; the estimator reports the missing field
        task
    }

    fn report_task(
        &self,
        task_id: String,
        classification: &Classification,
        state: &ConversationState,
        earlier: &[Task],
    ) -> Result<Task, EngineError> {
        let facts = &classification.facts;
        let report_type = facts.report_type.unwrap_or(if facts.locations.len() > 1 {
            ReportType::Comparison
        } else {
            ReportType::Summary
        });
        let locations: Vec<&str> = facts.locations.iter().map(|l| l.name.as_str()).collect();

        let mut task = Task::new(task_id, AgentTarget::Report, Intent::ReportRequest)
            .with_param(params::REPORT_TYPE, ParamValue::literal(report_type.as_str()))
            .with_param(params::LOCATIONS, ParamValue::literal(serde_json::json!(locations)));

        if !earlier.is_empty() {
            for (position, source) in earlier.iter().enumerate() {
                task = task
                    .with_param(
                        params::source_key(position + 1, &source.task_id),
                        ParamValue::from_task(source.task_id.clone(), Selector::Output),
                    )
                    .depending_on(source.task_id.clone());
            }
            return Ok(task);
        }

        // Report on what the conversation already produced
        if let Some(search) = &state.last_search {
            let output = AgentOutput::Search(search.clone());
            task = task.with_param(
                params::source_key(1, "memory_search"),
                ParamValue::literal(serde_json::to_value(&output)?),
            );
        }
        if let Some(estimate) = &state.last_estimate {
            let output = AgentOutput::Estimate(estimate.clone());
            task = task.with_param(
                params::source_key(2, "memory_estimate"),
                ParamValue::literal(serde_json::to_value(&output)?),
            );
        }

        Ok(task)
    }
}

/// One filter per named location, or a single filter
fn structured_filters(
    classification: &Classification,
    state: &ConversationState,
) -> Vec<FilterDescriptor> {
    let facts = &classification.facts;

    let mut filters: Vec<FilterDescriptor> = if facts.locations.len() > 1 {
        facts
            .locations
            .iter()
            .map(|l| facts.filter(Some(&l.name)))
            .collect()
    } else {
        vec![facts.filter(None)]
    };

    if facts.referential {
        if let Some(ids) = state.last_property_ids() {
            for filter in &mut filters {
                filter.property_ids = Some(ids.clone());
            }
        }
    }

    filters
}

/// Query text for the retrieval agent
///
/// When the plan also carries a structured task, the structured evidence is
/// cut out so the similarity search sees only the descriptive part.
fn semantic_fragment(classification: &Classification) -> String {
    let raw = &classification.raw_text;
    if !classification.has(Intent::StructuredFilter) {
        return raw.trim().to_string();
    }

    let mut spans: Vec<&Evidence> = classification
        .evidence_for(Intent::StructuredFilter)
        .iter()
        .collect();
    spans.sort_by_key(|e| e.start);

    let mut fragment = String::with_capacity(raw.len());
    let mut cursor = 0;
    for span in spans {
        if span.start >= cursor {
            fragment.push_str(raw.get(cursor..span.start).unwrap_or_default());
            fragment.push(' ');
        }
        cursor = cursor.max(span.end);
    }
    fragment.push_str(raw.get(cursor..).unwrap_or_default());

    let collapsed = fragment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = collapsed.trim_matches(|c: char| c.is_ascii_punctuation() || c == ' ');

    if collapsed.is_empty() {
        raw.trim().to_string()
    } else {
        collapsed.to_string()
    }
}
