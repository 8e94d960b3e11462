//! Orchestrator
//!
//! Executes a plan with a level-by-level DAG scheduler: every task whose
//! dependencies have all succeeded is dispatched concurrently, the level is
//! drained, and the ready set advances. A task whose dependency failed or was
//! skipped is skipped in turn. The whole plan runs under one deadline; tasks
//! still outstanding when it expires are aborted and fail with a timeout.
//!
//! Placeholders (`ParamValue::FromTask`) are resolved right before dispatch
//! against the referenced task's result. Agent errors become task outcomes and
//! never escape `execute`.
//!
//! Once the plan is terminal the turn is appended to the memory store exactly
//! once and the plan is archived.

use crate::agents::AgentRegistry;
use crate::conductor::aggregate::{self, AggregatedResponse};
use crate::conductor::memory::{AppendOutcome, EntryKind, MemoryEntry, MemoryStore, Role};
use crate::conductor::types::{Intent, ParamValue, Plan, PlanStatus, TaskStatus};
use crate::message_bus::{Event, MessageBus};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use sdk::errors::{EngineError, TaskError};
use sdk::types::{AgentInput, AgentOutput};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A user query as recorded for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub session_id: String,
    pub turn_index: u64,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

/// What the orchestrator knows about the turn it executes
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub query: Query,
    pub intents: Vec<Intent>,
    /// Named entities of this query, recorded for later turns
    pub entities: BTreeMap<String, serde_json::Value>,
}

impl SessionContext {
    pub fn new(session_id: &str, turn_index: u64, raw_text: &str, intents: Vec<Intent>) -> Self {
        Self {
            query: Query {
                session_id: session_id.to_string(),
                turn_index,
                raw_text: raw_text.to_string(),
                timestamp: Utc::now(),
            },
            intents,
            entities: BTreeMap::new(),
        }
    }

    pub fn with_entities(mut self, entities: BTreeMap<String, serde_json::Value>) -> Self {
        self.entities = entities;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.query.session_id
    }

    pub fn turn_index(&self) -> u64 {
        self.query.turn_index
    }
}

/// Parameters resolved for dispatch, or a reason not to run
enum Resolution {
    Ready(AgentInput),
    Skip(String),
}

type TaskOutcome = (usize, Result<AgentOutput, TaskError>, u64);

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    memory: Arc<dyn MemoryStore>,
    bus: Option<Arc<MessageBus>>,
    plan_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        memory: Arc<dyn MemoryStore>,
        plan_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            memory,
            bus: None,
            plan_timeout,
        }
    }

    /// Publish lifecycle events on `bus`
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }

    /// Run a plan to a terminal state and record the turn
    pub async fn execute(&self, mut plan: Plan, ctx: &SessionContext) -> AggregatedResponse {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.plan_timeout;
        plan.overall_status = PlanStatus::Running;

        info!(
            "Executing plan {} for session {} turn {} ({} tasks)",
            plan.plan_id,
            ctx.session_id(),
            ctx.turn_index(),
            plan.tasks.len()
        );
        self.publish(Event::PlanStarted {
            plan_id: plan.plan_id.clone(),
            session_id: ctx.session_id().to_string(),
            task_count: plan.tasks.len(),
        })
        .await;

        let timed_out = self.run_levels(&mut plan, deadline).await;
        let elapsed_ms = millis(started.elapsed());
        if timed_out {
            warn!("{}", EngineError::PlanTimeout { elapsed_ms });
        }

        plan.overall_status = aggregate::plan_status(&plan, timed_out);
        info!(
            "Plan {} finished as {:?} in {}ms",
            plan.plan_id, plan.overall_status, elapsed_ms
        );
        self.publish(Event::PlanFinished {
            plan_id: plan.plan_id.clone(),
            status: plan.overall_status,
            elapsed_ms,
        })
        .await;

        let mut response = aggregate::aggregate(
            &plan,
            ctx.session_id(),
            ctx.turn_index(),
            ctx.intents.clone(),
        );
        response.memory_recorded = self.record_turn(&plan, ctx, &response).await;

        if let Err(e) = self.memory.archive_plan(&plan).await {
            warn!("Failed to archive plan {}: {}", plan.plan_id, e);
        }

        response
    }

    /// Drive the plan level by level. Returns true when the deadline expired.
    async fn run_levels(&self, plan: &mut Plan, deadline: tokio::time::Instant) -> bool {
        loop {
            self.cascade_skips(plan).await;

            let ready: Vec<usize> = (0..plan.tasks.len())
                .filter(|&i| {
                    let task = &plan.tasks[i];
                    task.status == TaskStatus::Pending
                        && task.depends_on.iter().all(|d| {
                            plan.task(d)
                                .is_some_and(|t| t.status == TaskStatus::Succeeded)
                        })
                })
                .collect();

            if ready.is_empty() {
                return false;
            }

            if tokio::time::Instant::now() >= deadline {
                self.expire(plan, None).await;
                return true;
            }

            let level_started = Instant::now();
            let mut set: JoinSet<TaskOutcome> = JoinSet::new();

            for idx in ready {
                match resolve_inputs(plan, idx) {
                    Resolution::Skip(reason) => {
                        debug!("Skipping {}: {}", plan.tasks[idx].task_id, reason);
                        plan.tasks[idx].skip(reason);
                        self.task_finished(plan, idx).await;
                    }
                    Resolution::Ready(input) => {
                        if !plan.tasks[idx].start() {
                            continue;
                        }
                        let target = plan.tasks[idx].agent_target;
                        debug!("Dispatching {} to {}", plan.tasks[idx].task_id, target);
                        self.publish(Event::TaskStarted {
                            plan_id: plan.plan_id.clone(),
                            task_id: plan.tasks[idx].task_id.clone(),
                            agent: target,
                        })
                        .await;

                        let registry = Arc::clone(&self.registry);
                        set.spawn(async move {
                            let t0 = Instant::now();
                            let result = AssertUnwindSafe(registry.dispatch(target, input))
                                .catch_unwind()
                                .await;
                            let outcome = match result {
                                Ok(Ok(output)) => Ok(output),
                                Ok(Err(e)) => Err(TaskError::from(&e)),
                                Err(_) => Err(TaskError::internal("agent panicked")),
                            };
                            (idx, outcome, millis(t0.elapsed()))
                        });
                    }
                }
            }

            let drained = tokio::time::timeout_at(deadline, self.drain(&mut set, plan)).await;
            if drained.is_err() {
                set.abort_all();
                self.expire(plan, Some(millis(level_started.elapsed()))).await;
                return true;
            }

            // A join error loses the task's report; do not leave it running
            for idx in 0..plan.tasks.len() {
                if plan.tasks[idx].status == TaskStatus::Running {
                    plan.tasks[idx].fail(TaskError::internal("task ended without a result"), None);
                    self.task_finished(plan, idx).await;
                }
            }
        }
    }

    async fn drain(&self, set: &mut JoinSet<TaskOutcome>, plan: &mut Plan) {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(output), ms)) => {
                    plan.tasks[idx].succeed(output, ms);
                    self.task_finished(plan, idx).await;
                }
                Ok((idx, Err(error), ms)) => {
                    warn!(
                        "Task {} ({}) failed: {}",
                        plan.tasks[idx].task_id, plan.tasks[idx].agent_target, error
                    );
                    plan.tasks[idx].fail(error, Some(ms));
                    self.task_finished(plan, idx).await;
                }
                Err(e) => warn!("Task join failed: {}", e),
            }
        }
    }

    /// Skip every pending task with a failed or skipped dependency
    ///
    /// Dependencies always point backwards, so one pass in plan order
    /// propagates the cascade fully.
    async fn cascade_skips(&self, plan: &mut Plan) {
        for idx in 0..plan.tasks.len() {
            if plan.tasks[idx].status != TaskStatus::Pending {
                continue;
            }

            let blocked = plan.tasks[idx].depends_on.iter().find_map(|dep| {
                plan.task(dep).and_then(|t| match t.status {
                    TaskStatus::Failed | TaskStatus::Skipped => {
                        Some(format!("dependency {} {}", dep, t.status.as_str()))
                    }
                    _ => None,
                })
            });

            if let Some(reason) = blocked {
                debug!("Skipping {}: {}", plan.tasks[idx].task_id, reason);
                plan.tasks[idx].skip(reason);
                self.task_finished(plan, idx).await;
            }
        }
    }

    /// Fail every non-terminal task with a timeout
    async fn expire(&self, plan: &mut Plan, running_ms: Option<u64>) {
        for idx in 0..plan.tasks.len() {
            let status = plan.tasks[idx].status;
            if status.is_terminal() {
                continue;
            }
            let duration = if status == TaskStatus::Running {
                running_ms
            } else {
                None
            };
            warn!(
                "Cancelling task {} ({}) at plan deadline",
                plan.tasks[idx].task_id, plan.tasks[idx].agent_target
            );
            plan.tasks[idx].fail(TaskError::timeout(), duration);
            self.task_finished(plan, idx).await;
        }
    }

    async fn task_finished(&self, plan: &Plan, idx: usize) {
        let task = &plan.tasks[idx];
        info!(
            "Task {} ({}) {} in {}ms",
            task.task_id,
            task.agent_target,
            task.status.as_str(),
            task.duration_ms.unwrap_or(0)
        );
        self.publish(Event::TaskFinished {
            plan_id: plan.plan_id.clone(),
            task_id: task.task_id.clone(),
            agent: task.agent_target,
            status: task.status,
            duration_ms: task.duration_ms,
        })
        .await;
    }

    /// Append the single memory entry for this turn
    async fn record_turn(
        &self,
        plan: &Plan,
        ctx: &SessionContext,
        response: &AggregatedResponse,
    ) -> bool {
        let filter = aggregate::plan_filter(plan);
        let entry = MemoryEntry {
            session_id: ctx.session_id().to_string(),
            turn_index: ctx.turn_index(),
            kind: EntryKind::Turn,
            role: Role::System,
            content: aggregate::turn_summary(response),
            extracted_entities: aggregate::turn_entities(
                response,
                &ctx.query.raw_text,
                filter.as_ref(),
                &ctx.entities,
            ),
            referenced_plan_id: Some(plan.plan_id.clone()),
            recorded_at: Utc::now(),
        };

        match self.memory.append(entry).await {
            Ok(AppendOutcome::Recorded) => {
                info!(
                    "Recorded turn {} of session {}",
                    ctx.turn_index(),
                    ctx.session_id()
                );
                self.publish(Event::TurnRecorded {
                    session_id: ctx.session_id().to_string(),
                    turn_index: ctx.turn_index(),
                    plan_id: plan.plan_id.clone(),
                })
                .await;
                true
            }
            Ok(AppendOutcome::AlreadyRecorded) => {
                debug!("Turn {} was already recorded", ctx.turn_index());
                true
            }
            Err(e) => {
                warn!(
                    "Failed to record turn {} of session {}: {}",
                    ctx.turn_index(),
                    ctx.session_id(),
                    e
                );
                false
            }
        }
    }
}

/// Substitute placeholders from upstream results
///
/// An empty selection skips the task when the placeholder names a skip
/// reason. Otherwise the parameter is left out and the agent decides whether
/// it can run without it.
fn resolve_inputs(plan: &Plan, idx: usize) -> Resolution {
    let task = &plan.tasks[idx];
    let mut input = AgentInput::new();

    for (key, value) in &task.input_parameters {
        match value {
            ParamValue::Literal { value } => {
                input.params.insert(key.clone(), value.clone());
            }
            ParamValue::FromTask {
                task_id,
                selector,
                on_empty,
            } => {
                let selected = plan
                    .task(task_id)
                    .and_then(|t| t.result.as_ref())
                    .and_then(|r| selector.select(r));

                match (selected, on_empty) {
                    (Some(v), _) => {
                        input.params.insert(key.clone(), v);
                    }
                    (None, Some(reason)) => return Resolution::Skip(reason.clone()),
                    (None, None) => {}
                }
            }
        }
    }

    Resolution::Ready(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::{AgentTarget, Selector, Task};
    use sdk::types::{PropertyRef, ResultSource, SearchResult};

    fn search_task(id: &str) -> Task {
        Task::new(id, AgentTarget::StructuredQuery, Intent::StructuredFilter)
    }

    #[test]
    fn test_resolve_selects_first_property() {
        let mut upstream = search_task("t1");
        upstream.status = TaskStatus::Succeeded;
        upstream.result = Some(AgentOutput::Search(SearchResult::ranked(
            vec![PropertyRef::new("p9"), PropertyRef::new("p2")],
            2,
            ResultSource::Structured,
        )));
        let estimator = Task::new("t2", AgentTarget::RenovationEstimator, Intent::RenovationEstimate)
            .with_param(
                "property_id",
                ParamValue::from_task("t1", Selector::FirstPropertyId).or_skip("nothing"),
            )
            .depending_on("t1");

        let plan = Plan::new("s", vec![upstream, estimator]).unwrap();
        match resolve_inputs(&plan, 1) {
            Resolution::Ready(input) => {
                assert_eq!(input.param_str_opt("property_id").as_deref(), Some("p2"));
            }
            Resolution::Skip(r) => panic!("unexpected skip: {}", r),
        }
    }

    #[test]
    fn test_resolve_empty_selection_skips() {
        let mut upstream = search_task("t1");
        upstream.status = TaskStatus::Succeeded;
        upstream.result = Some(AgentOutput::Search(SearchResult::empty(
            ResultSource::Structured,
        )));
        let estimator = Task::new("t2", AgentTarget::RenovationEstimator, Intent::RenovationEstimate)
            .with_param(
                "property_id",
                ParamValue::from_task("t1", Selector::FirstPropertyId)
                    .or_skip("no property to size from"),
            )
            .depending_on("t1");

        let plan = Plan::new("s", vec![upstream, estimator]).unwrap();
        assert!(matches!(
            resolve_inputs(&plan, 1),
            Resolution::Skip(r) if r == "no property to size from"
        ));
    }
}
