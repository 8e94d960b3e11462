//! Conductor Types
//!
//! Intents, agent targets, tasks and plans. A `Plan` is created once per turn
//! by the planner; after that only task statuses and outcomes change.

use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, TaskError};
use sdk::types::AgentOutput;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Classified purpose of a query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    StructuredFilter,
    SemanticSearch,
    RenovationEstimate,
    ReportRequest,
    StatisticsRequest,
    /// Marker for a query carrying more than one intent
    Compound,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::StructuredFilter => "structured_filter",
            Intent::SemanticSearch => "semantic_search",
            Intent::RenovationEstimate => "renovation_estimate",
            Intent::ReportRequest => "report_request",
            Intent::StatisticsRequest => "statistics_request",
            Intent::Compound => "compound",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specialized handler a task is bound to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentTarget {
    StructuredQuery,
    Retrieval,
    Statistics,
    RenovationEstimator,
    Report,
}

impl AgentTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentTarget::StructuredQuery => "structured_query",
            AgentTarget::Retrieval => "retrieval",
            AgentTarget::Statistics => "statistics",
            AgentTarget::RenovationEstimator => "renovation_estimator",
            AgentTarget::Report => "report",
        }
    }

    /// Sequencing stage: producers, then the estimator, then the report
    pub fn stage(&self) -> u8 {
        match self {
            AgentTarget::StructuredQuery | AgentTarget::Retrieval | AgentTarget::Statistics => 0,
            AgentTarget::RenovationEstimator => 1,
            AgentTarget::Report => 2,
        }
    }

    /// Whether the output is a search result
    pub fn produces_search(&self) -> bool {
        matches!(self, AgentTarget::StructuredQuery | AgentTarget::Retrieval)
    }
}

impl fmt::Display for AgentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

/// Part of an upstream output a placeholder pulls in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Id of the top-ranked property of a search result
    FirstPropertyId,
    /// All property ids of a search result
    PropertyIds,
    /// The whole output
    Output,
}

impl Selector {
    /// Extract the selected value, `None` when there is nothing to select
    pub fn select(&self, output: &AgentOutput) -> Option<serde_json::Value> {
        match self {
            Selector::FirstPropertyId => output
                .as_search()
                .and_then(|s| s.first())
                .map(|r| serde_json::Value::String(r.property_id.clone())),
            Selector::PropertyIds => output
                .as_search()
                .filter(|s| !s.is_empty())
                .map(|s| serde_json::json!(s.property_ids())),
            Selector::Output => serde_json::to_value(output).ok(),
        }
    }
}

/// Task input parameter, either fixed at planning time or taken from an
/// earlier task's result just before dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamValue {
    Literal {
        value: serde_json::Value,
    },
    FromTask {
        task_id: String,
        selector: Selector,
        /// Skip reason when the selection comes back empty
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_empty: Option<String>,
    },
}

impl ParamValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        ParamValue::Literal {
            value: value.into(),
        }
    }

    pub fn from_task(task_id: impl Into<String>, selector: Selector) -> Self {
        ParamValue::FromTask {
            task_id: task_id.into(),
            selector,
            on_empty: None,
        }
    }

    pub fn or_skip(self, reason: impl Into<String>) -> Self {
        match self {
            ParamValue::FromTask {
                task_id, selector, ..
            } => ParamValue::FromTask {
                task_id,
                selector,
                on_empty: Some(reason.into()),
            },
            literal => literal,
        }
    }
}

/// Single unit of work bound to one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub agent_target: AgentTarget,
    /// Intent this task was planned for
    pub intent: Intent,
    pub input_parameters: BTreeMap<String, ParamValue>,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, agent_target: AgentTarget, intent: Intent) -> Self {
        Self {
            task_id: task_id.into(),
            agent_target,
            intent,
            input_parameters: BTreeMap::new(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            skip_reason: None,
            duration_ms: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.input_parameters.insert(key.into(), value);
        self
    }

    pub fn depending_on(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    /// Pending -> Running. Returns false if the task already left `Pending`,
    /// so a task can never be dispatched twice.
    pub fn start(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        true
    }

    pub fn succeed(&mut self, output: AgentOutput, duration_ms: u64) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Succeeded;
            self.result = Some(output);
            self.duration_ms = Some(duration_ms);
        }
    }

    pub fn fail(&mut self, error: TaskError, duration_ms: Option<u64>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Failed;
            self.error = Some(error);
            self.duration_ms = duration_ms;
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Skipped;
            self.skip_reason = Some(reason.into());
        }
    }
}

/// Overall plan status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
    TimedOut,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlanStatus::Pending | PlanStatus::Running)
    }
}

/// Ordered, dependency-annotated set of tasks for one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub session_id: String,
    pub tasks: Vec<Task>,
    pub overall_status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Build a plan, rejecting any topology that is not a forward-only DAG
    pub fn new(session_id: impl Into<String>, tasks: Vec<Task>) -> Result<Self, EngineError> {
        let plan = Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            tasks,
            overall_status: PlanStatus::Pending,
            created_at: Utc::now(),
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Check ids are unique and every edge and placeholder points at an
    /// earlier task
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut sequenced: HashSet<&str> = HashSet::new();

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !sequenced.contains(dep.as_str()) {
                    return Err(EngineError::PlanConstruction(format!(
                        "task {} depends on {} which is not sequenced before it",
                        task.task_id, dep
                    )));
                }
            }

            for (key, value) in &task.input_parameters {
                if let ParamValue::FromTask { task_id, .. } = value {
                    if !task.depends_on.contains(task_id) {
                        return Err(EngineError::PlanConstruction(format!(
                            "parameter {} of task {} reads {} without depending on it",
                            key, task.task_id, task_id
                        )));
                    }
                }
            }

            if !sequenced.insert(task.task_id.as_str()) {
                return Err(EngineError::PlanConstruction(format!(
                    "duplicate task id {}",
                    task.task_id
                )));
            }
        }

        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn index_of(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.task_id == task_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Agent targets and dependency shape, ignoring ids and outcomes
    pub fn shape(&self) -> Vec<(AgentTarget, Vec<usize>)> {
        self.tasks
            .iter()
            .map(|t| {
                let deps = t
                    .depends_on
                    .iter()
                    .filter_map(|d| self.index_of(d))
                    .collect();
                (t.agent_target, deps)
            })
            .collect()
    }
}
