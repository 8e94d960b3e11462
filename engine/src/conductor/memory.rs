//! Session Memory
//!
//! Session-scoped, append-only conversation log plus a bounded archive of
//! executed plans. Every entry point is keyed by session id; there is no
//! process-wide session state.
//!
//! Besides conversation turns the log holds saved properties and preference
//! changes. Those share the turn index sequence but sit outside the history
//! window, so a snapshot always carries every one of them.
//!
//! Two stores share these semantics: [`InMemoryStore`] here and
//! `db::SqliteMemoryStore` for durable sessions.

use crate::conductor::types::Plan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;

/// Speaker of a memory entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// What a memory entry records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// One answered query
    #[default]
    Turn,
    /// A property the user bookmarked
    SavedProperty,
    /// A user preference change
    Preference,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Turn => "turn",
            EntryKind::SavedProperty => "saved_property",
            EntryKind::Preference => "preference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "turn" => Some(EntryKind::Turn),
            "saved_property" => Some(EntryKind::SavedProperty),
            "preference" => Some(EntryKind::Preference),
            _ => None,
        }
    }
}

/// One recorded log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub session_id: String,
    pub turn_index: u64,
    #[serde(default)]
    pub kind: EntryKind,
    pub role: Role,
    pub content: String,
    pub extracted_entities: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_plan_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// User entry of a non-turn kind, stamped now
    pub fn user_record(
        session_id: impl Into<String>,
        turn_index: u64,
        kind: EntryKind,
        content: impl Into<String>,
        extracted_entities: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            turn_index,
            kind,
            role: Role::User,
            content: content.into(),
            extracted_entities,
            referenced_plan_id: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Consistent view of a session taken before planning
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// The last `history_window` turns plus every saved property and
    /// preference entry, oldest first
    pub entries: Vec<MemoryEntry>,
    pub next_turn_index: u64,
}

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded,
    /// Exact replay of the last recorded turn; nothing was written
    AlreadyRecorded,
}

/// Retention limits shared by both stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Conversation turns returned by `snapshot`
    pub history_window: usize,
    /// Plans kept per session
    pub max_retained_plans: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            history_window: 20,
            max_retained_plans: 10,
        }
    }
}

impl From<&crate::config::MemoryConfig> for MemoryLimits {
    fn from(config: &crate::config::MemoryConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_retained_plans: config.max_retained_plans,
        }
    }
}

/// Session-keyed conversation store
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Recent entries and the next turn index for a session
    async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, EngineError>;

    /// Append one entry. Turn indexes must strictly increase per session.
    async fn append(&self, entry: MemoryEntry) -> Result<AppendOutcome, EngineError>;

    /// Recorded entries, oldest first, optionally only the last `limit`
    async fn entries(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, EngineError>;

    /// Keep an executed plan, evicting the oldest beyond the retention limit
    async fn archive_plan(&self, plan: &Plan) -> Result<(), EngineError>;

    async fn plan(&self, session_id: &str, plan_id: &str) -> Result<Option<Plan>, EngineError>;

    /// End a session, dropping its log and plans. Returns whether it existed.
    async fn forget(&self, session_id: &str) -> Result<bool, EngineError>;
}

/// Decide whether `entry` may follow `last`
///
/// `Ok(None)` means write it, `Ok(Some(AlreadyRecorded))` means it is an
/// exact replay of `last`.
pub(crate) fn check_append(
    last: Option<&MemoryEntry>,
    entry: &MemoryEntry,
) -> Result<Option<AppendOutcome>, EngineError> {
    let Some(last) = last else {
        return Ok(None);
    };

    if entry.turn_index > last.turn_index {
        return Ok(None);
    }

    if entry.turn_index == last.turn_index
        && entry.referenced_plan_id.is_some()
        && entry.referenced_plan_id == last.referenced_plan_id
    {
        return Ok(Some(AppendOutcome::AlreadyRecorded));
    }

    Err(EngineError::MemoryConflict {
        session_id: entry.session_id.clone(),
        reason: format!(
            "turn {} does not follow recorded turn {}",
            entry.turn_index, last.turn_index
        ),
    })
}

#[derive(Debug, Default)]
struct SessionLog {
    entries: Vec<MemoryEntry>,
    plans: VecDeque<Plan>,
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, SessionLog>>,
    limits: MemoryLimits,
}

impl InMemoryStore {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits,
        }
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

/// The last `window` turns and every non-turn entry, in log order
pub(crate) fn windowed(entries: &[MemoryEntry], window: usize) -> Vec<MemoryEntry> {
    let turns = entries.iter().filter(|e| e.kind == EntryKind::Turn).count();
    let mut skip = turns.saturating_sub(window);

    entries
        .iter()
        .filter(|e| {
            if e.kind != EntryKind::Turn {
                return true;
            }
            if skip > 0 {
                skip -= 1;
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, EngineError> {
        let sessions = self.sessions.read().await;
        let log = sessions.get(session_id);

        let entries = log
            .map(|l| windowed(&l.entries, self.limits.history_window))
            .unwrap_or_default();
        let next_turn_index = log
            .and_then(|l| l.entries.last())
            .map(|e| e.turn_index + 1)
            .unwrap_or(1);

        Ok(SessionSnapshot {
            session_id: session_id.to_string(),
            entries,
            next_turn_index,
        })
    }

    async fn append(&self, entry: MemoryEntry) -> Result<AppendOutcome, EngineError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(entry.session_id.clone()).or_default();

        if let Some(outcome) = check_append(log.entries.last(), &entry)? {
            return Ok(outcome);
        }

        log.entries.push(entry);
        Ok(AppendOutcome::Recorded)
    }

    async fn entries(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, EngineError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|l| tail(&l.entries, limit.unwrap_or(usize::MAX)))
            .unwrap_or_default())
    }

    async fn archive_plan(&self, plan: &Plan) -> Result<(), EngineError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(plan.session_id.clone()).or_default();

        log.plans.retain(|p| p.plan_id != plan.plan_id);
        log.plans.push_back(plan.clone());
        while log.plans.len() > self.limits.max_retained_plans {
            log.plans.pop_front();
        }
        Ok(())
    }

    async fn plan(&self, session_id: &str, plan_id: &str) -> Result<Option<Plan>, EngineError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|l| l.plans.iter().find(|p| p.plan_id == plan_id))
            .cloned())
    }

    async fn forget(&self, session_id: &str) -> Result<bool, EngineError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}
