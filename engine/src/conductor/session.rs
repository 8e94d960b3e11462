//! Assistant facade
//!
//! One entry point per turn: take a consistent memory snapshot, classify,
//! plan, execute. Turns of the same session are serialised by a per-session
//! lock so the snapshot and the append never interleave with another turn;
//! different sessions proceed concurrently. A session's lock is dropped from
//! the table once no turn holds or waits on it.
//!
//! Saved properties and preferences are recorded through the same lock as
//! user entries of their own kind, outside the turn window.

use crate::agents::AgentRegistry;
use crate::conductor::aggregate::AggregatedResponse;
use crate::conductor::context::{entity, keys, preference, ConversationState};
use crate::conductor::memory::{EntryKind, MemoryEntry, MemoryStore};
use crate::conductor::orchestrator::{Orchestrator, SessionContext};
use crate::conductor::planner::TaskPlanner;
use crate::conductor::router::{Classification, QueryRouter};
use crate::conductor::types::{Intent, Plan};
use crate::config::Config;
use crate::message_bus::MessageBus;
use sdk::errors::EngineError;
use sdk::types::RenovationTier;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct Assistant {
    router: QueryRouter,
    planner: TaskPlanner,
    orchestrator: Orchestrator,
    memory: Arc<dyn MemoryStore>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Assistant {
    pub fn new(
        config: &Config,
        registry: Arc<AgentRegistry>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self, EngineError> {
        let orchestrator = Orchestrator::new(
            registry,
            Arc::clone(&memory),
            config.orchestrator.plan_timeout(),
        );

        Ok(Self {
            router: QueryRouter::new(&config.router)?,
            planner: TaskPlanner::new(),
            orchestrator,
            memory,
            session_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Publish orchestration events on `bus`
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.orchestrator = self.orchestrator.with_bus(bus);
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drop a session's lock from the table unless another turn is queued on it
    async fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        // One reference in the table, one held by the caller
        if locks
            .get(session_id)
            .is_some_and(|l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) <= 2)
        {
            locks.remove(session_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.session_locks.lock().await.len()
    }

    /// Answer one query
    ///
    /// # Errors
    ///
    /// Only plan construction defects and memory failures before execution
    /// return `Err`. Agent failures are reported inside the response.
    pub async fn handle(
        &self,
        session_id: &str,
        raw_text: &str,
    ) -> Result<AggregatedResponse, EngineError> {
        check_session_id(session_id)?;

        let lock = self.session_lock(session_id).await;
        let result = {
            let _turn = lock.lock().await;
            self.run_turn(session_id, raw_text).await
        };
        self.release_session_lock(session_id, lock).await;
        result
    }

    async fn run_turn(
        &self,
        session_id: &str,
        raw_text: &str,
    ) -> Result<AggregatedResponse, EngineError> {
        let snapshot = self.memory.snapshot(session_id).await?;
        let state = ConversationState::derive(&snapshot.entries);
        let classification = self.router.classify(raw_text, &state);
        let plan = self.planner.plan(&classification, &state, session_id)?;

        let ctx = SessionContext::new(
            session_id,
            snapshot.next_turn_index,
            raw_text,
            classification.intent_list(),
        )
        .with_entities(named_entities(&classification));

        let response = self.orchestrator.execute(plan, &ctx).await;
        debug!(
            "Turn {} of session {} answered with status {:?}",
            ctx.turn_index(),
            session_id,
            response.status
        );
        Ok(response)
    }

    /// Classify and plan without executing or recording anything
    pub async fn preview(
        &self,
        session_id: &str,
        raw_text: &str,
    ) -> Result<(Classification, Plan), EngineError> {
        check_session_id(session_id)?;

        let snapshot = self.memory.snapshot(session_id).await?;
        let state = ConversationState::derive(&snapshot.entries);
        let classification = self.router.classify(raw_text, &state);
        let plan = self.planner.plan(&classification, &state, session_id)?;
        Ok((classification, plan))
    }

    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, EngineError> {
        check_session_id(session_id)?;
        self.memory.entries(session_id, limit).await
    }

    /// End a session. Waits for an in-flight turn of that session to finish.
    pub async fn forget(&self, session_id: &str) -> Result<bool, EngineError> {
        check_session_id(session_id)?;

        let lock = self.session_lock(session_id).await;
        let result = {
            let _turn = lock.lock().await;
            self.memory.forget(session_id).await
        };
        self.release_session_lock(session_id, lock).await;

        let existed = result?;
        info!("Forgot session {} (existed: {})", session_id, existed);
        Ok(existed)
    }

    /// Bookmark a property for later turns
    ///
    /// Returns `false` when it was already saved.
    pub async fn save_property(
        &self,
        session_id: &str,
        property_id: &str,
    ) -> Result<bool, EngineError> {
        check_session_id(session_id)?;
        let property_id = property_id.trim();
        if property_id.is_empty() {
            return Err(EngineError::missing(keys::PROPERTY_ID));
        }

        let mut facts = BTreeMap::new();
        facts.insert(keys::PROPERTY_ID.to_string(), json!(property_id));
        let content = format!("saved property {}", property_id);

        self.record(session_id, EntryKind::SavedProperty, content, facts, |state| {
            !state.is_saved(property_id)
        })
        .await
    }

    /// Saved property ids, oldest first
    pub async fn saved_properties(&self, session_id: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.state(session_id).await?.saved_properties)
    }

    /// Record a preference; the newest value of a name wins
    ///
    /// A renovation tier preference must name a known tier and is stored in
    /// its canonical spelling.
    pub async fn set_preference(
        &self,
        session_id: &str,
        name: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        check_session_id(session_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::missing("preference"));
        }

        let value = if name == preference::RENOVATION_TIER {
            let tier = value
                .as_str()
                .map(|t| t.trim().to_lowercase().replace([' ', '-'], "_"))
                .and_then(|t| RenovationTier::parse(&t))
                .ok_or_else(|| EngineError::missing(preference::RENOVATION_TIER))?;
            json!(tier.as_str())
        } else {
            value
        };

        let content = format!("preference {} = {}", name, value);
        let mut facts = BTreeMap::new();
        facts.insert(name.to_string(), value);

        self.record(session_id, EntryKind::Preference, content, facts, |_| true)
            .await
            .map(|_| ())
    }

    pub async fn preferences(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, Value>, EngineError> {
        Ok(self.state(session_id).await?.preferences)
    }

    async fn state(&self, session_id: &str) -> Result<ConversationState, EngineError> {
        check_session_id(session_id)?;
        let snapshot = self.memory.snapshot(session_id).await?;
        Ok(ConversationState::derive(&snapshot.entries))
    }

    /// Append a non-turn entry under the session lock when `wanted` agrees
    async fn record(
        &self,
        session_id: &str,
        kind: EntryKind,
        content: String,
        facts: BTreeMap<String, Value>,
        wanted: impl FnOnce(&ConversationState) -> bool,
    ) -> Result<bool, EngineError> {
        let lock = self.session_lock(session_id).await;
        let result = {
            let _turn = lock.lock().await;
            self.append_record(session_id, kind, content, facts, wanted)
                .await
        };
        self.release_session_lock(session_id, lock).await;
        result
    }

    async fn append_record(
        &self,
        session_id: &str,
        kind: EntryKind,
        content: String,
        facts: BTreeMap<String, Value>,
        wanted: impl FnOnce(&ConversationState) -> bool,
    ) -> Result<bool, EngineError> {
        let snapshot = self.memory.snapshot(session_id).await?;
        if !wanted(&ConversationState::derive(&snapshot.entries)) {
            return Ok(false);
        }

        let entry =
            MemoryEntry::user_record(session_id, snapshot.next_turn_index, kind, content, facts);
        self.memory.append(entry).await?;
        debug!(
            "Recorded {} entry {} for session {}",
            kind.as_str(),
            snapshot.next_turn_index,
            session_id
        );
        Ok(true)
    }
}

fn check_session_id(session_id: &str) -> Result<(), EngineError> {
    if session_id.trim().is_empty() {
        return Err(EngineError::SessionNotFound(
            "session id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Entities of this query worth carrying into later turns
///
/// A tier is only carried from a turn that asked for a renovation estimate.
fn named_entities(classification: &Classification) -> BTreeMap<String, Value> {
    let facts = &classification.facts;
    let mut entities = BTreeMap::new();

    match facts.locations.as_slice() {
        [] => {}
        [single] => {
            entities.insert(entity::LOCATION.to_string(), json!(single.name));
        }
        many => {
            let names: Vec<&str> = many.iter().map(|l| l.name.as_str()).collect();
            entities.insert(entity::LOCATION.to_string(), json!(names));
        }
    }
    if let Some(bedrooms) = &facts.bedrooms {
        entities.insert(entity::BEDROOMS.to_string(), json!(bedrooms));
    }
    if let Some(kind) = &facts.property_type {
        entities.insert(entity::PROPERTY_TYPE.to_string(), json!(kind));
    }
    if let Some(tier) = facts
        .tier
        .filter(|_| classification.has(Intent::RenovationEstimate))
    {
        entities.insert(entity::TIER.to_string(), json!(tier.as_str()));
    }
    if let Some(report_type) = facts.report_type {
        entities.insert(entity::REPORT_TYPE.to_string(), json!(report_type.as_str()));
    }
    if let Some(size) = facts.square_feet {
        entities.insert(entity::SQUARE_FEET.to_string(), json!(size));
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use crate::conductor::extract::{Evidence, LocationFact, QueryFacts};
    use crate::conductor::memory::{InMemoryStore, MemoryLimits};
    use crate::conductor::router::DetectedIntent;

    fn location(name: &str) -> LocationFact {
        LocationFact {
            name: name.to_string(),
            evidence: Evidence {
                keyword: name.to_string(),
                start: 0,
                end: name.len(),
            },
        }
    }

    fn classified(intent: Intent, facts: QueryFacts) -> Classification {
        Classification {
            raw_text: String::new(),
            intents: vec![DetectedIntent {
                intent,
                evidence: Vec::new(),
            }],
            facts,
            ambiguous: false,
        }
    }

    fn assistant() -> Assistant {
        let config = Config::default();
        let registry = Arc::new(AgentRegistry::new(
            &config,
            Arc::new(JsonCatalog::from_records(Vec::new())),
            None,
        ));
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(MemoryLimits::default()));
        Assistant::new(&config, registry, memory).unwrap()
    }

    #[test]
    fn test_named_entities() {
        let facts = QueryFacts {
            locations: vec![location("Pune")],
            tier: Some(RenovationTier::HighEnd),
            square_feet: Some(900.0),
            ..Default::default()
        };

        let entities = named_entities(&classified(Intent::RenovationEstimate, facts));
        assert_eq!(entities[entity::LOCATION], json!("Pune"));
        assert_eq!(entities[entity::TIER], json!("high_end"));
        assert_eq!(entities[entity::SQUARE_FEET], json!(900.0));
        assert!(!entities.contains_key(entity::BEDROOMS));

        let two = QueryFacts {
            locations: vec![location("Pune"), location("Delhi")],
            ..Default::default()
        };
        let entities = named_entities(&classified(Intent::StructuredFilter, two));
        assert_eq!(entities[entity::LOCATION], json!(["Pune", "Delhi"]));
    }

    #[test]
    fn test_tier_needs_renovation_intent() {
        let facts = QueryFacts {
            locations: vec![location("Pune")],
            tier: Some(RenovationTier::Luxury),
            ..Default::default()
        };

        let entities = named_entities(&classified(Intent::StructuredFilter, facts));
        assert!(!entities.contains_key(entity::TIER));
        assert_eq!(entities[entity::LOCATION], json!("Pune"));
    }

    #[tokio::test]
    async fn test_session_locks_are_released_after_turns() {
        let assistant = Arc::new(assistant());

        let turns = (0..16).map(|i| {
            let assistant = Arc::clone(&assistant);
            async move {
                let session = format!("s-{}", i % 4);
                assistant.handle(&session, "renovation for 900 sq ft").await
            }
        });
        for result in futures::future::join_all(turns).await {
            assert!(result.is_ok());
        }
        assert_eq!(assistant.lock_count().await, 0);

        assistant.save_property("s-0", "p1").await.unwrap();
        assistant.forget("s-1").await.unwrap();
        assert!(assistant.handle("", "hello").await.is_err());
        assert_eq!(assistant.lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_saved_properties_dedupe() {
        let assistant = assistant();
        assert!(assistant.save_property("s", "p1").await.unwrap());
        assert!(assistant.save_property("s", " p2 ").await.unwrap());
        assert!(!assistant.save_property("s", "p1").await.unwrap());
        assert_eq!(assistant.saved_properties("s").await.unwrap(), vec!["p1", "p2"]);
        assert!(assistant.save_property("s", "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_tier_preference_is_canonical() {
        let assistant = assistant();
        assistant
            .set_preference("s", preference::RENOVATION_TIER, json!("High End"))
            .await
            .unwrap();
        assert!(assistant
            .set_preference("s", preference::RENOVATION_TIER, json!("gold"))
            .await
            .is_err());

        let prefs = assistant.preferences("s").await.unwrap();
        assert_eq!(prefs[preference::RENOVATION_TIER], json!("high_end"));
    }

    #[test]
    fn test_blank_session_rejected() {
        assert!(check_session_id("  ").is_err());
        assert!(check_session_id("s-1").is_ok());
    }
}
