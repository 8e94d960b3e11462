//! Conversation State
//!
//! Derived, recomputable view over a session's memory entries. The router and
//! planner read it to resolve references such as "those properties" or "the
//! last estimate". It is rebuilt from a snapshot for every turn and never
//! mutated in place.

use crate::conductor::memory::{EntryKind, MemoryEntry};
use sdk::types::{FilterDescriptor, RenovationEstimate, ReportDescriptor, SearchResult};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

/// Keys used in `MemoryEntry::extracted_entities`
pub mod keys {
    pub const QUERY: &str = "query";
    pub const INTENTS: &str = "intents";
    pub const STATUS: &str = "status";
    pub const SEARCH: &str = "search";
    pub const FILTER: &str = "filter";
    pub const ESTIMATE: &str = "estimate";
    pub const REPORT: &str = "report";
    pub const STATISTICS: &str = "statistics";
    pub const ENTITIES: &str = "entities";
    pub const TIER_COMPARISON: &str = "tier_comparison";
    /// Id recorded by a saved-property entry
    pub const PROPERTY_ID: &str = "property_id";
}

/// Named entities carried across turns
pub mod entity {
    pub const LOCATION: &str = "location";
    pub const BEDROOMS: &str = "bedrooms";
    pub const PROPERTY_TYPE: &str = "property_type";
    pub const TIER: &str = "tier";
    pub const REPORT_TYPE: &str = "report_type";
    pub const SQUARE_FEET: &str = "square_feet";
}

/// Preference names the planner reads
pub mod preference {
    /// Tier used when a renovation query names none
    pub const RENOVATION_TIER: &str = "renovation_tier";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub last_search: Option<SearchResult>,
    pub last_filter: Option<FilterDescriptor>,
    pub last_estimate: Option<RenovationEstimate>,
    pub last_report: Option<ReportDescriptor>,
    pub last_plan_id: Option<String>,
    /// Named entities, newest mention wins
    pub entities: BTreeMap<String, serde_json::Value>,
    /// Saved property ids, oldest first, each once
    pub saved_properties: Vec<String>,
    /// User preferences, newest value wins
    pub preferences: BTreeMap<String, serde_json::Value>,
    pub turns: usize,
}

impl ConversationState {
    /// Rebuild state from entries ordered oldest first
    pub fn derive(entries: &[MemoryEntry]) -> Self {
        let mut state = Self::default();

        for entry in entries {
            let facts = &entry.extracted_entities;

            match entry.kind {
                EntryKind::Turn => {}
                EntryKind::SavedProperty => {
                    if let Some(id) = facts.get(keys::PROPERTY_ID).and_then(|v| v.as_str()) {
                        if !state.saved_properties.iter().any(|s| s == id) {
                            state.saved_properties.push(id.to_string());
                        }
                    }
                    continue;
                }
                EntryKind::Preference => {
                    for (k, v) in facts {
                        state.preferences.insert(k.clone(), v.clone());
                    }
                    continue;
                }
            }

            state.turns += 1;

            if let Some(search) = read::<SearchResult>(facts, keys::SEARCH) {
                state.last_search = Some(search);
            }
            if let Some(filter) = read::<FilterDescriptor>(facts, keys::FILTER) {
                state.last_filter = Some(filter);
            }
            if let Some(estimate) = read::<RenovationEstimate>(facts, keys::ESTIMATE) {
                state.last_estimate = Some(estimate);
            }
            if let Some(report) = read::<ReportDescriptor>(facts, keys::REPORT) {
                state.last_report = Some(report);
            }
            if entry.referenced_plan_id.is_some() {
                state.last_plan_id = entry.referenced_plan_id.clone();
            }
            if let Some(serde_json::Value::Object(named)) = facts.get(keys::ENTITIES) {
                for (k, v) in named {
                    if !v.is_null() {
                        state.entities.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        debug!(
            "Derived conversation state from {} turns (search: {}, estimate: {})",
            state.turns,
            state.last_search.is_some(),
            state.last_estimate.is_some()
        );

        state
    }

    /// Whether an earlier turn produced a search to refer back to
    pub fn has_prior_search(&self) -> bool {
        self.last_search.is_some()
    }

    /// Property ids of the most recent search
    pub fn last_property_ids(&self) -> Option<Vec<String>> {
        self.last_search.as_ref().map(|s| s.property_ids())
    }

    /// Top-ranked property of the most recent search
    pub fn last_first_property(&self) -> Option<String> {
        self.last_search
            .as_ref()
            .and_then(|s| s.first())
            .map(|r| r.property_id.clone())
    }

    pub fn entity_str(&self, name: &str) -> Option<&str> {
        self.entities.get(name).and_then(|v| v.as_str())
    }

    pub fn preference_str(&self, name: &str) -> Option<&str> {
        self.preferences.get(name).and_then(|v| v.as_str())
    }

    pub fn is_saved(&self, property_id: &str) -> bool {
        self.saved_properties.iter().any(|s| s == property_id)
    }
}

fn read<T: DeserializeOwned>(
    facts: &BTreeMap<String, serde_json::Value>,
    key: &str,
) -> Option<T> {
    facts
        .get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
