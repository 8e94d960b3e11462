//! JSON property catalog
//!
//! A `RelationalStore` over a JSON array of property records, used by the
//! CLI and tests when no database collaborator is wired in.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::collaborators::RelationalStore;
use sdk::errors::EngineError;
use sdk::types::{FilterDescriptor, PropertyRecord};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub struct JsonCatalog {
    records: Vec<PropertyRecord>,
    index: HashMap<String, usize>,
}

impl JsonCatalog {
    /// Build from records; a later duplicate id replaces the earlier record
    pub fn from_records(records: Vec<PropertyRecord>) -> Self {
        let mut deduped: Vec<PropertyRecord> = Vec::with_capacity(records.len());
        let mut index = HashMap::new();

        for record in records {
            match index.get(&record.property_id) {
                Some(&pos) => deduped[pos] = record,
                None => {
                    index.insert(record.property_id.clone(), deduped.len());
                    deduped.push(record);
                }
            }
        }

        Self {
            records: deduped,
            index,
        }
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let records: Vec<PropertyRecord> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;

        info!("Loaded {} properties from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RelationalStore for JsonCatalog {
    fn name(&self) -> &str {
        "json_catalog"
    }

    async fn query(&self, filter: &FilterDescriptor) -> Result<Vec<PropertyRecord>, EngineError> {
        let mut matched: Vec<PropertyRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.property_id.cmp(&b.property_id));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn fetch(&self, property_ids: &[String]) -> Result<Vec<PropertyRecord>, EngineError> {
        Ok(property_ids
            .iter()
            .filter_map(|id| self.index.get(id))
            .map(|&pos| self.records[pos].clone())
            .collect())
    }
}
