//! Command handlers for CLI operations
//!
//! Each handler wires the configured collaborators into an `Assistant`, runs
//! one command and prints the outcome as text or JSON.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agents::AgentRegistry;
use crate::catalog::JsonCatalog;
use crate::collaborators::{HttpVectorIndex, JsonFileRenderer};
use crate::conductor::memory::{InMemoryStore, MemoryLimits, MemoryStore};
use crate::conductor::context::keys;
use crate::conductor::{AggregatedResponse, Assistant, ConversationState};
use crate::config::{Config, MemoryBackend};
use crate::db::Database;
use sdk::collaborators::{ReportRenderer, VectorIndex};
use sdk::errors::EstateErrorExt;
use sdk::types::CostCategory;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Assistant plus the database it may hold open
struct Session {
    assistant: Assistant,
    database: Option<Database>,
}

impl Session {
    async fn close(self) -> Result<()> {
        if let Some(db) = self.database {
            db.close().await?;
        }
        Ok(())
    }
}

fn get_db_path(config: &Config) -> Result<PathBuf> {
    Ok(config.data_dir()?.join("estate.db"))
}

async fn open_memory(config: &Config) -> Result<(Arc<dyn MemoryStore>, Option<Database>)> {
    let limits = MemoryLimits::from(&config.memory);
    match config.memory.backend {
        MemoryBackend::Memory => Ok((Arc::new(InMemoryStore::new(limits)), None)),
        MemoryBackend::Sqlite => {
            let database = Database::new(&get_db_path(config)?)
                .await
                .context("Failed to open database")?;
            let store = database.memory(limits);
            Ok((Arc::new(store), Some(database)))
        }
    }
}

fn load_catalog(config: &Config, path: Option<&Path>) -> Result<JsonCatalog> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config.data_dir()?.join("catalog.json"),
    };

    if !path.exists() {
        tracing::warn!(
            "No catalog at {}; structured search will find nothing",
            path.display()
        );
        return Ok(JsonCatalog::from_records(Vec::new()));
    }
    JsonCatalog::load(&path)
}

async fn open_session(config: &Config, catalog: Option<&Path>) -> Result<Session> {
    let relational = Arc::new(load_catalog(config, catalog)?);

    let vector: Option<Arc<dyn VectorIndex>> = match &config.vector.endpoint {
        Some(endpoint) => Some(Arc::new(HttpVectorIndex::new(
            endpoint.clone(),
            config.orchestrator.collaborator_timeout(),
        )?)),
        None => None,
    };

    let registry = Arc::new(AgentRegistry::new(config, relational, vector));
    let (memory, database) = open_memory(config).await?;
    let assistant = Assistant::new(config, registry, memory)?;

    Ok(Session {
        assistant,
        database,
    })
}

fn format_price(value: f64) -> String {
    crate::agents::report::format_amount(value)
}

fn print_response(response: &AggregatedResponse) {
    println!(
        "Turn {} ({}) - {:?}",
        response.turn_index,
        response
            .intents
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        response.status
    );

    if let Some(search) = &response.search {
        println!();
        println!(
            "Properties ({} of {} considered, {:?}):",
            search.len(),
            search.total_considered(),
            search.source()
        );
        for r in search.results() {
            match r.score {
                Some(score) => println!("  {}  score {:.2}", r.property_id, score),
                None => println!("  {}", r.property_id),
            }
        }
    }

    if let Some(estimate) = &response.estimate {
        println!();
        println!(
            "Renovation estimate ({}, {:.0} sq ft at {:.0}/sq ft): {}",
            estimate.tier.as_str(),
            estimate.basis_square_feet,
            estimate.unit_cost_rate,
            format_price(estimate.computed_total)
        );
        for category in [CostCategory::Materials, CostCategory::Labor, CostCategory::Permits] {
            if let Some(amount) = estimate.breakdown.get(&category) {
                println!("  {:<10} {}", format!("{:?}", category), format_price(*amount));
            }
        }
    }

    if let Some(comparison) = &response.tier_comparison {
        println!();
        println!(
            "Renovation tiers for {:.0} sq ft:",
            comparison.basis_square_feet
        );
        for estimate in &comparison.estimates {
            println!(
                "  {:<9} {:>6.0}/sq ft  {}",
                estimate.tier.as_str(),
                estimate.unit_cost_rate,
                format_price(estimate.computed_total)
            );
        }
    }

    if let Some(stats) = &response.statistics {
        println!();
        println!("Statistics over {} properties:", stats.total_properties);
        println!("  Average price: {}", format_price(stats.average_price));
        println!(
            "  Range:         {} - {}",
            format_price(stats.min_price),
            format_price(stats.max_price)
        );
        if !stats.locations.is_empty() {
            println!("  Locations:     {}", stats.locations.join(", "));
        }
        for bucket in &stats.price_distribution {
            println!("  {:<10} {}", bucket.label, bucket.count);
        }
    }

    if let Some(report) = &response.report {
        println!();
        println!("Report: {}", report.title);
        for section in &report.sections {
            println!("  - {} ({:?})", section.section_title, section.section_kind);
        }
    }

    let warnings = response.warnings();
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("⚠ {}", warning);
        }
    }

    if let Some(summary) = &response.failure_summary {
        println!();
        println!("✗ {}", summary);
    }

    if !response.memory_recorded {
        println!("⚠ This turn could not be saved to session memory");
    }
}

/// Answer one query
pub async fn handle_ask(
    session_id: &str,
    query: &str,
    catalog: Option<&Path>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session = open_session(config, catalog).await?;

    let response = match session.assistant.handle(session_id, query).await {
        Ok(response) => response,
        Err(e) => {
            session.close().await?;
            return Err(anyhow::anyhow!("{} ({})", e, e.user_hint()));
        }
    };

    match format {
        OutputFormat::Text => print_response(&response),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
    }

    session.close().await
}

/// Show the classification and plan for a query
pub async fn handle_plan(
    session_id: &str,
    query: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session = open_session(config, None).await?;
    let (classification, plan) = session.assistant.preview(session_id, query).await?;

    match format {
        OutputFormat::Text => {
            println!("Query: {}", query);
            if classification.ambiguous {
                println!("(no intent recognised, using fallback)");
            }
            println!("Intents:");
            for detected in &classification.intents {
                let evidence: Vec<&str> = detected
                    .evidence
                    .iter()
                    .map(|e| e.keyword.as_str())
                    .collect();
                println!("  {} <- {}", detected.intent, evidence.join(", "));
            }
            println!();
            println!("Plan {}:", plan.plan_id);
            for task in &plan.tasks {
                if task.depends_on.is_empty() {
                    println!("  {} {}", task.task_id, task.agent_target);
                } else {
                    println!(
                        "  {} {} (after {})",
                        task.task_id,
                        task.agent_target,
                        task.depends_on.join(", ")
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "classification": classification,
                "plan": plan,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    session.close().await
}

/// Show recorded turns of a session
pub async fn handle_history(
    session_id: &str,
    limit: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let (memory, database) = open_memory(config).await?;
    let entries = memory.entries(session_id, limit).await?;

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No turns recorded for session {}", session_id);
            }
            for entry in &entries {
                println!(
                    "#{:<3} {}  {}",
                    entry.turn_index,
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.content
                );
                if let Some(query) = entry
                    .extracted_entities
                    .get(keys::QUERY)
                    .and_then(|q| q.as_str())
                {
                    println!("     \"{}\"", query);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
    }

    if let Some(db) = database {
        db.close().await?;
    }
    Ok(())
}

/// Drop a session's memory
pub async fn handle_forget(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let session = open_session(config, None).await?;
    let existed = session.assistant.forget(session_id).await?;

    match format {
        OutputFormat::Text => {
            if existed {
                println!("✓ Session {} forgotten", session_id);
            } else {
                println!("Session {} had no history", session_id);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "session": session_id, "forgotten": existed }))?
        ),
    }

    session.close().await
}

/// Add a property to a session's shortlist
pub async fn handle_save(
    session_id: &str,
    property_id: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session = open_session(config, None).await?;
    let added = session.assistant.save_property(session_id, property_id).await?;

    match format {
        OutputFormat::Text => {
            if added {
                println!("✓ Saved {}", property_id);
            } else {
                println!("{} was already saved", property_id);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "property_id": property_id, "added": added }))?
        ),
    }

    session.close().await
}

/// Show a session's saved properties and preferences
pub async fn handle_saved(session_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let session = open_session(config, None).await?;
    let saved = session.assistant.saved_properties(session_id).await?;
    let preferences = session.assistant.preferences(session_id).await?;

    match format {
        OutputFormat::Text => {
            if saved.is_empty() {
                println!("No saved properties");
            } else {
                println!("Saved properties:");
                for id in &saved {
                    println!("  {}", id);
                }
            }
            if !preferences.is_empty() {
                println!("Preferences:");
                for (name, value) in &preferences {
                    println!("  {} = {}", name, value);
                }
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "saved_properties": saved,
                "preferences": preferences,
            }))?
        ),
    }

    session.close().await
}

/// Record a session preference
pub async fn handle_prefer(
    session_id: &str,
    name: &str,
    value: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    // Plain words are taken as strings
    let value = serde_json::from_str(value).unwrap_or_else(|_| json!(value));

    let session = open_session(config, None).await?;
    let result = session
        .assistant
        .set_preference(session_id, name, value.clone())
        .await;
    if let Err(e) = result {
        session.close().await?;
        return Err(anyhow::anyhow!("{} ({})", e, e.user_hint()));
    }

    match format {
        OutputFormat::Text => println!("✓ {} = {}", name, value),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "name": name, "value": value }))?
        ),
    }

    session.close().await
}

/// Render the most recent report of a session
pub async fn handle_render(
    session_id: &str,
    out: &Path,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let (memory, database) = open_memory(config).await?;
    let entries = memory.entries(session_id, None).await?;
    if let Some(db) = database {
        db.close().await?;
    }

    let report = ConversationState::derive(&entries)
        .last_report
        .ok_or_else(|| anyhow::anyhow!("Session {} has no report to render", session_id))?;

    let artifact = JsonFileRenderer::new(out)
        .render(&report)
        .await
        .context("Failed to render report")?;

    match format {
        OutputFormat::Text => println!("✓ Wrote {} to {}", artifact.name, artifact.location),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&artifact)?),
    }
    Ok(())
}
