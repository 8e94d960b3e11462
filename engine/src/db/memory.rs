//! SQLite Session Memory
//!
//! Durable `MemoryStore`. Entries live in `memory_entries` keyed by
//! `(session_id, turn_index)` and tagged with their kind; archived plans are
//! JSON rows in `session_plans`, trimmed to the retention limit on every
//! archive.

use crate::conductor::memory::{
    check_append, AppendOutcome, EntryKind, MemoryEntry, MemoryLimits, MemoryStore, Role,
    SessionSnapshot,
};
use crate::conductor::types::Plan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

fn db_error(action: &'static str) -> impl FnOnce(sqlx::Error) -> EngineError {
    move |e| EngineError::Database(format!("Failed to {}: {}", action, e))
}

fn to_i64(value: u64) -> Result<i64, EngineError> {
    i64::try_from(value).map_err(|_| EngineError::Database(format!("turn index {} out of range", value)))
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_entry(row: &SqliteRow) -> Result<MemoryEntry, EngineError> {
    let kind: String = row.get("kind");
    let role: String = row.get("role");
    let entities: String = row.get("extracted_entities");
    let recorded_at: String = row.get("recorded_at");
    let turn_index: i64 = row.get("turn_index");

    Ok(MemoryEntry {
        session_id: row.get("session_id"),
        turn_index: u64::try_from(turn_index)
            .map_err(|_| EngineError::Database(format!("negative turn index {}", turn_index)))?,
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| EngineError::Database(format!("unknown entry kind '{}'", kind)))?,
        role: Role::parse(&role)
            .ok_or_else(|| EngineError::Database(format!("unknown role '{}'", role)))?,
        content: row.get("content"),
        extracted_entities: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&entities)?,
        referenced_plan_id: row.get("referenced_plan_id"),
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| EngineError::Database(format!("bad timestamp '{}': {}", recorded_at, e)))?
            .with_timezone(&Utc),
    })
}

/// Repository over the memory tables
pub struct SqliteMemoryStore {
    pool: SqlitePool,
    limits: MemoryLimits,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool, limits: MemoryLimits) -> Self {
        Self { pool, limits }
    }

    async fn last_entries(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, turn_index, kind, role, content, extracted_entities,
                   referenced_plan_id, recorded_at
            FROM memory_entries
            WHERE session_id = ?
            ORDER BY turn_index DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit.map_or(-1, limit_i64))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load memory entries"))?;

        let mut entries = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, turn_index, kind, role, content, extracted_entities,
                   referenced_plan_id, recorded_at
            FROM memory_entries
            WHERE session_id = ?1
              AND (kind != 'turn' OR turn_index IN (
                  SELECT turn_index FROM memory_entries
                  WHERE session_id = ?1 AND kind = 'turn'
                  ORDER BY turn_index DESC
                  LIMIT ?2
              ))
            ORDER BY turn_index ASC
            "#,
        )
        .bind(session_id)
        .bind(limit_i64(self.limits.history_window))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load session snapshot"))?;

        let entries = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(turn_index) FROM memory_entries WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("read last turn"))?;

        let next_turn_index = last
            .and_then(|t| u64::try_from(t).ok())
            .map_or(1, |t| t + 1);

        Ok(SessionSnapshot {
            session_id: session_id.to_string(),
            entries,
            next_turn_index,
        })
    }

    async fn append(&self, entry: MemoryEntry) -> Result<AppendOutcome, EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin append"))?;

        let last_row = sqlx::query(
            r#"
            SELECT session_id, turn_index, kind, role, content, extracted_entities,
                   referenced_plan_id, recorded_at
            FROM memory_entries
            WHERE session_id = ?
            ORDER BY turn_index DESC
            LIMIT 1
            "#,
        )
        .bind(&entry.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("read last entry"))?;

        let last = last_row.as_ref().map(row_to_entry).transpose()?;
        if let Some(outcome) = check_append(last.as_ref(), &entry)? {
            return Ok(outcome);
        }

        let entities = serde_json::to_string(&entry.extracted_entities)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO memory_entries
                (session_id, turn_index, kind, role, content, extracted_entities,
                 referenced_plan_id, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.session_id)
        .bind(to_i64(entry.turn_index)?)
        .bind(entry.kind.as_str())
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(entities)
        .bind(&entry.referenced_plan_id)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // Another writer took this turn between our read and insert
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(EngineError::MemoryConflict {
                    session_id: entry.session_id.clone(),
                    reason: format!("turn {} already recorded", entry.turn_index),
                });
            }
            Err(e) => return Err(db_error("insert memory entry")(e)),
        }

        tx.commit().await.map_err(db_error("commit append"))?;
        debug!(
            "Stored {} {} for session {}",
            entry.kind.as_str(),
            entry.turn_index,
            entry.session_id
        );
        Ok(AppendOutcome::Recorded)
    }

    async fn entries(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, EngineError> {
        self.last_entries(session_id, limit).await
    }

    async fn archive_plan(&self, plan: &Plan) -> Result<(), EngineError> {
        let body = serde_json::to_string(plan)?;
        let mut tx = self.pool.begin().await.map_err(db_error("begin archive"))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO session_plans (session_id, plan_id, position, plan)
            VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM session_plans WHERE session_id = ?1),
                ?3
            )
            "#,
        )
        .bind(&plan.session_id)
        .bind(&plan.plan_id)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(db_error("archive plan"))?;

        sqlx::query(
            r#"
            DELETE FROM session_plans
            WHERE session_id = ?1
              AND plan_id NOT IN (
                  SELECT plan_id FROM session_plans
                  WHERE session_id = ?1
                  ORDER BY position DESC
                  LIMIT ?2
              )
            "#,
        )
        .bind(&plan.session_id)
        .bind(limit_i64(self.limits.max_retained_plans))
        .execute(&mut *tx)
        .await
        .map_err(db_error("trim archived plans"))?;

        tx.commit().await.map_err(db_error("commit archive"))?;
        Ok(())
    }

    async fn plan(&self, session_id: &str, plan_id: &str) -> Result<Option<Plan>, EngineError> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT plan FROM session_plans WHERE session_id = ? AND plan_id = ?",
        )
        .bind(session_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load plan"))?;

        body.map(|b| serde_json::from_str(&b).map_err(EngineError::from))
            .transpose()
    }

    async fn forget(&self, session_id: &str) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin forget"))?;

        let entries = sqlx::query("DELETE FROM memory_entries WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("delete memory entries"))?
            .rows_affected();

        let plans = sqlx::query("DELETE FROM session_plans WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("delete archived plans"))?
            .rows_affected();

        tx.commit().await.map_err(db_error("commit forget"))?;
        Ok(entries + plans > 0)
    }
}
