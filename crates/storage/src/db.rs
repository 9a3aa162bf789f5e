use chrono::{DateTime, Utc};
use ledgerfill_core::{parse_timestamp, RuleSet};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use crate::store::{RuleSetId, RuleSetSummary, StoreError};

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_sets (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            total_rule_count INTEGER NOT NULL,
            payload TEXT NOT NULL,
            saved_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rule_sets_created_at ON rule_sets (created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Fixed-width UTC text so `ORDER BY created_at` is chronological.
fn sortable(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Inserts a new rule set. An existing id is never replaced.
pub async fn save_rule_set(pool: &DbPool, rule_set: &RuleSet) -> Result<RuleSetId, StoreError> {
    let payload = serde_json::to_string_pretty(rule_set)?;
    let id = RuleSetId::new(rule_set.creation_timestamp, payload.as_bytes());

    let result = sqlx::query(
        "INSERT INTO rule_sets (id, created_at, total_rule_count, payload) VALUES (?, ?, ?, ?)",
    )
    .bind(id.as_str())
    .bind(sortable(rule_set.creation_timestamp))
    .bind(rule_set.total_rule_count as i64)
    .bind(&payload)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            tracing::info!(id = %id, rules = rule_set.len(), "Rule set stored in database");
            Ok(id)
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(StoreError::AlreadyExists(id))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn load_rule_set(pool: &DbPool, id: &RuleSetId) -> Result<RuleSet, StoreError> {
    let payload = sqlx::query_as::<_, (String,)>("SELECT payload FROM rule_sets WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    Ok(RuleSet::from_json(&payload.0)?)
}

/// Most recently created rule set that still decodes.
pub async fn load_latest_rule_set(pool: &DbPool) -> Result<RuleSet, StoreError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT id, payload FROM rule_sets ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;

    for (id, payload) in rows {
        match RuleSet::from_json(&payload) {
            Ok(set) => return Ok(set),
            Err(e) => tracing::warn!(id = %id, "Skipping unreadable rule set: {e}"),
        }
    }
    Err(StoreError::NotFound("rule_sets table".to_string()))
}

/// Stored rule sets, oldest first.
pub async fn list_rule_sets(pool: &DbPool) -> Result<Vec<RuleSetSummary>, StoreError> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        "SELECT id, created_at, total_rule_count FROM rule_sets ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for (id, created_at, count) in rows {
        let Some(creation_timestamp) = parse_timestamp(&created_at) else {
            tracing::warn!(id = %id, "Skipping row with bad timestamp '{created_at}'");
            continue;
        };
        summaries.push(RuleSetSummary {
            id: RuleSetId::parse(&id)?,
            creation_timestamp,
            total_rule_count: usize::try_from(count).unwrap_or(0),
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledgerfill_core::{Rule, RuleKind};
    use std::collections::BTreeMap;

    fn rule_set(hour: u32, pattern: &str) -> RuleSet {
        let rule = Rule {
            pattern: pattern.to_string(),
            context: None,
            support: 4,
            priority: 2,
            rule_type: RuleKind::HybridFill,
            fixed_columns: BTreeMap::from([("Nature".to_string(), "Import".to_string())]),
            variable_columns: BTreeMap::new(),
            global_confidence: 0.9,
        };
        RuleSet::new(vec![rule], Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("rules.db")).await.unwrap();

        let err = load_latest_rule_set(&pool).await.unwrap_err();
        assert!(err.is_not_found());

        save_rule_set(&pool, &rule_set(14, "later")).await.unwrap();
        let first = save_rule_set(&pool, &rule_set(9, "earlier")).await.unwrap();

        let latest = load_latest_rule_set(&pool).await.unwrap();
        assert_eq!(latest, rule_set(14, "later"));
        assert_eq!(load_rule_set(&pool, &first).await.unwrap(), rule_set(9, "earlier"));

        let listed = list_rule_sets(&pool).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first);
        assert_eq!(listed[1].total_rule_count, 1);
    }

    #[tokio::test]
    async fn duplicate_save_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("rules.db")).await.unwrap();
        let set = rule_set(9, "advicepro");
        save_rule_set(&pool, &set).await.unwrap();
        assert!(matches!(
            save_rule_set(&pool, &set).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
