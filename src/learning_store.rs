//! The Learning Store collaborator: persistence for learned suppression and
//! pattern records, plus a concrete sqlite-backed implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewError};

/// One persisted learning record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fact_args: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// External persistence for learned patterns and suppression rules.
///
/// Only the interface is specified here; [`SqliteLearningStore`] is the one
/// concrete adapter this crate ships, but callers may supply any
/// implementation (e.g. an in-memory test double).
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn save(
        &self,
        namespace: &str,
        predicate: &str,
        args: &[String],
        note: Option<&str>,
    ) -> Result<()>;

    async fn load_by_predicate(&self, namespace: &str, predicate: &str) -> Result<Vec<Record>>;

    async fn decay_confidence(&self, namespace: &str, factor: f64) -> Result<()>;
}

/// sqlite-backed implementation, keyed by `(namespace, predicate,
/// normalized_key)` where `normalized_key` is `fact_args.join("\u{1f}")`.
pub struct SqliteLearningStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS learning_records (
    namespace TEXT NOT NULL,
    predicate TEXT NOT NULL,
    normalized_key TEXT NOT NULL,
    fact_args TEXT NOT NULL,
    confidence REAL NOT NULL,
    note TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (namespace, predicate, normalized_key)
);";

impl SqliteLearningStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| ReviewError::LearningStore(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ReviewError::LearningStore(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| ReviewError::LearningStore(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ReviewError::LearningStore(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ReviewError::Internal(format!("failed to lock connection: {e}")))?;
        f(&conn).map_err(|e| ReviewError::LearningStore(e.to_string()))
    }
}

#[async_trait]
impl LearningStore for SqliteLearningStore {
    async fn save(
        &self,
        namespace: &str,
        predicate: &str,
        args: &[String],
        note: Option<&str>,
    ) -> Result<()> {
        let key = args.join("\u{1f}");
        let fact_args = serde_json::to_string(args)?;
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO learning_records (namespace, predicate, normalized_key, fact_args, confidence, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0.1, ?5, ?6)
                 ON CONFLICT(namespace, predicate, normalized_key)
                 DO UPDATE SET confidence = MIN(1.0, confidence + 0.1), note = excluded.note, created_at = excluded.created_at",
                params![namespace, predicate, key, fact_args, note, now],
            )?;
            Ok(())
        })
    }

    async fn load_by_predicate(&self, namespace: &str, predicate: &str) -> Result<Vec<Record>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT fact_args, confidence, created_at FROM learning_records
                 WHERE namespace = ?1 AND predicate = ?2",
            )?;
            let rows = stmt.query_map(params![namespace, predicate], |row| {
                let fact_args: String = row.get(0)?;
                let confidence: f64 = row.get(1)?;
                let created_at: String = row.get(2)?;
                Ok((fact_args, confidence, created_at))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (fact_args, confidence, created_at) = row?;
                let fact_args: Vec<String> = serde_json::from_str(&fact_args).unwrap_or_default();
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                records.push(Record {
                    fact_args,
                    confidence,
                    created_at,
                });
            }
            Ok(records)
        })
    }

    async fn decay_confidence(&self, namespace: &str, factor: f64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE learning_records SET confidence = confidence * ?1 WHERE namespace = ?2",
                params![factor, namespace],
            )?;
            Ok(())
        })
    }
}

/// Look up a single record by its exact argument tuple, if present.
pub async fn find_record(
    store: &dyn LearningStore,
    namespace: &str,
    predicate: &str,
    args: &[String],
) -> Result<Option<Record>> {
    let records = store.load_by_predicate(namespace, predicate).await?;
    Ok(records.into_iter().find(|r| r.fact_args == args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store = SqliteLearningStore::in_memory().unwrap();
        store
            .save("suppression", "flagged_pattern", &["a.go".into(), "nil deref".into()], None)
            .await
            .unwrap();
        let records = store.load_by_predicate("suppression", "flagged_pattern").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fact_args, vec!["a.go", "nil deref"]);
    }

    #[tokio::test]
    async fn repeated_save_increases_confidence_without_duplicating() {
        let store = SqliteLearningStore::in_memory().unwrap();
        let expected = [0.1, 0.2, 0.3];
        for expected_confidence in expected {
            store
                .save("suppression", "flagged_pattern", &["x".into()], None)
                .await
                .unwrap();
            let records = store.load_by_predicate("suppression", "flagged_pattern").await.unwrap();
            assert_eq!(records.len(), 1);
            assert!((records[0].confidence - expected_confidence).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn decay_confidence_scales_all_records_in_namespace() {
        let store = SqliteLearningStore::in_memory().unwrap();
        store.save("ns", "p", &["a".into()], None).await.unwrap();
        store.decay_confidence("ns", 0.5).await.unwrap();
        let records = store.load_by_predicate("ns", "p").await.unwrap();
        assert!(records[0].confidence <= 0.5 + 1e-9);
    }
}
