//! Similarity memory of resolved incidents.
//!
//! Successful resolutions are recorded as short summaries; the analyzer later
//! searches them for cases resembling a new event. Ranking is a token-set
//! cosine score over lowercase alphanumeric words, newest first on ties.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::Pool;

/// Summaries present in a freshly created memory.
pub const SEED_SUMMARIES: [&str; 4] = [
    "High CPU on service fixed by killing runaway process and restarting service",
    "Service down after deploy fixed by rollback",
    "API latency due to DB lock mitigated by clearing long-running queries",
    "Disk almost full mitigated by log rotation and cleanup",
];

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIncident {
    pub text: String,
    pub metadata: Value,
    pub score: f64,
}

/// Search/record contract consumed by analyzers and the orchestrator.
#[async_trait]
pub trait IncidentMemory: Send + Sync {
    /// Up to `k` records most similar to `query`, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarIncident>>;

    /// Remember a resolved incident.
    async fn record(&self, summary: &str, metadata: Value) -> Result<()>;
}

/// Incident memory persisted in SQLite.
#[derive(Clone)]
pub struct SqliteMemory {
    pool: Pool,
}

impl SqliteMemory {
    /// Open the database at `path`, seeding it on first use.
    pub fn open(path: &Path) -> Result<Self> {
        let pool = super::open_pool(path)?;
        let memory = Self { pool };
        memory.seed_if_empty()?;
        Ok(memory)
    }

    fn seed_if_empty(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incident_memory", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        for summary in SEED_SUMMARIES {
            conn.execute(
                "INSERT INTO incident_memory (summary, metadata_json, created_at) VALUES (?1, ?2, ?3)",
                params![summary, r#"{"seed":true}"#, now],
            )?;
        }
        info!(seeds = SEED_SUMMARIES.len(), "seeded incident memory");
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incident_memory", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl IncidentMemory for SqliteMemory {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarIncident>> {
        let pool = self.pool.clone();
        let query = query.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<SimilarIncident>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT summary, metadata_json FROM incident_memory ORDER BY id DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

            let query_tokens = tokenize(&query);
            let mut hits = Vec::new();
            for r in rows {
                let (summary, metadata_json) = r?;
                let score = similarity(&query_tokens, &tokenize(&summary));
                if score <= 0.0 {
                    continue;
                }
                let metadata = serde_json::from_str(&metadata_json).unwrap_or(Value::Null);
                hits.push(SimilarIncident {
                    text: summary,
                    metadata,
                    score,
                });
            }

            // Stable sort keeps newest-first order among equal scores.
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(k);
            Ok(hits)
        })
        .await
        .context("memory search task panicked")?
    }

    async fn record(&self, summary: &str, metadata: Value) -> Result<()> {
        let pool = self.pool.clone();
        let summary = summary.to_string();
        let metadata_json = serde_json::to_string(&metadata)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO incident_memory (summary, metadata_json, created_at) VALUES (?1, ?2, ?3)",
                params![summary, metadata_json, Utc::now().to_rfc3339()],
            )
            .context("failed to record incident memory")?;
            debug!(%summary, "incident recorded in memory");
            Ok(())
        })
        .await
        .context("memory record task panicked")?
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Cosine similarity of two token sets.
fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / ((a.len() as f64) * (b.len() as f64)).sqrt()
}
