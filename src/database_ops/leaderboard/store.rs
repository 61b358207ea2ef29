use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sqlx::{postgres::PgRow, QueryBuilder, Row};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::{LeaderboardEntry, NftType, RefreshState, RefreshStatus, CACHE_KEY};
use crate::util::db::Db;

/// Change to the single status row. Timestamps left as `None` keep their stored
/// value; `error` always replaces `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: RefreshState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: RefreshState::Idle,
            started_at: None,
            completed_at: Some(at),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RefreshState::Error,
            started_at: None,
            completed_at: None,
            error: Some(message.into()),
        }
    }
}

/// Persistence for leaderboard rows and the refresh status row.
#[async_trait::async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Upsert one batch keyed by (collection_slug, token_id); last write wins.
    /// Callers must not pass the same key twice in one batch.
    async fn upsert_batch(&self, entries: &[LeaderboardEntry]) -> Result<()>;

    async fn set_status(&self, update: &StatusUpdate) -> Result<()>;

    /// Move the status row to `running` unless a run started after
    /// `stale_before` still holds it. Returns whether the claim succeeded.
    async fn try_claim_refresh(
        &self,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Rows ordered by points (highest first), then token id.
    async fn list_entries(&self, nft_type: Option<NftType>) -> Result<Vec<LeaderboardEntry>>;

    async fn get_status(&self) -> Result<Option<RefreshStatus>>;

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertReport {
    pub written: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

/// Write rows in batches of `batch_size`. Rows repeating a key keep only the
/// last occurrence. A failed batch is logged and skipped; later batches still run.
pub async fn upsert_entries(
    store: &dyn LeaderboardStore,
    entries: Vec<LeaderboardEntry>,
    batch_size: usize,
) -> UpsertReport {
    let mut unique: IndexMap<(String, String), LeaderboardEntry> =
        IndexMap::with_capacity(entries.len());
    for e in entries {
        let key = (e.collection_slug.clone(), e.token_id.clone());
        // shift_remove + insert moves a repeated key to its latest position
        unique.shift_remove(&key);
        unique.insert(key, e);
    }
    let rows: Vec<LeaderboardEntry> = unique.into_values().collect();

    let mut report = UpsertReport::default();
    for (idx, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        report.batches += 1;
        match store.upsert_batch(batch).await {
            Ok(()) => report.written += batch.len(),
            Err(err) => {
                report.failed_batches += 1;
                warn!(batch = idx, rows = batch.len(), error = %err, "leaderboard upsert batch failed; continuing");
            }
        }
    }
    report
}

fn sort_entries(rows: &mut [LeaderboardEntry]) {
    rows.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.token_id.cmp(&b.token_id))
    });
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: IndexMap<(String, String), LeaderboardEntry>,
    status: Option<RefreshStatus>,
}

/// In-process store with the same upsert and lease semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl LeaderboardStore for MemoryStore {
    async fn upsert_batch(&self, entries: &[LeaderboardEntry]) -> Result<()> {
        let mut state = self.state.lock().await;
        for e in entries {
            state.entries.insert(
                (e.collection_slug.clone(), e.token_id.clone()),
                e.clone(),
            );
        }
        Ok(())
    }

    async fn set_status(&self, update: &StatusUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.status.get_or_insert_with(RefreshStatus::default);
        current.status = update.status;
        if update.started_at.is_some() {
            current.last_started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            current.last_completed_at = update.completed_at;
        }
        current.last_error = update.error.clone();
        Ok(())
    }

    async fn try_claim_refresh(
        &self,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let current = state.status.get_or_insert_with(RefreshStatus::default);
        let held = current.status == RefreshState::Running
            && current
                .last_started_at
                .is_some_and(|started| started >= stale_before);
        if held {
            return Ok(false);
        }
        current.status = RefreshState::Running;
        current.last_started_at = Some(started_at);
        current.last_error = None;
        Ok(true)
    }

    async fn list_entries(&self, nft_type: Option<NftType>) -> Result<Vec<LeaderboardEntry>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LeaderboardEntry> = state
            .entries
            .values()
            .filter(|e| nft_type.map_or(true, |t| e.nft_type == t))
            .cloned()
            .collect();
        sort_entries(&mut rows);
        Ok(rows)
    }

    async fn get_status(&self) -> Result<Option<RefreshStatus>> {
        Ok(self.state.lock().await.status.clone())
    }
}

/// `leaderboard_entries` / `leaderboard_meta` on Postgres.
#[derive(Clone)]
pub struct PgLeaderboardStore {
    db: Db,
}

impl PgLeaderboardStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_entry(r: &PgRow) -> Result<LeaderboardEntry> {
    let nft_type: String = r.try_get("nft_type")?;
    Ok(LeaderboardEntry {
        collection_slug: r.try_get("collection_slug")?,
        nft_type: nft_type.parse()?,
        token_id: r.try_get("token_id")?,
        points: r.try_get("points")?,
        image_url: r.try_get("image_url")?,
        opensea_url: r.try_get("opensea_url")?,
        is_listed: r.try_get("is_listed")?,
    })
}

#[async_trait::async_trait]
impl LeaderboardStore for PgLeaderboardStore {
    #[instrument(skip(self, entries), fields(rows = entries.len()))]
    async fn upsert_batch(&self, entries: &[LeaderboardEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO leaderboard_entries (collection_slug, nft_type, token_id, points, image_url, opensea_url, is_listed, updated_at) ",
        );
        qb.push_values(entries, |mut b, e| {
            b.push_bind(e.collection_slug.as_str())
                .push_bind(e.nft_type.as_str())
                .push_bind(e.token_id.as_str())
                .push_bind(e.points)
                .push_bind(e.image_url.as_deref())
                .push_bind(e.opensea_url.as_deref())
                .push_bind(e.is_listed)
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT (collection_slug, token_id)
              DO UPDATE SET nft_type = EXCLUDED.nft_type,
                            points = EXCLUDED.points,
                            image_url = EXCLUDED.image_url,
                            opensea_url = EXCLUDED.opensea_url,
                            is_listed = EXCLUDED.is_listed,
                            updated_at = EXCLUDED.updated_at",
        );
        qb.build()
            .persistent(false)
            .execute(&self.db.pool)
            .await
            .context("upsert leaderboard_entries")?;
        Ok(())
    }

    async fn set_status(&self, update: &StatusUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO leaderboard_meta (cache_key, status, last_started_at, last_completed_at, last_error, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (cache_key) DO UPDATE SET
                status = EXCLUDED.status,
                last_started_at = COALESCE(EXCLUDED.last_started_at, leaderboard_meta.last_started_at),
                last_completed_at = COALESCE(EXCLUDED.last_completed_at, leaderboard_meta.last_completed_at),
                last_error = EXCLUDED.last_error,
                updated_at = now()",
        )
        .persistent(false)
        .bind(CACHE_KEY)
        .bind(update.status.as_str())
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.error.as_deref())
        .execute(&self.db.pool)
        .await
        .context("upsert leaderboard_meta")?;
        info!(status = update.status.as_str(), "leaderboard status updated");
        Ok(())
    }

    async fn try_claim_refresh(
        &self,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = sqlx::query(
            "INSERT INTO leaderboard_meta (cache_key, status, last_started_at, last_error, updated_at)
             VALUES ($1, 'running', $2, NULL, now())
             ON CONFLICT (cache_key) DO UPDATE SET
                status = 'running',
                last_started_at = EXCLUDED.last_started_at,
                last_error = NULL,
                updated_at = now()
             WHERE leaderboard_meta.status <> 'running'
                OR leaderboard_meta.last_started_at IS NULL
                OR leaderboard_meta.last_started_at < $3
             RETURNING cache_key",
        )
        .persistent(false)
        .bind(CACHE_KEY)
        .bind(started_at)
        .bind(stale_before)
        .fetch_optional(&self.db.pool)
        .await
        .context("claim leaderboard refresh")?;
        Ok(claimed.is_some())
    }

    async fn list_entries(&self, nft_type: Option<NftType>) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            "SELECT collection_slug, nft_type, token_id, points, image_url, opensea_url, is_listed
             FROM leaderboard_entries
             WHERE ($1::text IS NULL OR nft_type = $1)
             ORDER BY points DESC, token_id ASC",
        )
        .persistent(false)
        .bind(nft_type.map(|t| t.as_str()))
        .fetch_all(&self.db.pool)
        .await
        .context("select leaderboard_entries")?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn get_status(&self) -> Result<Option<RefreshStatus>> {
        let row = sqlx::query(
            "SELECT status, last_started_at, last_completed_at, last_error
             FROM leaderboard_meta WHERE cache_key = $1",
        )
        .persistent(false)
        .bind(CACHE_KEY)
        .fetch_optional(&self.db.pool)
        .await
        .context("select leaderboard_meta")?;
        let Some(r) = row else {
            return Ok(None);
        };
        let status: String = r.try_get("status")?;
        Ok(Some(RefreshStatus {
            status: status.parse()?,
            last_started_at: r.try_get("last_started_at")?,
            last_completed_at: r.try_get("last_completed_at")?,
            last_error: r.try_get("last_error")?,
        }))
    }

    async fn is_healthy(&self) -> bool {
        self.db.ping().await
    }
}
