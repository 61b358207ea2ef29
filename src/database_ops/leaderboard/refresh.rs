use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use super::{
    assemble_entries, fetch_points_batch, upsert_entries, LeaderboardStore, NftSource,
    PointsSource, StatusUpdate, TrackedCollection, UpsertReport,
};

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub points_chunk_size: usize,
    pub upsert_batch_size: usize,
    /// A `running` status older than this is treated as abandoned.
    pub lease: Duration,
    /// Chain used when an NFT lacks an `opensea_url` and one must be built.
    pub chain: String,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            points_chunk_size: 10,
            upsert_batch_size: 100,
            lease: Duration::from_secs(30 * 60),
            chain: crate::database_ops::opensea::DEFAULT_CHAIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub collection_slug: String,
    pub nfts: usize,
    pub listed: usize,
    pub upsert: UpsertReport,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub collections: Vec<CollectionSummary>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(RefreshSummary),
    /// Another run holds an unexpired lease; nothing was touched.
    AlreadyRunning,
}

/// Rebuilds the cached leaderboard for every tracked collection.
pub struct LeaderboardRefresher {
    nfts: Arc<dyn NftSource>,
    points: Arc<dyn PointsSource>,
    store: Arc<dyn LeaderboardStore>,
    collections: Vec<TrackedCollection>,
    settings: RefreshSettings,
}

impl LeaderboardRefresher {
    pub fn new(
        nfts: Arc<dyn NftSource>,
        points: Arc<dyn PointsSource>,
        store: Arc<dyn LeaderboardStore>,
        collections: Vec<TrackedCollection>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            nfts,
            points,
            store,
            collections,
            settings,
        }
    }

    pub fn collections(&self) -> &[TrackedCollection] {
        &self.collections
    }

    /// Claim the status lease, refresh every collection in order, then record
    /// `idle` or `error`. Rows written before a failure are kept.
    pub async fn run(&self) -> Result<RefreshOutcome> {
        let started_at = Utc::now();
        let lease = chrono::Duration::from_std(self.settings.lease)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let claimed = self
            .store
            .try_claim_refresh(started_at, started_at - lease)
            .await
            .context("claim refresh lease")?;
        if !claimed {
            warn!("leaderboard refresh already running; skipping");
            return Ok(RefreshOutcome::AlreadyRunning);
        }
        info!(collections = self.collections.len(), "leaderboard refresh started");

        match self.refresh_all().await {
            Ok(summary) => {
                if let Err(err) = self
                    .store
                    .set_status(&StatusUpdate::completed(Utc::now()))
                    .await
                {
                    error!(error = %err, "failed to record completed refresh status");
                }
                let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
                info!(elapsed_ms, "leaderboard refresh completed");
                Ok(RefreshOutcome::Completed(summary))
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "leaderboard refresh failed");
                if let Err(status_err) = self
                    .store
                    .set_status(&StatusUpdate::failed(&message))
                    .await
                {
                    error!(error = %status_err, "failed to record refresh error status");
                }
                Err(err)
            }
        }
    }

    async fn refresh_all(&self) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        for collection in &self.collections {
            let collection_summary = self
                .refresh_collection(collection)
                .await
                .with_context(|| format!("refresh collection {}", collection.slug))?;
            summary.collections.push(collection_summary);
        }
        Ok(summary)
    }

    async fn refresh_collection(
        &self,
        collection: &TrackedCollection,
    ) -> Result<CollectionSummary> {
        let slug = collection.slug.as_str();
        info!(collection = %slug, nft_type = %collection.nft_type, "refreshing collection");

        let nfts = self.nfts.collection_nfts(slug).await?;
        if nfts.is_empty() {
            warn!(collection = %slug, "no nfts returned for collection");
        }
        let listed = self.nfts.listed_token_ids(slug).await?;

        let token_ids: Vec<String> = nfts.iter().map(|n| n.identifier.clone()).collect();
        let points = fetch_points_batch(
            self.points.as_ref(),
            &token_ids,
            collection.nft_type,
            self.settings.points_chunk_size,
        )
        .await;

        let entries = assemble_entries(collection, &nfts, &listed, &points, &self.settings.chain);
        let upsert = upsert_entries(
            self.store.as_ref(),
            entries,
            self.settings.upsert_batch_size,
        )
        .await;
        info!(
            collection = %slug,
            nfts = nfts.len(),
            listed = listed.len(),
            written = upsert.written,
            failed_batches = upsert.failed_batches,
            "collection refreshed"
        );
        Ok(CollectionSummary {
            collection_slug: collection.slug.clone(),
            nfts: nfts.len(),
            listed: listed.len(),
            upsert,
        })
    }
}
