pub mod refresh;
pub mod store;

pub use refresh::{LeaderboardRefresher, RefreshOutcome, RefreshSettings, RefreshSummary};
pub use store::{
    upsert_entries, LeaderboardStore, MemoryStore, PgLeaderboardStore, StatusUpdate, UpsertReport,
};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database_ops::opensea::NftItem;

/// Key of the single `leaderboard_meta` row.
pub const CACHE_KEY: &str = "leaderboard_v1";

/// Serialized as `Mythic` / `Ancient`; parsed case-insensitively everywhere
/// (query strings, JSON, CLI flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum NftType {
    Mythic,
    Ancient,
}

impl NftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NftType::Mythic => "Mythic",
            NftType::Ancient => "Ancient",
        }
    }
}

impl fmt::Display for NftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NftType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mythic" => Ok(NftType::Mythic),
            "ancient" => Ok(NftType::Ancient),
            other => Err(anyhow!("unknown nft type {other:?}")),
        }
    }
}

impl TryFrom<String> for NftType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// One cached leaderboard row, unique by (collection_slug, token_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub collection_slug: String,
    pub nft_type: NftType,
    pub token_id: String,
    pub points: i64,
    pub image_url: Option<String>,
    pub opensea_url: Option<String>,
    pub is_listed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Idle,
    Running,
    Error,
}

impl RefreshState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshState::Idle => "idle",
            RefreshState::Running => "running",
            RefreshState::Error => "error",
        }
    }
}

impl FromStr for RefreshState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(RefreshState::Idle),
            "running" => Ok(RefreshState::Running),
            "error" => Ok(RefreshState::Error),
            other => Err(anyhow!("unknown refresh status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub status: RefreshState,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            status: RefreshState::Idle,
            last_started_at: None,
            last_completed_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedCollection {
    pub slug: String,
    pub nft_type: NftType,
}

/// Marketplace side of a refresh.
#[async_trait::async_trait]
pub trait NftSource: Send + Sync {
    async fn collection_nfts(&self, collection_slug: &str) -> Result<Vec<NftItem>>;
    async fn listed_token_ids(&self, collection_slug: &str) -> Result<HashSet<String>>;
}

/// Staking side of a refresh.
#[async_trait::async_trait]
pub trait PointsSource: Send + Sync {
    async fn points(&self, token_id: &str, nft_type: NftType) -> Result<i64>;
}

/// Points for every id, `chunk_size` lookups in flight at a time.
///
/// Chunks run one after another; lookups inside a chunk run concurrently and the
/// whole chunk is awaited before the next starts. Every distinct input id gets
/// exactly one entry, in first-seen order; failed lookups count as 0.
pub async fn fetch_points_batch(
    source: &dyn PointsSource,
    token_ids: &[String],
    nft_type: NftType,
    chunk_size: usize,
) -> IndexMap<String, i64> {
    let mut unique: Vec<&str> = Vec::with_capacity(token_ids.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(token_ids.len());
    for id in token_ids {
        if seen.insert(id.as_str()) {
            unique.push(id.as_str());
        }
    }

    let mut out: IndexMap<String, i64> = IndexMap::with_capacity(unique.len());
    for (chunk_idx, chunk) in unique.chunks(chunk_size.max(1)).enumerate() {
        let results = join_all(chunk.iter().map(|id| source.points(id, nft_type))).await;
        for (id, res) in chunk.iter().zip(results) {
            let points = match res {
                Ok(p) => p.max(0),
                Err(err) => {
                    warn!(token_id = %id, nft_type = %nft_type, error = %err, "points lookup failed; using 0");
                    0
                }
            };
            out.insert((*id).to_string(), points);
        }
        debug!(chunk = chunk_idx, size = chunk.len(), nft_type = %nft_type, "points chunk done");
    }
    out
}

/// Merge marketplace metadata, points and listing membership into rows.
/// Later duplicates of an identifier replace earlier ones.
pub fn assemble_entries(
    collection: &TrackedCollection,
    nfts: &[NftItem],
    listed: &HashSet<String>,
    points: &IndexMap<String, i64>,
    chain: &str,
) -> Vec<LeaderboardEntry> {
    let mut rows: IndexMap<&str, LeaderboardEntry> = IndexMap::with_capacity(nfts.len());
    for nft in nfts {
        let opensea_url = nft.opensea_url.clone().or_else(|| {
            nft.contract
                .as_ref()
                .map(|c| format!("https://opensea.io/assets/{chain}/{c}/{}", nft.identifier))
        });
        rows.insert(
            nft.identifier.as_str(),
            LeaderboardEntry {
                collection_slug: collection.slug.clone(),
                nft_type: collection.nft_type,
                token_id: nft.identifier.clone(),
                points: points.get(&nft.identifier).copied().unwrap_or(0),
                image_url: nft.image_url.clone(),
                opensea_url,
                is_listed: listed.contains(&nft.identifier),
            },
        );
    }
    rows.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowPoints {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowPoints {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PointsSource for SlowPoints {
        async fn points(&self, token_id: &str, _nft_type: NftType) -> Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            // ids in the 20s simulate an API outage for the whole third chunk
            let n: i64 = token_id.parse()?;
            if (20..30).contains(&n) {
                return Err(anyhow!("staking unavailable"));
            }
            Ok(n)
        }
    }

    fn ids(range: std::ops::Range<u32>) -> Vec<String> {
        range.map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn every_id_gets_exactly_one_entry() {
        let source = SlowPoints::new();
        let mut input = ids(0..45);
        input.push("3".to_string());
        let out = fetch_points_batch(&source, &input, NftType::Mythic, 10).await;

        assert_eq!(out.len(), 45);
        assert_eq!(source.calls.load(Ordering::SeqCst), 45);
        for (i, (id, points)) in out.iter().enumerate() {
            assert_eq!(id, &i.to_string());
            assert!(*points >= 0);
        }
    }

    #[tokio::test]
    async fn in_flight_lookups_are_capped_by_chunk_size() {
        let source = SlowPoints::new();
        fetch_points_batch(&source, &ids(0..35), NftType::Ancient, 10).await;
        let max = source.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 10, "max in flight was {max}");
        assert!(max > 1, "lookups inside a chunk should overlap");
    }

    #[tokio::test]
    async fn failing_chunk_does_not_affect_other_chunks() {
        let source = SlowPoints::new();
        let out = fetch_points_batch(&source, &ids(0..40), NftType::Mythic, 10).await;
        assert_eq!(out.len(), 40);
        assert_eq!(out["15"], 15);
        assert_eq!(out["25"], 0);
        assert_eq!(out["39"], 39);
    }

    #[test]
    fn assembles_rows_with_points_and_listing_flags() {
        let collection = TrackedCollection {
            slug: "mythic-seeds".into(),
            nft_type: NftType::Mythic,
        };
        let nft = |id: &str| NftItem {
            identifier: id.into(),
            image_url: Some(format!("https://img/{id}.png")),
            opensea_url: None,
            contract: Some("0xseed".into()),
        };
        let nfts = vec![nft("A"), nft("B"), nft("C")];
        let listed: HashSet<String> = ["B".to_string()].into_iter().collect();
        let points: IndexMap<String, i64> = [("A", 5), ("B", 0), ("C", 12)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let rows = assemble_entries(&collection, &nfts, &listed, &points, "ethereum");
        let summary: Vec<(&str, i64, bool)> = rows
            .iter()
            .map(|r| (r.token_id.as_str(), r.points, r.is_listed))
            .collect();
        assert_eq!(
            summary,
            vec![("A", 5, false), ("B", 0, true), ("C", 12, false)]
        );
        assert_eq!(
            rows[0].opensea_url.as_deref(),
            Some("https://opensea.io/assets/ethereum/0xseed/A")
        );
    }

    #[test]
    fn nft_type_parses_case_insensitively() {
        assert_eq!("mythic".parse::<NftType>().unwrap(), NftType::Mythic);
        assert_eq!("Ancient".parse::<NftType>().unwrap(), NftType::Ancient);
        assert!("legendary".parse::<NftType>().is_err());
    }

    #[test]
    fn nft_type_json_accepts_any_casing_and_writes_canonical() {
        let parsed: NftType = serde_json::from_str("\"mythic\"").unwrap();
        assert_eq!(parsed, NftType::Mythic);
        let parsed: NftType = serde_json::from_str("\"ANCIENT\"").unwrap();
        assert_eq!(parsed, NftType::Ancient);
        assert!(serde_json::from_str::<NftType>("\"legendary\"").is_err());
        assert_eq!(serde_json::to_string(&NftType::Mythic).unwrap(), "\"Mythic\"");
    }
}
