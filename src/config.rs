//! Service configuration assembled from the environment.
use std::time::Duration;

use anyhow::Result;

use crate::database_ops::leaderboard::{NftType, RefreshSettings, TrackedCollection};
use crate::database_ops::opensea::{OpenSeaOptions, PageLimits, DEFAULT_BASE_URL, DEFAULT_CHAIN};
use crate::util::env::{env_opt, env_parse, env_req, preflight_check};

pub const DEFAULT_MYTHIC_SLUG: &str = "mythic-seeds";
pub const DEFAULT_ANCIENT_SLUG: &str = "ancient-seeds";

const LOGGED_KEYS: &[&str] = &[
    "OPENSEA_BASE_URL",
    "OPENSEA_API_KEY",
    "OPENSEA_CHAIN",
    "STAKING_API_URL",
    "MYTHIC_COLLECTION_SLUG",
    "ANCIENT_COLLECTION_SLUG",
    "POINTS_CHUNK_SIZE",
    "UPSERT_BATCH_SIZE",
    "REFRESH_LEASE_SECS",
    "DATABASE_URL",
];

#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    pub opensea: OpenSeaOptions,
    pub chain: String,
    pub staking_base_url: String,
    pub http_timeout_secs: u64,
    pub collections: Vec<TrackedCollection>,
    pub refresh: RefreshSettings,
    pub image_cache_ttl: Duration,
    pub points_cache_ttl: Duration,
}

impl LeaderboardConfig {
    pub fn from_env() -> Result<Self> {
        preflight_check(
            "leaderboard",
            &["OPENSEA_API_KEY", "STAKING_API_URL"],
            LOGGED_KEYS,
        )?;

        let http_timeout_secs: u64 = env_parse("HTTP_TIMEOUT_SECS", 30u64);
        let chain = env_opt("OPENSEA_CHAIN").unwrap_or_else(|| DEFAULT_CHAIN.to_string());
        let opensea = OpenSeaOptions {
            base_url: env_opt("OPENSEA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: Some(env_req("OPENSEA_API_KEY")?),
            timeout_secs: http_timeout_secs,
            nfts: PageLimits {
                page_size: env_parse("NFT_PAGE_SIZE", 200u32).clamp(1, 200),
                max_pages: env_parse("NFT_MAX_PAGES", 50u32).max(1),
            },
            listings: PageLimits {
                page_size: env_parse("LISTINGS_PAGE_SIZE", 100u32).clamp(1, 100),
                max_pages: env_parse("LISTINGS_MAX_PAGES", 20u32).max(1),
            },
        };

        let collections = vec![
            TrackedCollection {
                slug: env_opt("MYTHIC_COLLECTION_SLUG")
                    .unwrap_or_else(|| DEFAULT_MYTHIC_SLUG.to_string()),
                nft_type: NftType::Mythic,
            },
            TrackedCollection {
                slug: env_opt("ANCIENT_COLLECTION_SLUG")
                    .unwrap_or_else(|| DEFAULT_ANCIENT_SLUG.to_string()),
                nft_type: NftType::Ancient,
            },
        ];

        let refresh = RefreshSettings {
            points_chunk_size: env_parse("POINTS_CHUNK_SIZE", 10usize).max(1),
            upsert_batch_size: env_parse("UPSERT_BATCH_SIZE", 100usize).max(1),
            lease: Duration::from_secs(env_parse("REFRESH_LEASE_SECS", 1800u64)),
            chain: chain.clone(),
        };

        Ok(Self {
            opensea,
            chain,
            staking_base_url: env_req("STAKING_API_URL")?,
            http_timeout_secs,
            collections,
            refresh,
            image_cache_ttl: Duration::from_secs(env_parse("IMAGE_CACHE_TTL_SECS", 3600u64)),
            points_cache_ttl: Duration::from_secs(env_parse("POINTS_CACHE_TTL_SECS", 300u64)),
        })
    }

    /// Collection tracked for a given seed type.
    pub fn collection_for(&self, nft_type: NftType) -> Option<&TrackedCollection> {
        self.collections.iter().find(|c| c.nft_type == nft_type)
    }
}
