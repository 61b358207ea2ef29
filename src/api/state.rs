// Shared state handed to every handler

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::config::LeaderboardConfig;
use crate::database_ops::leaderboard::{LeaderboardRefresher, LeaderboardStore};
use crate::database_ops::market_cache::MarketCache;
use crate::database_ops::opensea::OpenSeaProvider;
use crate::database_ops::staking::StakingProvider;

pub struct AppState {
    pub store: Arc<dyn LeaderboardStore>,
    pub opensea: Arc<OpenSeaProvider>,
    pub refresher: Arc<LeaderboardRefresher>,
    pub cache: Arc<MarketCache>,
    pub chain: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        opensea: Arc<OpenSeaProvider>,
        refresher: Arc<LeaderboardRefresher>,
        cache: Arc<MarketCache>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            opensea,
            refresher,
            cache,
            chain: chain.into(),
            started_at: Instant::now(),
        }
    }

    /// Wire the real marketplace and staking clients around `store`.
    pub fn from_config(
        config: &LeaderboardConfig,
        store: Arc<dyn LeaderboardStore>,
    ) -> Result<Self> {
        let opensea = Arc::new(OpenSeaProvider::new(config.opensea.clone())?);
        let staking = Arc::new(StakingProvider::new(
            &config.staking_base_url,
            config.http_timeout_secs,
        )?);
        let refresher = Arc::new(LeaderboardRefresher::new(
            opensea.clone(),
            staking.clone(),
            store.clone(),
            config.collections.clone(),
            config.refresh.clone(),
        ));
        let cache = Arc::new(MarketCache::new(
            opensea.clone(),
            staking,
            config.image_cache_ttl,
            config.points_cache_ttl,
        ));
        Ok(Self::new(store, opensea, refresher, cache, config.chain.clone()))
    }
}
