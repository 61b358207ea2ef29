//! Seed leaderboard service: pulls NFT holdings and listings from OpenSea,
//! joins them with staking points and caches the result in Postgres.

pub mod api;
pub mod config;
pub mod database_ops;
pub mod logging;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use config::LeaderboardConfig;
