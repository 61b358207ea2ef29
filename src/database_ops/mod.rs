pub mod leaderboard;
pub mod market_cache;
pub mod opensea;
pub mod staking;
