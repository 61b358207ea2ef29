// HTTP API server binary for the seed leaderboard

use std::sync::Arc;

use anyhow::Result;
use seed_leaderboard::api::{ApiServer, AppState};
use seed_leaderboard::database_ops::leaderboard::PgLeaderboardStore;
use seed_leaderboard::logging::{init_tracing, DEFAULT_FILTER};
use seed_leaderboard::util::db::Db;
use seed_leaderboard::util::env as env_util;
use seed_leaderboard::LeaderboardConfig;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    tracing::info!("Initializing seed leaderboard API server");

    let config = LeaderboardConfig::from_env()?;
    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url_prefer_session()?;
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_connections).await?;

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgLeaderboardStore::new(db));
    let state = AppState::from_config(&config, store)?;

    server.run(state).await?;

    Ok(())
}
