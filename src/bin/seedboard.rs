use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seed_leaderboard::database_ops::leaderboard::{
    LeaderboardRefresher, LeaderboardStore, MemoryStore, NftType, PgLeaderboardStore,
    RefreshOutcome,
};
use seed_leaderboard::database_ops::opensea::OpenSeaProvider;
use seed_leaderboard::database_ops::staking::StakingProvider;
use seed_leaderboard::logging::{init_tracing, DEFAULT_FILTER};
use seed_leaderboard::util::db::Db;
use seed_leaderboard::util::env;
use seed_leaderboard::LeaderboardConfig;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "seedboard", version, about = "Seed leaderboard admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Rebuild the cached leaderboard from OpenSea and the staking API
    Refresh {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Only refresh the collection for this seed type (Mythic or Ancient)
        #[arg(long)]
        only: Option<NftType>,
        /// Write into an in-memory store and print the rows instead of touching Postgres
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print the refresh status and row counts per seed type
    Status {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Print one page of active listings for a collection
    Listings {
        /// OpenSea collection slug
        slug: String,
    },
    /// Apply pending SQL migrations
    Migrate {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

async fn connect(db_url: Option<String>) -> Result<Db> {
    let database_url = match db_url {
        Some(url) => url,
        None => env::db_url_prefer_session()?,
    };
    info!(url = %env::redact_value("DATABASE_URL", &database_url), "connecting");
    let max_connections: u32 = env::env_parse("DB_MAX_CONNS", 5u32);
    Db::connect_no_migrate(&database_url, max_connections).await
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Refresh {
            db_url,
            only,
            dry_run,
        } => {
            let config = LeaderboardConfig::from_env()?;
            let collections = match only {
                Some(nft_type) => vec![config
                    .collection_for(nft_type)
                    .cloned()
                    .with_context(|| format!("no collection configured for {nft_type}"))?],
                None => config.collections.clone(),
            };

            let memory = Arc::new(MemoryStore::new());
            let store: Arc<dyn LeaderboardStore> = if dry_run {
                memory.clone() as Arc<dyn LeaderboardStore>
            } else {
                Arc::new(PgLeaderboardStore::new(connect(db_url).await?))
            };

            let opensea = Arc::new(OpenSeaProvider::new(config.opensea.clone())?);
            let staking = Arc::new(StakingProvider::new(
                &config.staking_base_url,
                config.http_timeout_secs,
            )?);
            let refresher = LeaderboardRefresher::new(
                opensea,
                staking,
                store.clone(),
                collections,
                config.refresh.clone(),
            );

            match refresher.run().await? {
                RefreshOutcome::Completed(summary) => {
                    print_json(&summary)?;
                    if dry_run {
                        info!(rows = memory.len().await, "dry run: nothing written to Postgres");
                        print_json(&store.list_entries(None).await?)?;
                    }
                }
                RefreshOutcome::AlreadyRunning => {
                    warn!("another refresh holds the lease; nothing to do");
                }
            }
        }
        Commands::Status { db_url } => {
            let store = PgLeaderboardStore::new(connect(db_url).await?);
            let status = store.get_status().await?.unwrap_or_default();
            print_json(&status)?;
            for nft_type in [NftType::Mythic, NftType::Ancient] {
                let rows = store.list_entries(Some(nft_type)).await?;
                println!("{nft_type}: {} rows", rows.len());
            }
        }
        Commands::Listings { slug } => {
            let config = LeaderboardConfig::from_env()?;
            let opensea = OpenSeaProvider::new(config.opensea)?;
            let upstream = opensea.fetch_listings(&slug).await?;
            if !upstream.is_success() {
                warn!(status = upstream.status, "opensea returned an error");
            }
            print_json(&upstream.body)?;
        }
        Commands::Migrate { db_url } => {
            let db = connect(db_url).await?;
            let applied = db.run_migrations().await?;
            info!(applied, "migrations complete");
        }
    }

    Ok(())
}
