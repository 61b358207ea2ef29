use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::util::env::env_flag;

const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connect and, when `AUTO_MIGRATE` is on, apply pending migrations.
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            db.run_migrations().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parse database url")?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connect to database")?;
        info!("connected to db");
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT true")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .unwrap_or(false)
    }

    /// Lightweight migration runner: applies `NNNN_name.sql` files in version
    /// order and records them in `_seedboard_migrations`. Other files are ignored.
    pub async fn run_migrations(&self) -> Result<usize> {
        let dir = Path::new(MIGRATIONS_DIR);
        if !dir.exists() {
            warn!(dir = MIGRATIONS_DIR, "migrations directory missing; nothing to apply");
            return Ok(0);
        }
        // raw_sql keeps these off the prepared-statement path under PgBouncer
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _seedboard_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for r in sqlx::raw_sql("SELECT version FROM _seedboard_migrations")
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, desc)) = parse_migration_filename(fname) {
                candidates.push((version, desc, path));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        let mut count = 0usize;
        for (version, desc, path) in candidates {
            if !applied.insert(version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("read migration {}", path.display()))?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(sql.trim())
                .execute(&self.pool)
                .await
                .with_context(|| format!("apply migration {version}_{desc}"))?;
            let insert_stmt = format!(
                "INSERT INTO _seedboard_migrations(version, description) VALUES ({}, '{}')",
                version,
                desc.replace('\'', "''")
            );
            sqlx::raw_sql(&insert_stmt).execute(&self.pool).await?;
            count += 1;
        }
        info!(applied = count, "migrations complete");
        Ok(count)
    }
}

/// `0001_leaderboard.sql` -> `(1, "leaderboard")`.
fn parse_migration_filename(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = stem[digits.len()..].strip_prefix('_')?;
    let version = digits.parse::<i64>().ok()?;
    Some((version, rest.to_string()))
}
