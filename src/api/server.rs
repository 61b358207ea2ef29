// API server implementation using actix-web

use crate::api::{middleware, routes, state::AppState};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

use crate::util::env::{env_opt, env_parse};

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
    /// 0 keeps actix's default of one worker per core.
    pub workers: usize,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = env_opt("API_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("Invalid API_PORT")?;
        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string());
        let workers: usize = env_parse("API_WORKERS", 0usize);

        Ok(Self {
            host,
            port,
            allowed_origins,
            workers,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, state: AppState) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            collections = ?state.refresher.collections(),
            "Starting seed leaderboard API server"
        );

        let state = web::Data::new(state);
        let allowed_origins = self.allowed_origins.clone();

        let mut server = HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);

            App::new()
                .app_data(state.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .configure(routes::configure_routes)
        });
        if self.workers > 0 {
            server = server.workers(self.workers);
        }

        server
            .bind(&bind_addr)
            .with_context(|| format!("Failed to bind to {}", bind_addr))?
            .run()
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}
