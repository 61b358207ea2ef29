// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        // Functions the UI calls directly
        .route("/opensea-listings", web::post().to(handlers::opensea_listings))
        .route(
            "/leaderboard-refresh",
            web::post().to(handlers::leaderboard_refresh),
        )
        // Cached reads
        .route("/leaderboard", web::get().to(handlers::list_leaderboard))
        .route(
            "/leaderboard/status",
            web::get().to(handlers::refresh_status),
        )
        // Per-token lookups backed by the market cache
        .route("/nft-image", web::get().to(handlers::nft_image))
        .route("/points", web::get().to(handlers::token_points));
}
