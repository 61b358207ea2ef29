// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::api::state::AppState;
use crate::database_ops::leaderboard::RefreshOutcome;
use actix_web::{http::StatusCode, web, HttpResponse, Result};
use serde_json::{json, Value};

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let database = if state.store.is_healthy().await {
        "connected"
    } else {
        "disconnected"
    };
    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Proxy one page of active marketplace listings for a collection.
pub async fn opensea_listings(
    state: web::Data<AppState>,
    body: Option<web::Json<ListingsRequest>>,
) -> Result<HttpResponse> {
    let slug = body
        .and_then(|b| b.into_inner().collection_slug)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let Some(slug) = slug else {
        return Ok(HttpResponse::BadRequest()
            .json(json!({ "error": "collectionSlug is required" })));
    };

    match state.opensea.fetch_listings(&slug).await {
        Ok(upstream) if upstream.is_success() => {
            let listings = upstream
                .body
                .get("listings")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            Ok(HttpResponse::Ok().json(json!({ "listings": listings })))
        }
        Ok(upstream) => {
            tracing::warn!(collection = %slug, status = upstream.status, "opensea listings upstream error");
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            Ok(HttpResponse::build(status).json(json!({
                "error": "OpenSea API error",
                "details": upstream.body,
            })))
        }
        Err(err) => {
            tracing::error!(collection = %slug, error = %err, "opensea listings request failed");
            Ok(HttpResponse::BadGateway().json(json!({
                "error": "Failed to reach OpenSea",
                "details": format!("{err:#}"),
            })))
        }
    }
}

/// Run the full leaderboard refresh and report its outcome.
pub async fn leaderboard_refresh(state: web::Data<AppState>) -> Result<HttpResponse> {
    tracing::info!("leaderboard refresh requested");
    match state.refresher.run().await {
        Ok(RefreshOutcome::Completed(summary)) => {
            Ok(HttpResponse::Ok().json(json!({ "success": true, "summary": summary })))
        }
        Ok(RefreshOutcome::AlreadyRunning) => Ok(HttpResponse::Conflict()
            .json(json!({ "error": "leaderboard refresh already running" }))),
        Err(err) => Ok(HttpResponse::InternalServerError()
            .json(json!({ "error": format!("{err:#}") }))),
    }
}

/// Cached leaderboard rows plus the refresh status, highest points first.
pub async fn list_leaderboard(
    state: web::Data<AppState>,
    query: web::Query<LeaderboardQuery>,
) -> Result<HttpResponse> {
    let entries = match state.store.list_entries(query.nft_type).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, "failed to read leaderboard entries");
            return Ok(HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("failed to read leaderboard")));
        }
    };
    let status = state.store.get_status().await.ok().flatten().unwrap_or_default();
    Ok(HttpResponse::Ok().json(ApiResponse::success(LeaderboardData { entries, status })))
}

pub async fn refresh_status(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.store.get_status().await {
        Ok(status) => Ok(HttpResponse::Ok().json(ApiResponse::success(status.unwrap_or_default()))),
        Err(err) => {
            tracing::error!(error = %err, "failed to read refresh status");
            Ok(HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("failed to read refresh status")))
        }
    }
}

pub async fn nft_image(
    state: web::Data<AppState>,
    query: web::Query<ImageQuery>,
) -> Result<HttpResponse> {
    let chain = query.chain.as_deref().unwrap_or(&state.chain);
    let image_url = state
        .cache
        .image_url(chain, &query.contract, &query.token_id)
        .await;
    Ok(HttpResponse::Ok().json(ImageResponse { image_url }))
}

pub async fn token_points(
    state: web::Data<AppState>,
    query: web::Query<PointsQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let points = state.cache.points(&query.token_id, query.nft_type).await;
    Ok(HttpResponse::Ok().json(PointsResponse {
        token_id: query.token_id,
        nft_type: query.nft_type,
        points,
    }))
}
