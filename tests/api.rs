mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use chrono::Utc;
use serde_json::{json, Value};

use seed_leaderboard::api::{routes::configure_routes, AppState};
use seed_leaderboard::database_ops::leaderboard::{
    LeaderboardRefresher, LeaderboardStore, MemoryStore, NftType, RefreshSettings,
    TrackedCollection,
};
use seed_leaderboard::database_ops::market_cache::MarketCache;
use seed_leaderboard::database_ops::staking::StakingProvider;

use common::{opensea_for, spawn_upstream};

fn state_for(base: &str, store: Arc<MemoryStore>) -> AppState {
    let opensea = Arc::new(opensea_for(base));
    let staking = Arc::new(StakingProvider::new(base, 5).unwrap());
    let refresher = Arc::new(LeaderboardRefresher::new(
        opensea.clone(),
        staking.clone(),
        store.clone(),
        vec![
            TrackedCollection {
                slug: "seeds".to_string(),
                nft_type: NftType::Mythic,
            },
            TrackedCollection {
                slug: "ancient-seeds".to_string(),
                nft_type: NftType::Ancient,
            },
        ],
        RefreshSettings::default(),
    ));
    let cache = Arc::new(MarketCache::new(
        opensea.clone(),
        staking,
        Duration::from_secs(60),
        Duration::from_secs(60),
    ));
    AppState::new(store, opensea, refresher, cache, "ethereum")
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_healthy() {
    let base = spawn_upstream();
    let app = app!(state_for(&base, Arc::new(MemoryStore::new())));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
}

#[actix_web::test]
async fn listings_without_slug_is_rejected() {
    let base = spawn_upstream();
    let app = app!(state_for(&base, Arc::new(MemoryStore::new())));

    let no_body = test::TestRequest::post().uri("/opensea-listings").to_request();
    let resp = test::call_service(&app, no_body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "collectionSlug is required");

    let blank = test::TestRequest::post()
        .uri("/opensea-listings")
        .set_json(json!({ "collectionSlug": "  " }))
        .to_request();
    let resp = test::call_service(&app, blank).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn listings_proxy_returns_listings_or_mirrors_upstream_error() {
    let base = spawn_upstream();
    let app = app!(state_for(&base, Arc::new(MemoryStore::new())));

    let req = test::TestRequest::post()
        .uri("/opensea-listings")
        .set_json(json!({ "collectionSlug": "seeds" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["listings"].as_array().map(Vec::len), Some(1));

    let req = test::TestRequest::post()
        .uri("/opensea-listings")
        .set_json(json!({ "collectionSlug": "broken" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "OpenSea API error");
    assert_eq!(body["details"]["errors"][0], "boom");
}

#[actix_web::test]
async fn listings_proxy_maps_transport_failure_to_bad_gateway() {
    let app = app!(state_for("http://127.0.0.1:1", Arc::new(MemoryStore::new())));

    let req = test::TestRequest::post()
        .uri("/opensea-listings")
        .set_json(json!({ "collectionSlug": "seeds" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[actix_web::test]
async fn refresh_then_read_leaderboard() {
    let base = spawn_upstream();
    let store = Arc::new(MemoryStore::new());
    let app = app!(state_for(&base, store.clone()));

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/leaderboard-refresh").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"]["collections"].as_array().map(Vec::len), Some(2));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/leaderboard?nftType=mythic")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let tokens: Vec<&str> = body["data"]["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["tokenId"].as_str().unwrap())
        .collect();
    assert_eq!(tokens, vec!["1", "2", "3"]);
    assert_eq!(body["data"]["status"]["status"], "idle");

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/leaderboard/status").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert!(body["data"]["lastCompletedAt"].is_string());
}

#[actix_web::test]
async fn refresh_conflicts_while_lease_is_held() {
    let base = spawn_upstream();
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    assert!(store
        .try_claim_refresh(now, now - chrono::Duration::minutes(30))
        .await
        .unwrap());
    let app = app!(state_for(&base, store.clone()));

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/leaderboard-refresh").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(store.is_empty().await);
}

#[actix_web::test]
async fn token_points_and_image_lookups() {
    let base = spawn_upstream();
    let app = app!(state_for(&base, Arc::new(MemoryStore::new())));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/points?tokenId=1&type=Mythic")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "tokenId": "1", "type": "Mythic", "points": 10 }));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/points?tokenId=2&type=mythic")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "tokenId": "2", "type": "Mythic", "points": 7 }));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/nft-image?contract=0xabc&tokenId=5")
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["imageUrl"], "https://img.example/5.png");
}
