// Stub OpenSea and staking endpoints served from one local actix server.
#![allow(dead_code)]

use actix_web::{web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::{json, Value};

use seed_leaderboard::database_ops::opensea::{OpenSeaOptions, OpenSeaProvider, PageLimits};

#[derive(Deserialize)]
struct PageQuery {
    next: Option<String>,
}

#[derive(Deserialize)]
struct PointsQuery {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

fn listing(token_id: &str) -> Value {
    json!({
        "order_hash": format!("0xorder{token_id}"),
        "protocol_data": {
            "parameters": {
                "offer": [{ "itemType": 2, "identifierOrCriteria": token_id }]
            }
        }
    })
}

async fn collection_nfts(path: web::Path<String>, query: web::Query<PageQuery>) -> HttpResponse {
    let slug = path.into_inner();
    if slug == "endless" {
        let n: u32 = query
            .next
            .as_deref()
            .and_then(|c| c.strip_prefix('p'))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        return HttpResponse::Ok().json(json!({
            "nfts": [{ "identifier": n.to_string(), "contract": "0xabc" }],
            "next": format!("p{}", n + 1),
        }));
    }
    match query.next.as_deref() {
        None => HttpResponse::Ok().json(json!({
            "nfts": [
                {
                    "identifier": "1",
                    "contract": "0xabc",
                    "image_url": "https://img.example/1.png",
                    "opensea_url": "https://opensea.io/assets/ethereum/0xabc/1"
                },
                { "identifier": "2", "contract": "0xabc", "display_image_url": "https://img.example/2.png" }
            ],
            "next": "p2",
        })),
        Some(_) => HttpResponse::Ok().json(json!({
            "nfts": [{ "identifier": "3", "contract": "0xabc" }],
        })),
    }
}

async fn collection_listings(
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    if path.as_str() == "broken" {
        return HttpResponse::InternalServerError().json(json!({ "errors": ["boom"] }));
    }
    match query.next.as_deref() {
        None => HttpResponse::Ok().json(json!({
            "listings": [listing("2")],
            "next": "p2",
        })),
        Some(_) => HttpResponse::InternalServerError()
            .json(json!({ "errors": ["page two exploded"] })),
    }
}

async fn single_nft(path: web::Path<(String, String, String)>) -> HttpResponse {
    let (_chain, _contract, token_id) = path.into_inner();
    if token_id == "missing" {
        return HttpResponse::NotFound().finish();
    }
    HttpResponse::Ok().json(json!({
        "nft": { "identifier": token_id, "image_url": format!("https://img.example/{token_id}.png") }
    }))
}

async fn staking_points(query: web::Query<PointsQuery>) -> HttpResponse {
    if query.kind != "Mythic" && query.kind != "Ancient" {
        return HttpResponse::BadRequest().finish();
    }
    match query.id.as_str() {
        "1" => HttpResponse::Ok().json(json!({ "points": 10 })),
        "2" => HttpResponse::Ok().json(json!({ "points": null, "totalPoints": "7" })),
        "3" => HttpResponse::Ok().json(json!({ "stakingPoints": 3.9 })),
        "neg" => HttpResponse::Ok().json(json!({ "points": -5 })),
        "flaky" => HttpResponse::InternalServerError().finish(),
        _ => HttpResponse::NotFound().finish(),
    }
}

/// Start the stub on an ephemeral port and return its base URL.
pub fn spawn_upstream() -> String {
    let server = HttpServer::new(|| {
        App::new()
            .route("/collection/{slug}/nfts", web::get().to(collection_nfts))
            .route(
                "/listings/collection/{slug}/all",
                web::get().to(collection_listings),
            )
            .route(
                "/chain/{chain}/contract/{contract}/nfts/{token_id}",
                web::get().to(single_nft),
            )
            .route("/seeds/points", web::get().to(staking_points))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("bind stub upstream");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{addr}")
}

pub fn opensea_for(base_url: &str) -> OpenSeaProvider {
    OpenSeaProvider::new(OpenSeaOptions {
        base_url: base_url.to_string(),
        api_key: Some("test-key".to_string()),
        timeout_secs: 5,
        nfts: PageLimits {
            page_size: 200,
            max_pages: 3,
        },
        listings: PageLimits {
            page_size: 100,
            max_pages: 5,
        },
    })
    .expect("build opensea client")
}
