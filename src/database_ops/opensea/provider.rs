use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database_ops::leaderboard::NftSource;

pub const DEFAULT_BASE_URL: &str = "https://api.opensea.io/api/v2";
pub const DEFAULT_CHAIN: &str = "ethereum";
const IMAGE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Page size and hard page cap for one paginated endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub page_size: u32,
    pub max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct OpenSeaOptions {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub nfts: PageLimits,
    pub listings: PageLimits,
}

impl Default for OpenSeaOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            nfts: PageLimits {
                page_size: 200,
                max_pages: 50,
            },
            listings: PageLimits {
                page_size: 100,
                max_pages: 20,
            },
        }
    }
}

/// OpenSea v2 marketplace client.
///
/// Endpoints used:
/// - GET /collection/{slug}/nfts?limit=&next= - collection NFTs (cursor paged)
/// - GET /listings/collection/{slug}/all?limit=&next= - active listings (cursor paged)
/// - GET /chain/{chain}/contract/{address}/nfts/{identifier} - single NFT
#[derive(Debug, Clone)]
pub struct OpenSeaProvider {
    opts: OpenSeaOptions,
    http: Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftItem {
    pub identifier: String,
    pub image_url: Option<String>,
    pub opensea_url: Option<String>,
    pub contract: Option<String>,
}

/// Raw upstream status and body, for handlers that mirror the marketplace response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationEnd {
    /// The server stopped returning a cursor.
    Exhausted,
    /// `max_pages` pages were read and a cursor was still present.
    PageCap,
    /// A page failed; items from earlier pages are kept.
    Failed,
}

#[derive(Debug)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pages: u32,
    pub end: PaginationEnd,
}

/// Walk a cursor-paged endpoint until the cursor runs out, `max_pages` pages
/// have been read, or a page fails. Never errors; a failed page ends the walk
/// with whatever was accumulated.
pub async fn paginate<T, F, Fut>(label: &str, max_pages: u32, mut fetch_page: F) -> Paginated<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0u32;
    loop {
        if pages >= max_pages {
            warn!(label, max_pages, "page cap reached; stopping pagination");
            return Paginated {
                items,
                pages,
                end: PaginationEnd::PageCap,
            };
        }
        match fetch_page(cursor.take()).await {
            Ok(page) => {
                pages += 1;
                items.extend(page.items);
                match page.next.filter(|c| !c.trim().is_empty()) {
                    Some(next) => cursor = Some(next),
                    None => {
                        return Paginated {
                            items,
                            pages,
                            end: PaginationEnd::Exhausted,
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    label,
                    page = pages + 1,
                    error = %err,
                    "page fetch failed; keeping partial results"
                );
                return Paginated {
                    items,
                    pages,
                    end: PaginationEnd::Failed,
                };
            }
        }
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifiers arrive as strings, but some payloads carry them as numbers.
fn identifier_of(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_nft_page(body: &Value) -> Page<NftItem> {
    let items = body
        .get("nfts")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|nft| {
                    let identifier = identifier_of(nft.get("identifier"))?;
                    Some(NftItem {
                        identifier,
                        image_url: non_empty_str(nft.get("image_url"))
                            .or_else(|| non_empty_str(nft.get("display_image_url"))),
                        opensea_url: non_empty_str(nft.get("opensea_url")),
                        contract: non_empty_str(nft.get("contract")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Page {
        items,
        next: non_empty_str(body.get("next")),
    }
}

pub fn parse_listings_page(body: &Value) -> Page<String> {
    let mut items = Vec::new();
    if let Some(listings) = body.get("listings").and_then(|v| v.as_array()) {
        for listing in listings {
            let Some(offer) = listing
                .pointer("/protocol_data/parameters/offer")
                .and_then(|v| v.as_array())
            else {
                continue;
            };
            items.extend(
                offer
                    .iter()
                    .filter_map(|item| identifier_of(item.get("identifierOrCriteria"))),
            );
        }
    }
    Page {
        items,
        next: non_empty_str(body.get("next")),
    }
}

impl OpenSeaProvider {
    pub fn new(opts: OpenSeaOptions) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("seed-leaderboard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(opts.timeout_secs.max(1)))
            .build()
            .context("opensea: build http client")?;
        let opts = OpenSeaOptions {
            base_url: opts.base_url.trim_end_matches('/').to_string(),
            api_key: opts.api_key.filter(|k| !k.trim().is_empty()),
            ..opts
        };
        Ok(Self { opts, http })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("Accept", "application/json");
        match self.opts.api_key.as_deref() {
            Some(key) => req.header("X-API-KEY", key),
            None => req,
        }
    }

    fn collection_nfts_url(&self, slug: &str) -> String {
        format!(
            "{}/collection/{}/nfts",
            self.opts.base_url,
            urlencoding::encode(slug)
        )
    }

    fn collection_listings_url(&self, slug: &str) -> String {
        format!(
            "{}/listings/collection/{}/all",
            self.opts.base_url,
            urlencoding::encode(slug)
        )
    }

    async fn get_page(&self, url: &str, limit: u32, cursor: Option<&str>) -> Result<Value> {
        let mut req = self
            .http
            .get(url)
            .query(&[("limit", limit.to_string())]);
        if let Some(next) = cursor {
            req = req.query(&[("next", next)]);
        }
        let resp = self.authed(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            return Err(anyhow!("opensea request failed: {status} url={url} body={body}"));
        }
        Ok(resp.json::<Value>().await?)
    }

    /// All NFTs of a collection, partial on upstream failure.
    pub async fn fetch_all_nfts(&self, collection_slug: &str) -> Vec<NftItem> {
        let url = self.collection_nfts_url(collection_slug);
        let limits = self.opts.nfts;
        let out = paginate("opensea.nfts", limits.max_pages, |cursor| {
            let url = url.clone();
            async move {
                let body = self.get_page(&url, limits.page_size, cursor.as_deref()).await?;
                Ok(parse_nft_page(&body))
            }
        })
        .await;
        info!(
            collection = %collection_slug,
            nfts = out.items.len(),
            pages = out.pages,
            end = ?out.end,
            "opensea: collection nfts fetched"
        );
        out.items
    }

    /// Token ids with an active listing, partial on upstream failure.
    pub async fn fetch_listed_token_ids(&self, collection_slug: &str) -> HashSet<String> {
        let url = self.collection_listings_url(collection_slug);
        let limits = self.opts.listings;
        let out = paginate("opensea.listings", limits.max_pages, |cursor| {
            let url = url.clone();
            async move {
                let body = self.get_page(&url, limits.page_size, cursor.as_deref()).await?;
                Ok(parse_listings_page(&body))
            }
        })
        .await;
        let listed: HashSet<String> = out.items.into_iter().collect();
        info!(
            collection = %collection_slug,
            listed = listed.len(),
            pages = out.pages,
            end = ?out.end,
            "opensea: listed token ids fetched"
        );
        listed
    }

    /// One page of active listings, returned with the upstream status so callers
    /// can mirror it. Errors only on transport failure.
    pub async fn fetch_listings(&self, collection_slug: &str) -> Result<UpstreamResponse> {
        let url = self.collection_listings_url(collection_slug);
        let req = self
            .http
            .get(&url)
            .query(&[("limit", self.opts.listings.page_size.to_string())]);
        let resp = self
            .authed(req)
            .send()
            .await
            .with_context(|| format!("opensea: listings request for {collection_slug}"))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        debug!(collection = %collection_slug, status, "opensea: listings proxied");
        Ok(UpstreamResponse { status, body })
    }

    /// Image URL for a single NFT, bounded by an 8 second timeout. `None` on any failure.
    pub async fn fetch_nft_image(
        &self,
        chain: &str,
        contract: &str,
        token_id: &str,
    ) -> Option<String> {
        let url = format!(
            "{}/chain/{}/contract/{}/nfts/{}",
            self.opts.base_url,
            urlencoding::encode(chain),
            urlencoding::encode(contract),
            urlencoding::encode(token_id)
        );
        let req = self.http.get(&url).timeout(IMAGE_LOOKUP_TIMEOUT);
        let resp = match self.authed(req).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%contract, %token_id, error = %err, "opensea: image lookup failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!(%contract, %token_id, status = %resp.status(), "opensea: image lookup non-success");
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        let nft = body.get("nft").unwrap_or(&body);
        non_empty_str(nft.get("image_url")).or_else(|| non_empty_str(nft.get("display_image_url")))
    }
}

#[async_trait::async_trait]
impl NftSource for OpenSeaProvider {
    async fn collection_nfts(&self, collection_slug: &str) -> Result<Vec<NftItem>> {
        Ok(self.fetch_all_nfts(collection_slug).await)
    }

    async fn listed_token_ids(&self, collection_slug: &str) -> Result<HashSet<String>> {
        Ok(self.fetch_listed_token_ids(collection_slug).await)
    }
}
