use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::database_ops::leaderboard::{NftType, PointsSource};

/// Response fields that may carry the point total, in priority order.
const POINT_FIELDS: [&str; 3] = ["points", "totalPoints", "stakingPoints"];

/// Client for the seeds staking service.
///
/// - GET /seeds/points?id=<tokenId>&type=<Mythic|Ancient>
///
/// 404 means the token was never staked and counts as zero points.
#[derive(Debug, Clone)]
pub struct StakingProvider {
    base_url: String,
    http: Client,
}

fn value_to_points(v: &Value) -> i64 {
    let raw = if let Some(n) = v.as_i64() {
        n
    } else if let Some(n) = v.as_u64() {
        i64::try_from(n).unwrap_or(i64::MAX)
    } else if let Some(f) = v.as_f64() {
        f.trunc() as i64
    } else if let Some(s) = v.as_str() {
        let s = s.trim();
        s.parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            .unwrap_or(0)
    } else {
        0
    };
    raw.max(0)
}

/// First non-null of the known point fields; 0 if none is present.
pub fn extract_points(body: &Value) -> i64 {
    POINT_FIELDS
        .iter()
        .find_map(|k| body.get(*k).filter(|v| !v.is_null()))
        .map(value_to_points)
        .unwrap_or(0)
}

impl StakingProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("seed-leaderboard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .context("staking: build http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn try_fetch_points(&self, token_id: &str, nft_type: NftType) -> Result<i64> {
        let url = format!("{}/seeds/points", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&[("id", token_id), ("type", nft_type.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%token_id, nft_type = %nft_type, "staking: no stake recorded");
            return Ok(0);
        }
        if !status.is_success() {
            return Err(anyhow!("staking points request failed: {status}"));
        }
        let body: Value = resp.json().await.context("staking: decode points body")?;
        Ok(extract_points(&body))
    }

    /// Point total for a token. Never fails: any error is logged and counts as 0.
    pub async fn fetch_points(&self, token_id: &str, nft_type: NftType) -> i64 {
        match self.try_fetch_points(token_id, nft_type).await {
            Ok(points) => points,
            Err(err) => {
                warn!(%token_id, nft_type = %nft_type, error = %err, "staking: points lookup failed; using 0");
                0
            }
        }
    }
}

#[async_trait::async_trait]
impl PointsSource for StakingProvider {
    async fn points(&self, token_id: &str, nft_type: NftType) -> Result<i64> {
        self.try_fetch_points(token_id, nft_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_non_null_field_wins() {
        assert_eq!(extract_points(&json!({"points": 42})), 42);
        assert_eq!(
            extract_points(&json!({"points": null, "totalPoints": 17, "stakingPoints": 3})),
            17
        );
        assert_eq!(extract_points(&json!({"stakingPoints": "250"})), 250);
        assert_eq!(extract_points(&json!({"message": "ok"})), 0);
    }

    #[test]
    fn points_are_never_negative() {
        assert_eq!(extract_points(&json!({"points": -5})), 0);
        assert_eq!(extract_points(&json!({"points": "abc"})), 0);
        assert_eq!(extract_points(&json!({"points": 12.9})), 12);
        assert_eq!(extract_points(&json!({"totalPoints": "7.5"})), 7);
    }

    #[test]
    fn trims_trailing_slash() {
        let provider = StakingProvider::new("https://staking.example/", 5).unwrap();
        assert_eq!(provider.base_url, "https://staking.example");
    }
}
