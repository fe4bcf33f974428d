//! News feed clients.
//!
//! Each source maps its own payload into [`NewsArticle`]s. Sources never
//! de-duplicate; that happens once across all of them in the aggregator.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::{CryptoCompareConfig, CryptoPanicConfig, NewsConfig};
use crate::domain::NewsArticle;
use crate::error::{Result, WalterError};

#[async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<NewsArticle>>;
}

fn build_http(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("walter/0.1")
        .build()
        .map_err(|e| WalterError::Internal(format!("failed to build news HTTP client: {}", e)))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    source: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(WalterError::Upstream {
            service: source.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    debug!("{} returned {} bytes", source, body.len());
    serde_json::from_str(&body)
        .map_err(|e| WalterError::NewsUnavailable(format!("{}: unexpected payload: {}", source, e)))
}

// ==================== CryptoPanic ====================

#[derive(Debug, Deserialize)]
struct CryptoPanicResponse {
    #[serde(default)]
    results: Vec<CryptoPanicPost>,
}

#[derive(Debug, Deserialize)]
struct CryptoPanicPost {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    original_url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

impl CryptoPanicPost {
    fn into_article(self) -> NewsArticle {
        let url = self.url.or(self.original_url).unwrap_or_default();
        let article = NewsArticle::new(
            CryptoPanicSource::NAME,
            self.title.trim(),
            self.description.as_deref().unwrap_or("").trim(),
            url.trim(),
        );
        match self
            .published_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        {
            Some(at) => article.published(at.with_timezone(&Utc)),
            None => article,
        }
    }
}

pub struct CryptoPanicSource {
    http: Client,
    config: CryptoPanicConfig,
}

impl CryptoPanicSource {
    pub const NAME: &'static str = "CryptoPanic";

    pub fn new(config: &CryptoPanicConfig, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            config: config.clone(),
        })
    }

    fn query(&self, token: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("auth_token", token.to_string()),
            ("filter", self.config.filter.clone()),
            ("public", "true".to_string()),
            ("kind", self.config.kind.clone()),
        ];
        if let Some(currencies) = self.config.currencies.as_deref().filter(|c| !c.is_empty()) {
            params.push(("currencies", currencies.to_string()));
        }
        params
    }
}

#[async_trait]
impl NewsSource for CryptoPanicSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Vec<NewsArticle>> {
        let token = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WalterError::NewsUnavailable("CryptoPanic: no API key".to_string()))?;

        let response = self
            .http
            .get(&self.config.url)
            .query(&self.query(token))
            .send()
            .await?;

        let payload: CryptoPanicResponse = read_json(Self::NAME, response).await?;
        Ok(payload.results.into_iter().map(CryptoPanicPost::into_article).collect())
    }
}

// ==================== CryptoCompare ====================

#[derive(Debug, Deserialize)]
struct CryptoCompareResponse {
    #[serde(rename = "Data", default)]
    data: Vec<CryptoCompareItem>,
}

#[derive(Debug, Deserialize)]
struct CryptoCompareItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_on: Option<i64>,
}

impl CryptoCompareItem {
    fn into_article(self) -> NewsArticle {
        let article = NewsArticle::new(
            CryptoCompareSource::NAME,
            self.title.trim(),
            self.body.trim(),
            self.url.trim(),
        );
        match self
            .published_on
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        {
            Some(at) => article.published(at),
            None => article,
        }
    }
}

pub struct CryptoCompareSource {
    http: Client,
    config: CryptoCompareConfig,
}

impl CryptoCompareSource {
    pub const NAME: &'static str = "CryptoCompare";

    pub fn new(config: &CryptoCompareConfig, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout_secs)?,
            config: config.clone(),
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(feeds) = self.config.feeds.as_deref().filter(|f| !f.is_empty()) {
            params.push(("feeds", feeds.to_string()));
        }
        if let Some(categories) = self.config.categories.as_deref().filter(|c| !c.is_empty()) {
            params.push(("categories", categories.to_string()));
        }
        if !self.config.sort_order.is_empty() {
            params.push(("sortOrder", self.config.sort_order.clone()));
        }
        params
    }
}

#[async_trait]
impl NewsSource for CryptoCompareSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Vec<NewsArticle>> {
        let mut request = self.http.get(&self.config.url).query(&self.query());
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("authorization", format!("Apikey {}", key));
        }

        let response = request.send().await?;
        let payload: CryptoCompareResponse = read_json(Self::NAME, response).await?;
        Ok(payload.data.into_iter().map(CryptoCompareItem::into_article).collect())
    }
}

/// Build every enabled source from configuration
pub fn build_sources(config: &NewsConfig) -> Result<Vec<Box<dyn NewsSource>>> {
    let mut sources: Vec<Box<dyn NewsSource>> = Vec::new();
    if config.cryptopanic.enabled {
        sources.push(Box::new(CryptoPanicSource::new(
            &config.cryptopanic,
            config.timeout_secs,
        )?));
    }
    if config.cryptocompare.enabled {
        sources.push(Box::new(CryptoCompareSource::new(
            &config.cryptocompare,
            config.timeout_secs,
        )?));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cryptopanic_post_mapping() {
        let payload: CryptoPanicResponse = serde_json::from_value(json!({
            "results": [{
                "title": "  ETH ETF inflows hit record ",
                "description": "Spot products saw $1bn",
                "published_at": "2024-05-01T12:00:00Z",
                "original_url": "https://example.com/eth-etf"
            }]
        }))
        .unwrap();

        let article = payload.results.into_iter().next().unwrap().into_article();
        assert_eq!(article.source, "CryptoPanic");
        assert_eq!(article.title, "ETH ETF inflows hit record");
        assert_eq!(article.url, "https://example.com/eth-etf");
        assert_eq!(
            article.published_at.unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_cryptocompare_item_mapping() {
        let payload: CryptoCompareResponse = serde_json::from_value(json!({
            "Type": 100,
            "Data": [{"title": "Ether rallies", "body": "Buyers return", "url": "https://x.io/a", "published_on": 1714564800}]
        }))
        .unwrap();

        let article = payload.data.into_iter().next().unwrap().into_article();
        assert_eq!(article.source, "CryptoCompare");
        assert_eq!(article.body, "Buyers return");
        assert_eq!(article.published_at.unwrap().timestamp(), 1714564800);
    }

    #[test]
    fn test_query_parameters() {
        let config = crate::config::AppConfig::defaults().unwrap().news;

        let panic = CryptoPanicSource::new(&config.cryptopanic, 5).unwrap();
        let params = panic.query("tok");
        assert!(params.contains(&("public", "true".to_string())));
        assert!(params.contains(&("currencies", "ETH".to_string())));

        let compare = CryptoCompareSource::new(&config.cryptocompare, 5).unwrap();
        let params = compare.query();
        assert!(params.contains(&("sortOrder", "popular".to_string())));
        assert!(params.contains(&("categories", "ETH".to_string())));
    }

    #[tokio::test]
    async fn test_cryptopanic_without_key_is_unavailable() {
        let mut config = crate::config::AppConfig::defaults().unwrap().news.cryptopanic;
        config.api_key = None;
        let source = CryptoPanicSource::new(&config, 5).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, WalterError::NewsUnavailable(_)));
    }

    #[test]
    fn test_build_sources_respects_enabled_flags() {
        let mut config = crate::config::AppConfig::defaults().unwrap().news;
        assert_eq!(build_sources(&config).unwrap().len(), 2);

        config.cryptopanic.enabled = false;
        let sources = build_sources(&config).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), "CryptoCompare");
    }
}
