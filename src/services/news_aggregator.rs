//! Collects articles from every configured news source into one
//! de-duplicated, newest-first list.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::adapters::NewsSource;
use crate::domain::NewsArticle;
use crate::error::{Result, WalterError};

pub struct NewsAggregator {
    sources: Vec<Box<dyn NewsSource>>,
}

impl NewsAggregator {
    pub fn new(sources: Vec<Box<dyn NewsSource>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Fetch all sources in turn. A failing source is skipped; the call only
    /// fails when every configured source failed.
    pub async fn collect(&self) -> Result<Vec<NewsArticle>> {
        if self.sources.is_empty() {
            debug!("No news sources configured");
            return Ok(Vec::new());
        }

        let mut articles = Vec::new();
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.fetch().await {
                Ok(batch) => {
                    debug!("{} returned {} articles", source.name(), batch.len());
                    articles.extend(batch);
                }
                Err(e) => {
                    warn!("Skipping news source {}: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        if failures.len() == self.sources.len() {
            return Err(WalterError::NewsUnavailable(failures.join("; ")));
        }

        let merged = merge_articles(articles);
        info!(
            "Collected {} unique articles from {} of {} sources",
            merged.len(),
            self.sources.len() - failures.len(),
            self.sources.len()
        );
        Ok(merged)
    }
}

/// Drop empty and duplicate articles, newest first. Among duplicates the
/// newest copy wins.
pub fn merge_articles(mut articles: Vec<NewsArticle>) -> Vec<NewsArticle> {
    articles.retain(|a| !(a.title.trim().is_empty() && a.url.trim().is_empty()));
    // Undated articles sort last; ties keep a stable, content-based order
    articles.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.sort_key().cmp(&b.sort_key()))
    });

    let mut seen_urls = HashSet::new();
    let mut seen_titles = HashSet::new();
    articles
        .into_iter()
        .filter(|article| {
            let url_key = article.url_key();
            let title_key = article.title_key();
            let duplicate = url_key.as_ref().map_or(false, |k| seen_urls.contains(k))
                || title_key.as_ref().map_or(false, |k| seen_titles.contains(k));
            if duplicate {
                return false;
            }
            seen_urls.extend(url_key);
            seen_titles.extend(title_key);
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct StaticSource {
        name: &'static str,
        articles: Option<Vec<NewsArticle>>,
    }

    #[async_trait]
    impl NewsSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<NewsArticle>> {
            self.articles
                .clone()
                .ok_or_else(|| WalterError::NewsUnavailable(format!("{} is down", self.name)))
        }
    }

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_merge_dedupes_and_orders_newest_first() {
        let articles = vec![
            NewsArticle::new("cp", "ETH breaks 4k", "", "https://a.com/eth?utm=1").published(at(1)),
            NewsArticle::new("cc", "Fed holds rates", "", "https://b.com/fed").published(at(3)),
            NewsArticle::new("cc", "ETH  breaks 4K", "", "https://c.com/other").published(at(2)),
            NewsArticle::new("cp", "Different title", "", "http://www.c.com/other/").published(at(0)),
            NewsArticle::new("cp", "", "", ""),
            NewsArticle::new("cp", "No date", "", ""),
        ];

        let merged = merge_articles(articles);
        let titles: Vec<&str> = merged.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Fed holds rates", "ETH  breaks 4K", "No date"]);
    }

    #[tokio::test]
    async fn test_failing_source_is_skipped() {
        let aggregator = NewsAggregator::new(vec![
            Box::new(StaticSource {
                name: "down",
                articles: None,
            }),
            Box::new(StaticSource {
                name: "up",
                articles: Some(vec![NewsArticle::new("up", "Headline", "", "https://x.io/1")]),
            }),
        ]);

        let articles = aggregator.collect().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(aggregator.source_names(), vec!["down", "up"]);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_an_error() {
        let aggregator = NewsAggregator::new(vec![
            Box::new(StaticSource {
                name: "a",
                articles: None,
            }),
            Box::new(StaticSource {
                name: "b",
                articles: None,
            }),
        ]);

        let err = aggregator.collect().await.unwrap_err();
        assert!(matches!(err, WalterError::NewsUnavailable(_)));
        assert!(err.to_string().contains("b is down"));
    }

    #[tokio::test]
    async fn test_no_sources_yields_no_articles() {
        let aggregator = NewsAggregator::new(Vec::new());
        assert!(aggregator.collect().await.unwrap().is_empty());
    }
}
