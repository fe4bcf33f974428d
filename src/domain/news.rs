use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw article as returned by one of the news sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub source: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsArticle {
    pub fn new(source: &str, title: &str, body: &str, url: &str) -> Self {
        Self {
            source: source.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            url: url.to_string(),
            published_at: None,
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    /// Normalized URL used for de-duplication (scheme, query and trailing
    /// slash stripped), `None` for articles without a link
    pub fn url_key(&self) -> Option<String> {
        let url = self.url.trim();
        if url.is_empty() {
            return None;
        }
        let without_scheme = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");
        let without_query = without_scheme
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(without_scheme);
        Some(without_query.trim_end_matches('/').to_lowercase())
    }

    /// Normalized title used for de-duplication
    pub fn title_key(&self) -> Option<String> {
        let key: String = self
            .title
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Stable key used to order narratives independently of fetch order
    pub fn sort_key(&self) -> String {
        self.title_key()
            .or_else(|| self.url_key())
            .unwrap_or_default()
    }
}

/// A cluster of articles discussing the same theme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub label: usize,
    /// Title of the most central member
    pub title: String,
    pub body: String,
    pub source_count: usize,
    pub member_titles: Vec<String>,
}

impl Narrative {
    pub fn headline(&self) -> String {
        format!("[{} sources] {} #{}", self.source_count, self.title, self.label)
    }
}

/// An unclustered article, kept apart from the narratives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondarySignal {
    pub title: String,
    pub body: String,
}

/// Output of one clustering pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeDigest {
    pub narratives: Vec<Narrative>,
    pub secondary_signals: Vec<SecondarySignal>,
}

impl NarrativeDigest {
    pub fn is_empty(&self) -> bool {
        self.narratives.is_empty() && self.secondary_signals.is_empty()
    }

    pub fn article_count(&self) -> usize {
        self.narratives.iter().map(|n| n.source_count).sum::<usize>() + self.secondary_signals.len()
    }
}
