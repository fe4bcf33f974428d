//! Text normalization applied before embedding

use regex::Regex;

use crate::domain::NewsArticle;
use crate::error::{Result, WalterError};

/// Filler phrases that carry no narrative signal
pub const CLICKBAIT_TERMS: &[&str] = &["heres", "could", "might", "skyrocket", "why", "what happened"];

#[derive(Debug, Clone)]
pub struct TextPreparer {
    body_chars: usize,
    non_alnum: Regex,
    clickbait: Regex,
    whitespace: Regex,
}

impl TextPreparer {
    pub fn new(body_chars: usize) -> Result<Self> {
        let alternation = CLICKBAIT_TERMS
            .iter()
            .map(|term| regex::escape(term).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            body_chars,
            non_alnum: compile(r"[^a-z0-9\s]")?,
            clickbait: compile(&format!(r"\b(?:{})\b", alternation))?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// `title + " " + body prefix`, lower-cased and stripped to `[a-z0-9 ]`
    pub fn prepare(&self, article: &NewsArticle) -> String {
        let body: String = article.body.chars().take(self.body_chars).collect();
        let text = format!("{} {}", article.title, body).to_lowercase();

        let text = self.non_alnum.replace_all(&text, " ");
        let text = self.clickbait.replace_all(&text, " ");
        self.whitespace.replace_all(&text, " ").trim().to_string()
    }

    pub fn prepare_all(&self, articles: &[NewsArticle]) -> Vec<String> {
        articles.iter().map(|a| self.prepare(a)).collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| WalterError::Internal(format!("bad pattern {}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_strips_punctuation_and_case() {
        let preparer = TextPreparer::new(200).unwrap();
        let article = NewsArticle::new("t", "ETH Breaks $4,000!", "Bulls are back.", "");
        assert_eq!(preparer.prepare(&article), "eth breaks 4 000 bulls are back");
    }

    #[test]
    fn test_prepare_removes_clickbait_words_only() {
        let preparer = TextPreparer::new(200).unwrap();
        let article = NewsArticle::new(
            "t",
            "Heres why ETH could skyrocket",
            "What happened overnight? Whyte mighty",
            "",
        );
        assert_eq!(preparer.prepare(&article), "eth overnight whyte mighty");
    }

    #[test]
    fn test_prepare_truncates_body_by_chars() {
        let preparer = TextPreparer::new(5).unwrap();
        let article = NewsArticle::new("t", "Title", "ééééé tail that is dropped", "");
        assert_eq!(preparer.prepare(&article), "title");

        let preparer = TextPreparer::new(9).unwrap();
        let article = NewsArticle::new("t", "Title", "abcd efgh ijkl", "");
        assert_eq!(preparer.prepare(&article), "title abcd efgh");
    }
}
