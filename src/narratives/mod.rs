//! Groups the cycle's articles into market narratives.
//!
//! Articles are put into a canonical order (by normalized title) before
//! anything else, so the digest depends only on the article set, the
//! embeddings and the clustering parameters.

pub mod dbscan;
pub mod text;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::{l2_normalize, Embedder};
use crate::config::NarrativeConfig;
use crate::domain::{Narrative, NarrativeDigest, NewsArticle, SecondarySignal};
use crate::error::{Result, WalterError};

pub use dbscan::{cosine_distance, cosine_similarity, Dbscan};
pub use text::TextPreparer;

pub struct NarrativeClusterer {
    preparer: TextPreparer,
    dbscan: Dbscan,
    embedder: Arc<dyn Embedder>,
}

impl NarrativeClusterer {
    pub fn new(config: &NarrativeConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self {
            preparer: TextPreparer::new(config.body_chars)?,
            dbscan: Dbscan::new(config.eps, config.min_samples),
            embedder,
        })
    }

    /// Cluster the articles, degrading to an empty digest when embedding fails
    pub async fn summarize(&self, articles: &[NewsArticle]) -> NarrativeDigest {
        match self.try_summarize(articles).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Narrative clustering unavailable, continuing without news: {}", e);
                NarrativeDigest::default()
            }
        }
    }

    pub async fn try_summarize(&self, articles: &[NewsArticle]) -> Result<NarrativeDigest> {
        if articles.is_empty() {
            return Ok(NarrativeDigest::default());
        }

        let ordered = canonical_order(articles);
        let texts = self.preparer.prepare_all(&ordered);
        let mut embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != ordered.len() {
            return Err(WalterError::Embedding(format!(
                "expected {} embeddings, got {}",
                ordered.len(),
                embeddings.len()
            )));
        }
        embeddings.iter_mut().for_each(|v| l2_normalize(v));

        let digest = self.cluster_ordered(&ordered, &embeddings);
        info!(
            "Clustered {} articles into {} narratives ({} secondary signals)",
            articles.len(),
            digest.narratives.len(),
            digest.secondary_signals.len()
        );
        Ok(digest)
    }

    /// Cluster articles with precomputed, index-aligned embeddings
    pub fn cluster(&self, articles: &[NewsArticle], embeddings: &[Vec<f32>]) -> NarrativeDigest {
        let mut pairs: Vec<(NewsArticle, Vec<f32>)> = articles
            .iter()
            .cloned()
            .zip(embeddings.iter().cloned())
            .collect();
        pairs.sort_by(|a, b| a.0.sort_key().cmp(&b.0.sort_key()));
        let (ordered, mut vectors): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        vectors.iter_mut().for_each(|v: &mut Vec<f32>| l2_normalize(v));
        self.cluster_ordered(&ordered, &vectors)
    }

    fn cluster_ordered(&self, articles: &[NewsArticle], vectors: &[Vec<f32>]) -> NarrativeDigest {
        let labels = self.dbscan.fit(vectors);
        let (mut clusters, noise) = dbscan::group_labels(&labels);

        // Largest first; members are already in canonical order so the first
        // member index is the smallest key
        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

        let narratives = clusters
            .iter()
            .enumerate()
            .filter_map(|(label, members)| {
                let central = dbscan::most_central(members, vectors)?;
                let representative = &articles[members[central]];
                debug!(
                    "Narrative #{} ({} articles): {}",
                    label,
                    members.len(),
                    representative.title
                );
                Some(Narrative {
                    label,
                    title: display_title(representative),
                    body: representative.body.clone(),
                    source_count: members.len(),
                    member_titles: members.iter().map(|&i| display_title(&articles[i])).collect(),
                })
            })
            .collect();

        let secondary_signals = noise
            .iter()
            .map(|&i| SecondarySignal {
                title: display_title(&articles[i]),
                body: articles[i].body.clone(),
            })
            .collect();

        NarrativeDigest {
            narratives,
            secondary_signals,
        }
    }
}

fn canonical_order(articles: &[NewsArticle]) -> Vec<NewsArticle> {
    let mut ordered = articles.to_vec();
    ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    ordered
}

fn display_title(article: &NewsArticle) -> String {
    if article.title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        article.title.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<(String, Vec<f32>)>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|text| {
                    self.0
                        .iter()
                        .find(|(needle, _)| text.contains(needle.as_str()))
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| WalterError::Embedding(format!("no vector for {}", text)))
                })
                .collect()
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(WalterError::Embedding("service down".to_string()))
        }
    }

    fn config() -> NarrativeConfig {
        crate::config::AppConfig::defaults().unwrap().narratives
    }

    fn articles() -> Vec<NewsArticle> {
        vec![
            NewsArticle::new("a", "ETH ETF sees record inflows", "Bullish demand", "u1"),
            NewsArticle::new("b", "Record inflows into ETH ETFs", "Institutions buy", "u2"),
            NewsArticle::new("c", "Exchange hack drains hot wallet", "Bearish", "u3"),
        ]
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(FixedEmbedder(vec![
            ("eth etf sees".to_string(), vec![0.9, 0.1, 0.0]),
            ("into eth etfs".to_string(), vec![0.85, 0.15, 0.05]),
            ("exchange hack".to_string(), vec![0.0, 0.1, 0.95]),
        ]))
    }

    #[tokio::test]
    async fn test_two_similar_one_unrelated() {
        let clusterer = NarrativeClusterer::new(&config(), embedder()).unwrap();
        let digest = clusterer.try_summarize(&articles()).await.unwrap();

        assert_eq!(digest.narratives.len(), 1);
        assert_eq!(digest.narratives[0].source_count, 2);
        assert_eq!(digest.narratives[0].label, 0);
        assert_eq!(digest.secondary_signals.len(), 1);
        assert_eq!(digest.secondary_signals[0].title, "Exchange hack drains hot wallet");
        assert_eq!(digest.article_count(), 3);
    }

    #[tokio::test]
    async fn test_permutation_gives_identical_digest() {
        let clusterer = NarrativeClusterer::new(&config(), embedder()).unwrap();
        let forward = clusterer.try_summarize(&articles()).await.unwrap();

        let mut reversed = articles();
        reversed.reverse();
        let backward = clusterer.try_summarize(&reversed).await.unwrap();
        let again = clusterer.try_summarize(&articles()).await.unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward, again);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_empty_digest() {
        let clusterer = NarrativeClusterer::new(&config(), Arc::new(FailingEmbedder)).unwrap();
        let digest = clusterer.summarize(&articles()).await;
        assert!(digest.is_empty());
    }

    #[test]
    fn test_clusters_ordered_by_size_then_key() {
        let clusterer = NarrativeClusterer::new(&config(), Arc::new(FailingEmbedder)).unwrap();
        let articles = vec![
            NewsArticle::new("a", "b pair one", "", ""),
            NewsArticle::new("a", "b pair two", "", ""),
            NewsArticle::new("a", "a pair one", "", ""),
            NewsArticle::new("a", "a pair two", "", ""),
            NewsArticle::new("a", "c triple one", "", ""),
            NewsArticle::new("a", "c triple two", "", ""),
            NewsArticle::new("a", "c triple three", "", ""),
        ];
        let embeddings = vec![
            vec![0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.01],
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.01, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.01, 0.0, 1.0],
            vec![0.0, 0.01, 1.0],
        ];

        let digest = clusterer.cluster(&articles, &embeddings);
        let sizes: Vec<usize> = digest.narratives.iter().map(|n| n.source_count).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert!(digest.narratives[1].title.starts_with("a pair"));
        assert!(digest.narratives[2].title.starts_with("b pair"));
        assert!(digest.secondary_signals.is_empty());
    }
}
