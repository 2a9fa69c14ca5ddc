//! Query engine - embeds a query and reads nearest papers from the index
//!
//! Distances are returned exactly as the index computed them (lower is more
//! similar, see [`DistanceMetric`]); no re-ranking happens here.

use serde::Serialize;
use tracing::debug;

use super::embedding::Embedder;
use super::metric::DistanceMetric;
use super::vectordb::{IndexEntry, MetadataFilter, VectorDB};
use crate::core::config::DEFAULT_MAX_RESULTS;
use crate::core::error::{Result, SearchError};

/// A ranked hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub categories: String,
    pub distance: f32,
}

impl From<(IndexEntry, f32)> for SearchResult {
    fn from((entry, distance): (IndexEntry, f32)) -> Self {
        Self {
            id: entry.id,
            title: entry.metadata.title,
            categories: entry.metadata.categories,
            distance,
        }
    }
}

/// Read-only search over an index
pub struct SearchEngine<'a> {
    embedder: &'a dyn Embedder,
    db: &'a VectorDB,
    max_results: usize,
}

impl<'a> SearchEngine<'a> {
    pub fn new(embedder: &'a dyn Embedder, db: &'a VectorDB) -> Self {
        Self {
            embedder,
            db,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Cap on `n_results`; larger requests are clamped, not rejected
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn metric(&self) -> DistanceMetric {
        self.db.metric()
    }

    /// Papers nearest to `query`, ascending by distance
    ///
    /// Empty or whitespace-only queries and non-positive `n_results` are
    /// rejected before the embedder is called.
    pub fn search(
        &self,
        query: &str,
        n_results: i64,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::validation("query must not be empty"));
        }
        if n_results <= 0 {
            return Err(SearchError::validation(format!(
                "n_results must be between 1 and {}, got {}",
                self.max_results, n_results
            )));
        }
        let k = (n_results as u64).min(self.max_results as u64) as usize;

        let query_embedding = self.embedder.embed(query)?;
        if query_embedding.len() != self.db.spec().dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.db.spec().dimension,
                actual: query_embedding.len(),
            });
        }

        let filter = filter.filter(|f| !f.is_empty());
        let hits = self.db.query(&query_embedding, k, filter)?;
        debug!("Query '{}' returned {} of {} requested", query, hits.len(), k);

        Ok(hits.into_iter().map(SearchResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedding::{EmbeddingVector, HtpEmbedder};
    use crate::search::vectordb::{IndexSpec, PaperMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls so tests can assert the model was not touched
    struct CountingEmbedder {
        inner: HtpEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: HtpEmbedder::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed(&self, text: &str) -> Result<EmbeddingVector> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text)
        }
    }

    fn index_with(embedder: &dyn Embedder, papers: &[(&str, &str, &str)]) -> Result<VectorDB> {
        let db = VectorDB::open_in_memory(IndexSpec {
            dimension: embedder.dimension(),
            metric: DistanceMetric::Cosine,
            model_id: embedder.model_id().to_string(),
        })?;
        let entries = papers
            .iter()
            .map(|(id, title, categories)| {
                Ok(IndexEntry {
                    id: id.to_string(),
                    vector: embedder.embed(title)?,
                    metadata: PaperMetadata {
                        title: title.to_string(),
                        categories: categories.to_string(),
                        year: crate::core::paper::year_from_arxiv_id(id),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        db.upsert(&entries)?;
        Ok(db)
    }

    fn corpus(embedder: &dyn Embedder) -> Result<VectorDB> {
        index_with(
            embedder,
            &[
                ("1234.5678", "Neural Networks", "cs.LG"),
                ("2101.00001", "Quantum error correction codes", "quant-ph"),
                ("2101.00002", "Galaxy rotation curves", "astro-ph.GA"),
                ("2101.00003", "Convolutional neural networks for images", "cs.CV"),
                ("2101.00004", "Quantum annealing for optimisation", "quant-ph cs.ET"),
            ],
        )
    }

    #[test]
    fn test_round_trip_title_query() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = corpus(&embedder)?;
        let engine = SearchEngine::new(&embedder, &db);

        let results = engine.search("Neural Networks", 3, None)?;
        assert_eq!(results[0].id, "1234.5678");
        assert_eq!(results[0].title, "Neural Networks");
        assert_eq!(results[0].categories, "cs.LG");
        assert!(results[0].distance < 0.5);
        Ok(())
    }

    #[test]
    fn test_results_sorted_and_bounded() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = corpus(&embedder)?;
        let engine = SearchEngine::new(&embedder, &db);

        for n in 1..=6 {
            let results = engine.search("quantum networks", n, None)?;
            assert!(results.len() <= n as usize);
            assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
        Ok(())
    }

    #[test]
    fn test_empty_query_rejected_without_embedding() -> Result<()> {
        let embedder = CountingEmbedder::new();
        let db = corpus(&embedder)?;
        let before = embedder.calls.load(Ordering::SeqCst);
        let engine = SearchEngine::new(&embedder, &db);

        assert!(matches!(
            engine.search("", 10, None),
            Err(SearchError::Validation(_))
        ));
        assert!(matches!(
            engine.search("   \t\n", 10, None),
            Err(SearchError::Validation(_))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), before);
        Ok(())
    }

    #[test]
    fn test_n_results_bounds() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = corpus(&embedder)?;
        let engine = SearchEngine::new(&embedder, &db).with_max_results(2);

        assert!(matches!(
            engine.search("quantum", 0, None),
            Err(SearchError::Validation(_))
        ));
        assert!(matches!(
            engine.search("quantum", -3, None),
            Err(SearchError::Validation(_))
        ));
        assert_eq!(engine.search("quantum", 1000, None)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_default_max_results_clamp() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let papers: Vec<(String, String)> = (0..120)
            .map(|i| (format!("2201.{:05}", i), format!("quantum paper number {}", i)))
            .collect();
        let refs: Vec<(&str, &str, &str)> = papers
            .iter()
            .map(|(id, title)| (id.as_str(), title.as_str(), "quant-ph"))
            .collect();
        let db = index_with(&embedder, &refs)?;
        let engine = SearchEngine::new(&embedder, &db);

        assert_eq!(engine.search("quantum", 1000, None)?.len(), DEFAULT_MAX_RESULTS);
        Ok(())
    }

    #[test]
    fn test_search_with_filter() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = corpus(&embedder)?;
        let engine = SearchEngine::new(&embedder, &db);

        let filter = MetadataFilter {
            category: Some("quant-ph".to_string()),
            ..Default::default()
        };
        let results = engine.search("neural networks", 10, Some(&filter))?;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.categories.contains("quant-ph")));
        Ok(())
    }

    #[test]
    fn test_empty_index_returns_nothing() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = index_with(&embedder, &[])?;
        let engine = SearchEngine::new(&embedder, &db);
        assert!(engine.search("anything", 10, None)?.is_empty());
        Ok(())
    }
}
