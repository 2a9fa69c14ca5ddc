//! Process-wide state
//!
//! The embedder is created once at start-up and shared by reference between
//! the ingestion pipeline and the query engine. There is no global singleton:
//! whoever needs the model gets an [`AppContext`].

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::search::embedding::{Embedder, HtpEmbedder};
use crate::search::engine::SearchEngine;
use crate::search::ingest::IngestionPipeline;
use crate::search::vectordb::{IndexSpec, VectorDB};

#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<dyn Embedder>,
}

impl AppContext {
    /// Context with the built-in HTP embedder
    pub fn new(config: Config) -> Self {
        Self::with_embedder(config, Arc::new(HtpEmbedder::new()))
    }

    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            dimension: self.embedder.dimension(),
            metric: self.config.metric,
            model_id: self.embedder.model_id().to_string(),
        }
    }

    /// Open the configured index, creating its directory if needed
    pub fn open_index(&self) -> Result<VectorDB> {
        if let Some(parent) = self.config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        VectorDB::open(&self.config.db_path, self.index_spec())
    }

    /// Open the configured index for queries, without creating or changing it
    pub fn open_index_read_only(&self) -> Result<VectorDB> {
        VectorDB::open_read_only(&self.config.db_path, self.index_spec())
    }

    /// Open the configured index wiped for a full rebuild
    pub fn open_index_fresh(&self) -> Result<VectorDB> {
        if let Some(parent) = self.config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        VectorDB::open_fresh(&self.config.db_path, self.index_spec())
    }

    pub fn search_engine<'a>(&'a self, db: &'a VectorDB) -> SearchEngine<'a> {
        SearchEngine::new(self.embedder.as_ref(), db).with_max_results(self.config.max_results)
    }

    pub fn pipeline<'a>(&'a self, db: &'a VectorDB) -> IngestionPipeline<'a> {
        IngestionPipeline::new(self.embedder.as_ref(), db).with_batch_size(self.config.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paper::PaperRecord;
    use crate::search::ingest::IngestOptions;
    use crate::search::metric::DistanceMetric;

    fn context_in(dir: &std::path::Path) -> AppContext {
        let mut config = Config::from_root(dir);
        config.batch_size = 2;
        AppContext::new(config)
    }

    #[test]
    fn test_index_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context_in(dir.path());

        let before = {
            let db = ctx.open_index()?;
            ctx.pipeline(&db).ingest_records(
                vec![
                    PaperRecord::new("1234.5678", "Neural Networks", "cs.LG", ""),
                    PaperRecord::new("2101.00001", "Quantum error correction", "quant-ph", ""),
                    PaperRecord::new("2101.00002", "Galaxy rotation curves", "astro-ph.GA", ""),
                ],
                &IngestOptions::default(),
            )?;
            ctx.search_engine(&db).search("neural networks", 3, None)?
        };

        // a fresh context stands in for a new process
        let ctx = context_in(dir.path());
        let db = ctx.open_index()?;
        assert_eq!(db.count()?, 3);
        let after = ctx.search_engine(&db).search("neural networks", 3, None)?;
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn test_queries_leave_missing_index_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context_in(dir.path());

        let err = ctx.open_index_read_only().err().expect("no index yet");
        assert!(matches!(err, crate::core::error::SearchError::IndexUnavailable(_)));
        assert!(!ctx.config.db_path.exists());
    }

    #[test]
    fn test_fresh_open_reports_cleared() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context_in(dir.path());
        {
            let db = ctx.open_index()?;
            ctx.pipeline(&db).ingest_records(
                vec![
                    PaperRecord::new("2101.00001", "Quantum error correction", "quant-ph", ""),
                    PaperRecord::new("2101.00002", "Galaxy rotation curves", "astro-ph.GA", ""),
                ],
                &IngestOptions::default(),
            )?;
        }

        let db = ctx.open_index_fresh()?;
        assert_eq!(db.cleared_on_open(), 2);
        assert_eq!(db.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_spec_follows_config() {
        let mut config = Config::from_root(std::path::Path::new("."));
        config.metric = DistanceMetric::L2;
        let spec = AppContext::new(config).index_spec();

        assert_eq!(spec.dimension, 384);
        assert_eq!(spec.metric, DistanceMetric::L2);
        assert_eq!(spec.model_id, "htp-384-v1");
    }
}
