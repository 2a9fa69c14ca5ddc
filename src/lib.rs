//! arxiv-search library
//!
//! Semantic search over arXiv paper metadata.
//!
//! # Modules
//!
//! - `core`: configuration, errors, logging and paper records
//! - `search`: embedder, vector index, ingestion pipeline and query engine
//! - `context`: process-wide embedder and config shared by both paths

pub mod context;
pub mod core;
pub mod search;

// Re-exports for convenience
pub use context::AppContext;
pub use crate::core::config::Config;
pub use crate::core::error::{Result, SearchError};
pub use crate::core::paper::{year_from_arxiv_id, PaperRecord, RecordReader};
pub use search::{
    DistanceMetric, Embedder, HtpEmbedder, IndexSpec, IngestOptions, IngestReport,
    IngestionPipeline, MetadataFilter, SearchEngine, SearchResult, VectorDB,
};
