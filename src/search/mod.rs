//! Semantic search core
//!
//! Write path: records → [`IngestionPipeline`] → [`Embedder`] → [`VectorDB`].
//! Read path: query → [`SearchEngine`] → [`Embedder`] → [`VectorDB`].

pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod metric;
pub mod vectordb;

pub use embedding::{Embedder, HtpEmbedder, EMBEDDING_DIM};
pub use engine::{SearchEngine, SearchResult};
pub use ingest::{IngestOptions, IngestReport, IngestionPipeline};
pub use metric::DistanceMetric;
pub use vectordb::{IndexEntry, IndexSpec, MetadataFilter, PaperMetadata, VectorDB};
