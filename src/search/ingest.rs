//! Ingestion pipeline - paper records in, persisted vectors out
//!
//! Each record moves `Pending → Filtered → Embedded → Persisted`, or ends in
//! `Failed`. Selection (limit, minimum year) runs before any embedding work.
//! Records are embedded in fixed-size batches and each batch is upserted as
//! soon as it is embedded, so at most one batch of vectors is in memory.
//!
//! If embedding a batch fails, its records are embedded one at a time; only
//! the records that still fail are marked failed and the run moves on.
//! Dimension mismatches and storage failures stop the run: they cannot be
//! skipped without losing data.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::embedding::{Embedder, EmbeddingVector};
use super::vectordb::{IndexEntry, PaperMetadata, VectorDB};
use crate::core::config::DEFAULT_BATCH_SIZE;
use crate::core::error::{Result, SearchError};
use crate::core::paper::{MalformedLine, PaperRecord};

/// Keep at most this many failure reasons in the report
const MAX_REPORTED_FAILURES: usize = 100;

/// Which records to ingest
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Maximum accepted records; 0 means no limit
    pub limit: usize,
    /// Inclusive minimum publication year
    pub min_year: Option<i32>,
    /// Clear the index before ingesting
    pub clean: bool,
}

impl IngestOptions {
    fn limit_reached(&self, accepted: usize) -> bool {
        self.limit > 0 && accepted >= self.limit
    }

    /// Records of unknown year never pass a year filter
    fn selects(&self, record: &PaperRecord) -> bool {
        match self.min_year {
            None => true,
            Some(min) => record.year.is_some_and(|year| year >= min),
        }
    }
}

/// Per-record lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    Pending,
    Filtered,
    Embedded,
    Persisted,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub id: String,
    pub reason: String,
}

/// Summary of one ingestion run
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped_filtered: usize,
    /// Empty text rejected by an embedder that does not accept it
    pub skipped_empty: usize,
    /// Unparseable input lines
    pub malformed: usize,
    pub failed: usize,
    pub batches: usize,
    /// Entries removed by `clean`
    pub cleared: usize,
    pub failures: Vec<RecordFailure>,
    pub duration_ms: u128,
}

impl IngestReport {
    fn record_failure(&mut self, id: &str, reason: &str) {
        self.failed += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(RecordFailure {
                id: id.to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

/// Outcome of a single batch, passed to the progress callback
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub batch: usize,
    pub records: usize,
    pub persisted: usize,
    pub failed: usize,
}

struct PendingRecord {
    record: PaperRecord,
    text: String,
    state: RecordState,
}

/// Writes paper embeddings into a [`VectorDB`]
pub struct IngestionPipeline<'a> {
    embedder: &'a dyn Embedder,
    db: &'a VectorDB,
    batch_size: usize,
    on_batch: Option<&'a dyn Fn(&BatchProgress)>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(embedder: &'a dyn Embedder, db: &'a VectorDB) -> Self {
        Self {
            embedder,
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            on_batch: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Called after every batch, successful or not
    pub fn on_batch(mut self, callback: &'a dyn Fn(&BatchProgress)) -> Self {
        self.on_batch = Some(callback);
        self
    }

    /// Ingest already-parsed records
    pub fn ingest_records(
        &self,
        records: impl IntoIterator<Item = PaperRecord>,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        self.run(records.into_iter().map(Ok), options)
    }

    /// Ingest a stream of parsed-or-malformed records
    ///
    /// The stream is consumed lazily and reading stops once `limit` records
    /// have been accepted.
    pub fn run<I>(&self, records: I, options: &IngestOptions) -> Result<IngestReport>
    where
        I: IntoIterator<Item = std::result::Result<PaperRecord, MalformedLine>>,
    {
        let start = Instant::now();
        let mut report = IngestReport::default();

        let spec = self.db.spec();
        if self.embedder.dimension() != spec.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: spec.dimension,
                actual: self.embedder.dimension(),
            });
        }

        if options.clean {
            report.cleared = self.db.clear()?;
        }

        let mut batch: Vec<PendingRecord> = Vec::with_capacity(self.batch_size);
        let mut accepted = 0usize;

        for item in records {
            if options.limit_reached(accepted) {
                break;
            }

            let record = match item {
                Ok(record) => record,
                Err(bad) => {
                    warn!("Skipping malformed line {}: {}", bad.line_number, bad.reason);
                    report.malformed += 1;
                    continue;
                }
            };
            if record.id.trim().is_empty() {
                warn!("Skipping record without id: '{}'", record.title);
                report.malformed += 1;
                continue;
            }
            if !options.selects(&record) {
                report.skipped_filtered += 1;
                continue;
            }

            let text = record.embedding_text();
            if text.trim().is_empty() && !self.embedder.accepts_empty() {
                warn!("Skipping {}: no embeddable text and the model rejects empty input", record.id);
                report.skipped_empty += 1;
                continue;
            }

            accepted += 1;
            batch.push(PendingRecord {
                record,
                text,
                state: RecordState::Filtered,
            });

            if batch.len() >= self.batch_size {
                self.process_batch(&mut batch, &mut report)?;
            }
        }

        if !batch.is_empty() {
            self.process_batch(&mut batch, &mut report)?;
        }

        report.duration_ms = start.elapsed().as_millis();
        info!(
            "Ingestion finished: ingested={}, skipped_filtered={}, failed={}, malformed={} in {}ms",
            report.ingested, report.skipped_filtered, report.failed, report.malformed, report.duration_ms
        );
        Ok(report)
    }

    /// Embed and persist one batch, draining it
    fn process_batch(&self, batch: &mut Vec<PendingRecord>, report: &mut IngestReport) -> Result<()> {
        report.batches += 1;
        let batch_no = report.batches;
        let failed_before = report.failed;

        let vectors = self.embed_pending(batch_no, batch, report)?;

        let mut entries = Vec::with_capacity(batch.len());
        for (pending, vector) in batch.iter_mut().zip(vectors) {
            let Some(vector) = vector else { continue };
            pending.state = RecordState::Embedded;
            entries.push(IndexEntry {
                id: pending.record.id.clone(),
                vector,
                metadata: PaperMetadata {
                    title: pending.record.title.clone(),
                    categories: pending.record.categories.clone(),
                    year: pending.record.year,
                },
            });
        }

        let mut persisted = 0;
        if !entries.is_empty() {
            // dimension and storage errors end the run
            persisted = self.db.upsert(&entries)?;
            for pending in batch.iter_mut().filter(|p| p.state == RecordState::Embedded) {
                pending.state = RecordState::Persisted;
            }
            debug!("Batch {}: persisted {} records", batch_no, persisted);
        }

        report.ingested += batch
            .iter()
            .filter(|p| p.state == RecordState::Persisted)
            .count();

        if let Some(callback) = self.on_batch {
            callback(&BatchProgress {
                batch: batch_no,
                records: batch.len(),
                persisted,
                failed: report.failed - failed_before,
            });
        }

        batch.clear();
        Ok(())
    }

    /// One vector per record, `None` where the record could not be embedded
    ///
    /// The batch is embedded in one call; when that fails, each record is
    /// embedded alone so one bad text does not cost the whole batch.
    fn embed_pending(
        &self,
        batch_no: usize,
        batch: &mut [PendingRecord],
        report: &mut IngestReport,
    ) -> Result<Vec<Option<EmbeddingVector>>> {
        let texts: Vec<&str> = batch.iter().map(|p| p.text.as_str()).collect();
        let embedded = self.embedder.embed_batch(&texts).and_then(|vectors| {
            if vectors.len() == texts.len() {
                Ok(vectors)
            } else {
                Err(SearchError::embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )))
            }
        });

        let reason = match embedded {
            Ok(vectors) => return Ok(vectors.into_iter().map(Some).collect()),
            Err(SearchError::Embedding(reason)) => reason,
            Err(other) => return Err(other),
        };
        warn!(
            "Batch {}: embedding failed ({}), retrying {} records one by one",
            batch_no,
            reason,
            batch.len()
        );

        let mut vectors = Vec::with_capacity(batch.len());
        for pending in batch.iter_mut() {
            match self.embedder.embed(&pending.text) {
                Ok(vector) => vectors.push(Some(vector)),
                Err(SearchError::Embedding(reason)) => {
                    debug!("Record {} failed to embed: {}", pending.record.id, reason);
                    report.record_failure(&pending.record.id, &reason);
                    pending.state = RecordState::Failed(reason);
                    vectors.push(None);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paper::RecordReader;
    use crate::search::embedding::{EmbeddingVector, HtpEmbedder};
    use crate::search::engine::SearchEngine;
    use crate::search::metric::DistanceMetric;
    use crate::search::vectordb::IndexSpec;
    use std::cell::RefCell;
    use std::io::Cursor;

    fn open_db(embedder: &dyn Embedder) -> Result<VectorDB> {
        VectorDB::open_in_memory(IndexSpec {
            dimension: embedder.dimension(),
            metric: DistanceMetric::Cosine,
            model_id: embedder.model_id().to_string(),
        })
    }

    fn papers(n: usize) -> Vec<PaperRecord> {
        (0..n)
            .map(|i| {
                PaperRecord::new(
                    format!("2{}01.{:05}", i % 4, i),
                    format!("Paper {} on topic {}", i, i % 7),
                    "cs.LG",
                    format!("Abstract number {}", i),
                )
            })
            .collect()
    }

    /// Fails any batch containing a poisoned text
    struct PoisonEmbedder(HtpEmbedder);

    impl Embedder for PoisonEmbedder {
        fn model_id(&self) -> &str {
            self.0.model_id()
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn embed(&self, text: &str) -> Result<EmbeddingVector> {
            if text.contains("POISON") {
                return Err(SearchError::embedding("poisoned input"));
            }
            self.0.embed(text)
        }
    }

    /// Claims 384 dimensions but produces 128
    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn model_id(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            384
        }

        fn embed(&self, _text: &str) -> Result<EmbeddingVector> {
            Ok(vec![0.1; 128])
        }
    }

    struct StrictEmbedder(HtpEmbedder);

    impl Embedder for StrictEmbedder {
        fn model_id(&self) -> &str {
            self.0.model_id()
        }

        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn accepts_empty(&self) -> bool {
            false
        }

        fn embed(&self, text: &str) -> Result<EmbeddingVector> {
            self.0.embed(text)
        }
    }

    #[test]
    fn test_ingest_all() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db).with_batch_size(7);

        let report = pipeline.ingest_records(papers(30), &IngestOptions::default())?;
        assert_eq!(report.ingested, 30);
        assert_eq!(report.failed, 0);
        assert_eq!(report.batches, 5);
        assert_eq!(db.count()?, 30);
        Ok(())
    }

    #[test]
    fn test_reingest_is_idempotent() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db).with_batch_size(8);

        pipeline.ingest_records(papers(20), &IngestOptions::default())?;
        let first = db.get("2001.00000")?.expect("first run entry");
        assert_eq!(db.count()?, 20);

        let report = pipeline.ingest_records(papers(20), &IngestOptions::default())?;
        assert_eq!(report.ingested, 20);
        assert_eq!(db.count()?, 20);
        assert_eq!(db.get("2001.00000")?.expect("second run entry"), first);
        Ok(())
    }

    #[test]
    fn test_batch_failure_does_not_abort_run() -> Result<()> {
        let embedder = PoisonEmbedder(HtpEmbedder::new());
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db).with_batch_size(10);

        let records: Vec<PaperRecord> = papers(50)
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                if (20..30).contains(&i) {
                    p.abstract_text = format!("POISON {}", i);
                }
                p
            })
            .collect();

        let report = pipeline.ingest_records(records, &IngestOptions::default())?;
        assert_eq!(report.ingested, 40);
        assert_eq!(report.failed, 10);
        assert_eq!(report.failures.len(), 10);
        assert!(report.failures.iter().all(|f| f.reason.contains("poisoned")));
        assert_eq!(db.count()?, 40);

        // the surviving records are searchable
        let engine = SearchEngine::new(&embedder, &db);
        let hits = engine.search("Paper 45 on topic 3 Abstract number 45", 1, None)?;
        assert_eq!(hits[0].id, "2101.00045");
        assert!(db.get("2001.00020")?.is_none());
        Ok(())
    }

    #[test]
    fn test_failed_records_do_not_sink_their_batch() -> Result<()> {
        let embedder = PoisonEmbedder(HtpEmbedder::new());
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db);

        // one default-size batch, bad records scattered through it
        let records: Vec<PaperRecord> = papers(50)
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                if i % 5 == 2 {
                    p.abstract_text = format!("POISON {}", i);
                }
                p
            })
            .collect();

        let report = pipeline.ingest_records(records, &IngestOptions::default())?;
        assert_eq!(report.batches, 1);
        assert_eq!((report.ingested, report.failed), (40, 10));
        assert_eq!(db.count()?, 40);
        assert!(db.get("2201.00002")?.is_none());
        assert!(db.get("2301.00003")?.is_some());

        let failed_ids: Vec<_> = report.failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed_ids[..2], ["2201.00002", "2301.00007"]);
        Ok(())
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() -> Result<()> {
        let embedder = ShortEmbedder;
        let db = open_db(&HtpEmbedder::new())?;
        let pipeline = IngestionPipeline::new(&embedder, &db);

        let err = pipeline
            .ingest_records(papers(5), &IngestOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::DimensionMismatch {
                expected: 384,
                actual: 128
            }
        ));
        assert_eq!(db.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_limit_and_year_filter() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db).with_batch_size(4);

        let records = vec![
            PaperRecord::new("hep-th/9901001", "Strings", "hep-th", "old"),
            PaperRecord::new("1501.00001", "Early", "cs.AI", "a"),
            PaperRecord::new("2001.00001", "One", "cs.AI", "b"),
            PaperRecord::new("no-year", "Undated", "cs.AI", "c"),
            PaperRecord::new("2101.00002", "Two", "cs.AI", "d"),
            PaperRecord::new("2201.00003", "Three", "cs.AI", "e"),
        ];
        let options = IngestOptions {
            limit: 2,
            min_year: Some(2020),
            clean: false,
        };

        let report = pipeline.ingest_records(records, &options)?;
        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped_filtered, 3);
        assert!(db.get("2001.00001")?.is_some());
        assert!(db.get("2101.00002")?.is_some());
        assert!(db.get("2201.00003")?.is_none());
        Ok(())
    }

    #[test]
    fn test_clean_rebuild() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db);

        pipeline.ingest_records(papers(10), &IngestOptions::default())?;
        let options = IngestOptions {
            clean: true,
            ..Default::default()
        };
        let report = pipeline.ingest_records(papers(3), &options)?;

        assert_eq!(report.cleared, 10);
        assert_eq!(db.count()?, 3);
        Ok(())
    }

    #[test]
    fn test_empty_text_skipped_when_model_rejects_it() -> Result<()> {
        let embedder = StrictEmbedder(HtpEmbedder::new());
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db);

        let records = vec![
            PaperRecord::new("2001.00001", "", "cs.AI", "  "),
            PaperRecord::new("2001.00002", "Titled", "cs.AI", ""),
        ];
        let report = pipeline.ingest_records(records, &IngestOptions::default())?;
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.ingested, 1);
        Ok(())
    }

    #[test]
    fn test_malformed_lines_counted() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let pipeline = IngestionPipeline::new(&embedder, &db);

        let data = concat!(
            r#"{"id":"2301.00001","title":"Good","abstract":"x","categories":"cs.AI"}"#,
            "\n",
            "garbage\n",
            r#"{"id":"","title":"No id","abstract":"y","categories":"cs.AI"}"#,
            "\n",
        );
        let report = pipeline.run(RecordReader::new(Cursor::new(data)), &IngestOptions::default())?;
        assert_eq!(report.ingested, 1);
        assert_eq!(report.malformed, 2);
        Ok(())
    }

    #[test]
    fn test_progress_callback() -> Result<()> {
        let embedder = HtpEmbedder::new();
        let db = open_db(&embedder)?;
        let seen = RefCell::new(Vec::new());
        let callback = |p: &BatchProgress| seen.borrow_mut().push((p.batch, p.records, p.persisted));
        let pipeline = IngestionPipeline::new(&embedder, &db)
            .with_batch_size(4)
            .on_batch(&callback);

        pipeline.ingest_records(papers(10), &IngestOptions::default())?;
        assert_eq!(*seen.borrow(), vec![(1, 4, 4), (2, 4, 4), (3, 2, 2)]);
        Ok(())
    }
}
