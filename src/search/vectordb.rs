//! Vector index using SQLite
//!
//! Vectors are stored as little-endian f32 BLOBs next to the display metadata
//! (title, categories, year), so a query never needs a second lookup.
//! Nearest neighbours are found by an exact scan with a bounded heap; the
//! table layout leaves room for an ANN extension (sqlite-vec, HNSW) later.
//!
//! The database runs in WAL mode. Each `upsert` call is one transaction, so
//! concurrent readers see a batch entirely or not at all.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::metric::DistanceMetric;
use crate::core::error::{Result, SearchError};

const META_DIMENSION: &str = "dimension";
const META_METRIC: &str = "metric";
const META_MODEL: &str = "model";
const META_LAST_INDEXED: &str = "last_indexed";

/// Shape of the vectors an index holds; fixed when the index is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub model_id: String,
}

/// Display metadata stored with each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub title: String,
    pub categories: String,
    pub year: Option<i32>,
}

/// `(id, vector, metadata)` as persisted in the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: PaperMetadata,
}

/// Predicate over entry metadata, applied before ranking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Inclusive lower bound on publication year
    pub min_year: Option<i32>,
    /// Inclusive upper bound on publication year
    pub max_year: Option<i32>,
    /// Category tag; `cs` matches `cs.LG`, `cs.LG` matches only itself
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.min_year.is_none() && self.max_year.is_none() && self.category.is_none()
    }

    pub fn matches(&self, metadata: &PaperMetadata) -> bool {
        if self.min_year.is_some() || self.max_year.is_some() {
            let Some(year) = metadata.year else {
                return false;
            };
            if self.min_year.is_some_and(|min| year < min) {
                return false;
            }
            if self.max_year.is_some_and(|max| year > max) {
                return false;
            }
        }

        match self.category.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(wanted) => metadata.categories.split_whitespace().any(|tag| {
                tag == wanted
                    || tag
                        .strip_prefix(wanted)
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub entry_count: usize,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub model_id: String,
    pub last_indexed: Option<i64>,
}

/// Persistent vector index for paper embeddings
pub struct VectorDB {
    conn: Connection,
    spec: IndexSpec,
    /// Entries wiped by `open_fresh`
    cleared: usize,
}

impl VectorDB {
    /// Open or create an index at `db_path`
    ///
    /// A new index records `spec`. An existing index must have been created
    /// with the same dimension and metric.
    pub fn open(db_path: &Path, spec: IndexSpec) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self::init(conn, spec)?;
        db.check_spec()?;
        Ok(db)
    }

    /// Open for a full rebuild: wipe all entries and re-record `spec`
    ///
    /// This is the only way to change the metric or dimension of an index.
    pub fn open_fresh(db_path: &Path, spec: IndexSpec) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut db = Self::init(conn, spec)?;
        db.cleared = db.reset()?;
        Ok(db)
    }

    /// Open an existing index for queries only
    ///
    /// Nothing is created or written. A missing file, or one that was never
    /// given a spec by ingestion, is `IndexUnavailable`.
    pub fn open_read_only(db_path: &Path, spec: IndexSpec) -> Result<Self> {
        if !db_path.exists() {
            return Err(SearchError::IndexUnavailable(format!(
                "no index at {}",
                db_path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db = Self {
            conn,
            spec,
            cleared: 0,
        };
        if !db.verify_spec()? {
            return Err(SearchError::IndexUnavailable(format!(
                "index at {} has not been built yet",
                db_path.display()
            )));
        }
        Ok(db)
    }

    /// In-memory index (for testing)
    pub fn open_in_memory(spec: IndexSpec) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self::init(conn, spec)?;
        db.check_spec()?;
        Ok(db)
    }

    fn init(conn: Connection, spec: IndexSpec) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                categories TEXT NOT NULL,
                year INTEGER,
                embedding BLOB NOT NULL,
                indexed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_papers_year ON papers(year);
            "#,
        )?;

        Ok(Self {
            conn,
            spec,
            cleared: 0,
        })
    }

    /// Record the spec on first use, otherwise verify it
    fn check_spec(&self) -> Result<()> {
        if self.verify_spec()? {
            Ok(())
        } else {
            self.write_spec()
        }
    }

    /// Compare against the stored spec; `false` if none is stored yet
    fn verify_spec(&self) -> Result<bool> {
        let stored_dim = self.get_meta(META_DIMENSION)?;
        let stored_metric = self.get_meta(META_METRIC)?;

        match (stored_dim, stored_metric) {
            (Some(dim), Some(metric)) => {
                let dim: usize = dim.parse().map_err(|_| {
                    SearchError::IndexUnavailable(format!("corrupt dimension in index metadata: {}", dim))
                })?;
                if dim != self.spec.dimension {
                    return Err(SearchError::DimensionMismatch {
                        expected: dim,
                        actual: self.spec.dimension,
                    });
                }
                let metric: DistanceMetric = metric.parse().map_err(|e: String| {
                    SearchError::IndexUnavailable(format!("corrupt index metadata: {}", e))
                })?;
                if metric != self.spec.metric {
                    return Err(SearchError::MetricMismatch {
                        stored: metric,
                        requested: self.spec.metric,
                    });
                }
                if let Some(model) = self.get_meta(META_MODEL)? {
                    if model != self.spec.model_id {
                        warn!(
                            "Index was built with model '{}' but '{}' is loaded; rebuild with --clean",
                            model, self.spec.model_id
                        );
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn write_spec(&self) -> Result<()> {
        self.set_meta(META_DIMENSION, &self.spec.dimension.to_string())?;
        self.set_meta(META_METRIC, self.spec.metric.as_str())?;
        self.set_meta(META_MODEL, &self.spec.model_id)?;
        Ok(())
    }

    /// Wipe entries and spec, then record the current spec
    fn reset(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM papers", [])?;
        tx.execute("DELETE FROM index_meta", [])?;
        tx.commit()?;
        self.write_spec()?;
        info!(
            "Index reset: removed {} entries; dimension={}, metric={}, model={}",
            removed, self.spec.dimension, self.spec.metric, self.spec.model_id
        );
        Ok(removed)
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn metric(&self) -> DistanceMetric {
        self.spec.metric
    }

    /// Number of entries `open_fresh` removed; 0 for any other open
    pub fn cleared_on_open(&self) -> usize {
        self.cleared
    }

    /// Insert or replace entries by id, atomically
    ///
    /// Every vector is dimension-checked before anything is written; a
    /// mismatch writes nothing. Returns the number of entries written.
    pub fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        for entry in entries {
            if entry.vector.len() != self.spec.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.spec.dimension,
                    actual: entry.vector.len(),
                });
            }
            if entry.id.trim().is_empty() {
                return Err(SearchError::validation("entry id must not be empty"));
            }
        }
        if entries.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO papers (id, title, categories, year, embedding, indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    categories = excluded.categories,
                    year = excluded.year,
                    embedding = excluded.embedding,
                    indexed_at = excluded.indexed_at
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.id,
                    entry.metadata.title,
                    entry.metadata.categories,
                    entry.metadata.year,
                    embedding_to_blob(&entry.vector),
                    now,
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![META_LAST_INDEXED, now.to_string()],
        )?;
        tx.commit()?;

        debug!("Upserted {} entries", entries.len());
        Ok(entries.len())
    }

    /// The `k` entries nearest to `vector`, ascending by distance
    ///
    /// Ties are broken by ascending id. An empty index yields an empty list.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexEntry, f32)>> {
        if vector.len() != self.spec.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Year bounds go to SQL; the category test runs per row
        let mut sql = String::from("SELECT id, title, categories, year, embedding FROM papers");
        let mut bounds: Vec<i32> = Vec::new();
        if let Some(f) = filter {
            let mut clauses = Vec::new();
            if let Some(min) = f.min_year {
                bounds.push(min);
                clauses.push(format!("year >= ?{}", bounds.len()));
            }
            if let Some(max) = f.max_year {
                bounds.push(max);
                clauses.push(format!("year <= ?{}", bounds.len()));
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bounds.iter()))?;

        let metric = self.spec.metric;
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);

        while let Some(row) = rows.next()? {
            let metadata = PaperMetadata {
                title: row.get(1)?,
                categories: row.get(2)?,
                year: row.get(3)?,
            };
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }

            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(4)?;
            let stored = blob_to_embedding(&blob, self.spec.dimension)
                .ok_or_else(|| SearchError::IndexUnavailable(format!("corrupt vector for '{}'", id)))?;
            let distance = metric.distance(vector, &stored);

            let candidate = Candidate {
                distance,
                entry: IndexEntry {
                    id,
                    vector: stored,
                    metadata,
                },
            };

            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| (c.entry, c.distance))
            .collect())
    }

    /// Total number of indexed entries
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every entry, keeping the index spec
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM papers", [])?;
        info!("Cleared {} entries from index", removed);
        Ok(removed)
    }

    /// Delete one entry; returns whether it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM papers WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, categories, year, embedding FROM papers WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        PaperMetadata {
                            title: row.get(1)?,
                            categories: row.get(2)?,
                            year: row.get(3)?,
                        },
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, metadata, blob)| {
            let vector = blob_to_embedding(&blob, self.spec.dimension)
                .ok_or_else(|| SearchError::IndexUnavailable(format!("corrupt vector for '{}'", id)))?;
            Ok(IndexEntry {
                id,
                vector,
                metadata,
            })
        })
        .transpose()
    }

    pub fn get_stats(&self) -> Result<IndexStats> {
        let last_indexed = self
            .get_meta(META_LAST_INDEXED)?
            .and_then(|v| v.parse::<i64>().ok());

        Ok(IndexStats {
            entry_count: self.count()?,
            dimension: self.spec.dimension,
            metric: self.spec.metric,
            model_id: self
                .get_meta(META_MODEL)?
                .unwrap_or_else(|| self.spec.model_id.clone()),
            last_indexed,
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

/// Heap item ordered by (distance, id)
struct Candidate {
    distance: f32,
    entry: IndexEntry,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.entry.id.cmp(&other.entry.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// `None` if the blob does not hold exactly `dimension` floats
fn blob_to_embedding(blob: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if blob.len() != dimension * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
