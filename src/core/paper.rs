//! Paper records and the arXiv metadata snapshot reader

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // 2301.12345 / 0704.0001 (April 2007 onwards)
    static ref NEW_STYLE_ID_RE: Regex = Regex::new(r"^(\d{2})(\d{2})\.\d{4,5}(v\d+)?$").unwrap();
    // hep-th/9901001, math.GT/0309136
    static ref OLD_STYLE_ID_RE: Regex =
        Regex::new(r"^[a-zA-Z\-]+(\.[A-Za-z\-]+)?/(\d{2})(\d{2})\d{3}(v\d+)?$").unwrap();
}

/// A paper as handed to the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub title: String,
    /// Space-delimited topic tags, e.g. "cs.LG stat.ML"
    pub categories: String,
    pub abstract_text: String,
    pub year: Option<i32>,
}

/// One line of the arXiv metadata snapshot (only the fields we use)
#[derive(Debug, Deserialize)]
struct RawArxivRecord {
    id: String,
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    categories: String,
    #[serde(default)]
    year: Option<i32>,
}

impl PaperRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        categories: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let year = year_from_arxiv_id(&id);
        Self {
            id,
            title: collapse_whitespace(&title.into()),
            categories: categories.into().trim().to_string(),
            abstract_text: collapse_whitespace(&abstract_text.into()),
            year,
        }
    }

    /// Parse a single snapshot line
    ///
    /// Titles and abstracts in the snapshot are hard-wrapped; newlines are
    /// folded into single spaces. When the line carries no explicit year it is
    /// derived from the arXiv id.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        let raw: RawArxivRecord = serde_json::from_str(line)?;
        let year = raw.year.or_else(|| year_from_arxiv_id(&raw.id));
        Ok(Self {
            title: collapse_whitespace(&raw.title),
            abstract_text: collapse_whitespace(&raw.abstract_text),
            categories: raw.categories.trim().to_string(),
            id: raw.id,
            year,
        })
    }

    /// Text fed to the embedder: title followed by abstract
    pub fn embedding_text(&self) -> String {
        match (self.title.is_empty(), self.abstract_text.is_empty()) {
            (false, false) => format!("{} {}", self.title, self.abstract_text),
            (false, true) => self.title.clone(),
            (true, _) => self.abstract_text.clone(),
        }
    }

    pub fn category_list(&self) -> Vec<&str> {
        self.categories.split_whitespace().collect()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Submission year encoded in an arXiv identifier
///
/// New-style ids are `YYMM.NNNNN`, old-style ids are `archive/YYMMNNN`.
/// arXiv started in 1991, so two-digit years from 91 up are 19xx.
pub fn year_from_arxiv_id(arxiv_id: &str) -> Option<i32> {
    let yy: i32 = if let Some(caps) = NEW_STYLE_ID_RE.captures(arxiv_id) {
        caps[1].parse().ok()?
    } else if let Some(caps) = OLD_STYLE_ID_RE.captures(arxiv_id) {
        caps[2].parse().ok()?
    } else {
        return None;
    };

    Some(if yy >= 91 { 1900 + yy } else { 2000 + yy })
}

/// A line of the snapshot that could not be turned into a record
#[derive(Debug)]
pub struct MalformedLine {
    pub line_number: usize,
    pub reason: String,
}

/// Streaming reader over a JSON-lines snapshot
///
/// Yields one item per non-blank line, so a multi-gigabyte snapshot is never
/// held in memory.
pub struct RecordReader<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open data file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = std::result::Result<PaperRecord, MalformedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_number += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(MalformedLine {
                        line_number: self.line_number,
                        reason: e.to_string(),
                    }))
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            return Some(PaperRecord::from_json_line(&line).map_err(|e| MalformedLine {
                line_number: self.line_number,
                reason: e.to_string(),
            }));
        }
    }
}
