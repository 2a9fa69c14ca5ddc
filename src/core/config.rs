//! Runtime configuration
//!
//! Built once at process start: defaults, then `arxiv-search.yaml` in the
//! working directory if present, then `ARXIV_SEARCH_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::search::metric::DistanceMetric;

pub const CONFIG_FILE_NAME: &str = "arxiv-search.yaml";

/// Upper bound on results per query unless configured otherwise
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Papers per embedding batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite index file
    pub db_path: PathBuf,
    /// arXiv metadata snapshot (JSON lines)
    pub data_file: PathBuf,
    pub batch_size: usize,
    pub max_results: usize,
    pub default_results: usize,
    pub metric: DistanceMetric,
    /// Concurrent embedding calls allowed in the tool server
    pub embed_concurrency: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_root(Path::new("."))
    }
}

impl Config {
    /// Default layout rooted at `root`
    pub fn from_root(root: &Path) -> Self {
        Self {
            db_path: root.join("data/arxiv_papers.db"),
            data_file: root.join("arxiv-metadata-oai-snapshot.json"),
            batch_size: DEFAULT_BATCH_SIZE,
            max_results: DEFAULT_MAX_RESULTS,
            default_results: 10,
            metric: DistanceMetric::Cosine,
            embed_concurrency: 4,
            log_level: "info".to_string(),
        }
    }

    /// Load configuration for the current working directory
    pub fn load() -> Result<Self> {
        let root = std::env::current_dir().context("Failed to get current directory")?;
        Self::load_from(&root)
    }

    pub fn load_from(root: &Path) -> Result<Self> {
        let file = root.join(CONFIG_FILE_NAME);
        let mut config = if file.exists() {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            Self::from_yaml(root, &text)
                .with_context(|| format!("Invalid config file {}", file.display()))?
        } else {
            Self::from_root(root)
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML, resolving relative paths against `root`
    fn from_yaml(root: &Path, text: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)?;
        if config.db_path.is_relative() {
            config.db_path = root.join(&config.db_path);
        }
        if config.data_file.is_relative() {
            config.data_file = root.join(&config.data_file);
        }
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("ARXIV_SEARCH_DB") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = var("ARXIV_SEARCH_DATA") {
            self.data_file = PathBuf::from(path);
        }
        if let Some(value) = var("ARXIV_SEARCH_BATCH_SIZE") {
            self.batch_size = value
                .parse()
                .with_context(|| format!("ARXIV_SEARCH_BATCH_SIZE: invalid number '{}'", value))?;
        }
        if let Some(value) = var("ARXIV_SEARCH_MAX_RESULTS") {
            self.max_results = value
                .parse()
                .with_context(|| format!("ARXIV_SEARCH_MAX_RESULTS: invalid number '{}'", value))?;
        }
        if let Some(value) = var("ARXIV_SEARCH_CONCURRENCY") {
            self.embed_concurrency = value
                .parse()
                .with_context(|| format!("ARXIV_SEARCH_CONCURRENCY: invalid number '{}'", value))?;
        }
        if let Some(value) = var("ARXIV_SEARCH_METRIC") {
            self.metric = value
                .parse()
                .map_err(|e: String| anyhow::anyhow!("ARXIV_SEARCH_METRIC: {}", e))?;
        }
        if let Some(level) = var("ARXIV_SEARCH_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_results == 0 {
            bail!("max_results must be at least 1");
        }
        if self.default_results == 0 || self.default_results > self.max_results {
            bail!(
                "default_results must be between 1 and max_results ({})",
                self.max_results
            );
        }
        if self.embed_concurrency == 0 {
            bail!("embed_concurrency must be at least 1");
        }
        Ok(())
    }
}
