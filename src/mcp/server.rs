//! Paper search MCP server implementation
//!
//! Tools:
//! - `search`: semantic search (`{query, n_results}` → `{results, metric}`)
//! - `health`: index status (`{status, indexed_count, ...}`)
//!
//! Both tools open the index read-only; only ingestion creates or changes it.
//! Searches run on blocking threads behind a semaphore sized by
//! `embed_concurrency`, so a burst of requests queues instead of fanning out
//! unbounded model calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use arxiv_search::search::vectordb::MetadataFilter;
use arxiv_search::{AppContext, DistanceMetric, SearchError, SearchResult};

/// Pause before the single retry of a query that hit an unavailable index
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Parameters for the search tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Free-text query (e.g., "graph neural networks for molecules")
    #[schemars(description = "Natural language search query")]
    pub query: String,
    /// Number of results (default: 10, clamped to the configured maximum)
    #[schemars(description = "Number of results to return (default: 10, max: 100)")]
    #[serde(default)]
    pub n_results: Option<i64>,
    #[schemars(description = "Only papers from this year onwards")]
    #[serde(default)]
    pub min_year: Option<i32>,
    #[schemars(description = "Only papers up to this year")]
    #[serde(default)]
    pub max_year: Option<i32>,
    /// Category tag, e.g. "cs.LG", or an archive such as "cs"
    #[schemars(description = "arXiv category or archive, e.g. cs.LG or cs")]
    #[serde(default)]
    pub category: Option<String>,
}

impl SearchParams {
    fn filter(&self) -> MetadataFilter {
        MetadataFilter {
            min_year: self.min_year,
            max_year: self.max_year,
            category: self.category.clone(),
        }
    }
}

/// Response body of the search tool
#[derive(Debug, Serialize)]
struct SearchResponse {
    /// Lower is more similar; for cosine, similarity = 1 - distance
    metric: DistanceMetric,
    results: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    indexed_count: usize,
    dimension: usize,
    metric: DistanceMetric,
    model: String,
}

/// Paper search MCP service
#[derive(Clone)]
pub struct PaperSearchService {
    ctx: AppContext,
    gate: Arc<Semaphore>,
    tool_router: ToolRouter<Self>,
}

impl PaperSearchService {
    pub fn new(ctx: AppContext) -> Self {
        let permits = ctx.config.embed_concurrency;
        Self {
            ctx,
            gate: Arc::new(Semaphore::new(permits)),
            tool_router: Self::tool_router(),
        }
    }

    /// One search on a blocking thread, holding a gate permit throughout
    async fn search_once(&self, params: SearchParams) -> Result<SearchResponse, SearchError> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SearchError::Io(std::io::Error::other(e)))?;
        let ctx = self.ctx.clone();

        tokio::task::spawn_blocking(move || -> Result<SearchResponse, SearchError> {
            let _permit = permit;
            let db = ctx.open_index_read_only()?;
            let engine = ctx.search_engine(&db);
            let n_results = params
                .n_results
                .unwrap_or(ctx.config.default_results as i64);
            let results = engine.search(&params.query, n_results, Some(&params.filter()))?;
            Ok(SearchResponse {
                metric: engine.metric(),
                results,
            })
        })
        .await
        .map_err(|e| SearchError::Io(std::io::Error::other(e)))?
    }

    /// Retries once after a short pause if the index was unavailable
    async fn search_with_retry(&self, params: SearchParams) -> Result<SearchResponse, SearchError> {
        match self.search_once(params.clone()).await {
            Err(SearchError::IndexUnavailable(reason)) => {
                warn!("Index unavailable ({}), retrying in {:?}", reason, RETRY_BACKOFF);
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.search_once(params).await
            }
            other => other,
        }
    }
}

/// A missing index is reported, not created
fn health_report(ctx: &AppContext) -> Result<HealthResponse, SearchError> {
    if !ctx.config.db_path.exists() {
        let spec = ctx.index_spec();
        return Ok(HealthResponse {
            status: "missing",
            indexed_count: 0,
            dimension: spec.dimension,
            metric: spec.metric,
            model: spec.model_id,
        });
    }

    let db = ctx.open_index_read_only()?;
    let stats = db.get_stats()?;
    Ok(HealthResponse {
        status: "ok",
        indexed_count: stats.entry_count,
        dimension: stats.dimension,
        metric: stats.metric,
        model: stats.model_id,
    })
}

/// Caller mistakes are invalid params; everything else is a server fault
fn to_mcp_error(err: SearchError) -> McpError {
    if err.status_code() == 400 {
        McpError::invalid_params(err.to_string(), None)
    } else {
        McpError::internal_error(err.to_string(), None)
    }
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

#[tool_router]
impl PaperSearchService {
    /// Search papers by meaning
    #[tool(description = "Semantic search over arXiv paper titles and abstracts. Returns papers ranked by ascending distance (lower is more similar).")]
    async fn search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let response = self
            .search_with_retry(params.0)
            .await
            .map_err(to_mcp_error)?;
        json_content(&response)
    }

    /// Index health
    #[tool(description = "Report search index health: status, number of indexed papers, vector dimension, distance metric and model.")]
    async fn health(&self) -> Result<CallToolResult, McpError> {
        let ctx = self.ctx.clone();
        let response = tokio::task::spawn_blocking(move || health_report(&ctx))
            .await
            .map_err(|e| McpError::internal_error(format!("Health check failed: {}", e), None))?
            .map_err(to_mcp_error)?;

        json_content(&response)
    }
}

#[tool_handler]
impl ServerHandler for PaperSearchService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "arXiv paper search server. Use `search` for semantic search over titles and abstracts and `health` for index status.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server on stdio
pub async fn run_mcp_server(ctx: AppContext) -> Result<()> {
    use tokio::io::{stdin, stdout};

    info!(
        "Starting MCP server: index={}, concurrency={}",
        ctx.config.db_path.display(),
        ctx.config.embed_concurrency
    );

    let service = PaperSearchService::new(ctx);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
