mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use arxiv_search::core::logging::setup_logging;
use arxiv_search::search::vectordb::MetadataFilter;
use arxiv_search::{AppContext, Config};

#[derive(Parser)]
#[command(name = "arxiv")]
#[command(about = "Semantic search over arXiv paper metadata", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed papers from the metadata snapshot into the index
    #[command(after_help = "Examples:
  arxiv ingest --limit 1000       Embed 1000 papers (default)
  arxiv ingest -l 0               Embed ALL papers
  arxiv ingest --year 2010        Embed papers from 2010 onwards
  arxiv ingest -y 2020 -l 5000    Embed 5000 papers from 2020 onwards
  arxiv ingest --clean -l 5000    Clear the index and embed 5000 papers")]
    Ingest {
        #[arg(short, long, default_value_t = 1000, help = "Number of papers to embed (0 for all)")]
        limit: usize,
        #[arg(short, long, help = "Only include papers from this year onwards")]
        year: Option<i32>,
        #[arg(short, long, help = "Delete existing embeddings before generating new ones")]
        clean: bool,
        #[arg(long, help = "Path to the JSON-lines metadata snapshot")]
        data: Option<PathBuf>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Semantic search over indexed papers
    Search {
        query: String,
        #[arg(short, long = "n-results", allow_negative_numbers = true, help = "Number of results")]
        n_results: Option<i64>,
        #[arg(long, help = "Only papers from this year onwards")]
        min_year: Option<i32>,
        #[arg(long, help = "Only papers up to this year")]
        max_year: Option<i32>,
        #[arg(long, help = "Category or archive, e.g. cs.LG or cs")]
        category: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show index status
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Remove a paper from the index by arXiv id
    Delete {
        id: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    /// Start MCP server (search and health tools over stdio)
    #[cfg(feature = "mcp")]
    Mcp,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    setup_logging(&config.log_level)?;
    let ctx = AppContext::new(config);

    match cli.command {
        Commands::Ingest {
            limit,
            year,
            clean,
            data,
            json,
        } => commands::ingest::run(
            &ctx,
            commands::ingest::IngestArgs {
                limit,
                year,
                clean,
                data,
                json,
            },
        ),
        Commands::Search {
            query,
            n_results,
            min_year,
            max_year,
            category,
            json,
        } => commands::search::run(
            &ctx,
            commands::search::SearchArgs {
                query,
                n_results,
                filter: MetadataFilter {
                    min_year,
                    max_year,
                    category,
                },
                json,
            },
        ),
        Commands::Status { json } => commands::status::run(&ctx, json),
        Commands::Delete { id, json } => commands::delete::run(&ctx, &id, json),

        #[cfg(feature = "mcp")]
        Commands::Mcp => run_mcp_server(ctx),
    }
}

#[cfg(feature = "mcp")]
fn run_mcp_server(ctx: AppContext) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcp::run_mcp_server(ctx))
}
