//! Ingest command - embed arXiv papers into the search index

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use arxiv_search::core::paper::RecordReader;
use arxiv_search::search::ingest::{BatchProgress, IngestOptions};
use arxiv_search::AppContext;

pub struct IngestArgs {
    pub limit: usize,
    pub year: Option<i32>,
    pub clean: bool,
    pub data: Option<PathBuf>,
    pub json: bool,
}

/// Run ingest command
pub fn run(ctx: &AppContext, args: IngestArgs) -> Result<()> {
    let data_file = args.data.unwrap_or_else(|| ctx.config.data_file.clone());

    if !data_file.exists() {
        if args.json {
            println!(
                "{}",
                serde_json::json!({
                    "error": "Data file not found",
                    "data_file": data_file.display().to_string(),
                    "hint": "Download the arXiv metadata snapshot first"
                })
            );
        } else {
            eprintln!(
                "{} Data file not found at: {}",
                "Error:".red().bold(),
                data_file.display()
            );
            eprintln!();
            eprintln!("Download the arXiv metadata snapshot (JSON lines) from:");
            eprintln!("  https://www.kaggle.com/datasets/Cornell-University/arxiv");
            eprintln!("and pass it with {} or set ARXIV_SEARCH_DATA.", "--data".cyan());
        }
        std::process::exit(1);
    }

    if !args.json {
        println!("{}", "arXiv Embeddings Generator".bold());
        println!("Using model {}", ctx.embedder.model_id().cyan());
        let limit = if args.limit > 0 {
            args.limit.to_string()
        } else {
            "all".to_string()
        };
        let year = args
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "any".to_string());
        println!("  --limit: {}", limit);
        println!("  --year: {}", year);
        println!("  --clean: {}", args.clean);
        println!();
    }

    // A clean run may also change metric or model, so reset the stored spec
    let db = if args.clean {
        ctx.open_index_fresh()
    } else {
        ctx.open_index()
    }
    .with_context(|| format!("Failed to open index {}", ctx.config.db_path.display()))?;

    let reader = RecordReader::open(&data_file)?;
    // open_index_fresh has already wiped a clean run's index
    let options = IngestOptions {
        limit: args.limit,
        min_year: args.year,
        clean: false,
    };

    let progress = if args.json {
        ProgressBar::hidden()
    } else {
        let total_batches = (args.limit > 0)
            .then(|| args.limit.div_ceil(ctx.config.batch_size) as u64);
        let bar = match total_batches {
            Some(n) => ProgressBar::new(n),
            None => ProgressBar::new_spinner(),
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner} Embedding batches [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar
    };

    let on_batch = |p: &BatchProgress| {
        progress.inc(1);
        if p.failed > 0 {
            progress.set_message(format!("batch {} failed", p.batch));
        }
    };

    let mut report = ctx
        .pipeline(&db)
        .on_batch(&on_batch)
        .run(reader, &options)
        .context("Ingestion halted")?;
    progress.finish_and_clear();
    report.cleared = db.cleared_on_open();

    let count = db.count()?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "ingested": report.ingested,
                "skipped_filtered": report.skipped_filtered,
                "skipped_empty": report.skipped_empty,
                "malformed": report.malformed,
                "failed": report.failed,
                "failures": report.failures,
                "cleared": report.cleared,
                "duration_ms": report.duration_ms,
                "indexed_count": count,
            })
        );
    } else {
        if report.cleared > 0 {
            println!("{} Removed {} existing entries", "→".dimmed(), report.cleared);
        }
        println!(
            "{} Embedded {} papers in {:.2}s",
            "✓".green().bold(),
            report.ingested.to_string().cyan(),
            report.duration_ms as f64 / 1000.0
        );
        if report.skipped_filtered > 0 {
            println!(
                "  {} {} papers skipped (before {})",
                "→".dimmed(),
                report.skipped_filtered,
                args.year.map(|y| y.to_string()).unwrap_or_default()
            );
        }
        if report.skipped_empty > 0 {
            println!(
                "  {} {} papers skipped (no text)",
                "→".dimmed(),
                report.skipped_empty
            );
        }
        if report.malformed > 0 {
            println!(
                "  {} {} malformed lines",
                "!".yellow(),
                report.malformed
            );
        }
        if report.failed > 0 {
            println!("  {} {} papers failed", "✗".red(), report.failed);
            for failure in report.failures.iter().take(5) {
                println!("    {} {}", failure.id.dimmed(), failure.reason);
            }
        }
        println!("  {} Collection count: {}", "→".dimmed(), count);
        println!(
            "  {} Index saved to: {}",
            "→".dimmed(),
            ctx.config.db_path.display()
        );
    }

    Ok(())
}
