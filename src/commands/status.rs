//! Status command - index health and statistics

use anyhow::Result;
use colored::Colorize;

use arxiv_search::AppContext;

/// Run status command
pub fn run(ctx: &AppContext, json: bool) -> Result<()> {
    let db_path = &ctx.config.db_path;

    if !db_path.exists() {
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "status": "missing",
                    "indexed_count": 0,
                    "error": "Index not found"
                })
            );
        } else {
            println!(
                "{} Index not found. Run {} first.",
                "!".yellow().bold(),
                "arxiv ingest".cyan()
            );
        }
        return Ok(());
    }

    let db = ctx.open_index_read_only()?;
    let stats = db.get_stats()?;
    let file_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": "ok",
                "indexed_count": stats.entry_count,
                "dimension": stats.dimension,
                "metric": stats.metric,
                "model": stats.model_id,
                "last_indexed": stats.last_indexed,
                "file_size_bytes": file_size,
            })
        );
        return Ok(());
    }

    println!("{}", "Index Status".bold());
    println!();
    println!(
        "  {} {} papers indexed",
        "→".dimmed(),
        stats.entry_count.to_string().cyan()
    );
    println!(
        "  {} {} dimensions, {} distance",
        "→".dimmed(),
        stats.dimension,
        stats.metric
    );
    println!("  {} Model: {}", "→".dimmed(), stats.model_id);
    println!(
        "  {} Size: {:.2} MB",
        "→".dimmed(),
        file_size as f64 / (1024.0 * 1024.0)
    );
    if let Some(ts) = stats.last_indexed {
        let dt = chrono::DateTime::from_timestamp(ts, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        println!("  {} Last indexed: {}", "→".dimmed(), dt);
    }

    Ok(())
}
