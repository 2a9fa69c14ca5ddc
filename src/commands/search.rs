//! Search command - semantic paper search from the terminal

use anyhow::Result;
use colored::Colorize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use arxiv_search::search::vectordb::MetadataFilter;
use arxiv_search::{AppContext, DistanceMetric, SearchError};

const TITLE_WIDTH: usize = 90;

pub struct SearchArgs {
    pub query: String,
    pub n_results: Option<i64>,
    pub filter: MetadataFilter,
    pub json: bool,
}

/// Run search command
pub fn run(ctx: &AppContext, args: SearchArgs) -> Result<()> {
    if !ctx.config.db_path.exists() {
        println!(
            "{} Index not found. Run {} first.",
            "!".yellow().bold(),
            "arxiv ingest".cyan()
        );
        return Ok(());
    }

    let db = ctx.open_index_read_only()?;
    let engine = ctx.search_engine(&db);
    let n_results = args
        .n_results
        .unwrap_or(ctx.config.default_results as i64);

    let results = match engine.search(&args.query, n_results, Some(&args.filter)) {
        Ok(results) => results,
        Err(SearchError::Validation(msg)) => {
            eprintln!("{} {}", "Invalid request:".red().bold(), msg);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    let metric = engine.metric();

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "metric": metric,
                "results": results,
            }))?
        );
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), args.query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {} ({} distance)",
        "→".dimmed(),
        results.len(),
        args.query.cyan(),
        metric
    );
    println!();

    for (i, result) in results.iter().enumerate() {
        let score = match metric {
            // similarity is a display convenience for cosine only
            DistanceMetric::Cosine => {
                let similarity = 1.0 - result.distance;
                let text = format!("{:.2}", similarity);
                if similarity > 0.8 {
                    text.green()
                } else if similarity > 0.6 {
                    text.yellow()
                } else {
                    text.dimmed()
                }
            }
            DistanceMetric::L2 => format!("d={:.3}", result.distance).dimmed(),
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            score,
            truncate_to_width(&result.title, TITLE_WIDTH).cyan()
        );
        println!(
            "   {} | {} | https://arxiv.org/abs/{}",
            result.id,
            result.categories.dimmed(),
            result.id
        );
        println!();
    }

    Ok(())
}

/// Cut `text` to at most `width` terminal columns, marking the cut with "..."
fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width.saturating_sub(3) {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("abcdefghij", 8), "abcde...");
        // wide characters take two columns
        assert_eq!(truncate_to_width("양자컴퓨팅입니다", 9), "양자컴...");
    }
}
