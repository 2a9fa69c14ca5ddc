//! Delete command - remove a single paper from the index

use anyhow::Result;
use colored::Colorize;

use arxiv_search::AppContext;

/// Run delete command
pub fn run(ctx: &AppContext, id: &str, json: bool) -> Result<()> {
    let db = ctx.open_index()?;
    let removed = db.delete(id)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "id": id,
                "deleted": removed,
                "indexed_count": db.count()?,
            })
        );
    } else if removed {
        println!("{} Deleted {}", "✓".green().bold(), id.cyan());
    } else {
        println!("{} No paper with id {}", "!".yellow().bold(), id.cyan());
    }

    Ok(())
}
