use folio_storage::{format_size, CleanupAgent};

use super::Context;

pub fn run(ctx: &Context, confirm: bool, all: bool) -> anyhow::Result<()> {
    let agent = CleanupAgent::new(ctx.paths.clone()).with_state(all);

    if !confirm {
        let artifacts = agent.preview()?;
        let in_use = agent.in_use()?;
        if ctx.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "preview": artifacts,
                    "in_use": in_use,
                }))?
            );
            return Ok(());
        }
        if artifacts.is_empty() {
            println!("Nothing to clean up.");
        } else {
            let total: u64 = artifacts.iter().map(|a| a.size_bytes).sum();
            println!("Would remove {} item(s), {}:", artifacts.len(), format_size(total));
            for a in &artifacts {
                println!("  {:<22} {:>10}  {}", a.kind.describe(), format_size(a.size_bytes), a.path.display());
            }
            println!("Run with --confirm to delete them.");
        }
        for path in &in_use {
            println!("  in use, kept: {}", path.display());
        }
        return Ok(());
    }

    let report = agent.execute()?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Removed {} item(s), freed {}.",
            report.removed.len(),
            format_size(report.freed_bytes())
        );
        for path in &report.in_use {
            println!("  in use, kept: {}", path.display());
        }
        for (path, reason) in &report.failed {
            println!("  failed: {} ({})", path.display(), reason);
        }
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} item(s) could not be removed", report.failed.len());
    }
    Ok(())
}
