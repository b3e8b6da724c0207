use folio_core::{NotebookHints, Operation, ToggleMode};
use std::path::PathBuf;

use super::Context;

pub async fn add_url(ctx: &Context, hints: NotebookHints, url: String) -> anyhow::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("'{}' is not an http(s) URL", url);
    }
    ctx.execute(hints, Operation::AddUrlSource { url }).await?;
    Ok(())
}

pub async fn add_file(ctx: &Context, hints: NotebookHints, path: PathBuf) -> anyhow::Result<()> {
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    ctx.execute(hints, Operation::AddFileSource { path }).await?;
    Ok(())
}

pub async fn list(ctx: &Context, hints: NotebookHints) -> anyhow::Result<()> {
    ctx.execute(hints, Operation::ListSources).await?;
    Ok(())
}

pub async fn remove(ctx: &Context, hints: NotebookHints, source: String, confirm: bool) -> anyhow::Result<()> {
    ctx.execute(hints, Operation::RemoveSource { source, confirm }).await?;
    Ok(())
}

pub async fn download(
    ctx: &Context,
    hints: NotebookHints,
    source: String,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(path) = output.as_ref().filter(|p| p.is_dir()) {
        anyhow::bail!("{} is a directory; pass a file path", path.display());
    }
    let output = output.map(|p| match std::env::current_dir() {
        Ok(cwd) if p.is_relative() => cwd.join(p),
        _ => p,
    });
    ctx.execute(hints, Operation::DownloadSource { source, output }).await?;
    Ok(())
}

pub async fn toggle(
    ctx: &Context,
    hints: NotebookHints,
    source: String,
    activate: bool,
    deactivate: bool,
) -> anyhow::Result<()> {
    let mode = match (activate, deactivate) {
        (true, _) => ToggleMode::Activate,
        (_, true) => ToggleMode::Deactivate,
        _ => ToggleMode::Flip,
    };
    ctx.execute(hints, Operation::ToggleSource { source, mode }).await?;
    Ok(())
}
