use folio_core::{NotebookHints, Operation};

use super::Context;

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    ctx.execute(NotebookHints::default(), Operation::ListNotebooks).await?;
    Ok(())
}

pub async fn create(ctx: &Context, name: Option<String>) -> anyhow::Result<()> {
    ctx.execute(NotebookHints::default(), Operation::CreateNotebook { name })
        .await?;
    Ok(())
}

pub async fn delete(ctx: &Context, hints: NotebookHints, confirm: bool) -> anyhow::Result<()> {
    ctx.execute(hints, Operation::DeleteNotebook { confirm }).await?;
    Ok(())
}
