use folio_core::{NotebookHints, Operation};

use super::Context;

pub async fn run(ctx: &Context, hints: NotebookHints, question: String) -> anyhow::Result<()> {
    if question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }
    ctx.execute(hints, Operation::Ask { question }).await?;
    Ok(())
}
