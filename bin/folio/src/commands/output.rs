use folio_core::{Error, NotebookRef, OperationOutput, SourceEntry};
use folio_pilot::Completed;
use serde_json::json;

pub fn print_completed(done: &Completed, json: bool) -> anyhow::Result<()> {
    if json {
        let mut value = serde_json::to_value(&done.output)?;
        if let (Some(obj), Some(nb)) = (value.as_object_mut(), &done.notebook) {
            obj.insert("notebook".to_string(), serde_json::to_value(nb)?);
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", render(&done.output, done.notebook.as_ref()));
    }
    Ok(())
}

/// A preview is printed like any result but still fails the command.
pub fn refuse_preview(done: &Completed) -> anyhow::Result<()> {
    if let OperationOutput::Preview { action, target } = &done.output {
        return Err(Error::ConfirmationRequired(format!(
            "re-run with --confirm to {} ({})",
            action, target
        ))
        .into());
    }
    Ok(())
}

pub fn print_error(err: &anyhow::Error, json: bool) {
    let kind = err
        .downcast_ref::<Error>()
        .map(|e| e.kind())
        .unwrap_or("internal");
    if json {
        eprintln!(
            "{}",
            json!({"error": {"kind": kind, "message": err.to_string()}})
        );
    } else {
        eprintln!("error[{}]: {}", kind, err);
    }
}

fn render(output: &OperationOutput, notebook: Option<&NotebookRef>) -> String {
    let mut out = String::new();
    match output {
        OperationOutput::Answer {
            question,
            answer,
            follow_up,
        } => {
            let rule = "=".repeat(60);
            out.push_str(&format!("{}\nQuestion: {}\n", rule, question));
            if let Some(nb) = notebook {
                out.push_str(&format!("Notebook: {}", nb.display_name()));
                if let Some(count) = nb.source_count {
                    out.push_str(&format!(" ({} sources)", count));
                }
                out.push('\n');
            }
            out.push_str(&format!("{}\n\n{}\n\n{}\n{}", rule, answer, follow_up, rule));
        }
        OperationOutput::SourceAdded { source, kind } => {
            out.push_str(&format!("Added {:?} source: {}", kind, source));
        }
        OperationOutput::Sources { sources } => {
            if sources.is_empty() {
                out.push_str("(No sources found)");
            }
            for (i, s) in sources.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&source_line(i + 1, s));
            }
        }
        OperationOutput::SourceRemoved { source } => {
            out.push_str(&format!("Removed source: {}", source));
        }
        OperationOutput::SourceToggled {
            source,
            active,
            changed,
        } => {
            let state = if *active { "active" } else { "inactive" };
            if *changed {
                out.push_str(&format!("{} is now {}", source, state));
            } else {
                out.push_str(&format!("{} is already {}", source, state));
            }
        }
        OperationOutput::SourceDownloaded { source, path, chars } => {
            out.push_str(&format!("Saved {} ({} chars)\n  {}", source, chars, path.display()));
        }
        OperationOutput::Notebooks { notebooks } => {
            if notebooks.is_empty() {
                out.push_str("(No notebooks yet)");
            }
            for (i, nb) in notebooks.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&notebook_line(nb));
            }
        }
        OperationOutput::NotebookCreated { notebook } => {
            out.push_str(&format!("Created notebook {}\n  {}", notebook.display_name(), notebook.url));
        }
        OperationOutput::NotebookDeleted { id } => {
            out.push_str(&format!("Deleted notebook {}", id));
        }
        OperationOutput::Preview { action, target } => {
            out.push_str(&format!("Would {}: {}\nNothing was changed. Add --confirm to proceed.", action, target));
        }
    }
    out
}

fn source_line(n: usize, source: &SourceEntry) -> String {
    let mark = match source.active {
        Some(true) => "[x]",
        Some(false) => "[ ]",
        None => "[?]",
    };
    format!("{:>3}. {} {:<9} {}", n, mark, format!("{:?}", source.kind), source.name)
}

fn notebook_line(nb: &NotebookRef) -> String {
    let mut details = Vec::new();
    if let Some(count) = nb.source_count {
        details.push(format!("{} sources", count));
    }
    if let Some(modified) = &nb.last_modified {
        details.push(modified.clone());
    }
    let mut line = format!("{}  [{}]", nb.name, nb.id);
    if !details.is_empty() {
        line.push_str(&format!("  {}", details.join(", ")));
    }
    line
}
