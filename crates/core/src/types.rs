use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

static NOTEBOOK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/notebook/([A-Za-z0-9_-]+)").expect("valid notebook id regex"));

/// Extract the notebook id from a notebook URL, if the path carries one.
pub fn notebook_id_from_url(url: &str) -> Option<String> {
    NOTEBOOK_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A notebook as seen in the live listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookRef {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl NotebookRef {
    /// A reference known only by address (no listing data).
    pub fn from_address(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            url: url.into(),
            source_count: None,
            last_modified: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// The remembered default notebook. A single slot, replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRecord {
    pub id: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// Raw notebook addressing input as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct NotebookHints {
    pub url: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
}

/// The single hint that wins after precedence is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressingHint {
    Url(String),
    Id(String),
    Name(String),
    None,
}

impl NotebookHints {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// `url > id > name > none`; blank values count as absent.
    pub fn effective(&self) -> AddressingHint {
        fn present(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }

        if let Some(url) = present(&self.url) {
            AddressingHint::Url(url)
        } else if let Some(id) = present(&self.id) {
            AddressingHint::Id(id)
        } else if let Some(name) = present(&self.name) {
            AddressingHint::Name(name)
        } else {
            AddressingHint::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleMode {
    Flip,
    Activate,
    Deactivate,
}

/// One logical operation against the site.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Ask { question: String },
    AddUrlSource { url: String },
    AddFileSource { path: PathBuf },
    ListSources,
    RemoveSource { source: String, confirm: bool },
    ToggleSource { source: String, mode: ToggleMode },
    /// Save the text the site extracted from a source. Without `output` the
    /// file lands in the downloads directory.
    DownloadSource { source: String, output: Option<PathBuf> },
    ListNotebooks,
    CreateNotebook { name: Option<String> },
    DeleteNotebook { confirm: bool },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ask { .. } => "ask",
            Operation::AddUrlSource { .. } => "add_url_source",
            Operation::AddFileSource { .. } => "add_file_source",
            Operation::ListSources => "list_sources",
            Operation::RemoveSource { .. } => "remove_source",
            Operation::ToggleSource { .. } => "toggle_source",
            Operation::DownloadSource { .. } => "download_source",
            Operation::ListNotebooks => "list_notebooks",
            Operation::CreateNotebook { .. } => "create_notebook",
            Operation::DeleteNotebook { .. } => "delete_notebook",
        }
    }

    /// Whether the operation targets one existing notebook.
    pub fn is_notebook_scoped(&self) -> bool {
        !matches!(
            self,
            Operation::ListNotebooks | Operation::CreateNotebook { .. }
        )
    }

    /// Destructive operations submitted without confirmation only preview.
    pub fn is_unconfirmed_destructive(&self) -> bool {
        matches!(
            self,
            Operation::RemoveSource { confirm: false, .. } | Operation::DeleteNotebook { confirm: false }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Website,
    YouTube,
    Pdf,
    Document,
    Unknown,
}

impl SourceKind {
    /// Classify a URL submitted as a source.
    pub fn for_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("youtube.com/watch")
            || lower.contains("youtu.be/")
            || lower.contains("youtube.com/embed/")
        {
            SourceKind::YouTube
        } else {
            SourceKind::Website
        }
    }

    /// Classify from the icon label the sources panel renders before a name.
    pub fn from_icon(icon: &str) -> Self {
        match icon.trim().to_ascii_lowercase().as_str() {
            "youtube" | "video_youtube" => SourceKind::YouTube,
            "web" => SourceKind::Website,
            "drive_pdf" | "pdf" => SourceKind::Pdf,
            "markdown" | "description" | "text_snippet" => SourceKind::Document,
            _ => SourceKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Structured success payload, one variant per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutput {
    Answer {
        question: String,
        answer: String,
        follow_up: String,
    },
    SourceAdded {
        source: String,
        kind: SourceKind,
    },
    Sources {
        sources: Vec<SourceEntry>,
    },
    SourceRemoved {
        source: String,
    },
    SourceToggled {
        source: String,
        active: bool,
        changed: bool,
    },
    SourceDownloaded {
        source: String,
        path: PathBuf,
        chars: usize,
    },
    Notebooks {
        notebooks: Vec<NotebookRef>,
    },
    NotebookCreated {
        notebook: NotebookRef,
    },
    NotebookDeleted {
        id: String,
    },
    /// What a destructive operation would do, returned instead of acting.
    Preview {
        action: String,
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notebook_id_from_url() {
        assert_eq!(
            notebook_id_from_url("https://notebooklm.google.com/notebook/3f2a-9c1b?authuser=0").as_deref(),
            Some("3f2a-9c1b")
        );
        assert_eq!(notebook_id_from_url("https://notebooklm.google.com/"), None);
    }

    #[test]
    fn test_hint_precedence() {
        let hints = NotebookHints {
            url: Some("https://x/notebook/a".into()),
            id: Some("b".into()),
            name: Some("c".into()),
        };
        assert_eq!(hints.effective(), AddressingHint::Url("https://x/notebook/a".into()));

        let hints = NotebookHints {
            url: Some("   ".into()),
            id: Some("b".into()),
            name: Some("c".into()),
        };
        assert_eq!(hints.effective(), AddressingHint::Id("b".into()));

        let hints = NotebookHints {
            url: None,
            id: Some(String::new()),
            name: Some(" research ".into()),
        };
        assert_eq!(hints.effective(), AddressingHint::Name("research".into()));

        assert_eq!(NotebookHints::default().effective(), AddressingHint::None);
    }

    #[test]
    fn test_operation_scope() {
        assert!(Operation::Ask { question: "q".into() }.is_notebook_scoped());
        assert!(Operation::DownloadSource { source: "s".into(), output: None }.is_notebook_scoped());
        assert!(!Operation::ListNotebooks.is_notebook_scoped());
        assert!(!Operation::CreateNotebook { name: None }.is_notebook_scoped());
        assert!(Operation::DeleteNotebook { confirm: false }.is_unconfirmed_destructive());
        assert!(!Operation::DeleteNotebook { confirm: true }.is_unconfirmed_destructive());
        assert!(Operation::RemoveSource { source: "s".into(), confirm: false }.is_unconfirmed_destructive());
    }

    #[test]
    fn test_source_kind_for_url() {
        assert_eq!(SourceKind::for_url("https://youtu.be/abc"), SourceKind::YouTube);
        assert_eq!(SourceKind::for_url("https://www.youtube.com/watch?v=x"), SourceKind::YouTube);
        assert_eq!(SourceKind::for_url("https://en.wikipedia.org/wiki/AI"), SourceKind::Website);
        assert_eq!(SourceKind::from_icon("drive_pdf"), SourceKind::Pdf);
    }

    #[test]
    fn test_output_serializes_tagged() {
        let out = OperationOutput::NotebookDeleted { id: "nb-1".into() };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["type"], "notebook_deleted");
        assert_eq!(v["id"], "nb-1");
    }
}
