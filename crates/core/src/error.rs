use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Login timed out after {0}s")]
    LoginTimeout(u64),

    #[error("Notebook not found: {0}")]
    NotebookNotFound(String),

    #[error("Notebook name '{hint}' is ambiguous; candidates: {}", candidates.join(", "))]
    AmbiguousNotebookName {
        hint: String,
        candidates: Vec<String>,
    },

    #[error("No notebook specified and no default notebook remembered")]
    NoNotebookSpecified,

    #[error("Navigation mismatch: expected notebook {expected}, landed on {actual}")]
    NavigationMismatch { expected: String, actual: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Transient session failure: {0}")]
    TransientSessionFailure(String),

    #[error("Unexpected page state: {0}")]
    UnexpectedPageState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable kind. Callers branch on this, never on the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotAuthenticated(_) => "not_authenticated",
            Error::LoginTimeout(_) => "login_timeout",
            Error::NotebookNotFound(_) => "notebook_not_found",
            Error::AmbiguousNotebookName { .. } => "ambiguous_notebook_name",
            Error::NoNotebookSpecified => "no_notebook_specified",
            Error::NavigationMismatch { .. } => "navigation_mismatch",
            Error::Timeout(_) => "timeout",
            Error::RateLimited(_) => "rate_limited",
            Error::ConfirmationRequired(_) => "confirmation_required",
            Error::TransientSessionFailure(_) => "transient_session_failure",
            Error::UnexpectedPageState(_) => "unexpected_page_state",
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Only session-level faults qualify for the single automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientSessionFailure(_))
    }

    /// Failures worth a page snapshot when diagnostics are enabled.
    pub fn wants_diagnostics(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedPageState(_) | Error::Timeout(_) | Error::NavigationMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(Error::NoNotebookSpecified.kind(), "no_notebook_specified");
        assert_eq!(
            Error::AmbiguousNotebookName {
                hint: "research".into(),
                candidates: vec!["a".into(), "b".into()],
            }
            .kind(),
            "ambiguous_notebook_name"
        );
        assert_eq!(Error::Timeout("x".into()).kind(), "timeout");
    }

    #[test]
    fn test_only_session_failures_are_transient() {
        assert!(Error::TransientSessionFailure("launch".into()).is_transient());
        assert!(!Error::NotebookNotFound("nb".into()).is_transient());
        assert!(!Error::Timeout("answer".into()).is_transient());
        assert!(!Error::ConfirmationRequired("delete".into()).is_transient());
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = Error::AmbiguousNotebookName {
            hint: "research".into(),
            candidates: vec!["Research Notes".into(), "Research Archive".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Research Notes"));
        assert!(msg.contains("Research Archive"));
    }
}
