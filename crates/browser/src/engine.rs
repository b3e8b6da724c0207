//! The browser capability the orchestrator drives.
//!
//! Everything above this module talks to a page only through these traits, so
//! the CDP engine can be swapped for a scripted fake in tests.

use async_trait::async_trait;
use folio_core::Result;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::pacing::TypingPacing;

/// A CSS selector, optionally narrowed to elements whose rendered text
/// contains `text` (case-insensitive) and to descendants of `scope`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    pub css: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Box<Locator>>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
            scope: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Restrict matches to descendants of elements matched by `parent`.
    pub fn within(mut self, parent: Locator) -> Self {
        self.scope = Some(Box::new(parent));
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.scope {
            write!(f, "{} >> ", scope)?;
        }
        write!(f, "{}", self.css)?;
        if let Some(text) = &self.text {
            write!(f, ":has-text({:?})", text)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Private profile directory owned by this session.
    pub profile_dir: PathBuf,
    /// Stored authenticated state, injected before the first navigation.
    pub credentials: Option<Value>,
    pub engine: String,
    pub binary: Option<String>,
    pub user_agent: String,
    pub extra_args: Vec<String>,
    pub navigation_timeout: Duration,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start one isolated browser session. Failures here are transient.
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and wait for the document to settle.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn current_url(&mut self) -> Result<String>;

    /// First candidate with a visible match right now.
    async fn find(&mut self, candidates: &[Locator]) -> Result<Option<Locator>>;

    /// Poll until one candidate is visible; `Error::Timeout` otherwise.
    async fn wait_for(&mut self, candidates: &[Locator], timeout: Duration) -> Result<Locator>;

    async fn click(&mut self, target: &Locator) -> Result<()>;

    async fn hover(&mut self, target: &Locator) -> Result<()>;

    /// Focus `target` and enter `text` at the given pace.
    async fn type_text(&mut self, target: &Locator, text: &str, pacing: &TypingPacing) -> Result<()>;

    /// Key spec such as `Enter`, `Escape` or `Ctrl+A`.
    async fn press_key(&mut self, key: &str) -> Result<()>;

    /// Rendered text of every match, in document order.
    async fn read_texts(&mut self, target: &Locator) -> Result<Vec<String>>;

    /// Checked state of the first match, `None` if nothing matches.
    async fn is_checked(&mut self, target: &Locator) -> Result<Option<bool>>;

    async fn evaluate(&mut self, script: &str) -> Result<Value>;

    async fn set_files(&mut self, target: &Locator, files: &[PathBuf]) -> Result<()>;

    /// Authenticated state suitable for a later `LaunchOptions::credentials`.
    async fn snapshot_state(&mut self) -> Result<Value>;

    /// PNG bytes of the viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    async fn page_html(&mut self) -> Result<String>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
