//! One browser session driving one operation from launch to close.

use chrono::Utc;
use folio_browser::{BrowserLauncher, BrowserSession, LaunchOptions, Locator, TypingPacing};
use folio_core::{
    Config, Error, NotebookRef, Operation, OperationOutput, Paths, Result, SourceEntry, SourceKind,
    ToggleMode,
};
use folio_storage::{CredentialStore, SessionLease};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::completion::{
    count_answers, viewer_text, wait_until, AnswerSettled, CheckedChanged, Gone, HomeLoaded,
    OnNotebookPage, SourceSettled, SourceViewerOpened,
};
use crate::selectors;

/// Upper bound on scroll steps while collecting a long sources panel.
const MAX_SCROLL_ROUNDS: usize = 20;

/// Longest source-derived stem used for a generated download file name.
const MAX_FILE_STEM_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Launching,
    Authenticated,
    Navigated,
    Submitted,
    AwaitingCompletion,
    Extracted,
    Closed,
    Failed,
}

/// Per-invocation switches that are not part of the persisted config.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub headless: bool,
    /// Capture a screenshot and page HTML when a page-level failure occurs.
    pub diagnostics: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            headless: true,
            diagnostics: false,
        }
    }
}

pub struct Driver<'a> {
    config: &'a Config,
    paths: &'a Paths,
    launcher: &'a dyn BrowserLauncher,
    credentials: &'a dyn CredentialStore,
    options: RunOptions,
    pacing: TypingPacing,
    state: DriverState,
    trace: Vec<DriverState>,
}

impl<'a> Driver<'a> {
    pub fn new(
        config: &'a Config,
        paths: &'a Paths,
        launcher: &'a dyn BrowserLauncher,
        credentials: &'a dyn CredentialStore,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            paths,
            launcher,
            credentials,
            options,
            pacing: TypingPacing::from_config(&config.pacing),
            state: DriverState::Idle,
            trace: vec![DriverState::Idle],
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn trace(&self) -> &[DriverState] {
        &self.trace
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "Driver transition");
        self.state = next;
        self.trace.push(next);
    }

    /// Run `op` in a fresh session. `notebook` is required for notebook-scoped
    /// operations. The session is closed exactly once whatever the outcome.
    pub async fn run(
        &mut self,
        notebook: Option<&NotebookRef>,
        op: &Operation,
    ) -> Result<OperationOutput> {
        match self.launch_and_drive(notebook, op).await {
            Ok(output) => {
                self.transition(DriverState::Closed);
                Ok(output)
            }
            Err(e) => {
                self.transition(DriverState::Failed);
                self.transition(DriverState::Closed);
                Err(e)
            }
        }
    }

    async fn launch_and_drive(
        &mut self,
        notebook: Option<&NotebookRef>,
        op: &Operation,
    ) -> Result<OperationOutput> {
        if op.is_unconfirmed_destructive() {
            return Err(Error::ConfirmationRequired(format!(
                "{} needs explicit confirmation",
                op.name()
            )));
        }
        let credentials = match self.credentials.load()? {
            Some(c) if self.credentials.is_authenticated() => c,
            _ => {
                return Err(Error::NotAuthenticated(
                    "no stored session; run `folio auth setup`".into(),
                ))
            }
        };

        self.transition(DriverState::Launching);
        let lease = SessionLease::acquire(self.paths)?;
        let options = LaunchOptions {
            headless: self.options.headless,
            profile_dir: lease.profile_dir().to_path_buf(),
            credentials: Some(credentials.state),
            engine: self.config.browser.engine.clone(),
            binary: self.config.browser.binary.clone(),
            user_agent: self.config.browser.user_agent.clone(),
            extra_args: self.config.browser.extra_args.clone(),
            navigation_timeout: self.config.timeouts.navigation(),
        };
        info!(operation = op.name(), session = %lease.id(), "Launching browser session");
        let mut session = self.launcher.launch(options).await?;
        self.transition(DriverState::Authenticated);

        let mut result = self.drive(session.as_mut(), notebook, op).await;

        let wants_capture =
            self.options.diagnostics && matches!(&result, Err(e) if e.wants_diagnostics());
        if wants_capture {
            match self.capture(session.as_mut(), op.name()).await {
                Ok(files) => {
                    let note = files
                        .iter()
                        .map(|f| f.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    result = result.map_err(|e| annotate(e, &note));
                }
                Err(capture_err) => warn!("Failed to capture diagnostics: {}", capture_err),
            }
        }
        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }
        drop(lease);
        result
    }

    async fn drive(
        &mut self,
        session: &mut dyn BrowserSession,
        notebook: Option<&NotebookRef>,
        op: &Operation,
    ) -> Result<OperationOutput> {
        let on_home = matches!(
            op,
            Operation::ListNotebooks | Operation::CreateNotebook { .. } | Operation::DeleteNotebook { .. }
        );
        let target = if on_home {
            None
        } else {
            Some(notebook.ok_or(Error::NoNotebookSpecified)?)
        };

        let url = match target {
            Some(nb) => nb.url.clone(),
            None => self.config.home_url(),
        };
        session.navigate(&url).await?;
        self.verify_landing(session, target).await?;
        self.transition(DriverState::Navigated);

        let output = match op {
            Operation::Ask { question } => self.ask(session, question).await?,
            Operation::AddUrlSource { url } => self.add_url_source(session, url).await?,
            Operation::AddFileSource { path } => self.add_file_source(session, path).await?,
            Operation::ListSources => self.list_sources(session).await?,
            Operation::RemoveSource { source, .. } => self.remove_source(session, source).await?,
            Operation::ToggleSource { source, mode } => {
                self.toggle_source(session, source, *mode).await?
            }
            Operation::DownloadSource { source, output } => {
                self.download_source(session, source, output.as_deref()).await?
            }
            Operation::ListNotebooks => OperationOutput::Notebooks {
                notebooks: self.list_notebooks(session).await?,
            },
            Operation::CreateNotebook { name } => {
                self.create_notebook(session, name.as_deref()).await?
            }
            Operation::DeleteNotebook { .. } => {
                let nb = notebook.ok_or(Error::NoNotebookSpecified)?;
                self.delete_notebook(session, &nb.id).await?
            }
        };
        self.transition(DriverState::Extracted);
        Ok(output)
    }

    async fn verify_landing(
        &mut self,
        session: &mut dyn BrowserSession,
        target: Option<&NotebookRef>,
    ) -> Result<()> {
        let landed = session.current_url().await?;
        let host = url::Url::parse(&landed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        if host == selectors::SIGN_IN_HOST || landed.contains(selectors::SIGN_IN_HOST) {
            warn!("Redirected to sign-in, stored session has expired");
            if let Err(e) = self.credentials.invalidate() {
                warn!("Failed to invalidate stored session: {}", e);
            }
            return Err(Error::NotAuthenticated(
                "stored session has expired; run `folio auth setup`".into(),
            ));
        }
        match target {
            Some(nb) if !landed.contains(&nb.id) => Err(Error::NavigationMismatch {
                expected: nb.id.clone(),
                actual: landed,
            }),
            None if host != self.config.app_host() => Err(Error::NavigationMismatch {
                expected: self.config.app_host().to_string(),
                actual: landed,
            }),
            _ => {
                debug!(url = %landed, "Landed on expected page");
                Ok(())
            }
        }
    }

    fn element_timeout(&self) -> Duration {
        self.config.timeouts.element()
    }

    fn poll(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    async fn ask(&mut self, session: &mut dyn BrowserSession, question: &str) -> Result<OperationOutput> {
        let input = session
            .wait_for(&selectors::query_input(), self.element_timeout())
            .await?;
        let candidates = selectors::answer_candidates();
        let baseline = count_answers(session, &candidates).await?;

        session.type_text(&input, question, &self.pacing).await?;
        session.press_key("Enter").await?;
        self.transition(DriverState::Submitted);

        self.transition(DriverState::AwaitingCompletion);
        let mut settled = AnswerSettled::new(
            candidates,
            selectors::thinking_indicator(),
            selectors::rate_limit_banner(),
            self.config.answer_stable_polls,
            baseline,
        );
        let answer = wait_until(session, &mut settled, self.config.timeouts.query(), self.poll()).await?;
        info!(chars = answer.len(), "Answer received");

        Ok(OperationOutput::Answer {
            question: question.to_string(),
            answer,
            follow_up: selectors::FOLLOW_UP_REMINDER.to_string(),
        })
    }

    /// The sources tab only exists in narrow layouts; missing is fine.
    async fn open_sources_panel(&self, session: &mut dyn BrowserSession) -> Result<()> {
        if let Some(tab) = session.find(&selectors::sources_tab()).await? {
            session.click(&tab).await?;
        }
        Ok(())
    }

    async fn open_add_dialog(&self, session: &mut dyn BrowserSession) -> Result<()> {
        self.open_sources_panel(session).await?;
        let add = session
            .wait_for(&selectors::add_source_button(), self.element_timeout())
            .await?;
        session.click(&add).await
    }

    async fn await_source(&mut self, session: &mut dyn BrowserSession, label: &str) -> Result<()> {
        self.transition(DriverState::AwaitingCompletion);
        let mut settled = SourceSettled::new(
            selectors::source_row(label),
            selectors::upload_error(),
            selectors::upload_in_progress(),
            selectors::dialog(),
            self.config.timeouts.source_settle(),
        );
        wait_until(session, &mut settled, self.config.timeouts.upload(), self.poll()).await
    }

    async fn add_url_source(&mut self, session: &mut dyn BrowserSession, url: &str) -> Result<OperationOutput> {
        let kind = SourceKind::for_url(url);
        self.open_add_dialog(session).await?;

        let options = match kind {
            SourceKind::YouTube => selectors::youtube_option(),
            _ => selectors::website_option(),
        };
        let option = session.wait_for(&options, self.element_timeout()).await?;
        session.click(&option).await?;

        let input = session
            .wait_for(&selectors::url_input(), self.element_timeout())
            .await?;
        session.type_text(&input, url, &self.pacing).await?;
        match session.find(&selectors::insert_button()).await? {
            Some(insert) => session.click(&insert).await?,
            None => session.press_key("Enter").await?,
        }
        self.transition(DriverState::Submitted);

        self.await_source(session, url).await?;
        info!(source = %url, ?kind, "Source added");
        Ok(OperationOutput::SourceAdded {
            source: url.to_string(),
            kind,
        })
    }

    async fn add_file_source(&mut self, session: &mut dyn BrowserSession, path: &Path) -> Result<OperationOutput> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.open_add_dialog(session).await?;

        if let Some(upload) = session.find(&selectors::upload_option()).await? {
            session.click(&upload).await?;
        }
        let input = session
            .wait_for(&selectors::file_input(), self.element_timeout())
            .await?;
        session.set_files(&input, &[path.to_path_buf()]).await?;
        self.transition(DriverState::Submitted);

        self.await_source(session, &file_name).await?;
        let kind = kind_for_file(path);
        info!(source = %file_name, ?kind, "File source added");
        Ok(OperationOutput::SourceAdded {
            source: file_name,
            kind,
        })
    }

    async fn list_sources(&mut self, session: &mut dyn BrowserSession) -> Result<OperationOutput> {
        self.open_sources_panel(session).await?;
        self.transition(DriverState::Submitted);

        self.transition(DriverState::AwaitingCompletion);
        let body = selectors::page_body();
        let mut sources: Vec<SourceEntry> = Vec::new();
        for round in 0..MAX_SCROLL_ROUNDS {
            let text = session.read_texts(&body).await?.join("\n");
            let before = sources.len();
            for entry in selectors::parse_sources_panel(&text) {
                if !sources.iter().any(|s| s.name == entry.name) {
                    sources.push(entry);
                }
            }
            let scrolled = session.evaluate(selectors::SCROLL_SOURCES_JS).await?;
            if sources.len() == before || scrolled != Value::Bool(true) {
                debug!(rounds = round + 1, "Sources panel fully read");
                break;
            }
            tokio::time::sleep(self.poll()).await;
        }

        for source in sources.iter_mut() {
            source.active = checked_state(session, &source.name).await?;
        }
        info!(count = sources.len(), "Listed sources");
        Ok(OperationOutput::Sources { sources })
    }

    /// Locate a source row by partial name, failing with a readable error.
    async fn source_row(&self, session: &mut dyn BrowserSession, source: &str) -> Result<(Locator, String)> {
        let row = match session.find(&selectors::source_row(source)).await? {
            Some(row) => row,
            None => {
                return Err(Error::UnexpectedPageState(format!(
                    "source '{}' not found in notebook",
                    source
                )))
            }
        };
        let texts = session.read_texts(&row).await?;
        Ok((row, row_label(&texts, source)))
    }

    async fn remove_source(&mut self, session: &mut dyn BrowserSession, source: &str) -> Result<OperationOutput> {
        self.open_sources_panel(session).await?;
        let (row, label) = self.source_row(session, source).await?;

        session.hover(&row).await?;
        let more = session
            .wait_for(&selectors::source_more_button(source), self.element_timeout())
            .await?;
        session.click(&more).await?;
        let remove = session
            .wait_for(&selectors::remove_menu_item(), self.element_timeout())
            .await?;
        session.click(&remove).await?;
        self.transition(DriverState::Submitted);

        if let Some(confirm) = session.find(&selectors::confirm_button()).await? {
            session.click(&confirm).await?;
        }
        self.transition(DriverState::AwaitingCompletion);
        let mut closed = Gone {
            what: "confirmation dialog closed",
            candidates: selectors::dialog(),
        };
        wait_until(session, &mut closed, self.element_timeout(), self.poll()).await?;

        info!(source = %label, "Source removed");
        Ok(OperationOutput::SourceRemoved { source: label })
    }

    async fn toggle_source(
        &mut self,
        session: &mut dyn BrowserSession,
        source: &str,
        mode: ToggleMode,
    ) -> Result<OperationOutput> {
        self.open_sources_panel(session).await?;
        let (_, label) = self.source_row(session, source).await?;
        let checkbox = session
            .find(&selectors::source_checkbox(source))
            .await?
            .ok_or_else(|| Error::UnexpectedPageState(format!("no checkbox for source '{}'", label)))?;
        let current = session.is_checked(&checkbox).await?.ok_or_else(|| {
            Error::UnexpectedPageState(format!("checkbox state of '{}' is unreadable", label))
        })?;

        let wanted = match mode {
            ToggleMode::Flip => !current,
            ToggleMode::Activate => true,
            ToggleMode::Deactivate => false,
        };
        if wanted == current {
            debug!(source = %label, active = current, "Source already in requested state");
            return Ok(OperationOutput::SourceToggled {
                source: label,
                active: current,
                changed: false,
            });
        }

        session.click(&checkbox).await?;
        self.transition(DriverState::Submitted);

        self.transition(DriverState::AwaitingCompletion);
        let mut changed = CheckedChanged {
            target: checkbox,
            previous: current,
        };
        let active = wait_until(session, &mut changed, self.element_timeout(), self.poll()).await?;
        info!(source = %label, active, "Source toggled");
        Ok(OperationOutput::SourceToggled {
            source: label,
            active,
            changed: true,
        })
    }

    async fn download_source(
        &mut self,
        session: &mut dyn BrowserSession,
        source: &str,
        output: Option<&Path>,
    ) -> Result<OperationOutput> {
        self.open_sources_panel(session).await?;
        let (row, label) = self.source_row(session, source).await?;
        let title = session.find(&selectors::source_title(source)).await?.unwrap_or(row);
        session.click(&title).await?;
        self.transition(DriverState::Submitted);

        self.transition(DriverState::AwaitingCompletion);
        let viewer = selectors::source_viewer();
        let body = selectors::page_body();
        let mut opened = SourceViewerOpened {
            viewer: viewer.clone(),
            body: body.clone(),
        };
        let mut raw = wait_until(session, &mut opened, self.config.timeouts.navigation(), self.poll()).await?;

        // Long sources render lazily while the viewer scrolls
        for round in 0..MAX_SCROLL_ROUNDS {
            if session.evaluate(selectors::SCROLL_VIEWER_JS).await? != Value::Bool(true) {
                break;
            }
            tokio::time::sleep(self.poll()).await;
            match viewer_text(session, &viewer, &body).await? {
                Some(text) if text.len() > raw.len() => raw = text,
                _ => {
                    debug!(rounds = round + 1, "Source viewer fully read");
                    break;
                }
            }
        }

        let content = selectors::clean_source_content(&raw, &label);
        if content.is_empty() {
            return Err(Error::UnexpectedPageState(format!(
                "source '{}' opened without readable content",
                label
            )));
        }

        let path = match output {
            Some(p) => p.to_path_buf(),
            None => self.paths.downloads_dir().join(format!(
                "{}_{}.md",
                file_stem(&label),
                Utc::now().format("%Y%m%d_%H%M%S")
            )),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &content).await?;

        let chars = content.chars().count();
        info!(source = %label, path = %path.display(), chars, "Source downloaded");
        Ok(OperationOutput::SourceDownloaded {
            source: label,
            path,
            chars,
        })
    }

    /// Waits for the home page and returns whether any notebook card rendered.
    async fn await_home(&mut self, session: &mut dyn BrowserSession) -> Result<bool> {
        if let Some(tab) = session.find(&selectors::all_notebooks_tab()).await? {
            session.click(&tab).await?;
        }
        let mut loaded = HomeLoaded {
            cards: selectors::notebook_cards(),
            body: selectors::page_body(),
        };
        wait_until(session, &mut loaded, self.config.timeouts.navigation(), self.poll()).await
    }

    async fn list_notebooks(&mut self, session: &mut dyn BrowserSession) -> Result<Vec<NotebookRef>> {
        self.transition(DriverState::Submitted);
        self.transition(DriverState::AwaitingCompletion);
        if !self.await_home(session).await? {
            info!("Account has no notebooks");
            return Ok(Vec::new());
        }
        let raw = session.evaluate(selectors::NOTEBOOK_CARDS_JS).await?;
        let config = self.config;
        let notebooks = selectors::parse_notebook_cards(&raw, |id| config.notebook_url(id));
        info!(count = notebooks.len(), "Listed notebooks");
        Ok(notebooks)
    }

    async fn create_notebook(
        &mut self,
        session: &mut dyn BrowserSession,
        name: Option<&str>,
    ) -> Result<OperationOutput> {
        let create = session
            .wait_for(&selectors::new_notebook_button(), self.element_timeout())
            .await?;
        session.click(&create).await?;
        self.transition(DriverState::Submitted);

        self.transition(DriverState::AwaitingCompletion);
        let id = wait_until(
            session,
            &mut OnNotebookPage,
            self.config.timeouts.navigation(),
            self.poll(),
        )
        .await?;

        let mut notebook = NotebookRef::from_address(id.clone(), self.config.notebook_url(&id));
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            // The new notebook opens with the add-source dialog on top
            session.press_key("Escape").await?;
            match session.find(&selectors::title_input()).await? {
                Some(title) => {
                    session.click(&title).await?;
                    session.press_key("Control+a").await?;
                    session.type_text(&title, name, &self.pacing).await?;
                    session.press_key("Tab").await?;
                    notebook.name = name.to_string();
                }
                None => warn!(notebook_id = %id, "Title field not found, notebook keeps its default name"),
            }
        }
        info!(notebook_id = %id, "Notebook created");
        Ok(OperationOutput::NotebookCreated { notebook })
    }

    async fn delete_notebook(&mut self, session: &mut dyn BrowserSession, id: &str) -> Result<OperationOutput> {
        self.await_home(session).await?;
        let card = session
            .find(&selectors::notebook_card(id))
            .await?
            .ok_or_else(|| Error::NotebookNotFound(id.to_string()))?;

        session.hover(&card).await?;
        let more = session
            .wait_for(&selectors::notebook_more_button(id), self.element_timeout())
            .await?;
        session.click(&more).await?;
        let delete = session
            .wait_for(&selectors::delete_menu_item(), self.element_timeout())
            .await?;
        session.click(&delete).await?;
        self.transition(DriverState::Submitted);

        let confirm = session
            .wait_for(&selectors::confirm_button(), self.element_timeout())
            .await?;
        session.click(&confirm).await?;
        self.transition(DriverState::AwaitingCompletion);
        let mut closed = Gone {
            what: "confirmation dialog closed",
            candidates: selectors::dialog(),
        };
        wait_until(session, &mut closed, self.element_timeout(), self.poll()).await?;

        info!(notebook_id = %id, "Notebook deleted");
        Ok(OperationOutput::NotebookDeleted { id: id.to_string() })
    }

    /// Write `<debug>/<op>-<timestamp>.png` and `.html` for the current page.
    async fn capture(&self, session: &mut dyn BrowserSession, op: &str) -> Result<Vec<PathBuf>> {
        let dir = self.paths.debug_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let stem = format!("{}-{}", op, Utc::now().format("%Y%m%d-%H%M%S"));

        let png = dir.join(format!("{}.png", stem));
        tokio::fs::write(&png, session.screenshot().await?).await?;
        let html = dir.join(format!("{}.html", stem));
        tokio::fs::write(&html, session.page_html().await?).await?;

        info!(screenshot = %png.display(), html = %html.display(), "Saved diagnostics");
        Ok(vec![png, html])
    }
}

/// First checkbox candidate with a readable state.
async fn checked_state(session: &mut dyn BrowserSession, name: &str) -> Result<Option<bool>> {
    for candidate in selectors::source_checkbox(name) {
        if let Some(state) = session.is_checked(&candidate).await? {
            return Ok(Some(state));
        }
    }
    Ok(None)
}

/// The row's own source name, falling back to what the caller typed.
fn row_label(texts: &[String], fallback: &str) -> String {
    let needle = fallback.to_lowercase();
    texts
        .iter()
        .flat_map(|t| t.lines())
        .map(str::trim)
        .find(|l| l.to_lowercase().contains(&needle))
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// File-system safe stem derived from a source name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM_CHARS)
        .collect();
    if stem.trim_matches(|c| c == '_' || c == '.').is_empty() {
        "source".to_string()
    } else {
        stem
    }
}

fn kind_for_file(path: &Path) -> SourceKind {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("pdf") => SourceKind::Pdf,
        _ => SourceKind::Document,
    }
}

/// Append diagnostic artifact paths to a page-level failure.
fn annotate(err: Error, note: &str) -> Error {
    match err {
        Error::UnexpectedPageState(m) => Error::UnexpectedPageState(format!("{} (diagnostics: {})", m, note)),
        Error::Timeout(m) => Error::Timeout(format!("{} (diagnostics: {})", m, note)),
        Error::NavigationMismatch { expected, actual } => Error::NavigationMismatch {
            expected,
            actual: format!("{} (diagnostics: {})", actual, note),
        },
        other => other,
    }
}
