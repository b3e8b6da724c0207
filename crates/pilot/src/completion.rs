//! Named completion predicates polled while an operation settles in the page.

use async_trait::async_trait;
use folio_browser::{BrowserSession, Locator};
use folio_core::{notebook_id_from_url, Error, Result};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::selectors;

pub enum Check<T> {
    Pending,
    Done(T),
}

#[async_trait]
pub trait CompletionPredicate: Send {
    type Output: Send;

    /// Used in timeout messages and logs.
    fn name(&self) -> &'static str;

    /// Inspect the page once. Errors end the wait immediately.
    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<Self::Output>>;
}

/// Poll `predicate` every `interval` until it is done or `timeout` elapses.
pub async fn wait_until<P: CompletionPredicate>(
    session: &mut dyn BrowserSession,
    predicate: &mut P,
    timeout: Duration,
    interval: Duration,
) -> Result<P::Output> {
    let start = Instant::now();
    let mut polls = 0u32;
    loop {
        polls += 1;
        if let Check::Done(out) = predicate.check(session).await? {
            debug!(predicate = predicate.name(), polls, "Completion reached");
            return Ok(out);
        }
        if start.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "{} not reached within {}s",
                predicate.name(),
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Texts of the first candidate that currently has any matches.
async fn first_texts(session: &mut dyn BrowserSession, candidates: &[Locator]) -> Result<Vec<String>> {
    for candidate in candidates {
        let texts = session.read_texts(candidate).await?;
        if !texts.is_empty() {
            return Ok(texts);
        }
    }
    Ok(Vec::new())
}

/// Number of answers already on the page before the question is submitted.
pub async fn count_answers(session: &mut dyn BrowserSession, candidates: &[Locator]) -> Result<usize> {
    Ok(first_texts(session, candidates).await?.len())
}

/// A new answer whose text stayed identical for `stable_polls` polls while
/// the thinking indicator was absent.
pub struct AnswerSettled {
    pub candidates: Vec<Locator>,
    pub thinking: Vec<Locator>,
    pub rate_limit: Vec<Locator>,
    pub stable_polls: u32,
    /// Answers present before submission; only later ones count.
    pub baseline: usize,
    last: Option<String>,
    stable: u32,
}

impl AnswerSettled {
    pub fn new(
        candidates: Vec<Locator>,
        thinking: Vec<Locator>,
        rate_limit: Vec<Locator>,
        stable_polls: u32,
        baseline: usize,
    ) -> Self {
        Self {
            candidates,
            thinking,
            rate_limit,
            stable_polls: stable_polls.max(1),
            baseline,
            last: None,
            stable: 0,
        }
    }
}

#[async_trait]
impl CompletionPredicate for AnswerSettled {
    type Output = String;

    fn name(&self) -> &'static str {
        "answer settled"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<String>> {
        if let Some(banner) = session.find(&self.rate_limit).await? {
            let text = session.read_texts(&banner).await?.join(" ");
            return Err(Error::RateLimited(if text.is_empty() {
                "query limit reached".to_string()
            } else {
                text
            }));
        }
        if session.find(&self.thinking).await?.is_some() {
            self.stable = 0;
            return Ok(Check::Pending);
        }

        let texts = first_texts(session, &self.candidates).await?;
        if texts.len() <= self.baseline {
            return Ok(Check::Pending);
        }
        let latest = match texts.last().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => return Ok(Check::Pending),
        };

        if self.last.as_deref() == Some(latest.as_str()) {
            self.stable += 1;
        } else {
            self.last = Some(latest);
            self.stable = 1;
        }
        if self.stable >= self.stable_polls {
            Ok(Check::Done(self.last.take().unwrap_or_default()))
        } else {
            Ok(Check::Pending)
        }
    }
}

/// A submitted source finished processing: no error, no spinner, and either
/// its row is visible or the add dialog has closed. A closed dialog only
/// counts once the spinner was seen or `settle` has passed.
pub struct SourceSettled {
    pub row: Vec<Locator>,
    pub errors: Vec<Locator>,
    pub busy: Vec<Locator>,
    pub dialog: Vec<Locator>,
    settle: Duration,
    seen_busy: bool,
    started: Option<Instant>,
}

impl SourceSettled {
    pub fn new(
        row: Vec<Locator>,
        errors: Vec<Locator>,
        busy: Vec<Locator>,
        dialog: Vec<Locator>,
        settle: Duration,
    ) -> Self {
        Self {
            row,
            errors,
            busy,
            dialog,
            settle,
            seen_busy: false,
            started: None,
        }
    }
}

#[async_trait]
impl CompletionPredicate for SourceSettled {
    type Output = ();

    fn name(&self) -> &'static str {
        "source processed"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<()>> {
        let started = *self.started.get_or_insert_with(Instant::now);
        if let Some(error) = session.find(&self.errors).await? {
            let text = session.read_texts(&error).await?.join(" ");
            return Err(Error::UnexpectedPageState(format!(
                "source was rejected: {}",
                if text.is_empty() { "unknown error" } else { text.as_str() }
            )));
        }
        if session.find(&self.busy).await?.is_some() {
            self.seen_busy = true;
            return Ok(Check::Pending);
        }
        if session.find(&self.row).await?.is_some() {
            return Ok(Check::Done(()));
        }
        let settled = self.seen_busy || started.elapsed() >= self.settle;
        if settled && session.find(&self.dialog).await?.is_none() {
            return Ok(Check::Done(()));
        }
        Ok(Check::Pending)
    }
}

/// None of the candidates is visible any more.
pub struct Gone {
    pub what: &'static str,
    pub candidates: Vec<Locator>,
}

#[async_trait]
impl CompletionPredicate for Gone {
    type Output = ();

    fn name(&self) -> &'static str {
        self.what
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<()>> {
        Ok(match session.find(&self.candidates).await? {
            Some(_) => Check::Pending,
            None => Check::Done(()),
        })
    }
}

/// The home page rendered either notebook cards or its empty state.
/// Yields whether cards are present.
pub struct HomeLoaded {
    pub cards: Vec<Locator>,
    pub body: Locator,
}

#[async_trait]
impl CompletionPredicate for HomeLoaded {
    type Output = bool;

    fn name(&self) -> &'static str {
        "notebook list loaded"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<bool>> {
        if session.find(&self.cards).await?.is_some() {
            return Ok(Check::Done(true));
        }
        let body = session.read_texts(&self.body).await?.join("\n");
        if selectors::is_empty_home(&body) {
            return Ok(Check::Done(false));
        }
        Ok(Check::Pending)
    }
}

/// The page moved to a notebook URL. Yields the notebook id.
pub struct OnNotebookPage;

#[async_trait]
impl CompletionPredicate for OnNotebookPage {
    type Output = String;

    fn name(&self) -> &'static str {
        "new notebook opened"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<String>> {
        let url = session.current_url().await?;
        Ok(match notebook_id_from_url(&url) {
            Some(id) => Check::Done(id),
            None => Check::Pending,
        })
    }
}

/// Text of the open source viewer: its panel when one renders, otherwise the
/// page body once it shows the source header.
pub async fn viewer_text(
    session: &mut dyn BrowserSession,
    viewer: &[Locator],
    body: &Locator,
) -> Result<Option<String>> {
    let panel = first_texts(session, viewer).await?.join("\n");
    if !panel.trim().is_empty() {
        return Ok(Some(panel));
    }
    let page = session.read_texts(body).await?.join("\n");
    Ok(selectors::is_source_view(&page).then_some(page))
}

/// A clicked source opened in the viewer. Yields the raw viewer text.
pub struct SourceViewerOpened {
    pub viewer: Vec<Locator>,
    pub body: Locator,
}

#[async_trait]
impl CompletionPredicate for SourceViewerOpened {
    type Output = String;

    fn name(&self) -> &'static str {
        "source opened"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<String>> {
        Ok(match viewer_text(session, &self.viewer, &self.body).await? {
            Some(text) => Check::Done(text),
            None => Check::Pending,
        })
    }
}

/// The checkbox at `target` left its previous state. Yields the new state.
pub struct CheckedChanged {
    pub target: Locator,
    pub previous: bool,
}

#[async_trait]
impl CompletionPredicate for CheckedChanged {
    type Output = bool;

    fn name(&self) -> &'static str {
        "source toggled"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<bool>> {
        Ok(match session.is_checked(&self.target).await? {
            Some(now) if now != self.previous => Check::Done(now),
            _ => Check::Pending,
        })
    }
}
