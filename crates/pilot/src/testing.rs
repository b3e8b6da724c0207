//! Scripted in-memory browser for driving the orchestrator in tests.
//!
//! A `FakePage` holds the elements currently "on screen" plus reactions that
//! mutate it when something is clicked. Every session call
//! is recorded so tests can assert on exactly what the driver did.

use async_trait::async_trait;
use folio_browser::{BrowserLauncher, BrowserSession, LaunchOptions, Locator, TypingPacing};
use folio_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Reaction = Arc<dyn Fn(&mut PageState) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FakeElement {
    css: String,
    text: String,
    scope: Option<Box<FakeElement>>,
    checked: Option<bool>,
    /// Disappears after this many positive lookups.
    sightings: Option<usize>,
}

impl FakeElement {
    /// An element that satisfies `locator` (including its scope chain).
    pub fn matching(locator: &Locator) -> Self {
        Self {
            css: locator.css.clone(),
            text: locator.text.clone().unwrap_or_default(),
            scope: locator.scope.as_ref().map(|s| Box::new(Self::matching(s))),
            checked: None,
            sightings: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn sightings(mut self, n: usize) -> Self {
        self.sightings = Some(n);
        self
    }

    fn matches(&self, locator: &Locator) -> bool {
        if self.css != locator.css {
            return false;
        }
        if let Some(needle) = &locator.text {
            if !self.text.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        match (&locator.scope, &self.scope) {
            (None, _) => true,
            (Some(wanted), Some(parent)) => parent.matches(wanted),
            (Some(_), None) => false,
        }
    }
}

#[derive(Default)]
pub struct PageState {
    pub url: String,
    elements: Vec<FakeElement>,
    text_frames: Vec<(Locator, VecDeque<Vec<String>>)>,
    click_reactions: Vec<(Locator, Reaction)>,
    redirects: Vec<(String, String)>,
    pending_urls: VecDeque<String>,
    scripts: Vec<(String, Value)>,
    navigation_failures: usize,
    snapshot: Value,
    calls: Vec<String>,
    launches: usize,
    closes: usize,
    launch_failures: usize,
    last_launch: Option<LaunchOptions>,
}

impl PageState {
    pub fn add(&mut self, element: FakeElement) {
        self.elements.push(element);
    }

    pub fn remove(&mut self, locator: &Locator) {
        self.elements.retain(|e| !e.matches(locator));
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    fn position(&self, locator: &Locator) -> Option<usize> {
        self.elements.iter().position(|e| e.matches(locator))
    }

    /// A positive lookup; consumes one sighting of a fading element.
    fn sight(&mut self, locator: &Locator) -> bool {
        let idx = match self.position(locator) {
            Some(i) => i,
            None => return false,
        };
        if let Some(n) = self.elements[idx].sightings.as_mut() {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.elements.remove(idx);
            }
        }
        true
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

/// Shared handle to one scripted page. Clones observe the same state.
#[derive(Clone)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        let state = PageState {
            url: url.to_string(),
            snapshot: json!({"cookies": [{"name": "SID", "value": "fresh", "domain": ".google.com"}]}),
            ..PageState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add(&self, element: FakeElement) {
        self.lock().add(element);
    }

    /// Successive `read_texts` results for `locator`; the last frame repeats.
    pub fn text_frames(&self, locator: &Locator, frames: Vec<Vec<String>>) {
        self.lock()
            .text_frames
            .push((locator.clone(), frames.into_iter().collect()));
    }

    pub fn on_click(&self, locator: &Locator, reaction: impl Fn(&mut PageState) + Send + Sync + 'static) {
        self.lock()
            .click_reactions
            .push((locator.clone(), Arc::new(reaction)));
    }

    /// Navigations to a URL starting with `prefix` land on `to`.
    pub fn redirect(&self, prefix: &str, to: &str) {
        self.lock()
            .redirects
            .push((prefix.to_string(), to.to_string()));
    }

    /// URLs reported by successive `current_url` calls before settling.
    pub fn url_sequence(&self, urls: &[&str]) {
        self.lock()
            .pending_urls
            .extend(urls.iter().map(|u| u.to_string()));
    }

    /// Result of any evaluated script containing `marker`.
    pub fn script_result(&self, marker: &str, value: Value) {
        self.lock().scripts.push((marker.to_string(), value));
    }

    pub fn fail_navigations(&self, n: usize) {
        self.lock().navigation_failures = n;
    }

    pub fn fail_launches(&self, n: usize) {
        self.lock().launch_failures = n;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clicked(&self, locator: &Locator) -> bool {
        let wanted = format!("click {}", locator);
        self.lock().calls.iter().any(|c| *c == wanted)
    }

    pub fn launches(&self) -> usize {
        self.lock().launches
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn last_launch(&self) -> Option<LaunchOptions> {
        self.lock().last_launch.clone()
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            page: self.clone(),
        }
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher { page: self.clone() }
    }
}

pub struct FakeLauncher {
    page: FakePage,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        let mut state = self.page.lock();
        state.launches += 1;
        state.last_launch = Some(options);
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            return Err(Error::TransientSessionFailure("browser crashed on start".into()));
        }
        drop(state);
        Ok(Box::new(self.page.session()))
    }
}

pub struct FakeSession {
    page: FakePage,
}

fn missing(locator: &Locator) -> Error {
    Error::UnexpectedPageState(format!("Element not found: {}", locator))
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let mut state = self.page.lock();
        state.record(format!("navigate {}", url));
        if state.navigation_failures > 0 {
            state.navigation_failures -= 1;
            return Err(Error::TransientSessionFailure(format!(
                "Navigation to {} did not finish",
                url
            )));
        }
        let landed = state
            .redirects
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| url.to_string());
        state.url = landed;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        let mut state = self.page.lock();
        if let Some(next) = state.pending_urls.pop_front() {
            state.url = next;
        }
        Ok(state.url.clone())
    }

    async fn find(&mut self, candidates: &[Locator]) -> Result<Option<Locator>> {
        let mut state = self.page.lock();
        Ok(candidates.iter().find(|c| state.sight(c)).cloned())
    }

    async fn wait_for(&mut self, candidates: &[Locator], timeout: Duration) -> Result<Locator> {
        match self.find(candidates).await? {
            Some(found) => Ok(found),
            None => Err(Error::Timeout(format!(
                "None of [{}] appeared within {}s",
                candidates
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                timeout.as_secs()
            ))),
        }
    }

    async fn click(&mut self, target: &Locator) -> Result<()> {
        let mut state = self.page.lock();
        let idx = state.position(target).ok_or_else(|| missing(target))?;
        state.record(format!("click {}", target));
        if let Some(checked) = state.elements[idx].checked.as_mut() {
            *checked = !*checked;
        }
        let reactions: Vec<Reaction> = state
            .click_reactions
            .iter()
            .filter(|(l, _)| l == target)
            .map(|(_, r)| r.clone())
            .collect();
        for reaction in reactions {
            reaction(&mut *state);
        }
        Ok(())
    }

    async fn hover(&mut self, target: &Locator) -> Result<()> {
        let mut state = self.page.lock();
        state.position(target).ok_or_else(|| missing(target))?;
        state.record(format!("hover {}", target));
        Ok(())
    }

    async fn type_text(&mut self, target: &Locator, text: &str, _pacing: &TypingPacing) -> Result<()> {
        let mut state = self.page.lock();
        state.position(target).ok_or_else(|| missing(target))?;
        state.record(format!("type {}", text));
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        let mut state = self.page.lock();
        state.record(format!("key {}", key));
        Ok(())
    }

    async fn read_texts(&mut self, target: &Locator) -> Result<Vec<String>> {
        let mut state = self.page.lock();
        if let Some((_, frames)) = state.text_frames.iter_mut().find(|(l, _)| l == target) {
            let frame = if frames.len() > 1 {
                frames.pop_front().unwrap_or_default()
            } else {
                frames.front().cloned().unwrap_or_default()
            };
            return Ok(frame);
        }
        Ok(state
            .elements
            .iter()
            .filter(|e| e.matches(target))
            .map(|e| e.text.clone())
            .collect())
    }

    async fn is_checked(&mut self, target: &Locator) -> Result<Option<bool>> {
        let state = self.page.lock();
        Ok(state
            .elements
            .iter()
            .find(|e| e.matches(target))
            .and_then(|e| e.checked))
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        let mut state = self.page.lock();
        state.record("evaluate".to_string());
        Ok(state
            .scripts
            .iter()
            .find(|(marker, _)| script.contains(marker.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null))
    }

    async fn set_files(&mut self, target: &Locator, files: &[PathBuf]) -> Result<()> {
        let mut state = self.page.lock();
        state.position(target).ok_or_else(|| missing(target))?;
        let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        state.record(format!("set_files {}", names.join(",")));
        Ok(())
    }

    async fn snapshot_state(&mut self) -> Result<Value> {
        Ok(self.page.lock().snapshot.clone())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        self.page.lock().record("screenshot".to_string());
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn page_html(&mut self) -> Result<String> {
        self.page.lock().record("page_html".to_string());
        Ok("<html><body>fake</body></html>".to_string())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.page.lock();
        state.closes += 1;
        state.record("close".to_string());
        Ok(())
    }
}
