//! `BrowserSession` over a CDP connection to one launched browser.

use async_trait::async_trait;
use base64::Engine;
use folio_core::{Error, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tracing::debug;

use crate::cdp::CdpClient;
use crate::engine::{BrowserSession, Locator};
use crate::pacing::TypingPacing;

const LOCATOR_POLL: Duration = Duration::from_millis(200);

/// Resolves a serialized `Locator` to matching elements, then runs `ACTION`
/// with `els` (all matches) and `vis` (visible matches) in scope.
const LOCATOR_JS: &str = r#"(function(loc) {
  function visible(el) {
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
  }
  function match(l, root) {
    let found = Array.from(root.querySelectorAll(l.css));
    if (l.text) {
      const needle = l.text.toLowerCase();
      found = found.filter(e => (e.innerText || e.textContent || '').toLowerCase().includes(needle));
    }
    return found;
  }
  function resolve(l) {
    if (!l.scope) return match(l, document);
    const out = [];
    for (const parent of resolve(l.scope)) {
      for (const e of match(l, parent)) {
        if (!out.includes(e)) out.push(e);
      }
    }
    return out;
  }
  const els = resolve(loc);
  const vis = els.filter(visible);
  ACTION
})"#;

/// Map a CDP transport or protocol error into the crate error.
///
/// Script and protocol errors mean the page is not what we expected; anything
/// else is the connection or the browser process failing.
pub fn cdp_err(e: String) -> Error {
    if e.starts_with("JS exception") || e.starts_with("CDP error") {
        Error::UnexpectedPageState(format!("CDP: {}", e))
    } else {
        Error::TransientSessionFailure(format!("CDP: {}", e))
    }
}

fn locator_script(locator: &Locator, action: &str) -> Result<String> {
    let literal = serde_json::to_string(locator)?;
    Ok(format!("{}({})", LOCATOR_JS.replace("ACTION", action), literal))
}

pub struct CdpSession {
    cdp: CdpClient,
    process: Child,
    navigation_timeout: Duration,
    closed: bool,
}

impl CdpSession {
    pub fn new(cdp: CdpClient, process: Child, navigation_timeout: Duration) -> Self {
        Self {
            cdp,
            process,
            navigation_timeout,
            closed: false,
        }
    }

    async fn run_locator(&self, locator: &Locator, action: &str) -> Result<Value> {
        let script = locator_script(locator, action)?;
        self.cdp.evaluate_js(&script).await.map_err(cdp_err)
    }

    async fn has_visible(&self, locator: &Locator) -> Result<bool> {
        let found = self.run_locator(locator, "return vis.length > 0;").await?;
        Ok(found.as_bool().unwrap_or(false))
    }

    async fn focus(&self, target: &Locator) -> Result<()> {
        let focused = self
            .run_locator(
                target,
                "const el = vis[0] || els[0]; if (!el) return false; \
                 el.scrollIntoView({block: 'center'}); el.focus(); return true;",
            )
            .await?;
        if focused.as_bool() != Some(true) {
            return Err(Error::UnexpectedPageState(format!(
                "Element not found: {}",
                target
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        if let Some(error_text) = self.cdp.navigate(url).await.map_err(cdp_err)? {
            return Err(Error::TransientSessionFailure(format!(
                "Navigation to {} failed: {}",
                url, error_text
            )));
        }

        let start = Instant::now();
        loop {
            // Page.navigate returns before the new document exists
            tokio::time::sleep(LOCATOR_POLL).await;
            let state = self
                .cdp
                .evaluate_js("document.readyState")
                .await
                .map_err(cdp_err)?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if start.elapsed() > self.navigation_timeout {
                return Err(Error::TransientSessionFailure(format!(
                    "Navigation to {} did not finish within {}s",
                    url,
                    self.navigation_timeout.as_secs()
                )));
            }
        }
    }

    async fn current_url(&mut self) -> Result<String> {
        let url = self
            .cdp
            .evaluate_js("window.location.href")
            .await
            .map_err(cdp_err)?;
        Ok(url.as_str().unwrap_or_default().to_string())
    }

    async fn find(&mut self, candidates: &[Locator]) -> Result<Option<Locator>> {
        for candidate in candidates {
            if self.has_visible(candidate).await? {
                debug!(locator = %candidate, "Locator matched");
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    async fn wait_for(&mut self, candidates: &[Locator], timeout: Duration) -> Result<Locator> {
        let start = Instant::now();
        loop {
            if let Some(found) = self.find(candidates).await? {
                return Ok(found);
            }
            if start.elapsed() > timeout {
                let wanted: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
                return Err(Error::Timeout(format!(
                    "None of [{}] appeared within {}s",
                    wanted.join(", "),
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(LOCATOR_POLL).await;
        }
    }

    async fn click(&mut self, target: &Locator) -> Result<()> {
        let clicked = self
            .run_locator(
                target,
                "const el = vis[0]; if (!el) return false; \
                 el.scrollIntoView({block: 'center'}); el.click(); return true;",
            )
            .await?;
        if clicked.as_bool() != Some(true) {
            return Err(Error::UnexpectedPageState(format!(
                "Element not found: {}",
                target
            )));
        }
        debug!(locator = %target, "Clicked");
        Ok(())
    }

    async fn hover(&mut self, target: &Locator) -> Result<()> {
        let center = self
            .run_locator(
                target,
                "const el = vis[0]; if (!el) return null; \
                 el.scrollIntoView({block: 'center'}); \
                 const r = el.getBoundingClientRect(); \
                 return [r.left + r.width / 2, r.top + r.height / 2];",
            )
            .await?;
        let (x, y) = match center.as_array().map(|a| a.as_slice()) {
            Some([x, y]) => (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0)),
            _ => {
                return Err(Error::UnexpectedPageState(format!(
                    "Element not found: {}",
                    target
                )))
            }
        };
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y)
            .await
            .map_err(cdp_err)
    }

    async fn type_text(&mut self, target: &Locator, text: &str, pacing: &TypingPacing) -> Result<()> {
        self.focus(target).await?;
        if pacing.is_instant() {
            return self.cdp.insert_text(text).await.map_err(cdp_err);
        }
        let delays = pacing.schedule(text);
        for (ch, delay) in text.chars().zip(delays) {
            let mut buf = [0u8; 4];
            self.cdp
                .insert_text(ch.encode_utf8(&mut buf))
                .await
                .map_err(cdp_err)?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        let (key_name, code, modifiers) = parse_key_spec(key);
        self.cdp
            .dispatch_key_event("keyDown", &key_name, &code, modifiers)
            .await
            .map_err(cdp_err)?;
        self.cdp
            .dispatch_key_event("keyUp", &key_name, &code, modifiers)
            .await
            .map_err(cdp_err)
    }

    async fn read_texts(&mut self, target: &Locator) -> Result<Vec<String>> {
        let texts = self
            .run_locator(
                target,
                "return els.map(e => (e.innerText || e.textContent || '').trim());",
            )
            .await?;
        Ok(texts
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_checked(&mut self, target: &Locator) -> Result<Option<bool>> {
        let state = self
            .run_locator(
                target,
                "const el = els[0]; if (!el) return null; \
                 const input = el.matches('input') ? el : el.querySelector('input[type=checkbox]'); \
                 if (input) return !!input.checked; \
                 if (el.getAttribute('aria-checked') !== null) return el.getAttribute('aria-checked') === 'true'; \
                 return /checked/.test(el.className);",
            )
            .await?;
        Ok(state.as_bool())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        self.cdp.evaluate_js(script).await.map_err(cdp_err)
    }

    async fn set_files(&mut self, target: &Locator, files: &[PathBuf]) -> Result<()> {
        let script = locator_script(target, "return els[0] || null;")?;
        let object_id = self
            .cdp
            .evaluate_handle(&script)
            .await
            .map_err(cdp_err)?
            .ok_or_else(|| Error::UnexpectedPageState(format!("File input not found: {}", target)))?;
        let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        self.cdp
            .set_file_input_files_by_object(files, &object_id)
            .await
            .map_err(cdp_err)?;
        self.cdp
            .call_function_on(
                &object_id,
                "function() { this.dispatchEvent(new Event('change', {bubbles: true})); }",
            )
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn snapshot_state(&mut self) -> Result<Value> {
        let cookies = self.cdp.get_all_cookies().await.map_err(cdp_err)?;
        Ok(json!({ "cookies": cookies }))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let data = self.cdp.screenshot().await.map_err(cdp_err)?;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::UnexpectedPageState(format!("Invalid screenshot data: {}", e)))
    }

    async fn page_html(&mut self) -> Result<String> {
        let html = self
            .cdp
            .evaluate_js("document.documentElement.outerHTML")
            .await
            .map_err(cdp_err)?;
        Ok(html.as_str().unwrap_or_default().to_string())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.cdp.is_connected() {
            if let Err(e) = self.cdp.close_browser().await {
                debug!("Browser.close failed (may already be gone): {}", e);
            }
        }
        let _ = self.process.kill().await;
        debug!("Browser session closed");
        Ok(())
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.process.start_kill();
        }
    }
}

/// Parse a key spec like "Enter", "Escape" or "Ctrl+A" into (key, code, modifiers).
fn parse_key_spec(key: &str) -> (String, String, i32) {
    let parts: Vec<&str> = key.split('+').collect();
    let mut modifiers = 0i32;
    let mut main_key = key.to_string();

    if parts.len() > 1 {
        for &part in &parts[..parts.len() - 1] {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= 2,
                "alt" | "option" => modifiers |= 1,
                "shift" => modifiers |= 8,
                "meta" | "cmd" | "command" => modifiers |= 4,
                _ => {}
            }
        }
        main_key = parts.last().unwrap_or(&key).to_string();
    }

    let code = match main_key.as_str() {
        "Enter" | "Return" => "Enter",
        "Tab" => "Tab",
        "Escape" | "Esc" => "Escape",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "ArrowUp" | "Up" => "ArrowUp",
        "ArrowDown" | "Down" => "ArrowDown",
        "Space" | " " => "Space",
        _ => {
            if main_key.chars().count() == 1 {
                return (main_key.clone(), format!("Key{}", main_key.to_uppercase()), modifiers);
            }
            &main_key
        }
    }
    .to_string();

    let key_name = match main_key.as_str() {
        "Return" => "Enter".to_string(),
        "Esc" => "Escape".to_string(),
        _ => main_key,
    };

    (key_name, code, modifiers)
}
