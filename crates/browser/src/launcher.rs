//! Launching a local Chromium-family browser with remote debugging enabled.

use async_trait::async_trait;
use folio_core::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::cdp::CdpClient;
use crate::engine::{BrowserLauncher, BrowserSession, LaunchOptions};
use crate::session::{cdp_err, CdpSession};

/// Hides the most common automation fingerprint before any page script runs.
const STEALTH_INIT_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

const CDP_READY_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chrome,
    Chromium,
    Edge,
}

impl BrowserKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            "chromium" => Self::Chromium,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Edge => "edge",
        }
    }
}

/// Launches a fresh browser process per session and talks CDP to it.
#[derive(Debug, Default, Clone)]
pub struct CdpLauncher;

impl CdpLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        let kind = BrowserKind::parse(&options.engine);
        let binary = match &options.binary {
            Some(b) => b.clone(),
            None => find_browser_binary(kind).ok_or_else(|| {
                Error::Config(format!(
                    "{} not found; install it or set browser.binary in config.json",
                    kind.name()
                ))
            })?,
        };

        std::fs::create_dir_all(&options.profile_dir)?;
        let debug_port = find_free_port().await.map_err(cdp_err)?;
        let args = build_browser_args(debug_port, &options);

        info!(
            port = debug_port,
            headless = options.headless,
            browser = kind.name(),
            "Launching browser"
        );

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::TransientSessionFailure(format!("Failed to launch {}: {}", binary, e))
            })?;

        // `child` is killed on drop if anything below fails
        wait_for_cdp_ready(debug_port, CDP_READY_TIMEOUT_SECS)
            .await
            .map_err(cdp_err)?;
        let page_ws_url = get_page_ws_url(debug_port).await.map_err(cdp_err)?;
        let cdp = CdpClient::connect(&page_ws_url).await.map_err(cdp_err)?;

        for domain in ["Page", "Runtime", "DOM", "Network"] {
            cdp.enable_domain(domain).await.map_err(cdp_err)?;
        }
        cdp.set_user_agent(&options.user_agent)
            .await
            .map_err(cdp_err)?;
        cdp.add_init_script(STEALTH_INIT_SCRIPT)
            .await
            .map_err(cdp_err)?;

        if let Some(state) = &options.credentials {
            let cookies = cookies_from_state(state);
            debug!(count = cookies.len(), "Injecting stored cookies");
            if !cookies.is_empty() {
                cdp.set_cookies(&cookies).await.map_err(cdp_err)?;
            }
        }

        debug!(ws_url = %page_ws_url, "CDP connection established");
        Ok(Box::new(CdpSession::new(
            cdp,
            child,
            options.navigation_timeout,
        )))
    }
}

/// Cookies from a stored state blob, reduced to what `Network.setCookies` accepts.
pub fn cookies_from_state(state: &Value) -> Vec<Value> {
    const ACCEPTED: [&str; 9] = [
        "name", "value", "domain", "path", "secure", "httpOnly", "sameSite", "expires", "url",
    ];
    state
        .get("cookies")
        .and_then(|c| c.as_array())
        .map(|cookies| {
            cookies
                .iter()
                .filter_map(|c| c.as_object())
                .map(|c| {
                    let mut kept = serde_json::Map::new();
                    for key in ACCEPTED {
                        if let Some(v) = c.get(key) {
                            // Session cookies report expires = -1
                            if key == "expires" && v.as_f64().map(|e| e <= 0.0).unwrap_or(true) {
                                continue;
                            }
                            kept.insert(key.to_string(), v.clone());
                        }
                    }
                    Value::Object(kept)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn build_browser_args(debug_port: u16, options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", options.profile_dir.display()),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,900".to_string());
    args.extend(options.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

pub fn find_browser_binary(kind: BrowserKind) -> Option<String> {
    let candidates: Vec<&str> = match kind {
        BrowserKind::Chrome | BrowserKind::Chromium => {
            let mut c = if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome",
                    "google-chrome-stable",
                    "chromium",
                    "chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            };
            if kind == BrowserKind::Chromium {
                c.retain(|p| p.to_lowercase().contains("chromium"));
            }
            c
        }
        BrowserKind::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> std::result::Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the debugging endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> std::result::Result<String, String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Browser debugging endpoint not ready after {}s on port {}",
                timeout_secs, port
            ));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first page target, retried while the tab appears.
async fn get_page_ws_url(port: u16) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };
        let page = targets.iter().find_map(|t| {
            if t.get("type").and_then(|v| v.as_str()) == Some("page") {
                t.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
            } else {
                None
            }
        });
        if let Some(ws_url) = page {
            return Ok(ws_url.to_string());
        }
    }

    Err("No page target found after retries".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn options(headless: bool) -> LaunchOptions {
        LaunchOptions {
            headless,
            profile_dir: PathBuf::from("/tmp/folio-profile"),
            credentials: None,
            engine: "chrome".into(),
            binary: None,
            user_agent: "UA".into(),
            extra_args: vec!["--lang=en-US".into()],
            navigation_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_browser_args() {
        let args = build_browser_args(9222, &options(true));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/folio-profile".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--lang=en-US".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));

        let headed = build_browser_args(9222, &options(false));
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_browser_kind_parse() {
        assert_eq!(BrowserKind::parse("Chrome"), BrowserKind::Chrome);
        assert_eq!(BrowserKind::parse("msedge"), BrowserKind::Edge);
        assert_eq!(BrowserKind::parse("chromium"), BrowserKind::Chromium);
        assert_eq!(BrowserKind::parse("whatever"), BrowserKind::Chrome);
    }

    #[test]
    fn test_cookies_from_state_strips_readonly_fields() {
        let state = json!({
            "cookies": [
                {"name": "SID", "value": "v", "domain": ".google.com", "path": "/",
                 "expires": -1, "size": 10, "session": true, "httpOnly": true},
                {"name": "HSID", "value": "w", "domain": ".google.com", "path": "/",
                 "expires": 1999999999.0}
            ]
        });
        let cookies = cookies_from_state(&state);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].get("size").is_none());
        assert!(cookies[0].get("expires").is_none());
        assert_eq!(cookies[0]["httpOnly"], true);
        assert_eq!(cookies[1]["expires"], 1999999999.0);
        assert!(cookies_from_state(&json!({})).is_empty());
    }
}
