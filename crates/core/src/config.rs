use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// "chrome", "edge" or "chromium".
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Explicit browser binary; autodetected when unset.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            binary: None,
            user_agent: default_user_agent(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_navigation_secs")]
    pub navigation_secs: u64,
    #[serde(default = "default_query_secs")]
    pub query_secs: u64,
    #[serde(default = "default_upload_secs")]
    pub upload_secs: u64,
    #[serde(default = "default_login_minutes")]
    pub login_minutes: u64,
    #[serde(default = "default_element_secs")]
    pub element_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period after submitting a source before a closed dialog alone
    /// counts as done (the spinner may not have rendered yet).
    #[serde(default = "default_source_settle_ms")]
    pub source_settle_ms: u64,
}

fn default_navigation_secs() -> u64 {
    30
}

fn default_query_secs() -> u64 {
    120
}

fn default_upload_secs() -> u64 {
    60
}

fn default_login_minutes() -> u64 {
    10
}

fn default_element_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_source_settle_ms() -> u64 {
    2500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_secs: default_navigation_secs(),
            query_secs: default_query_secs(),
            upload_secs: default_upload_secs(),
            login_minutes: default_login_minutes(),
            element_secs: default_element_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            source_settle_ms: default_source_settle_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_minutes * 60)
    }

    pub fn element(&self) -> Duration {
        Duration::from_secs(self.element_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn source_settle(&self) -> Duration {
        Duration::from_millis(self.source_settle_ms)
    }
}

/// Human-paced typing policy. Disabled means text is inserted at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    #[serde(default = "default_pacing_enabled")]
    pub enabled: bool,
    #[serde(default = "default_wpm_min")]
    pub wpm_min: u32,
    #[serde(default = "default_wpm_max")]
    pub wpm_max: u32,
    /// Probability of a longer hesitation after any character.
    #[serde(default = "default_pause_chance")]
    pub pause_chance: f64,
}

fn default_pacing_enabled() -> bool {
    true
}

fn default_wpm_min() -> u32 {
    320
}

fn default_wpm_max() -> u32 {
    480
}

fn default_pause_chance() -> f64 {
    0.05
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: default_pacing_enabled(),
            wpm_min: default_wpm_min(),
            wpm_max: default_wpm_max(),
            pause_chance: default_pause_chance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    /// Consecutive identical polls before an answer counts as finished.
    #[serde(default = "default_answer_stable_polls")]
    pub answer_stable_polls: u32,
}

fn default_base_url() -> String {
    "https://notebooklm.google.com".to_string()
}

fn default_answer_stable_polls() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            pacing: PacingConfig::default(),
            answer_stable_polls: default_answer_stable_polls(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config");
            Self::load(&config_path)
        } else {
            debug!("No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "baseUrl must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.pacing.wpm_min == 0 || self.pacing.wpm_min > self.pacing.wpm_max {
            return Err(Error::Config(format!(
                "pacing range {}..{} wpm is invalid",
                self.pacing.wpm_min, self.pacing.wpm_max
            )));
        }
        if !(0.0..=1.0).contains(&self.pacing.pause_chance) {
            return Err(Error::Config("pacing.pauseChance must be within 0..1".into()));
        }
        if self.answer_stable_polls == 0 {
            return Err(Error::Config("answerStablePolls must be at least 1".into()));
        }
        Ok(())
    }

    pub fn home_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    pub fn notebook_url(&self, id: &str) -> String {
        format!("{}/notebook/{}", self.base_url.trim_end_matches('/'), id)
    }

    /// Host part of `base_url`, used to verify where navigation landed.
    pub fn app_host(&self) -> &str {
        let rest = self
            .base_url
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.base_url);
        rest.split(['/', ':']).next().unwrap_or(rest)
    }
}
