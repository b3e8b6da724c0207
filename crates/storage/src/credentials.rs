//! Persisted browser authentication state.
//!
//! The blob is opaque to everything outside this module: the driver hands it to
//! the browser at launch and receives a fresh one from the login flow.
//!
//! `state.json` is the only authoritative document; it carries the blob and the
//! freshness flag together so one atomic write replaces both. `auth_info.json`
//! is a best-effort summary for humans and is never read back for decisions.

use chrono::{DateTime, Utc};
use folio_core::{Paths, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::atomic::{read_json, remove_if_exists, write_json};

fn default_fresh() -> bool {
    true
}

/// Authenticated browser state captured after a successful login.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    /// Engine-specific state (for the CDP engine: `{"cookies": [...]}`).
    pub state: serde_json::Value,
    pub captured_at: DateTime<Utc>,
    /// Cleared when the live site bounced us to sign-in.
    #[serde(default = "default_fresh")]
    pub fresh: bool,
}

impl SessionCredentials {
    pub fn new(state: serde_json::Value) -> Self {
        Self {
            state,
            captured_at: Utc::now(),
            fresh: true,
        }
    }

    pub fn cookie_count(&self) -> usize {
        self.state
            .get("cookies")
            .and_then(|c| c.as_array())
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn usable(&self) -> bool {
        self.fresh && self.cookie_count() > 0
    }
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("state", &"<redacted>")
            .field("cookies", &self.cookie_count())
            .field("captured_at", &self.captured_at)
            .field("fresh", &self.fresh)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub cookie_count: usize,
}

impl AuthStatus {
    fn of(credentials: Option<&SessionCredentials>) -> Self {
        AuthStatus {
            authenticated: credentials.map(|c| c.usable()).unwrap_or(false),
            updated_at: credentials.map(|c| c.captured_at),
            cookie_count: credentials.map(|c| c.cookie_count()).unwrap_or(0),
        }
    }
}

pub trait CredentialStore: Send + Sync {
    /// Never fails: unreadable or missing state means "not authenticated".
    fn is_authenticated(&self) -> bool;

    fn load(&self) -> Result<Option<SessionCredentials>>;

    /// Replace the stored state. On error the previous state is left as it was.
    fn save(&self, credentials: &SessionCredentials) -> Result<()>;

    /// Mark the stored state stale without deleting it.
    fn invalidate(&self) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn status(&self) -> AuthStatus;
}

pub struct FileCredentialStore {
    paths: Paths,
}

impl FileCredentialStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    fn write_state(&self, credentials: &SessionCredentials) -> Result<()> {
        write_json(&self.paths.state_file(), credentials)?;
        if let Err(e) = write_json(&self.paths.auth_info_file(), &AuthStatus::of(Some(credentials))) {
            warn!(error = %e, "Could not refresh auth summary");
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn is_authenticated(&self) -> bool {
        match self.load() {
            Ok(credentials) => credentials.map(|c| c.usable()).unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "Credential state unreadable, treating as not authenticated");
                false
            }
        }
    }

    fn load(&self) -> Result<Option<SessionCredentials>> {
        read_json(&self.paths.state_file())
    }

    fn save(&self, credentials: &SessionCredentials) -> Result<()> {
        self.paths.ensure_dirs()?;
        let mut stored = credentials.clone();
        stored.fresh = true;
        self.write_state(&stored)?;
        info!(cookies = stored.cookie_count(), "Saved browser credentials");
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        let Some(mut stored) = self.load()? else {
            return Ok(());
        };
        stored.fresh = false;
        self.write_state(&stored)?;
        info!("Marked browser credentials as expired");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        remove_if_exists(&self.paths.state_file())?;
        remove_if_exists(&self.paths.auth_info_file())?;
        info!("Cleared browser credentials");
        Ok(())
    }

    fn status(&self) -> AuthStatus {
        match self.load() {
            Ok(credentials) => AuthStatus::of(credentials.as_ref()),
            Err(_) => AuthStatus::of(None),
        }
    }
}

/// In-process store for tests and embedding.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<SessionCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: SessionCredentials) -> Self {
        Self {
            inner: Mutex::new(Some(credentials)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SessionCredentials>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn is_authenticated(&self) -> bool {
        self.lock().as_ref().map(|c| c.usable()).unwrap_or(false)
    }

    fn load(&self) -> Result<Option<SessionCredentials>> {
        Ok(self.lock().clone())
    }

    fn save(&self, credentials: &SessionCredentials) -> Result<()> {
        let mut stored = credentials.clone();
        stored.fresh = true;
        *self.lock() = Some(stored);
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        if let Some(c) = self.lock().as_mut() {
            c.fresh = false;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }

    fn status(&self) -> AuthStatus {
        AuthStatus::of(self.lock().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> SessionCredentials {
        SessionCredentials::new(json!({
            "cookies": [
                {"name": "SID", "value": "secret-value", "domain": ".google.com", "path": "/"}
            ]
        }))
    }

    #[test]
    fn test_missing_state_is_not_authenticated() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(Paths::with_base(temp_dir.path().to_path_buf()));
        assert!(!store.is_authenticated());
        assert!(!store.status().authenticated);
    }

    #[test]
    fn test_save_invalidate_clear() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let store = FileCredentialStore::new(paths.clone());

        store.save(&sample()).unwrap();
        assert!(store.is_authenticated());
        assert_eq!(store.status().cookie_count, 1);

        store.invalidate().unwrap();
        assert!(!store.is_authenticated());
        // Invalidation keeps the blob
        assert!(store.load().unwrap().is_some());
        assert!(paths.state_file().exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!paths.state_file().exists());
        assert!(!paths.auth_info_file().exists());
    }

    #[test]
    fn test_corrupt_state_fails_closed() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let store = FileCredentialStore::new(paths.clone());
        store.save(&sample()).unwrap();

        std::fs::write(paths.state_file(), "{not json").unwrap();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_empty_cookie_jar_is_not_authenticated() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(Paths::with_base(temp_dir.path().to_path_buf()));
        store
            .save(&SessionCredentials::new(json!({"cookies": []})))
            .unwrap();
        assert!(!store.is_authenticated());
    }

    fn cookie_value(store: &FileCredentialStore) -> String {
        let stored = store.load().unwrap().unwrap();
        stored.state["cookies"][0]["value"].as_str().unwrap().to_string()
    }

    fn with_cookie(value: &str) -> SessionCredentials {
        SessionCredentials::new(json!({
            "cookies": [{"name": "SID", "value": value, "domain": ".google.com", "path": "/"}]
        }))
    }

    #[test]
    fn test_failed_save_keeps_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let store = FileCredentialStore::new(paths.clone());
        store.save(&with_cookie("OLD")).unwrap();

        // Occupy the temp slot so the staged write cannot be created
        let blocker = crate::atomic::temp_path(&paths.state_file()).unwrap();
        std::fs::create_dir_all(blocker.join("busy")).unwrap();

        assert!(store.save(&with_cookie("NEW")).is_err());
        assert_eq!(cookie_value(&store), "OLD");
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_unwritable_summary_does_not_fail_save() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let store = FileCredentialStore::new(paths.clone());
        store.save(&with_cookie("OLD")).unwrap();

        std::fs::remove_file(paths.auth_info_file()).unwrap();
        std::fs::create_dir_all(paths.auth_info_file().join("busy")).unwrap();

        store.save(&with_cookie("NEW")).unwrap();
        assert_eq!(cookie_value(&store), "NEW");
        assert!(store.is_authenticated());
        assert_eq!(store.status().cookie_count, 1);
    }

    #[test]
    fn test_freshness_lives_with_the_blob() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        let store = FileCredentialStore::new(paths.clone());
        store.save(&sample()).unwrap();
        store.invalidate().unwrap();

        // A stale summary claiming success does not resurrect the session
        std::fs::write(
            paths.auth_info_file(),
            r#"{"authenticated": true, "updated_at": null, "cookie_count": 1}"#,
        )
        .unwrap();
        assert!(!store.is_authenticated());
        assert!(!store.load().unwrap().unwrap().fresh);
    }

    #[test]
    fn test_debug_redacts_blob() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(!store.is_authenticated());
        store.save(&sample()).unwrap();
        assert!(store.is_authenticated());
        store.invalidate().unwrap();
        assert!(!store.is_authenticated());
        assert!(store.load().unwrap().is_some());
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
