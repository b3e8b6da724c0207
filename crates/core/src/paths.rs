use std::path::PathBuf;

/// Layout of the private state directory (`~/.folio` by default).
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("FOLIO_HOME") {
            if !home.trim().is_empty() {
                return Self::with_base(PathBuf::from(home));
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".folio"))
            .unwrap_or_else(|| PathBuf::from(".folio"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn browser_state_dir(&self) -> PathBuf {
        self.base.join("browser_state")
    }

    pub fn state_file(&self) -> PathBuf {
        self.browser_state_dir().join("state.json")
    }

    pub fn auth_info_file(&self) -> PathBuf {
        self.base.join("auth_info.json")
    }

    pub fn default_notebook_file(&self) -> PathBuf {
        self.base.join("default_notebook.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    pub fn session_profile_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }

    pub fn session_lock_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.lock", session_id))
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.base.join("debug")
    }

    /// Default destination of downloaded source content.
    pub fn downloads_dir(&self) -> PathBuf {
        self.base.join("downloads")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.base.clone(),
            self.browser_state_dir(),
            self.sessions_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
            restrict_permissions(&dir)?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}
