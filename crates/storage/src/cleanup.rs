//! Removal of leftovers from crashed or killed sessions.

use folio_core::{Paths, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::lease::is_held;

/// Session files younger than this may belong to a lease still being set up.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Lock file whose owner is gone.
    StaleLock,
    /// Browser profile directory without a live lease.
    OrphanedProfile,
    /// Temp file left by an interrupted atomic write.
    PartialWrite,
    /// Persisted credentials (full reset only).
    CredentialState,
    /// Advisory auth marker (full reset only).
    AuthMarker,
    /// Remembered default notebook (full reset only).
    DefaultNotebook,
}

impl ArtifactKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ArtifactKind::StaleLock => "stale session lock",
            ArtifactKind::OrphanedProfile => "orphaned browser profile",
            ArtifactKind::PartialWrite => "interrupted write",
            ArtifactKind::CredentialState => "browser credentials",
            ArtifactKind::AuthMarker => "authentication status",
            ArtifactKind::DefaultNotebook => "default notebook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<Artifact>,
    pub in_use: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn freed_bytes(&self) -> u64 {
        self.removed.iter().map(|a| a.size_bytes).sum()
    }
}

pub struct CleanupAgent {
    paths: Paths,
    include_state: bool,
    grace: Duration,
}

impl CleanupAgent {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            include_state: false,
            grace: DEFAULT_GRACE,
        }
    }

    /// Minimum age before a session file or temp file counts as abandoned.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn is_recent(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age < self.grace)
            .unwrap_or(false)
    }

    /// Also remove credentials and the default notebook (a full reset).
    pub fn with_state(mut self, include_state: bool) -> Self {
        self.include_state = include_state;
        self
    }

    /// Removable artifacts. Reads only; live sessions are never listed.
    pub fn preview(&self) -> Result<Vec<Artifact>> {
        Ok(self.scan()?.0)
    }

    /// Session artifacts that belong to a running operation.
    pub fn in_use(&self) -> Result<Vec<PathBuf>> {
        Ok(self.scan()?.1)
    }

    pub fn execute(&self) -> Result<CleanupReport> {
        let (removable, in_use) = self.scan()?;
        let mut report = CleanupReport {
            in_use,
            ..CleanupReport::default()
        };

        for artifact in removable {
            // A session may have started between scan and removal.
            if artifact.kind == ArtifactKind::OrphanedProfile {
                if let Some(lock) = lock_for_profile(&artifact.path) {
                    if is_held(&lock) {
                        report.in_use.push(artifact.path);
                        continue;
                    }
                }
            }
            if artifact.kind == ArtifactKind::StaleLock && is_held(&artifact.path) {
                report.in_use.push(artifact.path);
                continue;
            }

            let result = if artifact.path.is_dir() {
                std::fs::remove_dir_all(&artifact.path)
            } else {
                std::fs::remove_file(&artifact.path)
            };
            match result {
                Ok(()) => {
                    info!(path = %artifact.path.display(), kind = artifact.kind.describe(), "Removed");
                    report.removed.push(artifact);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %artifact.path.display(), error = %e, "Cleanup failed");
                    report.failed.push((artifact.path, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    fn scan(&self) -> Result<(Vec<Artifact>, Vec<PathBuf>)> {
        let mut removable = Vec::new();
        let mut in_use = Vec::new();

        let sessions_dir = self.paths.sessions_dir();
        if sessions_dir.is_dir() {
            let mut locks = BTreeSet::new();
            let mut profiles = BTreeSet::new();
            for entry in std::fs::read_dir(&sessions_dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    profiles.insert(path);
                } else if path.extension().map(|e| e == "lock").unwrap_or(false) {
                    locks.insert(path);
                } else if is_partial_write(&path) {
                    if self.is_recent(&path) {
                        in_use.push(path);
                    } else {
                        removable.push(artifact(path, ArtifactKind::PartialWrite));
                    }
                }
            }

            for lock in &locks {
                let profile = lock.with_extension("");
                if is_held(lock) || self.is_recent(lock) {
                    in_use.push(lock.clone());
                    if profiles.remove(&profile) {
                        in_use.push(profile);
                    }
                } else {
                    removable.push(artifact(lock.clone(), ArtifactKind::StaleLock));
                }
            }
            for profile in profiles {
                if self.is_recent(&profile) {
                    in_use.push(profile);
                } else {
                    removable.push(artifact(profile, ArtifactKind::OrphanedProfile));
                }
            }
        }

        for dir in [self.paths.base.clone(), self.paths.browser_state_dir()] {
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_file() && is_partial_write(&path) {
                    if self.is_recent(&path) {
                        in_use.push(path);
                    } else {
                        removable.push(artifact(path, ArtifactKind::PartialWrite));
                    }
                }
            }
        }

        if self.include_state {
            for (path, kind) in [
                (self.paths.browser_state_dir(), ArtifactKind::CredentialState),
                (self.paths.auth_info_file(), ArtifactKind::AuthMarker),
                (self.paths.default_notebook_file(), ArtifactKind::DefaultNotebook),
            ] {
                if path.exists() {
                    removable.retain(|a: &Artifact| !a.path.starts_with(&path));
                    removable.push(artifact(path, kind));
                }
            }
        }

        Ok((removable, in_use))
    }
}

fn artifact(path: PathBuf, kind: ArtifactKind) -> Artifact {
    let size_bytes = disk_size(&path);
    Artifact {
        path,
        kind,
        size_bytes,
    }
}

fn is_partial_write(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') && n.ends_with(".tmp")
        })
        .unwrap_or(false)
}

fn lock_for_profile(profile: &Path) -> Option<PathBuf> {
    let name = profile.file_name()?.to_string_lossy().to_string();
    Some(profile.with_file_name(format!("{}.lock", name)))
}

fn disk_size(path: &Path) -> u64 {
    if path.is_file() {
        return std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            total += disk_size(&entry.path());
        }
    }
    total
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::SessionLease;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Paths) {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        (temp_dir, paths)
    }

    /// Leftovers in these tests are created moments before the scan.
    fn agent(paths: &Paths) -> CleanupAgent {
        CleanupAgent::new(paths.clone()).with_grace(Duration::ZERO)
    }

    #[test]
    fn test_preview_finds_crash_leftovers() {
        let (_tmp, paths) = setup();
        // Crashed session: lock without owner plus its profile
        std::fs::write(paths.session_lock_file("dead"), "999999 x").unwrap();
        std::fs::create_dir_all(paths.session_profile_dir("dead").join("Default")).unwrap();
        std::fs::write(paths.session_profile_dir("dead").join("Default/Cookies"), b"1234").unwrap();
        // Profile with no lock at all
        std::fs::create_dir_all(paths.session_profile_dir("orphan")).unwrap();

        let artifacts = agent(&paths).preview().unwrap();
        let kinds: Vec<_> = artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == ArtifactKind::StaleLock).count(),
            1
        );
        assert_eq!(
            kinds.iter().filter(|k| **k == ArtifactKind::OrphanedProfile).count(),
            2
        );
        // Preview does not mutate
        assert!(paths.session_lock_file("dead").exists());
        assert!(paths.session_profile_dir("orphan").exists());
    }

    #[test]
    fn test_live_session_is_never_removed() {
        let (_tmp, paths) = setup();
        let lease = SessionLease::acquire(&paths).unwrap();
        std::fs::create_dir_all(paths.session_profile_dir("orphan")).unwrap();

        let agent = agent(&paths);
        let preview = agent.preview().unwrap();
        assert!(preview.iter().all(|a| !a.path.starts_with(lease.profile_dir())));
        assert!(!agent.in_use().unwrap().is_empty());

        let report = agent.execute().unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(lease.profile_dir().exists());
        assert!(paths.session_lock_file(lease.id()).exists());
        assert!(!paths.session_profile_dir("orphan").exists());
    }

    #[test]
    fn test_execute_removes_stale_lock_and_profile() {
        let (_tmp, paths) = setup();
        std::fs::write(paths.session_lock_file("dead"), "1 x").unwrap();
        std::fs::create_dir_all(paths.session_profile_dir("dead")).unwrap();

        let report = agent(&paths).execute().unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(!paths.session_lock_file("dead").exists());
        assert!(!paths.session_profile_dir("dead").exists());
    }

    #[test]
    fn test_state_only_with_full_reset() {
        let (_tmp, paths) = setup();
        std::fs::write(paths.state_file(), "{}").unwrap();
        std::fs::write(paths.default_notebook_file(), "{}").unwrap();
        std::fs::write(paths.browser_state_dir().join(".state.json.1.tmp"), "{").unwrap();

        let plain = agent(&paths).preview().unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].kind, ArtifactKind::PartialWrite);

        let full = agent(&paths).with_state(true).preview().unwrap();
        let kinds: Vec<_> = full.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&ArtifactKind::CredentialState));
        assert!(kinds.contains(&ArtifactKind::DefaultNotebook));
        // The temp file lives inside browser_state and is covered by it
        assert!(!kinds.contains(&ArtifactKind::PartialWrite));
    }

    #[test]
    fn test_fresh_session_files_are_left_alone() {
        let (_tmp, paths) = setup();
        // A lease between creating its lock file and locking it
        std::fs::write(paths.session_lock_file("starting"), "").unwrap();
        std::fs::create_dir_all(paths.session_profile_dir("starting")).unwrap();

        let agent = CleanupAgent::new(paths.clone());
        assert!(agent.preview().unwrap().is_empty());
        let report = agent.execute().unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.in_use.len(), 2);
        assert!(paths.session_lock_file("starting").exists());
        assert!(paths.session_profile_dir("starting").exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
