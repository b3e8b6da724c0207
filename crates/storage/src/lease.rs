//! Per-operation session lease: a private profile directory plus a held lock file.
//!
//! The OS releases the lock when the owning process dies, which is what the
//! cleanup agent uses to tell crashed sessions from live ones.

use chrono::Utc;
use folio_core::{Error, Paths, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// `is_held` takes the lock for an instant, so a fresh lease may briefly
/// lose the race against a concurrent cleanup scan.
const LOCK_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

pub struct SessionLease {
    id: String,
    profile_dir: PathBuf,
    lock_path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLease {
    pub fn acquire(paths: &Paths) -> Result<Self> {
        paths.ensure_dirs()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let lock_path = paths.session_lock_file(&id);
        let profile_dir = paths.session_profile_dir(&id);

        let mut lock_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)?;
        lock_with_retry(&lock_file, &lock_path)?;
        writeln!(lock_file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;

        std::fs::create_dir_all(&profile_dir)?;
        debug!(session = %id, "Acquired session lease");

        Ok(Self {
            id,
            profile_dir,
            lock_path,
            lock_file: Some(lock_file),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.profile_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
                warn!(session = %self.id, error = %e, "Failed to remove session profile");
            }
        }
        let _ = std::fs::remove_file(&self.lock_path);
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
        }
        debug!(session = %self.id, "Released session lease");
    }
}

fn lock_with_retry(file: &File, path: &Path) -> Result<()> {
    let mut attempt = 1;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= LOCK_ATTEMPTS => {
                let _ = std::fs::remove_file(path);
                return Err(Error::Storage(format!("Failed to lock {}: {}", path.display(), e)));
            }
            Err(_) => {
                attempt += 1;
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
        }
    }
}

/// Whether some live process still holds the lock at `lock_path`.
pub fn is_held(lock_path: &Path) -> bool {
    let file = match OpenOptions::new().write(true).open(lock_path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lease_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());

        let lease = SessionLease::acquire(&paths).unwrap();
        let lock_path = paths.session_lock_file(lease.id());
        let profile = lease.profile_dir().to_path_buf();
        assert!(profile.is_dir());
        assert!(is_held(&lock_path));

        let pid_line = std::fs::read_to_string(&lock_path).unwrap();
        assert!(pid_line.starts_with(&std::process::id().to_string()));

        drop(lease);
        assert!(!profile.exists());
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_acquire_waits_out_a_brief_check() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();

        let lock_path = temp_dir.path().join("contended.lock");
        std::fs::write(&lock_path, "").unwrap();
        let checker = OpenOptions::new().write(true).open(&lock_path).unwrap();
        checker.try_lock_exclusive().unwrap();

        let contender = OpenOptions::new().write(true).open(&lock_path).unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            checker.unlock().unwrap();
        });
        lock_with_retry(&contender, &lock_path).unwrap();
        release.join().unwrap();
        // The contender now owns the lock
        assert!(is_held(&lock_path));
    }

    #[test]
    fn test_unheld_lock_is_not_held() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("stale.lock");
        std::fs::write(&lock_path, "1 2020-01-01T00:00:00Z").unwrap();
        assert!(!is_held(&lock_path));
        assert!(!is_held(&temp_dir.path().join("missing.lock")));
    }
}
