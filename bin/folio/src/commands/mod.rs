pub mod ask;
pub mod auth;
pub mod cleanup;
pub mod notebooks;
pub mod output;
pub mod sources;

use folio_browser::CdpLauncher;
use folio_core::{Config, NotebookHints, Operation, Paths};
use folio_pilot::{Completed, Pilot, RunOptions};
use folio_storage::{FileCredentialStore, FileDefaultNotebook};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a command needs, resolved once from the global flags.
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub json: bool,
    options: RunOptions,
}

impl Context {
    pub fn new(home: Option<PathBuf>, show_browser: bool, debug: bool, json: bool) -> anyhow::Result<Self> {
        let paths = match home {
            Some(base) => Paths::with_base(base),
            None => Paths::new(),
        };
        paths.ensure_dirs()?;
        let config = Config::load_or_default(&paths)?;
        Ok(Self {
            paths,
            config,
            json,
            options: RunOptions {
                headless: !show_browser,
                diagnostics: debug,
            },
        })
    }

    pub fn credentials(&self) -> FileCredentialStore {
        FileCredentialStore::new(self.paths.clone())
    }

    pub fn pilot(&self) -> Pilot {
        Pilot::new(
            self.config.clone(),
            self.paths.clone(),
            Arc::new(CdpLauncher::new()),
            Arc::new(self.credentials()),
            Arc::new(FileDefaultNotebook::new(self.paths.clone())),
        )
        .with_options(self.options.clone())
    }

    /// Run one operation and print its result.
    pub async fn execute(&self, hints: NotebookHints, op: Operation) -> anyhow::Result<Completed> {
        let done = self.pilot().execute(&hints, op).await?;
        output::print_completed(&done, self.json)?;
        output::refuse_preview(&done)?;
        Ok(done)
    }
}
