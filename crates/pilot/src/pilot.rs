//! Entry point for one command: resolve the notebook, drive the operation
//! with a bounded retry, then remember the notebook for next time.

use async_trait::async_trait;
use folio_browser::BrowserLauncher;
use folio_core::{
    AddressingHint, Config, Error, NotebookHints, NotebookRef, Operation, OperationOutput, Paths,
    Result,
};
use folio_storage::{AuthStatus, CredentialStore, DefaultNotebookMemory};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::driver::{Driver, RunOptions};
use crate::login::interactive_login;
use crate::resolver::{NotebookCatalog, Resolver};

/// One initial attempt plus one retry on a transient session failure.
pub const MAX_ATTEMPTS: u32 = 2;

/// Result of a successful command.
#[derive(Debug, Clone)]
pub struct Completed {
    pub output: OperationOutput,
    /// The notebook the operation ran against, or the one it created.
    pub notebook: Option<NotebookRef>,
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or
/// `MAX_ATTEMPTS` is used up. The attempt number starts at 1.
pub async fn run_with_retry<T, F, Fut>(op_name: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut n = 1;
    loop {
        match attempt(n).await {
            Err(e) if e.is_transient() && n < MAX_ATTEMPTS => {
                warn!(operation = op_name, attempt = n, "Transient failure, retrying: {}", e);
                n += 1;
            }
            other => return other,
        }
    }
}

pub struct Pilot {
    config: Config,
    paths: Paths,
    launcher: Arc<dyn BrowserLauncher>,
    credentials: Arc<dyn CredentialStore>,
    memory: Arc<dyn DefaultNotebookMemory>,
    options: RunOptions,
}

impl Pilot {
    pub fn new(
        config: Config,
        paths: Paths,
        launcher: Arc<dyn BrowserLauncher>,
        credentials: Arc<dyn CredentialStore>,
        memory: Arc<dyn DefaultNotebookMemory>,
    ) -> Self {
        Self {
            config,
            paths,
            launcher,
            credentials,
            memory,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn login(&self) -> Result<AuthStatus> {
        interactive_login(
            &self.config,
            &self.paths,
            self.launcher.as_ref(),
            self.credentials.as_ref(),
        )
        .await
    }

    /// Execute `op` against the notebook addressed by `hints`.
    pub async fn execute(&self, hints: &NotebookHints, op: Operation) -> Result<Completed> {
        if op.is_unconfirmed_destructive() {
            return Ok(Completed {
                output: self.preview(hints, &op),
                notebook: None,
            });
        }
        if !self.credentials.is_authenticated() {
            return Err(Error::NotAuthenticated(
                "no stored session; run `folio auth setup`".into(),
            ));
        }
        if let Operation::AddFileSource { path } = &op {
            if !path.is_file() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not a readable file", path.display()),
                )));
            }
        }

        let notebook = if op.is_notebook_scoped() {
            let mut resolver = Resolver::new(self);
            Some(resolver.resolve(hints, self.memory.get()).await?)
        } else {
            None
        };

        let output = run_with_retry(op.name(), |n| self.attempt(n, notebook.as_ref(), &op)).await?;
        let notebook = match &output {
            OperationOutput::NotebookCreated { notebook } => Some(notebook.clone()),
            _ => notebook,
        };
        if let Some(nb) = &notebook {
            self.remember(nb, &op);
        }
        Ok(Completed { output, notebook })
    }

    async fn attempt(&self, n: u32, notebook: Option<&NotebookRef>, op: &Operation) -> Result<OperationOutput> {
        info!(operation = op.name(), attempt = n, "Starting browser attempt");
        let mut driver = Driver::new(
            &self.config,
            &self.paths,
            self.launcher.as_ref(),
            self.credentials.as_ref(),
            self.options.clone(),
        );
        driver.run(notebook, op).await
    }

    /// Update default-notebook memory after a run that targeted or created a notebook.
    fn remember(&self, notebook: &NotebookRef, op: &Operation) {
        let outcome = if matches!(op, Operation::DeleteNotebook { .. }) {
            match self.memory.get() {
                Some(current) if current.id == notebook.id => self.memory.forget(),
                _ => Ok(()),
            }
        } else {
            self.memory.set(&notebook.id, &notebook.url)
        };
        if let Err(e) = outcome {
            warn!("Failed to update default notebook: {}", e);
        }
    }

    fn preview(&self, hints: &NotebookHints, op: &Operation) -> OperationOutput {
        let target = match hints.effective() {
            AddressingHint::Url(url) => url,
            AddressingHint::Id(id) => id,
            AddressingHint::Name(name) => format!("notebook matching '{}'", name),
            AddressingHint::None => match self.memory.get() {
                Some(record) => record.id,
                None => "(no notebook specified)".to_string(),
            },
        };
        let action = match op {
            Operation::RemoveSource { source, .. } => format!("remove source '{}'", source),
            _ => "delete notebook".to_string(),
        };
        OperationOutput::Preview { action, target }
    }
}

#[async_trait]
impl NotebookCatalog for Pilot {
    async fn fetch_notebooks(&self) -> Result<Vec<NotebookRef>> {
        let op = Operation::ListNotebooks;
        match run_with_retry(op.name(), |n| self.attempt(n, None, &op)).await? {
            OperationOutput::Notebooks { notebooks } => Ok(notebooks),
            other => Err(Error::UnexpectedPageState(format!(
                "notebook listing produced {:?}",
                other
            ))),
        }
    }
}
