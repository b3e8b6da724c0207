pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{BrowserConfig, Config, PacingConfig, TimeoutConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{
    notebook_id_from_url, AddressingHint, DefaultRecord, NotebookHints, NotebookRef, Operation,
    OperationOutput, SourceEntry, SourceKind, ToggleMode,
};
