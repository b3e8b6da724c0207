pub mod atomic;
pub mod cleanup;
pub mod credentials;
pub mod default_notebook;
pub mod lease;

pub use cleanup::{format_size, Artifact, ArtifactKind, CleanupAgent, CleanupReport};
pub use credentials::{
    AuthStatus, CredentialStore, FileCredentialStore, MemoryCredentialStore, SessionCredentials,
};
pub use default_notebook::{DefaultNotebookMemory, FileDefaultNotebook, MemoryDefaultNotebook};
pub use lease::SessionLease;
