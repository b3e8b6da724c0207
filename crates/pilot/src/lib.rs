pub mod completion;
pub mod driver;
pub mod login;
pub mod pilot;
pub mod resolver;
pub mod selectors;

#[cfg(test)]
mod testing;

pub use driver::{Driver, DriverState, RunOptions};
pub use login::interactive_login;
pub use pilot::{run_with_retry, Completed, Pilot, MAX_ATTEMPTS};
pub use resolver::{score_name, NotebookCatalog, Resolver, MATCH_THRESHOLD};
