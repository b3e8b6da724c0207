pub mod cdp;
pub mod engine;
pub mod launcher;
pub mod pacing;
pub mod session;

pub use cdp::CdpClient;
pub use engine::{BrowserLauncher, BrowserSession, LaunchOptions, Locator};
pub use launcher::{find_browser_binary, BrowserKind, CdpLauncher};
pub use pacing::TypingPacing;
pub use session::CdpSession;
