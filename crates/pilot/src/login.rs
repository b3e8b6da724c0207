//! Interactive sign-in in a visible browser window.

use async_trait::async_trait;
use folio_browser::{BrowserLauncher, BrowserSession, LaunchOptions};
use folio_core::{Config, Error, Paths, Result};
use folio_storage::{AuthStatus, CredentialStore, SessionCredentials, SessionLease};
use tracing::{info, warn};

use crate::completion::{wait_until, CompletionPredicate, HomeLoaded, Check};
use crate::selectors;

/// The user finished signing in: the page is back on the app host and the
/// notebook list (or its empty state) rendered.
struct SignedIn {
    app_host: String,
    home: HomeLoaded,
}

#[async_trait]
impl CompletionPredicate for SignedIn {
    type Output = ();

    fn name(&self) -> &'static str {
        "sign-in completed"
    }

    async fn check(&mut self, session: &mut dyn BrowserSession) -> Result<Check<()>> {
        let url = session.current_url().await?;
        let host = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        if host != self.app_host || url.contains(selectors::SIGN_IN_HOST) {
            return Ok(Check::Pending);
        }
        Ok(match self.home.check(session).await? {
            Check::Done(_) => Check::Done(()),
            Check::Pending => Check::Pending,
        })
    }
}

/// Open a visible browser on the app, wait for the user to sign in, then
/// persist the resulting session state.
pub async fn interactive_login(
    config: &Config,
    paths: &Paths,
    launcher: &dyn BrowserLauncher,
    store: &dyn CredentialStore,
) -> Result<AuthStatus> {
    let lease = SessionLease::acquire(paths)?;
    let options = LaunchOptions {
        headless: false,
        profile_dir: lease.profile_dir().to_path_buf(),
        credentials: None,
        engine: config.browser.engine.clone(),
        binary: config.browser.binary.clone(),
        user_agent: config.browser.user_agent.clone(),
        extra_args: config.browser.extra_args.clone(),
        navigation_timeout: config.timeouts.navigation(),
    };
    let mut session = launcher.launch(options).await?;

    let result = capture_login(config, session.as_mut(), store).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close login browser: {}", e);
    }
    drop(lease);
    result?;
    Ok(store.status())
}

async fn capture_login(
    config: &Config,
    session: &mut dyn BrowserSession,
    store: &dyn CredentialStore,
) -> Result<()> {
    session.navigate(&config.home_url()).await?;
    info!("Waiting for sign-in in the browser window");

    let timeout = config.timeouts.login();
    let mut signed_in = SignedIn {
        app_host: config.app_host().to_string(),
        home: HomeLoaded {
            cards: selectors::notebook_cards(),
            body: selectors::page_body(),
        },
    };
    match wait_until(session, &mut signed_in, timeout, config.timeouts.poll_interval()).await {
        Ok(()) => {}
        Err(Error::Timeout(_)) => return Err(Error::LoginTimeout(timeout.as_secs())),
        Err(e) => return Err(e),
    }

    let credentials = SessionCredentials::new(session.snapshot_state().await?);
    if credentials.cookie_count() == 0 {
        return Err(Error::UnexpectedPageState(
            "signed in but the browser holds no cookies".into(),
        ));
    }
    store.save(&credentials)?;
    info!(cookies = credentials.cookie_count(), "Stored authenticated session");
    Ok(())
}
