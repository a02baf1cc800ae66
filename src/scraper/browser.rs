//! Anti-bot cookie acquisition.
//!
//! The listing page sits behind a Cloudflare challenge. A throwaway headless
//! browser loads the challenge page, clicks through the verification widget
//! and hands back the `cf_clearance` / `__cf_bm` cookies. Every attempt gets a
//! fresh browser; the session is closed when its guard drops, whatever the
//! attempt's outcome.

use crate::config::ChallengeConfig;
use crate::errors::IngestError;
use crate::models::{BrowserCookie, SessionCookies};
use anyhow::{Context, Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, error, info, warn};

// ── Browser seam ──────────────────────────────────────────────────────────────

/// One isolated browser session.
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Click the challenge's verification control. `Ok(false)` when no
    /// control was found (the challenge may pass on its own).
    fn click_verification(&mut self) -> Result<bool>;

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>>;

    fn close(&mut self);
}

pub trait BrowserLauncher: Send + Sync {
    type Session: BrowserSession;

    fn launch(&self) -> Result<Self::Session>;
}

/// Closes the wrapped session exactly once, on drop.
pub struct SessionGuard<S: BrowserSession> {
    session: S,
}

impl<S: BrowserSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }
}

impl<S: BrowserSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: BrowserSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: BrowserSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

// ── Chrome ────────────────────────────────────────────────────────────────────

pub struct ChromeLauncher {
    headless: bool,
    selectors: Vec<String>,
    element_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: &ChallengeConfig) -> Self {
        Self {
            headless: config.headless,
            selectors: config.verification_selectors.clone(),
            element_timeout: Duration::from_millis(config.element_timeout_ms),
        }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self) -> Result<ChromeSession> {
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .window_size(Some((1280, 800)))
            .args(vec![
                OsStr::new("--incognito"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .context("Invalid Chrome launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;

        Ok(ChromeSession {
            browser: Some(browser),
            tab,
            selectors: self.selectors.clone(),
            element_timeout: self.element_timeout,
        })
    }
}

pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    selectors: Vec<String>,
    element_timeout: Duration,
}

impl BrowserSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    fn click_verification(&mut self) -> Result<bool> {
        for selector in &self.selectors {
            let Ok(element) = self
                .tab
                .wait_for_element_with_custom_timeout(selector, self.element_timeout)
            else {
                continue;
            };
            element
                .click()
                .with_context(|| format!("Failed to click {:?}", selector))?;
            debug!("Clicked verification control {:?}", selector);
            return Ok(true);
        }
        Ok(false)
    }

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        let jar = self.tab.get_cookies().context("Failed to read cookies")?;
        Ok(jar
            .into_iter()
            .map(|c| BrowserCookie::new(c.name, c.value))
            .collect())
    }

    fn close(&mut self) {
        if let Err(e) = self.tab.close(false) {
            debug!("Tab close failed: {}", e);
        }
        // dropping the Browser kills the Chrome process and its temp profile
        self.browser.take();
    }
}

// ── Acquirer ──────────────────────────────────────────────────────────────────

/// Drives the challenge through fresh browser sessions.
///
/// A session attempt is synchronous (CDP round trips, element waits, the
/// settle delay) and runs on tokio's blocking pool.
pub struct CookieAcquirer<L: BrowserLauncher> {
    launcher: Arc<L>,
    config: ChallengeConfig,
}

impl<L> CookieAcquirer<L>
where
    L: BrowserLauncher + 'static,
    L::Session: 'static,
{
    pub fn new(launcher: L, config: &ChallengeConfig) -> Self {
        Self {
            launcher: Arc::new(launcher),
            config: config.clone(),
        }
    }

    /// Obtain the clearance cookies, trying at most `max_attempts` fresh
    /// browser sessions back to back.
    pub async fn acquire(&self) -> Result<SessionCookies, IngestError> {
        let max = self.config.max_attempts.max(1);
        let started = AtomicU32::new(0);
        info!("Acquiring anti-bot cookies from {}", self.config.url);

        let strategy = FixedInterval::from_millis(0).take(max as usize - 1);
        let result = Retry::spawn(strategy, || {
            let n = started.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempt(n, max)
        })
        .await;

        let attempts = started.load(Ordering::SeqCst);
        result.map_err(|e| {
            error!("No clearance cookies after {} attempts: {:#}", attempts, e);
            IngestError::AntiBotBypass { attempts }
        })
    }

    async fn attempt(&self, n: u32, max: u32) -> Result<SessionCookies> {
        info!("Cookie attempt {}/{}", n, max);

        let launcher = Arc::clone(&self.launcher);
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || run_session(launcher.as_ref(), &config))
            .await
            .context("Browser session task panicked")
            .and_then(|r| r);

        match &outcome {
            Ok(_) => info!("Clearance cookies obtained on attempt {}", n),
            Err(e) => warn!("Attempt {}/{} failed: {:#}", n, max, e),
        }
        outcome
    }
}

fn run_session<L: BrowserLauncher>(launcher: &L, config: &ChallengeConfig) -> Result<SessionCookies> {
    let mut session = SessionGuard::new(launcher.launch()?);
    drive(&mut *session, config)
}

fn drive<S: BrowserSession>(session: &mut S, config: &ChallengeConfig) -> Result<SessionCookies> {
    session.navigate(&config.url)?;

    let settle = rand::random_range(config.settle_min_ms..=config.settle_max_ms);
    debug!("Letting challenge scripts settle for {} ms", settle);
    thread::sleep(Duration::from_millis(settle));

    if !session.click_verification()? {
        debug!("No verification control found; waiting for cookies anyway");
    }

    wait_for_cookies(session, config)
}

/// Poll the jar until both cookies show up or the timeout passes.
fn wait_for_cookies<S: BrowserSession>(session: &mut S, config: &ChallengeConfig) -> Result<SessionCookies> {
    let timeout = Duration::from_millis(config.cookie_timeout_ms);
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));
    let deadline = Instant::now() + timeout;

    loop {
        let jar = session.cookies()?;
        if let Some(cookies) = SessionCookies::from_jar(&jar) {
            return Ok(cookies);
        }
        if Instant::now() >= deadline {
            let names: Vec<&str> = jar.iter().map(|c| c.name.as_str()).collect();
            return Err(anyhow!(
                "clearance cookies not set within {:?} (have: {:?})",
                timeout,
                names
            ));
        }
        thread::sleep(poll);
    }
}

/// Convenience for the real pipeline.
pub async fn acquire_session_cookies(config: &ChallengeConfig) -> Result<SessionCookies, IngestError> {
    CookieAcquirer::new(ChromeLauncher::new(config), config)
        .acquire()
        .await
}
