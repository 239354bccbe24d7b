//! Interactive browser session against the short-link reply page.
//!
//! The page does not keep its compose control across submissions, so every
//! fragment walks the same small state machine:
//!
//! ```text
//! AwaitComposeControl -> AwaitInputReady -> Filled -> AwaitSubmitConfirmation
//! ```
//!
//! Each step is a single driver call under `step_timeout`, and the waits
//! re-check a bounded number of times before giving up. A failed fragment
//! re-opens the page so the next one starts clean.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::{
    DeliveryEndpoint, DeliveryExecutor, DeliveryOutcome, DeliveryRetryManager, EndpointKind,
    Pacing, send_each,
};
use crate::encoding::Fragment;
use crate::error::{BrowserError, ChannelError};

const CHANNEL: &str = "interactive_session";

/// Minimal page automation surface.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&mut self) -> Result<String, BrowserError>;
    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError>;
    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;
    /// Clear the control and type `text` into it.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), BrowserError>;
    /// `None` when the control is not attached.
    async fn input_value(&mut self, selector: &str) -> Result<Option<String>, BrowserError>;
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Starts a fresh browser for one delivery run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, BrowserError>;
}

#[derive(Debug, Clone)]
pub struct SessionSelectors {
    pub compose: String,
    pub input: String,
    pub submit: String,
    pub login_username: String,
    pub login_password: String,
    pub login_submit: String,
}

impl Default for SessionSelectors {
    fn default() -> Self {
        Self {
            compose: "button.reply, a.reply, [data-action='reply']".to_string(),
            input: "textarea".to_string(),
            submit: "button[type='submit'], button.send, [data-action='send']".to_string(),
            login_username: "input[type='email']".to_string(),
            login_password: "input[type='password']".to_string(),
            login_submit: "button[type='submit']".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Ceiling for any single driver call.
    pub step_timeout: Duration,
    /// Pause between re-checks of a wait condition.
    pub recheck_interval: Duration,
    /// Re-checks after the first check before a wait fails.
    pub max_rechecks: u32,
    /// Ceiling for the initial navigation and the post-login redirect.
    pub redirect_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(15),
            recheck_interval: Duration::from_millis(500),
            max_rechecks: 3,
            redirect_timeout: Duration::from_secs(30),
        }
    }
}

/// Device account used when the reply page asks for a login.
#[derive(Debug, Clone)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Per-fragment progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentStep {
    AwaitComposeControl,
    AwaitInputReady,
    Filled,
    AwaitSubmitConfirmation,
    Confirmed,
}

impl FragmentStep {
    fn name(self) -> &'static str {
        match self {
            Self::AwaitComposeControl => "await_compose_control",
            Self::AwaitInputReady => "await_input_ready",
            Self::Filled => "filled",
            Self::AwaitSubmitConfirmation => "await_submit_confirmation",
            Self::Confirmed => "confirmed",
        }
    }
}

pub struct SessionExecutor {
    launcher: Arc<dyn BrowserLauncher>,
    credentials: Option<DeviceCredentials>,
    selectors: SessionSelectors,
    timings: SessionTimings,
    pacing: Pacing,
    retry: Arc<DeliveryRetryManager>,
}

impl SessionExecutor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        credentials: Option<DeviceCredentials>,
        pacing: Pacing,
        retry: Arc<DeliveryRetryManager>,
    ) -> Self {
        Self {
            launcher,
            credentials,
            selectors: SessionSelectors::default(),
            timings: SessionTimings::default(),
            pacing,
            retry,
        }
    }

    pub fn with_selectors(mut self, selectors: SessionSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Run one driver call under the step timeout.
    async fn step<T>(
        &self,
        step: &str,
        timeout: Duration,
        call: impl Future<Output = Result<T, BrowserError>>,
    ) -> Result<T, BrowserError> {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout {
                step: step.to_string(),
                timeout,
            }),
        }
    }

    /// Poll `selector` until its presence equals `present`.
    ///
    /// Driver errors and timeouts count as a negative check.
    async fn wait_presence(
        &self,
        driver: &mut dyn BrowserDriver,
        step: FragmentStep,
        selector: &str,
        present: bool,
    ) -> Result<(), BrowserError> {
        for check in 0..=self.timings.max_rechecks {
            match self
                .step(step.name(), self.timings.step_timeout, driver.exists(selector))
                .await
            {
                Ok(found) if found == present => return Ok(()),
                Ok(_) => {}
                Err(e) => tracing::debug!(step = step.name(), check, error = %e, "Check failed"),
            }
            if check < self.timings.max_rechecks {
                tokio::time::sleep(self.timings.recheck_interval).await;
            }
        }
        Err(BrowserError::ElementNotFound {
            selector: selector.to_string(),
        })
    }

    /// Poll until the input detached or was reset after a submit.
    async fn wait_submitted(&self, driver: &mut dyn BrowserDriver) -> Result<(), BrowserError> {
        let step = FragmentStep::AwaitSubmitConfirmation;
        for check in 0..=self.timings.max_rechecks {
            match self
                .step(
                    step.name(),
                    self.timings.step_timeout,
                    driver.input_value(&self.selectors.input),
                )
                .await
            {
                Ok(None) => return Ok(()),
                Ok(Some(value)) if value.trim().is_empty() => return Ok(()),
                Ok(Some(_)) => {}
                Err(e) => tracing::debug!(step = step.name(), check, error = %e, "Check failed"),
            }
            if check < self.timings.max_rechecks {
                tokio::time::sleep(self.timings.recheck_interval).await;
            }
        }
        Err(BrowserError::Timeout {
            step: step.name().to_string(),
            timeout: self.timings.recheck_interval * self.timings.max_rechecks,
        })
    }

    /// Walk one fragment through the state machine.
    async fn send_fragment(
        &self,
        driver: &mut dyn BrowserDriver,
        text: &str,
    ) -> Result<(), BrowserError> {
        let timeout = self.timings.step_timeout;
        let mut step = FragmentStep::AwaitComposeControl;

        loop {
            tracing::debug!(step = step.name(), "Session step");
            step = match step {
                FragmentStep::AwaitComposeControl => {
                    // The input may already be open; the compose control is
                    // only clicked when present.
                    let compose = &self.selectors.compose;
                    if self.step(step.name(), timeout, driver.exists(compose)).await? {
                        self.step(step.name(), timeout, driver.click(compose)).await?;
                    }
                    FragmentStep::AwaitInputReady
                }
                FragmentStep::AwaitInputReady => {
                    self.wait_presence(driver, step, &self.selectors.input, true)
                        .await?;
                    self.step(step.name(), timeout, driver.fill(&self.selectors.input, text))
                        .await?;
                    FragmentStep::Filled
                }
                FragmentStep::Filled => {
                    self.wait_presence(driver, step, &self.selectors.submit, true)
                        .await?;
                    self.step(step.name(), timeout, driver.click(&self.selectors.submit))
                        .await?;
                    FragmentStep::AwaitSubmitConfirmation
                }
                FragmentStep::AwaitSubmitConfirmation => {
                    self.wait_submitted(driver).await?;
                    FragmentStep::Confirmed
                }
                FragmentStep::Confirmed => return Ok(()),
            };
        }
    }

    async fn needs_login(&self, driver: &mut dyn BrowserDriver) -> Result<bool, BrowserError> {
        let timeout = self.timings.step_timeout;
        let url = self.step("login_check", timeout, driver.current_url()).await?;
        if url.to_ascii_lowercase().contains("login") {
            return Ok(true);
        }
        self.step(
            "login_check",
            timeout,
            driver.exists(&self.selectors.login_password),
        )
        .await
    }

    /// Fill the login form once and wait for the redirect away from it.
    async fn authenticate(
        &self,
        driver: &mut dyn BrowserDriver,
        target: &str,
    ) -> Result<(), BrowserError> {
        let Some(credentials) = &self.credentials else {
            return Err(BrowserError::AuthFailed(
                "login required but no device credentials configured".to_string(),
            ));
        };
        tracing::info!(channel = CHANNEL, "Reply page requires login");

        let timeout = self.timings.step_timeout;
        let s = &self.selectors;
        self.step(
            "login",
            timeout,
            driver.fill(&s.login_username, &credentials.username),
        )
        .await?;
        self.step(
            "login",
            timeout,
            driver.fill(&s.login_password, credentials.password.expose_secret()),
        )
        .await?;
        self.step("login", timeout, driver.click(&s.login_submit))
            .await?;

        let deadline = tokio::time::Instant::now() + self.timings.redirect_timeout;
        loop {
            if !self.needs_login(driver).await.unwrap_or(true) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::AuthFailed(
                    "still on the login page after submitting credentials".to_string(),
                ));
            }
            tokio::time::sleep(self.timings.recheck_interval).await;
        }

        self.step("open", self.timings.redirect_timeout, driver.open(target))
            .await
    }

    /// Open the reply page and log in if asked to.
    async fn prepare(&self, driver: &mut dyn BrowserDriver, target: &str) -> Result<(), BrowserError> {
        self.step("open", self.timings.redirect_timeout, driver.open(target))
            .await?;
        if self.needs_login(driver).await? {
            self.authenticate(driver, target).await?;
        }
        Ok(())
    }

    async fn run(&self, driver: &Mutex<Box<dyn BrowserDriver>>, target: &str, fragments: &[Fragment]) -> DeliveryOutcome {
        {
            let mut guard = driver.lock().await;
            if let Err(e) = self.prepare(guard.as_mut(), target).await {
                tracing::warn!(channel = CHANNEL, error = %e, "Session setup failed");
                return DeliveryOutcome::all_failed(self.kind(), fragments);
            }
        }

        send_each(self.kind(), fragments, &self.pacing, &self.retry, |fragment| {
            let text = fragment.as_str().to_string();
            let index = fragment.sequence_index();
            async move {
                let mut guard = driver.lock().await;
                let driver = guard.as_mut();
                match self.send_fragment(driver, &text).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        tracing::debug!(channel = CHANNEL, index, error = %e, "Re-opening page");
                        if let Err(reopen) = self
                            .step("open", self.timings.redirect_timeout, driver.open(target))
                            .await
                        {
                            tracing::warn!(channel = CHANNEL, error = %reopen, "Re-open failed");
                        }
                        Err(ChannelError::SendFailed {
                            name: CHANNEL.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl DeliveryExecutor for SessionExecutor {
    fn kind(&self) -> EndpointKind {
        EndpointKind::InteractiveSession
    }

    async fn deliver(&self, endpoint: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome {
        let driver = match self.launcher.launch().await {
            Ok(driver) => Mutex::new(driver),
            Err(e) => {
                tracing::warn!(channel = CHANNEL, error = %e, "Browser launch failed");
                return DeliveryOutcome::all_failed(self.kind(), fragments);
            }
        };

        tracing::info!(
            channel = CHANNEL,
            url = %endpoint.raw_url(),
            fragments = fragments.len(),
            "Starting browser session"
        );
        let outcome = self.run(&driver, endpoint.raw_url(), fragments).await;

        if let Err(e) = driver.lock().await.close().await {
            tracing::debug!(channel = CHANNEL, error = %e, "Browser close failed");
        }
        outcome
    }
}
