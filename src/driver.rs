//! Action driver: typed, bounded browser actions on top of a
//! [`BrowserBackend`].
//!
//! Backends speak a concrete remote protocol and report raw facts
//! (matches, rejections, protocol errors). The driver turns those facts
//! into the step error taxonomy, applies the navigation deadline and the
//! single click retry, and makes screenshots best-effort.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::StepError;
use crate::locator::Locator;

/// Opaque reference to an element inside a live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Backend-assigned id, valid for the lifetime of the page.
    pub id: String,
    /// What the handle was resolved from, used in error messages.
    pub description: String,
}

/// Snapshot of one element returned by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementState {
    pub handle: ElementHandle,
    /// Non-zero bounding box and not hidden by style.
    pub visible: bool,
    /// `disabled`, `aria-disabled="true"`, or an equivalent class.
    pub disabled: bool,
}

/// Backend verdict for an interaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Done,
    /// The page refused the interaction (detached, hidden, covered,
    /// disabled, read-only ...).
    Rejected(String),
}

/// A remote browser protocol session (one page).
///
/// Implementations must be cancel-safe: the runner drops in-flight calls
/// when a deadline expires.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Start loading `url` and wait for the navigation to commit.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Return once the page is loaded and network activity has been
    /// quiet for `quiet`. Callers bound this with their own deadline.
    async fn wait_for_idle(&self, quiet: Duration) -> Result<()>;

    /// All elements currently matching `locator`, in document order.
    async fn query(&self, locator: &Locator) -> Result<Vec<ElementState>>;

    async fn click(&self, element: &ElementHandle) -> Result<Interaction>;

    /// Clear the element's content and type `value`.
    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<Interaction>;

    /// PNG bytes of the full page, or of one element.
    async fn screenshot(&self, element: Option<&ElementHandle>) -> Result<Vec<u8>>;

    /// Evaluate `expression` with `args`; `Err` carries the page-side
    /// exception message.
    async fn evaluate(&self, expression: &str, args: &[Value]) -> Result<Value>;

    async fn close(&self) -> Result<()>;
}

/// Creates one isolated browser session per scenario.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserBackend>>;
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub navigation_timeout: Duration,
    /// How long network activity must be quiet before a page is idle.
    pub idle_quiet: Duration,
    pub click_retry_backoff: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            idle_quiet: Duration::from_millis(500),
            click_retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Browser actions for a single scenario run.
pub struct ActionDriver {
    backend: Box<dyn BrowserBackend>,
    options: DriverOptions,
    closed: bool,
}

impl ActionDriver {
    pub fn new(backend: Box<dyn BrowserBackend>, options: DriverOptions) -> Self {
        Self {
            backend,
            options,
            closed: false,
        }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Load `url` and wait for a network-idle signal.
    ///
    /// Resolves to success or `NavigationTimeout`, never to a partially
    /// loaded state.
    pub async fn navigate(&self, url: &str) -> Result<(), StepError> {
        let timeout = self.options.navigation_timeout;
        let timeout_ms = timeout.as_millis() as u64;
        debug!("Navigating to {}", url);

        let load = async {
            self.backend.goto(url).await?;
            self.backend.wait_for_idle(self.options.idle_quiet).await
        };

        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => {
                info!("Navigated to {}", url);
                Ok(())
            }
            Ok(Err(e)) => Err(StepError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms,
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(StepError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms,
                reason: "no network-idle signal".to_string(),
            }),
        }
    }

    pub async fn query(&self, locator: &Locator) -> Result<Vec<ElementState>> {
        self.backend.query(locator).await
    }

    /// Click, retrying once after a short backoff to absorb layout shifts.
    pub async fn click(&self, element: &ElementHandle) -> Result<(), StepError> {
        let first = self.click_once(element).await;
        let reason = match first {
            None => return Ok(()),
            Some(reason) => reason,
        };

        debug!(
            "Click on {} rejected ({}), retrying in {:?}",
            element.description, reason, self.options.click_retry_backoff
        );
        tokio::time::sleep(self.options.click_retry_backoff).await;

        match self.click_once(element).await {
            None => Ok(()),
            Some(reason) => Err(StepError::ElementNotInteractable {
                target: element.description.clone(),
                reason,
            }),
        }
    }

    async fn click_once(&self, element: &ElementHandle) -> Option<String> {
        match self.backend.click(element).await {
            Ok(Interaction::Done) => None,
            Ok(Interaction::Rejected(reason)) => Some(reason),
            Err(e) => Some(format!("{e:#}")),
        }
    }

    pub async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), StepError> {
        match self.backend.fill(element, value).await {
            Ok(Interaction::Done) => Ok(()),
            Ok(Interaction::Rejected(reason)) => Err(StepError::ElementNotEditable {
                target: element.description.clone(),
                reason,
            }),
            Err(e) => Err(StepError::ElementNotEditable {
                target: element.description.clone(),
                reason: format!("{e:#}"),
            }),
        }
    }

    /// Capture a screenshot into the artifact store.
    ///
    /// Screenshots are diagnostic: failures are logged and yield `None`.
    pub async fn screenshot(
        &self,
        artifacts: &ArtifactStore,
        scenario_id: &str,
        step_index: usize,
        label: &str,
        element: Option<&ElementHandle>,
    ) -> Option<PathBuf> {
        let bytes = match self.backend.screenshot(element).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Screenshot '{}' capture failed: {:#}", label, e);
                return None;
            }
        };

        match artifacts
            .write_step_artifact(scenario_id, step_index, label, "png", &bytes)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Screenshot '{}' could not be written: {}", label, e);
                None
            }
        }
    }

    pub async fn evaluate(&self, expression: &str, args: &[Value]) -> Result<Value, StepError> {
        self.backend
            .evaluate(expression, args)
            .await
            .map_err(|e| StepError::PageEvaluationError {
                message: format!("{e:#}"),
            })
    }

    /// Tear down the session. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.backend.close().await {
            warn!("Failed to close browser session: {:#}", e);
        }
    }
}

impl Drop for ActionDriver {
    fn drop(&mut self) {
        if !self.closed {
            debug!("ActionDriver dropped without close, backend will be torn down on drop");
        }
    }
}
