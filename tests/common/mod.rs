//! Scripted in-memory browser for runner tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use vigil::driver::{ElementHandle, ElementState, Interaction};
use vigil::locator::Locator;
use vigil::resolver::SelectorResolver;
use vigil::{
    ArtifactStore, BrowserBackend, DefaultScenarioRunner, DriverOptions, HarnessSettings,
    SessionFactory,
};

/// One element on the fake page.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub id: String,
    /// Locators (in `Display` form, e.g. `css=.scan`) that match it.
    pub matches: Vec<String>,
    pub attached: bool,
    pub visible: bool,
    pub disabled: bool,
    pub editable: bool,
    /// Clicks rejected before one succeeds.
    pub reject_clicks: u32,
    /// Element ids made visible by a successful click.
    pub reveals: Vec<String>,
    /// Element ids hidden by a successful click.
    pub hides: Vec<String>,
    pub value: String,
}

impl FakeElement {
    pub fn new(id: &str, matches: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            matches: matches.iter().map(|m| m.to_string()).collect(),
            attached: true,
            visible: true,
            disabled: false,
            editable: false,
            reject_clicks: 0,
            reveals: Vec::new(),
            hides: Vec::new(),
            value: String::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn rejecting_clicks(mut self, times: u32) -> Self {
        self.reject_clicks = times;
        self
    }

    pub fn reveals(mut self, id: &str) -> Self {
        self.reveals.push(id.to_string());
        self
    }

    pub fn hides(mut self, id: &str) -> Self {
        self.hides.push(id.to_string());
        self
    }
}

/// Scripted response for an `evaluate` expression.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub delay: Duration,
    pub result: Result<Value, String>,
}

#[derive(Debug, Default)]
pub struct PageState {
    pub elements: Vec<FakeElement>,
    pub evaluations: HashMap<String, Evaluation>,
    pub query_log: Vec<String>,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub screenshots: usize,
}

impl PageState {
    pub fn element(&self, id: &str) -> Option<&FakeElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}

/// Shared page plus launch bookkeeping. Every launched session sees the
/// same page.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub page: Arc<Mutex<PageState>>,
    pub launches: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub fail_launch: bool,
}

impl FakeBrowser {
    pub fn with_elements(elements: Vec<FakeElement>) -> Self {
        let browser = Self::default();
        browser.page.lock().unwrap().elements = elements;
        browser
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn script_evaluation(&self, expression: &str, delay: Duration, result: Value) {
        self.page.lock().unwrap().evaluations.insert(
            expression.to_string(),
            Evaluation {
                delay,
                result: Ok(result),
            },
        );
    }

    pub fn script_exception(&self, expression: &str, message: &str) {
        self.page.lock().unwrap().evaluations.insert(
            expression.to_string(),
            Evaluation {
                delay: Duration::ZERO,
                result: Err(message.to_string()),
            },
        );
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn query_log(&self) -> Vec<String> {
        self.page.lock().unwrap().query_log.clone()
    }

    pub fn value_of(&self, id: &str) -> Option<String> {
        self.page.lock().unwrap().element(id).map(|e| e.value.clone())
    }
}

#[async_trait]
impl SessionFactory for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserBackend>> {
        if self.fail_launch {
            bail!("chrome binary not found");
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            page: Arc::clone(&self.page),
            closes: Arc::clone(&self.closes),
        }))
    }
}

pub struct FakeSession {
    page: Arc<Mutex<PageState>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserBackend for FakeSession {
    async fn goto(&self, url: &str) -> Result<()> {
        if url.contains("unreachable") {
            bail!("net::ERR_CONNECTION_REFUSED");
        }
        self.page.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_idle(&self, _quiet: Duration) -> Result<()> {
        Ok(())
    }

    async fn query(&self, locator: &Locator) -> Result<Vec<ElementState>> {
        let key = locator.to_string();
        let mut page = self.page.lock().unwrap();
        page.query_log.push(key.clone());
        Ok(page
            .elements
            .iter()
            .filter(|e| e.attached && e.matches.contains(&key))
            .map(|e| ElementState {
                handle: ElementHandle {
                    id: e.id.clone(),
                    description: key.clone(),
                },
                visible: e.visible,
                disabled: e.disabled,
            })
            .collect())
    }

    async fn click(&self, element: &ElementHandle) -> Result<Interaction> {
        let mut page = self.page.lock().unwrap();
        let Some(target) = page.elements.iter_mut().find(|e| e.id == element.id) else {
            return Ok(Interaction::Rejected("detached".into()));
        };
        if target.reject_clicks > 0 {
            target.reject_clicks -= 1;
            return Ok(Interaction::Rejected("covered by div.el-loading-mask".into()));
        }

        let reveals = target.reveals.clone();
        let hides = target.hides.clone();
        page.clicks.push(element.id.clone());
        for el in page.elements.iter_mut() {
            if reveals.contains(&el.id) {
                el.attached = true;
                el.visible = true;
            }
            if hides.contains(&el.id) {
                el.visible = false;
            }
        }
        Ok(Interaction::Done)
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<Interaction> {
        let mut page = self.page.lock().unwrap();
        let target = page
            .elements
            .iter_mut()
            .find(|e| e.id == element.id)
            .ok_or_else(|| anyhow!("no element {}", element.id))?;
        if !target.editable {
            return Ok(Interaction::Rejected("read-only".into()));
        }
        target.value = value.to_string();
        Ok(Interaction::Done)
    }

    async fn screenshot(&self, _element: Option<&ElementHandle>) -> Result<Vec<u8>> {
        self.page.lock().unwrap().screenshots += 1;
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn evaluate(&self, expression: &str, _args: &[Value]) -> Result<Value> {
        let scripted = self.page.lock().unwrap().evaluations.get(expression).cloned();
        match scripted {
            Some(evaluation) => {
                tokio::time::sleep(evaluation.delay).await;
                evaluation.result.map_err(|message| anyhow!(message))
            }
            None => Ok(Value::Null),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Settings pointing at `api_url` with artifacts under `out`.
pub fn settings(api_url: &str, out: &Path) -> HarnessSettings {
    HarnessSettings {
        base_url: "http://dashboard.test".to_string(),
        api_url: api_url.to_string(),
        out_dir: out.to_path_buf(),
        ..HarnessSettings::default()
    }
}

/// Runner with short resolver and driver timings for tests.
pub fn runner(browser: &FakeBrowser, settings: HarnessSettings) -> DefaultScenarioRunner {
    let artifacts = ArtifactStore::new(settings.out_dir.clone(), "test-run");
    DefaultScenarioRunner::new(settings, Arc::new(browser.clone()), artifacts)
        .with_resolver(SelectorResolver::new(
            Duration::from_millis(300),
            Duration::from_millis(20),
        ))
        .with_driver_options(DriverOptions {
            navigation_timeout: Duration::from_secs(2),
            idle_quiet: Duration::from_millis(10),
            click_retry_backoff: Duration::from_millis(20),
        })
}
