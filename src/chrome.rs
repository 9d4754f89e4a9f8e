//! Chrome DevTools Protocol backend built on `headless_chrome`.
//!
//! `headless_chrome` is synchronous, so every protocol call runs on the
//! blocking pool. Elements found by [`BrowserBackend::query`] are tagged
//! with a `data-vigil-id` attribute; later clicks and fills address them
//! through that attribute.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::driver::{BrowserBackend, ElementHandle, ElementState, Interaction, SessionFactory};
use crate::locator::Locator;

/// Configuration for browser launch
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Upper bound for any single protocol call.
    pub protocol_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            protocol_timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Launches one Chrome process per scenario.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    config: ChromeConfig,
}

impl ChromeLauncher {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserBackend>> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(config))
            .await
            .context("browser launch task panicked")??;
        Ok(Box::new(session))
    }
}

/// One Chrome process with a single tab.
///
/// Protocol calls on the tab run one at a time. A call whose caller gave up
/// (step deadline) still holds the gate until its blocking work returns, so
/// the next step never interleaves with it.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl ChromeSession {
    fn launch(config: ChromeConfig) -> Result<Self> {
        info!(
            "Launching browser (headless: {}, size: {}x{})",
            config.headless, config.window_width, config.window_height
        );

        let mut options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| anyhow!("invalid launch options: {e}"))?;

        let user_agent_arg = config.user_agent.as_ref().map(|ua| format!("--user-agent={ua}"));
        if let Some(ref arg) = user_agent_arg {
            options.args.push(OsStr::new(arg));
        }

        let browser = Browser::new(options).context("failed to start Chrome")?;
        let tab = browser.new_tab().context("failed to open tab")?;
        tab.set_default_timeout(config.protocol_timeout);

        info!("Browser launched successfully");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            tab,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Run a blocking protocol call against the tab.
    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        run_exclusive(&self.gate, move || f(&tab)).await
    }

    /// Evaluate a script that produces a JSON envelope.
    async fn eval_envelope(&self, script: String) -> Result<Value> {
        let raw = self
            .with_tab(move |tab| {
                let remote = tab.evaluate(&script, true)?;
                Ok(remote.value)
            })
            .await?;

        let text = match raw {
            Some(Value::String(text)) => text,
            other => bail!("unexpected evaluation result: {other:?}"),
        };
        let envelope: Envelope =
            serde_json::from_str(&text).context("malformed evaluation envelope")?;
        if envelope.ok {
            Ok(envelope.value.unwrap_or(Value::Null))
        } else {
            Err(anyhow!(envelope.error.unwrap_or_else(|| "unknown page error".into())))
        }
    }
}

/// Run `f` on the blocking pool while holding `gate`.
///
/// The guard moves into the blocking task, so it is released when `f`
/// returns even if the awaiting future was dropped first.
async fn run_exclusive<T, F>(gate: &Arc<tokio::sync::Mutex<()>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let guard = Arc::clone(gate).lock_owned().await;
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        f()
    })
    .await
    .context("protocol task panicked")?
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueriedElement {
    id: String,
    visible: bool,
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct Precheck {
    #[serde(default)]
    rejected: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Wrap `body` so the page always returns a JSON string envelope.
fn envelope(body: &str) -> String {
    format!(
        "(async () => {{ try {{ const __v = await ({body}); \
         return JSON.stringify({{ ok: true, value: __v === undefined ? null : __v }}); \
         }} catch (e) {{ return JSON.stringify({{ ok: false, error: String(e && e.message || e) }}); }} }})()"
    )
}

fn handle_selector(id: &str) -> String {
    format!("[data-vigil-id=\"{id}\"]")
}

const QUERY_SCRIPT: &str = r#"(() => {
  const loc = __LOCATOR__;
  const limit = 25;
  const matches = [];
  const push = (el) => {
    if (el && el.nodeType === 1 && !matches.includes(el) && matches.length < limit) matches.push(el);
  };
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  if (loc.css) {
    document.querySelectorAll(loc.css).forEach(push);
  } else if (loc.xpath) {
    const r = document.evaluate(loc.xpath, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < r.snapshotLength; i++) push(r.snapshotItem(i));
  } else if (loc.text) {
    const all = Array.from(document.body ? document.body.querySelectorAll('*') : []);
    const hits = all.filter((el) => norm(el.innerText || el.textContent).includes(loc.text));
    hits.filter((el) => !hits.some((o) => o !== el && el.contains(o))).forEach(push);
  } else if (loc.role) {
    const implicit = {
      button: 'button,input[type=button],input[type=submit],input[type=reset]',
      link: 'a[href]',
      textbox: 'input:not([type]),input[type=text],input[type=email],input[type=password],input[type=search],textarea',
      checkbox: 'input[type=checkbox]',
      radio: 'input[type=radio]',
      combobox: 'select',
      dialog: 'dialog',
      heading: 'h1,h2,h3,h4,h5,h6',
      table: 'table',
      row: 'tr',
    };
    const sel = '[role="' + loc.role + '"]' + (implicit[loc.role] ? ',' + implicit[loc.role] : '');
    document.querySelectorAll(sel).forEach((el) => {
      if (loc.name) {
        const label = norm(el.getAttribute('aria-label') || el.innerText || el.value || el.title);
        if (!label.includes(loc.name)) return;
      }
      push(el);
    });
  }
  window.__vigilSeq = window.__vigilSeq || 0;
  return matches.map((el) => {
    if (!el.dataset.vigilId) el.dataset.vigilId = String(++window.__vigilSeq);
    const r = el.getBoundingClientRect();
    const cs = getComputedStyle(el);
    const visible = r.width > 0 && r.height > 0 && cs.visibility !== 'hidden' && cs.display !== 'none';
    const disabled = !!el.disabled || el.getAttribute('aria-disabled') === 'true' || el.classList.contains('is-disabled');
    return { id: el.dataset.vigilId, visible, disabled };
  });
})()"#;

const CLICK_PRECHECK: &str = r#"(() => {
  const el = document.querySelector(__SELECTOR__);
  if (!el || !el.isConnected) return { rejected: 'detached' };
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const r = el.getBoundingClientRect();
  const cs = getComputedStyle(el);
  if (r.width === 0 || r.height === 0 || cs.visibility === 'hidden' || cs.display === 'none') return { rejected: 'hidden' };
  const hit = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
  if (hit && hit !== el && !el.contains(hit)) {
    const cls = typeof hit.className === 'string' && hit.className ? '.' + hit.className.trim().split(/\s+/)[0] : '';
    return { rejected: 'covered by ' + hit.tagName.toLowerCase() + cls };
  }
  return { id: el.dataset.vigilId };
})()"#;

const FILL_PRECHECK: &str = r#"(() => {
  let el = document.querySelector(__SELECTOR__);
  if (!el || !el.isConnected) return { rejected: 'detached' };
  const editable = (e) => e instanceof HTMLInputElement || e instanceof HTMLTextAreaElement || e.isContentEditable;
  if (!editable(el)) {
    const inner = el.querySelector('input, textarea, [contenteditable="true"]');
    if (!inner) return { rejected: 'not a text field' };
    window.__vigilSeq = (window.__vigilSeq || 0) + 1;
    inner.dataset.vigilId = inner.dataset.vigilId || String(window.__vigilSeq);
    el = inner;
  }
  if (el.disabled || el.getAttribute('aria-disabled') === 'true') return { rejected: 'disabled' };
  if (el.readOnly) return { rejected: 'read-only' };
  el.focus();
  if (el.isContentEditable) el.textContent = ''; else el.value = '';
  el.dispatchEvent(new Event('input', { bubbles: true }));
  return { id: el.dataset.vigilId };
})()"#;

const IDLE_PROBE: &str = "[document.readyState, performance.getEntriesByType('resource').length]";

fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn locator_json(locator: &Locator) -> String {
    let value = match locator {
        Locator::Css { css } => serde_json::json!({ "css": css }),
        Locator::Text { text } => serde_json::json!({ "text": text }),
        Locator::Role { role, name } => serde_json::json!({ "role": role, "name": name }),
        Locator::XPath { xpath } => serde_json::json!({ "xpath": xpath }),
    };
    value.to_string()
}

#[async_trait]
impl BrowserBackend for ChromeSession {
    async fn goto(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&url)
                .with_context(|| format!("failed to navigate to {url}"))?;
            tab.wait_until_navigated()
                .with_context(|| format!("navigation to {url} did not complete"))?;
            Ok(())
        })
        .await
    }

    async fn wait_for_idle(&self, quiet: Duration) -> Result<()> {
        let mut last: Option<u64> = None;
        loop {
            let probe = self.eval_envelope(envelope(IDLE_PROBE)).await?;
            let ready = probe.get(0).and_then(Value::as_str) == Some("complete");
            let resources = probe.get(1).and_then(Value::as_u64).unwrap_or(0);

            if ready && last == Some(resources) {
                debug!("Page idle ({} resources)", resources);
                return Ok(());
            }
            last = ready.then_some(resources);
            tokio::time::sleep(quiet).await;
        }
    }

    async fn query(&self, locator: &Locator) -> Result<Vec<ElementState>> {
        let script = envelope(&QUERY_SCRIPT.replace("__LOCATOR__", &locator_json(locator)));
        let value = self.eval_envelope(script).await?;
        let found: Vec<QueriedElement> =
            serde_json::from_value(value).context("malformed query result")?;

        Ok(found
            .into_iter()
            .map(|el| ElementState {
                handle: ElementHandle {
                    id: el.id,
                    description: locator.to_string(),
                },
                visible: el.visible,
                disabled: el.disabled,
            })
            .collect())
    }

    async fn click(&self, element: &ElementHandle) -> Result<Interaction> {
        let selector = handle_selector(&element.id);
        let script = envelope(&CLICK_PRECHECK.replace("__SELECTOR__", &js_string(&selector)));
        let precheck: Precheck = serde_json::from_value(self.eval_envelope(script).await?)?;
        if let Some(reason) = precheck.rejected {
            return Ok(Interaction::Rejected(reason));
        }

        self.with_tab(move |tab| {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await?;
        Ok(Interaction::Done)
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<Interaction> {
        let selector = handle_selector(&element.id);
        let script = envelope(&FILL_PRECHECK.replace("__SELECTOR__", &js_string(&selector)));
        let precheck: Precheck = serde_json::from_value(self.eval_envelope(script).await?)?;
        if let Some(reason) = precheck.rejected {
            return Ok(Interaction::Rejected(reason));
        }

        let input_selector = handle_selector(precheck.id.as_deref().unwrap_or(&element.id));
        let text = value.to_string();
        self.with_tab(move |tab| {
            tab.find_element(&input_selector)?.type_into(&text)?;
            Ok(())
        })
        .await?;

        let notify = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (el) el.dispatchEvent(new Event('change', {{ bubbles: true }})); return null; }})()",
            js_string(&handle_selector(precheck.id.as_deref().unwrap_or(&element.id)))
        );
        self.eval_envelope(envelope(&notify)).await?;
        Ok(Interaction::Done)
    }

    async fn screenshot(&self, element: Option<&ElementHandle>) -> Result<Vec<u8>> {
        let selector = element.map(|el| handle_selector(&el.id));
        self.with_tab(move |tab| match selector {
            Some(selector) => tab
                .find_element(&selector)?
                .capture_screenshot(CaptureScreenshotFormatOption::Png),
            None => tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true),
        })
        .await
    }

    async fn evaluate(&self, expression: &str, args: &[Value]) -> Result<Value> {
        let args = Value::Array(args.to_vec()).to_string();
        let body = format!(
            "(() => {{ const __args = {args}; const __f = ({expression}); \
             return typeof __f === 'function' ? __f(...__args) : __f; }})()"
        );
        self.eval_envelope(envelope(&body)).await
    }

    async fn close(&self) -> Result<()> {
        info!("Closing browser session");
        let browser = self
            .browser
            .lock()
            .map_err(|_| anyhow!("browser lock poisoned"))?
            .take();
        if let Some(browser) = browser {
            // Dropping the browser kills the Chrome process.
            run_exclusive(&self.gate, move || {
                drop(browser);
                Ok(())
            })
            .await
            .context("browser shutdown failed")?;
        }
        Ok(())
    }
}
