//! Run-wide settings and URL helpers.
//!
//! Every value here can be overridden from the environment through the
//! CLI (`VIGIL_BASE_URL`, `VIGIL_API_URL`, `VIGIL_TIMEOUT_MS`,
//! `VIGIL_HEADLESS`, `VIGIL_SCENARIOS`, `VIGIL_OUT`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::model::{Scenario, Step};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SCENARIO_DIR: &str = "scenarios";
pub const DEFAULT_OUT_DIR: &str = "vigil-artifacts";

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Where the dashboard is served.
    pub base_url: String,
    /// Where the REST API is served.
    pub api_url: String,
    /// Per-step deadline for scenarios that set none.
    pub default_timeout_ms: u64,
    /// Replaces every scenario's own default when set (`--timeout`).
    pub timeout_override_ms: Option<u64>,
    pub headless: bool,
    pub scenario_dirs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    /// Capture a screenshot whenever a UI step fails.
    pub screenshot_on_failure: bool,
    /// Headers sent with every API probe.
    pub api_headers: HashMap<String, String>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            timeout_override_ms: None,
            headless: true,
            scenario_dirs: vec![PathBuf::from(DEFAULT_SCENARIO_DIR)],
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            screenshot_on_failure: true,
            api_headers: HashMap::new(),
        }
    }
}

impl HarnessSettings {
    /// Defaults overridden by any `VIGIL_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(url) = lookup("VIGIL_BASE_URL") {
            settings.base_url = url;
        }
        if let Some(url) = lookup("VIGIL_API_URL") {
            settings.api_url = url;
        }
        if let Some(ms) = lookup("VIGIL_TIMEOUT_MS") {
            settings.default_timeout_ms = ms
                .trim()
                .parse()
                .context(format!("Invalid VIGIL_TIMEOUT_MS: {ms}"))?;
        }
        if let Some(flag) = lookup("VIGIL_HEADLESS") {
            settings.headless = parse_flag(&flag)
                .with_context(|| format!("Invalid VIGIL_HEADLESS: {flag}"))?;
        }
        if let Some(dirs) = lookup("VIGIL_SCENARIOS") {
            settings.scenario_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(dir) = lookup("VIGIL_OUT") {
            settings.out_dir = PathBuf::from(dir);
        }
        Ok(settings)
    }

    /// Deadline for one step: step override, then `--timeout`, then the
    /// scenario default, then the global default.
    pub fn step_timeout(&self, scenario: &Scenario, step: &Step) -> Duration {
        let ms = step
            .timeout_ms
            .or(self.timeout_override_ms)
            .or(scenario.timeout_ms)
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn ui_url(&self, path: &str) -> Result<String> {
        join_url(&self.base_url, path)
    }

}

/// Boolean flag as written in the environment or on the command line:
/// `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Join `path` onto `base` unless it is already absolute.
///
/// The base is treated as a directory, so `http://host/app` + `clusters`
/// yields `http://host/app/clusters`.
pub fn join_url(base: &str, path: &str) -> Result<String> {
    if path.contains("://") {
        return Ok(path.to_string());
    }

    let mut base_str = base.to_string();
    if !base_str.ends_with('/') {
        base_str.push('/');
    }
    let base = Url::parse(&base_str).context(format!("Invalid base URL: {base}"))?;

    if path.is_empty() {
        return Ok(base.to_string());
    }

    let joined = base
        .join(path.trim_start_matches('/'))
        .context(format!("Failed to join base URL '{base}' with path '{path}'"))?;
    Ok(joined.to_string())
}
