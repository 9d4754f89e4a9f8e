//! Scenario execution logic

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::ArtifactStore;
use crate::config::HarnessSettings;
use crate::driver::{ActionDriver, DriverOptions, SessionFactory};
use crate::error::{ErrorInfo, HarnessError, StepError};
use crate::locator::{Locator, TargetCatalog};
use crate::model::{scenario_outcome, Action, Outcome, Scenario, ScenarioResult, Step, StepResult};
use crate::probe::ApiProbe;
use crate::resolver::{Resolution, SelectorResolver};

/// Upper bound for the screenshot taken after a failed UI step.
const FAILURE_SCREENSHOT_BUDGET: Duration = Duration::from_secs(5);

/// Scenario runner trait
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    /// Execute one scenario. Step failures end up in the result; only
    /// harness failures (such as a browser that cannot start) are `Err`.
    async fn run(
        &self,
        scenario: &Scenario,
        deadline: Option<Instant>,
    ) -> Result<ScenarioResult, HarnessError>;
}

/// Default scenario runner: one browser session per scenario, launched on
/// the first UI step.
pub struct DefaultScenarioRunner {
    sessions: Arc<dyn SessionFactory>,
    probe: ApiProbe,
    resolver: SelectorResolver,
    targets: TargetCatalog,
    artifacts: ArtifactStore,
    settings: HarnessSettings,
    driver_options: DriverOptions,
}

impl DefaultScenarioRunner {
    pub fn new(
        settings: HarnessSettings,
        sessions: Arc<dyn SessionFactory>,
        artifacts: ArtifactStore,
    ) -> Self {
        let probe = ApiProbe::new(settings.api_url.clone())
            .with_timeout(Duration::from_millis(settings.default_timeout_ms))
            .with_headers(settings.api_headers.clone());
        Self {
            sessions,
            probe,
            resolver: SelectorResolver::default(),
            targets: TargetCatalog::new(),
            artifacts,
            settings,
            driver_options: DriverOptions::default(),
        }
    }

    /// Shared target catalog; scenario-local targets take precedence.
    pub fn with_targets(mut self, targets: TargetCatalog) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_resolver(mut self, resolver: SelectorResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_driver_options(mut self, options: DriverOptions) -> Self {
        self.driver_options = options;
        self
    }

    pub fn with_probe(mut self, probe: ApiProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn candidates<'a>(&'a self, scenario: &'a Scenario, target: &str) -> &'a [Locator] {
        scenario
            .targets
            .get(target)
            .or_else(|| self.targets.get(target))
            .unwrap_or(&[])
    }

    fn variables(&self, scenario: &Scenario) -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        vars.insert("base_url".to_string(), Value::String(self.settings.base_url.clone()));
        vars.insert("api_url".to_string(), Value::String(self.settings.api_url.clone()));
        vars.extend(scenario.vars.clone());
        vars
    }

    /// Perform one step against an already launched session.
    ///
    /// `detail` and `artifacts` are filled in as the step progresses, so
    /// whatever was gathered survives a deadline cancelling this future.
    async fn perform(
        &self,
        scenario: &Scenario,
        step_index: usize,
        step: &Step,
        vars: &HashMap<String, Value>,
        driver: Option<&ActionDriver>,
        detail: &mut Option<Value>,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<(), StepError> {
        match &step.action {
            Action::Navigate(url) => {
                let url = expand_variables(url, vars);
                let url = self.settings.ui_url(&url).map_err(|e| StepError::NavigationTimeout {
                    url: url.clone(),
                    timeout_ms: 0,
                    reason: format!("{e:#}"),
                })?;
                *detail = Some(json!({ "url": url }));
                session(driver)?.navigate(&url).await
            }
            Action::Click(target) => {
                let driver = session(driver)?;
                let resolution = self
                    .resolver
                    .resolve(driver, target, self.candidates(scenario, target))
                    .await?;
                *detail = Some(resolution_detail(target, &resolution));
                driver.click(&resolution.handle).await
            }
            Action::Fill { target, value } => {
                let driver = session(driver)?;
                let resolution = self
                    .resolver
                    .resolve(driver, target, self.candidates(scenario, target))
                    .await?;
                *detail = Some(resolution_detail(target, &resolution));
                driver
                    .fill(&resolution.handle, &expand_variables(value, vars))
                    .await
            }
            Action::WaitFor { target, state } => {
                *detail = Some(json!({ "target": target, "state": state }));
                self.resolver
                    .wait_for(session(driver)?, target, self.candidates(scenario, target), *state)
                    .await
            }
            Action::Screenshot(label) => {
                let path = session(driver)?
                    .screenshot(&self.artifacts, &scenario.id, step_index, label, None)
                    .await;
                artifacts.extend(path);
                Ok(())
            }
            Action::Evaluate {
                expression,
                args,
                expect,
            } => {
                let expression = expand_variables(expression, vars);
                let args: Vec<Value> = args.iter().map(|a| expand_value(a, vars)).collect();
                let value = session(driver)?.evaluate(&expression, &args).await?;
                *detail = Some(json!({ "value": value }));

                match expect.as_ref().map(|e| expand_value(e, vars)) {
                    Some(expected) if expected != value => Err(StepError::PageEvaluationError {
                        message: format!("expected {expected}, got {value}"),
                    }),
                    _ => Ok(()),
                }
            }
            Action::ApiCheck(spec) => {
                let mut spec = spec.clone();
                spec.url = expand_variables(&spec.url, vars);
                for value in spec.headers.values_mut() {
                    *value = expand_variables(value, vars);
                }
                spec.body = spec.body.as_ref().map(|b| expand_value(b, vars));

                let result = self.probe.check(&spec).await.map_err(|e| {
                    StepError::ConnectionRefused {
                        url: spec.url.clone(),
                        message: format!("{e:#}"),
                    }
                })?;
                *detail = Some(result.detail());
                match result.error {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }
}

fn session(driver: Option<&ActionDriver>) -> Result<&ActionDriver, StepError> {
    driver.ok_or_else(|| StepError::PageEvaluationError {
        message: "no browser session".to_string(),
    })
}

fn resolution_detail(target: &str, resolution: &Resolution) -> Value {
    json!({
        "target": target,
        "locator": resolution.locator.to_string(),
        "rounds": resolution.trace.rounds(),
        "trace": serde_json::to_value(&resolution.trace).unwrap_or_default(),
    })
}

async fn close_session(driver: &mut Option<ActionDriver>) {
    if let Some(mut driver) = driver.take() {
        driver.close().await;
    }
}

/// Expand `{{ key }}` or `{{ vars.key }}` placeholders in `text` by
/// looking up each captured key in `vars`. Unknown keys are left as-is.
pub fn expand_variables(text: &str, vars: &HashMap<String, Value>) -> String {
    static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\{\{\s*(?:vars\.)?(.+?)\s*\}\}").expect("failed to compile placeholder regex")
    });

    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Expand placeholders in every string inside a JSON value.
pub fn expand_value(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(expand_variables(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl ScenarioRunner for DefaultScenarioRunner {
    #[instrument(skip(self, scenario, deadline), fields(id = %scenario.id))]
    async fn run(
        &self,
        scenario: &Scenario,
        deadline: Option<Instant>,
    ) -> Result<ScenarioResult, HarnessError> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run deadline passed, skipping scenario: {}", scenario.id);
            return Ok(ScenarioResult::skipped(scenario));
        }

        let started_at = Utc::now();
        let start_time = Instant::now();
        let vars = self.variables(scenario);
        let total = scenario.steps.len();
        let mut driver: Option<ActionDriver> = None;
        let mut results = Vec::with_capacity(total);
        let mut halted = false;

        info!("Starting scenario: {}", scenario.id);

        for (step_index, step) in scenario.steps.iter().enumerate() {
            let label = step.display_label();
            if halted {
                results.push(StepResult::skipped(step_index, label));
                continue;
            }

            info!("Running step {}/{}: {}", step_index + 1, total, label);

            let step_start = Instant::now();
            let step_deadline = step_start + self.settings.step_timeout(scenario, step);
            let (effective, by_run_deadline) = match deadline {
                Some(run_deadline) if run_deadline < step_deadline => (run_deadline, true),
                _ => (step_deadline, false),
            };
            let timed_out = || StepError::StepTimeout {
                timeout_ms: effective.saturating_duration_since(step_start).as_millis() as u64,
                run_deadline: by_run_deadline,
            };

            let mut detail = None;
            let mut artifacts = Vec::new();
            let mut outcome = Ok(());

            if step.action.needs_browser() && driver.is_none() {
                match timeout_at(effective, self.sessions.launch()).await {
                    Ok(Ok(backend)) => {
                        driver = Some(ActionDriver::new(backend, self.driver_options.clone()));
                    }
                    Ok(Err(e)) => {
                        close_session(&mut driver).await;
                        return Err(HarnessError::BrowserLaunch(format!("{e:#}")));
                    }
                    Err(_) => outcome = Err(timed_out()),
                }
            }

            if outcome.is_ok() {
                let perform = self.perform(
                    scenario,
                    step_index,
                    step,
                    &vars,
                    driver.as_ref(),
                    &mut detail,
                    &mut artifacts,
                );
                outcome = match timeout_at(effective, perform).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out()),
                };
            }

            let duration_ms = step_start.elapsed().as_millis() as u64;
            let result = match outcome {
                Ok(()) => {
                    debug!("Step {} passed in {} ms", step_index + 1, duration_ms);
                    StepResult {
                        step_index,
                        label,
                        outcome: Outcome::Passed,
                        duration_ms,
                        error: None,
                        artifacts,
                        detail,
                    }
                }
                Err(err) => {
                    warn!("Step {} failed: {}", step_index + 1, err);
                    let run_expired = matches!(err, StepError::StepTimeout { run_deadline: true, .. });

                    if step.action.needs_browser() && self.settings.screenshot_on_failure && !run_expired {
                        if let Some(driver) = &driver {
                            let mut budget = Instant::now() + FAILURE_SCREENSHOT_BUDGET;
                            if let Some(run_deadline) = deadline {
                                budget = budget.min(run_deadline);
                            }
                            let failure_label = format!("{label} failure");
                            let capture = driver.screenshot(
                                &self.artifacts,
                                &scenario.id,
                                step_index,
                                &failure_label,
                                None,
                            );
                            if let Ok(Some(path)) = timeout_at(budget, capture).await {
                                artifacts.push(path);
                            }
                        }
                    }

                    if run_expired {
                        info!("Run deadline expired, skipping remaining steps");
                        halted = true;
                    } else if step.critical && !scenario.continue_on_step_failure {
                        info!("Stopping scenario due to step failure");
                        halted = true;
                    }

                    StepResult {
                        step_index,
                        label,
                        outcome: Outcome::Failed,
                        duration_ms,
                        error: Some(ErrorInfo::from(&err)),
                        artifacts,
                        detail,
                    }
                }
            };
            results.push(result);
        }

        close_session(&mut driver).await;

        let outcome = scenario_outcome(scenario.outcome_policy, &scenario.steps, &results);
        let result = ScenarioResult {
            id: scenario.id.clone(),
            description: scenario.description.clone(),
            outcome,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start_time.elapsed().as_millis() as u64,
            steps: results,
        };

        info!(
            "Scenario finished: {} ({} ms) - {}",
            scenario.id, result.duration_ms, result.outcome
        );

        Ok(result)
    }
}
