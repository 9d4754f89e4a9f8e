//! Scenario definitions and run results.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::locator::TargetCatalog;
use crate::validator::BodyShape;

/// A named, ordered sequence of UI and API steps verifying one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Registry key. Defaults to the file stem when loaded from disk.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tags for filtering and grouping scenarios.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Values substituted into `{{ name }}` placeholders.
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
    /// Scenario-local targets; these shadow the shared catalog.
    #[serde(default)]
    pub targets: TargetCatalog,
    pub steps: Vec<Step>,
    /// Default per-step deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Keep executing after a failed step.
    #[serde(default)]
    pub continue_on_step_failure: bool,
    #[serde(default)]
    pub outcome_policy: OutcomePolicy,
}

impl Scenario {
    /// Deserialize a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the scenario to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parse a scenario from a Markdown (`.scenario.md`) string.
    pub fn from_markdown(md: &str) -> Result<Self, anyhow::Error> {
        crate::markdown_parser::parse_markdown_scenario(md)
    }

    /// Whether any step needs a browser session.
    pub fn needs_browser(&self) -> bool {
        self.steps.iter().any(|s| s.action.needs_browser())
    }

    /// Target names referenced by UI steps, in step order.
    pub fn referenced_targets(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| s.action.target())
            .collect()
    }
}

/// How a scenario's outcome is derived from its step results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomePolicy {
    /// Passed iff every step passed.
    #[default]
    AllSteps,
    /// Passed iff every step marked `critical` passed.
    CriticalOnly,
}

/// One step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Human-readable label used in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Per-step deadline override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Non-critical failures never abort the scenario.
    #[serde(default = "default_critical")]
    pub critical: bool,
    #[serde(flatten)]
    pub action: Action,
}

fn default_critical() -> bool {
    true
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self {
            label: None,
            timeout_ms: None,
            critical: true,
            action,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Label for reporting; falls back to a summary of the action.
    pub fn display_label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.action.summary())
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Load a URL (relative URLs join onto the application base URL).
    Navigate(String),
    /// Click the element resolved for a target.
    Click(String),
    /// Clear and type into the element resolved for a target.
    Fill { target: String, value: String },
    /// Poll until the target reaches a state.
    WaitFor {
        target: String,
        #[serde(default)]
        state: TargetState,
    },
    /// Capture a full-page screenshot under this label.
    Screenshot(String),
    /// Evaluate an expression in the page context.
    Evaluate {
        expression: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
        /// When present, the result must equal this value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<serde_json::Value>,
    },
    /// Direct HTTP check against the API.
    ApiCheck(EndpointSpec),
}

impl Action {
    pub fn needs_browser(&self) -> bool {
        !matches!(self, Self::ApiCheck(_))
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Click(target) => Some(target),
            Self::Fill { target, .. } | Self::WaitFor { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Navigate(url) => format!("navigate {url}"),
            Self::Click(target) => format!("click {target}"),
            Self::Fill { target, .. } => format!("fill {target}"),
            Self::WaitFor { target, state } => format!("wait for {target} {state}"),
            Self::Screenshot(label) => format!("screenshot {label}"),
            Self::Evaluate { expression, .. } => {
                let mut short: String = expression.chars().take(40).collect();
                if expression.chars().count() > 40 {
                    short.push('…');
                }
                format!("evaluate {short}")
            }
            Self::ApiCheck(spec) => format!("{} {}", spec.method, spec.url),
        }
    }
}

/// States a `wait_for` step can wait for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
    Enabled,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Enabled => "enabled",
        };
        f.write_str(name)
    }
}

/// HTTP endpoint checked by the API probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute URL, or a path joined onto the API base URL.
    pub url: String,
    #[serde(default = "default_status_code")]
    pub expected_status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_shape: Option<BodyShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl EndpointSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            expected_status: default_status_code(),
            headers: HashMap::new(),
            body: None,
            body_shape: None,
            timeout_ms: None,
        }
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn with_shape(mut self, shape: BodyShape) -> Self {
        self.body_shape = Some(shape);
        self
    }
}

fn default_status_code() -> u16 {
    200
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        };
        f.write_str(name)
    }
}

/// Result of a single step within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_index: usize,
    pub label: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
    /// Action-specific details (resolved locator, probe status, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl StepResult {
    pub fn skipped(step_index: usize, label: String) -> Self {
        Self {
            step_index,
            label,
            outcome: Outcome::Skipped,
            duration_ms: 0,
            error: None,
            artifacts: Vec::new(),
            detail: None,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of running one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
}

impl ScenarioResult {
    /// Result for a scenario that never started.
    pub fn skipped(scenario: &Scenario) -> Self {
        let now = Utc::now();
        Self {
            id: scenario.id.clone(),
            description: scenario.description.clone(),
            outcome: Outcome::Skipped,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            steps: scenario
                .steps
                .iter()
                .enumerate()
                .map(|(idx, step)| StepResult::skipped(idx, step.display_label()))
                .collect(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }
}

/// Derive a scenario outcome from its step results.
pub fn scenario_outcome(policy: OutcomePolicy, steps: &[Step], results: &[StepResult]) -> Outcome {
    let relevant = |idx: usize| match policy {
        OutcomePolicy::AllSteps => true,
        OutcomePolicy::CriticalOnly => steps.get(idx).is_some_and(|s| s.critical),
    };

    let all_passed = results
        .iter()
        .filter(|r| relevant(r.step_index))
        .all(StepResult::is_passed);

    if all_passed {
        Outcome::Passed
    } else {
        Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::JsonType;

    const CLUSTER_SCENARIO: &str = r#"
id: add-cluster
description: Open the add-cluster dialog
tags: [clusters, smoke]
timeout_ms: 10000
targets:
  addClusterButton:
    - css: "button.add-cluster"
    - text: "添加集群"
steps:
  - navigate: /clusters
  - click: addClusterButton
    label: open dialog
  - fill:
      target: clusterNameInput
      value: "{{ cluster_name }}"
  - wait_for:
      target: clusterDialog
      state: visible
    timeout_ms: 3000
  - screenshot: dialog-open
  - evaluate:
      expression: "document.title"
      expect: "Hive 小文件治理"
    critical: false
  - api_check:
      url: /api/v1/clusters/
      body_shape:
        type: array
"#;

    #[test]
    fn scenario_yaml_parses_every_step_kind() {
        let scenario = Scenario::from_yaml(CLUSTER_SCENARIO).unwrap();
        assert_eq!(scenario.id, "add-cluster");
        assert_eq!(scenario.timeout_ms, Some(10000));
        assert!(!scenario.continue_on_step_failure);
        assert_eq!(scenario.outcome_policy, OutcomePolicy::AllSteps);
        assert_eq!(scenario.steps.len(), 7);

        assert_eq!(
            scenario.steps[0].action,
            Action::Navigate("/clusters".into())
        );
        assert_eq!(scenario.steps[1].label.as_deref(), Some("open dialog"));
        assert_eq!(
            scenario.steps[3].action,
            Action::WaitFor {
                target: "clusterDialog".into(),
                state: TargetState::Visible
            }
        );
        assert_eq!(scenario.steps[3].timeout_ms, Some(3000));
        assert!(!scenario.steps[5].critical);

        match &scenario.steps[6].action {
            Action::ApiCheck(spec) => {
                assert_eq!(spec.method, HttpMethod::Get);
                assert_eq!(spec.expected_status, 200);
                assert_eq!(
                    spec.body_shape.as_ref().and_then(|s| s.root),
                    Some(JsonType::Array)
                );
            }
            other => panic!("expected api_check, got {other:?}"),
        }
    }

    #[test]
    fn scenario_yaml_round_trips() {
        let scenario = Scenario::from_yaml(CLUSTER_SCENARIO).unwrap();
        let yaml = scenario.to_yaml().unwrap();
        let again = Scenario::from_yaml(&yaml).unwrap();
        assert_eq!(again.steps.len(), scenario.steps.len());
        for (a, b) in again.steps.iter().zip(&scenario.steps) {
            assert_eq!(a.action, b.action);
            assert_eq!(a.critical, b.critical);
        }
    }

    #[test]
    fn referenced_targets_follow_step_order() {
        let scenario = Scenario::from_yaml(CLUSTER_SCENARIO).unwrap();
        assert_eq!(
            scenario.referenced_targets(),
            vec!["addClusterButton", "clusterNameInput", "clusterDialog"]
        );
        assert!(scenario.needs_browser());
    }

    #[test]
    fn display_label_falls_back_to_action_summary() {
        let step = Step::new(Action::Click("scanButton".into()));
        assert_eq!(step.display_label(), "click scanButton");
        let step = step.labelled("start scan");
        assert_eq!(step.display_label(), "start scan");
    }

    fn result(idx: usize, outcome: Outcome) -> StepResult {
        StepResult {
            outcome,
            ..StepResult::skipped(idx, format!("step {idx}"))
        }
    }

    #[test]
    fn critical_only_policy_tolerates_soft_failures() {
        let steps = vec![
            Step::new(Action::Navigate("/".into())),
            Step::new(Action::Screenshot("home".into())).non_critical(),
        ];
        let results = vec![result(0, Outcome::Passed), result(1, Outcome::Failed)];

        assert_eq!(
            scenario_outcome(OutcomePolicy::AllSteps, &steps, &results),
            Outcome::Failed
        );
        assert_eq!(
            scenario_outcome(OutcomePolicy::CriticalOnly, &steps, &results),
            Outcome::Passed
        );
    }

    #[test]
    fn skipped_steps_fail_the_scenario() {
        let steps = vec![
            Step::new(Action::Navigate("/".into())),
            Step::new(Action::Click("x".into())),
        ];
        let results = vec![result(0, Outcome::Passed), result(1, Outcome::Skipped)];
        assert_eq!(
            scenario_outcome(OutcomePolicy::AllSteps, &steps, &results),
            Outcome::Failed
        );
    }
}
