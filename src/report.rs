//! Report aggregation and rendering.
//!
//! Counts are computed once, in [`ReportAggregator::finish`]. Renderers
//! only read the finished [`Report`], so the console, JSON and HTML forms
//! of one report always agree.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::model::{Outcome, ScenarioResult};

/// Outcome counts for one level (scenarios or steps).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `passed / total`; 0.0 for an empty run.
    pub success_rate: f64,
    pub steps: Tally,
}

impl Summary {
    fn compute(scenarios: &[ScenarioResult]) -> Self {
        let mut totals = Tally::default();
        let mut steps = Tally::default();
        for scenario in scenarios {
            totals.add(scenario.outcome);
            for step in &scenario.steps {
                steps.add(step.outcome);
            }
        }

        let success_rate = if totals.total == 0 {
            0.0
        } else {
            totals.passed as f64 / totals.total as f64
        };

        Self {
            total: totals.total,
            passed: totals.passed,
            failed: totals.failed,
            skipped: totals.skipped,
            success_rate,
            steps,
        }
    }
}

/// One complete run. Built once by the aggregator, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioResult>,
    pub summary: Summary,
}

impl Report {
    /// True when no scenario failed.
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    /// Process exit code for this report: 0 when nothing failed, else 1.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}

/// Collects scenario results, possibly out of order, into a [`Report`].
#[derive(Debug)]
pub struct ReportAggregator {
    run_id: String,
    started_at: DateTime<Utc>,
    entries: Vec<(usize, ScenarioResult)>,
}

impl ReportAggregator {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Record a result. `index` is the scenario's position in the
    /// selection; the report lists scenarios in that order.
    pub fn record(&mut self, index: usize, result: ScenarioResult) {
        self.entries.push((index, result));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(mut self) -> Report {
        self.entries.sort_by_key(|(index, _)| *index);
        let scenarios: Vec<ScenarioResult> =
            self.entries.into_iter().map(|(_, result)| result).collect();
        let summary = Summary::compute(&scenarios);

        Report {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            scenarios,
            summary,
        }
    }
}

fn step_marker(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "✓",
        Outcome::Failed => "✗",
        Outcome::Skipped => "-",
    }
}

/// Human-readable summary, grouped by scenario. The last line is always
/// the run summary.
pub fn render_console(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {}", report.run_id);

    for scenario in &report.scenarios {
        let _ = writeln!(
            out,
            "{} {} ({} ms)",
            scenario.outcome, scenario.id, scenario.duration_ms
        );
        for step in &scenario.steps {
            let _ = writeln!(
                out,
                "  {}. {} {} ({} ms)",
                step.step_index + 1,
                step_marker(step.outcome),
                step.label,
                step.duration_ms
            );
            if let Some(error) = &step.error {
                let _ = writeln!(out, "     Error [{:?}]: {}", error.kind, error.message);
            }
            for artifact in &step.artifacts {
                let _ = writeln!(out, "     Artifact: {}", artifact.display());
            }
        }
    }

    let s = &report.summary;
    let _ = write!(
        out,
        "Summary: {} scenario(s), {} passed, {} failed, {} skipped ({:.1}% success); steps: {} passed, {} failed, {} skipped",
        s.total,
        s.passed,
        s.failed,
        s.skipped,
        s.success_rate * 100.0,
        s.steps.passed,
        s.steps.failed,
        s.steps.skipped
    );
    out
}

pub fn render_json(report: &Report) -> Result<String, HarnessError> {
    serde_json::to_string_pretty(report).map_err(|e| HarnessError::Report(e.to_string()))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn outcome_class(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "passed",
        Outcome::Failed => "failed",
        Outcome::Skipped => "skipped",
    }
}

/// Self-contained HTML page for the report.
pub fn render_html(report: &Report) -> String {
    let mut rows = String::new();
    for scenario in &report.scenarios {
        let _ = write!(
            rows,
            r#"<tr class="scenario {cls}"><td colspan="2"><strong>{id}</strong> {desc}</td><td>{outcome}</td><td>{ms} ms</td></tr>"#,
            cls = outcome_class(scenario.outcome),
            id = escape_html(&scenario.id),
            desc = escape_html(scenario.description.as_deref().unwrap_or("")),
            outcome = scenario.outcome,
            ms = scenario.duration_ms,
        );
        for step in &scenario.steps {
            let mut notes = String::new();
            if let Some(error) = &step.error {
                let _ = write!(
                    notes,
                    r#"<div class="error">{:?}: {}</div>"#,
                    error.kind,
                    escape_html(&error.message)
                );
            }
            for artifact in &step.artifacts {
                let path = escape_html(&artifact.display().to_string());
                let _ = write!(notes, r#"<div><a href="{path}">{path}</a></div>"#);
            }
            let _ = write!(
                rows,
                r#"<tr class="step {cls}"><td>{n}</td><td>{label}{notes}</td><td>{outcome}</td><td>{ms} ms</td></tr>"#,
                cls = outcome_class(step.outcome),
                n = step.step_index + 1,
                label = escape_html(&step.label),
                outcome = step.outcome,
                ms = step.duration_ms,
            );
        }
    }

    let s = &report.summary;
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>vigil report {run_id}</title>
<style>
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 2rem; color: #222; }}
  table {{ border-collapse: collapse; width: 100%; }}
  td {{ border-bottom: 1px solid #eee; padding: 4px 8px; vertical-align: top; }}
  tr.scenario td {{ background: #f6f6f6; }}
  tr.step td:first-child {{ text-align: right; width: 3em; color: #888; }}
  .passed td:nth-child(3) {{ color: #1a7f37; }}
  .failed td:nth-child(3) {{ color: #cf222e; }}
  .skipped td:nth-child(3) {{ color: #888; }}
  .error {{ color: #cf222e; font-family: monospace; white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>Run {run_id}</h1>
<p>{started} &rarr; {finished}</p>
<p class="summary">{total} scenario(s): {passed} passed, {failed} failed, {skipped} skipped ({rate:.1}% success). Steps: {sp} passed, {sf} failed, {ss} skipped.</p>
<table>
{rows}
</table>
</body>
</html>
"#,
        run_id = escape_html(&report.run_id),
        started = report.started_at.to_rfc3339(),
        finished = report.finished_at.to_rfc3339(),
        total = s.total,
        passed = s.passed,
        failed = s.failed,
        skipped = s.skipped,
        rate = s.success_rate * 100.0,
        sp = s.steps.passed,
        sf = s.steps.failed,
        ss = s.steps.skipped,
        rows = rows,
    )
}

fn write_file(path: &Path, content: &str) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn write_json(report: &Report, path: &Path) -> Result<(), HarnessError> {
    write_file(path, &render_json(report)?)
}

pub fn write_html(report: &Report, path: &Path) -> Result<(), HarnessError> {
    write_file(path, &render_html(report))
}

/// Read a report previously written by [`write_json`].
pub fn load_json(path: &Path) -> Result<Report, HarnessError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| HarnessError::Report(format!("{}: {e}", path.display())))
}
