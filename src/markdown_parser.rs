/// Markdown scenario file parser.
///
/// A `.scenario.md` file documents a dashboard workflow in prose and
/// carries the executable parts in YAML: a front matter block for the
/// scenario fields and one or more ` ```yaml scenario ` fenced blocks
/// contributing `steps` and `targets`.
///
/// # Format
///
/// ````markdown
/// ---
/// id: cluster-add-dialog
/// description: "Add-cluster dialog opens"
/// tags: [clusters]
/// timeout_ms: 10000
/// ---
///
/// # Clusters
///
/// Free-form explanation text.
///
/// ```yaml scenario
/// targets:
///   addClusterButton:
///     - css: "button.add-cluster"
/// steps:
///   - navigate: /clusters
///   - click: addClusterButton
/// ```
/// ````
use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::locator::TargetCatalog;
use crate::model::{OutcomePolicy, Scenario, Step};

/// Intermediate representation for the YAML front matter.
#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    vars: HashMap<String, serde_json::Value>,
    #[serde(default)]
    targets: TargetCatalog,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    continue_on_step_failure: bool,
    #[serde(default)]
    outcome_policy: OutcomePolicy,
}

/// Content of one ` ```yaml scenario ` block.
///
/// Blocks may also set `timeout_ms` or `continue_on_step_failure`; an
/// explicit value in a later block wins over the front matter.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioBlock {
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    targets: TargetCatalog,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    continue_on_step_failure: Option<bool>,
}

/// A fenced block with the 1-based line of its opening fence.
#[derive(Debug)]
struct CodeBlock {
    line: usize,
    content: String,
}

/// Parse a Markdown scenario file into a [`Scenario`].
pub fn parse_markdown_scenario(input: &str) -> Result<Scenario> {
    let front_matter = parse_front_matter(input).context("Failed to parse front matter")?;

    let fm: FrontMatter = if front_matter.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str(&front_matter)
            .context("Failed to deserialize front matter as YAML")?
    };

    let blocks = extract_scenario_code_blocks(input)?;
    if blocks.is_empty() {
        bail!("No ```yaml scenario code blocks found in Markdown file");
    }

    let mut scenario = Scenario {
        id: fm.id,
        description: fm.description,
        tags: fm.tags,
        vars: fm.vars,
        targets: fm.targets,
        steps: Vec::new(),
        timeout_ms: fm.timeout_ms,
        continue_on_step_failure: fm.continue_on_step_failure,
        outcome_policy: fm.outcome_policy,
    };

    for block in &blocks {
        let parsed: ScenarioBlock = serde_yaml::from_str(&block.content).with_context(|| {
            format!("Failed to parse YAML scenario block at line {}", block.line)
        })?;

        scenario.steps.extend(parsed.steps);
        scenario.targets.merge(&parsed.targets);
        if parsed.timeout_ms.is_some() {
            scenario.timeout_ms = parsed.timeout_ms;
        }
        if let Some(keep_going) = parsed.continue_on_step_failure {
            scenario.continue_on_step_failure = keep_going;
        }
    }

    if scenario.steps.is_empty() {
        bail!("Markdown scenario declares no steps");
    }

    Ok(scenario)
}

/// Extract YAML front matter enclosed between `---` delimiters on the
/// very first lines of the file.
fn parse_front_matter(input: &str) -> Result<String> {
    let mut lines = input.lines();

    match lines.next() {
        Some(line) if line.trim() == "---" => {}
        _ => bail!("Markdown front matter must start with '---'"),
    }

    let mut fm_lines: Vec<&str> = Vec::new();
    for line in lines {
        if line.trim() == "---" {
            return Ok(fm_lines.join("\n"));
        }
        fm_lines.push(line);
    }

    bail!("Closing '---' for front matter not found")
}

/// Fenced blocks whose info string is `yaml scenario`, in document order.
fn extract_scenario_code_blocks(input: &str) -> Result<Vec<CodeBlock>> {
    let mut blocks = Vec::new();
    let mut open: Option<CodeBlock> = None;

    for (idx, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        open = match open.take() {
            None if is_scenario_fence_open(trimmed) => Some(CodeBlock {
                line: idx + 1,
                content: String::new(),
            }),
            None => None,
            Some(block) if trimmed == "```" => {
                blocks.push(block);
                None
            }
            Some(mut block) => {
                block.content.push_str(line);
                block.content.push('\n');
                Some(block)
            }
        };
    }

    if let Some(block) = open {
        bail!(
            "Unterminated ```yaml scenario block starting at line {}",
            block.line
        );
    }

    Ok(blocks)
}

/// ```` ```yaml scenario ````, case-insensitive, spaces allowed after the
/// backticks.
fn is_scenario_fence_open(trimmed: &str) -> bool {
    let Some(info) = trimmed.strip_prefix("```") else {
        return false;
    };
    let words: Vec<String> = info
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    words == ["yaml", "scenario"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, TargetState};

    const SAMPLE: &str = r#"---
id: scan-from-clusters
description: "扫描 from the cluster list"
tags: [scanning]
vars:
  cluster: hive-prod
timeout_ms: 10000
---

# Scan a cluster

Opens the cluster list and starts a scan.

```yaml scenario
targets:
  scanButton:
    - css: "button.scan"
    - text: "扫描"
steps:
  - navigate: /clusters
  - click: scanButton
```

The scan dialog should appear.

```yaml scenario
steps:
  - wait_for:
      target: scanDialog
      state: visible
    label: scan dialog open
```
"#;

    #[test]
    fn test_full_parse() {
        let scenario = parse_markdown_scenario(SAMPLE).unwrap();
        assert_eq!(scenario.id, "scan-from-clusters");
        assert_eq!(scenario.tags, vec!["scanning"]);
        assert_eq!(scenario.timeout_ms, Some(10_000));
        assert_eq!(scenario.vars["cluster"], "hive-prod");
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[1].action, Action::Click("scanButton".into()));
        assert_eq!(
            scenario.steps[2].action,
            Action::WaitFor {
                target: "scanDialog".into(),
                state: TargetState::Visible
            }
        );
        assert_eq!(scenario.targets.get("scanButton").map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_extract_code_blocks() {
        let blocks = extract_scenario_code_blocks(SAMPLE).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].content.contains("scanButton"));
        assert!(blocks[1].content.contains("scanDialog"));
    }

    #[test]
    fn test_block_overrides_front_matter() {
        let input = r#"---
id: override
timeout_ms: 10000
continue_on_step_failure: true
targets:
  dialog:
    - css: ".old"
---

```yaml scenario
timeout_ms: 30000
continue_on_step_failure: false
targets:
  dialog:
    - role: dialog
steps:
  - navigate: /
```
"#;
        let scenario = parse_markdown_scenario(input).unwrap();
        assert_eq!(scenario.timeout_ms, Some(30_000));
        assert!(!scenario.continue_on_step_failure);
        assert_eq!(
            scenario.targets.get("dialog").unwrap()[0].to_string(),
            "role=dialog"
        );
    }

    #[test]
    fn test_non_scenario_code_blocks_ignored() {
        let input = "---\nid: t\n---\n\n```yaml\nsteps: []\n```\n\n```yaml scenario\nsteps:\n  - navigate: /tasks\n```\n";
        let scenario = parse_markdown_scenario(input).unwrap();
        assert_eq!(scenario.steps.len(), 1);
    }

    #[test]
    fn test_fence_detection() {
        assert!(is_scenario_fence_open("```yaml scenario"));
        assert!(is_scenario_fence_open("``` YAML Scenario"));
        assert!(!is_scenario_fence_open("```yaml"));
        assert!(!is_scenario_fence_open("```yaml scenarios"));
        assert!(!is_scenario_fence_open("yaml scenario"));
    }

    #[test]
    fn test_error_includes_line_number() {
        let input = "---\nid: t\n---\n\n```yaml scenario\ninvalid: yaml: content: [\n```\n";
        let err = format!("{:#}", parse_markdown_scenario(input).unwrap_err());
        assert!(err.contains("line 5"), "Error should reference line: {err}");
    }

    #[test]
    fn test_unknown_block_key_rejected() {
        let input = "---\nid: t\n---\n\n```yaml scenario\nstep:\n  - navigate: /\n```\n";
        assert!(parse_markdown_scenario(input).is_err());
    }

    #[test]
    fn test_unclosed_code_block_error() {
        let input = "---\nid: t\n---\n\n```yaml scenario\nsteps:\n  - navigate: /\n";
        let err = parse_markdown_scenario(input).unwrap_err().to_string();
        assert!(err.contains("Unterminated"), "{err}");
    }

    #[test]
    fn test_missing_or_unclosed_front_matter() {
        assert!(parse_markdown_scenario("# No front matter\n").is_err());
        assert!(parse_markdown_scenario("---\nid: t\nno closing\n").is_err());
        assert!(parse_markdown_scenario("\n---\nid: t\n---\n").is_err());
        assert!(parse_markdown_scenario("").is_err());
    }

    #[test]
    fn test_no_steps_fails() {
        let input = "---\nid: t\n---\n\n```yaml scenario\ntargets:\n  a:\n    - css: a\n```\n";
        assert!(parse_markdown_scenario(input).is_err());
    }
}
