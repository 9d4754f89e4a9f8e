//! Scenario registry: loads scenario files and the shared target catalog.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::locator::TargetCatalog;
use crate::model::Scenario;

/// File names holding a directory's shared target catalog.
const CATALOG_FILES: [&str; 2] = ["targets.yaml", "targets.yml"];

/// All known scenarios, in load order, plus the shared target catalog.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
    index: HashMap<String, usize>,
    sources: HashMap<String, PathBuf>,
    targets: TargetCatalog,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every directory in order. A file that fails to parse, a
    /// duplicate id, or a target without candidates fails the load.
    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, HarnessError> {
        let mut registry = Self::new();
        for dir in dirs {
            registry
                .load_dir(dir)
                .map_err(|e| HarnessError::Registry(format!("{e:#}")))?;
        }
        registry.warn_unknown_targets();
        info!("Loaded {} scenario(s) in total", registry.len());
        Ok(registry)
    }

    /// Load one directory. Files are visited in name order so the
    /// registry order is stable across platforms.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        info!("Loading scenarios from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in
            fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths.iter().filter(|p| is_catalog_file(p)) {
            self.load_catalog(path)?;
        }

        let mut loaded = 0;
        for path in paths.iter().filter(|p| is_scenario_file(p) && !is_catalog_file(p)) {
            let scenario = load_scenario_file(path)?;
            self.insert_from(scenario, Some(path.clone()))?;
            loaded += 1;
        }

        info!("Loaded {} scenario(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Merge a target catalog file into the shared catalog.
    pub fn load_catalog<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .context(format!("Failed to read target catalog: {}", path.display()))?;
        let catalog = TargetCatalog::from_yaml(&content)
            .context(format!("Failed to parse target catalog: {}", path.display()))?;

        let empty = catalog.empty_targets();
        if !empty.is_empty() {
            bail!(
                "{}: target(s) without candidates: {}",
                path.display(),
                empty.join(", ")
            );
        }

        debug!("Loaded {} target(s) from {}", catalog.len(), path.display());
        self.targets.merge(&catalog);
        Ok(())
    }

    pub fn insert(&mut self, scenario: Scenario) -> Result<()> {
        self.insert_from(scenario, None)
    }

    fn insert_from(&mut self, scenario: Scenario, source: Option<PathBuf>) -> Result<()> {
        let origin = source
            .as_ref()
            .map_or_else(|| "<inline>".to_string(), |p| p.display().to_string());

        if scenario.id.trim().is_empty() {
            bail!("{origin}: scenario has no id");
        }
        if let Some(existing) = self.sources.get(&scenario.id) {
            bail!(
                "duplicate scenario id '{}' in {} (already defined in {})",
                scenario.id,
                origin,
                existing.display()
            );
        }
        if self.index.contains_key(&scenario.id) {
            bail!("duplicate scenario id '{}' in {}", scenario.id, origin);
        }

        let empty = scenario.targets.empty_targets();
        if !empty.is_empty() {
            bail!(
                "{origin}: scenario '{}' declares target(s) without candidates: {}",
                scenario.id,
                empty.join(", ")
            );
        }

        debug!("Registered scenario: {}", scenario.id);
        self.index.insert(scenario.id.clone(), self.scenarios.len());
        if let Some(path) = source {
            self.sources.insert(scenario.id.clone(), path);
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    fn warn_unknown_targets(&self) {
        for scenario in &self.scenarios {
            for target in scenario.referenced_targets() {
                if !scenario.targets.contains(target) && !self.targets.contains(target) {
                    warn!(
                        "Scenario '{}' references unknown target '{}'",
                        scenario.id, target
                    );
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.index.get(id).map(|&i| &self.scenarios[i])
    }

    pub fn ids(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.id.as_str()).collect()
    }

    /// `"all"` selects every scenario in registry order; anything else
    /// must be a known id.
    pub fn select(&self, selector: &str) -> Result<Vec<&Scenario>, HarnessError> {
        if selector == "all" {
            return Ok(self.scenarios.iter().collect());
        }
        self.get(selector)
            .map(|s| vec![s])
            .ok_or_else(|| HarnessError::UnknownScenario(selector.to_string()))
    }

    pub fn filter_by_tag(&self, tag: &str) -> Vec<&Scenario> {
        self.scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn source(&self, id: &str) -> Option<&Path> {
        self.sources.get(id).map(PathBuf::as_path)
    }

    /// Shared target catalog merged from every loaded directory.
    pub fn targets(&self) -> &TargetCatalog {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

/// Load a single scenario file.
///
/// Dispatches to [`Scenario::from_markdown`] for `.scenario.md` files and
/// to [`Scenario::from_yaml`] otherwise. A missing id defaults to the file
/// stem (`clusters.scenario.md` → `clusters`).
pub fn load_scenario_file<P: AsRef<Path>>(path: P) -> Result<Scenario> {
    let path = path.as_ref();
    debug!("Loading scenario from {}", path.display());

    let content =
        fs::read_to_string(path).context(format!("Failed to read scenario file: {}", path.display()))?;

    let mut scenario = if is_markdown_scenario(path) {
        Scenario::from_markdown(&content).context(format!(
            "Failed to parse Markdown scenario from {}",
            path.display()
        ))?
    } else {
        Scenario::from_yaml(&content)
            .context(format!("Failed to parse YAML from {}", path.display()))?
    };

    if scenario.id.trim().is_empty() {
        scenario.id = default_id(path);
    }
    Ok(scenario)
}

fn default_id(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.strip_suffix(".scenario.md")
        .or_else(|| name.strip_suffix(".yaml"))
        .or_else(|| name.strip_suffix(".yml"))
        .unwrap_or(name)
        .to_string()
}

/// Return `true` if the file path looks like a scenario file
/// (`.yaml`, `.yml` or `.scenario.md`).
fn is_scenario_file(path: &Path) -> bool {
    if is_markdown_scenario(path) {
        return true;
    }
    path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Return `true` when the path ends with `.scenario.md`.
fn is_markdown_scenario(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".scenario.md"))
}

fn is_catalog_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| CATALOG_FILES.contains(&n))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── file classification ─────────────────────────────

    #[test]
    fn test_yaml_is_scenario_file() {
        assert!(is_scenario_file(Path::new("test.yaml")));
        assert!(is_scenario_file(Path::new("test.yml")));
        assert!(is_scenario_file(Path::new("dir/nested/foo.yaml")));
    }

    #[test]
    fn test_markdown_is_scenario_file() {
        assert!(is_scenario_file(Path::new("test.scenario.md")));
        assert!(!is_scenario_file(Path::new("notes.md")));
        assert!(!is_scenario_file(Path::new("test.json")));
        assert!(!is_scenario_file(Path::new("no_ext")));
    }

    #[test]
    fn test_markdown_scenario_detection() {
        assert!(is_markdown_scenario(Path::new("foo.scenario.md")));
        assert!(!is_markdown_scenario(Path::new("foo.md")));
        assert!(!is_markdown_scenario(Path::new("scenario.md.bak")));
    }

    #[test]
    fn test_default_id_strips_scenario_suffixes() {
        assert_eq!(default_id(Path::new("dir/clusters.yaml")), "clusters");
        assert_eq!(default_id(Path::new("scan.scenario.md")), "scan");
        assert_eq!(default_id(Path::new("tasks.yml")), "tasks");
    }

    // ── loading (filesystem tests) ──────────────────────

    #[test]
    fn test_load_from_dir_with_mixed_formats() {
        let dir = tempdir_with_files(&[
            ("a.yaml", "steps:\n  - navigate: /clusters\n"),
            (
                "b.scenario.md",
                "---\nid: md-test\ntags: [smoke]\n---\n\n```yaml scenario\nsteps:\n  - click: scanButton\n```\n",
            ),
            ("targets.yaml", "scanButton:\n  - css: button.scan\n"),
            ("c.json", "{\"ignored\": true}"),
            ("d.md", "# Not a scenario\n"),
        ]);

        let registry = ScenarioRegistry::load(&[dir.path()]).unwrap();
        assert_eq!(registry.ids(), vec!["a", "md-test"]);
        assert!(registry.targets().contains("scanButton"));
        assert_eq!(registry.filter_by_tag("smoke").len(), 1);
        assert_eq!(registry.select("all").unwrap().len(), 2);
        assert_eq!(registry.select("a").unwrap()[0].id, "a");
        assert!(matches!(
            registry.select("nope"),
            Err(HarnessError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_parse_failure_fails_the_load() {
        let dir = tempdir_with_files(&[
            ("good.yaml", "steps:\n  - navigate: /\n"),
            ("bad.yaml", "steps: [\n"),
        ]);
        let err = ScenarioRegistry::load(&[dir.path()]).unwrap_err();
        assert!(matches!(err, HarnessError::Registry(_)));
        assert!(err.to_string().contains("bad.yaml"), "{err}");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = tempdir_with_files(&[
            ("one.yaml", "id: same\nsteps:\n  - navigate: /\n"),
            ("two.yaml", "id: same\nsteps:\n  - navigate: /tasks\n"),
        ]);
        let err = ScenarioRegistry::load(&[dir.path()]).unwrap_err();
        assert!(err.to_string().contains("duplicate scenario id 'same'"), "{err}");
    }

    #[test]
    fn test_empty_candidate_list_rejected() {
        let dir = tempdir_with_files(&[(
            "s.yaml",
            "targets:\n  ghost: []\nsteps:\n  - click: ghost\n",
        )]);
        let err = ScenarioRegistry::load(&[dir.path()]).unwrap_err();
        assert!(err.to_string().contains("without candidates"), "{err}");
    }

    #[test]
    fn test_later_directories_extend_the_registry() {
        let first = tempdir_with_files(&[("a.yaml", "steps:\n  - navigate: /\n")]);
        let second = tempdir_with_files(&[("b.yaml", "steps:\n  - navigate: /\n")]);
        let registry = ScenarioRegistry::load(&[first.path(), second.path()]).unwrap();
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert!(registry.source("b").is_some());
    }

    // ── helper ──────────────────────────────────────────

    fn tempdir_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }
}
