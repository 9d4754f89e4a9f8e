//! Artifact directory layout.
//!
//! Layout: `<root>/<run_id>/<scenario_id>/<step>-<label>.<ext>` for step
//! artifacts and `<root>/report-<run_id>.<ext>` for reports. Scenario and
//! step index are part of every artifact path, so scenarios running in
//! parallel never write the same file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    run_id: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            run_id: run_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Directory for one scenario's artifacts.
    ///
    /// Ids with no ASCII alphanumerics are spelled out as code points so
    /// each still gets a directory of its own.
    pub fn scenario_dir(&self, scenario_id: &str) -> PathBuf {
        let mut slug = slugify(scenario_id);
        if slug.is_empty() {
            slug = scenario_id
                .chars()
                .filter(|c| !c.is_whitespace())
                .fold(String::from("scenario"), |mut acc, c| {
                    acc.push_str(&format!("-{:x}", c as u32));
                    acc
                });
        }
        self.root.join(&self.run_id).join(slug)
    }

    pub fn report_path(&self, extension: &str) -> PathBuf {
        self.root
            .join(format!("report-{}.{extension}", self.run_id))
    }

    /// Write bytes for a step artifact and return the path written.
    ///
    /// An existing file is never overwritten; a numeric suffix is added
    /// instead.
    pub async fn write_step_artifact(
        &self,
        scenario_id: &str,
        step_index: usize,
        label: &str,
        extension: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.scenario_dir(scenario_id);
        fs::create_dir_all(&dir).await?;

        let mut stem = format!("{:02}-{}", step_index + 1, slugify(label));
        if stem.ends_with('-') {
            stem.push_str("artifact");
        }

        for attempt in 1u32.. {
            let name = if attempt == 1 {
                format!("{stem}.{extension}")
            } else {
                format!("{stem}-{attempt}.{extension}")
            };
            let path = dir.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    debug!("Artifact written: {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        unreachable!()
    }
}

/// Lowercase ASCII slug; whitespace, `-` and `_` collapse into `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if (ch.is_whitespace() || matches!(ch, '-' | '_' | '/' | '.'))
            && !slug.ends_with('_')
        {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_non_ascii_and_collapses_separators() {
        assert_eq!(slugify("Add Cluster / dialog"), "add_cluster_dialog");
        assert_eq!(slugify("扫描 scan-button"), "scan_button");
        assert_eq!(slugify("集群"), "");
    }

    #[tokio::test]
    async fn non_ascii_scenario_ids_keep_their_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "run-1");

        assert_eq!(
            store.scenario_dir("集群"),
            dir.path().join("run-1").join("scenario-96c6-7fa4")
        );
        assert_ne!(store.scenario_dir("集群巡检"), store.scenario_dir("任务巡检"));

        let path = store
            .write_step_artifact("集群巡检", 0, "首页", "png", b"a")
            .await
            .unwrap();
        assert_eq!(path.parent().unwrap(), store.scenario_dir("集群巡检"));
        assert!(path.ends_with("01-artifact.png"));
    }

    #[tokio::test]
    async fn step_artifacts_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "run-1");

        let first = store
            .write_step_artifact("clusters", 0, "dialog open", "png", b"a")
            .await
            .unwrap();
        let second = store
            .write_step_artifact("clusters", 0, "dialog open", "png", b"b")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with("run-1/clusters/01-dialog_open.png"));
        assert!(second.ends_with("run-1/clusters/01-dialog_open-2.png"));
        assert_eq!(std::fs::read(&first).unwrap(), b"a");
        assert_eq!(std::fs::read(&second).unwrap(), b"b");
    }

    #[tokio::test]
    async fn unlabelled_artifacts_get_a_stem() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "run-2");
        let path = store
            .write_step_artifact("s", 4, "截图", "png", b"x")
            .await
            .unwrap();
        assert!(path.ends_with("05-artifact.png"), "{}", path.display());
    }

    #[test]
    fn report_path_is_per_run() {
        let store = ArtifactStore::new("out", "run-3");
        assert_eq!(store.report_path("json"), PathBuf::from("out/report-run-3.json"));
    }
}
