//! Declarative end-to-end verification for a web dashboard and its API.
//!
//! Scenarios are ordered UI and API steps loaded from YAML or
//! `.scenario.md` files. Each scenario runs in its own browser session;
//! step failures become structured results, and a run folds into one
//! [`Report`] rendered for the console, as JSON and as HTML.

pub mod artifacts;
pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod locator;
pub mod markdown_parser;
pub mod model;
pub mod probe;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod suite;
pub mod validator;

pub use artifacts::ArtifactStore;
pub use chrome::{ChromeConfig, ChromeLauncher};
pub use config::HarnessSettings;
pub use driver::{ActionDriver, BrowserBackend, DriverOptions, SessionFactory};
pub use error::{ErrorInfo, ErrorKind, HarnessError, StepError};
pub use locator::{Locator, TargetCatalog};
pub use model::*;
pub use probe::{ApiProbe, ProbeResult};
pub use registry::ScenarioRegistry;
pub use report::{Report, ReportAggregator, Summary};
pub use resolver::SelectorResolver;
pub use runner::{DefaultScenarioRunner, ScenarioRunner};
pub use suite::{SuiteOptions, SuiteRunner};

/// Crate version, reported by `vigil --version` and in logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run identifier: UTC timestamp, sortable and safe in file names.
pub fn new_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_file_name_safe() {
        let id = new_run_id();
        assert!(id.ends_with('Z'));
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.'));
    }
}
