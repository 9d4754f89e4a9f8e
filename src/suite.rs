//! Runs a selection of scenarios and folds their results into a report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::HarnessError;
use crate::model::Scenario;
use crate::report::{Report, ReportAggregator};
use crate::runner::ScenarioRunner;

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    /// Scenarios allowed to run at once, each with its own session.
    pub parallel: usize,
    /// Wall-clock budget for the whole run.
    pub deadline: Option<Duration>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            deadline: None,
        }
    }
}

pub struct SuiteRunner {
    runner: Arc<dyn ScenarioRunner>,
    options: SuiteOptions,
}

impl SuiteRunner {
    pub fn new(runner: Arc<dyn ScenarioRunner>, options: SuiteOptions) -> Self {
        Self { runner, options }
    }

    /// Run `scenarios` and build the report. Scenarios appear in the
    /// report in the order given, however they were scheduled.
    ///
    /// A harness error aborts the run and cancels scenarios still in
    /// flight.
    pub async fn run(&self, run_id: &str, scenarios: &[Scenario]) -> Result<Report, HarnessError> {
        let deadline = self.options.deadline.map(|budget| Instant::now() + budget);
        let mut aggregator = ReportAggregator::new(run_id);
        let total = scenarios.len();

        info!(
            "Running {} scenario(s) (parallel: {})...",
            total,
            self.options.parallel.max(1)
        );

        if self.options.parallel <= 1 {
            for (index, scenario) in scenarios.iter().enumerate() {
                info!("Scenario {}/{}: {}", index + 1, total, scenario.id);
                let result = self.runner.run(scenario, deadline).await?;
                aggregator.record(index, result);
            }
            return Ok(aggregator.finish());
        }

        let permits = Arc::new(Semaphore::new(self.options.parallel));
        let mut tasks = JoinSet::new();

        for (index, scenario) in scenarios.iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let permits = Arc::clone(&permits);
            let scenario = scenario.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| HarnessError::Task(e.to_string()))?;
                info!("Scenario {}/{}: {}", index + 1, total, scenario.id);
                let result = runner.run(&scenario, deadline).await?;
                Ok::<_, HarnessError>((index, result))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| HarnessError::Task(e.to_string()))
                .and_then(|result| result);
            match outcome {
                Ok((index, result)) => aggregator.record(index, result),
                Err(e) => {
                    error!("Aborting run: {}", e);
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(aggregator.finish())
    }
}
