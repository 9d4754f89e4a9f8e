//! vigil CLI - runs dashboard verification scenarios.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use vigil::config;
use vigil::report::{self, render_console, render_html, render_json, Report};
use vigil::{
    new_run_id, ArtifactStore, ChromeConfig, ChromeLauncher, DefaultScenarioRunner,
    HarnessError, HarnessSettings, Scenario, ScenarioRegistry, SuiteOptions, SuiteRunner,
};

/// vigil - declarative browser and API verification for the dashboard.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Dashboard base URL.
    #[arg(long = "base-url", env = "VIGIL_BASE_URL", global = true)]
    base_url: Option<String>,

    /// REST API base URL.
    #[arg(long = "api-url", env = "VIGIL_API_URL", global = true)]
    api_url: Option<String>,

    /// Scenario directory (repeatable).
    #[arg(short = 's', long = "scenarios", global = true)]
    scenarios: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scenario by id, or `all`.
    Run(RunArgs),
    /// List registered scenarios.
    List,
    /// Re-render a saved JSON report.
    Report {
        file: PathBuf,
        #[arg(long = "format", default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario id or `all`.
    #[arg(default_value = "all")]
    scenario: String,

    /// Run the browser headless.
    #[arg(
        long = "headless",
        env = "VIGIL_HEADLESS",
        value_parser = parse_headless,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    headless: Option<bool>,

    /// Show the browser window.
    #[arg(long = "headed")]
    headed: bool,

    /// Per-step timeout in milliseconds, replacing scenario defaults.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Artifact and report directory.
    #[arg(short = 'o', long = "out", env = "VIGIL_OUT")]
    out: Option<PathBuf>,

    /// Wall-clock budget for the whole run in milliseconds.
    #[arg(long = "deadline")]
    deadline: Option<u64>,

    /// Scenarios to run concurrently.
    #[arg(long = "parallel", default_value_t = 1)]
    parallel: usize,

    /// Only run scenarios carrying this tag.
    #[arg(long = "tag")]
    tag: Option<String>,

    /// Skip the screenshot taken when a UI step fails.
    #[arg(long = "no-failure-screenshots")]
    no_failure_screenshots: bool,

    /// What to print on stdout once the run finishes.
    #[arg(long = "format", default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Html,
}

fn parse_headless(value: &str) -> Result<bool, String> {
    config::parse_flag(value).ok_or_else(|| format!("expected a boolean flag, got '{value}'"))
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn settings_from(cli: &Cli) -> Result<HarnessSettings> {
    let mut settings = HarnessSettings::from_env()?;
    if let Some(url) = &cli.base_url {
        settings.base_url = url.clone();
    }
    if let Some(url) = &cli.api_url {
        settings.api_url = url.clone();
    }
    if !cli.scenarios.is_empty() {
        settings.scenario_dirs = cli.scenarios.clone();
    }
    Ok(settings)
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", render_console(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Html => println!("{}", render_html(report)),
    }
    Ok(())
}

/// Scenarios named by `selector`, narrowed to `tag` when given.
fn select_scenarios(
    registry: &ScenarioRegistry,
    selector: &str,
    tag: Option<&str>,
) -> Result<Vec<Scenario>> {
    let mut selected = registry.select(selector)?;
    if let Some(tag) = tag {
        let tagged: HashSet<&str> = registry
            .filter_by_tag(tag)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        selected.retain(|s| tagged.contains(s.id.as_str()));
    }
    if selected.is_empty() {
        return Err(anyhow!("No scenarios matching the selection were found"));
    }
    Ok(selected.into_iter().cloned().collect())
}

async fn run_scenarios(settings: HarnessSettings, args: RunArgs) -> Result<i32> {
    let mut settings = settings;
    if let Some(headless) = args.headless {
        settings.headless = headless;
    }
    if args.headed {
        settings.headless = false;
    }
    if let Some(out) = args.out {
        settings.out_dir = out;
    }
    settings.timeout_override_ms = args.timeout;
    settings.screenshot_on_failure = !args.no_failure_screenshots;

    let registry = ScenarioRegistry::load(&settings.scenario_dirs)?;
    let selected = select_scenarios(&registry, &args.scenario, args.tag.as_deref())?;

    let run_id = new_run_id();
    let artifacts = ArtifactStore::new(settings.out_dir.clone(), run_id.clone());
    info!(
        "Run {} ({} scenario(s), base {}, api {})",
        run_id,
        selected.len(),
        settings.base_url,
        settings.api_url
    );

    let launcher = ChromeLauncher::new(ChromeConfig {
        headless: settings.headless,
        ..ChromeConfig::default()
    });
    let runner = DefaultScenarioRunner::new(settings, Arc::new(launcher), artifacts.clone())
        .with_targets(registry.targets().clone());
    let suite = SuiteRunner::new(
        Arc::new(runner),
        SuiteOptions {
            parallel: args.parallel.max(1),
            deadline: args.deadline.map(Duration::from_millis),
        },
    );

    let report = suite.run(&run_id, &selected).await?;

    let json_path = artifacts.report_path("json");
    let html_path = artifacts.report_path("html");
    report::write_json(&report, &json_path)?;
    report::write_html(&report, &html_path)?;
    info!("Report saved: {}", json_path.display());
    info!("Report saved: {}", html_path.display());

    print_report(&report, args.format)?;
    Ok(report.exit_code())
}

fn list_scenarios(settings: &HarnessSettings) -> Result<i32> {
    let registry = ScenarioRegistry::load(&settings.scenario_dirs)?;
    for scenario in registry.iter() {
        let tags = if scenario.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", scenario.tags.join(", "))
        };
        println!(
            "{}{} - {} step(s){}",
            scenario.id,
            tags,
            scenario.steps.len(),
            scenario
                .description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        );
    }
    println!("{} scenario(s), {} shared target(s)", registry.len(), registry.targets().len());
    Ok(0)
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let settings = settings_from(&cli)?;
    match cli.command {
        Command::Run(args) => run_scenarios(settings, args).await,
        Command::List => list_scenarios(&settings),
        Command::Report { file, format } => {
            let report = report::load_json(&file)?;
            print_report(&report, format)?;
            Ok(report.exit_code())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("vigil {}", vigil::VERSION);

    match dispatch(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            match e.downcast_ref::<HarnessError>() {
                Some(harness) => error!("{} ({:?})", harness, harness.kind()),
                None => error!("{:#}", e),
            }
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ScenarioRegistry {
        let mut registry = ScenarioRegistry::new();
        for yaml in [
            "id: clusters\ntags: [smoke, ui]\nsteps:\n  - navigate: /clusters\n",
            "id: tasks\ntags: [ui]\nsteps:\n  - navigate: /tasks\n",
            "id: api-health\ntags: [smoke]\nsteps:\n  - api_check:\n      url: /health\n",
        ] {
            registry.insert(Scenario::from_yaml(yaml).unwrap()).unwrap();
        }
        registry
    }

    fn ids(scenarios: &[Scenario]) -> Vec<&str> {
        scenarios.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn tag_narrows_the_selection() {
        let registry = registry();

        let all = select_scenarios(&registry, "all", Some("smoke")).unwrap();
        assert_eq!(ids(&all), vec!["clusters", "api-health"]);

        let one = select_scenarios(&registry, "tasks", Some("ui")).unwrap();
        assert_eq!(ids(&one), vec!["tasks"]);

        assert!(select_scenarios(&registry, "tasks", Some("smoke")).is_err());
        assert!(select_scenarios(&registry, "missing", None).is_err());
    }

    #[test]
    fn headless_flag_accepts_the_environment_spellings() {
        for (raw, expected) in [("1", true), ("true", true), ("off", false), ("no", false)] {
            let cli = Cli::try_parse_from(["vigil", "run", "--headless", raw]).unwrap();
            let Command::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.headless, Some(expected), "--headless {raw}");
        }

        let cli = Cli::try_parse_from(["vigil", "run", "--headless"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.headless, Some(true));

        assert!(Cli::try_parse_from(["vigil", "run", "--headless", "maybe"]).is_err());
    }

    #[test]
    fn headless_env_value_goes_through_the_same_parser() {
        std::env::set_var("VIGIL_HEADLESS", "0");
        let cli = Cli::try_parse_from(["vigil", "run", "clusters"]);
        let settings = HarnessSettings::from_env();
        std::env::remove_var("VIGIL_HEADLESS");

        let Command::Run(args) = cli.unwrap().command else {
            panic!("expected run");
        };
        assert_eq!(args.headless, Some(false));
        assert!(!settings.unwrap().headless);
    }
}
