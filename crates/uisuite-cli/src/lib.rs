pub mod logging;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use logging::LogLevel;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use uisuite_test::config::{HostOs, Platform, SuiteConfig, parse_platforms};
use uisuite_test::reporting::RunDirectory;
use uisuite_test::{Collaborators, RunContext, RunCoordinator, RunReport};

/// Exit status after an interrupt, as a shell reports SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "uisuite",
    about = "Runs the UI acceptance suite against iOS and Android targets",
    version
)]
pub struct Cli {
    /// Comma separated list of platforms to run.
    #[arg(short, long, default_value = "iOS,Android")]
    pub platforms: String,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Basic)]
    pub logging: LogLevel,

    /// Automation server host. Only local addresses are accepted.
    #[arg(short = 'A', long)]
    pub address: Option<String>,

    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Publish results to the tracker.
    #[arg(short, long)]
    pub update: bool,

    /// Rebuild the application even if a good build exists.
    #[arg(short, long)]
    pub force: bool,

    /// JSON configuration file layered over the defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn apply(&self, config: &mut SuiteConfig) {
        if let Some(address) = &self.address {
            config.server.host = address.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.update {
            config.tracker.enabled = true;
        }
        if self.force {
            config.force_rebuild = true;
        }
    }
}

/// Runs the suite and returns the process exit code. Log writers are
/// flushed before this returns.
pub fn run(args: &[String]) -> anyhow::Result<i32> {
    let argv = std::iter::once("uisuite".to_string()).chain(args.iter().cloned());
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let platforms = parse_platforms(&cli.platforms)?;
    let mut config = SuiteConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let run_dir = RunDirectory::create(&config.project_root, Local::now())
        .context("failed to prepare the run directory")?;
    let guards = logging::init(cli.logging, &run_dir)?;
    info!("Logs for this run: {}", run_dir.root.display());

    let runtime = tokio::runtime::Runtime::new()?;
    let code = runtime.block_on(execute(config, run_dir, &platforms))?;
    runtime.shutdown_timeout(Duration::from_secs(5));
    drop(guards);
    Ok(code)
}

async fn execute(
    config: SuiteConfig,
    run_dir: RunDirectory,
    platforms: &[Platform],
) -> anyhow::Result<i32> {
    let context = RunContext {
        run_dir,
        host_os: HostOs::current(),
        force_rebuild: config.force_rebuild,
    };
    let parts = Collaborators::system(&config).context("failed to set up collaborators")?;
    let mut coordinator = RunCoordinator::new(config, context, parts)?;

    let report = tokio::select! {
        report = coordinator.run(platforms) => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };

    match report {
        Some(report) => {
            summarize(&report);
            Ok(0)
        }
        None => {
            coordinator.quick_kill().await;
            warn!("Run interrupted");
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}

fn summarize(report: &RunReport) {
    for platform in &report.platforms {
        let counts = platform.counts();
        match platform.failed_stage {
            Some(stage) => error!(
                "{} stopped during {}: {}",
                platform.platform,
                stage,
                platform.error.as_deref().unwrap_or("unknown error")
            ),
            None => info!("{} finished", platform.platform),
        }
        if let Some(path) = &platform.junit_report {
            info!("JUnit report: {}", path.display());
        }
        if counts.total() == 0 && platform.succeeded() {
            warn!("No test results were collected for {}", platform.platform);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["uisuite"]).unwrap();
        assert_eq!(cli.platforms, "iOS,Android");
        assert_eq!(cli.logging, LogLevel::Basic);
        assert!(!cli.update);
        assert!(!cli.force);

        let mut config = SuiteConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 4723);
        assert!(!config.tracker.enabled);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "uisuite",
            "--platforms",
            "Android",
            "--logging",
            "debug",
            "--address",
            "127.0.0.1",
            "--port",
            "4800",
            "--update",
            "--force",
        ])
        .unwrap();
        assert_eq!(cli.logging.directive(), "debug");

        let mut config = SuiteConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4800);
        assert!(config.tracker.enabled);
        assert!(config.force_rebuild);
        assert_eq!(parse_platforms(&cli.platforms).unwrap(), vec![Platform::Android]);
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "uisuite", "-p", "iOS", "-l", "debug", "-A", "localhost", "-P", "4724", "-u", "-f",
        ])
        .unwrap();
        assert_eq!(cli.platforms, "iOS");
        assert_eq!(cli.logging, LogLevel::Debug);
        assert_eq!(cli.address.as_deref(), Some("localhost"));
        assert_eq!(cli.port, Some(4724));
        assert!(cli.update);
        assert!(cli.force);
    }

    #[test]
    fn test_unknown_logging_level_is_rejected() {
        assert!(Cli::try_parse_from(["uisuite", "--logging", "verbose"]).is_err());
    }

    #[test]
    fn test_config_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(&path, r#"{"server": {"port": 4999}}"#).unwrap();

        let cli = Cli::try_parse_from(["uisuite", "--config", path.to_str().unwrap()]).unwrap();
        let mut config = SuiteConfig::load(cli.config.as_deref()).unwrap();
        cli.apply(&mut config);
        assert_eq!(config.server.port, 4999);
        assert_eq!(config.server.host, "localhost");
    }
}
