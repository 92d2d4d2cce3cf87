use super::events::{TestEvent, parse_event};
use crate::config::{BUNDLED_REPORTER, HostOs, Platform, RunnerSettings};
use crate::process::{CommandRunner, CommandSpec, drain_lines, next_line_lossy};
use crate::{Result, TestError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything a test script needs to find the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerContext {
    pub project_root: PathBuf,
    pub platform: Platform,
    pub host_os: HostOs,
    pub session_id: String,
    pub server_url: String,
    pub app_path: PathBuf,
    pub run_dir: PathBuf,
}

impl RunnerContext {
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("UISUITE_SESSION_ID".to_string(), self.session_id.clone()),
            ("UISUITE_SERVER_URL".to_string(), self.server_url.clone()),
            ("UISUITE_PLATFORM".to_string(), self.platform.to_string()),
            ("UISUITE_HOST_OS".to_string(), self.host_os.to_string()),
            (
                "UISUITE_APP_PATH".to_string(),
                self.app_path.to_string_lossy().to_string(),
            ),
            (
                "UISUITE_RUN_DIR".to_string(),
                self.run_dir.to_string_lossy().to_string(),
            ),
        ]
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the suite, sending events as tests finish. Individual test
    /// failures arrive as events; an `Err` means the runner itself broke.
    async fn run(&self, context: &RunnerContext, events: mpsc::Sender<TestEvent>) -> Result<()>;
}

pub struct CommandTestRunner {
    runner: Arc<dyn CommandRunner>,
    settings: RunnerSettings,
}

const NDJSON_REPORTER: &str = include_str!("../../templates/ndjson-reporter.js");

impl CommandTestRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: RunnerSettings) -> Self {
        Self { runner, settings }
    }

    /// The runner invocation. The bundled reporter is written into the run
    /// directory first.
    pub async fn command(&self, context: &RunnerContext, files: &[PathBuf]) -> Result<CommandSpec> {
        let mut spec = CommandSpec::new(&self.settings.program)
            .args(self.settings.args.iter().cloned())
            .current_dir(&context.project_root);

        match self.settings.reporter.as_deref() {
            Some(BUNDLED_REPORTER) => {
                let path = context.run_dir.join("ndjson-reporter.js");
                tokio::fs::write(&path, NDJSON_REPORTER).await?;
                spec = spec.arg("--reporter").arg(path.to_string_lossy());
            }
            Some(reporter) => spec = spec.arg("--reporter").arg(reporter),
            None => {}
        }

        spec = spec.args(files.iter().map(|f| f.to_string_lossy().to_string()));
        for (key, value) in context.env() {
            spec = spec.env(key, value);
        }
        Ok(spec)
    }
}

/// Suite files under `root` matching `pattern`, sorted.
pub fn discover_tests(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = root.join(pattern);
    let entries = glob::glob(&full.to_string_lossy())
        .map_err(|e| TestError::Config(format!("Invalid test glob '{}': {}", pattern, e)))?;

    let mut files: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
    files.sort();
    Ok(files)
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, context: &RunnerContext, events: mpsc::Sender<TestEvent>) -> Result<()> {
        let files = discover_tests(&context.project_root, &self.settings.test_glob)?;
        if files.is_empty() {
            info!("No test files found for {}", context.platform);
            return Ok(());
        }
        info!("Starting Tests ({} files)", files.len());

        let spec = self.command(context, &files).await?;
        let mut process = self.runner.spawn(&spec).await?;
        if let Some(stderr) = process.take_stderr() {
            drain_lines(stderr, "test-runner-stderr");
        }
        let mut stdout = process
            .take_stdout()
            .ok_or_else(|| TestError::Execution("Test runner stdout was not captured".to_string()))?;

        let mut buf = Vec::new();
        let mut finished = false;
        while let Some(line) = next_line_lossy(&mut stdout, &mut buf).await? {
            match parse_event(&line) {
                Some(event) => {
                    if event == TestEvent::SuiteEnd {
                        finished = true;
                    }
                    if events.send(event).await.is_err() {
                        warn!("Event receiver dropped, stopping test runner");
                        let _ = process.kill().await;
                        return Ok(());
                    }
                }
                None => debug!(source = "test-runner", "{}", line),
            }
        }

        // The runner exits with the failure count, so the code alone says
        // nothing about whether it crashed.
        let code = process.wait().await?;
        debug!(exit_code = ?code, "Test runner exited");

        if !finished {
            return Err(TestError::Execution(format!(
                "Test runner exited before the suite finished (exit code {:?})",
                code
            )));
        }
        Ok(())
    }
}
