#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uisuite_test::build::{BuildArtifact, BuildDriver};
use uisuite_test::config::{Platform, PlatformTarget};
use uisuite_test::execution::{RunnerContext, TestEvent, TestResult, TestRunner, TestState};
use uisuite_test::process::{CommandOutput, CommandRunner, CommandSpec, LineSource, SpawnedProcess};
use uisuite_test::session::{DriverConnection, DriverConnector, LogEntry};
use uisuite_test::tracker::{CycleEntry, ProjectVersion, TrackerApi};
use uisuite_test::{Result, TestError};

pub type Timeline = Arc<Mutex<Vec<String>>>;

pub fn timeline() -> Timeline {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(timeline: &Timeline) -> Vec<String> {
    timeline.lock().unwrap().clone()
}

/// Pretends to be the host: the automation server prints its banner, the
/// emulator boots at once and every other command succeeds silently.
pub struct FakeCommandRunner {
    pub spawned: Mutex<Vec<CommandSpec>>,
    pub ran: Mutex<Vec<CommandSpec>>,
    pub server_banner: String,
    pub fail_spawn: bool,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            ran: Mutex::new(Vec::new()),
            server_banner: "[Appium] Appium REST http interface listener started on localhost:4723\n"
                .to_string(),
            fail_spawn: false,
        }
    }

    pub fn with_banner(mut self, banner: &str) -> Self {
        self.server_banner = banner.to_string();
        self
    }

    pub fn spawn_count(&self, suffix: &str) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.program.ends_with(suffix))
            .count()
    }

    pub fn ran_display(&self) -> Vec<String> {
        self.ran.lock().unwrap().iter().map(|s| s.display()).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        self.spawned.lock().unwrap().push(spec.clone());
        if self.fail_spawn {
            return Err(TestError::Execution(format!("cannot spawn {}", spec.program)));
        }

        let stdout: Option<LineSource> = if spec.program.ends_with("appium") {
            Some(Box::new(Cursor::new(self.server_banner.clone().into_bytes())))
        } else {
            None
        };
        Ok(SpawnedProcess::from_parts(Some(4242), stdout))
    }

    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.ran.lock().unwrap().push(spec.clone());
        let stdout = if spec.args.iter().any(|a| a == "init.svc.bootanim") {
            "stopped\n"
        } else if spec.program == "sysctl" {
            "17179869184\n"
        } else {
            ""
        };
        Ok(CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

pub struct FakeConnection {
    id: String,
    timeline: Timeline,
}

#[async_trait]
impl DriverConnection for FakeConnection {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn close_app(&self) -> Result<()> {
        self.timeline.lock().unwrap().push(format!("close:{}", self.id));
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.timeline.lock().unwrap().push(format!("quit:{}", self.id));
        Ok(())
    }

    async fn log_types(&self) -> Result<Vec<String>> {
        Ok(vec!["syslog".to_string()])
    }

    async fn get_log(&self, _log_type: &str) -> Result<Vec<LogEntry>> {
        Ok(vec![LogEntry {
            timestamp: 0,
            level: "INFO".to_string(),
            message: "device says hi".to_string(),
        }])
    }
}

pub struct FakeConnector {
    pub timeline: Timeline,
    pub capabilities: Mutex<Vec<Value>>,
    pub fail_for: Option<String>,
}

impl FakeConnector {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            capabilities: Mutex::new(Vec::new()),
            fail_for: None,
        }
    }
}

#[async_trait]
impl DriverConnector for FakeConnector {
    async fn connect(
        &self,
        _server_url: &str,
        capabilities: &Value,
    ) -> Result<Box<dyn DriverConnection>> {
        let platform = capabilities["platformName"].as_str().unwrap_or("?").to_string();
        self.capabilities.lock().unwrap().push(capabilities.clone());
        if self.fail_for.as_deref() == Some(platform.as_str()) {
            return Err(TestError::Session("session not created".to_string()));
        }
        self.timeline
            .lock()
            .unwrap()
            .push(format!("session:{}", platform));
        Ok(Box::new(FakeConnection {
            id: format!("{}-session", platform),
            timeline: self.timeline.clone(),
        }))
    }
}

pub struct FakeBuilder {
    pub timeline: Timeline,
    pub fail_for: Option<Platform>,
}

#[async_trait]
impl BuildDriver for FakeBuilder {
    async fn build(&self, target: &PlatformTarget, _force: bool) -> Result<BuildArtifact> {
        self.timeline
            .lock()
            .unwrap()
            .push(format!("build:{}", target.platform));
        if self.fail_for == Some(target.platform) {
            return Err(TestError::Build("[ERROR] Application build failed".to_string()));
        }
        Ok(BuildArtifact {
            platform: target.platform,
            app_path: PathBuf::from(format!("/builds/{}/AppiumTest", target.platform)),
            log_path: PathBuf::from("/builds/build.log"),
            reused: false,
        })
    }
}

pub fn test_end(ticket: &str, title: &str, state: TestState, error: Option<&str>) -> TestEvent {
    TestEvent::TestEnd(TestResult {
        title: title.to_string(),
        ticket: Some(ticket.to_string()),
        state,
        error: error.map(str::to_string),
        test_num: None,
    })
}

/// Replays canned events per platform.
pub struct ScriptedTestRunner {
    pub timeline: Timeline,
    pub events: HashMap<Platform, Vec<TestEvent>>,
    pub crash_for: Option<Platform>,
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(&self, context: &RunnerContext, events: mpsc::Sender<TestEvent>) -> Result<()> {
        self.timeline
            .lock()
            .unwrap()
            .push(format!("test:{}", context.platform));
        for event in self.events.get(&context.platform).cloned().unwrap_or_default() {
            events
                .send(event)
                .await
                .map_err(|e| TestError::Execution(e.to_string()))?;
        }
        if self.crash_for == Some(context.platform) {
            return Err(TestError::Execution("runner crashed".to_string()));
        }
        events
            .send(TestEvent::SuiteEnd)
            .await
            .map_err(|e| TestError::Execution(e.to_string()))?;
        Ok(())
    }
}

/// In-memory tracker. Attachments are tracked per execution.
#[derive(Default)]
pub struct FakeTracker {
    pub versions: Vec<ProjectVersion>,
    pub cycles: Vec<CycleEntry>,
    pub issues: HashMap<String, String>,
    pub executions: HashMap<String, String>,
    pub attachments: Mutex<HashMap<String, Vec<String>>>,
    pub executed: Mutex<Vec<(String, i32, String)>>,
    pub calls: Mutex<Vec<String>>,
    /// Rejects execution updates as an unavailable server would.
    pub reject_updates: bool,
}

impl FakeTracker {
    /// Project TIMOB (id 1), release 7.5.0 (id 10) and one cycle per
    /// Mac platform.
    pub fn standard() -> Self {
        Self {
            versions: vec![
                ProjectVersion {
                    id: "9".to_string(),
                    name: "Release 7.4.0".to_string(),
                },
                ProjectVersion {
                    id: "10".to_string(),
                    name: "Release 7.5.0".to_string(),
                },
            ],
            cycles: vec![
                cycle("-1", Some("Ad hoc")),
                cycle("301", Some("Appium Release 7.5.0 Mac-iOS")),
                cycle("302", Some("Appium Release 7.5.0 Mac-Android")),
                cycle("recordsCount", None),
            ],
            ..Default::default()
        }
    }

    pub fn with_ticket(mut self, ticket: &str, issue_id: &str, execution_id: &str) -> Self {
        self.issues.insert(ticket.to_string(), issue_id.to_string());
        self.executions
            .insert(issue_id.to_string(), execution_id.to_string());
        self
    }

    pub fn attachments_of(&self, execution_id: &str) -> Vec<String> {
        self.attachments
            .lock()
            .unwrap()
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn cycle(key: &str, name: Option<&str>) -> CycleEntry {
    CycleEntry {
        key: key.to_string(),
        name: name.map(str::to_string),
    }
}

#[async_trait]
impl TrackerApi for FakeTracker {
    async fn project_id(&self, key: &str) -> Result<Option<String>> {
        self.record(format!("project:{}", key));
        Ok((key == "TIMOB").then(|| "1".to_string()))
    }

    async fn versions(&self, _project_id: &str) -> Result<Vec<ProjectVersion>> {
        Ok(self.versions.clone())
    }

    async fn cycles(&self, _project_id: &str, _version_id: &str) -> Result<Vec<CycleEntry>> {
        Ok(self.cycles.clone())
    }

    async fn search_issues(&self, jql: &str) -> Result<Vec<String>> {
        self.record(format!("search:{}", jql));
        // The ticket is the last token inside the quoted text clause.
        let ticket = jql
            .trim_end_matches('\'')
            .rsplit(' ')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(if self.issues.contains_key(&ticket) {
            vec![format!("ZEPH-{}", ticket)]
        } else {
            Vec::new()
        })
    }

    async fn issue_id(&self, key: &str) -> Result<Option<String>> {
        let ticket = key.trim_start_matches("ZEPH-");
        Ok(self.issues.get(ticket).cloned())
    }

    async fn executions(&self, issue_id: &str, _cycle_id: &str) -> Result<Vec<String>> {
        Ok(self.executions.get(issue_id).cloned().into_iter().collect())
    }

    async fn step_results(&self, _execution_id: &str) -> Result<Vec<String>> {
        Ok(vec!["s1".to_string(), "s2".to_string()])
    }

    async fn execute(&self, execution_id: &str, status: i32, comment: &str) -> Result<()> {
        if self.reject_updates {
            return Err(TestError::Tracker(
                "Tracker request failed: 503 Service Unavailable".to_string(),
            ));
        }
        self.executed
            .lock()
            .unwrap()
            .push((execution_id.to_string(), status, comment.to_string()));
        Ok(())
    }

    async fn attachments(&self, execution_id: &str) -> Result<Vec<String>> {
        Ok(self.attachments_of(execution_id))
    }

    async fn delete_attachment(&self, file_id: &str) -> Result<()> {
        self.record(format!("delete:{}", file_id));
        for files in self.attachments.lock().unwrap().values_mut() {
            files.retain(|f| f != file_id);
        }
        Ok(())
    }

    async fn upload_attachment(&self, execution_id: &str, file: &Path) -> Result<()> {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        self.record(format!("upload:{}", name));
        self.attachments
            .lock()
            .unwrap()
            .entry(execution_id.to_string())
            .or_default()
            .push(name);
        Ok(())
    }
}
