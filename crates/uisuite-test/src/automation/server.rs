use crate::config::{HostOs, PlatformTarget, ServerSettings, TargetKind};
use crate::process::{CommandRunner, CommandSpec, SpawnedProcess, drain_lines, wait_for_match};
use crate::{Result, TestError};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Only servers on this machine may be started.
pub const ALLOWED_HOSTS: [&str; 3] = ["localhost", "0.0.0.0", "127.0.0.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    Mobile,
    Desktop,
}

impl ServerKind {
    pub fn for_target(target: &PlatformTarget) -> Self {
        match target.kind {
            TargetKind::Desktop => ServerKind::Desktop,
            _ => ServerKind::Mobile,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub kind: ServerKind,
    pub host: String,
    pub port: u16,
    pub executable: String,
    pub base_path: String,
    pub readiness_timeout: Duration,
}

impl ServerConfig {
    pub fn from_settings(
        kind: ServerKind,
        settings: &ServerSettings,
        project_root: &Path,
        host_os: HostOs,
    ) -> Self {
        let exe = match host_os {
            HostOs::Windows => "appium.cmd",
            _ => "appium",
        };
        let local = project_root.join("node_modules").join(".bin").join(exe);
        let executable = if local.exists() {
            local.to_string_lossy().to_string()
        } else {
            exe.to_string()
        };

        Self {
            kind,
            host: settings.host.clone(),
            port: settings.port,
            executable,
            base_path: settings.base_path.clone(),
            readiness_timeout: Duration::from_secs(settings.readiness_timeout_secs),
        }
    }

    pub fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.executable).args([
            "--log-no-colors".to_string(),
            "-a".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
        ]);
        match self.kind {
            ServerKind::Mobile => spec.arg("--show-ios-log"),
            ServerKind::Desktop => spec,
        }
    }

    /// The server announces itself with a line ending in `started on host:port`.
    pub fn readiness_pattern(&self) -> Result<Regex> {
        let pattern = format!(
            r"started on {}:{}$",
            regex::escape(&self.host),
            self.port
        );
        Regex::new(&pattern)
            .map_err(|e| TestError::Startup(format!("Invalid readiness pattern: {}", e)))
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub kind: ServerKind,
    pub host: String,
    pub port: u16,
    pub base_path: String,
    process: SpawnedProcess,
}

impl ServerHandle {
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.base_path)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid
    }
}

pub fn validate_host(host: &str) -> Result<()> {
    if ALLOWED_HOSTS.contains(&host) {
        Ok(())
    } else {
        Err(TestError::UnsupportedHost(host.to_string()))
    }
}

/// Starts and stops automation servers, at most one per `ServerKind`.
pub struct AutomationServerManager {
    runner: Arc<dyn CommandRunner>,
    handles: HashMap<ServerKind, ServerHandle>,
}

impl AutomationServerManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            handles: HashMap::new(),
        }
    }

    pub fn handle(&self, kind: ServerKind) -> Option<&ServerHandle> {
        self.handles.get(&kind)
    }

    pub async fn start(&mut self, config: &ServerConfig) -> Result<&ServerHandle> {
        validate_host(&config.host)?;

        if self.handles.contains_key(&config.kind) {
            debug!(kind = ?config.kind, "Automation server already running");
            return self
                .handles
                .get(&config.kind)
                .ok_or_else(|| TestError::Startup("server handle vanished".to_string()));
        }

        info!(
            "Starting automation server on '{}:{}'",
            config.host, config.port
        );
        let pattern = config.readiness_pattern()?;
        let mut process = self
            .runner
            .spawn(&config.command())
            .await
            .map_err(|e| TestError::Startup(e.to_string()))?;

        if let Some(stderr) = process.take_stderr() {
            drain_lines(stderr, "automation-server-stderr");
        }

        let mut stdout = process.take_stdout().ok_or_else(|| {
            TestError::Startup("Automation server stdout was not captured".to_string())
        })?;

        let ready = wait_for_match(&mut stdout, &pattern, config.readiness_timeout).await;
        match ready {
            Ok(Some(line)) => {
                debug!(line = %line, "Automation server ready");
                drain_lines(stdout, "automation-server");
            }
            Ok(None) => {
                let _ = process.kill().await;
                return Err(TestError::Startup(format!(
                    "Automation server exited before reporting ready on {}:{}",
                    config.host, config.port
                )));
            }
            Err(e) => {
                let _ = process.kill().await;
                return Err(TestError::Startup(e.to_string()));
            }
        }

        let handle = ServerHandle {
            kind: config.kind,
            host: config.host.clone(),
            port: config.port,
            base_path: config.base_path.clone(),
            process,
        };
        Ok(self.handles.entry(config.kind).or_insert(handle))
    }

    /// Errors are logged, never returned. An absent handle is a no-op.
    pub async fn stop(&mut self, kind: ServerKind) {
        let Some(mut handle) = self.handles.remove(&kind) else {
            debug!(kind = ?kind, "No automation server to stop");
            return;
        };

        info!(kind = ?kind, "Stopping automation server");
        if let Err(e) = handle.process.kill().await {
            warn!(kind = ?kind, "{}", e);
        }
    }

    pub async fn stop_all(&mut self) {
        let kinds: Vec<ServerKind> = self.handles.keys().copied().collect();
        for kind in kinds {
            self.stop(kind).await;
        }
    }
}
