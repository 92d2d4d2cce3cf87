use crate::{Result, TestError};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

pub type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// A long-running child process. Fakes build one with `from_parts` and no
/// underlying child.
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub stdout: Option<LineSource>,
    pub stderr: Option<LineSource>,
    child: Option<Child>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .field("child", &self.child.is_some())
            .finish()
    }
}

impl SpawnedProcess {
    pub fn from_parts(pid: Option<u32>, stdout: Option<LineSource>) -> Self {
        Self {
            pid,
            stdout,
            stderr: None,
            child: None,
        }
    }

    pub fn take_stdout(&mut self) -> Option<LineSource> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<LineSource> {
        self.stderr.take()
    }

    pub async fn kill(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            child
                .kill()
                .await
                .map_err(|e| TestError::Stop(format!("Failed to kill pid {:?}: {}", self.pid, e)))?;
        }
        Ok(())
    }

    /// `Some(code)` once the child has exited. Always `None` without a child.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    pub async fn wait(&mut self) -> Result<Option<i32>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.wait().await?.code()),
            None => Ok(None),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Starts a child with piped stdout/stderr and returns immediately.
    async fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess>;

    /// Runs a command to completion.
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        debug!(command = %spec.display(), "Spawning process");
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TestError::Execution(format!("Failed to spawn '{}': {}", spec.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .map(|out| Box::new(BufReader::new(out)) as LineSource);
        let stderr = child
            .stderr
            .take()
            .map(|err| Box::new(BufReader::new(err)) as LineSource);

        Ok(SpawnedProcess {
            pid: child.id(),
            stdout,
            stderr,
            child: Some(child),
        })
    }

    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), "Running command");
        let output = spec.to_command().output().await.map_err(|e| {
            TestError::Execution(format!("Failed to run '{}': {}", spec.program, e))
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Reads lines until one matches `pattern`. `Ok(None)` means the stream
/// closed first.
pub async fn wait_for_match(
    source: &mut LineSource,
    pattern: &Regex,
    limit: Duration,
) -> Result<Option<String>> {
    let scan = async {
        let mut buf = Vec::new();
        loop {
            let Some(line) = next_line_lossy(source, &mut buf).await? else {
                return Ok::<_, TestError>(None);
            };
            let trimmed = line.trim();
            debug!(line = %trimmed, "process output");
            if pattern.is_match(trimmed) {
                return Ok(Some(trimmed.to_string()));
            }
        }
    };

    tokio::time::timeout(limit, scan)
        .await
        .map_err(|_| TestError::Timeout(format!("no line matching '{}'", pattern.as_str())))?
}

/// Reads one line, replacing invalid UTF-8. `None` at end of stream.
pub async fn next_line_lossy<R>(source: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    buf.clear();
    if source.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Keeps a pipe drained so the child never blocks on a full buffer.
pub fn drain_lines(mut source: LineSource, label: &'static str) {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        while let Ok(Some(line)) = next_line_lossy(&mut source, &mut buf).await {
            debug!(source = label, "{}", line);
        }
    });
}
