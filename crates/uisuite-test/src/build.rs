use crate::config::{AppConfig, BuildSettings, HostOs, Platform, PlatformTarget};
use crate::process::{CommandRunner, CommandSpec};
use crate::{Result, TestError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BUILD_SUCCESS_MARKER: &str = "Project built successfully";
const BUILD_ERROR_MARKER: &str = "[ERROR]";

#[derive(Debug, Clone, PartialEq)]
pub struct BuildArtifact {
    pub platform: Platform,
    pub app_path: PathBuf,
    pub log_path: PathBuf,
    /// True when an earlier successful build was reused.
    pub reused: bool,
}

#[async_trait]
pub trait BuildDriver: Send + Sync {
    async fn build(&self, target: &PlatformTarget, force: bool) -> Result<BuildArtifact>;
}

/// Builds the app under test with an external build tool. The tool can exit
/// 0 on failure, so its log decides.
pub struct CommandBuildDriver {
    runner: Arc<dyn CommandRunner>,
    settings: BuildSettings,
    app: AppConfig,
    project_root: PathBuf,
}

impl CommandBuildDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: BuildSettings,
        app: AppConfig,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            settings,
            app,
            project_root: project_root.into(),
        }
    }

    /// `Build/<hostOS>-<platform>/App/<name>` under the project root.
    pub fn build_root(&self, platform: Platform, host_os: HostOs) -> PathBuf {
        self.project_root
            .join("Build")
            .join(format!("{}-{}", host_os, platform))
            .join("App")
            .join(&self.app.name)
    }

    pub fn artifact_path(&self, platform: Platform, host_os: HostOs) -> PathBuf {
        let root = self.build_root(platform, host_os);
        match platform {
            Platform::Ios => root
                .join("build")
                .join("iphone")
                .join("build")
                .join("Products")
                .join("Debug-iphonesimulator")
                .join(format!("{}.app", self.app.name)),
            Platform::Android => root
                .join("build")
                .join("android")
                .join("bin")
                .join(format!("{}.apk", self.app.name)),
        }
    }

    fn command(&self, platform: Platform, root: &Path) -> CommandSpec {
        let root = root.to_string_lossy();
        let args = self.settings.args.iter().map(|arg| {
            arg.replace("{platform}", platform.build_name())
                .replace("{root}", &root)
        });
        CommandSpec::new(&self.settings.program)
            .args(args)
            .current_dir(&self.project_root)
    }
}

#[async_trait]
impl BuildDriver for CommandBuildDriver {
    async fn build(&self, target: &PlatformTarget, force: bool) -> Result<BuildArtifact> {
        let root = self.build_root(target.platform, target.host_os);
        let app_path = self.artifact_path(target.platform, target.host_os);
        let log_path = root.join("build.log");

        if !force && already_built(&app_path, &log_path).await {
            info!("Using existing {} build at {}", target.platform, app_path.display());
            return Ok(BuildArtifact {
                platform: target.platform,
                app_path,
                log_path,
                reused: true,
            });
        }

        info!("Building application for {}", target.platform);
        tokio::fs::create_dir_all(&root).await?;

        let spec = self.command(target.platform, &root);
        let output = self
            .runner
            .output(&spec)
            .await
            .map_err(|e| TestError::Build(e.to_string()))?;

        let log = format!("{}{}", output.stdout, output.stderr);
        tokio::fs::write(&log_path, &log).await?;
        debug!(log = %log_path.display(), "Build log written");

        check_build_log(output.status, &log)?;

        if !tokio::fs::try_exists(&app_path).await.unwrap_or(false) {
            return Err(TestError::Build(format!(
                "Build reported success but {} is missing",
                app_path.display()
            )));
        }

        Ok(BuildArtifact {
            platform: target.platform,
            app_path,
            log_path,
            reused: false,
        })
    }
}

/// Non-zero exit or any `[ERROR]` line is a failure.
pub fn check_build_log(status: Option<i32>, log: &str) -> Result<()> {
    if let Some(line) = log.lines().find(|l| l.contains(BUILD_ERROR_MARKER)) {
        return Err(TestError::Build(line.trim().to_string()));
    }
    match status {
        Some(0) => Ok(()),
        Some(code) => Err(TestError::Build(format!("build tool exited with code {}", code))),
        None => Err(TestError::Build("build tool was terminated".to_string())),
    }
}

/// A reusable build has its artifact and a log whose last line reports success.
async fn already_built(app_path: &Path, log_path: &Path) -> bool {
    if !tokio::fs::try_exists(app_path).await.unwrap_or(false) {
        return false;
    }
    match tokio::fs::read_to_string(log_path).await {
        Ok(log) => log
            .trim()
            .lines()
            .last()
            .is_some_and(|line| line.contains(BUILD_SUCCESS_MARKER)),
        Err(_) => false,
    }
}
