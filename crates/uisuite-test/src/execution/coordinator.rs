use super::aggregator::{OutcomeCounts, ResultAggregator, TicketOutcome};
use super::events::TestEvent;
use super::pipeline::{Pipeline, PipelineStage, StageTransition};
use super::runner::{CommandTestRunner, RunnerContext, TestRunner};
use crate::automation::{AutomationServerManager, ServerConfig, ServerKind};
use crate::build::{BuildDriver, CommandBuildDriver};
use crate::config::{HostOs, Platform, PlatformTarget, SUPPORTED_PLATFORMS, SuiteConfig};
use crate::device::{DeviceClass, DeviceLifecycleManager};
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::reporting::{JunitReporter, RunDirectory};
use crate::session::{DriverConnector, HttpDriverConnector, Session, SessionController};
use crate::tracker::{CycleRef, PublishSummary, TrackerApi, TrackerPublisher, ZephyrClient};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// State shared by every platform of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_dir: RunDirectory,
    pub host_os: HostOs,
    pub force_rebuild: bool,
}

/// The external seams the coordinator drives.
pub struct Collaborators {
    pub commands: Arc<dyn CommandRunner>,
    pub connector: Arc<dyn DriverConnector>,
    pub builder: Arc<dyn BuildDriver>,
    pub runner: Arc<dyn TestRunner>,
    pub tracker: Option<Arc<dyn TrackerApi>>,
}

impl Collaborators {
    /// Real processes, HTTP WebDriver and, when publishing is on, Zephyr.
    pub fn system(config: &SuiteConfig) -> Result<Self> {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let http_timeout = Duration::from_secs(config.timeouts.http_secs);

        let tracker: Option<Arc<dyn TrackerApi>> = if config.tracker.enabled {
            Some(Arc::new(ZephyrClient::new(&config.tracker, http_timeout)?))
        } else {
            None
        };

        Ok(Self {
            connector: Arc::new(HttpDriverConnector::new(http_timeout)?),
            builder: Arc::new(CommandBuildDriver::new(
                commands.clone(),
                config.build.clone(),
                config.app.clone(),
                &config.project_root,
            )),
            runner: Arc::new(CommandTestRunner::new(commands.clone(), config.runner.clone())),
            tracker,
            commands,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformReport {
    pub platform: Platform,
    pub outcomes: Vec<TicketOutcome>,
    /// The stage that failed, if any.
    pub failed_stage: Option<PipelineStage>,
    pub error: Option<String>,
    pub junit_report: Option<PathBuf>,
    pub published: PublishSummary,
    pub stages: Vec<StageTransition>,
}

impl PlatformReport {
    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }

    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(&self.outcomes)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub platforms: Vec<PlatformReport>,
}

impl RunReport {
    pub fn outcomes(&self) -> impl Iterator<Item = (Platform, &TicketOutcome)> {
        self.platforms
            .iter()
            .flat_map(|r| r.outcomes.iter().map(move |o| (r.platform, o)))
    }

    /// True when a pipeline broke or any ticket failed.
    pub fn has_failures(&self) -> bool {
        self.platforms
            .iter()
            .any(|r| !r.succeeded() || r.counts().fail > 0)
    }
}

/// What one platform run holds while it is live. Teardown reads it.
#[derive(Default)]
struct PlatformEnv {
    device: Option<DeviceClass>,
    server: Option<ServerKind>,
    session: Option<Session>,
    tested: bool,
    outcomes: Vec<TicketOutcome>,
    published: PublishSummary,
}

/// Runs each requested platform through build, device boot, server start,
/// session start, tests, publishing and teardown. Platforms run one after
/// another and a failing platform never stops the next one.
pub struct RunCoordinator {
    config: SuiteConfig,
    context: RunContext,
    servers: AutomationServerManager,
    devices: DeviceLifecycleManager,
    sessions: SessionController,
    builder: Arc<dyn BuildDriver>,
    runner: Arc<dyn TestRunner>,
    publisher: TrackerPublisher,
    reporter: JunitReporter,
}

impl RunCoordinator {
    pub fn new(config: SuiteConfig, context: RunContext, parts: Collaborators) -> Result<Self> {
        let mut devices =
            DeviceLifecycleManager::new(parts.commands.clone(), context.host_os, &config.timeouts);
        if let Ok(home) = std::env::var("ANDROID_HOME") {
            devices = devices.with_android_home(home);
        }

        let publisher = match parts.tracker {
            Some(api) => TrackerPublisher::new(api, config.tracker.clone(), &config.project_root),
            None => TrackerPublisher::disabled(),
        };

        Ok(Self {
            servers: AutomationServerManager::new(parts.commands.clone()),
            sessions: SessionController::new(
                parts.connector,
                parts.commands,
                config.signing.clone(),
            ),
            devices,
            builder: parts.builder,
            runner: parts.runner,
            publisher,
            reporter: JunitReporter::new()?,
            config,
            context,
        })
    }

    /// Replaces the device manager, e.g. to pin emulator sizing.
    pub fn with_devices(mut self, devices: DeviceLifecycleManager) -> Self {
        self.devices = devices;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub async fn run(&mut self, platforms: &[Platform]) -> RunReport {
        let mut report = RunReport::default();
        for platform in SUPPORTED_PLATFORMS
            .iter()
            .copied()
            .filter(|p| platforms.contains(p))
        {
            report.platforms.push(self.run_platform(platform).await);
        }
        report
    }

    pub async fn run_platform(&mut self, platform: Platform) -> PlatformReport {
        let mut target = self.config.target(platform);
        target.host_os = self.context.host_os;
        info!("Running For Platform '{}'", platform);
        debug!(platform = %platform, device = %target.device.name, "Target device");

        let cycle = match self
            .publisher
            .resolve_cycle_for(platform, self.context.host_os)
            .await
        {
            Ok(cycle) => cycle,
            Err(e) => {
                error!("{}", e);
                warn!("Results for {} will not be published", platform);
                None
            }
        };

        let mut pipeline = Pipeline::new(platform);
        let mut env = PlatformEnv::default();

        let error = match self
            .run_stages(&target, &mut pipeline, &mut env, cycle.as_ref())
            .await
        {
            Ok(()) => None,
            Err(e) => {
                error!("{} run failed during {}: {}", platform, pipeline.stage(), e);
                pipeline.fail();
                Some(e.to_string())
            }
        };

        pipeline.begin_teardown();
        self.teardown(&mut env).await;
        pipeline.finish();

        let junit_report = if env.tested {
            match self
                .reporter
                .write(
                    &self.context.run_dir.reports,
                    self.context.host_os,
                    platform,
                    &env.outcomes,
                    self.context.run_dir.timestamp,
                )
                .await
            {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("{}", e);
                    None
                }
            }
        } else {
            None
        };

        let counts = OutcomeCounts::tally(&env.outcomes);
        info!(
            "{}: {} passed, {} failed, {} skipped, {} not for platform",
            platform, counts.pass, counts.fail, counts.skip, counts.not_for_platform
        );

        PlatformReport {
            platform,
            outcomes: env.outcomes,
            failed_stage: pipeline.failed_at(),
            error,
            junit_report,
            published: env.published,
            stages: pipeline.history().to_vec(),
        }
    }

    async fn run_stages(
        &mut self,
        target: &PlatformTarget,
        pipeline: &mut Pipeline,
        env: &mut PlatformEnv,
        cycle: Option<&CycleRef>,
    ) -> Result<()> {
        pipeline.advance(PipelineStage::Building)?;
        let artifact = self
            .builder
            .build(target, self.context.force_rebuild)
            .await?;

        pipeline.advance(PipelineStage::DeviceBooting)?;
        if let Some(class) = DeviceClass::for_target(target) {
            self.devices.launch(&target.device.name, class).await?;
            env.device = Some(class);
        }

        pipeline.advance(PipelineStage::ServerStarting)?;
        let kind = ServerKind::for_target(target);
        let server_config = ServerConfig::from_settings(
            kind,
            &self.config.server,
            &self.config.project_root,
            self.context.host_os,
        );
        let server_url = self.servers.start(&server_config).await?.url();
        env.server = Some(kind);

        pipeline.advance(PipelineStage::SessionStarting)?;
        let capabilities = self
            .sessions
            .capabilities_for(target, &artifact.app_path)
            .await?;
        let session = self
            .sessions
            .start_session(&server_url, target.platform, capabilities)
            .await?;

        let context = RunnerContext {
            project_root: self.config.project_root.clone(),
            platform: target.platform,
            host_os: self.context.host_os,
            session_id: session.id().to_string(),
            server_url,
            app_path: artifact.app_path.clone(),
            run_dir: self.context.run_dir.root.clone(),
        };
        env.session = Some(session);

        pipeline.advance(PipelineStage::Testing)?;
        env.tested = true;
        let tests = self.execute_tests(&context, &mut env.outcomes).await;
        if let Some(session) = &env.session {
            for entry in self.sessions.device_log(session).await {
                debug!(source = "device", "{}", entry.message);
            }
        }
        tests?;

        if let Some(cycle) = cycle {
            pipeline.advance(PipelineStage::Publishing)?;
            env.published = self
                .publisher
                .publish_all(
                    &env.outcomes,
                    cycle,
                    target.platform,
                    &self.context.run_dir.screenshots,
                )
                .await;
            info!(
                "Published {} ticket(s), skipped {}",
                env.published.published, env.published.skipped
            );
        }

        Ok(())
    }

    /// Folds events while the runner is still going. Outcomes collected
    /// before a runner failure are kept.
    async fn execute_tests(
        &self,
        context: &RunnerContext,
        outcomes: &mut Vec<TicketOutcome>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(64);
        let mut aggregator = ResultAggregator::new();

        let run = self.runner.run(context, tx);
        let fold = async {
            while let Some(event) = rx.recv().await {
                match event {
                    TestEvent::TestEnd(result) => aggregator.fold(&result),
                    TestEvent::SuiteEnd => debug!("Suite finished"),
                }
            }
        };
        let (result, ()) = tokio::join!(run, fold);

        *outcomes = aggregator.finalize();
        result
    }

    /// Runs on success and failure alike: session, then device, then server.
    async fn teardown(&mut self, env: &mut PlatformEnv) {
        match (env.session.take(), env.device.take()) {
            (Some(session), Some(class)) => {
                self.sessions
                    .stop_session(session, &mut self.devices, class)
                    .await;
            }
            (None, Some(class)) => self.devices.kill(class).await,
            (Some(session), None) => {
                if let Err(e) = session.connection().quit().await {
                    warn!("Failed to quit session: {}", e);
                }
            }
            (None, None) => {}
        }

        if let Some(kind) = env.server.take() {
            self.servers.stop(kind).await;
        }
    }

    /// Best-effort cleanup on interrupt.
    pub async fn quick_kill(&mut self) {
        warn!("Interrupted, tearing down devices and servers");
        self.devices.quick_kill().await;
        self.servers.stop_all().await;
    }
}
