mod common;

use chrono::Local;
use common::{
    FakeBuilder, FakeCommandRunner, FakeConnector, FakeTracker, ScriptedTestRunner, Timeline,
    entries, test_end, timeline,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uisuite_test::config::{HostOs, Platform, SuiteConfig, TargetKind};
use uisuite_test::device::{DeviceLifecycleManager, EmulatorResources};
use uisuite_test::execution::{PipelineStage, TestState, TicketState};
use uisuite_test::reporting::RunDirectory;
use uisuite_test::tracker::TrackerApi;
use uisuite_test::{Collaborators, RunContext, RunCoordinator};

struct Harness {
    root: TempDir,
    timeline: Timeline,
    commands: Arc<FakeCommandRunner>,
    connector: Arc<FakeConnector>,
    builder: Arc<FakeBuilder>,
    runner: Arc<ScriptedTestRunner>,
    tracker: Option<Arc<FakeTracker>>,
    tracker_enabled: bool,
    ios_kind: TargetKind,
}

impl Harness {
    fn new() -> Self {
        let timeline = timeline();
        let mut events = HashMap::new();
        events.insert(
            Platform::Ios,
            vec![
                test_end("TIMOB-1", "opens the editor", TestState::Passed, None),
                test_end(
                    "TIMOB-2",
                    "saves the file",
                    TestState::Failed,
                    Some("element not found"),
                ),
            ],
        );
        events.insert(
            Platform::Android,
            vec![test_end("TIMOB-1", "opens the editor", TestState::Passed, None)],
        );

        Self {
            root: tempfile::tempdir().unwrap(),
            commands: Arc::new(FakeCommandRunner::new()),
            connector: Arc::new(FakeConnector::new(timeline.clone())),
            builder: Arc::new(FakeBuilder {
                timeline: timeline.clone(),
                fail_for: None,
            }),
            runner: Arc::new(ScriptedTestRunner {
                timeline: timeline.clone(),
                events,
                crash_for: None,
            }),
            tracker: None,
            tracker_enabled: false,
            ios_kind: TargetKind::Simulator,
            timeline,
        }
    }

    fn coordinator(&self) -> RunCoordinator {
        let mut config = SuiteConfig::default();
        config.project_root = self.root.path().to_path_buf();
        config.timeouts.simulator_grace_secs = 0;
        config.timeouts.boot_poll_millis = 10;
        config.timeouts.boot_secs = 2;
        config.tracker.enabled = self.tracker_enabled;
        config.devices.ios_kind = self.ios_kind;

        let run_dir = RunDirectory::create(self.root.path(), Local::now()).unwrap();
        let context = RunContext {
            run_dir,
            host_os: HostOs::Mac,
            force_rebuild: false,
        };
        let devices =
            DeviceLifecycleManager::new(self.commands.clone(), HostOs::Mac, &config.timeouts)
                .with_resources(EmulatorResources::from_host(8, 16 << 30));

        let parts = Collaborators {
            commands: self.commands.clone(),
            connector: self.connector.clone(),
            builder: self.builder.clone(),
            runner: self.runner.clone(),
            tracker: self
                .tracker
                .clone()
                .map(|t| t as Arc<dyn TrackerApi>),
        };
        RunCoordinator::new(config, context, parts)
            .unwrap()
            .with_devices(devices)
    }
}

#[tokio::test]
async fn ios_runs_to_completion_before_android() {
    let harness = Harness::new();
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios, Platform::Android]).await;

    assert_eq!(
        entries(&harness.timeline),
        vec![
            "build:iOS",
            "session:iOS",
            "test:iOS",
            "close:iOS-session",
            "quit:iOS-session",
            "build:Android",
            "session:Android",
            "test:Android",
            "close:Android-session",
            "quit:Android-session",
        ]
    );

    assert_eq!(report.platforms.len(), 2);
    let ios = &report.platforms[0];
    assert!(ios.succeeded());
    assert_eq!(ios.counts().pass, 1);
    assert_eq!(ios.counts().fail, 1);
    assert_eq!(ios.outcomes[1].state, TicketState::Fail);
    // A ticket failure is not a pipeline failure.
    assert!(report.has_failures());

    let android = &report.platforms[1];
    assert!(android.succeeded());
    assert_eq!(android.outcomes.len(), 1);

    let reports = harness.root.path().join("Reports");
    assert!(reports.join("Mac-iOS.xml").exists());
    assert!(reports.join("Mac-Android.xml").exists());
    assert_eq!(
        ios.stages.last().map(|t| t.to),
        Some(PipelineStage::Done)
    );
}

#[tokio::test]
async fn desktop_target_drives_the_host_without_a_device() {
    let mut harness = Harness::new();
    harness.ios_kind = TargetKind::Desktop;
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios]).await;

    assert!(report.platforms[0].succeeded());
    assert_eq!(
        entries(&harness.timeline),
        vec!["build:iOS", "session:Mac", "test:iOS", "quit:Mac-session"]
    );

    let capabilities = harness.connector.capabilities.lock().unwrap().clone();
    assert_eq!(capabilities[0]["automationName"], "Mac");
    assert_eq!(capabilities[0]["deviceName"], "Mac");

    // The desktop server runs without the device log and nothing is booted.
    let spawned = harness.commands.spawned.lock().unwrap().clone();
    assert_eq!(spawned.len(), 1);
    assert!(!spawned[0].args.contains(&"--show-ios-log".to_string()));
    assert!(harness
        .commands
        .ran_display()
        .iter()
        .all(|c| !c.contains("simctl") && !c.contains("emulator")));
}

#[tokio::test]
async fn platform_order_ignores_argument_order() {
    let harness = Harness::new();
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Android, Platform::Ios]).await;

    let platforms: Vec<Platform> = report.platforms.iter().map(|r| r.platform).collect();
    assert_eq!(platforms, vec![Platform::Ios, Platform::Android]);
    assert_eq!(entries(&harness.timeline)[0], "build:iOS");
}

#[tokio::test]
async fn build_failure_does_not_stop_next_platform() {
    let mut harness = Harness::new();
    harness.builder = Arc::new(FakeBuilder {
        timeline: harness.timeline.clone(),
        fail_for: Some(Platform::Ios),
    });
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios, Platform::Android]).await;

    let ios = &report.platforms[0];
    assert_eq!(ios.failed_stage, Some(PipelineStage::Building));
    assert!(ios.outcomes.is_empty());
    assert!(ios.junit_report.is_none());
    assert!(ios.error.as_deref().unwrap().contains("Application build failed"));

    assert!(report.platforms[1].succeeded());
    let timeline = entries(&harness.timeline);
    assert_eq!(timeline[0], "build:iOS");
    assert_eq!(timeline[1], "build:Android");
    assert!(!harness.root.path().join("Reports").join("Mac-iOS.xml").exists());
}

#[tokio::test]
async fn session_failure_still_tears_down() {
    let mut harness = Harness::new();
    let mut connector = FakeConnector::new(harness.timeline.clone());
    connector.fail_for = Some("Android".to_string());
    harness.connector = Arc::new(connector);
    let mut coordinator = harness.coordinator();

    let first = coordinator.run(&[Platform::Android]).await;
    assert_eq!(
        first.platforms[0].failed_stage,
        Some(PipelineStage::SessionStarting)
    );

    // A leaked emulator or server would be reused instead of relaunched.
    coordinator.run(&[Platform::Android]).await;
    assert_eq!(harness.commands.spawn_count("emulator"), 2);
    assert_eq!(harness.commands.spawn_count("appium"), 2);
}

#[tokio::test]
async fn runner_crash_keeps_collected_outcomes() {
    let mut harness = Harness::new();
    let runner = ScriptedTestRunner {
        timeline: harness.timeline.clone(),
        events: harness.runner.events.clone(),
        crash_for: Some(Platform::Ios),
    };
    harness.runner = Arc::new(runner);
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios]).await;

    let ios = &report.platforms[0];
    assert_eq!(ios.failed_stage, Some(PipelineStage::Testing));
    assert_eq!(ios.outcomes.len(), 2);
    assert!(ios.junit_report.is_some());
    assert!(entries(&harness.timeline).contains(&"quit:iOS-session".to_string()));
}

#[tokio::test]
async fn results_are_published_when_tracking_is_enabled() {
    let mut harness = Harness::new();
    let tracker = Arc::new(FakeTracker::standard().with_ticket("TIMOB-1", "555", "9001"));
    harness.tracker = Some(tracker.clone());
    harness.tracker_enabled = true;
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios]).await;

    let ios = &report.platforms[0];
    assert!(ios.succeeded());
    // TIMOB-2 has no matching issue and is skipped.
    assert_eq!(ios.published.published, 1);
    assert_eq!(ios.published.skipped, 1);

    let executed = tracker.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].1, -1);
    assert_eq!(executed[1].0, "9001");
    assert_eq!(executed[1].1, 1);
    assert_eq!(
        ios.stages.iter().filter(|t| t.to == PipelineStage::Publishing).count(),
        1
    );
}

#[tokio::test]
async fn missing_cycle_only_disables_publishing() {
    let mut harness = Harness::new();
    let tracker = Arc::new(FakeTracker {
        cycles: Vec::new(),
        ..FakeTracker::standard()
    });
    harness.tracker = Some(tracker.clone());
    harness.tracker_enabled = true;
    let mut coordinator = harness.coordinator();

    let report = coordinator.run(&[Platform::Ios]).await;

    assert!(report.platforms[0].succeeded());
    assert_eq!(report.platforms[0].outcomes.len(), 2);
    assert!(tracker.executed.lock().unwrap().is_empty());
}
