use super::resources::EmulatorResources;
use crate::config::{HostOs, Platform, PlatformTarget, TargetKind, TimeoutSettings};
use crate::process::{CommandRunner, CommandSpec, SpawnedProcess, drain_lines};
use crate::{Result, TestError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    AndroidEmulator,
    Genymotion,
    AndroidDevice,
    IosSimulator,
    IosDevice,
}

impl DeviceClass {
    /// `None` for desktop targets, which run on the host and boot nothing.
    pub fn for_target(target: &PlatformTarget) -> Option<Self> {
        let class = match (target.platform, target.kind) {
            (_, TargetKind::Desktop) => return None,
            (Platform::Ios, TargetKind::Device) => DeviceClass::IosDevice,
            (Platform::Ios, _) => DeviceClass::IosSimulator,
            (Platform::Android, TargetKind::Genymotion) => DeviceClass::Genymotion,
            (Platform::Android, TargetKind::Device) => DeviceClass::AndroidDevice,
            (Platform::Android, _) => DeviceClass::AndroidEmulator,
        };
        Some(class)
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, DeviceClass::AndroidDevice | DeviceClass::IosDevice)
    }
}

#[derive(Debug)]
pub struct DeviceHandle {
    pub class: DeviceClass,
    pub name: String,
    pub boot_duration: Option<Duration>,
    process: Option<SpawnedProcess>,
}

impl DeviceHandle {
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid)
    }
}

/// Boots and tears down devices. Holds at most one handle per class; a
/// launch for a class that already has a handle is skipped.
pub struct DeviceLifecycleManager {
    runner: Arc<dyn CommandRunner>,
    handles: HashMap<DeviceClass, DeviceHandle>,
    host_os: HostOs,
    android_home: Option<PathBuf>,
    resources: Option<EmulatorResources>,
    boot_timeout: Duration,
    poll_interval: Duration,
    simulator_grace: Duration,
}

impl DeviceLifecycleManager {
    pub fn new(runner: Arc<dyn CommandRunner>, host_os: HostOs, timeouts: &TimeoutSettings) -> Self {
        Self {
            runner,
            handles: HashMap::new(),
            host_os,
            android_home: std::env::var_os("ANDROID_HOME").map(PathBuf::from),
            resources: None,
            boot_timeout: timeouts.boot_timeout(),
            poll_interval: timeouts.boot_poll_interval(),
            simulator_grace: Duration::from_secs(timeouts.simulator_grace_secs),
        }
    }

    pub fn with_android_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.android_home = Some(path.into());
        self
    }

    /// Skips host detection.
    pub fn with_resources(mut self, resources: EmulatorResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn is_running(&self, class: DeviceClass) -> bool {
        self.handles.contains_key(&class)
    }

    pub fn handle(&self, class: DeviceClass) -> Option<&DeviceHandle> {
        self.handles.get(&class)
    }

    pub async fn launch(&mut self, device_name: &str, class: DeviceClass) -> Result<&DeviceHandle> {
        if self.handles.contains_key(&class) {
            info!("Device class {:?} already running, skipping launch", class);
            return self
                .handles
                .get(&class)
                .ok_or_else(|| TestError::Launch("device handle vanished".to_string()));
        }

        let started_at = Instant::now();
        let process = match class {
            DeviceClass::AndroidEmulator => Some(self.launch_emulator(device_name).await?),
            DeviceClass::Genymotion => Some(self.launch_genymotion(device_name).await?),
            DeviceClass::IosSimulator => {
                // The automation server boots the simulator when the session opens.
                debug!("Simulator '{}' is booted by the automation server", device_name);
                None
            }
            DeviceClass::AndroidDevice | DeviceClass::IosDevice => {
                info!("Using physical device '{}'", device_name);
                None
            }
        };

        let handle = DeviceHandle {
            class,
            name: device_name.to_string(),
            boot_duration: process.as_ref().map(|_| started_at.elapsed()),
            process,
        };
        Ok(self.handles.entry(class).or_insert(handle))
    }

    async fn launch_emulator(&self, device_name: &str) -> Result<SpawnedProcess> {
        info!("Launching Android device '{}'", device_name);

        let resources = match self.resources {
            Some(resources) => resources,
            None => EmulatorResources::detect(self.runner.as_ref(), self.host_os).await,
        };
        debug!(
            cores = resources.cores,
            memory_mib = resources.memory_mib,
            "Emulator sizing"
        );

        let spec = CommandSpec::new(self.sdk_tool("emulator", "emulator")).args([
            "-avd".to_string(),
            device_name.to_string(),
            "-skin".to_string(),
            "1080x1920".to_string(),
            "-no-snapshot-save".to_string(),
            "-no-snapshot-load".to_string(),
            "-no-boot-anim".to_string(),
            "-memory".to_string(),
            resources.memory_mib.to_string(),
            "-cores".to_string(),
            resources.cores.to_string(),
            "-accel".to_string(),
            "auto".to_string(),
            "-wipe-data".to_string(),
            "-partition-size".to_string(),
            "4096".to_string(),
        ]);

        let mut process = self
            .runner
            .spawn(&spec)
            .await
            .map_err(|e| TestError::Launch(e.to_string()))?;
        if let Some(stdout) = process.take_stdout() {
            drain_lines(stdout, "emulator");
        }
        if let Some(stderr) = process.take_stderr() {
            drain_lines(stderr, "emulator-stderr");
        }

        if let Err(e) = self.wait_for_boot(&mut process).await {
            let _ = process.kill().await;
            return Err(e);
        }

        Ok(process)
    }

    /// Polls the boot animation service until it reports `stopped`. A poll
    /// that hangs counts against the same deadline.
    async fn wait_for_boot(&self, process: &mut SpawnedProcess) -> Result<()> {
        let adb = CommandSpec::new(self.sdk_tool("platform-tools", "adb"))
            .args(["shell", "getprop", "init.svc.bootanim"]);
        let deadline = Instant::now() + self.boot_timeout;

        while Instant::now() < deadline {
            if let Some(code) = process.try_exit_code() {
                return Err(TestError::Launch(format!(
                    "Emulator exited with code {} before boot completed",
                    code
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.runner.output(&adb)).await {
                Err(_) => break,
                Ok(Ok(output)) if output.stdout.trim() == "stopped" => {
                    info!("Android device booted");
                    return Ok(());
                }
                Ok(Ok(output)) => debug!(state = %output.stdout.trim(), "Waiting for boot"),
                Ok(Err(e)) => debug!("Boot status unavailable: {}", e),
            }
            sleep(self.poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        Err(TestError::Timeout(format!(
            "device did not finish booting within {}s",
            self.boot_timeout.as_secs()
        )))
    }

    async fn launch_genymotion(&self, device_name: &str) -> Result<SpawnedProcess> {
        info!("Booting Genymotion emulator '{}'", device_name);
        let player = match self.host_os {
            HostOs::Windows => r"C:\Program Files\Genymobile\Genymotion\player.exe",
            _ => "/Applications/Genymotion.app/Contents/MacOS/player.app/Contents/MacOS/player",
        };
        let spec = CommandSpec::new(player).args(["--vm-name", device_name]);
        let mut process = self
            .runner
            .spawn(&spec)
            .await
            .map_err(|e| TestError::Launch(e.to_string()))?;
        if let Some(stdout) = process.take_stdout() {
            drain_lines(stdout, "genymotion");
        }
        Ok(process)
    }

    fn sdk_tool(&self, dir: &str, tool: &str) -> String {
        match &self.android_home {
            Some(home) => home.join(dir).join(tool).to_string_lossy().to_string(),
            None => tool.to_string(),
        }
    }

    /// Tears down the device of `class`. Failures are logged.
    pub async fn kill(&mut self, class: DeviceClass) {
        let Some(mut handle) = self.handles.remove(&class) else {
            return;
        };

        match class {
            DeviceClass::IosSimulator => self.shutdown_simulator().await,
            _ => {
                if let Some(process) = handle.process.as_mut() {
                    info!("Killing {:?} '{}'", class, handle.name);
                    if let Err(e) = process.kill().await {
                        warn!("{}", e);
                    }
                }
            }
        }
    }

    /// `simctl shutdown` can leave the Simulator app behind, so it is
    /// force-quit after a grace period.
    async fn shutdown_simulator(&self) {
        info!("Shutting down the iOS simulator");
        let shutdown = CommandSpec::new("xcrun").args(["simctl", "shutdown", "booted"]);
        if let Err(e) = self.runner.output(&shutdown).await {
            warn!("Simulator shutdown failed: {}", e);
        }

        sleep(self.simulator_grace).await;

        let killall = CommandSpec::new("killall").arg("Simulator");
        if let Err(e) = self.runner.output(&killall).await {
            debug!("killall Simulator: {}", e);
        }
    }

    /// Best-effort teardown of everything recorded, used on interrupt.
    pub async fn quick_kill(&mut self) {
        if self.host_os == HostOs::Mac && !self.handles.contains_key(&DeviceClass::IosSimulator) {
            let shutdown = CommandSpec::new("xcrun").args(["simctl", "shutdown", "booted"]);
            let _ = self.runner.output(&shutdown).await;
        }

        let classes: Vec<DeviceClass> = self.handles.keys().copied().collect();
        for class in classes {
            self.kill(class).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceDescriptor;

    fn target(platform: Platform, kind: TargetKind) -> PlatformTarget {
        PlatformTarget {
            platform,
            kind,
            host_os: HostOs::Mac,
            device: DeviceDescriptor {
                name: "dev".to_string(),
                os_version: "1".to_string(),
                app_package: None,
                app_activity: None,
                udid: None,
            },
        }
    }

    #[test]
    fn test_device_class_mapping() {
        assert_eq!(
            DeviceClass::for_target(&target(Platform::Ios, TargetKind::Simulator)),
            Some(DeviceClass::IosSimulator)
        );
        assert_eq!(
            DeviceClass::for_target(&target(Platform::Ios, TargetKind::Device)),
            Some(DeviceClass::IosDevice)
        );
        assert_eq!(
            DeviceClass::for_target(&target(Platform::Android, TargetKind::Genymotion)),
            Some(DeviceClass::Genymotion)
        );
        assert_eq!(
            DeviceClass::for_target(&target(Platform::Android, TargetKind::Emulator)),
            Some(DeviceClass::AndroidEmulator)
        );
        assert_eq!(
            DeviceClass::for_target(&target(Platform::Ios, TargetKind::Desktop)),
            None
        );
        assert!(DeviceClass::AndroidDevice.is_physical());
    }
}
