use crate::{Result, TestError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Mobile platforms in scheduling order. Runs always follow this order,
/// whatever order the user listed them in.
pub const SUPPORTED_PLATFORMS: [Platform; 2] = [Platform::Ios, Platform::Android];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "iOS")]
    Ios,
    Android,
}

impl Platform {
    /// Lowercase form used by the build tool (`--platform ios`).
    pub fn build_name(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "iOS"),
            Platform::Android => write!(f, "Android"),
        }
    }
}

impl FromStr for Platform {
    type Err = TestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(TestError::Config(format!(
                "'{}' is not a valid platform",
                other
            ))),
        }
    }
}

/// Parses a comma separated platform list and returns it in scheduling order,
/// deduplicated.
pub fn parse_platforms(list: &str) -> Result<Vec<Platform>> {
    let mut requested = Vec::new();
    for item in list.split(',').filter(|s| !s.trim().is_empty()) {
        requested.push(item.parse::<Platform>()?);
    }

    if requested.is_empty() {
        return Err(TestError::Config("No platforms requested".to_string()));
    }

    Ok(SUPPORTED_PLATFORMS
        .iter()
        .copied()
        .filter(|p| requested.contains(p))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOs {
    Mac,
    Windows,
    Linux,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => HostOs::Mac,
            "windows" => HostOs::Windows,
            _ => HostOs::Linux,
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::Mac => write!(f, "Mac"),
            HostOs::Windows => write!(f, "Windows"),
            HostOs::Linux => write!(f, "Linux"),
        }
    }
}

/// Which kind of device a platform run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Simulator,
    Emulator,
    Genymotion,
    Device,
    /// The app runs on the host itself under the desktop driver.
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub os_version: String,
    #[serde(default)]
    pub app_package: Option<String>,
    #[serde(default)]
    pub app_activity: Option<String>,
    #[serde(default)]
    pub udid: Option<String>,
}

impl DeviceDescriptor {
    fn new(name: &str, os_version: &str) -> Self {
        Self {
            name: name.to_string(),
            os_version: os_version.to_string(),
            app_package: None,
            app_activity: None,
            udid: None,
        }
    }
}

/// Immutable description of one platform run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformTarget {
    pub platform: Platform,
    pub kind: TargetKind,
    pub host_os: HostOs,
    pub device: DeviceDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub package_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "AppiumTest".to_string(),
            package_name: "com.appium.appiumtest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub ios: DeviceDescriptor,
    pub ios_device: DeviceDescriptor,
    pub android: DeviceDescriptor,
    pub genymotion: DeviceDescriptor,
    pub android_device: DeviceDescriptor,
    pub desktop: DeviceDescriptor,
    pub ios_kind: TargetKind,
    pub android_kind: TargetKind,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut android = DeviceDescriptor::new("android-23-x86", "6.0");
        android.app_package = Some("com.appium.appiumtest".to_string());
        android.app_activity = Some(".AppiumtestActivity".to_string());

        let mut genymotion = android.clone();
        genymotion.name = "Google Nexus 5X".to_string();

        let mut android_device = android.clone();
        android_device.name = "Android Device".to_string();

        Self {
            ios: DeviceDescriptor::new("iPhone 7", "11.4"),
            ios_device: DeviceDescriptor::new("iPhone", "11.4"),
            android,
            genymotion,
            android_device,
            desktop: DeviceDescriptor::new("Mac", "10.14"),
            ios_kind: TargetKind::Simulator,
            android_kind: TargetKind::Emulator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub readiness_timeout_secs: u64,
    /// Path prefix of the WebDriver endpoints, `/wd/hub` for Appium 1.
    pub base_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4723,
            readiness_timeout_secs: 60,
            base_path: "/wd/hub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub program: String,
    /// `{platform}` and `{root}` are substituted per run.
    pub args: Vec<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            program: "appc".to_string(),
            args: [
                "run",
                "--build-only",
                "--platform",
                "{platform}",
                "-d",
                "{root}",
                "-f",
                "--no-prompt",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub program: String,
    /// The reporter flag and the discovered suite files follow these.
    pub args: Vec<String>,
    /// Value for `--reporter`. [`BUNDLED_REPORTER`] uses the NDJSON reporter
    /// shipped with this crate; `None` leaves the flag off.
    pub reporter: Option<String>,
    /// Relative to the project root.
    pub test_glob: String,
}

pub const BUNDLED_REPORTER: &str = "bundled";

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["mocha".to_string()],
            reporter: Some(BUNDLED_REPORTER.to_string()),
            test_glob: "Tests/**/*.test.js".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub enabled: bool,
    pub base_url: String,
    pub project_key: String,
    pub sdk_version: String,
    pub module_name: String,
    #[serde(skip_serializing)]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://jira.appcelerator.org".to_string(),
            project_key: "TIMOB".to_string(),
            sdk_version: "7.5.0.GA".to_string(),
            module_name: "AppceleratorStudio".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    pub identity_pattern: String,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            identity_pattern: r"^(iPhone Developer|Apple Development): ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub boot_secs: u64,
    pub boot_poll_millis: u64,
    pub simulator_grace_secs: u64,
    pub http_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            boot_secs: 300,
            boot_poll_millis: 1000,
            simulator_grace_secs: 5,
            http_secs: 120,
        }
    }
}

impl TimeoutSettings {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_secs)
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_millis)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub project_root: PathBuf,
    pub app: AppConfig,
    pub devices: DeviceConfig,
    pub server: ServerSettings,
    pub build: BuildSettings,
    pub runner: RunnerSettings,
    pub tracker: TrackerSettings,
    pub signing: SigningSettings,
    pub timeouts: TimeoutSettings,
    pub force_rebuild: bool,
}

impl SuiteConfig {
    /// Defaults, overlaid with an optional JSON file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    TestError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                serde_json::from_str::<SuiteConfig>(&text).map_err(|e| {
                    TestError::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => SuiteConfig::default(),
        };

        if config.project_root.as_os_str().is_empty() {
            config.project_root = std::env::current_dir()?;
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(user) = std::env::var("JIRAUSER") {
            self.tracker.username = Some(user);
        }
        if let Ok(pass) = std::env::var("JIRAPASS") {
            self.tracker.password = Some(pass);
        }
    }

    pub fn target(&self, platform: Platform) -> PlatformTarget {
        let (kind, device) = match platform {
            Platform::Ios => {
                let kind = self.devices.ios_kind;
                let device = match kind {
                    TargetKind::Device => &self.devices.ios_device,
                    TargetKind::Desktop => &self.devices.desktop,
                    _ => &self.devices.ios,
                };
                (kind, device)
            }
            Platform::Android => {
                let kind = self.devices.android_kind;
                let device = match kind {
                    TargetKind::Genymotion => &self.devices.genymotion,
                    TargetKind::Device => &self.devices.android_device,
                    TargetKind::Desktop => &self.devices.desktop,
                    _ => &self.devices.android,
                };
                (kind, device)
            }
        };

        PlatformTarget {
            platform,
            kind,
            host_os: HostOs::current(),
            device: device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platforms_follow_supported_order() {
        let platforms = parse_platforms("Android,iOS").unwrap();
        assert_eq!(platforms, vec![Platform::Ios, Platform::Android]);
    }

    #[test]
    fn test_duplicate_platforms_collapse() {
        let platforms = parse_platforms("android,Android").unwrap();
        assert_eq!(platforms, vec![Platform::Android]);
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let err = parse_platforms("iOS,Windows Phone").unwrap_err();
        assert!(err.to_string().contains("not a valid platform"));
    }

    #[test]
    fn test_default_android_target() {
        let config = SuiteConfig::default();
        let target = config.target(Platform::Android);
        assert_eq!(target.kind, TargetKind::Emulator);
        assert_eq!(target.device.name, "android-23-x86");
        assert_eq!(
            target.device.app_activity.as_deref(),
            Some(".AppiumtestActivity")
        );
    }

    #[test]
    fn test_desktop_target_uses_host_descriptor() {
        let config: SuiteConfig =
            serde_json::from_str(r#"{"devices": {"ios_kind": "desktop"}}"#).unwrap();
        let target = config.target(Platform::Ios);
        assert_eq!(target.kind, TargetKind::Desktop);
        assert_eq!(target.device.name, "Mac");
        assert_eq!(target.device.os_version, "10.14");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SuiteConfig =
            serde_json::from_str(r#"{"server": {"port": 4800}}"#).unwrap();
        assert_eq!(config.server.port, 4800);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.devices.ios.name, "iPhone 7");
    }
}
