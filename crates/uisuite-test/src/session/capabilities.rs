use super::signing::SigningIdentity;
use crate::config::{Platform, PlatformTarget, TargetKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

/// Seconds of inactivity after which the automation server ends a session.
/// Configured on every session, never enforced locally.
pub const NEW_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Seconds an Android session waits for the device to become ready.
pub const ANDROID_DEVICE_READY_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct IosProfile {
    pub app: PathBuf,
    pub platform_version: String,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IosDeviceProfile {
    pub app: PathBuf,
    pub platform_version: String,
    pub device_name: String,
    pub udid: Option<String>,
    /// Filled in by the session controller before the session opens.
    pub signing: Option<SigningIdentity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndroidProfile {
    pub app: PathBuf,
    pub platform_version: String,
    pub device_name: String,
    pub app_package: Option<String>,
    pub app_activity: Option<String>,
    pub udid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopProfile {
    pub app: PathBuf,
    pub platform_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityProfile {
    Ios(IosProfile),
    IosDevice(IosDeviceProfile),
    Android(AndroidProfile),
    Desktop(DesktopProfile),
}

impl CapabilityProfile {
    pub fn for_target(target: &PlatformTarget, app: &Path) -> Self {
        let device = &target.device;
        match (target.platform, target.kind) {
            (_, TargetKind::Desktop) => CapabilityProfile::Desktop(DesktopProfile {
                app: app.to_path_buf(),
                platform_version: device.os_version.clone(),
            }),
            (Platform::Ios, TargetKind::Device) => CapabilityProfile::IosDevice(IosDeviceProfile {
                app: app.to_path_buf(),
                platform_version: device.os_version.clone(),
                device_name: device.name.clone(),
                udid: device.udid.clone(),
                signing: None,
            }),
            (Platform::Ios, _) => CapabilityProfile::Ios(IosProfile {
                app: app.to_path_buf(),
                platform_version: device.os_version.clone(),
                device_name: device.name.clone(),
            }),
            (Platform::Android, _) => CapabilityProfile::Android(AndroidProfile {
                app: app.to_path_buf(),
                platform_version: device.os_version.clone(),
                device_name: device.name.clone(),
                app_package: device.app_package.clone(),
                app_activity: device.app_activity.clone(),
                udid: device.udid.clone(),
            }),
        }
    }

    pub fn automation_engine(&self) -> &'static str {
        match self {
            CapabilityProfile::Ios(_) | CapabilityProfile::IosDevice(_) => "XCUITest",
            CapabilityProfile::Android(_) => "UiAutomator2",
            CapabilityProfile::Desktop(_) => "Mac",
        }
    }

    pub fn needs_signing(&self) -> bool {
        matches!(self, CapabilityProfile::IosDevice(p) if p.signing.is_none())
    }

    pub fn to_capability_set(&self) -> CapabilitySet {
        let mut extra = Map::new();
        let (app, platform_name, platform_version, device_name) = match self {
            CapabilityProfile::Ios(p) => (&p.app, "iOS", &p.platform_version, p.device_name.clone()),
            CapabilityProfile::IosDevice(p) => {
                if let Some(udid) = &p.udid {
                    extra.insert("udid".to_string(), json!(udid));
                }
                if let Some(signing) = &p.signing {
                    extra.insert("xcodeSigningId".to_string(), json!(signing.signing_id()));
                    if let Some(team) = &signing.team_id {
                        extra.insert("xcodeOrgId".to_string(), json!(team));
                    }
                    if let Some(profile) = &signing.provisioning_profile {
                        extra.insert("provisioningProfile".to_string(), json!(profile));
                    }
                }
                (&p.app, "iOS", &p.platform_version, p.device_name.clone())
            }
            CapabilityProfile::Android(p) => {
                extra.insert(
                    "deviceReadyTimeout".to_string(),
                    json!(ANDROID_DEVICE_READY_TIMEOUT_SECS),
                );
                if let Some(package) = &p.app_package {
                    extra.insert("appPackage".to_string(), json!(package));
                }
                if let Some(activity) = &p.app_activity {
                    extra.insert("appActivity".to_string(), json!(activity));
                }
                if let Some(udid) = &p.udid {
                    extra.insert("udid".to_string(), json!(udid));
                }
                (&p.app, "Android", &p.platform_version, p.device_name.clone())
            }
            CapabilityProfile::Desktop(p) => (&p.app, "Mac", &p.platform_version, "Mac".to_string()),
        };

        CapabilitySet {
            application_path: app.clone(),
            platform_name: platform_name.to_string(),
            platform_version: platform_version.clone(),
            device_name,
            automation_engine: self.automation_engine().to_string(),
            session_timeout_seconds: NEW_COMMAND_TIMEOUT_SECS,
            extra,
        }
    }
}

/// The descriptor sent to the automation server. Built once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub application_path: PathBuf,
    pub platform_name: String,
    pub platform_version: String,
    pub device_name: String,
    pub automation_engine: String,
    pub session_timeout_seconds: u64,
    pub extra: Map<String, Value>,
}

impl CapabilitySet {
    pub fn to_json(&self) -> Value {
        let mut caps = Map::new();
        caps.insert(
            "app".to_string(),
            json!(self.application_path.to_string_lossy()),
        );
        caps.insert("platformName".to_string(), json!(self.platform_name));
        caps.insert("platformVersion".to_string(), json!(self.platform_version));
        caps.insert("deviceName".to_string(), json!(self.device_name));
        caps.insert("automationName".to_string(), json!(self.automation_engine));
        caps.insert(
            "newCommandTimeout".to_string(),
            json!(self.session_timeout_seconds),
        );
        for (key, value) in &self.extra {
            caps.insert(key.clone(), value.clone());
        }
        Value::Object(caps)
    }
}
