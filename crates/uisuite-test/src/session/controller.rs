use super::capabilities::{CapabilityProfile, CapabilitySet};
use super::signing::{SigningIdentity, default_profiles_dir, resolve_identity};
use super::webdriver::{DriverConnection, DriverConnector, LogEntry};
use crate::config::{Platform, PlatformTarget, SigningSettings};
use crate::device::{DeviceClass, DeviceLifecycleManager};
use crate::process::CommandRunner;
use crate::{Result, TestError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Device log types, in order of preference.
const DEVICE_LOG_TYPES: [&str; 2] = ["syslog", "logcat"];

pub struct Session {
    pub platform: Platform,
    pub capabilities: CapabilitySet,
    connection: Box<dyn DriverConnection>,
}

impl Session {
    pub fn id(&self) -> &str {
        self.connection.session_id()
    }

    pub fn connection(&self) -> &dyn DriverConnection {
        self.connection.as_ref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform)
            .field("id", &self.id())
            .finish()
    }
}

pub struct SessionController {
    connector: Arc<dyn DriverConnector>,
    runner: Arc<dyn CommandRunner>,
    signing: SigningSettings,
    profiles_dir: Option<PathBuf>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn DriverConnector>,
        runner: Arc<dyn CommandRunner>,
        signing: SigningSettings,
    ) -> Self {
        Self {
            connector,
            runner,
            signing,
            profiles_dir: default_profiles_dir(),
        }
    }

    pub fn with_profiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = Some(dir.into());
        self
    }

    /// Builds the capability set for a target. Physical iOS devices also get
    /// a signing identity, which fails with `NoMatchingIdentity` when the
    /// keychain has none matching.
    pub async fn capabilities_for(
        &self,
        target: &PlatformTarget,
        app: &Path,
    ) -> Result<CapabilitySet> {
        let mut profile = CapabilityProfile::for_target(target, app);
        if profile.needs_signing() {
            let identity = self.resolve_signing().await?;
            if let CapabilityProfile::IosDevice(device) = &mut profile {
                device.signing = Some(identity);
            }
        }
        Ok(profile.to_capability_set())
    }

    async fn resolve_signing(&self) -> Result<SigningIdentity> {
        resolve_identity(
            self.runner.as_ref(),
            &self.signing.identity_pattern,
            self.profiles_dir.as_deref(),
        )
        .await
    }

    pub async fn start_session(
        &self,
        server_url: &str,
        platform: Platform,
        capabilities: CapabilitySet,
    ) -> Result<Session> {
        info!("Starting {} session on {}", platform, capabilities.device_name);
        let connection = self
            .connector
            .connect(server_url, &capabilities.to_json())
            .await
            .map_err(|e| match e {
                TestError::Session(_) => e,
                other => TestError::Session(other.to_string()),
            })?;

        Ok(Session {
            platform,
            capabilities,
            connection,
        })
    }

    /// Fetches the first available device log. Errors yield an empty log.
    pub async fn device_log(&self, session: &Session) -> Vec<LogEntry> {
        let available = match session.connection.log_types().await {
            Ok(types) => types,
            Err(e) => {
                debug!("Log types unavailable: {}", e);
                return Vec::new();
            }
        };

        let Some(log_type) = DEVICE_LOG_TYPES
            .iter()
            .find(|t| available.iter().any(|a| a == *t))
        else {
            return Vec::new();
        };

        match session.connection.get_log(log_type).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Failed to fetch {} log: {}", log_type, e);
                Vec::new()
            }
        }
    }

    /// Closes the app, ends the session, then tears the device down. Every
    /// step runs even when an earlier one fails.
    pub async fn stop_session(
        &self,
        session: Session,
        devices: &mut DeviceLifecycleManager,
        class: DeviceClass,
    ) {
        info!("Stopping {} session", session.platform);

        if let Err(e) = session.connection.close_app().await {
            warn!("Failed to close app: {}", e);
        }
        if let Err(e) = session.connection.quit().await {
            warn!("Failed to quit session: {}", e);
        }

        devices.kill(class).await;
    }
}
