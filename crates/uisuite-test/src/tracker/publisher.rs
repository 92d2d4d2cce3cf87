use super::api::{CYCLE_LIST_END, ProjectVersion, TrackerApi};
use crate::config::{HostOs, Platform, TrackerSettings};
use crate::execution::aggregator::{RESET_STATUS_CODE, TicketOutcome};
use crate::{Result, TestError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const RESET_COMMENT: &str = "Resetting Ticket...";

/// Identifiers resolved for one ticket's execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalExecutionRef {
    pub project_id: String,
    pub release_id: String,
    pub cycle_id: String,
    pub issue_key: String,
    pub issue_id: String,
    pub execution_id: String,
    pub step_ids: Vec<String>,
}

/// A test cycle resolved once per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRef {
    pub project_id: String,
    pub release_id: String,
    pub cycle_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSummary {
    pub published: usize,
    pub skipped: usize,
}

/// `Release 7.5.0` for SDK `7.5.0.GA`.
pub fn release_label(sdk_version: &str) -> String {
    let version: Vec<&str> = sdk_version.split('.').take(3).collect();
    format!("Release {}", version.join("."))
}

pub fn cycle_name(release: &str, host_os: HostOs, platform: Platform) -> String {
    format!("Appium {} {}-{}", release, host_os, platform)
}

/// Failure screenshots for a ticket, each preceded by its reference image.
/// A pair is only used when both files exist.
pub fn collect_images(
    screenshots_dir: &Path,
    reference_dir: &Path,
    ticket: &str,
    platform: Platform,
) -> Vec<PathBuf> {
    let needle = format!("{}_{}", ticket, platform);
    let Ok(entries) = std::fs::read_dir(screenshots_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(&needle))
        .collect();
    names.sort();

    let mut images = Vec::new();
    for name in names {
        let failure = screenshots_dir.join(&name);
        let reference = reference_dir.join(name.replace("_Failure", ""));
        if failure.is_file() && reference.is_file() {
            images.push(reference);
            images.push(failure);
        }
    }
    images
}

/// Publishes outcomes to the tracker. When disabled every call returns a
/// neutral value without touching the network.
pub struct TrackerPublisher {
    api: Option<Arc<dyn TrackerApi>>,
    settings: TrackerSettings,
    reference_dir: PathBuf,
}

impl TrackerPublisher {
    pub fn new(api: Arc<dyn TrackerApi>, settings: TrackerSettings, project_root: &Path) -> Self {
        let reference_dir = project_root
            .join("Modules")
            .join(&settings.module_name)
            .join("Screen_Shots");
        Self {
            api: settings.enabled.then_some(api),
            settings,
            reference_dir,
        }
    }

    pub fn disabled() -> Self {
        Self {
            api: None,
            settings: TrackerSettings::default(),
            reference_dir: PathBuf::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api.is_some()
    }

    pub async fn resolve_project(&self, api: &dyn TrackerApi, key: &str) -> Result<String> {
        api.project_id(key)
            .await?
            .ok_or_else(|| TestError::NotFound(format!("Cannot find a project matching \"{}\"", key)))
    }

    pub async fn resolve_release(
        &self,
        api: &dyn TrackerApi,
        project_id: &str,
        label: &str,
    ) -> Result<String> {
        let versions = api.versions(project_id).await?;
        find_release(&versions, label)
    }

    pub async fn resolve_cycle(
        &self,
        api: &dyn TrackerApi,
        project_id: &str,
        release_id: &str,
        name: &str,
    ) -> Result<String> {
        for entry in api.cycles(project_id, release_id).await? {
            if entry.name.as_deref() == Some(name) {
                return Ok(entry.key);
            }
            if entry.key == CYCLE_LIST_END {
                break;
            }
        }
        Err(TestError::NotFound(format!(
            "Didn't find a test cycle matching \"{}\"",
            name
        )))
    }

    /// Project, release and cycle for one platform. `Ok(None)` when
    /// publishing is disabled.
    pub async fn resolve_cycle_for(
        &self,
        platform: Platform,
        host_os: HostOs,
    ) -> Result<Option<CycleRef>> {
        let Some(api) = self.api.as_deref() else {
            debug!("Publishing disabled, skipping cycle lookup");
            return Ok(None);
        };

        info!("Retrieving test cycle id for {}", platform);
        let release = release_label(&self.settings.sdk_version);
        let name = cycle_name(&release, host_os, platform);

        let project_id = self.resolve_project(api, &self.settings.project_key).await?;
        let release_id = self.resolve_release(api, &project_id, &release).await?;
        let cycle_id = self.resolve_cycle(api, &project_id, &release_id, &name).await?;
        debug!(cycle = %name, cycle_id = %cycle_id, "Resolved test cycle");

        Ok(Some(CycleRef {
            project_id,
            release_id,
            cycle_id,
            name,
        }))
    }

    async fn resolve_ticket(&self, api: &dyn TrackerApi, ticket: &str) -> Result<(String, String)> {
        let module = self.settings.module_name.replace('_', "");
        let jql = format!(
            "project = {} AND issuetype = Test AND text ~ '{} {}'",
            self.settings.project_key, module, ticket
        );

        let key = api
            .search_issues(&jql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                TestError::NotFound(format!("Can't find matching test ticket for issue {}", ticket))
            })?;
        let id = api
            .issue_id(&key)
            .await?
            .ok_or_else(|| TestError::NotFound(format!("Couldn't find issue {}", key)))?;
        Ok((key, id))
    }

    pub async fn resolve_execution(
        &self,
        api: &dyn TrackerApi,
        issue_key: &str,
        issue_id: &str,
        cycle_id: &str,
    ) -> Result<String> {
        api.executions(issue_id, cycle_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                TestError::NotFound(format!(
                    "Could not find any executions in {} for the requested test cycle",
                    issue_key
                ))
            })
    }

    /// Resets then updates the ticket's execution and replaces its
    /// attachments. `Ok(None)` when publishing is disabled.
    pub async fn publish(
        &self,
        outcome: &TicketOutcome,
        cycle: &CycleRef,
        platform: Platform,
        screenshots_dir: &Path,
    ) -> Result<Option<ExternalExecutionRef>> {
        let Some(api) = self.api.as_deref() else {
            return Ok(None);
        };

        info!("Updating test execution for '{}'", outcome.name);
        let (issue_key, issue_id) = self.resolve_ticket(api, &outcome.name).await?;
        let execution_id = self
            .resolve_execution(api, &issue_key, &issue_id, &cycle.cycle_id)
            .await?;
        let step_ids = api.step_results(&execution_id).await.unwrap_or_else(|e| {
            debug!("Step results unavailable for {}: {}", execution_id, e);
            Vec::new()
        });

        // The reset guarantees the execution date moves even when the status
        // is unchanged.
        api.execute(&execution_id, RESET_STATUS_CODE, RESET_COMMENT)
            .await?;
        api.execute(&execution_id, outcome.state.status_code(), &outcome.comment())
            .await?;

        for file_id in api.attachments(&execution_id).await? {
            api.delete_attachment(&file_id).await?;
        }
        for image in collect_images(screenshots_dir, &self.reference_dir, &outcome.name, platform) {
            debug!(image = %image.display(), "Uploading attachment");
            api.upload_attachment(&execution_id, &image).await?;
        }

        Ok(Some(ExternalExecutionRef {
            project_id: cycle.project_id.clone(),
            release_id: cycle.release_id.clone(),
            cycle_id: cycle.cycle_id.clone(),
            issue_key,
            issue_id,
            execution_id,
            step_ids,
        }))
    }

    /// Publishes each outcome in turn. Failures are logged and the ticket is
    /// skipped.
    pub async fn publish_all(
        &self,
        outcomes: &[TicketOutcome],
        cycle: &CycleRef,
        platform: Platform,
        screenshots_dir: &Path,
    ) -> PublishSummary {
        let mut summary = PublishSummary::default();
        if !self.is_enabled() {
            return summary;
        }

        for outcome in outcomes {
            match self.publish(outcome, cycle, platform, screenshots_dir).await {
                Ok(Some(_)) => summary.published += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) if e.is_lookup_miss() => {
                    warn!("{}: {}", outcome.name, e);
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to publish {}: {}", outcome.name, e);
                    summary.skipped += 1;
                }
            }
        }
        summary
    }
}

pub fn find_release(versions: &[ProjectVersion], label: &str) -> Result<String> {
    versions
        .iter()
        .find(|v| v.name == label)
        .map(|v| v.id.clone())
        .ok_or_else(|| TestError::NotFound(format!("Cannot find a release matching {}", label)))
}
