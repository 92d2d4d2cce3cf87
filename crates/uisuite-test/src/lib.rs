pub mod automation;
pub mod build;
pub mod config;
pub mod device;
pub mod execution;
pub mod process;
pub mod reporting;
pub mod session;
pub mod tracker;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Connecting to an external automation server is not supported (host '{0}')")]
    UnsupportedHost(String),

    #[error("Automation server failed to start: {0}")]
    Startup(String),

    #[error("Automation server failed to stop: {0}")]
    Stop(String),

    #[error("Device launch failed: {0}")]
    Launch(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("No signing identity matches '{0}'")]
    NoMatchingIdentity(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("{0}")]
    Tracker(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl TestError {
    /// Remote lookups that found nothing. Callers log these and skip the item.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, TestError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, TestError>;

pub use config::{DeviceDescriptor, HostOs, Platform, PlatformTarget, SuiteConfig};
pub use execution::aggregator::{ResultAggregator, TicketOutcome, TicketState};
pub use execution::coordinator::{Collaborators, PlatformReport, RunContext, RunCoordinator, RunReport};
