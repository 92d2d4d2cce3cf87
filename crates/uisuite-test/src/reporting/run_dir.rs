use crate::{Result, TestError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// Per-run output: `Logs/<timestamp>/` with both log files and the
/// screenshots directory, plus the shared `Reports/` directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    pub timestamp: DateTime<Local>,
    pub root: PathBuf,
    pub basic_log: PathBuf,
    pub debug_log: PathBuf,
    pub screenshots: PathBuf,
    pub reports: PathBuf,
}

impl RunDirectory {
    /// Creates the run directory and empties `Reports/`. Any failure here is
    /// fatal to the run.
    pub fn create(project_root: &Path, timestamp: DateTime<Local>) -> Result<Self> {
        let root = project_root
            .join("Logs")
            .join(timestamp.format(TIMESTAMP_FORMAT).to_string());
        let screenshots = root.join("Screen_Shots");
        let reports = project_root.join("Reports");

        std::fs::create_dir_all(&screenshots).map_err(|e| {
            TestError::Reporting(format!("Failed to create {}: {}", screenshots.display(), e))
        })?;

        let basic_log = root.join("basic.log");
        let debug_log = root.join("debug.log");
        for log in [&basic_log, &debug_log] {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log)
                .map_err(|e| {
                    TestError::Reporting(format!("Failed to create {}: {}", log.display(), e))
                })?;
        }

        if reports.exists() {
            std::fs::remove_dir_all(&reports).map_err(|e| {
                TestError::Reporting(format!("Failed to empty {}: {}", reports.display(), e))
            })?;
        }
        std::fs::create_dir_all(&reports).map_err(|e| {
            TestError::Reporting(format!("Failed to create {}: {}", reports.display(), e))
        })?;

        Ok(Self {
            timestamp,
            root,
            basic_log,
            debug_log,
            screenshots,
            reports,
        })
    }
}
