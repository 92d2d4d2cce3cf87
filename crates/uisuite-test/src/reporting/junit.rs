use crate::config::{HostOs, Platform};
use crate::execution::aggregator::{OutcomeCounts, TicketOutcome, TicketState};
use crate::{Result, TestError};
use chrono::{DateTime, Local};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct JunitCase {
    name: String,
    failure: Option<String>,
    failure_summary: Option<String>,
    skipped: Option<String>,
}

#[derive(Debug, Serialize)]
struct JunitSuite {
    name: String,
    classname: String,
    timestamp: String,
    tests: usize,
    failures: usize,
    skipped: usize,
    cases: Vec<JunitCase>,
}

pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\n' | '\r' | '\t') => {}
            c => out.push(c),
        }
    }
    out
}

pub struct JunitReporter {
    template_engine: Handlebars<'static>,
}

impl JunitReporter {
    pub fn new() -> Result<Self> {
        let mut template_engine = Handlebars::new();
        template_engine.register_escape_fn(xml_escape);
        template_engine
            .register_template_string("junit", include_str!("../../templates/junit.hbs"))
            .map_err(|e| TestError::Reporting(format!("Failed to register JUnit template: {}", e)))?;
        Ok(Self { template_engine })
    }

    pub fn render(
        &self,
        host_os: HostOs,
        platform: Platform,
        outcomes: &[TicketOutcome],
        timestamp: DateTime<Local>,
    ) -> Result<String> {
        let counts = OutcomeCounts::tally(outcomes);
        let cases = outcomes
            .iter()
            .map(|outcome| match outcome.state {
                TicketState::Fail => JunitCase {
                    name: outcome.name.clone(),
                    failure_summary: Some(format!("{} test step(s) failing", outcome.errors.len())),
                    failure: Some(outcome.errors.join("\n\n")),
                    skipped: None,
                },
                TicketState::Skip | TicketState::NotForPlatform => JunitCase {
                    name: outcome.name.clone(),
                    failure: None,
                    failure_summary: None,
                    skipped: Some(outcome.state.to_string()),
                },
                TicketState::Pass => JunitCase {
                    name: outcome.name.clone(),
                    failure: None,
                    failure_summary: None,
                    skipped: None,
                },
            })
            .collect();

        let suite = JunitSuite {
            name: format!("{}-{}", host_os, platform),
            classname: platform.to_string(),
            timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            tests: counts.total(),
            failures: counts.fail,
            skipped: counts.skip + counts.not_for_platform,
            cases,
        };

        self.template_engine
            .render("junit", &suite)
            .map_err(|e| TestError::Reporting(format!("Failed to render JUnit report: {}", e)))
    }

    /// Writes `<reports>/<hostOS>-<platform>.xml` and returns its path.
    pub async fn write(
        &self,
        reports_dir: &Path,
        host_os: HostOs,
        platform: Platform,
        outcomes: &[TicketOutcome],
        timestamp: DateTime<Local>,
    ) -> Result<PathBuf> {
        let xml = self.render(host_os, platform, outcomes, timestamp)?;
        tokio::fs::create_dir_all(reports_dir).await?;
        let path = reports_dir.join(format!("{}-{}.xml", host_os, platform));
        tokio::fs::write(&path, xml).await?;
        Ok(path)
    }
}
