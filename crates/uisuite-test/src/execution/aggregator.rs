use super::events::{NOT_FOR_PLATFORM, TestResult, TestState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Status code that clears an execution before it is updated.
pub const RESET_STATUS_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketState {
    Pass,
    Fail,
    Skip,
    NotForPlatform,
}

impl TicketState {
    /// Execution status understood by the tracker.
    pub fn status_code(&self) -> i32 {
        match self {
            TicketState::Pass => 1,
            TicketState::Fail => 2,
            TicketState::Skip => 3,
            TicketState::NotForPlatform => 5,
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketState::Pass => write!(f, "Pass"),
            TicketState::Fail => write!(f, "Fail"),
            TicketState::Skip => write!(f, "Skip"),
            TicketState::NotForPlatform => write!(f, "Not For Platform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketOutcome {
    pub name: String,
    pub state: TicketState,
    pub errors: Vec<String>,
    #[serde(default)]
    pub test_num: Option<u32>,
}

impl TicketOutcome {
    fn new(name: String, state: TicketState, test_num: Option<u32>) -> Self {
        Self {
            name,
            state,
            errors: Vec::new(),
            test_num,
        }
    }

    /// Comment posted with the execution update.
    pub fn comment(&self) -> String {
        format!(
            "{} Test Step(s) Failing\n\n{}",
            self.errors.len(),
            self.errors.join("\n\n")
        )
    }
}

#[derive(Debug)]
struct Entry {
    seq: usize,
    outcome: TicketOutcome,
}

/// Folds per-test results into one outcome per ticket.
///
/// A ticket's state only strengthens: a pass promotes a skip, a failure
/// overrides anything, and nothing replaces a failure.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    tickets: HashMap<String, Entry>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn get(&self, ticket: &str) -> Option<&TicketOutcome> {
        self.tickets.get(ticket).map(|e| &e.outcome)
    }

    pub fn fold(&mut self, result: &TestResult) {
        let ticket = result.ticket_key();
        let next_seq = self.tickets.len();

        if result.is_not_for_platform() {
            info!("{}: {}", ticket, NOT_FOR_PLATFORM);
            match self.tickets.get_mut(&ticket) {
                Some(entry) => entry.outcome.errors.push(NOT_FOR_PLATFORM.to_string()),
                None => self.insert(
                    next_seq,
                    TicketOutcome::new(ticket, TicketState::NotForPlatform, result.test_num),
                ),
            }
            return;
        }

        match result.state {
            TestState::Pending => {
                info!("{}: {} - Skipped", ticket, result.title);
                let reason = sanitize(&result.title);
                match self.tickets.get_mut(&ticket) {
                    Some(entry) => {
                        if entry.outcome.state == TicketState::Skip {
                            entry.outcome.errors.push(reason);
                        }
                    }
                    None => {
                        let mut outcome =
                            TicketOutcome::new(ticket, TicketState::Skip, result.test_num);
                        outcome.errors.push(reason);
                        self.insert(next_seq, outcome);
                    }
                }
            }
            TestState::Passed => {
                info!("{}: {} - Passed", ticket, result.title);
                match self.tickets.get_mut(&ticket) {
                    Some(entry) => {
                        if entry.outcome.state == TicketState::Skip {
                            entry.outcome.state = TicketState::Pass;
                        }
                    }
                    None => self.insert(
                        next_seq,
                        TicketOutcome::new(ticket, TicketState::Pass, result.test_num),
                    ),
                }
            }
            TestState::Failed => {
                let detail = result.error.as_deref().unwrap_or_default();
                info!("{}: {} - Failed", ticket, result.title);
                info!("Reason: {}", detail);
                let message = failure_message(&result.title, detail);
                match self.tickets.get_mut(&ticket) {
                    Some(entry) => {
                        entry.outcome.state = TicketState::Fail;
                        entry.outcome.errors.push(message);
                    }
                    None => {
                        let mut outcome =
                            TicketOutcome::new(ticket, TicketState::Fail, result.test_num);
                        outcome.errors.push(message);
                        self.insert(next_seq, outcome);
                    }
                }
            }
        }
    }

    fn insert(&mut self, seq: usize, outcome: TicketOutcome) {
        self.tickets
            .insert(outcome.name.clone(), Entry { seq, outcome });
    }

    /// Outcomes ordered by test number, then by first sighting.
    pub fn finalize(self) -> Vec<TicketOutcome> {
        let mut entries: Vec<Entry> = self.tickets.into_values().collect();
        entries.sort_by_key(|e| (e.outcome.test_num.is_none(), e.outcome.test_num, e.seq));
        entries.into_iter().map(|e| e.outcome).collect()
    }
}

/// Backslashes are dropped and double quotes become single quotes so the
/// text survives JSON and XML transport.
pub fn sanitize(text: &str) -> String {
    text.replace('\\', "").replace('"', "'")
}

pub fn failure_message(title: &str, error: &str) -> String {
    format!(
        "[TEST STEP] {}\n[RESULT] {}",
        title.replace('"', "'"),
        sanitize(error)
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
    pub not_for_platform: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[TicketOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.state {
                TicketState::Pass => counts.pass += 1,
                TicketState::Fail => counts.fail += 1,
                TicketState::Skip => counts.skip += 1,
                TicketState::NotForPlatform => counts.not_for_platform += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.skip + self.not_for_platform
    }
}
