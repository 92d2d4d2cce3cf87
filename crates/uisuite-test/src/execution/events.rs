use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title the test scripts use for a ticket that does not apply to the
/// current platform.
pub const NOT_FOR_PLATFORM: &str = "Not For Platform";

static TICKET_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9]*-\d+|\d+)$").expect("valid ticket regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
    Pending,
}

/// One finished test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub title: String,
    #[serde(default)]
    pub ticket: Option<String>,
    pub state: TestState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub test_num: Option<u32>,
}

impl TestResult {
    pub fn ticket_key(&self) -> String {
        if let Some(ticket) = self.ticket.as_deref().map(str::trim) {
            if !ticket.is_empty() {
                return ticket.to_string();
            }
        }
        derive_ticket_key(&self.title)
    }

    pub fn is_not_for_platform(&self) -> bool {
        self.title.trim() == NOT_FOR_PLATFORM
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    TestEnd(TestResult),
    SuiteEnd,
}

/// The first title token when it looks like a ticket id, else the whole title.
pub fn derive_ticket_key(title: &str) -> String {
    let title = title.trim();
    match title.split_whitespace().next() {
        Some(token) if TICKET_TOKEN.is_match(token.trim_end_matches(':')) => {
            token.trim_end_matches(':').to_string()
        }
        _ => title.to_string(),
    }
}

/// Parses one line of runner output. Anything that is not an event yields
/// `None`.
pub fn parse_event(line: &str) -> Option<TestEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_test_end() {
        let event = parse_event(
            r#"{"event":"test_end","title":"TIMOB-1234 opens the app","state":"failed","error":"boom"}"#,
        )
        .unwrap();
        let TestEvent::TestEnd(result) = event else {
            panic!("expected test_end");
        };
        assert_eq!(result.state, TestState::Failed);
        assert_eq!(result.ticket_key(), "TIMOB-1234");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_parse_suite_end_and_noise() {
        assert_eq!(parse_event(r#"{"event":"suite_end"}"#), Some(TestEvent::SuiteEnd));
        assert_eq!(parse_event("  ✓ something printed by a test"), None);
        assert_eq!(parse_event(r#"{"event":"unknown"}"#), None);
    }

    #[test]
    fn test_ticket_key_derivation() {
        assert_eq!(derive_ticket_key("17756: generate a module"), "17756");
        assert_eq!(derive_ticket_key("Launch the application"), "Launch the application");
        assert_eq!(derive_ticket_key("timob-1 lowercase"), "timob-1 lowercase");
    }

    #[test]
    fn test_explicit_ticket_wins() {
        let result = TestResult {
            title: NOT_FOR_PLATFORM.to_string(),
            ticket: Some("TIMOB-99".to_string()),
            state: TestState::Passed,
            error: None,
            test_num: None,
        };
        assert!(result.is_not_for_platform());
        assert_eq!(result.ticket_key(), "TIMOB-99");
    }
}
