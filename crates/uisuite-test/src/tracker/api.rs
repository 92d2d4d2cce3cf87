use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Key that closes the cycle listing. It is not a cycle.
pub const CYCLE_LIST_END: &str = "recordsCount";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVersion {
    pub id: String,
    pub name: String,
}

/// One key of the cycle listing, in response order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEntry {
    pub key: String,
    pub name: Option<String>,
}

/// Remote calls made while publishing. Every "not found" is an empty value
/// here; the publisher turns those into descriptive errors.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn project_id(&self, key: &str) -> Result<Option<String>>;

    async fn versions(&self, project_id: &str) -> Result<Vec<ProjectVersion>>;

    async fn cycles(&self, project_id: &str, version_id: &str) -> Result<Vec<CycleEntry>>;

    /// Issue keys matching a JQL query, best match first.
    async fn search_issues(&self, jql: &str) -> Result<Vec<String>>;

    async fn issue_id(&self, key: &str) -> Result<Option<String>>;

    async fn executions(&self, issue_id: &str, cycle_id: &str) -> Result<Vec<String>>;

    async fn step_results(&self, execution_id: &str) -> Result<Vec<String>>;

    async fn execute(&self, execution_id: &str, status: i32, comment: &str) -> Result<()>;

    async fn attachments(&self, execution_id: &str) -> Result<Vec<String>>;

    async fn delete_attachment(&self, file_id: &str) -> Result<()>;

    async fn upload_attachment(&self, execution_id: &str, file: &Path) -> Result<()>;
}

/// Ids come back as strings or numbers depending on the endpoint.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
