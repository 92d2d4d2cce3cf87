use super::api::{CycleEntry, ProjectVersion, TrackerApi, id_string};
use crate::config::TrackerSettings;
use crate::{Result, TestError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// JIRA REST plus the Zephyr test-management API.
#[derive(Clone)]
pub struct ZephyrClient {
    client: Client,
    base_url: String,
}

impl ZephyrClient {
    pub fn new(settings: &TrackerSettings, timeout: Duration) -> Result<Self> {
        let (Some(user), Some(pass)) = (&settings.username, &settings.password) else {
            return Err(TestError::Config(
                "Tracker credentials missing, set JIRAUSER and JIRAPASS".to_string(),
            ));
        };

        let token = STANDARD.encode(format!("{}:{}", user, pass));
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| TestError::Config(format!("Invalid tracker credentials: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TestError::Tracker(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn attachment_request(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Atlassian-Token", "nocheck")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!(status = %status, body = %body, "Tracker request rejected");
            return Err(rejection(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            debug!(status = %status, body = %body, "Unparseable tracker response");
            TestError::Tracker(format!("Issue in JSON parsing ({}): {}", status, e))
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let request = self
            .client
            .get(self.url(path))
            .header(CONTENT_TYPE, "application/json");
        self.send(request).await
    }

    /// A 404 becomes `None`; JIRA answers unknown keys that way.
    async fn get_if_found(&self, path: &str) -> Result<Option<Value>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(TestError::NotFound(message)) => {
                debug!("{}", message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn rejection(status: StatusCode, body: &str) -> TestError {
    let message = format!("Tracker request failed: {} {}", status, body.trim());
    if status == StatusCode::NOT_FOUND {
        TestError::NotFound(message)
    } else {
        TestError::Tracker(message)
    }
}

#[async_trait]
impl TrackerApi for ZephyrClient {
    async fn project_id(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .get_if_found(&format!("/rest/api/latest/project/{}", key))
            .await?;
        Ok(value.as_ref().and_then(|v| v.get("id")).and_then(id_string))
    }

    async fn versions(&self, project_id: &str) -> Result<Vec<ProjectVersion>> {
        let value = self
            .get(&format!("/rest/api/latest/project/{}/versions", project_id))
            .await?;
        let versions = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| {
                        Some(ProjectVersion {
                            id: v.get("id").and_then(id_string)?,
                            name: v.get("name")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(versions)
    }

    async fn cycles(&self, project_id: &str, version_id: &str) -> Result<Vec<CycleEntry>> {
        let value = self
            .get(&format!(
                "/rest/zapi/latest/cycle?projectId={}&versionId={}",
                project_id, version_id
            ))
            .await?;
        Ok(cycle_entries(&value))
    }

    async fn search_issues(&self, jql: &str) -> Result<Vec<String>> {
        let request = self
            .client
            .post(self.url("/rest/api/latest/search"))
            .json(&json!({ "jql": jql }));
        let value = self.send(request).await?;
        Ok(value
            .get("issues")
            .and_then(Value::as_array)
            .map(|issues| {
                issues
                    .iter()
                    .filter_map(|i| i.get("key").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn issue_id(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .get_if_found(&format!("/rest/api/latest/issue/{}", key))
            .await?;
        Ok(value.as_ref().and_then(|v| v.get("id")).and_then(id_string))
    }

    async fn executions(&self, issue_id: &str, cycle_id: &str) -> Result<Vec<String>> {
        let value = self
            .get(&format!(
                "/rest/zapi/latest/execution?issueId={}&cycleId={}",
                issue_id, cycle_id
            ))
            .await?;
        Ok(ids_under(&value, "executions", "id"))
    }

    async fn step_results(&self, execution_id: &str) -> Result<Vec<String>> {
        let value = self
            .get(&format!("/rest/zapi/latest/stepResult?executionId={}", execution_id))
            .await?;
        Ok(value
            .as_array()
            .map(|steps| steps.iter().filter_map(|s| s.get("id").and_then(id_string)).collect())
            .unwrap_or_default())
    }

    async fn execute(&self, execution_id: &str, status: i32, comment: &str) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/rest/zapi/latest/execution/{}/execute", execution_id)))
            .json(&json!({ "status": status.to_string(), "comment": comment }));
        self.send(request).await?;
        Ok(())
    }

    async fn attachments(&self, execution_id: &str) -> Result<Vec<String>> {
        let request = self.attachment_request(self.client.get(self.url(&format!(
            "/rest/zapi/latest/attachment/attachmentsByEntity?entityId={}&entityType=execution",
            execution_id
        ))));
        let value = self.send(request).await?;
        Ok(ids_under(&value, "data", "fileId"))
    }

    async fn delete_attachment(&self, file_id: &str) -> Result<()> {
        let request = self.attachment_request(
            self.client
                .delete(self.url(&format!("/rest/zapi/latest/attachment/{}", file_id))),
        );
        self.send(request).await?;
        Ok(())
    }

    async fn upload_attachment(&self, execution_id: &str, file: &Path) -> Result<()> {
        let bytes = tokio::fs::read(file).await?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment.png".to_string());
        let form = multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(name));

        let request = self.attachment_request(
            self.client
                .post(self.url(&format!(
                    "/rest/zapi/latest/attachment?entityId={}&entityType=execution",
                    execution_id
                )))
                .multipart(form),
        );
        self.send(request).await?;
        Ok(())
    }
}

/// Keeps response key order so the end-of-list sentinel stays last.
pub fn cycle_entries(value: &Value) -> Vec<CycleEntry> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, cycle)| CycleEntry {
                    key: key.clone(),
                    name: cycle.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn ids_under(value: &Value, list: &str, field: &str) -> Vec<String> {
    value
        .get(list)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|i| i.get(field).and_then(id_string)).collect())
        .unwrap_or_default()
}
