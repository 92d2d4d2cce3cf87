use crate::{Result, TestError};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// An open automation session. Test scripts drive the UI through their own
/// client; the orchestrator only needs the session id and teardown.
#[async_trait]
pub trait DriverConnection: Send + Sync {
    fn session_id(&self) -> &str;

    /// Closes the app under test without ending the session.
    async fn close_app(&self) -> Result<()>;

    async fn quit(&self) -> Result<()>;

    async fn log_types(&self) -> Result<Vec<String>>;

    async fn get_log(&self, log_type: &str) -> Result<Vec<LogEntry>>;
}

#[async_trait]
pub trait DriverConnector: Send + Sync {
    async fn connect(&self, server_url: &str, capabilities: &Value)
    -> Result<Box<dyn DriverConnection>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub level: String,
    pub message: String,
}

/// Opens sessions over the WebDriver HTTP protocol.
#[derive(Clone)]
pub struct HttpDriverConnector {
    client: Client,
}

impl HttpDriverConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TestError::Session(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DriverConnector for HttpDriverConnector {
    async fn connect(
        &self,
        server_url: &str,
        capabilities: &Value,
    ) -> Result<Box<dyn DriverConnection>> {
        let session = WebDriverSession::create(self.client.clone(), server_url, capabilities).await?;
        Ok(Box::new(session))
    }
}

pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverSession {
    pub async fn create(client: Client, server_url: &str, capabilities: &Value) -> Result<Self> {
        let base_url = server_url.trim_end_matches('/').to_string();
        let body = json!({
            "desiredCapabilities": capabilities,
            "capabilities": { "alwaysMatch": w3c_capabilities(capabilities) },
        });

        let response = client
            .post(format!("{}/session", base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TestError::Session(format!("Failed to reach automation server: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TestError::Session(format!("Invalid new session response: {}", e)))?;
        if !status.is_success() {
            // A WebDriver error body carries the better message.
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                parse_new_session(&value)?;
            }
            return Err(http_failure("new session", status, &text));
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| TestError::Session(format!("Invalid new session response: {}", e)))?;

        let (session_id, capabilities) = parse_new_session(&value)?;
        debug!(session_id = %session_id, capabilities = %capabilities, "Session created");

        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TestError::Session(format!("{} failed: {}", path, e)))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        decode_response(path, status, &text)
    }
}

#[async_trait]
impl DriverConnection for WebDriverSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn close_app(&self) -> Result<()> {
        self.command(Method::POST, "/appium/app/close", Some(json!({})))
            .await?;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| TestError::Session(format!("Failed to quit session: {}", e)))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        decode_response("quit", status, &text)?;
        Ok(())
    }

    async fn log_types(&self) -> Result<Vec<String>> {
        let value = self.command(Method::GET, "/log/types", None).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn get_log(&self, log_type: &str) -> Result<Vec<LogEntry>> {
        let value = self
            .command(Method::POST, "/log", Some(json!({ "type": log_type })))
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Appium 1.x accepts unprefixed W3C capabilities in `alwaysMatch` only for
/// the standard keys, so the rest get the `appium:` vendor prefix.
fn w3c_capabilities(capabilities: &Value) -> Value {
    let Some(map) = capabilities.as_object() else {
        return capabilities.clone();
    };
    let prefixed = map
        .iter()
        .map(|(key, value)| {
            let key = if key == "platformName" || key.contains(':') {
                key.clone()
            } else {
                format!("appium:{}", key)
            };
            (key, value.clone())
        })
        .collect();
    Value::Object(prefixed)
}

/// Accepts both the W3C shape `{"value": {"sessionId", "capabilities"}}` and
/// the legacy `{"sessionId", "status", "value": {...}}`.
pub fn parse_new_session(response: &Value) -> Result<(String, Value)> {
    if let Some(id) = response.get("sessionId").and_then(Value::as_str) {
        let value = check_response(response.clone())?;
        return Ok((id.to_string(), value));
    }

    let value = check_response(response.clone())?;
    let id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| TestError::Session("New session response has no sessionId".to_string()))?;
    let capabilities = value.get("capabilities").cloned().unwrap_or(Value::Null);
    Ok((id.to_string(), capabilities))
}

/// Unwraps `value`, turning W3C errors and non-zero legacy statuses into
/// session errors.
pub fn check_response(response: Value) -> Result<Value> {
    if let Some(status) = response.get("status").and_then(Value::as_i64) {
        if status != 0 {
            let message = response
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(TestError::Session(format!("status {}: {}", status, message)));
        }
    }

    let value = match response {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        _ => Value::Null,
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(TestError::Session(format!("{}: {}", error, message)));
    }

    Ok(value)
}

fn http_failure(command: &str, status: StatusCode, body: &str) -> TestError {
    TestError::Session(format!("{} returned HTTP {}: {}", command, status, body.trim()))
}

/// Decodes a command response. WebDriver error bodies win; any other
/// non-success status is an error carrying the status and body. An empty or
/// non-JSON success body is `Null`.
pub fn decode_response(command: &str, status: StatusCode, body: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let value = check_response(value)?;
            if status.is_success() {
                Ok(value)
            } else {
                Err(http_failure(command, status, body))
            }
        }
        Err(_) if status.is_success() => Ok(Value::Null),
        Err(_) => Err(http_failure(command, status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_w3c_session() {
        let response = json!({
            "value": {
                "sessionId": "abc-123",
                "capabilities": { "platformName": "iOS" }
            }
        });
        let (id, caps) = parse_new_session(&response).unwrap();
        assert_eq!(id, "abc-123");
        assert_eq!(caps["platformName"], "iOS");
    }

    #[test]
    fn test_parse_legacy_session() {
        let response = json!({
            "sessionId": "legacy-1",
            "status": 0,
            "value": { "platformName": "Android" }
        });
        let (id, caps) = parse_new_session(&response).unwrap();
        assert_eq!(id, "legacy-1");
        assert_eq!(caps["platformName"], "Android");
    }

    #[test]
    fn test_session_errors_surface() {
        let w3c = json!({
            "value": { "error": "session not created", "message": "no device" }
        });
        let err = parse_new_session(&w3c).unwrap_err();
        assert!(err.to_string().contains("no device"));

        let legacy = json!({
            "sessionId": null,
            "status": 33,
            "value": { "message": "A new session could not be created" }
        });
        assert!(parse_new_session(&legacy).is_err());
    }

    #[test]
    fn test_non_json_error_pages_fail() {
        let err = decode_response(
            "quit",
            StatusCode::BAD_GATEWAY,
            "<html><body>502 Bad Gateway</body></html>",
        )
        .unwrap_err();
        assert!(matches!(err, TestError::Session(_)));
        assert!(err.to_string().contains("502"));

        assert!(decode_response("/appium/app/close", StatusCode::NOT_FOUND, "").is_err());
    }

    #[test]
    fn test_webdriver_error_body_wins() {
        let body = r#"{"value":{"error":"invalid session id","message":"session deleted"}}"#;
        let err = decode_response("quit", StatusCode::NOT_FOUND, body).unwrap_err();
        assert!(err.to_string().contains("session deleted"));

        let odd = decode_response("quit", StatusCode::INTERNAL_SERVER_ERROR, r#"{"value":null}"#);
        assert!(odd.unwrap_err().to_string().contains("500"));
    }

    #[test]
    fn test_success_bodies() {
        let value = decode_response("/log/types", StatusCode::OK, r#"{"value":["syslog"]}"#).unwrap();
        assert_eq!(value, json!(["syslog"]));
        assert_eq!(decode_response("quit", StatusCode::OK, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_w3c_capabilities_prefix() {
        let caps = w3c_capabilities(&json!({
            "platformName": "iOS",
            "deviceName": "iPhone 7",
            "appium:udid": "x"
        }));
        assert_eq!(caps["platformName"], "iOS");
        assert_eq!(caps["appium:deviceName"], "iPhone 7");
        assert_eq!(caps["appium:udid"], "x");
    }
}
