//! W3C WebDriver client

use async_trait::async_trait;
use camguard_config::BrowserPolicy;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::{BrowserDriver, DriverError, DriverResult};

/// Dispatches one keydown event on the document. The key name is passed as
/// a script argument.
const KEYDOWN_SCRIPT: &str = "var evt = new KeyboardEvent('keydown', \
    {bubbles: true, cancelable: true, key: arguments[0], code: arguments[0]}); \
    document.dispatchEvent(evt);";

/// Drives a browser through a WebDriver server (msedgedriver, chromedriver,
/// geckodriver) over HTTP.
pub struct WebDriverClient {
    client: Client,
    base_url: String,
    browser_name: String,
    user_data_dir: Option<PathBuf>,
    session_id: Option<String>,
}

impl WebDriverClient {
    pub fn new(policy: &BrowserPolicy) -> DriverResult<Self> {
        let client = Client::builder()
            .timeout(policy.operation_timeout)
            .connect_timeout(policy.operation_timeout)
            .build()
            .map_err(|e| DriverError::Fatal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: policy.webdriver_url.trim_end_matches('/').to_string(),
            browser_name: policy.browser_name.clone(),
            user_data_dir: policy.user_data_dir.clone(),
            session_id: None,
        })
    }

    fn session_url(&self, path: &str) -> DriverResult<String> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| DriverError::Transient("no browser session".into()))?;
        Ok(format!("{}/session/{}{}", self.base_url, id, path))
    }

    async fn post(&self, url: &str, body: Value) -> DriverResult<Value> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn get(&self, url: &str) -> DriverResult<Value> {
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        decode(response).await
    }

    async fn delete(&self, url: &str) -> DriverResult<Value> {
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn launch(&mut self) -> DriverResult<()> {
        if self.session_id.is_some() {
            self.quit().await?;
        }

        let body = capabilities(&self.browser_name, self.user_data_dir.as_ref());
        let value = self
            .post(&format!("{}/session", self.base_url), body)
            .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Transient("new session response without sessionId".into()))?;

        info!(session_id, browser = %self.browser_name, "Browser session started");
        self.session_id = Some(session_id.to_string());
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        let endpoint = self.session_url("/url")?;
        self.post(&endpoint, json!({ "url": url })).await?;
        debug!(url, "Navigated");
        Ok(())
    }

    async fn send_key_sequence(&mut self, keys: &[String]) -> DriverResult<()> {
        let endpoint = self.session_url("/execute/sync")?;
        for key in keys {
            self.post(
                &endpoint,
                json!({ "script": KEYDOWN_SCRIPT, "args": [key] }),
            )
            .await?;
            debug!(key = %key, "Sent key event");
        }
        Ok(())
    }

    async fn reload(&mut self) -> DriverResult<()> {
        let endpoint = self.session_url("/refresh")?;
        self.post(&endpoint, json!({})).await?;
        Ok(())
    }

    async fn current_location(&mut self) -> DriverResult<String> {
        let endpoint = self.session_url("/url")?;
        let value = self.get(&endpoint).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Transient("current URL was not a string".into()))
    }

    async fn quit(&mut self) -> DriverResult<()> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        let endpoint = format!("{}/session/{}", self.base_url, id);
        self.delete(&endpoint).await?;
        info!(session_id = %id, "Browser session closed");
        Ok(())
    }
}

/// New-session request body for `browser_name`
fn capabilities(browser_name: &str, user_data_dir: Option<&PathBuf>) -> Value {
    let mut args = vec![
        "--log-level=3".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--allow-running-insecure-content".to_string(),
    ];
    if let Some(dir) = user_data_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
    }

    let options_key = match browser_name {
        "MicrosoftEdge" | "msedge" => "ms:edgeOptions",
        "firefox" => "moz:firefoxOptions",
        _ => "goog:chromeOptions",
    };

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": browser_name,
                options_key: { "args": args },
            }
        }
    })
}

fn transport_error(e: reqwest::Error) -> DriverError {
    DriverError::Transient(format!("WebDriver unreachable: {}", e))
}

async fn decode(response: reqwest::Response) -> DriverResult<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Transient(format!("invalid WebDriver response: {}", e)))?;
    if status.is_success() {
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    } else {
        Err(classify(status, &body))
    }
}

/// Map a WebDriver error response to a driver error
fn classify(status: StatusCode, body: &Value) -> DriverError {
    let value = body.get("value");
    let code = value
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let detail = format!("{} ({}): {}", code, status.as_u16(), message);
    match code {
        // The driver cannot start this browser at all
        "session not created" | "invalid argument" => DriverError::Fatal(detail),
        _ => DriverError::Transient(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_for_edge() {
        let caps = capabilities("MicrosoftEdge", Some(&PathBuf::from("/tmp/profile")));
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "MicrosoftEdge");
        let args = always["ms:edgeOptions"]["args"].as_array().unwrap();
        assert!(args.contains(&json!("--user-data-dir=/tmp/profile")));
    }

    #[test]
    fn test_capabilities_default_to_chrome_options() {
        let caps = capabilities("chrome", None);
        assert!(caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"].is_object());
    }

    #[test]
    fn test_error_classification() {
        let lost = json!({"value": {"error": "invalid session id", "message": "session deleted"}});
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, &lost),
            DriverError::Transient(_)
        ));

        let mismatch = json!({"value": {
            "error": "session not created",
            "message": "This version of Microsoft Edge WebDriver only supports Microsoft Edge version 120"
        }});
        assert!(classify(StatusCode::INTERNAL_SERVER_ERROR, &mismatch).is_fatal());

        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, &json!({})),
            DriverError::Transient(_)
        ));
    }

    #[test]
    fn test_calls_without_session_fail_transiently() {
        let client = WebDriverClient::new(&BrowserPolicy::default()).unwrap();
        assert!(matches!(
            client.session_url("/url"),
            Err(DriverError::Transient(_))
        ));
    }
}
