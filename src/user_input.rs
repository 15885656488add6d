//! User-input side channel (§6): when an executor needs interactive
//! input (login, captcha, QR confirmation, email config), the agent
//! emits a `user_input_request` event and polls a known file path until
//! the host writes a response. Per DESIGN.md Open Question #3, the
//! stop-event-aware variant is authoritative and defined exactly once
//! here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct UserInputRequest {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "captchaImage", skip_serializing_if = "Option::is_none")]
    pub captcha_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInputResponse {
    pub request_id: String,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub values: Option<Value>,
}

pub struct UserInputManager {
    response_path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl UserInputManager {
    pub fn new(config_dir: &PathBuf, timeout: Duration) -> Self {
        UserInputManager {
            response_path: config_dir.join("user_input_response.json"),
            timeout,
            poll_interval: Duration::from_millis(300),
        }
    }

    /// Polls the response file until it names `request.request_id`,
    /// consuming (deleting) it, or until `timeout` elapses or `stop`
    /// fires — whichever comes first.
    pub async fn await_response(
        &self,
        request: &UserInputRequest,
        stop: &crate::schema::StopSignal,
    ) -> Option<UserInputResponse> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(response) = self.try_read_matching(&request.request_id) {
                return Some(response);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            if stop.wait_or_timeout(self.poll_interval).await {
                return None;
            }
        }
    }

    fn try_read_matching(&self, request_id: &str) -> Option<UserInputResponse> {
        let content = std::fs::read_to_string(&self.response_path).ok()?;
        let response: UserInputResponse = serde_json::from_str(&content).ok()?;
        if response.request_id != request_id {
            return None;
        }
        let _ = std::fs::remove_file(&self.response_path);
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StopSignal;

    #[tokio::test]
    async fn reads_and_deletes_matching_response() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UserInputManager::new(&dir.path().to_path_buf(), Duration::from_millis(200));
        let request = UserInputRequest {
            request_id: "req-1".to_string(),
            kind: "login".to_string(),
            title: "Sign in".to_string(),
            fields: None,
            message: None,
            captcha_image: None,
        };

        let response_path = dir.path().join("user_input_response.json");
        std::fs::write(&response_path, r#"{"request_id":"req-1","values":{"user":"a"}}"#).unwrap();

        let stop = StopSignal::new();
        let response = manager.await_response(&request, &stop).await.unwrap();
        assert_eq!(response.request_id, "req-1");
        assert!(!response_path.exists());
    }

    #[tokio::test]
    async fn times_out_when_no_response_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UserInputManager::new(&dir.path().to_path_buf(), Duration::from_millis(50));
        let request = UserInputRequest {
            request_id: "req-2".to_string(),
            kind: "captcha".to_string(),
            title: "Solve captcha".to_string(),
            fields: None,
            message: None,
            captcha_image: None,
        };
        let stop = StopSignal::new();
        assert!(manager.await_response(&request, &stop).await.is_none());
    }
}
