//! Thin gateway to the configured LLM provider. Trimmed to exactly what
//! the planner, reflector, and embedding service need: a retrying HTTP
//! post, a chat-completion call (plain and vision-augmented), and text
//! embeddings.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

const CHAT_MODEL: &str = "gpt-4o";
const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct LLMClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl LLMClient {
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY not set")?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| CHAT_MODEL.to_string());
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(LLMClient { client, api_key, model })
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// A credential-less client: every `has_credentials()` check fails
    /// fast, so the planner/reflector/embedding service degrade to their
    /// documented no-op paths instead of erroring out of existence.
    pub fn disabled() -> Self {
        LLMClient {
            client: reqwest::Client::new(),
            api_key: String::new(),
            model: CHAT_MODEL.to_string(),
        }
    }

    /// Exponential-backoff POST: retries on 5xx/429 and on network
    /// errors (1s, 2s, 4s), never retries other 4xx responses.
    pub async fn post_with_retry(&self, url: &str, body: Value) -> Result<Value> {
        let mut backoff = Duration::from_secs(1);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let resp = self
                .client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status();
                    if status.is_success() {
                        return r.json::<Value>().await.context("invalid JSON response");
                    }
                    if (status.is_server_error() || status.as_u16() == 429) && attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                    let text = r.text().await.unwrap_or_default();
                    return Err(anyhow!("LLM request failed ({}): {}", status, text));
                }
                Err(e) => {
                    last_err = Some(anyhow!("network error: {}", e));
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("LLM request exhausted retries")))
    }

    /// Single chat completion over a list of `{role, content}` messages.
    /// Returns the assistant's raw text.
    pub async fn chat_completion(&self, messages: Vec<Value>) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.2,
        });
        let resp = self.post_with_retry("https://api.openai.com/v1/chat/completions", body).await?;
        extract_content(&resp)
    }

    /// Chat completion where the last user message also carries an
    /// attached image (base64 JPEG), using the multipart `content` array
    /// shape the reference vision calls use.
    pub async fn chat_completion_vision(
        &self,
        system_prompt: &str,
        user_text: &str,
        image_base64: &str,
    ) -> Result<String> {
        let messages = vec![
            json!({ "role": "system", "content": system_prompt }),
            json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": user_text },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/jpeg;base64,{}", image_base64),
                            "detail": "high",
                        }
                    }
                ]
            }),
        ];
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
        });
        let resp = self.post_with_retry("https://api.openai.com/v1/chat/completions", body).await?;
        extract_content(&resp)
    }

    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": EMBEDDING_MODEL,
            "input": text,
        });
        let resp = self.post_with_retry("https://api.openai.com/v1/embeddings", body).await?;
        let vec = resp["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow!("embedding response missing data[0].embedding"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(vec)
    }
}

fn extract_content(resp: &Value) -> Result<String> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("chat completion response missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_reads_choice_text() {
        let resp = json!({
            "choices": [{ "message": { "content": "hello" } }]
        });
        assert_eq!(extract_content(&resp).unwrap(), "hello");
    }

    #[test]
    fn extract_content_errors_on_missing_field() {
        let resp = json!({ "choices": [] });
        assert!(extract_content(&resp).is_err());
    }
}
