use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompt::SYSTEM_PROMPT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const BACKOFF_UNIT_SECS: u64 = 5;

/// Thin client for an OpenAI-compatible code-generation service.
/// Credentials are validated once at startup; a missing key is fatal
/// before any attempt begins.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let api_key = dotenv::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .context("GROQ_API_KEY not set; export it or add it to .env")?;
        let base_url = dotenv::var("GROQ_API_URL")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Model ids the service currently offers.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("model listing request failed")?
            .error_for_status()
            .context("model listing rejected")?;

        let json: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse model listing response")?;

        let models = json["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    /// One synthesis request. Retries only on HTTP 429, honoring the
    /// server's retry-after hint when present, otherwise exponential
    /// backoff; any other failure propagates immediately.
    pub async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            },
        ];
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": 1000,
            "temperature": 0.1,
        });

        for attempt in 0..MAX_RATE_LIMIT_RETRIES {
            let resp = self
                .client
                .post(self.endpoint("chat/completions"))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("generation request failed")?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                let wait = backoff_delay(attempt, retry_after);
                warn!(
                    attempt,
                    wait_secs = wait.as_secs(),
                    "Rate limited by generation service; backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let resp = resp
                .error_for_status()
                .context("generation service returned an error")?;
            let json: serde_json::Value = resp
                .json()
                .await
                .context("failed to parse generation response")?;

            let content = json["choices"]
                .get(0)
                .and_then(|c| c["message"]["content"].as_str())
                .unwrap_or("")
                .to_string();
            debug!(response_len = content.len(), "Generation response received");
            return Ok(content);
        }

        bail!("generation service still rate limited after {MAX_RATE_LIMIT_RETRIES} retries")
    }
}

/// Server hint wins; without one, backoff doubles per retry from a fixed
/// unit (5s, 10s, 20s).
pub fn backoff_delay(attempt: u32, retry_after: Option<u64>) -> Duration {
    match retry_after {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        _ => Duration::from_secs(BACKOFF_UNIT_SECS * 2u64.pow(attempt)),
    }
}

/// First preferred model available, else the first the service offers.
pub fn select_model(available: &[String], preferred: &[String]) -> Option<String> {
    for want in preferred {
        if available.iter().any(|m| m == want) {
            return Some(want.clone());
        }
    }
    available.first().cloned()
}

/// Pull the code payload out of a raw generation response: prefer a fenced
/// block, else treat the whole text (stripped of stray fence characters)
/// as code.
pub fn extract_code(raw: &str) -> String {
    let raw = raw.trim();

    for pattern in ["```python", "```py", "```"] {
        if let Some(start) = raw.find(pattern) {
            let after = &raw[start + pattern.len()..];
            let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
            let body = &after[body_start..];
            let end = body.find("```").unwrap_or(body.len());
            let code = body[..end].trim();
            if !code.is_empty() {
                return code.to_string();
            }
        }
    }

    raw.trim_matches(|c: char| c == '`' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_python_fence() {
        let raw = "Here you go:\n```python\nimport pandas as pd\n\ndef parse(p):\n    pass\n```\nHope that helps!";
        assert_eq!(
            extract_code(raw),
            "import pandas as pd\n\ndef parse(p):\n    pass"
        );
    }

    #[test]
    fn test_extract_code_plain_fence() {
        let raw = "```\ndef parse(p):\n    return None\n```";
        assert_eq!(extract_code(raw), "def parse(p):\n    return None");
    }

    #[test]
    fn test_extract_code_py_fence() {
        let raw = "```py\nx = 1\n```";
        assert_eq!(extract_code(raw), "x = 1");
    }

    #[test]
    fn test_extract_code_unfenced() {
        let raw = "def parse(p):\n    return None";
        assert_eq!(extract_code(raw), raw);
    }

    #[test]
    fn test_extract_code_stray_backticks() {
        let raw = "`def parse(p): pass`";
        assert_eq!(extract_code(raw), "def parse(p): pass");
    }

    #[test]
    fn test_extract_code_unclosed_fence() {
        let raw = "```python\ndef parse(p):\n    return None";
        assert_eq!(extract_code(raw), "def parse(p):\n    return None");
    }

    #[test]
    fn test_backoff_honors_retry_after() {
        assert_eq!(backoff_delay(0, Some(2)), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, Some(7)), Duration::from_secs(7));
    }

    #[test]
    fn test_backoff_doubles_without_hint() {
        assert_eq!(backoff_delay(0, None), Duration::from_secs(5));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(10));
        assert_eq!(backoff_delay(2, Some(0)), Duration::from_secs(20));
    }

    #[test]
    fn test_select_model_preference_order() {
        let available = vec!["b".to_string(), "a".to_string()];
        let preferred = vec!["a".to_string(), "b".to_string()];
        assert_eq!(select_model(&available, &preferred), Some("a".to_string()));
        assert_eq!(select_model(&available, &[]), Some("b".to_string()));
        assert_eq!(select_model(&[], &preferred), None);
    }

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn stub_client(addr: std::net::SocketAddr) -> LlmClient {
        LlmClient {
            client: reqwest::Client::new(),
            base_url: format!("http://{addr}"),
            api_key: "stub-key".to_string(),
        }
    }

    /// Accept one connection, read one full request, write `response`.
    /// Every canned response carries `connection: close` so the client
    /// dials a fresh connection per retry.
    async fn serve_one(listener: &TcpListener, response: &str) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + body_len {
                    break;
                }
            }
        }
        sock.write_all(response.as_bytes()).await.unwrap();
        sock.flush().await.unwrap();
    }

    const RATE_LIMITED: &str = "HTTP/1.1 429 Too Many Requests\r\nretry-after: 1\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

    fn completion_response(content_json: &str) -> String {
        let body = format!(r#"{{"choices":[{{"message":{{"content":{content_json}}}}}]}}"#);
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_generate_retries_after_rate_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            serve_one(&listener, RATE_LIMITED).await;
            serve_one(&listener, &completion_response(r#""def parse(p):\n    pass""#)).await;
        });

        let client = stub_client(addr);
        let started = std::time::Instant::now();
        let content = client.generate("prompt", "test-model").await.unwrap();

        assert_eq!(content, "def parse(p):\n    pass");
        // The retry-after hint of one second was honored before retrying.
        assert!(started.elapsed() >= Duration::from_secs(1));
        // Both canned responses were consumed, so exactly two requests landed.
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_propagates_non_rate_limit_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            serve_one(
                &listener,
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            )
            .await;
        });

        let client = stub_client(addr);
        let err = client.generate("prompt", "test-model").await.unwrap_err();

        assert!(format!("{err:#}").contains("generation service returned an error"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_gives_up_after_retry_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            for _ in 0..MAX_RATE_LIMIT_RETRIES {
                serve_one(&listener, RATE_LIMITED).await;
            }
        });

        let client = stub_client(addr);
        let err = client.generate("prompt", "test-model").await.unwrap_err();

        assert!(format!("{err:#}").contains("still rate limited"));
        server.await.unwrap();
    }
}
