use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::InferenceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Single-shot completion. `images` holds base64 payloads for vision models.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Anything that can answer prompts. Both calls ask for JSON output and
/// return the raw text the model produced.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError>;
    async fn chat(&self, request: ChatRequest) -> Result<String, InferenceError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (1-based), plus jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(5) as u32;
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter_ceiling = self.base_delay.as_millis().max(1) as u64;
        let jitter_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0);
        base + Duration::from_millis(jitter_seed % jitter_ceiling)
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    #[serde(skip_serializing_if = "no_images")]
    images: &'a [String],
}

fn no_images(images: &&[String]) -> bool {
    images.is_empty()
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    format: &'a str,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// HTTP client for an Ollama-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    endpoint: String,
    request_timeout: Duration,
    chat_timeout: Duration,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        chat_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| InferenceError::Transport(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            request_timeout,
            chat_timeout,
            retry,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, InferenceError> {
        Self::new(
            settings.endpoint.clone(),
            settings.request_timeout(),
            settings.plan_timeout(),
            RetryPolicy {
                max_attempts: settings.max_attempts,
                ..RetryPolicy::default()
            },
        )
    }

    async fn post_json<B, R>(&self, route: &str, body: &B, timeout: Duration) -> Result<R, InferenceError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{route}", self.endpoint);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;
        serde_json::from_str(&text).map_err(|e| InferenceError::Envelope(e.to_string()))
    }

    async fn with_retry<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, InferenceError>>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "inference call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!(call = label, attempt, error = %err, "inference call gave up");
                    return Err(err);
                }
            }
        }
    }
}

fn classify_send_error(err: reqwest::Error, timeout: Duration) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::from(err)
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            format: "json",
            images: &request.images,
        };
        let response: GenerateResponse = self
            .with_retry("generate", || {
                self.post_json("/api/generate", &body, self.request_timeout)
            })
            .await?;
        Ok(response.response)
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, InferenceError> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            format: "json",
            options: ChatOptions { temperature: 0.0 },
        };
        let response: ChatResponse = self
            .with_retry("chat", || self.post_json("/api/chat", &body, self.chat_timeout))
            .await?;
        Ok(response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(endpoint: &str, attempts: usize) -> OllamaClient {
        OllamaClient::new(
            endpoint,
            Duration::from_millis(500),
            Duration::from_millis(500),
            RetryPolicy {
                max_attempts: attempts,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        )
        .unwrap()
    }

    fn generate_request() -> GenerateRequest {
        GenerateRequest {
            model: "llama3.2".to_string(),
            prompt: "summarize".to_string(),
            images: Vec::new(),
        }
    }

    #[tokio::test]
    async fn generate_returns_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3.2", "stream": false, "format": "json"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "{\"summary\":\"ok\"}"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = fast_client(&server.uri(), 3)
            .generate(generate_request())
            .await
            .unwrap();
        assert_eq!(text, "{\"summary\":\"ok\"}");
    }

    #[tokio::test]
    async fn generate_sends_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"images": ["aGVsbG8="]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "a cat"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = generate_request();
        request.images.push("aGVsbG8=".to_string());
        let text = fast_client(&server.uri(), 1).generate(request).await.unwrap();
        assert_eq!(text, "a cat");
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .expect(3)
            .mount(&server)
            .await;

        let err = fast_client(&server.uri(), 3)
            .generate(generate_request())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "fine"})))
            .mount(&server)
            .await;

        let text = fast_client(&server.uri(), 3)
            .generate(generate_request())
            .await
            .unwrap();
        assert_eq!(text, "fine");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_client(&server.uri(), 3)
            .generate(generate_request())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn malformed_envelope_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_client(&server.uri(), 3)
            .chat(ChatRequest {
                model: "llama3".to_string(),
                messages: vec![ChatMessage::user("plan")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Envelope(_)));
    }

    #[tokio::test]
    async fn chat_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"options": {"temperature": 0.0}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "{\"files\": []}"}
            })))
            .mount(&server)
            .await;

        let text = fast_client(&server.uri(), 1)
            .chat(ChatRequest {
                model: "llama3".to_string(),
                messages: vec![ChatMessage::system("rules"), ChatMessage::user("files")],
            })
            .await
            .unwrap();
        assert_eq!(text, "{\"files\": []}");
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = fast_client(&server.uri(), 1)
            .generate(generate_request())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let err = fast_client("http://127.0.0.1:9", 1)
            .generate(generate_request())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(250) && first < Duration::from_millis(500));
        let late = policy.backoff(10);
        assert!(late >= Duration::from_secs(5) && late < Duration::from_millis(5_250));
    }
}
