//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{CompletionInput, CompletionProvider, CompletionRequest};
use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ExternalProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl ExternalProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            connect_timeout_secs = config.connect_timeout_secs,
            "Creating ExternalProvider"
        );

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = match &request.input {
            CompletionInput::Prompt(prompt) => vec![json!({"role": "user", "content": prompt})],
            CompletionInput::Messages(turns) => turns
                .iter()
                .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
                .collect(),
        };

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": false
        });
        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }
        body
    }
}

/// Map a non-success HTTP status onto the engine's error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> EngineError {
    let preview: String = body.chars().take(300).collect();
    match status.as_u16() {
        429 => EngineError::RateLimited(preview),
        401 | 403 => EngineError::ProviderFatal(format!(
            "authentication failed ({}): {}",
            status, preview
        )),
        408 => EngineError::Timeout(format!("upstream request timeout: {}", preview)),
        500..=599 => EngineError::Provider(format!("API error ({}): {}", status, preview)),
        _ => EngineError::ProviderFatal(format!("API error ({}): {}", status, preview)),
    }
}

/// Pull the first choice's text out of a response body. Gateways sometimes
/// answer 200 with an HTML page, which counts as a malformed response.
pub fn parse_completion(body: &str) -> Result<String> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(EngineError::ProviderFatal(format!(
            "endpoint returned HTML instead of JSON: {}",
            preview
        )));
    }

    let response: OpenAIResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        EngineError::ProviderFatal(format!(
            "Failed to parse JSON: {}. Response body: {}",
            e, preview
        ))
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| EngineError::ProviderFatal("No choices returned from API".to_string()))
}

#[async_trait]
impl CompletionProvider for ExternalProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            max_tokens = request.max_tokens,
            input_len = request.input_len(),
            "Sending completion request"
        );

        let mut builder = self.client.post(&self.endpoint).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::error!(endpoint = %self.endpoint, "Request timed out");
                EngineError::Timeout(format!("request to {} timed out", self.endpoint))
            } else if e.is_connect() {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Connection failed");
                EngineError::Provider(format!("failed to connect to {}: {}", self.endpoint, e))
            } else {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Request failed");
                EngineError::Provider(format!("request to {} failed: {}", self.endpoint, e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Provider(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let error = classify_status(status, &body);
            tracing::warn!(
                endpoint = %self.endpoint,
                status = %status,
                error = %error,
                "API returned error"
            );
            return Err(error);
        }

        let text = parse_completion(&body)?;
        tracing::debug!(chars = text.len(), "Completion received");
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatTurn;
    use crate::types::MessageType;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            EngineError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            EngineError::ProviderFatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "<html>"),
            EngineError::Provider(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            EngineError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad"),
            EngineError::ProviderFatal(_)
        ));
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"42"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "42");
    }

    #[test]
    fn test_parse_rejects_html_and_empty_choices() {
        assert!(matches!(
            parse_completion("<!DOCTYPE html><p>gateway</p>"),
            Err(EngineError::ProviderFatal(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(EngineError::ProviderFatal(_))
        ));
    }

    #[test]
    fn test_request_body_maps_roles() {
        let provider = ExternalProvider::new(&ProviderConfig::default()).unwrap();
        let request = CompletionRequest::messages(
            vec![
                ChatTurn { role: MessageType::System, content: "Be brief".into() },
                ChatTurn { role: MessageType::User, content: "Hi".into() },
            ],
            16,
        )
        .with_stop("\n\n###");

        let body = provider.request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["stop"][0], "\n\n###");
        assert_eq!(body["max_tokens"], 16);
    }
}
