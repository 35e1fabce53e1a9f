use super::{
    classify_transport_error, CompletionRequest, CompletionResponse, ProviderClient,
    ProviderHealth, TokenUsage, DEGRADED_PROBE_LATENCY,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use council_core::{ProviderError, ProviderKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("Anthropic API key cannot be empty"));
        }

        // Anthropic tends to be slower on long generations.
        let timeout = Duration::from_secs(90);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to create HTTP client: {e}"))?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn execute(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, TokenUsage), ProviderError> {
        #[derive(Serialize)]
        struct WireRequest<'a> {
            model: &'a str,
            max_tokens: u32,
            messages: Vec<WireMessage<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
        }

        #[derive(Serialize)]
        struct WireMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct WireResponse {
            content: Vec<WireContent>,
            usage: Option<WireUsage>,
        }

        #[derive(Deserialize)]
        struct WireContent {
            text: String,
        }

        #[derive(Deserialize)]
        struct WireUsage {
            input_tokens: u64,
            output_tokens: u64,
        }

        let body = WireRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![WireMessage {
                role: "user",
                content: &request.prompt,
            }],
            system: request.system_prompt.as_deref(),
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let summary: String = text.chars().take(200).collect();
            return Err(ProviderError::from_status(status.as_u16(), summary));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| ProviderError::InvalidResponse("empty content".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_else(|| TokenUsage::estimated(&request.prompt, &content));

        Ok((content, usage))
    }
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();

        let (content, usage) = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            outcome = self.execute(request) => outcome,
        }?;

        debug!(
            model = %request.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "anthropic completion finished"
        );

        Ok(CompletionResponse {
            content,
            usage,
            model: request.model.clone(),
            elapsed: started.elapsed(),
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let started = Instant::now();
        let probe = CompletionRequest::new("claude-3-haiku-20240307", "ping")
            .with_parameters(Some(1), Some(0.0));
        let result = self.execute(&probe).await;

        match result {
            Ok(_) => {
                if started.elapsed() > DEGRADED_PROBE_LATENCY {
                    ProviderHealth::Degraded
                } else {
                    ProviderHealth::Healthy
                }
            }
            Err(ProviderError::RateLimited { .. }) | Err(ProviderError::Server { .. }) => {
                ProviderHealth::Degraded
            }
            Err(_) => ProviderHealth::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_parses_content_blocks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                r#"{"content":[{"text":"careful answer"}],
                    "usage":{"input_tokens":20,"output_tokens":5}}"#,
            )
            .create_async()
            .await;

        let provider = AnthropicProvider::new("ak".into())
            .unwrap()
            .with_base_url(&server.url());
        let request = CompletionRequest::new("claude-3-5-sonnet-20241022", "think hard");
        let response = provider
            .generate(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.content, "careful answer");
        assert_eq!(response.usage.input_tokens, 20);
    }

    #[tokio::test]
    async fn overload_maps_to_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(529)
            .with_body(r#"{"error":{"type":"overloaded_error"}}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::new("ak".into())
            .unwrap()
            .with_base_url(&server.url());
        let request = CompletionRequest::new("claude-3-5-sonnet-20241022", "x");
        let err = provider
            .generate(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Server { status: 529, .. }));
    }
}
