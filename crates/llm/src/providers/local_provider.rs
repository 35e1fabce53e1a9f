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

/// Local inference endpoint (Ollama, LM Studio, vLLM) speaking the
/// OpenAI-compatible chat-completions format. No authentication; the
/// credential variable carries the endpoint URL instead.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl LocalProvider {
    pub fn new(base_url: String) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(anyhow!("local endpoint URL cannot be empty"));
        }

        // Local models on CPU can be slow.
        let timeout = Duration::from_secs(120);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to create HTTP client: {e}"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    async fn execute(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, TokenUsage), ProviderError> {
        #[derive(Serialize)]
        struct WireRequest<'a> {
            model: &'a str,
            messages: Vec<WireMessage<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
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
            choices: Vec<WireChoice>,
            usage: Option<WireUsage>,
        }

        #[derive(Deserialize)]
        struct WireChoice {
            message: WireResponseMessage,
        }

        #[derive(Deserialize)]
        struct WireResponseMessage {
            content: String,
        }

        #[derive(Deserialize)]
        struct WireUsage {
            prompt_tokens: u64,
            completion_tokens: u64,
        }

        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = WireRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
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
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| ProviderError::InvalidResponse("empty choices".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_else(|| TokenUsage::estimated(&request.prompt, &content));

        Ok((content, usage))
    }
}

#[async_trait]
impl ProviderClient for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
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
            elapsed_ms = started.elapsed().as_millis() as u64,
            "local completion finished"
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
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                if started.elapsed() > DEGRADED_PROBE_LATENCY {
                    ProviderHealth::Degraded
                } else {
                    ProviderHealth::Healthy
                }
            }
            Ok(resp) if resp.status().is_server_error() => ProviderHealth::Degraded,
            Ok(_) => ProviderHealth::Down,
            Err(_) => ProviderHealth::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usage_is_estimated_when_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"local says hi"}}]}"#)
            .create_async()
            .await;

        let provider = LocalProvider::new(server.url()).unwrap();
        let request = CompletionRequest::new("llama3:8b", "hello there");
        let response = provider
            .generate(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.content, "local says hi");
        assert!(response.usage.input_tokens > 0);
        assert!(response.usage.output_tokens > 0);
    }

    #[tokio::test]
    async fn health_probe_hits_models_endpoint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let provider = LocalProvider::new(server.url()).unwrap();
        assert_eq!(provider.health_check().await, ProviderHealth::Healthy);
    }
}
