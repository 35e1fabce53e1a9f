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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("OpenAI API key cannot be empty"));
        }

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

    /// Point the client at a different endpoint (tests, proxies).
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
            .header("Authorization", format!("Bearer {}", self.api_key))
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
impl ProviderClient for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            outcome = self.execute(request) => outcome,
        }?;

        let (content, usage) = result;
        debug!(
            model = %request.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "openai completion finished"
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
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                ProviderHealth::Degraded
            }
            Ok(_) => ProviderHealth::Down,
            Err(_) => ProviderHealth::Down,
        }
    }
}
