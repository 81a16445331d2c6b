use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{ModelError, ModelResult};
use crate::models::{
    CountTokensRequest, CountTokensResponse, EmbedContentRequest, EmbedContentResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig,
};
use crate::retry::RetryPolicy;
use crate::streaming::{self, ByteStream, ChunkStream, ResponseStream};
use crate::translate;
use crate::types::{ProviderId, RequestId, UserTier};
use crate::utils;
use crate::wire::{ChatRequest, ChatResponse};

/// Operations every content generation backend provides
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<GenerateContentResponse>;

    /// Each call issues a new network request; the returned stream is finite
    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<ResponseStream>;

    async fn count_tokens(&self, request: &CountTokensRequest) -> ModelResult<CountTokensResponse>;

    async fn embed_content(
        &self,
        request: &EmbedContentRequest,
    ) -> ModelResult<EmbedContentResponse>;

    /// Account tier reported by the provider, if any
    fn user_tier(&self) -> Option<UserTier> {
        None
    }
}

/// Content generator backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatibleProvider {
    id: ProviderId,
    config: Arc<ProviderConfig>,
    api_base: String,
    client: Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        Self {
            id: ProviderId::new(ProviderId::CUSTOM_LLM),
            api_base: utils::api_base(config.endpoint()),
            retry: RetryPolicy::from_config(&config),
            timeout: config.timeout(),
            client: Client::new(),
            config,
        }
    }

    pub fn with_id(mut self, id: ProviderId) -> Self {
        self.id = id;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for unary calls, and for stream headers and each stream read.
    /// Defaults to the config's timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn chat_request(&self, request: &GenerateContentRequest) -> ChatRequest {
        let defaults = GenerationConfig {
            temperature: Some(self.config.temperature()),
            max_tokens: Some(self.config.max_tokens()),
            top_p: Some(self.config.top_p()),
        };
        translate::to_chat_request(request, self.config.model_name(), &defaults)
    }

    async fn check_status(resp: Response) -> ModelResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ModelError::transport(Some(status), body))
    }

    async fn complete(&self, body: &ChatRequest) -> ModelResult<GenerateContentResponse> {
        let timeout = self.timeout;
        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::from_reqwest(e, timeout))?;
        let resp = Self::check_status(resp).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::from_reqwest(e, timeout))?;
        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::Translation(format!("invalid response body: {}", e)))?;
        translate::from_chat_response(chat)
    }

    async fn open_stream(&self, body: &ChatRequest) -> ModelResult<ChunkStream> {
        let timeout = self.timeout;
        let send = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key())
            .json(body)
            .send();
        let resp = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| ModelError::Timeout(timeout))?
            .map_err(|e| ModelError::from_reqwest(e, timeout))?;
        let resp = Self::check_status(resp).await?;
        let bytes: ByteStream = Box::pin(
            resp.bytes_stream()
                .map(move |read| read.map_err(|e| ModelError::from_reqwest(e, timeout))),
        );
        Ok(ChunkStream::new(
            self.id.clone(),
            streaming::with_idle_timeout(bytes, timeout),
        ))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiCompatibleProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<GenerateContentResponse> {
        let body = self.chat_request(request).with_stream(false);
        debug!(
            provider = %self.id,
            request_id = %request_id,
            model = %self.config.model_name(),
            messages = body.messages.len(),
            "sending chat completion"
        );
        self.retry
            .execute("generate_content", || self.complete(&body))
            .await
            .map_err(|e| e.in_call(self.id.as_str(), "generate_content"))
    }

    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<ResponseStream> {
        if !self.config.stream_enabled() {
            debug!(provider = %self.id, request_id = %request_id, "streaming disabled, using unary call");
            let body = self.chat_request(request).with_stream(false);
            let result = self
                .retry
                .execute("generate_content_stream", || self.complete(&body))
                .await
                .map_err(|e| e.in_call(self.id.as_str(), "generate_content_stream"))?;
            return Ok(Box::pin(stream::once(async move { Ok::<_, ModelError>(result) })));
        }

        let body = self.chat_request(request).with_stream(true);
        debug!(
            provider = %self.id,
            request_id = %request_id,
            model = %self.config.model_name(),
            messages = body.messages.len(),
            "opening chat completion stream"
        );
        let chunks = self
            .retry
            .execute("generate_content_stream", || self.open_stream(&body))
            .await
            .map_err(|e| e.in_call(self.id.as_str(), "generate_content_stream"))?;

        let id = self.id.clone();
        Ok(Box::pin(chunks.map(move |chunk| {
            chunk.map_err(|e| e.in_call(id.as_str(), "generate_content_stream"))
        })))
    }

    async fn count_tokens(&self, request: &CountTokensRequest) -> ModelResult<CountTokensResponse> {
        let text = translate::contents_text(&request.contents);
        Ok(CountTokensResponse {
            total_tokens: utils::estimate_tokens(&text),
        })
    }

    async fn embed_content(
        &self,
        _request: &EmbedContentRequest,
    ) -> ModelResult<EmbedContentResponse> {
        Err(ModelError::UnsupportedOperation(
            "the chat completions protocol has no embeddings endpoint".to_string(),
        )
        .in_call(self.id.as_str(), "embed_content"))
    }
}
