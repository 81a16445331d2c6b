use async_trait::async_trait;
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::OnAlternateFailure;
use crate::error::ModelResult;
use crate::models::{
    CountTokensRequest, CountTokensResponse, EmbedContentRequest, EmbedContentResponse,
    GenerateContentRequest, GenerateContentResponse,
};
use crate::providers::ContentGenerator;
use crate::streaming::ResponseStream;
use crate::types::{ProviderId, RequestId, UserTier};

/// Where calls go first. Chosen once when the client is built.
#[derive(Clone)]
pub enum Source {
    /// Every call goes to the default provider
    Default,
    /// Calls go to `generator` first; `on_failure` decides what a failure means
    Alternate {
        generator: Arc<dyn ContentGenerator>,
        on_failure: OnAlternateFailure,
    },
}

/// Content generator that routes between an alternate provider and the default one
pub struct ModelClient {
    default: Arc<dyn ContentGenerator>,
    source: Source,
}

impl ModelClient {
    pub fn new(default: Arc<dyn ContentGenerator>, source: Source) -> Self {
        Self { default, source }
    }

    pub fn default_only(default: Arc<dyn ContentGenerator>) -> Self {
        Self::new(default, Source::Default)
    }

    pub fn with_alternate(
        default: Arc<dyn ContentGenerator>,
        alternate: Arc<dyn ContentGenerator>,
        on_failure: OnAlternateFailure,
    ) -> Self {
        Self::new(
            default,
            Source::Alternate {
                generator: alternate,
                on_failure,
            },
        )
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn uses_alternate(&self) -> bool {
        matches!(self.source, Source::Alternate { .. })
    }

    async fn dispatch<'a, T, F>(&'a self, call: &'static str, op: F) -> ModelResult<T>
    where
        F: Fn(&'a dyn ContentGenerator) -> BoxFuture<'a, ModelResult<T>>,
    {
        let default = self.default.as_ref();
        let (alternate, on_failure) = match &self.source {
            Source::Default => return observe(default, call, op(default)).await,
            Source::Alternate {
                generator,
                on_failure,
            } => (generator.as_ref(), *on_failure),
        };

        let err = match observe(alternate, call, op(alternate)).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        warn!(
            provider = %alternate.id(),
            call,
            policy = %on_failure,
            error = %err,
            "alternate provider call failed"
        );

        match on_failure {
            OnAlternateFailure::FailFast => Err(err),
            OnAlternateFailure::FallbackToDefault => {
                info!(
                    from = %alternate.id(),
                    to = %default.id(),
                    call,
                    "falling back to default provider"
                );
                counter!("llm_fallback_total", 1, "call" => call);
                observe(default, call, op(default)).await
            }
        }
    }
}

async fn observe<T>(
    generator: &dyn ContentGenerator,
    call: &'static str,
    fut: BoxFuture<'_, ModelResult<T>>,
) -> ModelResult<T> {
    let provider = generator.id().to_string();
    let start = Instant::now();
    let result = fut.await;
    histogram!("llm_request_latency_seconds", start.elapsed().as_secs_f64(), "provider" => provider.clone(), "call" => call);
    let outcome = if result.is_ok() { "success" } else { "error" };
    counter!("llm_requests_total", 1, "provider" => provider, "call" => call, "result" => outcome);
    result
}

#[async_trait]
impl ContentGenerator for ModelClient {
    fn id(&self) -> ProviderId {
        match &self.source {
            Source::Default => self.default.id(),
            Source::Alternate { generator, .. } => generator.id(),
        }
    }

    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<GenerateContentResponse> {
        self.dispatch("generate_content", |g| {
            g.generate_content(request, request_id)
        })
        .await
    }

    async fn generate_content_stream(
        &self,
        request: &GenerateContentRequest,
        request_id: &RequestId,
    ) -> ModelResult<ResponseStream> {
        self.dispatch("generate_content_stream", |g| {
            g.generate_content_stream(request, request_id)
        })
        .await
    }

    async fn count_tokens(&self, request: &CountTokensRequest) -> ModelResult<CountTokensResponse> {
        self.dispatch("count_tokens", |g| g.count_tokens(request)).await
    }

    async fn embed_content(
        &self,
        request: &EmbedContentRequest,
    ) -> ModelResult<EmbedContentResponse> {
        self.dispatch("embed_content", |g| g.embed_content(request)).await
    }

    fn user_tier(&self) -> Option<UserTier> {
        match &self.source {
            Source::Alternate { generator, .. } => {
                generator.user_tier().or_else(|| self.default.user_tier())
            }
            Source::Default => self.default.user_tier(),
        }
    }
}
