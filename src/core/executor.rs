//! Single API call execution.
//!
//! [`ApiExecutor::run`] resolves the definition named by the call context,
//! serves it from cache when possible and otherwise builds, sends and
//! transforms the backend call. Transport failures become a `500` outcome;
//! everything downstream of a completed exchange (decoding, expiry discovery)
//! degrades silently.
use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::Instrument;

use crate::{
    core::{
        cache::Refreshed,
        context::CallContext,
        definition::{ApiDefinition, PrivateTable},
        expiry::{ExpiryExtractor, TextExpiryExtractor},
        registry::ApiRegistry,
        request_builder::{ContextResolver, ParameterResolver, RequestBuilder},
        transform::{JsonMapper, TemplateMapper, transform},
    },
    ports::http_client::{BackendResponse, HttpClient, HttpClientError},
    tracing_setup,
};

/// Errors that abort a call instead of producing an outcome.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExecutorError {
    #[error("API definition '{0}' not found")]
    UnknownApi(String),
}

/// Result of a call: the response body (absent on transport failure) and the
/// status to answer with.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub body: Option<Value>,
    pub status: StatusCode,
}

impl CallOutcome {
    pub fn ok(body: Value) -> Self {
        Self {
            body: Some(body),
            status: StatusCode::OK,
        }
    }

    pub fn transport_failure() -> Self {
        Self {
            body: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A completed backend exchange and its transformed body.
struct Fetched {
    response: Value,
    backend: BackendResponse,
}

pub struct ApiExecutor {
    registry: Arc<ApiRegistry>,
    http_client: Arc<dyn HttpClient>,
    builder: RequestBuilder,
    mapper: Arc<dyn JsonMapper>,
    extractor: Arc<dyn ExpiryExtractor>,
}

impl ApiExecutor {
    /// Executor with the template mapper, context resolver and text extractor.
    pub fn new(registry: Arc<ApiRegistry>, http_client: Arc<dyn HttpClient>) -> Self {
        let mapper: Arc<dyn JsonMapper> = Arc::new(TemplateMapper);
        Self {
            registry,
            http_client,
            builder: RequestBuilder::new(Arc::new(ContextResolver), mapper.clone()),
            mapper,
            extractor: Arc::new(TextExpiryExtractor),
        }
    }

    /// Replace the mapping evaluator used for responses and mapped bodies.
    pub fn with_mapper(mut self, mapper: Arc<dyn JsonMapper>) -> Self {
        self.mapper = mapper.clone();
        self.builder = RequestBuilder::new(Arc::new(ContextResolver), mapper);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ParameterResolver>) -> Self {
        self.builder = RequestBuilder::new(resolver, self.mapper.clone());
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ExpiryExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    /// Execute the API named by `ctx` and record its result as a step result
    /// under the definition's id.
    pub async fn run(&self, ctx: &mut CallContext) -> Result<CallOutcome, ExecutorError> {
        let definition = self.registry.get(ctx.name()).ok_or_else(|| {
            tracing::error!("Failed to find API definition '{}'", ctx.name());
            ExecutorError::UnknownApi(ctx.name().to_string())
        })?;
        let privates = self.registry.privates_for(&definition);
        let span = tracing_setup::create_api_call_span(&definition.id, &ctx.call_id.to_string());

        let outcome = self
            .execute(&definition, ctx, privates)
            .instrument(span)
            .await;

        if let Some(body) = &outcome.body {
            ctx.record_step_result(definition.id.clone(), body.clone());
        }
        Ok(outcome)
    }

    async fn execute(
        &self,
        definition: &ApiDefinition,
        ctx: &mut CallContext,
        privates: Option<&PrivateTable>,
    ) -> CallOutcome {
        let Some(policy) = definition.cache.as_ref() else {
            tracing::info!("Cache not configured, calling backend");
            let outcome = match self.fetch(definition, ctx, privates).await {
                Ok(fetched) => CallOutcome::ok(fetched.response),
                Err(_) => CallOutcome::transport_failure(),
            };
            return self.log_outcome(definition, outcome);
        };

        if let Some(cached) = policy.peek().await {
            tracing::info!("Cache valid, answering from cache");
            return self.log_outcome(definition, CallOutcome::ok(cached));
        }

        let refreshed = policy
            .refresh(move || async move {
                tracing::info!("Cache invalid, refreshing from backend");
                let fetched = self.fetch(definition, ctx, privates).await?;
                let expires = self.extractor.extract(&fetched.backend, policy);
                Ok::<_, HttpClientError>(Refreshed {
                    response: fetched.response,
                    expires,
                })
            })
            .await;

        let outcome = match refreshed {
            Ok(response) => CallOutcome::ok(response),
            Err(_) => CallOutcome::transport_failure(),
        };
        self.log_outcome(definition, outcome)
    }

    async fn fetch(
        &self,
        definition: &ApiDefinition,
        ctx: &mut CallContext,
        privates: Option<&PrivateTable>,
    ) -> Result<Fetched, HttpClientError> {
        let request = self.builder.build(definition, ctx, privates);
        let backend = self.http_client.send_request(request).await.map_err(|e| {
            tracing::error!("Backend request for API '{}' failed: {}", definition.id, e);
            e
        })?;

        let raw = serde_json::from_slice::<Value>(&backend.body).unwrap_or_else(|e| {
            tracing::debug!("Backend body is not JSON ({}), continuing with null", e);
            Value::Null
        });
        let response = transform(raw, definition.response.as_ref(), self.mapper.as_ref());
        Ok(Fetched { response, backend })
    }

    fn log_outcome(&self, definition: &ApiDefinition, outcome: CallOutcome) -> CallOutcome {
        tracing::info!(
            url = %definition.url,
            status = outcome.status.as_u16(),
            "Handled API '{}'",
            definition.id
        );
        tracing::debug!("Result: {:?}", outcome.body);
        outcome
    }
}
