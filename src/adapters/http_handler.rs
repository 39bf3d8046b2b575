use std::sync::Arc;

use axum::{
    Router,
    body::{Body as AxumBody, to_bytes},
    extract::{Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::core::{
    context::{CallContext, InboundRequest},
    executor::ApiExecutor,
};

/// Inbound request bodies larger than this are not read; the call gets an
/// empty origin.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// HTTP handler exposing every registered API under `/api`.
pub struct HttpHandler {
    executor: Arc<ApiExecutor>,
}

impl HttpHandler {
    pub fn new(executor: Arc<ApiExecutor>) -> Self {
        Self { executor }
    }

    /// Routes: `/api/{id}`, plus `/api/{bucket}/{id}` when buckets are enabled.
    pub fn router(self: Arc<Self>, bucket_enabled: bool) -> Router {
        let mut router = Router::new().route("/api/{id}", any(api));
        if bucket_enabled {
            router = router.route("/api/{bucket}/{id}", any(bucket_api));
        }
        router.layer(TraceLayer::new_for_http()).with_state(self)
    }

    /// Execute the API `name` for one inbound request. The request body, when
    /// it is JSON, becomes the call's `origin` step result; anything else,
    /// including a body that cannot be read, is replaced by an empty object.
    pub async fn handle_request(&self, name: String, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        tracing::info!("Handling {} request for API '{}'", parts.method, name);

        let origin = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => parse_origin(&bytes),
            Err(e) => {
                tracing::warn!("Failed to read request body, using an empty origin: {}", e);
                json!({})
            }
        };

        let inbound = InboundRequest::new(parts.headers, parts.uri.query());
        let mut ctx = CallContext::new(name, origin, inbound);

        match self.executor.run(&mut ctx).await {
            Ok(outcome) => json_response(outcome.status, &outcome.body.unwrap_or(Value::Null)),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": e.to_string() }),
            ),
        }
    }
}

async fn api(
    State(handler): State<Arc<HttpHandler>>,
    Path(id): Path<String>,
    req: Request,
) -> Response {
    handler.handle_request(id, req).await
}

async fn bucket_api(
    State(handler): State<Arc<HttpHandler>>,
    Path((bucket, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    handler.handle_request(format!("{bucket}/{id}"), req).await
}

fn parse_origin(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return json!({});
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Request body is not JSON, using an empty origin: {}", e);
            json!({})
        }
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    let text = match serde_json::to_string_pretty(body) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        AxumBody::from(text),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use hyper::HeaderMap;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        core::{
            definition::{ApiDefinition, ParameterRule, ParameterTarget, SourceKind},
            registry::ApiRegistry,
        },
        ports::http_client::{BackendResponse, HttpClient, HttpClientResult, OutboundRequest},
    };

    /// Echoes the outbound URL back as JSON.
    struct EchoBackend;

    #[async_trait]
    impl HttpClient for EchoBackend {
        async fn send_request(&self, req: OutboundRequest) -> HttpClientResult<BackendResponse> {
            Ok(BackendResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(json!({ "url": req.url }).to_string()),
            })
        }
    }

    fn app(bucket_enabled: bool) -> Router {
        let mut registry = ApiRegistry::new();
        let mut search = ApiDefinition::new("search", "http://backend/search", "GET");
        search.parameters = vec![
            ParameterRule::sourced("q", SourceKind::Query, "term", ParameterTarget::Query),
            ParameterRule::sourced("user", SourceKind::Origin, "user", ParameterTarget::Query),
        ];
        registry.insert_api(search);
        registry.insert_api(ApiDefinition::new("shop/items", "http://backend/items", "GET"));

        let executor = ApiExecutor::new(Arc::new(registry), Arc::new(EchoBackend));
        Arc::new(HttpHandler::new(Arc::new(executor))).router(bucket_enabled)
    }

    async fn call(app: Router, req: Request) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn query_and_origin_reach_backend() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/api/search?term=rust")
            .body(AxumBody::from(r#"{"user":"ann"}"#))
            .unwrap();
        let (status, body) = call(app(false), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "url": "http://backend/search?q=rust&user=ann" }));
    }

    #[tokio::test]
    async fn non_json_origin_is_empty() {
        let req = http::Request::builder()
            .uri("/api/search?term=x")
            .body(AxumBody::from("not json"))
            .unwrap();
        let (status, body) = call(app(false), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "url": "http://backend/search?q=x&user=" }));
    }

    #[tokio::test]
    async fn oversized_origin_is_empty() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/api/search?term=big")
            .body(AxumBody::from(vec![b' '; MAX_BODY_BYTES + 1]))
            .unwrap();
        let (status, body) = call(app(false), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "url": "http://backend/search?q=big&user=" }));
    }

    #[tokio::test]
    async fn unknown_api_is_500() {
        let req = http::Request::builder()
            .uri("/api/nope")
            .body(AxumBody::empty())
            .unwrap();
        let (status, body) = call(app(false), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn bucket_route_only_when_enabled() {
        let req = || {
            http::Request::builder()
                .uri("/api/shop/items")
                .body(AxumBody::empty())
                .unwrap()
        };

        let (status, body) = call(app(true), req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "url": "http://backend/items" }));

        let response = app(false).oneshot(req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn origin_parsing() {
        assert_eq!(parse_origin(b""), json!({}));
        assert_eq!(parse_origin(b" \n"), json!({}));
        assert_eq!(parse_origin(b"[1,2]"), json!([1, 2]));
        assert_eq!(parse_origin(b"{oops"), json!({}));
    }
}
