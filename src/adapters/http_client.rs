use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    ports::http_client::{
        BackendResponse, HttpClient, HttpClientError, HttpClientResult, OutboundRequest,
    },
    tracing_setup,
};

/// Outbound HTTP client built on Hyper with Rustls.
///
/// Responsibilities:
/// * Adds default `User-Agent` and `Accept` headers when absent
/// * Bounds the whole exchange, body included, by the configured timeout
/// * Buffers the backend response so it can be decoded and scanned for expiry
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        // Explicit provider: the process-wide default is installed by the binary.
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let tls_config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https_connector);

        tracing::info!(
            "Created backend HTTP client with a {} request timeout",
            humantime::format_duration(request_timeout)
        );
        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Inject a consistent set of headers if absent.
    fn add_common_headers(req: &mut Request<Full<Bytes>>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(concat!("apihub/", env!("CARGO_PKG_VERSION"))),
            );
        }
        if !headers.contains_key(header::ACCEPT) {
            headers.insert(
                header::ACCEPT,
                HeaderValue::from_static("application/json, */*;q=0.8"),
            );
        }
    }

    fn into_hyper_request(req: OutboundRequest) -> HttpClientResult<Request<Full<Bytes>>> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|e| HttpClientError::InvalidRequest(format!("method '{}': {e}", req.method)))?;
        let uri = req
            .url
            .parse::<Uri>()
            .map_err(|e| HttpClientError::InvalidRequest(format!("url '{}': {e}", req.url)))?;

        let host_header_val = match (uri.host(), uri.port()) {
            (Some(host), Some(port)) => HeaderValue::from_str(&format!("{host}:{}", port.as_u16())),
            (Some(host), None) => HeaderValue::from_str(host),
            (None, _) => {
                tracing::error!("Outgoing URI has no host: {}", uri);
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }
        }
        .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .version(Version::HTTP_11)
            .body(Full::new(req.body.unwrap_or_default()))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        *request.headers_mut() = req.headers;
        request.headers_mut().insert(header::HOST, host_header_val);
        Ok(request)
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> HttpClientResult<BackendResponse> {
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = self.client.request(request).await.map_err(|e| {
            tracing::Span::current().record("http.status_code", 599u16);
            HttpClientError::ConnectionError(format!("Request to {method} {uri} failed: {e}"))
        })?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| HttpClientError::BodyError(e.to_string()))?
            .to_bytes();

        Ok(BackendResponse {
            status,
            headers: parts.headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: OutboundRequest) -> HttpClientResult<BackendResponse> {
        let mut request = Self::into_hyper_request(req)?;
        Self::add_common_headers(&mut request);

        let span = tracing_setup::create_backend_span(
            &request.uri().to_string(),
            request.method().as_str(),
            request.uri().path(),
        );

        async {
            tracing::info!("Sending request: {} {}", request.method(), request.uri());
            tracing::debug!("Outgoing request headers: {:?}", request.headers());

            match timeout(self.request_timeout, self.exchange(request)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        "Backend request timed out after {}",
                        humantime::format_duration(self.request_timeout)
                    );
                    Err(HttpClientError::Timeout(self.request_timeout))
                }
            }
        }
        .instrument(span)
        .await
    }
}
