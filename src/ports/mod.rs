pub mod http_client;

pub use http_client::{
    BackendResponse, HttpClient, HttpClientError, HttpClientResult, OutboundRequest,
};
