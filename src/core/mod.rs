pub mod cache;
pub mod context;
pub mod definition;
pub mod executor;
pub mod expiry;
pub mod registry;
pub mod request_builder;
pub mod transform;

pub use cache::CachePolicy;
pub use context::{CallContext, InboundRequest};
pub use definition::{ApiDefinition, PrivateTable};
pub use executor::{ApiExecutor, CallOutcome, ExecutorError};
pub use expiry::{ExpiryExtractor, TextExpiryExtractor, parse_expire_time};
pub use registry::ApiRegistry;
pub use request_builder::{ContextResolver, ParameterResolver, RequestBuilder};
pub use transform::{JsonMapper, TemplateMapper, transform};
