//! Declarative API definitions.
//!
//! These types map directly to the per-API JSON files found under the
//! configured definition directory. Everything here is immutable once loaded;
//! the only runtime state hanging off a definition is the cache state embedded
//! in [`CachePolicy`], which is private to the cache engine.
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::core::cache::CachePolicy;

/// Step-result name under which the caller's own body is published.
pub const ORIGIN_NAME: &str = "origin";
/// Pseudo step-result name exposing the values resolved by the current build.
pub const VARS_NAME: &str = "vars";

/// MIME type used for `form` request bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// MIME type used for `json` request bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

fn default_method() -> String {
    "GET".to_string()
}

/// One exposed API: where to send the outbound call and how to shape it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    /// Name the API is exposed under. Defaults to the definition's file stem.
    #[serde(default)]
    pub id: String,
    /// Target URL of the backend call.
    pub url: String,
    /// HTTP method of the backend call.
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub request_content_type: RequestContentType,
    /// Parameter rules, applied in declaration order.
    #[serde(default)]
    pub parameters: Vec<ParameterRule>,
    /// Mapping-based POST body construction. Takes precedence over
    /// `body`-targeted parameters when present.
    #[serde(default)]
    pub request_body: Option<RequestBodyRule>,
    #[serde(default)]
    pub response: Option<ResponseRule>,
    #[serde(default)]
    pub cache: Option<CachePolicy>,
    /// Name of the private value store parameters may read from.
    #[serde(default)]
    pub privates: Option<String>,
}

impl ApiDefinition {
    /// Minimal definition calling `url` with `method`.
    pub fn new(id: impl Into<String>, url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: method.into(),
            request_content_type: RequestContentType::None,
            parameters: Vec::new(),
            request_body: None,
            response: None,
            cache: None,
            privates: None,
        }
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }
}

/// How the outbound request body is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum RequestContentType {
    /// No body is sent.
    #[default]
    None,
    /// URL-encoded form fields.
    Form,
    /// A JSON document.
    Json,
    /// Forward the caller's own content type and body.
    Origin,
    /// Any other literal MIME type, used verbatim.
    Other(String),
}

impl From<String> for RequestContentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "none" => Self::None,
            "form" => Self::Form,
            "json" => Self::Json,
            ORIGIN_NAME => Self::Origin,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for RequestContentType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl RequestContentType {
    pub fn expects_body(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// The `Content-Type` header value implied by this variant, if it is fixed.
    /// `Origin` depends on the inbound request and yields `None`.
    pub fn mime(&self) -> Option<&str> {
        match self {
            Self::Form => Some(FORM_CONTENT_TYPE),
            Self::Json => Some(JSON_CONTENT_TYPE),
            Self::Other(mime) => Some(mime.as_str()),
            Self::None | Self::Origin => None,
        }
    }
}

/// Declarative instruction resolving one outbound value.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterRule {
    #[serde(default)]
    pub name: String,
    /// Literal value. Wins over `from` when non-empty.
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub from: Option<ParameterSource>,
    #[serde(rename = "in", default)]
    pub target: ParameterTarget,
}

impl ParameterRule {
    pub fn literal(name: impl Into<String>, value: impl Into<String>, target: ParameterTarget) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            from: None,
            target,
        }
    }

    pub fn sourced(
        name: impl Into<String>,
        kind: SourceKind,
        key: impl Into<String>,
        target: ParameterTarget,
    ) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            from: Some(ParameterSource {
                kind,
                name: key.into(),
            }),
            target,
        }
    }
}

/// Where a parameter value is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterSource {
    #[serde(rename = "from")]
    pub kind: SourceKind,
    /// Key, header name or dotted path, depending on `kind`.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// `name` itself is the value.
    #[serde(alias = "static")]
    Literal,
    /// Query parameter of the inbound request.
    Query,
    /// Header of the inbound request.
    Header,
    /// Dotted path into a prior step result (`vars.<name>` reads the current build).
    #[serde(rename = "StepResult", alias = "stepResult", alias = "step")]
    StepResult,
    /// Private value store of the definition.
    Private,
    /// Dotted path into the caller's body.
    Origin,
}

/// Where a resolved parameter value is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterTarget {
    Query,
    Header,
    Body,
    /// Only published into the call context; nothing is sent.
    Vars,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Builds a POST body by mapping the caller's body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBodyRule {
    #[serde(default)]
    pub content_type: RequestContentType,
    /// Mapping rules applied to the caller's body. The body is forwarded as-is
    /// when absent.
    #[serde(default)]
    pub json: Option<Value>,
}

/// Shapes the backend's JSON response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseRule {
    #[serde(default)]
    pub json: Option<Value>,
}

/// Resolved private values of one store.
pub type PrivateTable = HashMap<String, String>;

/// On-disk shape of a private value store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrivateDefinition {
    #[serde(default)]
    pub privates: Vec<PrivateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateEntry {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl PrivateDefinition {
    pub fn into_table(self) -> PrivateTable {
        self.privates
            .into_iter()
            .map(|entry| (entry.name, entry.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expiry::{ExpiryFormat, ExpiryLocation};

    #[test]
    fn deserializes_full_definition() {
        let def: ApiDefinition = serde_json::from_value(serde_json::json!({
            "id": "weather",
            "url": "http://backend.local/weather",
            "method": "POST",
            "requestContentType": "form",
            "parameters": [
                { "name": "city", "from": { "from": "query", "name": "c" }, "in": "query" },
                { "name": "key", "from": { "from": "private", "name": "appKey" }, "in": "header" },
                { "name": "tmp", "from": { "from": "StepResult", "name": "vars.city" }, "in": "vars" },
                { "name": "fixed", "value": "1", "in": "body" }
            ],
            "response": { "json": { "temp": "{{data.temp}}" } },
            "cache": {
                "from": { "from": "header", "name": "Set-Cookie.expires" },
                "format": "Mon, 02-Jan-06 15:04:05 MST"
            },
            "privates": "weather_keys"
        }))
        .unwrap();

        assert_eq!(def.request_content_type, RequestContentType::Form);
        assert!(def.is_post());
        assert_eq!(def.parameters.len(), 4);
        assert_eq!(
            def.parameters[0].from.as_ref().unwrap().kind,
            SourceKind::Query
        );
        assert_eq!(def.parameters[2].target, ParameterTarget::Vars);
        assert_eq!(
            def.parameters[2].from.as_ref().unwrap().kind,
            SourceKind::StepResult
        );
        let cache = def.cache.as_ref().unwrap();
        assert_eq!(
            cache.from.as_ref().unwrap().location,
            ExpiryLocation::Header
        );
        assert!(matches!(cache.format, Some(ExpiryFormat::Layout(_))));
        assert_eq!(def.privates.as_deref(), Some("weather_keys"));
    }

    #[test]
    fn content_type_variants() {
        assert_eq!(RequestContentType::from(""), RequestContentType::None);
        assert_eq!(RequestContentType::from("origin"), RequestContentType::Origin);
        assert_eq!(
            RequestContentType::from("text/plain"),
            RequestContentType::Other("text/plain".to_string())
        );
        assert!(!RequestContentType::None.expects_body());
        assert_eq!(RequestContentType::Json.mime(), Some(JSON_CONTENT_TYPE));
        assert_eq!(RequestContentType::Origin.mime(), None);
    }

    #[test]
    fn unknown_target_is_tolerated() {
        let rule: ParameterRule =
            serde_json::from_str(r#"{ "name": "x", "value": "1", "in": "cookie" }"#).unwrap();
        assert_eq!(rule.target, ParameterTarget::Unknown);
    }

    #[test]
    fn minimal_definition_defaults_to_get() {
        let def: ApiDefinition = serde_json::from_str(r#"{ "url": "http://a.b/c" }"#).unwrap();
        assert_eq!(def.method, "GET");
        assert!(def.cache.is_none());
        assert!(def.parameters.is_empty());
    }

    #[test]
    fn private_definition_into_table() {
        let def: PrivateDefinition = serde_json::from_str(
            r#"{ "privates": [ { "name": "appKey", "value": "k-1" }, { "name": "secret", "value": "s" } ] }"#,
        )
        .unwrap();
        let table = def.into_table();
        assert_eq!(table.get("appKey").map(String::as_str), Some("k-1"));
        assert_eq!(table.len(), 2);
    }
}
