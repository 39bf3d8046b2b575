//! Outbound request construction.
//!
//! A definition's parameter rules are resolved in declaration order against
//! the call context and placed into the query string, the headers or the
//! body. Two body strategies exist:
//!
//! * **flat parameters**: `body`-targeted rules feed the body; `form` collects
//!   every field while other content types keep the first value and drop the
//!   rest with a warning
//! * **mapped body**: a `requestBody` rule maps the caller's body into the
//!   POST body; `body`-targeted rules are then ignored
//!
//! Building never fails: a definition with a malformed URL or method yields a
//! request that is rejected when sent.
use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use hyper::{
    HeaderMap,
    header::{CONTENT_TYPE, HeaderName, HeaderValue},
};
use serde_json::Value;
use url::Url;

use crate::{
    core::{
        context::CallContext,
        definition::{
            ApiDefinition, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, ParameterRule, ParameterSource,
            ParameterTarget, PrivateTable, RequestBodyRule, RequestContentType, SourceKind,
        },
        transform::{JsonMapper, lookup_path, value_text},
    },
    ports::http_client::OutboundRequest,
};

/// Resolves the value of a parameter from its declared source.
pub trait ParameterResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        source: &ParameterSource,
        ctx: &CallContext,
        privates: Option<&PrivateTable>,
    ) -> Option<String>;
}

/// Resolver reading the inbound request, prior step results, the caller's body
/// and the definition's private store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextResolver;

impl ParameterResolver for ContextResolver {
    fn resolve(
        &self,
        source: &ParameterSource,
        ctx: &CallContext,
        privates: Option<&PrivateTable>,
    ) -> Option<String> {
        match source.kind {
            SourceKind::Literal => Some(source.name.clone()),
            SourceKind::Query => ctx.inbound().query(&source.name).map(str::to_string),
            SourceKind::Header => ctx.inbound().header(&source.name).map(str::to_string),
            SourceKind::StepResult => ctx.lookup(&source.name).as_ref().and_then(value_text),
            SourceKind::Private => privates.and_then(|table| table.get(&source.name)).cloned(),
            SourceKind::Origin => lookup_path(ctx.origin(), &source.name).and_then(value_text),
        }
    }
}

/// Body being assembled while rules are applied.
enum PendingBody {
    /// No body is sent.
    Absent,
    Form(BTreeMap<String, Vec<String>>),
    /// First accepted value; later ones are dropped.
    Literal(Option<String>),
    /// The caller's body is forwarded.
    Origin,
    /// A `requestBody` rule produces the body.
    Mapped,
}

impl PendingBody {
    fn push(&mut self, name: &str, value: String) {
        match self {
            Self::Form(fields) => fields.entry(name.to_string()).or_default().push(value),
            Self::Literal(slot @ None) => *slot = Some(value),
            Self::Literal(Some(kept)) => tracing::warn!(
                "Conflicting body values, keeping '{}' and dropping '{}' from parameter '{}'",
                kept,
                value,
                name
            ),
            Self::Absent | Self::Origin | Self::Mapped => {
                tracing::info!("Refusing to set body from parameter '{}'", name)
            }
        }
    }

    fn finish(self, ctx: &CallContext) -> Option<Bytes> {
        match self {
            Self::Form(fields) => Some(Bytes::from(form_encode(&fields))),
            Self::Literal(value) => Some(Bytes::from(value.unwrap_or_default())),
            Self::Origin => Some(Bytes::from(ctx.origin().to_string())),
            Self::Absent | Self::Mapped => None,
        }
    }
}

/// Builds [`OutboundRequest`]s from definitions.
#[derive(Clone)]
pub struct RequestBuilder {
    resolver: Arc<dyn ParameterResolver>,
    mapper: Arc<dyn JsonMapper>,
}

impl RequestBuilder {
    pub fn new(resolver: Arc<dyn ParameterResolver>, mapper: Arc<dyn JsonMapper>) -> Self {
        Self { resolver, mapper }
    }

    /// Build the outbound request for `definition`.
    ///
    /// Every resolved value is published into the context's vars while the
    /// build runs, so later rules can read it as `vars.<name>`; the vars are
    /// cleared before returning.
    pub fn build(
        &self,
        definition: &ApiDefinition,
        ctx: &mut CallContext,
        privates: Option<&PrivateTable>,
    ) -> OutboundRequest {
        let content_type = &definition.request_content_type;
        let mapped = definition
            .request_body
            .as_ref()
            .filter(|_| definition.is_post());

        let mut headers = HeaderMap::new();
        let mut body = match (mapped, content_type) {
            (Some(_), _) => PendingBody::Mapped,
            (None, RequestContentType::None) => PendingBody::Absent,
            (None, RequestContentType::Form) => PendingBody::Form(BTreeMap::new()),
            (None, RequestContentType::Json | RequestContentType::Other(_)) => {
                PendingBody::Literal(None)
            }
            (None, RequestContentType::Origin) => PendingBody::Origin,
        };
        if mapped.is_none() {
            let mime = match content_type {
                RequestContentType::Origin => ctx.inbound().content_type(),
                other => other.mime(),
            };
            if let Some(mime) = mime {
                insert_header(&mut headers, CONTENT_TYPE.as_str(), mime);
            }
        }

        let mut url = match Url::parse(&definition.url) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("API '{}' has an invalid url '{}': {}", definition.id, definition.url, e);
                None
            }
        };
        let mut query = url.as_ref().map(query_pairs).unwrap_or_default();

        for rule in &definition.parameters {
            if rule.name.is_empty() {
                tracing::debug!("Skipping parameter rule without a name");
                continue;
            }
            let value = self.resolve_value(rule, ctx, privates);
            ctx.set_var(rule.name.clone(), value.clone());

            match rule.target {
                ParameterTarget::Query => {
                    query.insert(rule.name.clone(), vec![value]);
                }
                ParameterTarget::Header => insert_header(&mut headers, &rule.name, &value),
                ParameterTarget::Body => body.push(&rule.name, value),
                ParameterTarget::Vars => {}
                ParameterTarget::Unknown => {
                    tracing::warn!("Parameter '{}' has an unknown target, value ignored", rule.name)
                }
            }
            tracing::debug!("Parameter '{}' placed in {:?}", rule.name, rule.target);
        }

        if let Some(url) = url.as_mut() {
            encode_query(url, &query);
        }

        let body = match mapped {
            Some(rule) => Some(self.mapped_body(rule, ctx, &mut headers)),
            None if definition.is_post() => body.finish(ctx),
            None => None,
        };

        ctx.clear_vars();

        OutboundRequest {
            method: definition.method.clone(),
            url: url.map_or_else(|| definition.url.clone(), String::from),
            headers,
            body,
        }
    }

    fn resolve_value(
        &self,
        rule: &ParameterRule,
        ctx: &CallContext,
        privates: Option<&PrivateTable>,
    ) -> String {
        if !rule.value.is_empty() {
            return rule.value.clone();
        }
        rule.from
            .as_ref()
            .and_then(|source| self.resolver.resolve(source, ctx, privates))
            .unwrap_or_default()
    }

    fn mapped_body(&self, rule: &RequestBodyRule, ctx: &CallContext, headers: &mut HeaderMap) -> Bytes {
        let mapped = match &rule.json {
            Some(rules) => self.mapper.apply(ctx.origin(), rules),
            None => ctx.origin().clone(),
        };

        match &rule.content_type {
            RequestContentType::Form => {
                insert_header(headers, CONTENT_TYPE.as_str(), FORM_CONTENT_TYPE);
                let mut fields = BTreeMap::new();
                if let Value::Object(object) = &mapped {
                    for (key, value) in object {
                        if let Some(text) = value_text(value) {
                            fields.insert(key.clone(), vec![text]);
                        }
                    }
                } else {
                    tracing::warn!("Mapped form body is not an object, sending it empty");
                }
                Bytes::from(form_encode(&fields))
            }
            RequestContentType::Other(mime) => {
                insert_header(headers, CONTENT_TYPE.as_str(), mime);
                Bytes::from(mapped.to_string())
            }
            RequestContentType::None | RequestContentType::Json | RequestContentType::Origin => {
                insert_header(headers, CONTENT_TYPE.as_str(), JSON_CONTENT_TYPE);
                Bytes::from(mapped.to_string())
            }
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!("Skipping invalid header '{}: {}'", name, value),
    }
}

fn query_pairs(url: &Url) -> BTreeMap<String, Vec<String>> {
    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        pairs.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    pairs
}

fn flatten(fields: &BTreeMap<String, Vec<String>>) -> impl Iterator<Item = (&str, &str)> {
    fields
        .iter()
        .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
}

/// Replace the URL's query with `query`, keys in sorted order.
fn encode_query(url: &mut Url, query: &BTreeMap<String, Vec<String>>) {
    if query.is_empty() {
        url.set_query(None);
        return;
    }
    url.query_pairs_mut().clear().extend_pairs(flatten(query));
}

fn form_encode(fields: &BTreeMap<String, Vec<String>>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(flatten(fields))
        .finish()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;
    use crate::core::{context::InboundRequest, transform::TemplateMapper};

    fn builder() -> RequestBuilder {
        RequestBuilder::new(Arc::new(ContextResolver), Arc::new(TemplateMapper))
    }

    fn context(origin: Value, headers: &[(&'static str, &'static str)], query: &str) -> CallContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        CallContext::new("test", origin, InboundRequest::new(map, Some(query)))
    }

    fn definition(method: &str, content_type: &str, parameters: Vec<ParameterRule>) -> ApiDefinition {
        let mut def = ApiDefinition::new("test", "http://backend.local/v1/items", method);
        def.request_content_type = RequestContentType::from(content_type);
        def.parameters = parameters;
        def
    }

    fn form_fields(body: &[u8]) -> HashSet<(String, String)> {
        url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn form_body_collects_every_field() {
        let def = definition(
            "POST",
            "form",
            vec![
                ParameterRule::literal("a", "1", ParameterTarget::Body),
                ParameterRule::literal("b", "2", ParameterTarget::Body),
            ],
        );
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, None);

        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), FORM_CONTENT_TYPE);
        let expected: HashSet<_> = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(form_fields(req.body.as_ref().unwrap()), expected);
    }

    #[test]
    fn json_body_keeps_first_value() {
        let def = definition(
            "POST",
            "json",
            vec![
                ParameterRule::literal("first", r#"{"keep":true}"#, ParameterTarget::Body),
                ParameterRule::literal("second", r#"{"dropped":true}"#, ParameterTarget::Body),
            ],
        );
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, None);

        let body = req.body_text().unwrap();
        assert_eq!(body, r#"{"keep":true}"#);
        assert!(!body.contains("dropped"));
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);
    }

    #[test]
    fn query_parameters_overwrite_and_sort() {
        let mut def = definition(
            "GET",
            "none",
            vec![
                ParameterRule::sourced("city", SourceKind::Query, "c", ParameterTarget::Query),
                ParameterRule::literal("a", "new", ParameterTarget::Query),
            ],
        );
        def.url = "http://backend.local/v1/items?z=0&a=old".to_string();
        let mut ctx = context(json!({}), &[], "c=New%20York");
        let req = builder().build(&def, &mut ctx, None);

        assert_eq!(req.url, "http://backend.local/v1/items?a=new&city=New+York&z=0");
        assert!(req.body.is_none());
    }

    #[test]
    fn headers_from_inbound_request() {
        let def = definition(
            "GET",
            "none",
            vec![ParameterRule::sourced(
                "Authorization",
                SourceKind::Header,
                "x-token",
                ParameterTarget::Header,
            )],
        );
        let mut ctx = context(json!({}), &[("x-token", "Bearer abc")], "");
        let req = builder().build(&def, &mut ctx, None);
        assert_eq!(req.headers.get("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn vars_feed_later_rules_and_are_cleared() {
        let def = definition(
            "GET",
            "none",
            vec![
                ParameterRule::sourced("city", SourceKind::Origin, "where.city", ParameterTarget::Vars),
                ParameterRule::sourced("q", SourceKind::StepResult, "vars.city", ParameterTarget::Query),
            ],
        );
        let mut ctx = context(json!({"where": {"city": "Paris"}}), &[], "");
        let req = builder().build(&def, &mut ctx, None);

        assert_eq!(req.url, "http://backend.local/v1/items?q=Paris");
        assert!(ctx.vars().is_empty());
    }

    #[test]
    fn private_values_and_literal_precedence() {
        let privates = PrivateTable::from([("appKey".to_string(), "secret-1".to_string())]);
        let mut literal_wins =
            ParameterRule::sourced("fixed", SourceKind::Private, "appKey", ParameterTarget::Query);
        literal_wins.value = "literal".to_string();
        let def = definition(
            "GET",
            "none",
            vec![
                ParameterRule::sourced("key", SourceKind::Private, "appKey", ParameterTarget::Query),
                literal_wins,
            ],
        );
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, Some(&privates));
        assert_eq!(req.url, "http://backend.local/v1/items?fixed=literal&key=secret-1");
    }

    #[test]
    fn missing_sources_resolve_to_empty() {
        let def = definition(
            "GET",
            "none",
            vec![ParameterRule::sourced("key", SourceKind::Private, "appKey", ParameterTarget::Query)],
        );
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, None);
        assert_eq!(req.url, "http://backend.local/v1/items?key=");
    }

    #[test]
    fn origin_passthrough_forwards_body_and_content_type() {
        let def = definition(
            "POST",
            "origin",
            vec![ParameterRule::literal("ignored", "x", ParameterTarget::Body)],
        );
        let mut ctx = context(
            json!({"k": 1}),
            &[("content-type", "application/json; charset=utf-8")],
            "",
        );
        let req = builder().build(&def, &mut ctx, None);

        assert_eq!(
            req.headers.get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"k": 1}));
    }

    #[test]
    fn get_requests_carry_no_body() {
        let def = definition(
            "GET",
            "json",
            vec![ParameterRule::literal("payload", "{}", ParameterTarget::Body)],
        );
        let mut ctx = context(json!({}), &[], "");
        assert!(builder().build(&def, &mut ctx, None).body.is_none());
    }

    #[test]
    fn explicit_mime_is_used_verbatim() {
        let def = definition(
            "POST",
            "text/plain",
            vec![ParameterRule::literal("text", "hello", ParameterTarget::Body)],
        );
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, None);
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(req.body_text().unwrap(), "hello");
    }

    #[test]
    fn mapped_body_strategy() {
        let mut def = definition(
            "POST",
            "json",
            vec![ParameterRule::literal("flat", "ignored", ParameterTarget::Body)],
        );
        def.request_body = Some(RequestBodyRule {
            content_type: RequestContentType::Json,
            json: Some(json!({"user": "{{name}}", "source": "gateway"})),
        });
        let mut ctx = context(json!({"name": "bob"}), &[], "");
        let req = builder().build(&def, &mut ctx, None);

        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"user": "bob", "source": "gateway"}));
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);
    }

    #[test]
    fn mapped_form_body() {
        let mut def = definition("POST", "none", vec![]);
        def.request_body = Some(RequestBodyRule {
            content_type: RequestContentType::Form,
            json: None,
        });
        let mut ctx = context(json!({"a": "1", "n": 2}), &[], "");
        let req = builder().build(&def, &mut ctx, None);
        let expected: HashSet<_> = [("a", "1"), ("n", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(form_fields(req.body.as_ref().unwrap()), expected);
    }

    #[test]
    fn malformed_url_is_kept_verbatim() {
        let mut def = definition(
            "GET",
            "none",
            vec![ParameterRule::literal("a", "1", ParameterTarget::Query)],
        );
        def.url = "not a url".to_string();
        let mut ctx = context(json!({}), &[], "");
        let req = builder().build(&def, &mut ctx, None);
        assert_eq!(req.url, "not a url");
        assert_eq!(req.method, "GET");
    }
}
