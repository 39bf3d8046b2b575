//! Per-call scratch state.
use std::collections::HashMap;

use hyper::{HeaderMap, header::CONTENT_TYPE};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{
    definition::{ORIGIN_NAME, VARS_NAME},
    transform::lookup_path,
};

/// Snapshot of the inbound request the call was started from.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    /// First value of each query parameter.
    pub query: HashMap<String, String>,
}

impl InboundRequest {
    pub fn new(headers: HeaderMap, raw_query: Option<&str>) -> Self {
        let mut query = HashMap::new();
        if let Some(raw) = raw_query {
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
                query
                    .entry(key.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
        }
        Self { headers, query }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// State threaded through one inbound call. Never shared across calls.
#[derive(Debug)]
pub struct CallContext {
    pub call_id: Uuid,
    name: String,
    step_results: HashMap<String, Value>,
    vars: HashMap<String, String>,
    inbound: InboundRequest,
}

impl CallContext {
    /// `origin` is the caller's parsed body, published as the `origin` step result.
    pub fn new(name: impl Into<String>, origin: Value, inbound: InboundRequest) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            name: name.into(),
            step_results: HashMap::from([(ORIGIN_NAME.to_string(), origin)]),
            vars: HashMap::new(),
            inbound,
        }
    }

    /// Name of the API definition this call targets.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point the context at another API, keeping the step results gathered
    /// so far.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn origin(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.step_results.get(ORIGIN_NAME).unwrap_or(&NULL)
    }

    pub fn inbound(&self) -> &InboundRequest {
        &self.inbound
    }

    pub fn step_result(&self, name: &str) -> Option<&Value> {
        self.step_results.get(name)
    }

    pub fn record_step_result(&mut self, name: impl Into<String>, value: Value) {
        self.step_results.insert(name.into(), value);
    }

    /// Values published by the request build in progress.
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub(crate) fn set_var(&mut self, name: String, value: String) {
        self.vars.insert(name, value);
    }

    pub(crate) fn clear_vars(&mut self) {
        self.vars.clear();
    }

    /// Resolve `<step>.<path>` against prior step results. `vars.<name>` reads
    /// the values published by the current build.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let path = path.trim().trim_start_matches('.');
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        if head == VARS_NAME {
            return self.vars.get(rest).map(|value| Value::String(value.clone()));
        }
        self.step_results
            .get(head)
            .and_then(|result| lookup_path(result, rest))
            .cloned()
    }
}
