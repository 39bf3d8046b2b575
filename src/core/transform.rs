//! Response shaping.
//!
//! The mapping language itself is pluggable through [`JsonMapper`]. The
//! bundled [`TemplateMapper`] treats the rules as a JSON template whose string
//! leaves may reference the input with `{{path}}` placeholders.
use serde_json::Value;

use crate::core::definition::ResponseRule;

/// Evaluates mapping rules against a JSON input.
pub trait JsonMapper: Send + Sync + 'static {
    fn apply(&self, input: &Value, rules: &Value) -> Value;
}

/// Shape a raw backend response. Without mapping rules the input is passed
/// through unchanged, `Null` included.
pub fn transform(raw: Value, rule: Option<&ResponseRule>, mapper: &dyn JsonMapper) -> Value {
    match rule.and_then(|rule| rule.json.as_ref()) {
        Some(rules) => mapper.apply(&raw, rules),
        None => raw,
    }
}

/// Template-based mapper.
///
/// * a string that is exactly `{{path}}` is replaced by the value found at
///   `path`, keeping its JSON type (`null` when absent)
/// * placeholders embedded in longer strings are replaced by their text
/// * objects and arrays are walked recursively, other values are copied
///
/// Paths are dot separated and may start with a `.`; numeric segments index
/// arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMapper;

impl JsonMapper for TemplateMapper {
    fn apply(&self, input: &Value, rules: &Value) -> Value {
        match rules {
            Value::String(template) => render_string(input, template),
            Value::Array(items) => Value::Array(items.iter().map(|i| self.apply(input, i)).collect()),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, rule)| (key.clone(), self.apply(input, rule)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn whole_placeholder(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then(|| inner.trim())
}

fn render_string(input: &Value, template: &str) -> Value {
    if let Some(path) = whole_placeholder(template) {
        return lookup_path(input, path).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(text) = lookup_path(input, after[..end].trim()).and_then(value_text) {
                    out.push_str(&text);
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Value at a dotted `path` inside `value`. An empty path (or `.`) is the
/// value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim().trim_start_matches('.');
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Text form of a JSON value as placed into URLs, headers and bodies:
/// strings verbatim, `null` as nothing, everything else as JSON.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn passthrough_without_rules() {
        let raw = json!({"a": 1});
        assert_eq!(transform(raw.clone(), None, &TemplateMapper), raw);
        assert_eq!(
            transform(raw.clone(), Some(&ResponseRule::default()), &TemplateMapper),
            raw
        );
    }

    #[test]
    fn null_propagates_without_rules() {
        assert_eq!(transform(Value::Null, None, &TemplateMapper), Value::Null);
    }

    #[test]
    fn template_reshapes_response() {
        let raw = json!({
            "data": { "temp": 21.5, "city": "Paris", "tags": ["a", "b"] },
            "code": 0
        });
        let rule = ResponseRule {
            json: Some(json!({
                "temperature": "{{data.temp}}",
                "label": "{{ .data.city }} ({{code}})",
                "first_tag": "{{data.tags.0}}",
                "missing": "{{data.nope}}",
                "fixed": true
            })),
        };
        let out = transform(raw, Some(&rule), &TemplateMapper);
        assert_eq!(
            out,
            json!({
                "temperature": 21.5,
                "label": "Paris (0)",
                "first_tag": "a",
                "missing": null,
                "fixed": true
            })
        );
    }

    #[test]
    fn template_on_null_input() {
        let rule = ResponseRule {
            json: Some(json!({"x": "{{a}}"})),
        };
        assert_eq!(
            transform(Value::Null, Some(&rule), &TemplateMapper),
            json!({"x": null})
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(
            TemplateMapper.apply(&json!({}), &json!("a {{b")),
            json!("a {{b")
        );
    }

    #[test]
    fn lookup_paths() {
        let value = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(lookup_path(&value, "a.b.1.c"), Some(&json!("x")));
        assert_eq!(lookup_path(&value, "."), Some(&value));
        assert_eq!(lookup_path(&value, "a.z"), None);
        assert_eq!(value_text(&json!(5)).as_deref(), Some("5"));
        assert_eq!(value_text(&Value::Null), None);
    }
}
