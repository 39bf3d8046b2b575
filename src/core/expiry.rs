//! Cache expiration discovery.
//!
//! Backends announce how long a response stays valid in many different ways:
//! a plain header, an attribute of a `Set-Cookie` value, or a field somewhere
//! in the body, expressed either as a number of seconds or as an absolute
//! timestamp. The [`TextExpiryExtractor`] finds the raw text by plain string
//! scanning and [`parse_expire_time`] turns it into an instant.
//!
//! Every failure here means "no expiry learned"; nothing is surfaced to the
//! caller of the executor.
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta};
use hyper::header::SET_COOKIE;
use serde::Deserialize;
use thiserror::Error;

use crate::{core::cache::CachePolicy, ports::http_client::BackendResponse};

/// Marker in a header key selecting an attribute of the `Set-Cookie` header.
pub const SET_COOKIE_PREFIX: &str = "Set-Cookie.";

/// Format keyword for relative expirations.
pub const SECONDS_FORMAT: &str = "second";

/// Part of the backend response holding the expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryLocation {
    #[serde(alias = "Header", alias = "HEADER")]
    Header,
    #[serde(alias = "Body", alias = "BODY")]
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpirySource {
    #[serde(rename = "from")]
    pub location: ExpiryLocation,
    /// Header name, `Set-Cookie.<attribute>`, or body key.
    #[serde(default)]
    pub name: String,
}

impl ExpirySource {
    pub fn header(name: impl Into<String>) -> Self {
        Self {
            location: ExpiryLocation::Header,
            name: name.into(),
        }
    }

    pub fn body(name: impl Into<String>) -> Self {
        Self {
            location: ExpiryLocation::Body,
            name: name.into(),
        }
    }

    /// Cookie attribute named by a `Set-Cookie.<attribute>` key.
    pub fn cookie_attribute(&self) -> Option<&str> {
        self.name
            .split_once(SET_COOKIE_PREFIX)
            .map(|(_, attribute)| attribute)
    }
}

/// How the extracted text is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ExpiryFormat {
    /// Count of seconds from now.
    Seconds,
    /// Absolute timestamp layout, either in reference-time notation
    /// (`2006-01-02T15:04:05`) or as a `strftime` pattern.
    Layout(String),
}

impl From<String> for ExpiryFormat {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case(SECONDS_FORMAT) {
            Self::Seconds
        } else {
            Self::Layout(value)
        }
    }
}

impl From<&str> for ExpiryFormat {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExpiryError {
    #[error("Invalid seconds value '{0}'")]
    InvalidSeconds(String),

    #[error("Seconds value '{0}' is out of range")]
    OutOfRange(String),

    #[error("Empty layout")]
    EmptyLayout,

    #[error("'{value}' does not match layout '{layout}': {source}")]
    LayoutMismatch {
        value: String,
        layout: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Parse an expiration instant out of `text`.
///
/// `Seconds` yields `now + text`. A layout is parsed as an absolute timestamp;
/// timestamps carrying no zone are taken as UTC. The result is in local time.
pub fn parse_expire_time(text: &str, format: &ExpiryFormat) -> Result<DateTime<Local>, ExpiryError> {
    let text = text.trim();
    let expires = match format {
        ExpiryFormat::Seconds => {
            let seconds: i64 = text
                .parse()
                .map_err(|_| ExpiryError::InvalidSeconds(text.to_string()))?;
            TimeDelta::try_seconds(seconds)
                .and_then(|delta| Local::now().checked_add_signed(delta))
                .ok_or_else(|| ExpiryError::OutOfRange(text.to_string()))?
        }
        ExpiryFormat::Layout(layout) => parse_absolute(text, layout)?,
    };
    tracing::debug!("Parsed expiration '{}' as {}", text, expires);
    Ok(expires)
}

fn parse_absolute(text: &str, layout: &str) -> Result<DateTime<Local>, ExpiryError> {
    if layout.trim().is_empty() {
        return Err(ExpiryError::EmptyLayout);
    }
    let pattern = strftime_pattern(layout);

    if let Ok(zoned) = DateTime::parse_from_str(text, &pattern) {
        return Ok(zoned.with_timezone(&Local));
    }
    if let Some(utc) = utc_designator_pattern(layout) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, &utc) {
            return Ok(naive.and_utc().with_timezone(&Local));
        }
    }

    match NaiveDateTime::parse_from_str(text, &pattern) {
        Ok(naive) => Ok(naive.and_utc().with_timezone(&Local)),
        Err(source) => NaiveDate::parse_from_str(text, &pattern)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc().with_timezone(&Local))
            .ok_or_else(|| ExpiryError::LayoutMismatch {
                value: text.to_string(),
                layout: layout.to_string(),
                source,
            }),
    }
}

/// `Z07:00` and `Z0700` also accept a bare `Z` for UTC, which `%z` does not.
fn utc_designator_pattern(layout: &str) -> Option<String> {
    ["Z07:00", "Z0700"]
        .into_iter()
        .find(|token| layout.contains(token))
        .map(|token| strftime_pattern(&layout.replace(token, "Z")))
}

/// Reference-time tokens and their `strftime` equivalents, longest first so
/// that e.g. `2006` is consumed before `2`.
const LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    (".000000000", "%.9f"),
    (".999999999", "%.f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("Z0700", "%z"),
    ("-0700", "%z"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("_2", "%e"),
    ("06", "%y"),
    ("01", "%m"),
    ("02", "%d"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%m"),
    ("2", "%d"),
    ("3", "%I"),
    ("4", "%M"),
    ("5", "%S"),
];

/// Translate a reference-time layout into a `strftime` pattern. Layouts that
/// already contain `%` are taken to be `strftime` patterns.
pub fn strftime_pattern(layout: &str) -> String {
    if layout.contains('%') {
        return layout.to_string();
    }

    let mut pattern = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'scan: while !rest.is_empty() {
        for (token, replacement) in LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                pattern.push_str(replacement);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            pattern.push(c);
        }
        rest = chars.as_str();
    }
    pattern
}

/// Locates and parses the expiration of a backend response.
pub trait ExpiryExtractor: Send + Sync + 'static {
    fn extract(&self, response: &BackendResponse, policy: &CachePolicy) -> Option<DateTime<Local>>;
}

/// Substring-scanning extractor working on raw header and body text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExpiryExtractor;

impl TextExpiryExtractor {
    /// Raw expiration text as found in the response, before parsing.
    pub fn locate(
        response: &BackendResponse,
        source: &ExpirySource,
        format: &ExpiryFormat,
    ) -> Option<String> {
        match source.location {
            ExpiryLocation::Header => match source.cookie_attribute() {
                Some(attribute) => {
                    let cookie = response.headers.get(SET_COOKIE)?.to_str().ok()?;
                    tracing::debug!("Set-Cookie of backend response: {}", cookie);
                    cookie_attribute(cookie, attribute).map(str::to_string)
                }
                None => {
                    let value = response.headers.get(source.name.as_str())?.to_str().ok()?;
                    (!value.is_empty()).then(|| value.to_string())
                }
            },
            ExpiryLocation::Body => {
                let body = response.body_text();
                body_value(&body, &source.name, format).map(str::to_string)
            }
        }
    }
}

impl ExpiryExtractor for TextExpiryExtractor {
    fn extract(&self, response: &BackendResponse, policy: &CachePolicy) -> Option<DateTime<Local>> {
        let (Some(source), Some(format)) = (policy.from.as_ref(), policy.format.as_ref()) else {
            tracing::warn!("Cache policy has no expiration source or format configured");
            return None;
        };
        if source.name.is_empty() {
            tracing::warn!("Cache policy has an empty expiration key");
            return None;
        }

        let text = Self::locate(response, source, format)?;
        match parse_expire_time(&text, format) {
            Ok(expires) => Some(expires),
            Err(e) => {
                tracing::warn!("Failed to parse expiration '{}': {}", text, e);
                None
            }
        }
    }
}

/// Value of `attribute` inside a raw `Set-Cookie` string: the text between the
/// attribute's `=` and the next `;`, or the end of the string.
pub fn cookie_attribute<'a>(cookie: &'a str, attribute: &str) -> Option<&'a str> {
    if attribute.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(offset) = cookie[from..].find(attribute) {
        from += offset + attribute.len();
        // A longer name sharing the prefix, keep looking.
        let Some(rest) = cookie[from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let end = rest.find(';').unwrap_or(rest.len());
        let value = rest[..end].trim();
        return (!value.is_empty()).then_some(value);
    }
    None
}

/// Value following `key` and its `:` in raw body text.
///
/// For `Seconds` the value is cut at the first `,`, `}` or line break, leading
/// non-digits are skipped and the following run of digits is kept. Otherwise a
/// quoted value is cut at its closing quote and an unquoted one at the first
/// `,`, `}` or line break.
pub fn body_value<'a>(body: &'a str, key: &str, format: &ExpiryFormat) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    let start = body.find(key)?;
    let after_key = &body[start + key.len()..];
    let colon = after_key.find(':')?;
    let raw = after_key[colon + 1..].trim();

    let value = match format {
        ExpiryFormat::Seconds => {
            let field = &raw[..raw.find([',', '}', '\n']).unwrap_or(raw.len())];
            let digits = field.trim_start_matches(|c: char| !c.is_ascii_digit());
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            &digits[..end]
        }
        ExpiryFormat::Layout(_) => match raw.strip_prefix('"') {
            Some(quoted) => &quoted[..quoted.find('"').unwrap_or(quoted.len())],
            None => raw[..raw.find([',', '}', '\n']).unwrap_or(raw.len())].trim(),
        },
    };
    (!value.is_empty()).then_some(value)
}
