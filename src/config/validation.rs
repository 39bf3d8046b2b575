use std::net::SocketAddr;

use eyre::Result;
use hyper::Method;

use crate::{
    config::models::ServerConfig,
    core::{
        definition::{ApiDefinition, ParameterTarget},
        expiry::ExpiryFormat,
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr.clone(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }

        if let Err(e) = config.request_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "request_timeout".to_string(),
                message: format!("{e:#}"),
            });
        }

        if config.api_def_path.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "api_def_path".to_string(),
            });
        }

        finish(errors)
    }
}

/// API definition validator. Collects every problem of a definition instead
/// of stopping at the first one.
pub struct ApiDefinitionValidator;

impl ApiDefinitionValidator {
    pub fn validate(definition: &ApiDefinition) -> ValidationResult<()> {
        let mut errors = Vec::new();
        let api = &definition.id;

        if let Err(e) = Self::validate_url(&definition.url, &format!("api '{api}' url")) {
            errors.push(e);
        }

        if Method::from_bytes(definition.method.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidField {
                field: format!("api '{api}' method"),
                message: format!("'{}' is not a valid HTTP method", definition.method),
            });
        }

        for (i, rule) in definition.parameters.iter().enumerate() {
            if rule.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("api '{api}' parameter {} name", i + 1),
                });
            }
            if rule.target == ParameterTarget::Unknown {
                errors.push(ValidationError::InvalidField {
                    field: format!("api '{api}' parameter '{}' in", rule.name),
                    message: "Must be one of 'query', 'header', 'body' or 'vars'".to_string(),
                });
            }
            if rule.value.is_empty() && rule.from.is_none() {
                errors.push(ValidationError::MissingField {
                    field: format!("api '{api}' parameter '{}' value or from", rule.name),
                });
            }
        }

        if let Some(cache) = &definition.cache {
            match &cache.from {
                Some(source) if source.name.is_empty() => {
                    errors.push(ValidationError::MissingField {
                        field: format!("api '{api}' cache.from.name"),
                    })
                }
                None => errors.push(ValidationError::MissingField {
                    field: format!("api '{api}' cache.from"),
                }),
                Some(_) => {}
            }
            match &cache.format {
                Some(ExpiryFormat::Layout(layout)) if layout.trim().is_empty() => {
                    errors.push(ValidationError::MissingField {
                        field: format!("api '{api}' cache.format"),
                    })
                }
                None => errors.push(ValidationError::MissingField {
                    field: format!("api '{api}' cache.format"),
                }),
                Some(_) => {}
            }
        }

        finish(errors)
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }
}

fn finish(errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed {
            message: format_multiple_errors(errors),
        })
    }
}

fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
    if errors.len() == 1 {
        return errors[0].to_string();
    }

    let mut message = format!("Found {} validation errors:\n", errors.len());
    for (i, error) in errors.iter().enumerate() {
        message.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        cache::CachePolicy,
        definition::{ParameterRule, SourceKind},
        expiry::ExpirySource,
    };

    fn valid_definition() -> ApiDefinition {
        let mut def = ApiDefinition::new("weather", "https://api.example.com/now", "GET");
        def.parameters = vec![
            ParameterRule::literal("units", "metric", ParameterTarget::Query),
            ParameterRule::sourced("city", SourceKind::Query, "city", ParameterTarget::Query),
        ];
        def.cache = Some(CachePolicy::new(
            ExpirySource::header("Expires"),
            ExpiryFormat::from("Mon, 02 Jan 2006 15:04:05 MST"),
        ));
        def
    }

    #[test]
    fn valid_definition_passes() {
        assert!(ApiDefinitionValidator::validate(&valid_definition()).is_ok());
    }

    #[test]
    fn bad_url_and_method() {
        let mut def = valid_definition();
        def.url = "ftp://files.example.com".to_string();
        def.method = "GE T".to_string();

        let err = ApiDefinitionValidator::validate(&def).unwrap_err().to_string();
        assert!(err.contains("Found 2 validation errors"));
        assert!(err.contains("scheme"));
        assert!(err.contains("method"));
    }

    #[test]
    fn incomplete_rules_and_cache() {
        let mut def = valid_definition();
        def.parameters.push(ParameterRule {
            name: String::new(),
            value: String::new(),
            from: None,
            target: ParameterTarget::Unknown,
        });
        def.cache = Some(CachePolicy::default());

        let err = ApiDefinitionValidator::validate(&def).unwrap_err().to_string();
        assert!(err.contains("parameter 3 name"));
        assert!(err.contains("cache.from"));
        assert!(err.contains("cache.format"));
    }

    #[test]
    fn server_config_checks() {
        assert!(ServerConfigValidator::validate(&ServerConfig::default()).is_ok());

        let config = ServerConfig {
            listen_addr: "localhost".to_string(),
            request_timeout: "later".to_string(),
            ..ServerConfig::default()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(err.contains("localhost"));
        assert!(err.contains("request_timeout"));
    }
}
