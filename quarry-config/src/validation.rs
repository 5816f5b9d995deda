//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that a redis connection string uses a supported scheme
pub fn validate_redis_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    const SCHEMES: [&str; 3] = ["redis://", "rediss://", "redis+unix://"];
    if !SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} must start with one of {}, got '{}'",
                field_name,
                SCHEMES.join(", "),
                url
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("high", "queue", "worker").is_ok());
        assert!(validate_required_string("", "queue", "worker").is_err());
        assert!(validate_required_string("   ", "queue", "worker").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(4.0, "term_timeout", "worker").is_ok());
        assert!(validate_positive(0.0, "term_timeout", "worker").is_err());

        let err = validate_positive(-1, "n", "worker").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Domain configuration error in worker: n must be greater than 0, got -1"
        );
    }

    #[test]
    fn test_validate_redis_url() {
        assert!(validate_redis_url("redis://127.0.0.1:6379/0", "url", "store").is_ok());
        assert!(validate_redis_url("rediss://cache:6380", "url", "store").is_ok());
        assert!(validate_redis_url("http://127.0.0.1", "url", "store").is_err());
        assert!(validate_redis_url("", "url", "store").is_err());
    }
}
