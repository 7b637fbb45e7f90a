use crate::config::Config;
use crate::error::{Error, Result};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates configuration for consistency before the server starts
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        if let Some(url) = config.redis_url() {
            Self::validate_redis_url(url)?;
        }
        Self::validate_cdn_base_url(&config.cdn_base_url)?;
        Self::validate_log_level(&config.log_level)?;

        config.cache_timeouts().validate().map_err(Error::Config)?;
        config.throttle_policy().validate().map_err(Error::Config)?;
        config.route_limits().validate().map_err(Error::Config)?;

        Ok(())
    }

    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(Error::Config("Redis URL cannot be empty".to_string()));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(Error::Config(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_cdn_base_url(url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Config("CDN base URL cannot be empty".to_string()));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Config(
                "CDN base URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<()> {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, LOG_LEVELS
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());

        let config = Config {
            redis_url: "invalid://localhost:6379".to_string(),
            ..Config::default()
        };
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_cdn_base_url() {
        assert!(ConfigValidator::validate_cdn_base_url("").is_err());
        assert!(ConfigValidator::validate_cdn_base_url("cdn.example.com").is_err());
        assert!(ConfigValidator::validate_cdn_base_url("https://cdn.example.com").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(ConfigValidator::validate_log_level("verbose").is_err());
        assert!(ConfigValidator::validate_log_level("DEBUG").is_ok());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let config = Config {
            upload_rate_limit: 0,
            ..Config::default()
        };
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            pop_wait_ms: 0,
            ..Config::default()
        };
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
