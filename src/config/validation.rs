use crate::config::types::{
    Config, LoggingConfig, RateLimitConfig, RetryConfig, SourceConfig, StateConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Longest single retry delay accepted (seconds)
const MAX_RETRY_DELAY_SECS: f64 = 86_400.0;

/// Longest processed-key lifetime accepted (days)
const MAX_PROCESSED_TTL_DAYS: u32 = 36_500;

/// Widest JQL safety margin accepted (30 days, in minutes)
const MAX_JQL_MARGIN_MINUTES: u32 = 43_200;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_state_config(&config.state)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            config.base_url
        )));
    }

    for project in &config.projects {
        validate_project_key(project)?;
    }

    if config.page_size < 1 || config.page_size > 1000 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 1000, got {}",
            config.page_size
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout == 0 {
        return Err(ConfigError::Validation(
            "request-timeout must be >= 1 second".to_string(),
        ));
    }

    if config.max_in_flight < 1 || config.max_in_flight > 64 {
        return Err(ConfigError::Validation(format!(
            "max-in-flight must be between 1 and 64, got {}",
            config.max_in_flight
        )));
    }

    if config.jql_margin_minutes > MAX_JQL_MARGIN_MINUTES {
        return Err(ConfigError::Validation(format!(
            "jql-margin-minutes must be at most {}, got {}",
            MAX_JQL_MARGIN_MINUTES, config.jql_margin_minutes
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if !config.requests_per_second.is_finite() || config.requests_per_second < 0.0 {
        return Err(ConfigError::Validation(format!(
            "requests-per-second must be a non-negative number, got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation(
            "burst must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if !config.start_delay.is_finite() || config.start_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "start-delay must be >= 0, got {}",
            config.start_delay
        )));
    }

    if !config.max_delay.is_finite() || config.max_delay < config.start_delay {
        return Err(ConfigError::Validation(format!(
            "max-delay must be >= start-delay, got {}",
            config.max_delay
        )));
    }

    if config.max_delay > MAX_RETRY_DELAY_SECS {
        return Err(ConfigError::Validation(format!(
            "max-delay must be at most {} seconds, got {}",
            MAX_RETRY_DELAY_SECS, config.max_delay
        )));
    }

    if !config.exponential_base.is_finite() || config.exponential_base < 1.0 {
        return Err(ConfigError::Validation(format!(
            "exponential-base must be >= 1.0, got {}",
            config.exponential_base
        )));
    }

    for code in &config.http_codes {
        if !(100..=599).contains(code) {
            return Err(ConfigError::Validation(format!(
                "http-codes contains invalid status code {}",
                code
            )));
        }
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.bucket.is_empty() {
        return Err(ConfigError::Validation("bucket cannot be empty".to_string()));
    }

    if let Some(endpoint) = &config.endpoint {
        Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid storage endpoint: {}", e)))?;
    }

    if config.local_root.is_empty() {
        return Err(ConfigError::Validation(
            "local-root cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_state_config(config: &StateConfig) -> Result<(), ConfigError> {
    if config.dir.is_empty() {
        return Err(ConfigError::Validation("state dir cannot be empty".to_string()));
    }

    if config.shared_path.is_empty() {
        return Err(ConfigError::Validation(
            "shared-path cannot be empty".to_string(),
        ));
    }

    if config.processed_cap < 1 {
        return Err(ConfigError::Validation(
            "processed-cap must be >= 1".to_string(),
        ));
    }

    if config.processed_ttl_days > MAX_PROCESSED_TTL_DAYS {
        return Err(ConfigError::Validation(format!(
            "processed-ttl-days must be at most {}, got {}",
            MAX_PROCESSED_TTL_DAYS, config.processed_ttl_days
        )));
    }

    if config.flush_every < 1 {
        return Err(ConfigError::Validation(
            "flush-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

    if !LEVELS.contains(&config.level.to_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging level must be one of {:?}, got '{}'",
            LEVELS, config.level
        )));
    }

    Ok(())
}

/// Validates a Jira project key (e.g. "HADOOP", "KAFKA2")
pub fn validate_project_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty() {
        return Err(ConfigError::Validation(
            "Project key cannot be empty".to_string(),
        ));
    }

    if !key.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(format!(
            "Project key '{}' must start with a letter",
            key
        )));
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::Validation(format!(
            "Project key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_key() {
        assert!(validate_project_key("HADOOP").is_ok());
        assert!(validate_project_key("KAFKA2").is_ok());
        assert!(validate_project_key("MY_PROJ").is_ok());

        assert!(validate_project_key("").is_err());
        assert!(validate_project_key("2FAST").is_err());
        assert!(validate_project_key("HADOOP-1").is_err());
        assert!(validate_project_key("A B").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = Config::default();
        config.source.base_url = "ftp://jira.example.com".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.source.base_url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_rejects_zero_burst() {
        let mut config = Config::default();
        config.rate_limit.burst = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_refill_rate_is_allowed() {
        let mut config = Config::default();
        config.rate_limit.requests_per_second = 0.0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let mut config = Config::default();
        config.retry.start_delay = 10.0;
        config.retry.max_delay = 5.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let mut config = Config::default();
        config.retry.max_delay = 1e30;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.state.processed_ttl_days = u32::MAX;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.source.jql_margin_minutes = MAX_JQL_MARGIN_MINUTES + 1;
        assert!(validate(&config).is_err());

        config.source.jql_margin_minutes = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_status_code() {
        let mut config = Config::default();
        config.retry.http_codes = vec![503, 42];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(validate(&config).is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(validate(&config).is_ok());
    }
}
