use super::{AppConfig, ConfigError};

/// Validate the full client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_chat_config(config)?;
    validate_stream_config(config)?;
    validate_identity_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    let parsed = url::Url::parse(server.base_url.trim()).map_err(|err| {
        validation_err(format!("server.base_url is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "server.base_url must start with http:// or https://",
        ));
    }
    if !server.api_prefix.is_empty() && !server.api_prefix.starts_with('/') {
        return Err(validation_err("server.api_prefix must start with '/'"));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.connect_timeout == 0 {
        return Err(validation_err(
            "server.connect_timeout must be greater than 0",
        ));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_chat_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.chat.default_agent.trim().is_empty() {
        return Err(validation_err("chat.default_agent cannot be empty"));
    }
    for (field, value) in [
        ("provider_name", config.chat.provider_name.as_deref()),
        ("model_name", config.chat.model_name.as_deref()),
    ] {
        if value.is_some_and(|v| v.trim().is_empty()) {
            return Err(validation_err(format!(
                "chat.{field} cannot be empty when set"
            )));
        }
    }
    Ok(())
}

fn validate_stream_config(config: &AppConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    if stream.done_sentinel.trim().is_empty() {
        return Err(validation_err("stream.done_sentinel cannot be empty"));
    }
    if stream.done_sentinel.trim() != stream.done_sentinel {
        return Err(validation_err(
            "stream.done_sentinel cannot have surrounding whitespace",
        ));
    }
    if stream.data_prefix.trim().is_empty() {
        return Err(validation_err("stream.data_prefix cannot be empty"));
    }
    if stream.data_prefix.contains('\n') {
        return Err(validation_err("stream.data_prefix cannot contain a newline"));
    }
    Ok(())
}

fn validate_identity_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.identity.store_path.trim().is_empty() {
        return Err(validation_err("identity.store_path cannot be empty"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_config() -> AppConfig {
        AppConfig::for_base_url("http://127.0.0.1:8000")
    }

    #[test]
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_base_url_scheme() {
        let mut config = make_valid_config();
        config.server.base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unparseable_base_url() {
        let mut config = make_valid_config();
        config.server.base_url = "not a url".to_string();
        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("base_url"));
    }

    #[test]
    fn test_api_prefix_needs_leading_slash() {
        let mut config = make_valid_config();
        config.server.api_prefix = "api".to_string();
        assert!(validate_config(&config).is_err());

        config.server.api_prefix = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_timeouts() {
        let mut config = make_valid_config();
        config.server.timeout = 0;
        assert!(validate_config(&config).is_err());

        let mut config = make_valid_config();
        config.server.connect_timeout = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_pool_max_idle_per_host() {
        let mut config = make_valid_config();
        config.server.http_pool_max_idle_per_host = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_default_agent() {
        let mut config = make_valid_config();
        config.chat.default_agent = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_blank_model_name_when_set() {
        let mut config = make_valid_config();
        config.chat.model_name = Some(String::new());
        assert!(validate_config(&config).is_err());

        config.chat.model_name = Some("qwen-plus".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_sentinel_rules() {
        let mut config = make_valid_config();
        config.stream.done_sentinel = String::new();
        assert!(validate_config(&config).is_err());

        config.stream.done_sentinel = " [END] ".to_string();
        assert!(validate_config(&config).is_err());

        config.stream.done_sentinel = "[END]".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_data_prefix_rules() {
        let mut config = make_valid_config();
        config.stream.data_prefix = " ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());

        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
