use crate::config::types::{
    Config, CrawlConfig, DownloaderConfig, ProviderConfig, StorageConfig, SystemConfig,
};
use crate::{ConfigError, ConfigResult};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_system_config(&config.system)?;
    validate_crawl_config(&config.crawl)?;
    validate_provider_config(&config.provider)?;
    validate_downloader_config(&config.downloader)?;
    validate_storage_config(&config.storage)?;

    if config.sufficiency.min_text_len == Some(0) {
        return Err(ConfigError::Validation(
            "min-text-len must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_system_config(config: &SystemConfig) -> ConfigResult<()> {
    if config.worker_ceiling < 1 || config.worker_ceiling > 256 {
        return Err(ConfigError::Validation(format!(
            "worker-ceiling must be between 1 and 256, got {}",
            config.worker_ceiling
        )));
    }
    Ok(())
}

/// Validates the per-task defaults
fn validate_crawl_config(config: &CrawlConfig) -> ConfigResult<()> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_workers < 1 {
        return Err(ConfigError::Validation(format!(
            "max-workers must be >= 1, got {}",
            config.max_workers
        )));
    }

    if config.total_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "total-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.page_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "page-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.page_timeout_secs > config.total_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "page-timeout-secs ({}) cannot exceed total-timeout-secs ({})",
            config.page_timeout_secs, config.total_timeout_secs
        )));
    }

    Ok(())
}

fn validate_provider_config(config: &ProviderConfig) -> ConfigResult<()> {
    if let Some(endpoint) = &config.endpoint {
        let url = Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint '{}': {}", endpoint, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint '{}' must use http or https",
                endpoint
            )));
        }

        if config.api_key.is_empty() {
            return Err(ConfigError::Validation(
                "api-key is required when an endpoint is configured".to_string(),
            ));
        }
    }

    if let Some(country) = &config.country_code {
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Validation(format!(
                "country-code must be a two-letter code, got '{}'",
                country
            )));
        }
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_downloader_config(config: &DownloaderConfig) -> ConfigResult<()> {
    if config.max_size == 0 || config.min_size > config.max_size {
        return Err(ConfigError::Validation(format!(
            "downloader sizes must satisfy 0 <= min-size <= max-size and max-size > 0, got {}..{}",
            config.min_size, config.max_size
        )));
    }

    if config.allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "allowed-extensions cannot be empty".to_string(),
        ));
    }

    for ext in &config.allowed_extensions {
        validate_extension(ext)?;
    }

    Ok(())
}

/// Extensions are plain alphanumerics, with an optional leading dot
fn validate_extension(ext: &str) -> ConfigResult<()> {
    let bare = ext.strip_prefix('.').unwrap_or(ext);
    if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(format!(
            "Invalid document extension '{}'",
            ext
        )));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> ConfigResult<()> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.blob_root.is_empty() {
        return Err(ConfigError::Validation(
            "blob-root cannot be empty".to_string(),
        ));
    }

    Ok(())
}
