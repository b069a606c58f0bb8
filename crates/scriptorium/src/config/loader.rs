use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    require_non_empty("storage.temp_bucket", &config.storage.temp_bucket)?;
    require_non_empty("ocr.project_id", &config.ocr.project_id)?;
    require_non_empty("ocr.processor_id", &config.ocr.processor_id)?;

    require_positive("ocr.max_poll_attempts", config.ocr.max_poll_attempts as u64)?;
    require_positive("ocr.poll_interval_secs", config.ocr.poll_interval_secs)?;
    require_positive("ocr.max_attempts", config.ocr.max_attempts as u64)?;
    require_positive("cleaning.concurrency", config.cleaning.concurrency as u64)?;
    require_positive("cleaning.max_attempts", config.cleaning.max_attempts as u64)?;
    require_positive("ingest.page_insert_batch", config.ingest.page_insert_batch as u64)?;
    require_positive("generation.max_source_chars", config.generation.max_source_chars as u64)?;

    if config.ocr.sync_size_limit_bytes > 20 * 1024 * 1024 {
        return Err(ConfigError::Validation {
            message: "ocr.sync_size_limit_bytes may not exceed 20 MiB".to_string(),
        });
    }

    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: format!("{} must not be empty", field),
        });
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation {
            message: format!("{} must be greater than zero", field),
        });
    }
    Ok(())
}
