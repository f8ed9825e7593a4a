//! Configuration validation.

use super::{Config, MigrationMode};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.uri.is_empty() {
        return Err(MigrateError::Config("source.uri is required".into()));
    }
    if !config.source.uri.starts_with("mongodb://") && !config.source.uri.starts_with("mongodb+srv://") {
        return Err(MigrateError::Config(
            "source.uri must start with mongodb:// or mongodb+srv://".into(),
        ));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema is required".into()));
    }
    if !matches!(config.target.ssl_mode.as_str(), "disable" | "prefer") {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be 'disable' or 'prefer', got '{}'",
            config.target.ssl_mode
        )));
    }
    if config.target.max_connections == 0 {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }

    // Migration config validation
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.sample_size == 0 {
        return Err(MigrateError::Config(
            "migration.sample_size must be at least 1".into(),
        ));
    }
    if config.migration.mode == MigrationMode::GenerateTables {
        if let Some(path) = &config.migration.schema_script {
            if path.as_os_str().is_empty() {
                return Err(MigrateError::Config(
                    "migration.schema_script cannot be empty".into(),
                ));
            }
        }
    }

    if let Some(advisor) = &config.advisor {
        if advisor.endpoint.is_empty() {
            return Err(MigrateError::Config("advisor.endpoint is required".into()));
        }
        if advisor.model.is_empty() {
            return Err(MigrateError::Config("advisor.model is required".into()));
        }
        if advisor.timeout_secs == 0 {
            return Err(MigrateError::Config(
                "advisor.timeout_secs must be at least 1".into(),
            ));
        }
    }

    Ok(())
}
