//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A store was used after it was closed or before it was connected.
    #[error("{0} store is not connected")]
    NotConnected(&'static str),

    /// Establishing a connection to one of the stores failed.
    #[error("Failed to connect to {store}: {message}")]
    Connection { store: &'static str, message: String },

    /// Source database (MongoDB) error
    #[error("Source database error: {0}")]
    Source(#[from] mongodb::error::Error),

    /// Target database (PostgreSQL) error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema analysis failed for a collection
    #[error("Schema analysis failed for collection {collection}: {message}")]
    SchemaAnalysis { collection: String, message: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Schema script could not be read or executed
    #[error("Schema script error: {0}")]
    SchemaScript(String),

    /// Advisor request failed. Never fatal to a run.
    #[error("Advisor error: {0}")]
    Advisor(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaAnalysis error
    pub fn analysis(collection: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaAnalysis {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create a Connection error
    pub fn connection(store: &'static str, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            store,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run rather than a single collection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection { .. }
                | MigrateError::NotConnected(_)
                | MigrateError::Cancelled
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Connection { .. }
            | MigrateError::NotConnected(_)
            | MigrateError::Pool { .. } => 2,
            MigrateError::Transfer { .. }
            | MigrateError::SchemaAnalysis { .. }
            | MigrateError::Source(_)
            | MigrateError::Target(_) => 3,
            MigrateError::Cancelled => 4,
            MigrateError::SchemaScript(_) => 5,
            MigrateError::Io(_) => 7,
            MigrateError::Advisor(_) | MigrateError::Json(_) => 10,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
