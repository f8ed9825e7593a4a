//! # mongo-pg-migrate
//!
//! MongoDB to PostgreSQL migration library.
//!
//! This library provides the core functionality for moving document
//! collections into relational tables with support for:
//!
//! - **Schema inference** by sampling documents
//! - **Relationship discovery** from a SQL schema-definition script
//! - **Dependency ordering** so referenced tables are filled first
//! - **Field mapping** onto existing tables, advisor-assisted or deterministic
//! - **Idempotent inserts** that skip rows violating key constraints
//!
//! ## Example
//!
//! ```rust,no_run
//! use mongo_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mongo_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} documents", result.total_documents);
//!     Ok(())
//! }
//! ```

pub mod advisor;
pub mod analyzer;
pub mod config;
pub mod core;
pub mod dependency;
pub mod error;
pub mod mapping;
pub mod orchestrator;
pub mod relationships;
pub mod source;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use advisor::HttpAdvisor;
pub use analyzer::{SchemaAnalyzer, SchemaBuilder};
pub use config::{AdvisorConfig, Config, MigrationConfig, MigrationMode, SourceConfig, TargetConfig};
pub use crate::core::{
    Advisor, CollectionSchema, ColumnDescriptor, ColumnMapping, DocValue, Document,
    DocumentSource, FieldDescriptor, RelationalTarget, TableRelationship, TypeTag,
};
pub use dependency::insertion_order;
pub use error::{MigrateError, Result};
pub use mapping::resolve_mapping;
pub use orchestrator::{HealthCheckResult, MigrationResult, Orchestrator};
pub use relationships::parse_relationships;
pub use source::MongoSource;
pub use target::PgTarget;
