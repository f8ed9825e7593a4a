//! Collaborator traits for the migration engine.
//!
//! - [`DocumentSource`]: reads collections and documents from the document store
//! - [`RelationalTarget`]: inspects and writes destination tables
//! - [`Advisor`]: optional oracle proposing schemas and mappings
//!
//! The orchestrator only talks to these traits, so the reasoning layer can be
//! exercised against in-memory implementations.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{CollectionSchema, ColumnDescriptor, ColumnMapping, IndexDescriptor};
use super::value::Document;

/// Read collections and documents from a document store.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Whether the underlying connection is usable.
    fn is_connected(&self) -> bool;

    /// List collection names in the configured database.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Draw up to `size` documents by random sampling.
    async fn sample_documents(&self, collection: &str, size: usize) -> Result<Vec<Document>>;

    /// Fetch any single document, or `None` for an empty collection.
    async fn find_one(&self, collection: &str) -> Result<Option<Document>>;

    /// Count documents in a collection.
    async fn count_documents(&self, collection: &str) -> Result<u64>;

    /// Fetch one page of documents in a stable order.
    async fn fetch_page(&self, collection: &str, skip: u64, limit: usize) -> Result<Vec<Document>>;

    /// List secondary indexes of a collection.
    ///
    /// Sources that cannot describe indexes return an empty list.
    async fn list_indexes(&self, _collection: &str) -> Result<Vec<IndexDescriptor>> {
        Ok(Vec::new())
    }

    /// Get the database type identifier (e.g., "mongodb").
    fn db_type(&self) -> &str;

    /// Release the connection.
    async fn close(&self);
}

/// Inspect and write destination tables.
#[async_trait]
pub trait RelationalTarget: Send + Sync {
    /// Check if a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Describe a table's columns in ordinal order.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Execute a schema-definition script.
    async fn execute_script(&self, script: &str) -> Result<()>;

    /// Create a table if it does not already exist.
    async fn create_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()>;

    /// Insert documents using the given mapping.
    ///
    /// `columns` describes the destination so values can be rendered for the
    /// right column type. Rows violating a unique or primary key constraint
    /// are skipped silently. Returns the number of rows actually inserted.
    async fn insert_rows(
        &self,
        table: &str,
        mappings: &[ColumnMapping],
        columns: &[ColumnDescriptor],
        documents: &[Document],
    ) -> Result<u64>;

    /// Get the row count for a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;

    /// Release the connections.
    async fn close(&self);
}

/// Optional oracle that may improve schema and mapping decisions.
///
/// Every method returns `None` when the advisor has nothing usable to offer,
/// including transport and parse failures. Callers treat `None` exactly like
/// an unconfigured advisor.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Propose destination columns for a source schema.
    async fn propose_table(&self, schema: &CollectionSchema) -> Option<Vec<ColumnDescriptor>>;

    /// Propose a field-to-column mapping for a sample document.
    async fn propose_mapping(
        &self,
        sample: &Document,
        columns: &[ColumnDescriptor],
    ) -> Option<Vec<ColumnMapping>>;
}
