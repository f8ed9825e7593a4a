//! Core abstractions shared by every component.
//!
//! - [`value`]: tagged-union document model walked by the analyzer and writers
//! - [`schema`]: field, column, relationship and mapping descriptors
//! - [`identifier`]: canonicalization and SQL quoting of names
//! - [`traits`]: the document store, relational store and advisor seams

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::canonicalize;
pub use schema::{
    CollectionSchema, ColumnDescriptor, ColumnMapping, ColumnReference, FieldDescriptor,
    IndexDescriptor, TableRelationship, TypeTag,
};
pub use traits::{Advisor, DocumentSource, RelationalTarget};
pub use value::{DocValue, Document};
