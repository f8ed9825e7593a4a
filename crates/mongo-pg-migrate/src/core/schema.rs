//! Schema and metadata types for source collections and destination tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Object,
    Array,
    Null,
    Binary,
}

impl TypeTag {
    /// Lowercase tag name as used in serialized schemas.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::Date => "date",
            TypeTag::ObjectId => "objectId",
            TypeTag::Object => "object",
            TypeTag::Array => "array",
            TypeTag::Null => "null",
            TypeTag::Binary => "binary",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field observed in a source collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Dotted path (`address.city`).
    pub name: String,

    /// Inferred type. Only ever promoted from `null`.
    #[serde(rename = "type")]
    pub type_tag: TypeTag,

    /// Whether the value is a sequence.
    pub is_array: bool,

    /// Whether the field was present and non-null in every sampled document.
    pub is_required: bool,
}

/// Source index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// Indexed field paths, in key order.
    pub fields: Vec<String>,

    /// Whether the index is unique.
    pub unique: bool,
}

/// Inferred schema of one source collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,

    /// Fields in first-observed order.
    pub fields: Vec<FieldDescriptor>,

    /// Secondary indexes, when the source could list them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<IndexDescriptor>>,

    /// Number of documents the schema was inferred from.
    #[serde(default)]
    pub sampled_documents: usize,
}

impl CollectionSchema {
    /// Create an empty schema (valid for empty collections).
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: None,
            sampled_documents: 0,
        }
    }

    /// Look up a field by dotted path.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field paths in schema order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Foreign key target of a destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
}

/// Destination column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Relational type (e.g. "text", "jsonb", "varchar(24)").
    #[serde(rename = "type", alias = "data_type")]
    pub data_type: String,

    /// Whether the column allows NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Whether the column is (part of) the primary key.
    #[serde(default, alias = "primaryKey")]
    pub primary_key: bool,

    /// Whether the column has a unique constraint.
    #[serde(default)]
    pub unique: bool,

    /// Foreign key reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnReference>,
}

impl ColumnDescriptor {
    /// Create a nullable column with no constraints.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            references: None,
        }
    }

    /// Mark as primary key (implies NOT NULL).
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether the column holds JSON.
    pub fn is_json(&self) -> bool {
        let t = self.data_type.to_lowercase();
        t == "json" || t == "jsonb"
    }
}

fn default_true() -> bool {
    true
}

/// A declared foreign key between two destination tables.
///
/// Directed edge: `table_name` depends on `referenced_table`, so the
/// referenced table must be populated first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRelationship {
    pub table_name: String,
    pub referenced_table: String,
    pub column_name: String,
    pub referenced_column: String,
}

impl TableRelationship {
    pub fn new(
        table_name: impl Into<String>,
        referenced_table: impl Into<String>,
        column_name: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            referenced_table: referenced_table.into(),
            column_name: column_name.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Maps one source field to one destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Dotted source path, or `_id`.
    #[serde(alias = "sourceField")]
    pub source_field: String,

    /// Destination column name.
    #[serde(alias = "destinationColumn")]
    pub destination_column: String,

    /// Human-readable description of any conversion applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<String>,
}

impl ColumnMapping {
    pub fn new(source_field: impl Into<String>, destination_column: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            destination_column: destination_column.into(),
            transformation: None,
        }
    }

    pub fn with_transformation(mut self, transformation: impl Into<String>) -> Self {
        self.transformation = Some(transformation.into());
        self
    }
}
