//! Type mapping from inferred document schemas to PostgreSQL tables.

use std::collections::HashSet;

use crate::core::{canonicalize, CollectionSchema, ColumnDescriptor, ColumnMapping, TypeTag};
use crate::mapping::{identifier_column, ID_FIELD, STRINGIFY_ID};

/// Name of the generated primary key column.
pub const ID_COLUMN: &str = "id";

/// Map an inferred field type to PostgreSQL.
pub fn type_tag_to_postgres(type_tag: TypeTag, is_array: bool) -> String {
    if is_array {
        return "jsonb".to_string();
    }

    match type_tag {
        TypeTag::String => "text".to_string(),
        // Integers and doubles share a tag, numeric holds both.
        TypeTag::Number => "numeric".to_string(),
        TypeTag::Boolean => "boolean".to_string(),
        TypeTag::Date => "timestamptz".to_string(),
        TypeTag::ObjectId => "varchar(24)".to_string(),
        TypeTag::Object | TypeTag::Array => "jsonb".to_string(),
        TypeTag::Binary => "bytea".to_string(),
        // Never saw a value; text accepts anything later.
        TypeTag::Null => "text".to_string(),
    }
}

/// A table derived from a collection schema, with the mapping that fills it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTable {
    pub columns: Vec<ColumnDescriptor>,
    pub mappings: Vec<ColumnMapping>,
}

/// Fields that become their own column.
///
/// Embedded documents with observed children are flattened into those
/// children. Anything below an array is kept inside the array's JSON value.
/// `_id` is excluded; it always becomes the primary key.
pub fn leaf_fields(schema: &CollectionSchema) -> Vec<&str> {
    let array_paths: Vec<&str> = schema
        .fields
        .iter()
        .filter(|f| f.is_array)
        .map(|f| f.name.as_str())
        .collect();

    schema
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .filter(|name| *name != ID_FIELD && !name.starts_with("_id."))
        .filter(|name| !array_paths.iter().any(|a| is_descendant(name, a)))
        .filter(|name| !schema.fields.iter().any(|other| is_descendant(&other.name, name)))
        .collect()
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

/// Derive a PostgreSQL table for a collection.
///
/// The table gets an `id` primary key receiving the stringified `_id`, then
/// one column per leaf field named by its canonical path. Canonical names
/// that collide get a numeric suffix. Unique single-field source indexes
/// become unique constraints.
pub fn generate_table(schema: &CollectionSchema) -> GeneratedTable {
    let mut columns = vec![ColumnDescriptor::new(ID_COLUMN, id_column_type(schema)).primary()];
    let mut mappings = vec![ColumnMapping::new(ID_FIELD, ID_COLUMN).with_transformation(STRINGIFY_ID)];
    let mut taken: HashSet<String> = HashSet::from([ID_COLUMN.to_string()]);

    let unique_fields: HashSet<&str> = schema
        .indexes
        .iter()
        .flatten()
        .filter(|idx| idx.unique && idx.fields.len() == 1)
        .map(|idx| idx.fields[0].as_str())
        .collect();

    for name in leaf_fields(schema) {
        let Some(field) = schema.field(name) else {
            continue;
        };

        let base = match canonicalize(name) {
            c if c.is_empty() => "field".to_string(),
            c => c,
        };
        let mut column_name = base.clone();
        let mut n = 2;
        while !taken.insert(column_name.clone()) {
            column_name = format!("{base}_{n}");
            n += 1;
        }

        let mut column = ColumnDescriptor::new(
            column_name.clone(),
            type_tag_to_postgres(field.type_tag, field.is_array),
        );
        if unique_fields.contains(name) {
            column = column.unique();
        }
        columns.push(column);
        mappings.push(ColumnMapping::new(name, column_name));
    }

    GeneratedTable { columns, mappings }
}

fn id_column_type(schema: &CollectionSchema) -> &'static str {
    match schema.field(ID_FIELD).map(|f| f.type_tag) {
        Some(TypeTag::ObjectId) | None => "varchar(24)",
        Some(_) => "text",
    }
}

/// Give a proposed table a column that receives the document identifier.
///
/// Columns that already have an identifier column are returned unchanged.
/// Otherwise the generated `id` key is prepended, as a unique column when the
/// proposal has its own primary key. Returns `None` when the proposal uses
/// the name `id` for an unconstrained column.
pub fn ensure_identifier(
    mut columns: Vec<ColumnDescriptor>,
    schema: &CollectionSchema,
) -> Option<Vec<ColumnDescriptor>> {
    if identifier_column(&columns).is_some() {
        return Some(columns);
    }
    if columns.iter().any(|c| canonicalize(&c.name) == ID_COLUMN) {
        return None;
    }

    let key = ColumnDescriptor::new(ID_COLUMN, id_column_type(schema));
    let key = if columns.iter().any(|c| c.primary_key) {
        ColumnDescriptor {
            nullable: false,
            ..key.unique()
        }
    } else {
        key.primary()
    };
    columns.insert(0, key);
    Some(columns)
}
