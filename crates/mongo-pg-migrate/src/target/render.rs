//! SQL text generation for DDL and batched inserts.
//!
//! Inserts use literal values rather than bind parameters: every value is
//! rendered as a quoted string and PostgreSQL coerces it to the column type.
//! That keeps one code path for columns whose types are only known at run
//! time (existing tables, advisor proposals).

use std::sync::OnceLock;

use regex::Regex;

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{ColumnDescriptor, ColumnMapping, DocValue, Document};
use crate::error::{MigrateError, Result};
use crate::mapping::STRINGIFY_ID;

fn type_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_ ]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?(\s*\[\])?$")
            .expect("type name pattern is valid")
    })
}

/// Reject type names that could smuggle SQL into DDL.
fn validate_type_name(table: &str, data_type: &str) -> Result<()> {
    if type_name_re().is_match(data_type.trim()) {
        Ok(())
    } else {
        Err(MigrateError::transfer(
            table,
            format!("invalid column type: {:?}", data_type),
        ))
    }
}

/// `CREATE TABLE IF NOT EXISTS` for the given columns.
pub fn build_create_table_sql(
    schema: &str,
    table: &str,
    columns: &[ColumnDescriptor],
) -> Result<String> {
    if columns.is_empty() {
        return Err(MigrateError::transfer(table, "cannot create a table without columns"));
    }

    let mut defs = Vec::with_capacity(columns.len());
    let primary: Vec<&ColumnDescriptor> = columns.iter().filter(|c| c.primary_key).collect();

    for col in columns {
        validate_type_name(table, &col.data_type)?;
        let mut def = format!("    {} {}", quote_pg(&col.name)?, col.data_type.trim());
        if !col.nullable && !col.primary_key {
            def.push_str(" NOT NULL");
        }
        if col.unique && !col.primary_key {
            def.push_str(" UNIQUE");
        }
        if let Some(r) = &col.references {
            def.push_str(&format!(
                " REFERENCES {} ({})",
                qualify_pg(schema, &r.table)?,
                quote_pg(&r.column)?
            ));
        }
        defs.push(def);
    }

    if !primary.is_empty() {
        let cols = primary
            .iter()
            .map(|c| quote_pg(&c.name))
            .collect::<Result<Vec<_>>>()?;
        defs.push(format!("    PRIMARY KEY ({})", cols.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        qualify_pg(schema, table)?,
        defs.join(",\n")
    ))
}

/// Escape a string for SQL literal use.
fn escape_sql_string(s: &str) -> String {
    s.replace('\0', "").replace('\'', "''")
}

/// Render one value as a SQL literal for the destination column.
///
/// `column` is `None` when the destination type is unknown; values are then
/// rendered as text.
pub fn value_to_literal(
    value: Option<&DocValue>,
    column: Option<&ColumnDescriptor>,
    transformation: Option<&str>,
) -> String {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return "NULL".to_string();
    };

    let is_json = column.map(|c| c.is_json()).unwrap_or(false);
    let is_bytea = column
        .map(|c| c.data_type.eq_ignore_ascii_case("bytea"))
        .unwrap_or(false);

    let text = match value {
        _ if transformation == Some(STRINGIFY_ID) => value.to_plain_string(),
        _ if is_json => Some(value.to_json().to_string()),
        DocValue::Binary(bytes) if is_bytea => Some(format!("\\x{}", hex::encode(bytes))),
        _ => value.to_plain_string(),
    };

    match text {
        Some(text) => format!("'{}'", escape_sql_string(&text)),
        None => "NULL".to_string(),
    }
}

/// Build a multi-row `INSERT ... ON CONFLICT DO NOTHING` for a batch.
///
/// Rows that would violate a primary key or unique constraint are skipped,
/// so re-running a batch is harmless.
pub fn build_insert_sql(
    schema: &str,
    table: &str,
    mappings: &[ColumnMapping],
    columns: &[ColumnDescriptor],
    documents: &[Document],
) -> Result<String> {
    let col_list = mappings
        .iter()
        .map(|m| quote_pg(&m.destination_column))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let targets: Vec<Option<&ColumnDescriptor>> = mappings
        .iter()
        .map(|m| columns.iter().find(|c| c.name == m.destination_column))
        .collect();

    let value_rows: Vec<String> = documents
        .iter()
        .map(|doc| {
            let values: Vec<String> = mappings
                .iter()
                .zip(&targets)
                .map(|(m, col)| {
                    value_to_literal(
                        doc.get_path(&m.source_field),
                        *col,
                        m.transformation.as_deref(),
                    )
                })
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
        qualify_pg(schema, table)?,
        col_list,
        value_rows.join(", ")
    ))
}
