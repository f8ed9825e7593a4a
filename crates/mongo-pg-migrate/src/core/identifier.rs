//! Identifier canonicalization, validation and quoting.
//!
//! Source field paths and collection names are free-form; destination
//! identifiers are not. Every name crossing that boundary goes through
//! [`canonicalize`] first, and every identifier spliced into SQL goes through
//! [`quote_pg`].

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted before quoting.
/// PostgreSQL truncates at 63 bytes; longer names are rejected outright.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Canonicalize a name into a safe relational identifier.
///
/// Lowercases ASCII letters, replaces every character outside `[a-z0-9_]`
/// with `_` and prefixes a leading digit with `_`. Dots in field paths
/// therefore become underscores (`profile.age` -> `profile_age`).
///
/// The function is idempotent: `canonicalize(&canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    for c in name.chars() {
        let lower = c.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '_' {
            out.push(lower);
        } else {
            out.push('_');
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Strip surrounding quote characters from an identifier taken from SQL text.
///
/// Handles `"name"`, `` `name` ``, `[name]` and `'name'`.
pub fn unquote(name: &str) -> String {
    name.trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']' | '\''))
        .to_string()
}

/// Take the unqualified part of a possibly schema-qualified name and unquote it.
///
/// `public."Users"` -> `Users`.
pub fn unqualified(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    unquote(last)
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}
