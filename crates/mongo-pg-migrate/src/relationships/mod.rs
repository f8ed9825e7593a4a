//! Foreign-key recovery from relational schema-definition scripts.
//!
//! This is a pattern scan, not a SQL parser. The script is first cleaned
//! (comments removed, whitespace collapsed) and then searched for two forms
//! of reference declaration:
//!
//! - explicit: `FOREIGN KEY (col) REFERENCES other (col)`
//! - inline: `col TYPE ... REFERENCES other (col)` inside a column list
//!
//! Each match is attributed to the nearest preceding `CREATE TABLE` (or
//! `ALTER TABLE`) header. Matches with no header are dropped.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::core::identifier::{unqualified, unquote};
use crate::core::TableRelationship;

/// A quoted or bare identifier.
const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|\w+)"#;

fn qualified_ident() -> String {
    format!(r"{IDENT}(?:\s*\.\s*{IDENT})?")
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(?:CREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?|ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?)({})",
            qualified_ident()
        ))
        .expect("table header pattern is valid")
    })
}

fn create_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\bCREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?({})",
            qualified_ident()
        ))
        .expect("create table pattern is valid")
    })
}

fn explicit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\bFOREIGN\s+KEY\s*\(\s*({IDENT})\s*\)\s*REFERENCES\s+({})\s*\(\s*({IDENT})\s*\)",
            qualified_ident()
        ))
        .expect("foreign key pattern is valid")
    })
}

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)[,(]\s*({IDENT})\s+[^,()]*?\bREFERENCES\s+({})\s*\(\s*({IDENT})\s*\)",
            qualified_ident()
        ))
        .expect("inline reference pattern is valid")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Remove `--` line comments and `/* */` block comments.
///
/// Block comments do not nest; an unterminated block comment swallows the
/// rest of the script.
pub fn strip_comments(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut rest = script;

    while !rest.is_empty() {
        let line = rest.find("--");
        let block = rest.find("/*");
        match (line, block) {
            (Some(l), b) if b.map_or(true, |b| l < b) => {
                out.push_str(&rest[..l]);
                rest = match rest[l..].find('\n') {
                    Some(nl) => &rest[l + nl..],
                    None => "",
                };
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                // Keep tokens on either side of the comment apart.
                out.push(' ');
                rest = match rest[b + 2..].find("*/") {
                    Some(end) => &rest[b + 2 + end + 2..],
                    None => "",
                };
            }
            _ => {
                out.push_str(rest);
                rest = "";
            }
        }
    }

    out
}

/// Strip comments and collapse every whitespace run to a single space.
pub fn clean_script(script: &str) -> String {
    let stripped = strip_comments(script);
    whitespace_re()
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Extract declared foreign keys from a schema script.
///
/// Relationships are returned in the order their declarations appear in the
/// script. Duplicate declarations are kept. Input that matches nothing
/// yields an empty list; this function never fails.
pub fn parse_relationships(script: &str) -> Vec<TableRelationship> {
    let cleaned = clean_script(script);

    let headers: Vec<(usize, String)> = header_re()
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), unqualified(caps.get(1)?.as_str())))
        })
        .collect();

    let mut found: Vec<(usize, TableRelationship)> = Vec::new();
    for re in [explicit_re(), inline_re()] {
        for caps in re.captures_iter(&cleaned) {
            let (Some(whole), Some(column), Some(ref_table), Some(ref_column)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };

            let Some(owner) = owning_table(&headers, whole.start()) else {
                debug!(
                    "Dropping reference to {} with no preceding table header",
                    ref_table.as_str()
                );
                continue;
            };

            found.push((
                whole.start(),
                TableRelationship::new(
                    owner,
                    unqualified(ref_table.as_str()),
                    unquote(column.as_str()),
                    unquote(ref_column.as_str()),
                ),
            ));
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    let relationships: Vec<TableRelationship> = found.into_iter().map(|(_, r)| r).collect();

    debug!("Parsed {} relationships from schema script", relationships.len());
    relationships
}

/// Names of tables created by the script, in declaration order, without duplicates.
pub fn parse_table_names(script: &str) -> Vec<String> {
    let cleaned = clean_script(script);
    let mut names: Vec<String> = Vec::new();
    for caps in create_header_re().captures_iter(&cleaned) {
        if let Some(name) = caps.get(1) {
            let name = unqualified(name.as_str());
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Nearest header starting before `offset`.
fn owning_table(headers: &[(usize, String)], offset: usize) -> Option<String> {
    let idx = headers.partition_point(|(start, _)| *start < offset);
    if idx == 0 {
        return None;
    }
    Some(headers[idx - 1].1.clone())
}
