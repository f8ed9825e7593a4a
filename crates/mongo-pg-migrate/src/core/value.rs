//! Document value model for source data.
//!
//! Source documents are dynamically shaped trees. They are represented as a
//! tagged union ([`DocValue`]) so the analyzer and the writers can walk them
//! without depending on the source driver's own types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as JsonValue};

/// A single value inside a source document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    /// Explicit null (or undefined).
    Null,

    /// Boolean value.
    Bool(bool),

    /// Integer (32 or 64 bit in the source).
    Int(i64),

    /// Floating point number.
    Double(f64),

    /// Arbitrary precision decimal, kept in its textual form.
    Decimal(String),

    /// UTF-8 string.
    String(String),

    /// Object identifier wrapper, holding the hex representation.
    ObjectId(String),

    /// Point in time.
    DateTime(DateTime<Utc>),

    /// Binary payload.
    Binary(Vec<u8>),

    /// Ordered sequence of values.
    Array(Vec<DocValue>),

    /// Embedded document.
    Document(Document),

    /// Any other source value (regex, code, min/max keys), in display form.
    Other(String),
}

impl DocValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, DocValue::Null)
    }

    /// Render as a plain string, used for identifier columns.
    ///
    /// Object ids become their 24-character hex form, strings are used as-is
    /// and composite values are rendered as JSON.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            DocValue::Null => None,
            DocValue::Bool(b) => Some(b.to_string()),
            DocValue::Int(n) => Some(n.to_string()),
            DocValue::Double(f) => Some(f.to_string()),
            DocValue::Decimal(d) => Some(d.clone()),
            DocValue::String(s) | DocValue::ObjectId(s) | DocValue::Other(s) => Some(s.clone()),
            DocValue::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            DocValue::Binary(bytes) => Some(hex::encode(bytes)),
            DocValue::Array(_) | DocValue::Document(_) => Some(self.to_json().to_string()),
        }
    }

    /// Convert to a JSON value (used for JSONB columns and advisor prompts).
    pub fn to_json(&self) -> JsonValue {
        match self {
            DocValue::Null => JsonValue::Null,
            DocValue::Bool(b) => JsonValue::Bool(*b),
            DocValue::Int(n) => JsonValue::Number((*n).into()),
            DocValue::Double(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DocValue::Decimal(d) => JsonValue::String(d.clone()),
            DocValue::String(s) | DocValue::ObjectId(s) | DocValue::Other(s) => {
                JsonValue::String(s.clone())
            }
            DocValue::DateTime(dt) => {
                JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            DocValue::Binary(bytes) => JsonValue::String(hex::encode(bytes)),
            DocValue::Array(items) => JsonValue::Array(items.iter().map(|v| v.to_json()).collect()),
            DocValue::Document(doc) => doc.to_json(),
        }
    }
}

/// An ordered set of key/value pairs.
///
/// Key order is preserved from the source so that analysis and mapping
/// results are stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, DocValue)>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any existing value with the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: DocValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: DocValue) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a top-level value.
    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Resolve a dotted path (`address.city`) through embedded documents.
    pub fn get_path(&self, path: &str) -> Option<&DocValue> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            match current {
                DocValue::Document(doc) => current = doc.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// The document identifier (`_id`), if present.
    pub fn id(&self) -> Option<&DocValue> {
        self.get("_id")
    }

    /// Iterate over key/value pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dotted paths of every leaf value, in source order.
    ///
    /// Embedded documents are expanded; arrays and scalars are leaves. An
    /// empty embedded document is reported as a leaf itself.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_leaf_paths(self, "", &mut paths);
        paths
    }

    /// Convert to a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (k, v) in &self.entries {
            map.insert(k.clone(), v.to_json());
        }
        JsonValue::Object(map)
    }
}

fn collect_leaf_paths(doc: &Document, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in doc.iter() {
        let path = join_path(prefix, key);
        match value {
            DocValue::Document(inner) if !inner.is_empty() => {
                collect_leaf_paths(inner, &path, out)
            }
            _ => out.push(path),
        }
    }
}

/// Join a parent path and a key with a dot.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

impl FromIterator<(String, DocValue)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, DocValue)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl From<&str> for DocValue {
    fn from(v: &str) -> Self {
        DocValue::String(v.to_string())
    }
}

impl From<String> for DocValue {
    fn from(v: String) -> Self {
        DocValue::String(v)
    }
}

impl From<i64> for DocValue {
    fn from(v: i64) -> Self {
        DocValue::Int(v)
    }
}

impl From<i32> for DocValue {
    fn from(v: i32) -> Self {
        DocValue::Int(v as i64)
    }
}

impl From<f64> for DocValue {
    fn from(v: f64) -> Self {
        DocValue::Double(v)
    }
}

impl From<bool> for DocValue {
    fn from(v: bool) -> Self {
        DocValue::Bool(v)
    }
}

impl From<Document> for DocValue {
    fn from(v: Document) -> Self {
        DocValue::Document(v)
    }
}
