//! BSON to [`DocValue`] conversion.

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document as BsonDocument};

use crate::core::{DocValue, Document};

/// Convert a BSON document, preserving key order.
pub fn from_bson_document(doc: BsonDocument) -> Document {
    doc.into_iter()
        .map(|(key, value)| (key, from_bson(value)))
        .collect()
}

/// Convert a single BSON value.
pub fn from_bson(value: Bson) -> DocValue {
    match value {
        Bson::Null | Bson::Undefined => DocValue::Null,
        Bson::Boolean(b) => DocValue::Bool(b),
        Bson::Int32(n) => DocValue::Int(n as i64),
        Bson::Int64(n) => DocValue::Int(n),
        Bson::Double(f) => DocValue::Double(f),
        Bson::Decimal128(d) => DocValue::Decimal(d.to_string()),
        Bson::String(s) | Bson::Symbol(s) => DocValue::String(s),
        Bson::ObjectId(oid) => DocValue::ObjectId(oid.to_hex()),
        Bson::DateTime(dt) => match DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis()) {
            Some(dt) => DocValue::DateTime(dt),
            // Outside chrono's range.
            None => DocValue::Other(dt.to_string()),
        },
        Bson::Binary(bin) => DocValue::Binary(bin.bytes),
        Bson::Array(items) => DocValue::Array(items.into_iter().map(from_bson).collect()),
        Bson::Document(doc) => DocValue::Document(from_bson_document(doc)),
        Bson::Timestamp(ts) => DocValue::Other(format!("Timestamp({}, {})", ts.time, ts.increment)),
        Bson::RegularExpression(re) => DocValue::Other(format!("/{}/{}", re.pattern, re.options)),
        Bson::JavaScriptCode(code) => DocValue::Other(code),
        Bson::JavaScriptCodeWithScope(cws) => DocValue::Other(cws.code),
        Bson::MaxKey => DocValue::Other("MaxKey".to_string()),
        Bson::MinKey => DocValue::Other("MinKey".to_string()),
        other => DocValue::Other(other.to_string()),
    }
}
