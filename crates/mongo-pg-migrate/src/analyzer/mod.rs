//! Schema inference by sampling source documents.
//!
//! [`infer_type`] classifies a single value. [`SchemaBuilder`] folds the
//! observations from many documents into one [`CollectionSchema`], and
//! [`SchemaAnalyzer`] drives it against a [`DocumentSource`].

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::value::join_path;
use crate::core::{
    CollectionSchema, DocValue, Document, DocumentSource, FieldDescriptor, TypeTag,
};
use crate::error::{MigrateError, Result};

/// Default number of documents sampled per collection.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Classify one value into a [`TypeTag`].
///
/// Total and pure. Object identifiers are only reported as `objectId` when
/// their hex form is a 24-character hex string; plain strings are always
/// `string`, even when they look like an identifier.
pub fn infer_type(value: &DocValue) -> TypeTag {
    match value {
        DocValue::Null => TypeTag::Null,
        DocValue::ObjectId(hex) if is_object_id_hex(hex) => TypeTag::ObjectId,
        DocValue::ObjectId(_) | DocValue::String(_) => TypeTag::String,
        DocValue::Int(_) | DocValue::Double(_) | DocValue::Decimal(_) => TypeTag::Number,
        DocValue::Bool(_) => TypeTag::Boolean,
        DocValue::DateTime(_) => TypeTag::Date,
        DocValue::Array(_) => TypeTag::Array,
        DocValue::Document(_) => TypeTag::Object,
        DocValue::Binary(_) => TypeTag::Binary,
        DocValue::Other(_) => TypeTag::String,
    }
}

/// Check for the `^[a-fA-F0-9]{24}$` object identifier form.
pub fn is_object_id_hex(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug)]
struct FieldStats {
    descriptor: FieldDescriptor,
    /// Documents in which the field held a non-null value.
    present_in: usize,
    /// Last document index that counted towards `present_in`.
    last_seen: Option<usize>,
}

/// Accumulates per-field observations across sampled documents.
///
/// Field order is first-observed order. A field's type is fixed by its first
/// non-null observation; later observations never change it.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldStats>,
    index: HashMap<String, usize>,
    documents: usize,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one document into the builder.
    pub fn observe(&mut self, doc: &Document) {
        let doc_idx = self.documents;
        self.documents += 1;
        self.walk(doc, "", doc_idx);
    }

    fn walk(&mut self, doc: &Document, prefix: &str, doc_idx: usize) {
        for (key, value) in doc.iter() {
            let path = join_path(prefix, key);
            self.record(&path, value, doc_idx);

            match value {
                DocValue::Document(inner) => self.walk(inner, &path, doc_idx),
                // Only the first element of a sequence is inspected.
                DocValue::Array(items) => {
                    if let Some(DocValue::Document(first)) = items.first() {
                        self.walk(first, &path, doc_idx);
                    }
                }
                _ => {}
            }
        }
    }

    /// Record a single observation of `path`.
    pub fn record(&mut self, path: &str, value: &DocValue, doc_idx: usize) {
        let type_tag = infer_type(value);
        let is_array = matches!(value, DocValue::Array(_));

        let idx = match self.index.get(path) {
            Some(&idx) => idx,
            None => {
                self.fields.push(FieldStats {
                    descriptor: FieldDescriptor {
                        name: path.to_string(),
                        type_tag,
                        is_array,
                        is_required: false,
                    },
                    present_in: 0,
                    last_seen: None,
                });
                self.index.insert(path.to_string(), self.fields.len() - 1);
                self.fields.len() - 1
            }
        };

        let stats = &mut self.fields[idx];
        if stats.descriptor.type_tag == TypeTag::Null && type_tag != TypeTag::Null {
            stats.descriptor.type_tag = type_tag;
            stats.descriptor.is_array = is_array;
        }
        if type_tag != TypeTag::Null && stats.last_seen != Some(doc_idx) {
            stats.present_in += 1;
            stats.last_seen = Some(doc_idx);
        }
    }

    /// Number of documents observed so far.
    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Finish into a schema.
    ///
    /// A field is required when it held a non-null value in every observed
    /// document.
    pub fn finish(self, name: impl Into<String>) -> CollectionSchema {
        let documents = self.documents;
        let fields = self
            .fields
            .into_iter()
            .map(|stats| {
                let mut descriptor = stats.descriptor;
                descriptor.is_required = documents > 0 && stats.present_in == documents;
                descriptor
            })
            .collect();

        CollectionSchema {
            name: name.into(),
            fields,
            indexes: None,
            sampled_documents: documents,
        }
    }
}

/// Infers collection schemas from a document source.
pub struct SchemaAnalyzer<'a> {
    source: &'a dyn DocumentSource,
    sample_size: usize,
}

impl<'a> SchemaAnalyzer<'a> {
    pub fn new(source: &'a dyn DocumentSource) -> Self {
        Self {
            source,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    /// Override the number of documents sampled per collection.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    /// Analyze one collection.
    ///
    /// An empty collection yields a schema with no fields. Index metadata is
    /// attached when the source can list indexes; failing to do so is logged
    /// and does not fail the analysis.
    pub async fn analyze(&self, collection: &str) -> Result<CollectionSchema> {
        if !self.source.is_connected() {
            return Err(MigrateError::NotConnected("document"));
        }

        let documents = self
            .source
            .sample_documents(collection, self.sample_size)
            .await
            .map_err(|e| MigrateError::analysis(collection, e.to_string()))?;

        let mut builder = SchemaBuilder::new();
        for doc in &documents {
            builder.observe(doc);
        }
        let mut schema = builder.finish(collection);

        match self.source.list_indexes(collection).await {
            Ok(indexes) => schema.indexes = Some(indexes),
            Err(e) => warn!("{}: could not list indexes: {}", collection, e),
        }

        debug!(
            "{}: inferred {} fields from {} sampled documents",
            collection,
            schema.fields.len(),
            schema.sampled_documents
        );
        Ok(schema)
    }
}
