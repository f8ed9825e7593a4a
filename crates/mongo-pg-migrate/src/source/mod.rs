//! MongoDB source operations.

mod convert;

pub use convert::{from_bson, from_bson_document};

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document as BsonDocument};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database};
use tracing::{debug, info};

use crate::config::{redact_uri, SourceConfig};
use crate::core::{Document, DocumentSource, IndexDescriptor};
use crate::error::{MigrateError, Result};

/// Name of the index MongoDB creates on `_id` for every collection.
const DEFAULT_ID_INDEX: &str = "_id_";

/// MongoDB document source.
pub struct MongoSource {
    client: Client,
    db: Database,
    connected: AtomicBool,
}

impl MongoSource {
    /// Connect and verify the server answers a ping.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| MigrateError::connection("MongoDB", e.to_string()))?;
        options.app_name = Some("mongo-pg-migrate".to_string());

        let client = Client::with_options(options)
            .map_err(|e| MigrateError::connection("MongoDB", e.to_string()))?;
        let db = client.database(&config.database);

        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| MigrateError::connection("MongoDB", e.to_string()))?;

        info!(
            "Connected to MongoDB: {}/{}",
            redact_uri(&config.uri),
            config.database
        );

        Ok(Self {
            client,
            db,
            connected: AtomicBool::new(true),
        })
    }

    fn collection(&self, name: &str) -> Result<Collection<BsonDocument>> {
        if !self.is_connected() {
            return Err(MigrateError::NotConnected("MongoDB"));
        }
        Ok(self.db.collection::<BsonDocument>(name))
    }
}

#[async_trait]
impl DocumentSource for MongoSource {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        if !self.is_connected() {
            return Err(MigrateError::NotConnected("MongoDB"));
        }
        let mut names = self.db.list_collection_names(None).await?;
        // Internal collections are never migrated.
        names.retain(|n| !n.starts_with("system."));
        names.sort();
        Ok(names)
    }

    async fn sample_documents(&self, collection: &str, size: usize) -> Result<Vec<Document>> {
        let coll = self.collection(collection)?;
        let pipeline = vec![doc! { "$sample": { "size": size as i64 } }];
        let docs: Vec<BsonDocument> = coll.aggregate(pipeline, None).await?.try_collect().await?;

        debug!("Sampled {} documents from {}", docs.len(), collection);
        Ok(docs.into_iter().map(from_bson_document).collect())
    }

    async fn find_one(&self, collection: &str) -> Result<Option<Document>> {
        let coll = self.collection(collection)?;
        Ok(coll.find_one(None, None).await?.map(from_bson_document))
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        let coll = self.collection(collection)?;
        Ok(coll.count_documents(None, None).await?)
    }

    async fn fetch_page(&self, collection: &str, skip: u64, limit: usize) -> Result<Vec<Document>> {
        let coll = self.collection(collection)?;
        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .skip(skip)
            .limit(limit as i64)
            .build();

        let docs: Vec<BsonDocument> = coll.find(None, options).await?.try_collect().await?;
        Ok(docs.into_iter().map(from_bson_document).collect())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>> {
        let coll = self.collection(collection)?;
        let models: Vec<_> = coll.list_indexes(None).await?.try_collect().await?;

        let indexes = models
            .into_iter()
            .filter_map(|model| {
                let options = model.options.unwrap_or_default();
                let name = options.name.unwrap_or_default();
                if name == DEFAULT_ID_INDEX {
                    return None;
                }
                Some(IndexDescriptor {
                    name,
                    fields: model.keys.keys().cloned().collect(),
                    unique: options.unique.unwrap_or(false),
                })
            })
            .collect();

        Ok(indexes)
    }

    fn db_type(&self) -> &str {
        "mongodb"
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.client.clone().shutdown().await;
            debug!("MongoDB connection closed");
        }
    }
}
