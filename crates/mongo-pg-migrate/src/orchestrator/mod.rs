//! Migration orchestrator - main workflow coordinator.

use crate::advisor::HttpAdvisor;
use crate::analyzer::SchemaAnalyzer;
use crate::config::{Config, MigrationMode};
use crate::core::{
    canonicalize, Advisor, ColumnDescriptor, ColumnMapping, DocumentSource, RelationalTarget,
    TableRelationship,
};
use crate::dependency::insertion_order;
use crate::error::{MigrateError, Result};
use crate::mapping::{fallback_mapping, resolve_mapping, validate_mappings, ID_FIELD};
use crate::relationships::parse_relationships;
use crate::source::MongoSource;
use crate::target::PgTarget;
use crate::typemap::{ensure_identifier, generate_table, leaf_fields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn DocumentSource>,
    target: Arc<dyn RelationalTarget>,
    advisor: Option<Arc<dyn Advisor>>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// True when no collection recorded an error.
    pub success: bool,

    /// Collections copied, in insertion order.
    pub migrated_collections: Vec<String>,

    /// Collections skipped with a warning (missing table, empty, nothing mapped).
    pub skipped_collections: Vec<String>,

    /// One entry per failed collection, prefixed with its name.
    pub errors: Vec<String>,

    /// Documents read from the source.
    pub total_documents: u64,

    /// Rows actually inserted (conflicting rows are not counted).
    pub rows_inserted: u64,

    /// Total duration in seconds.
    pub migration_time_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Hash of the run configuration, secrets excluded.
    pub config_hash: String,
}

impl MigrationResult {
    fn new(run_id: String, config_hash: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            success: false,
            migrated_collections: Vec::new(),
            skipped_collections: Vec::new(),
            errors: Vec::new(),
            total_documents: 0,
            rows_inserted: 0,
            migration_time_seconds: 0.0,
            started_at: now,
            completed_at: now,
            config_hash,
        }
    }

    /// One-line progress summary, also meaningful for an aborted run.
    pub fn summary(&self) -> String {
        format!(
            "{} collections migrated, {} skipped, {} failed, {} documents in {:.1}s",
            self.migrated_collections.len(),
            self.skipped_collections.len(),
            self.errors.len(),
            self.total_documents,
            self.migration_time_seconds
        )
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Counters for one collection copy.
#[derive(Debug, Default, Clone, Copy)]
struct CopyStats {
    read: u64,
    inserted: u64,
}

/// Outcome of one collection.
enum CollectionOutcome {
    Migrated(CopyStats),
    Skipped,
}

/// A collection paired with the destination table it feeds.
#[derive(Debug, Clone)]
struct Plan {
    collection: String,
    table: String,
}

impl Orchestrator {
    /// Connect both stores and the optional advisor.
    ///
    /// If the target cannot be reached the already open source is closed
    /// before the error is returned.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MongoSource::connect(&config.source).await?;

        let target = match PgTarget::connect(&config.target).await {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };

        let advisor = HttpAdvisor::shared(config.advisor.as_ref());
        if advisor.is_some() {
            info!("Advisor enabled");
        }

        Ok(Self::with_collaborators(
            config,
            Arc::new(source),
            Arc::new(target),
            advisor,
        ))
    }

    /// Build an orchestrator around already connected collaborators.
    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn DocumentSource>,
        target: Arc<dyn RelationalTarget>,
        advisor: Option<Arc<dyn Advisor>>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            advisor,
        }
    }

    /// Run the migration.
    ///
    /// Both stores are closed before this returns, on every path.
    pub async fn run(self, cancel: CancellationToken) -> Result<MigrationResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut result = MigrationResult::new(run_id, self.config.hash());
        let clock = Instant::now();

        info!(
            "Starting migration run {} (mode: {})",
            result.run_id, self.config.migration.mode
        );

        let outcome = self.run_collections(&mut result, &cancel).await;
        self.close().await;

        result.completed_at = Utc::now();
        result.migration_time_seconds = clock.elapsed().as_secs_f64();
        result.success = result.errors.is_empty();

        if let Err(e) = outcome {
            error!("Migration aborted: {} (before abort: {})", e, result.summary());
            return Err(e);
        }

        info!(
            "Migration {}: {}",
            if result.success { "completed" } else { "completed with errors" },
            result.summary()
        );

        Ok(result)
    }

    /// Release both stores.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn run_collections(
        &self,
        result: &mut MigrationResult,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let relationships = self.load_relationships().await?;
        let plans = self.plan(&relationships).await?;

        info!("Found {} collections to migrate", plans.len());

        for plan in &plans {
            if cancel.is_cancelled() {
                warn!("Cancellation requested, stopping before {}", plan.collection);
                return Err(MigrateError::Cancelled);
            }

            info!("Migrating collection {} -> {}", plan.collection, plan.table);
            let outcome = match self.config.migration.mode {
                MigrationMode::GenerateTables => self.migrate_generated(plan, cancel).await,
                MigrationMode::ExistingTables => self.migrate_existing(plan, cancel).await,
            };

            match outcome {
                Ok(CollectionOutcome::Migrated(stats)) => {
                    info!(
                        "Collection {}: {} documents read, {} rows inserted",
                        plan.collection, stats.read, stats.inserted
                    );
                    result.total_documents += stats.read;
                    result.rows_inserted += stats.inserted;
                    result.migrated_collections.push(plan.collection.clone());
                }
                Ok(CollectionOutcome::Skipped) => {
                    result.skipped_collections.push(plan.collection.clone());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Collection {} failed: {}", plan.collection, e);
                    result.errors.push(format!("{}: {}", plan.collection, e));
                }
            }
        }

        Ok(())
    }

    /// Read, (in generate mode) execute, and parse the schema script.
    async fn load_relationships(&self) -> Result<Vec<TableRelationship>> {
        let Some(path) = &self.config.migration.schema_script else {
            return Ok(Vec::new());
        };

        let script = match tokio::fs::read_to_string(path).await {
            Ok(script) => script,
            Err(e) => match self.config.migration.mode {
                MigrationMode::GenerateTables => {
                    return Err(MigrateError::SchemaScript(format!(
                        "cannot read {}: {}",
                        path.display(),
                        e
                    )));
                }
                MigrationMode::ExistingTables => {
                    warn!(
                        "Cannot read schema script {}: {}; continuing without relationships",
                        path.display(),
                        e
                    );
                    return Ok(Vec::new());
                }
            },
        };

        if self.config.migration.mode == MigrationMode::GenerateTables {
            info!("Executing schema script {}", path.display());
            // Script failures abort the run.
            self.target.execute_script(&script).await.map_err(|e| match e {
                MigrateError::SchemaScript(msg) => MigrateError::SchemaScript(msg),
                other => MigrateError::SchemaScript(other.to_string()),
            })?;
        }

        let relationships: Vec<TableRelationship> = parse_relationships(&script)
            .into_iter()
            .map(|r| {
                TableRelationship::new(
                    canonicalize(&r.table_name),
                    canonicalize(&r.referenced_table),
                    r.column_name,
                    r.referenced_column,
                )
            })
            .collect();

        info!(
            "Schema script declares {} relationships",
            relationships.len()
        );
        Ok(relationships)
    }

    /// Filtered collections in dependency order.
    async fn plan(&self, relationships: &[TableRelationship]) -> Result<Vec<Plan>> {
        let mut collections = self.source.list_collections().await?;
        collections.retain(|c| self.config.migration.accepts(c));
        collections.sort();

        let mut by_table: HashMap<String, String> = HashMap::new();
        let mut tables = Vec::with_capacity(collections.len());
        for collection in collections {
            let table = canonicalize(&collection);
            if let Some(existing) = by_table.get(&table) {
                warn!(
                    "Collections {} and {} both map to table {}; skipping {}",
                    existing, collection, table, collection
                );
                continue;
            }
            by_table.insert(table.clone(), collection);
            tables.push(table);
        }

        Ok(insertion_order(&tables, relationships)
            .into_iter()
            .filter_map(|table| {
                by_table.remove(&table).map(|collection| Plan { collection, table })
            })
            .collect())
    }

    async fn migrate_generated(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<CollectionOutcome> {
        let schema = SchemaAnalyzer::new(self.source.as_ref())
            .with_sample_size(self.config.migration.sample_size)
            .analyze(&plan.collection)
            .await?;

        let mut source_fields = vec![ID_FIELD.to_string()];
        source_fields.extend(leaf_fields(&schema).into_iter().map(str::to_string));

        let existed = self.target.table_exists(&plan.table).await?;
        let mappings = if existed {
            info!("Table {} already exists; mapping onto its columns", plan.table);
            let live = self.target.describe_table(&plan.table).await?;
            fallback_mapping(&source_fields, &live)
        } else {
            let proposed = match &self.advisor {
                Some(advisor) => advisor.propose_table(&schema).await,
                None => None,
            };
            let proposed = proposed.and_then(|columns| {
                let checked = ensure_identifier(columns, &schema);
                if checked.is_none() {
                    warn!(
                        "Advisor table for {} has no usable identifier column; generating one",
                        plan.table
                    );
                }
                checked
            });

            let (columns, mappings) = match proposed {
                Some(columns) => {
                    debug!("Using advisor table for {}", plan.table);
                    let mappings = fallback_mapping(&source_fields, &columns);
                    (columns, mappings)
                }
                None => {
                    let generated = generate_table(&schema);
                    (generated.columns, generated.mappings)
                }
            };

            self.target.create_table(&plan.table, &columns).await?;
            mappings
        };

        let live = self.target.describe_table(&plan.table).await?;
        let mappings = validate_mappings(mappings, &live);
        if mappings.is_empty() {
            warn!("No usable mappings for {}; skipping", plan.collection);
            return Ok(CollectionOutcome::Skipped);
        }

        let stats = self.copy_documents(plan, &mappings, &live, cancel).await?;
        Ok(CollectionOutcome::Migrated(stats))
    }

    async fn migrate_existing(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<CollectionOutcome> {
        if !self.target.table_exists(&plan.table).await? {
            warn!(
                "Table {} does not exist; skipping collection {}",
                plan.table, plan.collection
            );
            return Ok(CollectionOutcome::Skipped);
        }

        let Some(sample) = self.source.find_one(&plan.collection).await? else {
            warn!("Collection {} is empty; skipping", plan.collection);
            return Ok(CollectionOutcome::Skipped);
        };

        let columns = self.target.describe_table(&plan.table).await?;
        let hint = match &self.advisor {
            Some(advisor) => advisor.propose_mapping(&sample, &columns).await,
            None => None,
        };

        let mappings = resolve_mapping(&sample.leaf_paths(), &columns, hint);
        let mappings = validate_mappings(mappings, &columns);
        if mappings.is_empty() {
            warn!(
                "No fields of {} match columns of {}; skipping",
                plan.collection, plan.table
            );
            return Ok(CollectionOutcome::Skipped);
        }

        let stats = self.copy_documents(plan, &mappings, &columns, cancel).await?;
        Ok(CollectionOutcome::Migrated(stats))
    }

    /// Page through the collection and insert each page.
    async fn copy_documents(
        &self,
        plan: &Plan,
        mappings: &[ColumnMapping],
        columns: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<CopyStats> {
        let batch_size = self.config.migration.batch_size;
        let mut stats = CopyStats::default();
        let mut skip: u64 = 0;

        let expected = self.source.count_documents(&plan.collection).await?;
        debug!(
            "{}: copying about {} documents in batches of {}",
            plan.collection, expected, batch_size
        );

        loop {
            if cancel.is_cancelled() {
                warn!("Cancellation requested during {}", plan.collection);
                return Err(MigrateError::Cancelled);
            }

            let page = self
                .source
                .fetch_page(&plan.collection, skip, batch_size)
                .await?;
            if page.is_empty() {
                break;
            }

            let inserted = self
                .target
                .insert_rows(&plan.table, mappings, columns, &page)
                .await?;

            stats.read += page.len() as u64;
            stats.inserted += inserted;
            debug!(
                "{}: batch at {} read {} inserted {}",
                plan.collection,
                skip,
                page.len(),
                inserted
            );

            if page.len() < batch_size {
                break;
            }
            skip += page.len() as u64;
        }

        let rows = self.target.row_count(&plan.table).await?;
        debug!("{}: table {} now holds {} rows", plan.collection, plan.table, rows);
        Ok(stats)
    }

    /// Check both stores answer.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let source_result = self.source.list_collections().await;
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target_result = self.target.table_exists("information_schema").await;
        let target_latency_ms = started.elapsed().as_millis() as u64;

        let source_error = source_result.err().map(|e| e.to_string());
        let target_error = target_result.err().map(|e| e.to_string());
        let healthy = source_error.is_none() && target_error.is_none();

        Ok(HealthCheckResult {
            source_type: self.source.db_type().to_string(),
            source_connected: source_error.is_none(),
            source_latency_ms,
            source_error,
            target_type: self.target.db_type().to_string(),
            target_connected: target_error.is_none(),
            target_latency_ms,
            target_error,
            healthy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};
    use crate::core::{CollectionSchema, DocValue, Document, IndexDescriptor};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    // =========================================================================
    // In-memory collaborators
    // =========================================================================

    #[derive(Default)]
    struct MemorySource {
        collections: BTreeMap<String, Vec<Document>>,
        indexes: BTreeMap<String, Vec<IndexDescriptor>>,
        closed: AtomicBool,
        pages: Mutex<Vec<(String, u64)>>,
    }

    impl MemorySource {
        fn with(mut self, name: &str, docs: Vec<Document>) -> Self {
            self.collections.insert(name.to_string(), docs);
            self
        }

        fn with_unique_index(mut self, collection: &str, field: &str) -> Self {
            self.indexes
                .entry(collection.to_string())
                .or_default()
                .push(IndexDescriptor {
                    name: format!("{field}_1"),
                    fields: vec![field.to_string()],
                    unique: true,
                });
            self
        }

        fn docs(&self, name: &str) -> &[Document] {
            self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
        }
    }

    #[async_trait]
    impl DocumentSource for MemorySource {
        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        async fn list_collections(&self) -> Result<Vec<String>> {
            Ok(self.collections.keys().cloned().collect())
        }

        async fn sample_documents(&self, collection: &str, size: usize) -> Result<Vec<Document>> {
            Ok(self.docs(collection).iter().take(size).cloned().collect())
        }

        async fn find_one(&self, collection: &str) -> Result<Option<Document>> {
            Ok(self.docs(collection).first().cloned())
        }

        async fn count_documents(&self, collection: &str) -> Result<u64> {
            Ok(self.docs(collection).len() as u64)
        }

        async fn fetch_page(&self, collection: &str, skip: u64, limit: usize) -> Result<Vec<Document>> {
            self.pages.lock().unwrap().push((collection.to_string(), skip));
            Ok(self
                .docs(collection)
                .iter()
                .skip(skip as usize)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>> {
            Ok(self.indexes.get(collection).cloned().unwrap_or_default())
        }

        fn db_type(&self) -> &str {
            "memory"
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    type Row = BTreeMap<String, Option<String>>;

    #[derive(Default)]
    struct MemoryTable {
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Row>,
    }

    /// Relational fake. Scripts are recorded, not interpreted.
    #[derive(Default)]
    struct MemoryTarget {
        tables: Mutex<BTreeMap<String, MemoryTable>>,
        scripts: Mutex<Vec<String>>,
        insert_log: Mutex<Vec<String>>,
        fail_inserts_for: Option<String>,
        fail_scripts: bool,
        closed: AtomicBool,
    }

    impl MemoryTarget {
        fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
            self.tables.lock().unwrap().insert(
                name.to_string(),
                MemoryTable {
                    columns,
                    rows: Vec::new(),
                },
            );
            self
        }

        fn rows(&self, table: &str) -> Vec<Row> {
            self.tables
                .lock()
                .unwrap()
                .get(table)
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        }

        fn column_names(&self, table: &str) -> Vec<String> {
            self.tables
                .lock()
                .unwrap()
                .get(table)
                .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
                .unwrap_or_default()
        }

        /// Tables in the order they first received rows.
        fn first_inserts(&self) -> Vec<String> {
            let mut seen = HashSet::new();
            self.insert_log
                .lock()
                .unwrap()
                .iter()
                .filter(|t| seen.insert(t.to_string()))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl RelationalTarget for MemoryTarget {
        async fn table_exists(&self, table: &str) -> Result<bool> {
            Ok(self.tables.lock().unwrap().contains_key(table))
        }

        async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(table)
                .map(|t| t.columns.clone())
                .unwrap_or_default())
        }

        async fn execute_script(&self, script: &str) -> Result<()> {
            if self.fail_scripts {
                return Err(MigrateError::SchemaScript("syntax error at or near \"CREAT\"".into()));
            }
            self.scripts.lock().unwrap().push(script.to_string());
            Ok(())
        }

        async fn create_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
            self.tables
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_insert_with(|| MemoryTable {
                    columns: columns.to_vec(),
                    rows: Vec::new(),
                });
            Ok(())
        }

        async fn insert_rows(
            &self,
            table: &str,
            mappings: &[ColumnMapping],
            columns: &[ColumnDescriptor],
            documents: &[Document],
        ) -> Result<u64> {
            if self.fail_inserts_for.as_deref() == Some(table) {
                return Err(MigrateError::transfer(table, "value too long for type character varying(24)"));
            }
            self.insert_log.lock().unwrap().push(table.to_string());

            let mut tables = self.tables.lock().unwrap();
            let stored = tables
                .get_mut(table)
                .ok_or_else(|| MigrateError::transfer(table, "relation does not exist"))?;
            let keys: Vec<String> = columns
                .iter()
                .filter(|c| c.primary_key || c.unique)
                .map(|c| c.name.clone())
                .collect();

            let mut inserted = 0;
            for doc in documents {
                let mut row = Row::new();
                for m in mappings {
                    let json = columns
                        .iter()
                        .any(|c| c.name == m.destination_column && c.is_json());
                    let value = doc.get_path(&m.source_field).and_then(|v| {
                        if json && m.transformation.is_none() {
                            Some(v.to_json().to_string())
                        } else {
                            v.to_plain_string()
                        }
                    });
                    row.insert(m.destination_column.clone(), value);
                }

                let conflict = stored.rows.iter().any(|existing| {
                    keys.iter().any(|k| {
                        matches!((existing.get(k), row.get(k)), (Some(Some(a)), Some(Some(b))) if a == b)
                    })
                });
                if !conflict {
                    stored.rows.push(row);
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn row_count(&self, table: &str) -> Result<i64> {
            Ok(self.rows(table).len() as i64)
        }

        fn db_type(&self) -> &str {
            "memory"
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Advisor returning canned answers.
    #[derive(Default)]
    struct CannedAdvisor {
        table: Option<Vec<ColumnDescriptor>>,
        mapping: Option<Vec<ColumnMapping>>,
    }

    #[async_trait]
    impl Advisor for CannedAdvisor {
        async fn propose_table(&self, _schema: &CollectionSchema) -> Option<Vec<ColumnDescriptor>> {
            self.table.clone()
        }

        async fn propose_mapping(
            &self,
            _sample: &Document,
            _columns: &[ColumnDescriptor],
        ) -> Option<Vec<ColumnMapping>> {
            self.mapping.clone()
        }
    }

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn config(mode: MigrationMode) -> Config {
        Config {
            source: SourceConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "app".to_string(),
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "warehouse".to_string(),
                user: "postgres".to_string(),
                password: String::new(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
                max_connections: 1,
            },
            migration: MigrationConfig {
                mode,
                ..MigrationConfig::default()
            },
            advisor: None,
        }
    }

    fn oid(n: u32) -> DocValue {
        DocValue::ObjectId(format!("{:024x}", n))
    }

    fn user(n: u32, name: &str) -> Document {
        Document::new()
            .with("_id", oid(n))
            .with("name", name.into())
            .with("profile", Document::new().with("age", (20 + n as i64).into()).into())
    }

    fn post(n: u32, author: u32) -> Document {
        Document::new()
            .with("_id", oid(100 + n))
            .with("author_id", oid(author))
            .with("title", format!("post {n}").into())
            .with("tags", DocValue::Array(vec!["rust".into(), "etl".into()]))
    }

    fn comment(n: u32, post_id: u32, user_id: u32) -> Document {
        Document::new()
            .with("_id", oid(1000 + n))
            .with("post_id", oid(100 + post_id))
            .with("user_id", oid(user_id))
            .with("body", "nice".into())
    }

    fn blog_source() -> MemorySource {
        MemorySource::default()
            .with("comments", vec![comment(1, 1, 2), comment(2, 2, 1)])
            .with("posts", vec![post(1, 1), post(2, 2), post(3, 1)])
            .with("users", vec![user(1, "ada"), user(2, "linus")])
    }

    const BLOG_SCRIPT: &str = "
    CREATE TABLE comments (
        id VARCHAR(24) PRIMARY KEY,
        post_id VARCHAR(24) REFERENCES posts(id),
        user_id VARCHAR(24),
        FOREIGN KEY (user_id) REFERENCES users (id)
    );
    CREATE TABLE posts (id VARCHAR(24) PRIMARY KEY, author_id VARCHAR(24) REFERENCES users(id));
    CREATE TABLE users (id VARCHAR(24) PRIMARY KEY);
    ";

    fn script_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn orchestrator(
        config: Config,
        source: &Arc<MemorySource>,
        target: &Arc<MemoryTarget>,
        advisor: Option<Arc<dyn Advisor>>,
    ) -> Orchestrator {
        Orchestrator::with_collaborators(config, source.clone(), target.clone(), advisor)
    }

    // =========================================================================
    // Generate-tables mode
    // =========================================================================

    #[tokio::test]
    async fn test_generate_mode_follows_dependency_order() {
        let script = script_file(BLOG_SCRIPT);
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.schema_script = Some(script.path().to_path_buf());

        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());
        let result = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.migrated_collections, vec!["users", "posts", "comments"]);
        assert_eq!(target.first_inserts(), vec!["users", "posts", "comments"]);
        assert_eq!(result.total_documents, 7);
        assert_eq!(result.rows_inserted, 7);
        assert_eq!(target.scripts.lock().unwrap().len(), 1);

        assert_eq!(
            target.column_names("users"),
            vec!["id", "name", "profile_age"]
        );
        assert_eq!(
            target.column_names("posts"),
            vec!["id", "author_id", "title", "tags"]
        );

        let users = target.rows("users");
        assert_eq!(users[0]["id"].as_deref(), Some("000000000000000000000001"));
        assert_eq!(users[0]["profile_age"].as_deref(), Some("21"));
        let posts = target.rows("posts");
        assert_eq!(posts[0]["tags"].as_deref(), Some("[\"rust\",\"etl\"]"));

        assert!(source.closed.load(Ordering::SeqCst));
        assert!(target.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());

        let first = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();
        let counts: Vec<i64> = ["users", "posts", "comments"]
            .iter()
            .map(|t| target.rows(t).len() as i64)
            .collect();

        let second = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();
        let counts_again: Vec<i64> = ["users", "posts", "comments"]
            .iter()
            .map(|t| target.rows(t).len() as i64)
            .collect();

        assert_eq!(counts, vec![2, 3, 2]);
        assert_eq!(counts, counts_again);
        assert_eq!(first.rows_inserted, 7);
        assert_eq!(second.rows_inserted, 0);
        assert!(second.success);
    }

    #[tokio::test]
    async fn test_generate_mode_uses_advisor_table() {
        let advisor: Arc<dyn Advisor> = Arc::new(CannedAdvisor {
            table: Some(vec![
                ColumnDescriptor::new("user_id", "varchar(24)").primary(),
                ColumnDescriptor::new("display_name", "text"),
            ]),
            mapping: None,
        });
        let source = Arc::new(MemorySource::default().with("users", vec![user(1, "ada")]));
        let target = Arc::new(MemoryTarget::default());

        let result = orchestrator(config(MigrationMode::GenerateTables), &source, &target, Some(advisor))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(target.column_names("users"), vec!["user_id", "display_name"]);
        let rows = target.rows("users");
        assert_eq!(rows[0]["user_id"].as_deref(), Some("000000000000000000000001"));
        assert_eq!(rows[0]["display_name"].as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn test_advisor_table_without_identifier_gets_key() {
        let advisor: Arc<dyn Advisor> = Arc::new(CannedAdvisor {
            table: Some(vec![
                ColumnDescriptor::new("mongo_ref", "text"),
                ColumnDescriptor::new("name", "text"),
            ]),
            mapping: None,
        });
        let source = Arc::new(
            MemorySource::default().with("users", vec![user(1, "ada"), user(2, "linus")]),
        );
        let target = Arc::new(MemoryTarget::default());

        let mut inserted = Vec::new();
        for _ in 0..2 {
            let result = orchestrator(
                config(MigrationMode::GenerateTables),
                &source,
                &target,
                Some(advisor.clone()),
            )
            .run(CancellationToken::new())
            .await
            .unwrap();
            assert!(result.success);
            inserted.push(result.rows_inserted);
        }

        assert_eq!(inserted, vec![2, 0]);
        assert_eq!(target.column_names("users"), vec!["id", "mongo_ref", "name"]);
        let rows = target.rows("users");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"].as_deref(), Some("000000000000000000000002"));
        assert_eq!(rows[1]["name"].as_deref(), Some("linus"));
    }

    #[tokio::test]
    async fn test_generate_mode_promotes_unique_index() {
        let source = Arc::new(
            MemorySource::default()
                .with("users", vec![user(1, "ada"), user(2, "ada")])
                .with_unique_index("users", "name"),
        );
        let target = Arc::new(MemoryTarget::default());

        let result = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        let columns = target.tables.lock().unwrap()["users"].columns.clone();
        let name = columns.iter().find(|c| c.name == "name").unwrap();
        assert!(name.unique);
        // The second "ada" hits the unique constraint.
        assert_eq!(result.total_documents, 2);
        assert_eq!(result.rows_inserted, 1);
    }

    #[tokio::test]
    async fn test_generate_mode_unreadable_script_is_fatal() {
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.schema_script = Some("/nonexistent/schema.sql".into());

        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());
        let err = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::SchemaScript(_)));
        assert!(source.closed.load(Ordering::SeqCst));
        assert!(target.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_generate_mode_script_execution_failure_is_fatal() {
        let script = script_file(BLOG_SCRIPT);
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.schema_script = Some(script.path().to_path_buf());

        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget {
            fail_scripts: true,
            ..MemoryTarget::default()
        });
        let err = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::SchemaScript(_)));
        assert!(target.rows("users").is_empty());
    }

    // =========================================================================
    // Existing-tables mode
    // =========================================================================

    fn profile_target() -> MemoryTarget {
        MemoryTarget::default().with_table(
            "users",
            vec![
                ColumnDescriptor::new("user_id", "character varying").unique(),
                ColumnDescriptor::new("profile_age", "numeric"),
            ],
        )
    }

    #[tokio::test]
    async fn test_existing_mode_profile_scenario() {
        let doc = Document::new()
            .with("_id", oid(7))
            .with("profile", Document::new().with("age", 30i64.into()).into());
        let source = Arc::new(MemorySource::default().with("users", vec![doc]));
        let target = Arc::new(profile_target());

        let result = orchestrator(config(MigrationMode::ExistingTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.migrated_collections, vec!["users"]);
        let rows = target.rows("users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"].as_deref(), Some("000000000000000000000007"));
        assert_eq!(rows[0]["profile_age"].as_deref(), Some("30"));
    }

    #[tokio::test]
    async fn test_existing_mode_skips_missing_table_and_empty_collection() {
        let source = Arc::new(
            MemorySource::default()
                .with("orders", vec![Document::new().with("_id", oid(1))])
                .with("users", Vec::new()),
        );
        let target = Arc::new(profile_target());

        let result = orchestrator(config(MigrationMode::ExistingTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.migrated_collections.is_empty());
        assert_eq!(result.skipped_collections, vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn test_existing_mode_skips_when_nothing_maps() {
        let source = Arc::new(
            MemorySource::default().with("users", vec![Document::new().with("zzz", 1i64.into())]),
        );
        let target = Arc::new(MemoryTarget::default().with_table(
            "users",
            vec![ColumnDescriptor::new("email", "text")],
        ));

        let result = orchestrator(config(MigrationMode::ExistingTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.skipped_collections, vec!["users"]);
        assert!(target.rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_existing_mode_advisor_mapping_validated() {
        let advisor: Arc<dyn Advisor> = Arc::new(CannedAdvisor {
            table: None,
            mapping: Some(vec![
                ColumnMapping::new("_id", "user_id"),
                ColumnMapping::new("profile.age", "age_in_years"),
            ]),
        });
        let doc = Document::new()
            .with("_id", oid(3))
            .with("profile", Document::new().with("age", 41i64.into()).into());
        let source = Arc::new(MemorySource::default().with("users", vec![doc]));
        let target = Arc::new(profile_target());

        let result = orchestrator(config(MigrationMode::ExistingTables), &source, &target, Some(advisor))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        let rows = target.rows("users");
        // The advisor's mapping to a missing column is dropped, not replaced.
        assert_eq!(rows[0]["user_id"].as_deref(), Some("000000000000000000000003"));
        assert!(!rows[0].contains_key("profile_age"));
    }

    #[tokio::test]
    async fn test_existing_mode_unreadable_script_is_not_fatal() {
        let mut cfg = config(MigrationMode::ExistingTables);
        cfg.migration.schema_script = Some("/nonexistent/schema.sql".into());
        let source = Arc::new(MemorySource::default().with("users", vec![user(1, "ada")]));
        let target = Arc::new(profile_target());

        let result = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert!(target.scripts.lock().unwrap().is_empty());
    }

    // =========================================================================
    // Batching, failures, cancellation
    // =========================================================================

    #[tokio::test]
    async fn test_batches_until_short_page() {
        let docs: Vec<Document> = (1..=5).map(|n| user(n, "u")).collect();
        let source = Arc::new(MemorySource::default().with("users", docs));
        let target = Arc::new(MemoryTarget::default());
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.batch_size = 2;

        let result = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_documents, 5);
        let skips: Vec<u64> = source.pages.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(skips, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_batches_stop_on_empty_page() {
        let docs: Vec<Document> = (1..=4).map(|n| user(n, "u")).collect();
        let source = Arc::new(MemorySource::default().with("users", docs));
        let target = Arc::new(MemoryTarget::default());
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.batch_size = 2;

        let result = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_documents, 4);
        let skips: Vec<u64> = source.pages.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(skips, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_collection_failure_is_recorded_and_run_continues() {
        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget {
            fail_inserts_for: Some("posts".to_string()),
            ..MemoryTarget::default()
        });

        let result = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("posts: "));
        assert_eq!(result.migrated_collections, vec!["comments", "users"]);
        assert_eq!(target.rows("users").len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_stores() {
        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Cancelled));
        assert!(source.closed.load(Ordering::SeqCst));
        assert!(target.closed.load(Ordering::SeqCst));
        assert!(target.first_inserts().is_empty());
    }

    #[tokio::test]
    async fn test_collection_filters() {
        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());
        let mut cfg = config(MigrationMode::GenerateTables);
        cfg.migration.include_collections = vec!["users".to_string(), "posts".to_string()];
        cfg.migration.exclude_collections = vec!["posts".to_string()];

        let result = orchestrator(cfg, &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.migrated_collections, vec!["users"]);
    }

    #[tokio::test]
    async fn test_result_json() {
        let source = Arc::new(MemorySource::default().with("users", vec![user(1, "ada")]));
        let target = Arc::new(MemoryTarget::default());
        let result = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None)
            .run(CancellationToken::new())
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["total_documents"], 1);
        assert_eq!(json["migrated_collections"][0], "users");
        assert_eq!(json["config_hash"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_health_check() {
        let source = Arc::new(blog_source());
        let target = Arc::new(MemoryTarget::default());
        let orch = orchestrator(config(MigrationMode::GenerateTables), &source, &target, None);

        let health = orch.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.source_connected && health.target_connected);
        assert!(health.source_error.is_none());
        assert_eq!(health.source_type, "memory");
        assert_eq!(health.target_type, "memory");
    }

    #[test]
    fn test_summary_reports_partial_progress() {
        let mut result = MigrationResult::new("run".to_string(), "hash".to_string());
        result.migrated_collections.push("users".to_string());
        result.errors.push("posts: boom".to_string());
        result.total_documents = 3;

        assert_eq!(
            result.summary(),
            "1 collections migrated, 0 skipped, 1 failed, 3 documents in 0.0s"
        );
    }
}
