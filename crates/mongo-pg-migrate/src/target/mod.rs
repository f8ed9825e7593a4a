//! PostgreSQL target database operations.

mod render;

pub use render::{build_create_table_sql, build_insert_sql, value_to_literal};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::config::SslMode;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{ColumnDescriptor, ColumnMapping, Document, RelationalTarget};
use crate::error::{MigrateError, Result};

/// PostgreSQL target pool implementation.
pub struct PgTarget {
    pool: Pool,
    schema: String,
}

impl PgTarget {
    /// Create the connection pool and verify it with a round trip.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("mongo-pg-migrate");
        // Unqualified names in schema scripts land in the configured schema.
        pg_config.options(&format!("-c search_path={}", config.schema));
        pg_config.ssl_mode(match config.ssl_mode.as_str() {
            "prefer" => SslMode::Prefer,
            _ => SslMode::Disable,
        });

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::connection("PostgreSQL", e.to_string()))?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection("PostgreSQL", e.to_string()))?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (schema={})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        if self.pool.is_closed() {
            return Err(MigrateError::NotConnected("PostgreSQL"));
        }
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), context.to_string()))
    }
}

#[async_trait]
impl RelationalTarget for PgTarget {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client("checking table existence").await?;

        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&self.schema, &table],
            )
            .await?;

        Ok(row.get(0))
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client("describing table").await?;

        let rows = client
            .query(
                "SELECT
                    c.column_name::text,
                    c.data_type::text,
                    c.is_nullable = 'YES',
                    EXISTS (
                        SELECT 1
                        FROM information_schema.table_constraints tc
                        JOIN information_schema.key_column_usage kcu
                          ON tc.constraint_name = kcu.constraint_name
                         AND tc.table_schema = kcu.table_schema
                         AND tc.table_name = kcu.table_name
                        WHERE tc.constraint_type = 'PRIMARY KEY'
                          AND tc.table_schema = c.table_schema
                          AND tc.table_name = c.table_name
                          AND kcu.column_name = c.column_name
                    ),
                    EXISTS (
                        SELECT 1
                        FROM information_schema.table_constraints tc
                        JOIN information_schema.key_column_usage kcu
                          ON tc.constraint_name = kcu.constraint_name
                         AND tc.table_schema = kcu.table_schema
                         AND tc.table_name = kcu.table_name
                        WHERE tc.constraint_type = 'UNIQUE'
                          AND tc.table_schema = c.table_schema
                          AND tc.table_name = c.table_name
                          AND kcu.column_name = c.column_name
                    )
                FROM information_schema.columns c
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position",
                &[&self.schema, &table],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: row.get(0),
                data_type: row.get(1),
                nullable: row.get(2),
                primary_key: row.get(3),
                unique: row.get(4),
                references: None,
            })
            .collect::<Vec<_>>();

        debug!("Described {}.{}: {} columns", self.schema, table, columns.len());
        Ok(columns)
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        let client = self.client("executing schema script").await?;
        client
            .batch_execute(script)
            .await
            .map_err(|e| MigrateError::SchemaScript(e.to_string()))?;
        debug!("Executed schema script ({} bytes)", script.len());
        Ok(())
    }

    async fn create_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
        let client = self.client("creating table").await?;

        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n{}",
            quote_pg(&self.schema)?,
            build_create_table_sql(&self.schema, table, columns)?
        );
        client.batch_execute(&sql).await?;

        debug!("Created table {}.{}", self.schema, table);
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &str,
        mappings: &[ColumnMapping],
        columns: &[ColumnDescriptor],
        documents: &[Document],
    ) -> Result<u64> {
        if documents.is_empty() || mappings.is_empty() {
            return Ok(0);
        }

        let sql = build_insert_sql(&self.schema, table, mappings, columns, documents)?;
        let client = self.client("inserting rows").await?;
        let inserted = client
            .execute(sql.as_str(), &[])
            .await
            .map_err(|e| MigrateError::transfer(format!("{}.{}", self.schema, table), e.to_string()))?;

        Ok(inserted)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting rows").await?;

        let sql = format!("SELECT COUNT(*) FROM {}", qualify_pg(&self.schema, table)?);
        let row = client.query_one(sql.as_str(), &[]).await?;

        Ok(row.get(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close();
            debug!("PostgreSQL pool closed");
        }
    }
}
