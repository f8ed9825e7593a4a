//! mongo-pg-migrate CLI - MongoDB to PostgreSQL migration.

use clap::{Parser, Subcommand};
use mongo_pg_migrate::core::canonicalize;
use mongo_pg_migrate::relationships::parse_table_names;
use mongo_pg_migrate::{
    insertion_order, parse_relationships, Config, DocumentSource, MigrateError, MigrationMode,
    MongoSource, Orchestrator, SchemaAnalyzer,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mongo-pg-migrate")]
#[command(about = "MongoDB to PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a migration
    Run {
        /// Override migration mode (generate_tables or existing_tables)
        #[arg(long)]
        mode: Option<String>,

        /// Override documents per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the schema-definition script
        #[arg(long)]
        schema_script: Option<PathBuf>,
    },

    /// Print the inferred schema of collections as JSON
    Analyze {
        /// Collections to analyze (default: all accepted by the config)
        collections: Vec<String>,

        /// Override documents sampled per collection
        #[arg(long)]
        sample_size: Option<usize>,
    },

    /// Show relationships and insertion order for a schema script
    Plan {
        /// Schema-definition script to read
        #[arg(long)]
        schema_script: PathBuf,

        /// Tables to order (default: tables created by the script)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    // Planning works offline and does not need a config file
    if let Commands::Plan {
        schema_script,
        tables,
    } = &cli.command
    {
        return plan(schema_script, tables, cli.output_json);
    }

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan { .. } => unreachable!(), // Handled above
        Commands::Run {
            mode,
            batch_size,
            schema_script,
        } => {
            // Apply overrides
            if let Some(mode) = mode {
                config.migration.mode = mode
                    .parse::<MigrationMode>()
                    .map_err(MigrateError::Config)?;
            }
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if let Some(path) = schema_script {
                config.migration.schema_script = Some(path);
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if result.success {
                    "Migration completed!"
                } else {
                    "Migration completed with errors"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.migration_time_seconds);
                println!("  Collections: {:?}", result.migrated_collections);
                if !result.skipped_collections.is_empty() {
                    println!("  Skipped: {:?}", result.skipped_collections);
                }
                println!("  Documents: {}", result.total_documents);
                println!("  Rows inserted: {}", result.rows_inserted);
                for err in &result.errors {
                    println!("  Error: {}", err);
                }
            }
        }

        Commands::Analyze {
            collections,
            sample_size,
        } => {
            if let Some(size) = sample_size {
                config.migration.sample_size = size;
            }
            config.validate()?;

            let source = MongoSource::connect(&config.source).await?;
            let outcome = analyze(&source, &config, collections).await;
            source.close().await;
            let schemas = outcome?;

            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target_type,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

async fn analyze(
    source: &MongoSource,
    config: &Config,
    mut collections: Vec<String>,
) -> Result<Vec<mongo_pg_migrate::CollectionSchema>, MigrateError> {
    if collections.is_empty() {
        collections = source.list_collections().await?;
        collections.retain(|c| config.migration.accepts(c));
    }

    let analyzer = SchemaAnalyzer::new(source).with_sample_size(config.migration.sample_size);
    let mut schemas = Vec::with_capacity(collections.len());
    for collection in &collections {
        schemas.push(analyzer.analyze(collection).await?);
    }
    Ok(schemas)
}

fn plan(script_path: &Path, tables: &[String], output_json: bool) -> Result<(), MigrateError> {
    let script = std::fs::read_to_string(script_path)?;
    let relationships = parse_relationships(&script);

    let tables: Vec<String> = if tables.is_empty() {
        parse_table_names(&script)
    } else {
        tables.to_vec()
    };
    if tables.is_empty() {
        warn!("No tables given and none created by {:?}", script_path);
    }

    let tables: Vec<String> = tables.iter().map(|t| canonicalize(t)).collect();
    let relationships: Vec<_> = relationships
        .into_iter()
        .map(|mut r| {
            r.table_name = canonicalize(&r.table_name);
            r.referenced_table = canonicalize(&r.referenced_table);
            r
        })
        .collect();
    let order = insertion_order(&tables, &relationships);

    if output_json {
        let out = serde_json::json!({
            "relationships": relationships,
            "order": order,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Relationships:");
        for r in &relationships {
            println!(
                "  {}.{} -> {}.{}",
                r.table_name, r.column_name, r.referenced_table, r.referenced_column
            );
        }
        println!("\nInsertion order:");
        for (i, table) in order.iter().enumerate() {
            println!("  {}. {}", i + 1, table);
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG wins over --verbosity when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batch...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
