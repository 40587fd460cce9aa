use clap::{Parser, Subcommand};
use keyplace_core::{ClientConfig, Coordinator, FieldMap, Status};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "keyplace")]
#[command(about = "Registry-placed CRUD workloads over independent Redis nodes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,

    /// Table name passed through to every record operation
    #[arg(short, long, global = true, default_value = "usertable")]
    table: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new record
    Insert {
        key: String,
        /// Field as name=value, repeatable
        #[arg(short, long = "field", value_parser = parse_field_pair, required = true)]
        fields: Vec<(String, String)>,
    },
    /// Read a record, optionally restricted to some fields
    Read {
        key: String,
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Overwrite fields of an existing record
    Update {
        key: String,
        #[arg(short, long = "field", value_parser = parse_field_pair, required = true)]
        fields: Vec<(String, String)>,
    },
    /// Delete a record
    Delete { key: String },
    /// Scan records from the index position of a start key
    Scan {
        start_key: String,
        /// Maximum number of index entries visited per node
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Drop every key on every node
    Flush {
        /// Close node connections afterwards
        #[arg(long)]
        close: bool,
    },
    /// Print the number of keys held by each node
    Stats,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyplace=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = match ClientConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let coordinator = match Coordinator::init(&cfg).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!("Initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let succeeded = run_command(&coordinator, &cli.table, cli.command).await;

    if let Err(e) = coordinator.cleanup().await {
        tracing::warn!("Cleanup failed: {}", e);
    }

    if !succeeded {
        std::process::exit(1);
    }
}

async fn run_command(coordinator: &Coordinator, table: &str, command: Commands) -> bool {
    match command {
        Commands::Insert { key, fields } => {
            let values: FieldMap = fields.into_iter().collect();
            let status = coordinator.insert(table, &key, &values).await;
            print_status(status, json!({ "key": key }))
        }
        Commands::Read { key, fields } => {
            let mut result = FieldMap::new();
            let status = coordinator
                .read(table, &key, field_filter(&fields), &mut result)
                .await;
            print_status(status, json!({ "key": key, "fields": result }))
        }
        Commands::Update { key, fields } => {
            let values: FieldMap = fields.into_iter().collect();
            let status = coordinator.update(table, &key, &values).await;
            print_status(status, json!({ "key": key }))
        }
        Commands::Delete { key } => {
            let status = coordinator.delete(table, &key).await;
            print_status(status, json!({ "key": key }))
        }
        Commands::Scan {
            start_key,
            count,
            fields,
        } => {
            let mut records = Vec::new();
            let status = coordinator
                .scan(table, &start_key, count, field_filter(&fields), &mut records)
                .await;
            print_status(status, json!({ "start_key": start_key, "records": records }))
        }
        Commands::Flush { close } => match coordinator.flush(close).await {
            Ok(()) => {
                tracing::info!("Flushed {} nodes", coordinator.pool().len());
                true
            }
            Err(e) => {
                tracing::error!("Flush failed: {}", e);
                false
            }
        },
        Commands::Stats => match coordinator.record_counts().await {
            Ok(counts) => {
                println!("{}", json!({ "record_counts": counts }));
                true
            }
            Err(e) => {
                tracing::error!("Failed fetching record counts: {}", e);
                false
            }
        },
    }
}

fn field_filter(fields: &[String]) -> Option<&[String]> {
    if fields.is_empty() { None } else { Some(fields) }
}

/// Print the outcome as one JSON line. Only `ERROR` counts as a failure.
fn print_status(status: Status, mut body: serde_json::Value) -> bool {
    body["status"] = json!(status);
    println!("{}", body);
    status != Status::Error
}

fn parse_field_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}
