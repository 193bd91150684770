use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dnsviews_api::ApiServer;
use dnsviews_consistency::workflow::ViewImportRow;
use dnsviews_consistency::{RecordReconciler, ViewEditor};
use dnsviews_core::config::Config;
use dnsviews_core::db::Db;
use dnsviews_core::error::Error;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dnsviews", about = "DNS views with IPAM prefix consistency checks")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/dnsviews/dnsviews.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API (default)
    Serve,
    /// Import views from a JSON array of rows
    Import {
        file: PathBuf,
    },
    /// Dry-run assigning prefixes to a view
    Validate {
        #[arg(long)]
        view: String,
        /// Proposed prefixes; repeat for several, omit to clear
        #[arg(long = "prefix")]
        prefixes: Vec<IpNet>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;

    // Initialize logging
    init_logging(&config.logging);

    // Open database
    let db = Db::open(&config.database.path)?;
    info!(path = %config.database.path.display(), "database opened");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::Import { file } => import(&config, db, &file),
        Command::Validate { view, prefixes } => validate(&config, db, &view, prefixes),
    }
}

async fn serve(config: Config, db: Db) -> Result<()> {
    info!(instance_id = %config.instance.id, "starting dnsviews");

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    // Start REST API
    if let Some(ref rest_config) = config.api.rest {
        if rest_config.enabled {
            let addr: SocketAddr = rest_config.listen.parse()?;
            let api = ApiServer::new(addr, db.clone(), rest_config.api_key.clone())
                .with_instance_id(&config.instance.id)
                .with_record_config(config.records.clone());

            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = api.run(rx).await {
                    error!("REST API error: {e}");
                }
            }));
        }
    }

    if tasks.is_empty() {
        warn!("REST API disabled, nothing to serve");
        return Ok(());
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping services...");
    let _ = shutdown_tx.send(true);

    // Wait for all tasks to finish
    for task in tasks {
        let _ = task.await;
    }

    info!("dnsviews stopped");
    Ok(())
}

fn editor(config: &Config, db: Db) -> ViewEditor {
    ViewEditor::with_reconciler(RecordReconciler::with_config(db, &config.records))
}

fn import(config: &Config, db: Db, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows: Vec<ViewImportRow> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    match editor(config, db).import(rows) {
        Ok(views) => {
            for view in &views {
                println!("{}\t{}", view.id, view.name);
            }
            info!(views = views.len(), file = %file.display(), "import finished");
            Ok(())
        }
        Err(Error::ImportRejected(rows)) => {
            for row in &rows {
                for e in row.errors.iter() {
                    eprintln!("row {}: {}: {}", row.row, e.field, e.message);
                }
            }
            bail!("import rejected, {} row(s) with errors", rows.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn validate(config: &Config, db: Db, view_name: &str, prefixes: Vec<IpNet>) -> Result<()> {
    let view = db
        .get_view_by_name(view_name)?
        .with_context(|| format!("view {view_name} does not exist"))?;
    let prefixes: BTreeSet<IpNet> = prefixes.iter().map(IpNet::trunc).collect();

    let errors = editor(config, db).validate(&view.id, &prefixes)?;
    if errors.is_empty() {
        println!("ok");
        return Ok(());
    }

    for e in errors.iter() {
        println!("{}: {}", e.field, e.message);
    }
    bail!("{} problem(s) found", errors.len())
}

fn init_logging(config: &dnsviews_core::config::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .init();
        }
    }
}
