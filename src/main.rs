use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use fieldsat::clock::{Clock, SystemClock};
use fieldsat::config::{Config, Credentials};
use fieldsat::model::{DateWindow, Field, MAX_WINDOW_DAYS};
use fieldsat::provider::{self, SatelliteProvider};
use fieldsat::scheduler::{RunOutcome, SyncScheduler};
use fieldsat::server::{self, AppState};
use fieldsat::store::{FieldStore, RedbStore};
use fieldsat::sync::{FieldSyncer, SyncOutcome};
use fieldsat::tiles::{HttpAssetFetcher, TileProxy};

#[derive(Parser, Debug)]
#[command(author, version, about = "Satellite NDVI sync and tile proxy for field boundaries", long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/fieldsat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and the background sync scheduler
    Serve,
    /// Run one sync over every field and print the run stats
    Sync,
    /// Sync a single field
    SyncField(SyncFieldArgs),
    /// Load fields from a JSON array into the store
    ImportFields(ImportArgs),
    /// Print a field's NDVI history, newest first
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct SyncFieldArgs {
    field_id: String,
    /// Search window in days (default: the configured window)
    #[arg(long)]
    days: Option<i64>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    file: PathBuf,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    field_id: String,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

/// Everything the commands share, built once from config and environment.
struct Runtime {
    config: Config,
    clock: Arc<dyn Clock>,
    store: Arc<dyn FieldStore>,
    provider: Arc<dyn SatelliteProvider>,
    syncer: Arc<FieldSyncer>,
}

impl Runtime {
    fn build(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let db_path = match &config.storage.db_path {
            Some(path) => path.clone(),
            None => RedbStore::default_path()?,
        };
        let store: Arc<dyn FieldStore> = Arc::new(RedbStore::create(&db_path)?);
        tracing::info!("Field store at {}", db_path.display());

        let credentials = Credentials::from_env();
        let provider = provider::from_config(&config.provider, &credentials, clock.clone())?;
        let syncer = Arc::new(FieldSyncer::new(
            provider.clone(),
            store.clone(),
            clock.clone(),
            config.sync.settings(),
        ));
        Ok(Self {
            config,
            clock,
            store,
            provider,
            syncer,
        })
    }

    fn scheduler(&self) -> Arc<SyncScheduler> {
        Arc::new(SyncScheduler::new(
            self.syncer.clone(),
            self.clock.clone(),
            self.config.sync.timing(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = Config::load(cli.config.as_deref())?;
    let runtime = Runtime::build(config)?;

    match cli.command {
        Command::Serve => serve(runtime).await,
        Command::Sync => sync_all(runtime).await,
        Command::SyncField(args) => sync_field(runtime, args).await,
        Command::ImportFields(args) => import_fields(runtime, args).await,
        Command::History(args) => history(runtime, args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(runtime: Runtime) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = runtime.scheduler();
    let scheduler_task = scheduler.clone().spawn(shutdown_rx.clone());

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(runtime.config.provider.request_timeout_secs))
        .build()?;
    let tiles = TileProxy::new(
        runtime.store.clone(),
        runtime.provider.clone(),
        Arc::new(HttpAssetFetcher::new(http_client)),
        runtime.clock.clone(),
        runtime.config.sync.settings(),
    )
    .with_palette(runtime.config.server.palette.clone());

    let app = server::router(AppState {
        provider: runtime.provider.clone(),
        store: runtime.store.clone(),
        scheduler,
        tiles: Arc::new(tiles),
        cache_max_age_secs: runtime.config.server.cache_max_age_secs,
    });

    let listener = TcpListener::bind(runtime.config.server.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", runtime.config.server.bind))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Some(task) = scheduler_task {
        task.await.ok();
    }
    Ok(())
}

async fn sync_all(runtime: Runtime) -> Result<()> {
    let scheduler = runtime.scheduler();
    match scheduler.force_sync().await? {
        RunOutcome::Completed(stats) => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        RunOutcome::AlreadyRunning => bail!("a sync run is already in progress"),
    }
}

async fn sync_field(runtime: Runtime, args: SyncFieldArgs) -> Result<()> {
    let field = runtime
        .store
        .get_field_by_id(&args.field_id)
        .await?
        .with_context(|| format!("field {} not found", args.field_id))?;

    let days = args
        .days
        .unwrap_or(runtime.config.sync.window_days)
        .clamp(1, MAX_WINDOW_DAYS);
    let window = DateWindow::trailing(runtime.clock.now(), days);

    match runtime.syncer.sync_window(&field, window).await? {
        SyncOutcome::Skipped => println!("{}: skipped (unusable boundary)", field.id),
        SyncOutcome::NoImagery => println!("{}: no imagery in the last {days} days", field.id),
        SyncOutcome::Updated {
            acquisition,
            warning,
        } => {
            println!("{}", serde_json::to_string_pretty(&acquisition)?);
            if let Some(warning) = warning {
                eprintln!("warning: {warning}");
            }
        }
    }
    Ok(())
}

async fn import_fields(runtime: Runtime, args: ImportArgs) -> Result<()> {
    let contents = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let fields: Vec<Field> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse fields from {}", args.file.display()))?;

    for field in &fields {
        runtime.store.upsert_field(field).await?;
    }
    tracing::info!("Imported {} fields", fields.len());
    Ok(())
}

async fn history(runtime: Runtime, args: HistoryArgs) -> Result<()> {
    let rows = runtime
        .store
        .get_ndvi_history(&args.field_id, args.limit)
        .await?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
