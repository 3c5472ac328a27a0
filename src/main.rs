use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jobmatch_api::{Recommender, RestApi};
use jobmatch_core::{Embedder, EngineConfig, HashingEmbedder, JsonFileCatalog};
use jobmatch_storage::{DeltaSync, SyncOutcome, SyncReport, SyncTask};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = "jobmatch.toml";

/// Job recommendation engine
#[derive(Parser, Debug)]
#[command(name = "jobmatch")]
#[command(about = "Incrementally synced job recommendation engine", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the data directory (overrides the configuration file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve recommendations over HTTP
    Serve {
        /// HTTP API port
        #[arg(long)]
        http_port: Option<u16>,

        /// Job catalog (JSON array) for background sync
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Keep the store in sync with the catalog while serving
        #[arg(long)]
        background_sync: bool,
    },
    /// Sync the job catalog into the vector store
    Sync {
        /// Job catalog (JSON array)
        #[arg(long)]
        catalog: PathBuf,

        /// Run one full pass and exit instead of polling
        #[arg(long)]
        once: bool,
    },
    /// Re-embed the whole catalog and rebuild the index from scratch
    Rebuild {
        /// Job catalog (JSON array)
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    let data_dir = config.storage.data_dir.clone();
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding.dim));

    match args.command {
        Command::Serve {
            http_port,
            catalog,
            background_sync,
        } => {
            let port = http_port.unwrap_or(config.server.http_port);
            let catalog = match catalog {
                Some(path) if background_sync || config.server.background_sync => Some(path),
                None if background_sync || config.server.background_sync => {
                    bail!("background sync needs --catalog")
                }
                _ => None,
            };
            serve(config, &data_dir, embedder, port, catalog).await
        }
        Command::Sync { catalog, once } => {
            let sync = open_sync(&config, &data_dir, embedder, &catalog)?;
            if once {
                let report = tokio::task::spawn_blocking(move || sync.run_once()).await??;
                finish(&report)
            } else {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(SyncTask::new(sync, cancel.clone()).run());
                tokio::signal::ctrl_c().await?;
                info!("Shutdown signal received");
                cancel.cancel();
                handle.await?;
                Ok(())
            }
        }
        Command::Rebuild { catalog } => {
            let sync = open_sync(&config, &data_dir, embedder, &catalog)?;
            let report = tokio::task::spawn_blocking(move || sync.rebuild()).await??;
            finish(&report)
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::load_or_default(Path::new(DEFAULT_CONFIG)),
    };
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_sync(
    config: &EngineConfig,
    data_dir: &Path,
    embedder: Arc<dyn Embedder>,
    catalog: &Path,
) -> anyhow::Result<DeltaSync> {
    info!("Data directory: {:?}", data_dir);
    info!("Catalog: {:?}", catalog);
    let catalog = Arc::new(JsonFileCatalog::new(catalog));
    DeltaSync::open(data_dir, config, catalog, embedder)
        .with_context(|| format!("opening sync state in {}", data_dir.display()))
}

fn finish(report: &SyncReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    match &report.outcome {
        SyncOutcome::Aborted(reason) => bail!("sync aborted: {}", reason),
        _ => Ok(()),
    }
}

async fn serve(
    config: EngineConfig,
    data_dir: &Path,
    embedder: Arc<dyn Embedder>,
    http_port: u16,
    catalog: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Starting JobMatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", data_dir);
    info!("HTTP API port: {}", http_port);

    let recommender = Arc::new(Recommender::new(data_dir, config.clone(), embedder.clone())?);
    let initial = recommender.clone();
    let index = tokio::task::spawn_blocking(move || initial.reload()).await??;
    info!("Serving index version {} ({} jobs)", index.version(), index.live_count());

    let cancel = CancellationToken::new();
    let sync_handle = match catalog {
        Some(catalog) => {
            let sync = open_sync(&config, data_dir, embedder, &catalog)?;
            let reloader = recommender.clone();
            let task = SyncTask::new(sync, cancel.clone()).on_change(move |_| match reloader.reload_wait() {
                Ok(index) => info!("Reloaded index version {}", index.version()),
                Err(e) => error!("Reload after sync failed: {}", e),
            });
            Some(tokio::spawn(task.run()))
        }
        None => None,
    };

    let recommender_http = recommender.clone();
    let http_handle = std::thread::spawn(move || {
        info!("Starting HTTP server on port {}", http_port);
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(recommender_http, http_port).await {
                error!("HTTP server error: {}", e);
            }
        })
    });

    info!("JobMatch started successfully");
    info!("HTTP API: http://localhost:{}/", http_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    info!("Shutting down...");
    cancel.cancel();
    if let Some(handle) = sync_handle {
        handle.await?;
    }
    Ok(())
}
