use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use boothconf::BoothConfig;
use clap::{Parser, Subcommand};
use obslog::ObsLogDb;
use stimnode::controller::ControllerParts;
use stimnode::{
    surface, telemetry, AcquisitionClient, LoopbackOpener, OperatorFeed, OutletHub, TaskCatalog,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "stimnode", version, about = "Stimulus-presentation session node")]
struct Cli {
    /// Config file used in place of ./stimbooth.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve the operator command socket (default)
    Serve {
        /// Overrides bind.command
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Print the effective configuration and where it came from
    Config,
    /// Register collections from a TOML or JSON file
    Seed { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = BoothConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Cmd::Serve { bind: None }) {
        Cmd::Config => {
            for file in &sources.files {
                println!("# from {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Cmd::Seed { file } => {
            let db = ObsLogDb::open(config.infra.paths.obslog_db())
                .context("Failed to open obslog database")?;
            let collections = obslog::load_seed_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            for collection in &collections {
                db.register_collection(collection)?;
                println!("registered {} ({} tasks)", collection.id, collection.tasks.len());
            }
            Ok(())
        }
        Cmd::Serve { bind } => {
            if let Some(bind) = bind {
                config.infra.bind.command = bind;
            }
            serve(config).await
        }
    }
}

async fn serve(config: BoothConfig) -> Result<()> {
    let telemetry = telemetry::init(&config.infra.telemetry)?;

    let paths = &config.infra.paths;
    std::fs::create_dir_all(&paths.data_out).context("Failed to create data_out directory")?;
    tracing::info!("📁 Task output: {}", paths.data_out.display());

    tracing::info!("📚 Opening obslog database...");
    let store = ObsLogDb::open(paths.obslog_db()).context("Failed to open obslog database")?;
    tracing::info!("   obslog at: {}", store.path().display());

    let acquisition = &config.infra.acquisition;
    let recorder = AcquisitionClient::new(acquisition.endpoint.clone(), acquisition.timeout());
    tracing::info!("🎙️  Acquisition service: {}", acquisition.endpoint);

    let surface = surface::create(&config.bootstrap.session.surface)?;
    tracing::info!("🖥️  Presentation surface: {}", surface.name());

    let shutdown = CancellationToken::new();
    let parts = ControllerParts {
        store: Arc::new(store),
        recorder: Arc::new(recorder),
        opener: Arc::new(LoopbackOpener::new(
            Arc::new(OutletHub::new()),
            config.bootstrap.devices.clone(),
        )),
        catalog: TaskCatalog::with_builtins(),
        surface,
        feed: OperatorFeed::new(),
        data_out: paths.data_out.clone(),
        timing: config.bootstrap.session.clone(),
        shutdown: shutdown.clone(),
    };

    let node = stimnode::start(&config.infra.bind.command, parts).await?;
    tracing::info!("🎬 Stim server ready on {}", node.local_addr());

    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested by operator");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            shutdown.cancel();
        }
        _ = sigterm() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
            shutdown.cancel();
        }
    }

    node.wait().await;
    tracing::info!("Shutdown complete");
    telemetry.shutdown();
    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
