mod cli;
mod config;
mod logging;
mod paths;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use gort::adapter::loopback::LoopbackAdapter;
use gort::backend::container::ContainerBackend;
use gort::backend::local::LocalBackend;
use gort::backend::pod::PodBackend;
use gort::persistence::redb_store::RedbStore;
use gort::persistence::Persistence;
use gort::router::Router;
use gort::scheduler::Scheduler;
use gort::worker::WorkerPool;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "gort", version)]
#[command(about = "Gort — a ChatOps command engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that $GORT_HOME is writable and the database opens.
    Doctor,
    /// Manage installed bundles.
    Bundle {
        #[command(subcommand)]
        action: BundleAction,
    },
    /// Interactive REPL that runs typed commands through the router
    /// as a loopback "chat" user.
    Demo,
}

#[derive(Subcommand, Debug)]
enum BundleAction {
    /// Install a bundle from a YAML file, disabled by default.
    Install { path: PathBuf },
    /// Enable a specific installed version of a bundle.
    Enable { name: String, version: String },
    /// Disable whichever version of a bundle is currently enabled.
    Disable { name: String },
    /// Remove an installed bundle version entirely.
    Uninstall { name: String, version: String },
    /// List installed bundles and their enabled state.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("warning: failed to load config, using defaults: {e}");
        Config::default()
    });

    let cli = Cli::parse();

    // `doctor` needs no logging or storage setup of its own.
    if matches!(cli.cmd, Some(Command::Doctor)) {
        return cli::doctor::run();
    }

    let log_dir = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
    })
    .map_err(|e| {
        eprintln!("failed to initialize logging: {e}");
        e
    })
    .ok();
    if let Some(dir) = &log_dir {
        tracing::info!("logging to {}", dir.display());
    }

    std::fs::create_dir_all(paths::data_dir())?;
    let persistence: Arc<dyn Persistence> = Arc::new(RedbStore::new(paths::db_path())?);

    match cli.cmd {
        Some(Command::Doctor) => unreachable!("handled above"),
        Some(Command::Bundle { action }) => {
            match action {
                BundleAction::Install { path } => cli::bundle::install(&persistence, &path, "admin").await?,
                BundleAction::Enable { name, version } => cli::bundle::enable(&persistence, &name, &version).await?,
                BundleAction::Disable { name } => cli::bundle::disable(&persistence, &name).await?,
                BundleAction::Uninstall { name, version } => {
                    cli::bundle::uninstall(&persistence, &name, &version).await?
                }
                BundleAction::List => cli::bundle::list(&persistence).await?,
            }
            Ok(())
        }
        Some(Command::Demo) => {
            cli::demo::ensure_bootstrap(&persistence).await?;
            let (router, _scheduler) = build_router(&config, persistence.clone()).await?;
            let adapter = Arc::new(LoopbackAdapter::new());
            cli::demo::run(router, adapter).await
        }
        None => {
            cli::demo::ensure_bootstrap(&persistence).await?;
            let (router, scheduler) = build_router(&config, persistence.clone()).await?;
            let adapter = Arc::new(LoopbackAdapter::new());
            router.register_adapter(adapter.clone()).await;
            tracing::info!("gort is running; no chat adapter is wired up (§6 — bring your own). Use `gort demo` to try the pipeline.");
            let scheduler_handle = tokio::spawn(scheduler.run());
            tokio::signal::ctrl_c().await?;
            scheduler_handle.abort();
            Ok(())
        }
    }
}

/// Builds a `Router` (and the `Scheduler` that drives it) wired to
/// whichever execution backends the config enables. The container and
/// pod backends fail fast at startup rather than the first dispatch
/// that needs them (§4.6).
async fn build_router(config: &Config, persistence: Arc<dyn Persistence>) -> Result<(Arc<Router>, Arc<Scheduler>)> {
    let local = Arc::new(LocalBackend);
    let container = if config.backends.container_enabled {
        Some(Arc::new(ContainerBackend::connect()?) as Arc<dyn gort::backend::Backend>)
    } else {
        None
    };
    let pod = if config.backends.pod_enabled {
        let namespace = config.backends.pod_namespace.clone().unwrap_or_else(|| "default".to_string());
        Some(Arc::new(PodBackend::connect(namespace).await?) as Arc<dyn gort::backend::Backend>)
    } else {
        None
    };

    let pool_size = config.worker.pool_size.unwrap_or_else(WorkerPool::default_pool_size);
    let worker = Arc::new(WorkerPool::new(pool_size, local, container, pod));

    let router = Arc::new(Router::new(
        persistence.clone(),
        worker,
        config.worker.services_root.clone(),
        config.worker.default_deadline(),
    ));
    let scheduler = Arc::new(Scheduler::new(persistence, router.clone()));
    Ok((router, scheduler))
}
