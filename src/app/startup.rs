//! Process startup and shutdown
//!
//! Startup order: settings, logging, seeded store, plugin manager with the
//! built-in plugins, schedule manager, bootstrap. Shutdown runs it
//! backwards: the schedule manager stops first so no job fires into a
//! plugin that is going away.

use crate::app::cli::Args;
use crate::app::seed::{seed_store, SeedSummary};
use crate::core::config::{ConfigError, Settings};
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::plugin::api::{register_builtin_plugins, MemoryPermissions, PluginError, PluginManager};
use crate::scheduler::api::{ScheduleManager, SchedulerError, TokioScheduler};
use crate::store::{MemoryStore, StoreError};
use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialise logging: {0}")]
    Logging(#[from] flexi_logger::FlexiLoggerError),

    #[error("Failed to seed the store: {0}")]
    Seed(#[source] StoreError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub type StartupResult<T> = Result<T, StartupError>;

/// Everything a running process owns
pub struct Application {
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub plugins: Arc<PluginManager>,
    pub runner: Arc<TokioScheduler>,
    pub schedules: Option<Arc<ScheduleManager>>,
}

impl Application {
    /// Wire up the store, managers and built-in plugins; nothing is loaded yet
    pub async fn build(settings: Settings) -> StartupResult<Self> {
        let store = Arc::new(MemoryStore::new());
        let summary: SeedSummary = seed_store(&store, &settings.seed)
            .await
            .map_err(StartupError::Seed)?;
        log::info!(
            "Seeded {} plugin(s) and {} schedule(s)",
            summary.plugins,
            summary.schedules
        );

        let plugins = PluginManager::new(store.clone(), Arc::new(MemoryPermissions::new()))
            .with_initialization_order(settings.plugins.initialization_order.iter().cloned());
        register_builtin_plugins(&plugins)?;
        let plugins = Arc::new(plugins);

        let runner = Arc::new(TokioScheduler::new());
        let schedules = if settings.scheduler.enabled {
            Some(ScheduleManager::with_job_id_prefix(
                plugins.clone(),
                store.clone(),
                runner.clone(),
                settings.scheduler.job_id_prefix.clone(),
            ))
        } else {
            log::info!("Scheduler disabled by configuration");
            None
        };

        Ok(Self {
            settings,
            store,
            plugins,
            runner,
            schedules,
        })
    }

    /// Start the schedule manager, then load every enabled plugin
    ///
    /// Returns the number of plugins loaded.
    pub async fn start(&self) -> StartupResult<usize> {
        if let Some(schedules) = &self.schedules {
            schedules.start().await?;
        }
        Ok(self.plugins.bootstrap().await?)
    }

    pub fn job_count(&self) -> usize {
        self.schedules.as_ref().map_or(0, |s| s.job_count())
    }

    pub async fn shutdown(&self) {
        if let Some(schedules) = &self.schedules {
            schedules.stop();
        }
        self.plugins.unload_all().await;
        self.runner.shutdown();
        log::info!("Shutdown complete");
    }
}

/// Binary entry point
pub fn startup() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", StartupError::Runtime(e));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> StartupResult<()> {
    let settings = Settings::load(args.config.as_deref()).await?;
    let logging = args.logging_settings(&settings.logging);
    init_logging(&logging)?;
    log::info!(
        "plugrack {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        crate::GIT_HASH,
        crate::BUILD_TIME
    );

    let app = Application::build(settings).await?;
    let started = app.start().await;

    let outcome = match started {
        Ok(loaded) if args.check => {
            print_report(&app, loaded);
            Ok(())
        }
        Ok(loaded) => {
            log::info!("Running with {} plugin(s), {} job(s)", loaded, app.job_count());
            wait_for_shutdown().await;
            Ok(())
        }
        Err(e) => Err(e),
    };

    app.shutdown().await;
    outcome
}

async fn wait_for_shutdown() {
    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_rx = coordinator.subscribe();
    coordinator.install_signal_handlers();
    if let Err(e) = shutdown_rx.recv().await {
        log::warn!("Shutdown channel closed: {}", e);
    }
}

fn print_report(app: &Application, loaded: usize) {
    println!("{} {} plugin(s) loaded", "ok".green().bold(), loaded);
    for instance in app.plugins.cache().list_loaded() {
        let related: Vec<String> = instance
            .related_plugins()
            .iter()
            .map(|h| h.key().to_string())
            .collect();
        let jobs = app
            .schedules
            .as_ref()
            .map(|s| s.jobs_for_plugin(instance.record().id).len())
            .unwrap_or(0);
        println!(
            "  {} ({}) jobs: {}{}",
            instance.key().to_string().bold(),
            instance.record().plugin_name,
            jobs,
            if related.is_empty() {
                String::new()
            } else {
                format!(" referenced by: {}", related.join(", "))
            }
        );
    }
}
