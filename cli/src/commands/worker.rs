//! The `worker` subcommand.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use geodist_core::prelude::{
    AuthKey, MetricPool, SimulationConfig, SolverOptions, Worker, WorkerConfig,
};

/// Arguments for the worker role.
#[derive(Args)]
pub struct WorkerArgs {
    /// Path to the simulation configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the TOML settings file
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Coordinator address, overriding the settings file
    #[arg(long)]
    pub coordinator: Option<String>,

    /// Evaluator addresses of this worker's pool, overriding the settings
    /// file
    #[arg(long, value_delimiter = ',')]
    pub evaluators: Vec<String>,

    /// Worker identifier; generated when absent
    #[arg(long)]
    pub id: Option<String>,

    /// Shared secret, overriding the settings file
    #[arg(long, env = "GEODIST_SECRET")]
    pub secret: Option<String>,
}

/// Run a worker until its coordinator goes away.
pub async fn execute(args: WorkerArgs, _verbose: bool) -> Result<()> {
    let mut settings = super::load_settings(args.settings.as_ref())?;
    if let Some(coordinator) = args.coordinator {
        settings.worker.coordinator = coordinator;
    }
    if !args.evaluators.is_empty() {
        settings.worker.evaluators = args.evaluators;
    }
    if let Some(secret) = args.secret {
        settings.secret = secret;
    }

    let simulation = SimulationConfig::load(&args.config)
        .with_context(|| format!("loading simulation config {}", args.config.display()))?;
    let key = AuthKey::new(&settings.secret);
    let pool = MetricPool::new(settings.worker.evaluators.clone(), key.clone())?;

    let config = WorkerConfig {
        worker_id: args.id.unwrap_or_else(WorkerConfig::random_id),
        coordinator: settings.worker.coordinator.clone(),
        callback_delay: Duration::from_millis(settings.worker.callback_delay_ms),
        local_nodes: simulation.local_nodes,
        mass: simulation.mass_matrix()?,
        solver: SolverOptions::default(),
    };

    Worker::new(config, key, pool).run().await?;
    Ok(())
}
