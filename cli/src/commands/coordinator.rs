//! The `coordinator` subcommand.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use geodist_core::output::{write_snapshot, write_xyz_animation};
use geodist_core::prelude::{AuthKey, Coordinator, CoordinatorConfig, SimulationConfig};

/// Arguments for the coordinator role.
#[derive(Args)]
pub struct CoordinatorArgs {
    /// Path to the simulation configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the TOML settings file
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Listen address, overriding the settings file
    #[arg(long)]
    pub bind: Option<String>,

    /// Task timeout in seconds, overriding the settings file
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Output prefix for the snapshot and animation, overriding the
    /// settings file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Shared secret, overriding the settings file
    #[arg(long, env = "GEODIST_SECRET")]
    pub secret: Option<String>,
}

/// Run the coordinator to completion and persist its artifacts.
pub async fn execute(args: CoordinatorArgs, _verbose: bool) -> Result<()> {
    let mut settings = super::load_settings(args.settings.as_ref())?;
    if let Some(bind) = args.bind {
        settings.coordinator.bind = bind;
    }
    if let Some(timeout) = args.task_timeout {
        settings.coordinator.task_timeout_seconds = timeout;
    }
    if let Some(output) = args.output {
        settings.coordinator.output_prefix = Some(output);
    }
    if let Some(secret) = args.secret {
        settings.secret = secret;
    }

    let simulation = SimulationConfig::load(&args.config)
        .with_context(|| format!("loading simulation config {}", args.config.display()))?;
    let curve = simulation.global_curve()?;
    info!(
        points = curve.len(),
        dimension = simulation.dimension(),
        tolerance = simulation.tolerance,
        "curve initialized"
    );

    let coordinator = Coordinator::new(
        curve,
        CoordinatorConfig {
            task_timeout: Duration::from_secs(settings.coordinator.task_timeout_seconds),
            tolerance: simulation.tolerance,
        },
        AuthKey::new(&settings.secret),
    );
    let listener = TcpListener::bind(&settings.coordinator.bind)
        .await
        .with_context(|| format!("binding {}", settings.coordinator.bind))?;

    let report = coordinator.run(listener).await?;
    info!(
        sweeps = report.sweeps,
        movement = report.movement_history.last().copied().unwrap_or(0.0),
        "run converged"
    );

    if let Some(prefix) = &settings.coordinator.output_prefix {
        let snapshot_path = PathBuf::from(format!("{prefix}.json"));
        write_snapshot(&snapshot_path, &report, &simulation)?;
        info!(path = %snapshot_path.display(), "snapshot written");

        if simulation.dimension() % 3 == 0 {
            let animation_path = PathBuf::from(format!("{prefix}.xyz"));
            write_xyz_animation(&animation_path, report.curve.points(), &simulation.symbols)?;
            info!(path = %animation_path.display(), "animation written");
        }
    }

    Ok(())
}
