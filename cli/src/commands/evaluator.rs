//! The `evaluator` subcommand.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::net::TcpListener;

use geodist_core::prelude::{AuthKey, Evaluator, SimulationConfig};

/// Arguments for the evaluator role.
#[derive(Args)]
pub struct EvaluatorArgs {
    /// Path to the simulation configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the TOML settings file
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Listen address, overriding the settings file
    #[arg(long)]
    pub bind: Option<String>,

    /// Shared secret, overriding the settings file
    #[arg(long, env = "GEODIST_SECRET")]
    pub secret: Option<String>,
}

/// Serve metric values until a KILL arrives.
pub async fn execute(args: EvaluatorArgs, _verbose: bool) -> Result<()> {
    let mut settings = super::load_settings(args.settings.as_ref())?;
    if let Some(bind) = args.bind {
        settings.evaluator.bind = bind;
    }
    if let Some(secret) = args.secret {
        settings.secret = secret;
    }

    let simulation = SimulationConfig::load(&args.config)
        .with_context(|| format!("loading simulation config {}", args.config.display()))?;
    let potential = settings.evaluator.potential.build();

    let evaluator = Evaluator::new(potential, AuthKey::new(&settings.secret), simulation.energy());
    let listener = TcpListener::bind(&settings.evaluator.bind)
        .await
        .with_context(|| format!("binding {}", settings.evaluator.bind))?;

    evaluator.run(listener).await?;
    Ok(())
}
