use clap::Parser;
use enrichment_core::{EnrichmentConfig, Identity};
use enrichment_worker::cli::{Cli, Commands};
use enrichment_worker::wiring::{self, Backends};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON logs by default; ENRICH_LOG_FORMAT=pretty for local runs.
    enrichment_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    let mut cfg = EnrichmentConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let backends = Backends::open(&cfg).await?;
            let adapters = enrichment_integrations::build_adapters(&cfg)?;
            let runner = wiring::build_runner(&cfg, &backends, adapters);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });
            runner.run(shutdown_rx).await?;
        }
        Commands::Enqueue {
            email,
            linkedin,
            uuid,
            name,
            company,
            position,
        } => {
            let backends = Backends::open(&cfg).await?;
            let identity = Identity {
                uuid,
                email,
                linkedin_handle: linkedin,
                name,
                company,
                position,
            };
            let event_id = wiring::enqueue(&cfg, backends.bus.as_ref(), identity).await?;
            println!("{}", serde_json::json!({ "event_id": event_id }));
        }
        Commands::Reconcile { email } => {
            let backends = Backends::open(&cfg).await?;
            let reports = wiring::reconcile(backends.store.as_ref(), email.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&wiring::redacted_config(&cfg))?);
        }
    }

    Ok(())
}
