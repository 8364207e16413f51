use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arclear::backend::staged::StagedExportBackend;
use arclear::bootstrap;
use arclear::config::AppConfig;
use arclear::pipeline::orchestrator::EntityOutcome;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,arclear=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    info!("🚀 Starting AR account clearing");

    dotenv::dotenv().ok();

    // optional: clear a single entity only (first CLI argument)
    let user_entity = std::env::args().nth(1);

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration failed: {}", err);
            std::process::exit(1);
        }
    };

    let backend = Arc::new(StagedExportBackend);

    let (mut orchestrator, entities) =
        match bootstrap::initialize(config, backend, user_entity.as_deref()) {
            Ok(initialized) => initialized,
            Err(err) => {
                error!("Initialization failed: {}", err);
                std::process::exit(2);
            }
        };

    match orchestrator.run(&entities).await {
        Ok(summary) => {
            for (entity, outcome) in &summary.outcomes {
                match outcome {
                    EntityOutcome::Completed => info!("Entity '{}': completed", entity),
                    EntityOutcome::Skipped { reason } => {
                        info!("Entity '{}': skipped ({})", entity, reason)
                    }
                    EntityOutcome::Failed { reason } => {
                        error!("Entity '{}': failed ({})", entity, reason)
                    }
                }
            }
            info!(
                "🌐 Run {} finished; {} report(s) generated",
                summary.run_id,
                summary.reports.len()
            );
        }
        Err(err) => {
            error!("Clearing run failed: {}", err);
            std::process::exit(3);
        }
    }
}
