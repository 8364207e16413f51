use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::backend::AutomationBackend;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::pipeline::orchestrator::Orchestrator;
use crate::rules::ClearingRules;

/// Wires the application components together: rules, working
/// directories, durable stores and the pipeline orchestrator.
pub fn initialize(
    config: AppConfig,
    backend: Arc<dyn AutomationBackend>,
    user_entity: Option<&str>,
) -> AppResult<(Orchestrator, BTreeMap<String, String>)> {
    info!("Initializing application components ...");

    let rules = ClearingRules::load(&config.rules_path)?;
    info!("✅ Clearing rules loaded and validated");

    let entities = rules.active_entities(user_entity);

    std::fs::create_dir_all(&config.export_dir)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let orchestrator = Orchestrator::new(backend, rules, config, &entities)?;
    info!("✅ Pipeline orchestrator initialized");

    Ok((orchestrator, entities))
}
