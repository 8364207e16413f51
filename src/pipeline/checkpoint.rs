use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppResult;

/// Named pipeline checkpoints, in processing order. `LedgerNoCase`
/// is a flag rather than a stage: it marks entities whose ledger data
/// references no dispute case, which gates the case-related stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LedgerExported,
    LedgerConverted,
    LedgerNoCase,
    CasesExported,
    CasesConverted,
    Consolidated,
    Evaluated,
    InputGenerated,
    Posted,
    CasesClosed,
    NotificationsClosed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LedgerExported => "ledger_exported",
            Stage::LedgerConverted => "ledger_converted",
            Stage::LedgerNoCase => "ledger_no_case",
            Stage::CasesExported => "cases_exported",
            Stage::CasesConverted => "cases_converted",
            Stage::Consolidated => "consolidated",
            Stage::Evaluated => "evaluated",
            Stage::InputGenerated => "input_generated",
            Stage::Posted => "posted",
            Stage::CasesClosed => "cases_closed",
            Stage::NotificationsClosed => "notifications_closed",
        }
    }

    pub fn all() -> [Stage; 11] {
        [
            Stage::LedgerExported,
            Stage::LedgerConverted,
            Stage::LedgerNoCase,
            Stage::CasesExported,
            Stage::CasesConverted,
            Stage::Consolidated,
            Stage::Evaluated,
            Stage::InputGenerated,
            Stage::Posted,
            Stage::CasesClosed,
            Stage::NotificationsClosed,
        ]
    }
}

/// Durable per-entity, per-stage checkpoints.
///
/// The whole document is read at startup and rewritten wholesale
/// after every state change, so a crash between stages loses at most
/// the stage that was in flight. An absent document on disk is
/// equivalent to "no prior failure"; an empty document means the
/// previous run completed cleanly.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    states: BTreeMap<String, BTreeMap<String, bool>>,
}

impl CheckpointStore {
    /// Initializes the store. Returns the store and whether a prior
    /// run terminated abnormally (in which case the persisted states
    /// are kept and completed stages will be skipped).
    pub fn initialize(path: &Path, entities: &[String]) -> AppResult<(Self, bool)> {
        info!("Initializing application recovery ...");

        let mut store = Self {
            path: path.to_path_buf(),
            states: BTreeMap::new(),
        };

        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let states: BTreeMap<String, BTreeMap<String, bool>> = serde_json::from_str(&text)?;

            if !states.is_empty() {
                info!("Previous run terminated abnormally; resuming from saved checkpoints.");
                store.states = states;
                return Ok((store, true));
            }
        }

        store.reset(entities)?;

        Ok((store, false))
    }

    /// Sets default (all false) states for the given entities and
    /// persists them.
    pub fn reset(&mut self, entities: &[String]) -> AppResult<()> {
        self.states.clear();

        for entity in entities {
            let stages: BTreeMap<String, bool> = Stage::all()
                .iter()
                .map(|s| (s.as_str().to_string(), false))
                .collect();
            self.states.insert(entity.clone(), stages);
        }

        self.persist()
    }

    pub fn get(&self, entity: &str, stage: Stage) -> bool {
        self.states
            .get(entity)
            .and_then(|stages| stages.get(stage.as_str()))
            .copied()
            .unwrap_or(false)
    }

    /// Stores a new checkpoint value and persists the whole document
    /// before returning, so the write happens-before any later stage.
    pub fn set(&mut self, entity: &str, stage: Stage, value: bool) -> AppResult<()> {
        self.states
            .entry(entity.to_string())
            .or_default()
            .insert(stage.as_str().to_string(), value);

        self.persist()
    }

    /// Clears all recovery data; called after a successful run.
    pub fn clear(&mut self) -> AppResult<()> {
        self.states.clear();
        self.persist()
    }

    fn persist(&self) -> AppResult<()> {
        let text = serde_json::to_string_pretty(&self.states)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}
