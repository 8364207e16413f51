use std::path::PathBuf;

use serde::Deserialize;

/// Application-level configuration, resolved from the environment.
///
/// The clearing rules themselves live in a separate rules file
/// (see `rules`); this struct only locates the working directories
/// and the rules document.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Path to the per-jurisdiction clearing rules document
    pub rules_path: PathBuf,
    /// Directory holding raw exports produced by the automation backend
    pub export_dir: PathBuf,
    /// Directory for per-entity stage-output documents
    pub dump_dir: PathBuf,
    /// Directory holding customer lookup files (one per company code)
    pub data_dir: PathBuf,
    /// Path to the durable checkpoint document
    pub recovery_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            rules_path: std::env::var("ARCLEAR_RULES_PATH")
                .unwrap_or_else(|_| "rules.yaml".to_string())
                .into(),
            export_dir: std::env::var("ARCLEAR_EXPORT_DIR")
                .unwrap_or_else(|_| "exports".to_string())
                .into(),
            dump_dir: std::env::var("ARCLEAR_DUMP_DIR")
                .unwrap_or_else(|_| "dump".to_string())
                .into(),
            data_dir: std::env::var("ARCLEAR_DATA_DIR")
                .unwrap_or_else(|_| "data".to_string())
                .into(),
            recovery_path: std::env::var("ARCLEAR_RECOVERY_PATH")
                .unwrap_or_else(|_| "recovery.json".to_string())
                .into(),
        })
    }

    /// Path of the raw ledger export file for an entity
    pub fn ledger_export_path(&self, entity: &str) -> PathBuf {
        self.export_dir.join(format!("{}_items.txt", entity))
    }

    /// Path of the raw case export file for an entity
    pub fn case_export_path(&self, entity: &str) -> PathBuf {
        self.export_dir.join(format!("{}_cases.txt", entity))
    }

    /// Path of the customer lookup file for a company code
    pub fn customer_data_path(&self, company_code: &str) -> PathBuf {
        self.data_dir.join(format!("{}_customers.txt", company_code))
    }
}
