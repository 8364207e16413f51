use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use crate::backend::{AutomationBackend, CaseClosingParams};
use crate::clearing::models::ClearingRecord;
use crate::error::BackendError;

/// Offline binding used when the scripting robot stages exports
/// out-of-band: exports are satisfied from files already present in
/// the export directory, while posting and closing operations report
/// that no live scripting transaction is available.
///
/// Running the pipeline against this backend parses the staged
/// exports, reconciles and evaluates them, and produces the clearing
/// input documents for review without touching the books.
pub struct StagedExportBackend;

#[async_trait]
impl AutomationBackend for StagedExportBackend {
    async fn export_ledger_items(
        &self,
        entity: &str,
        _company_code: &str,
        _worklist: Option<&str>,
        target: &Path,
    ) -> Result<(), BackendError> {
        if target.exists() {
            info!("Using staged ledger export for '{}'", entity);
            Ok(())
        } else {
            Err(BackendError::NoDataFound(format!(
                "no staged ledger export for '{}'",
                entity
            )))
        }
    }

    async fn export_case_records(
        &self,
        case_ids: &[u64],
        target: &Path,
    ) -> Result<(), BackendError> {
        if target.exists() {
            Ok(())
        } else {
            Err(BackendError::NoCaseFound(format!(
                "no staged case export covering {} case(s)",
                case_ids.len()
            )))
        }
    }

    async fn load_account_items(
        &self,
        _company_code: &str,
        _currency: &str,
        _clearing_date: NaiveDate,
        _head_office_docs: &BTreeMap<u64, Vec<u64>>,
    ) -> Result<usize, BackendError> {
        Err(BackendError::TransactionNotStarted(
            "no live scripting session in staged mode".to_string(),
        ))
    }

    async fn post_clearing(
        &self,
        _company_code: &str,
        _currency: &str,
        _clearing_date: NaiveDate,
        _records: &[&ClearingRecord],
    ) -> Result<u64, BackendError> {
        Err(BackendError::TransactionNotStarted(
            "no live scripting session in staged mode".to_string(),
        ))
    }

    async fn close_case(
        &self,
        _case_id: u64,
        _params: &CaseClosingParams,
    ) -> Result<(), BackendError> {
        Err(BackendError::TransactionNotStarted(
            "no live scripting session in staged mode".to_string(),
        ))
    }

    async fn close_notification(
        &self,
        _notification_id: u64,
        _case_ids: &[u64],
    ) -> Result<(), BackendError> {
        Err(BackendError::TransactionNotStarted(
            "no live scripting session in staged mode".to_string(),
        ))
    }
}
