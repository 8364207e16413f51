pub mod staged;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::clearing::models::{ClearingRecord, RootCause};
use crate::disputes::models::CaseStatus;
use crate::error::BackendError;

/// Parameters written back to a dispute case when it is closed
#[derive(Debug, Clone)]
pub struct CaseClosingParams {
    pub root_cause: RootCause,
    /// New accounting status note (bounded to 50 characters)
    pub status_note: String,
    pub status: CaseStatus,
}

/// The external automation collaborator driving the bookkeeping
/// system's scripting interface.
///
/// Exports land in files because that is how the scripting interface
/// hands data over; everything else operates on identifiers. Every
/// operation may raise backend-specific faults which the orchestrator
/// maps to stage failure; only a transient disconnect during export
/// is retried, once.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Exports open items of an entity into `target`. `worklist`
    /// selects a backend worklist; without it the whole company code
    /// is exported.
    async fn export_ledger_items(
        &self,
        entity: &str,
        company_code: &str,
        worklist: Option<&str>,
        target: &Path,
    ) -> Result<(), BackendError>;

    /// Exports the dispute cases with the given identifiers into `target`.
    async fn export_case_records(
        &self,
        case_ids: &[u64],
        target: &Path,
    ) -> Result<(), BackendError>;

    /// Loads the open documents per head office into the clearing
    /// transaction. Returns the number of items loaded.
    async fn load_account_items(
        &self,
        company_code: &str,
        currency: &str,
        clearing_date: NaiveDate,
        head_office_docs: &BTreeMap<u64, Vec<u64>>,
    ) -> Result<usize, BackendError>;

    /// Selects and posts the loaded items; returns the posting number.
    async fn post_clearing(
        &self,
        company_code: &str,
        currency: &str,
        clearing_date: NaiveDate,
        records: &[&ClearingRecord],
    ) -> Result<u64, BackendError>;

    /// Closes a dispute case with the given parameters.
    async fn close_case(
        &self,
        case_id: u64,
        params: &CaseClosingParams,
    ) -> Result<(), BackendError>;

    /// Completes the tasks of a service notification.
    async fn close_notification(
        &self,
        notification_id: u64,
        case_ids: &[u64],
    ) -> Result<(), BackendError>;
}
