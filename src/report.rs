use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clearing::models::ClearingInstruction;
use crate::ledger::models::ItemRecord;
use crate::reconcile::models::ConsolidatedRecord;

/// One flattened row of the "cleared items" report section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedRow {
    pub group_id: u64,

    #[serde(with = "rust_decimal::serde::float")]
    pub rest_amount: Decimal,

    pub head_office: u64,
    pub currency: String,
    pub tax_code: String,
    pub gl_account: Option<u64>,
    pub posting_text: String,
    pub posting_number: Option<u64>,
    pub clearing_status: String,
    pub case_closing_status: String,
    pub notification_closing_status: String,
}

/// Report input for one entity. Rendering and delivery are handled
/// elsewhere; this is the complete, ordered content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: String,
    pub company_code: String,

    /// All evaluated rows; falls back to the bare ledger items when
    /// evaluation never ran for the entity
    pub evaluated: Vec<ConsolidatedRecord>,
    pub items: Vec<ItemRecord>,

    pub cleared: Vec<ClearedRow>,
    /// Placeholder note shown instead of cleared rows when nothing
    /// was found to clear
    pub note: Option<String>,
}

/// One line of the run summary sent to the accountants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub entity: String,
    pub company_code: String,
    pub item_count: usize,
    pub matched_count: usize,
    pub cleared_count: usize,
    pub recipients: Vec<String>,
}

/// Flattens the per-currency closing output into report rows. The
/// batch-level posting state is projected onto each row; a record's
/// own clearing status (set for skipped records) takes precedence.
pub fn flatten_closing_output(output: &ClearingInstruction) -> Vec<ClearedRow> {
    let mut rows = Vec::new();

    for (currency, batch) in &output.currencies {
        for (group_id, record) in &batch.records {
            let clearing_status = if record.clearing_status.is_empty() {
                batch.clearing_status.clone()
            } else {
                record.clearing_status.clone()
            };

            rows.push(ClearedRow {
                group_id: *group_id,
                rest_amount: record.rest_amount,
                head_office: record.head_office,
                currency: currency.clone(),
                tax_code: record.tax_code.clone(),
                gl_account: record.gl_account,
                posting_text: record.posting_text.clone(),
                posting_number: batch.posting_number,
                clearing_status,
                case_closing_status: record.case_closing_status.clone(),
                notification_closing_status: record.notification_closing_status.clone(),
            });
        }
    }

    rows
}
