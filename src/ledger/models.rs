use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open item on a customer account, as exported from the ledger.
///
/// Case references are extracted from the free-text field at parse
/// time; a record with exactly one reference gets `case_id` assigned,
/// records with several references are grouped later through virtual
/// identifier synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub document_number: u64,
    pub assignment: String,
    pub document_type: String,
    pub document_date: NaiveDate,
    pub due_date: NaiveDate,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub currency: String,
    /// Tax code; the ledger's `**` placeholder is normalized to empty
    pub tax_code: String,
    pub text: String,
    /// Branch (debtor) account
    pub branch: u64,
    pub head_office: u64,

    /// All case identifiers referenced in the item text
    pub case_refs: Vec<u64>,
    /// Assigned case identifier, only when exactly one reference exists
    pub case_id: Option<u64>,
}

impl ItemRecord {
    /// Whether the item references at least one dispute case
    pub fn references_case(&self) -> bool {
        !self.case_refs.is_empty()
    }
}
