use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Root-cause classification written back to a dispute case at
/// closing. Only these two values are applicable to automatic
/// clearing; once assigned, a root cause is never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootCause {
    L01,
    L06,
}

impl RootCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::L01 => "L01",
            RootCause::L06 => "L06",
        }
    }

    pub fn from_code(code: &str) -> Option<RootCause> {
        match code {
            "L01" => Some(RootCause::L01),
            "L06" => Some(RootCause::L06),
            _ => None,
        }
    }
}

impl std::fmt::Display for RootCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Posting parameters for one matched group within a currency.
///
/// The three status strings are filled in by the posting and closing
/// stages; everything else is immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingRecord {
    pub skipped: bool,
    pub message: String,

    /// Member case identifiers (real identifiers, even for groups
    /// keyed by a synthetic identifier)
    pub case_ids: Vec<u64>,
    pub currency: String,
    pub assignment: String,
    pub head_office: u64,
    pub tax_code: String,
    pub root_cause: RootCause,
    pub gl_account: Option<u64>,
    pub cost_center: Option<String>,
    pub posting_text: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub rest_amount: Decimal,

    pub notification: Option<u64>,

    pub clearing_status: String,
    pub case_closing_status: String,
    pub notification_closing_status: String,
}

/// All groups of one currency, posted together in a single clearing
/// transaction. Clearing is all or nothing per currency, so the
/// posting state lives here rather than on the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyBatch {
    pub records: BTreeMap<u64, ClearingRecord>,
    /// Head-office account to the open document numbers to load
    pub head_office_docs: BTreeMap<u64, Vec<u64>>,
    /// Union of all member case identifiers in this currency
    pub case_ids: Vec<u64>,
    pub clearing_status: String,
    pub posting_number: Option<u64>,
    pub cleared: bool,
    pub matched_count: usize,
}

impl CurrencyBatch {
    pub fn new(matched_count: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            head_office_docs: BTreeMap::new(),
            case_ids: Vec::new(),
            clearing_status: String::new(),
            posting_number: None,
            cleared: false,
            matched_count,
        }
    }
}

/// The complete clearing input or output of one entity, grouped by
/// currency. An empty instruction means "nothing to process".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearingInstruction {
    pub currencies: BTreeMap<String, CurrencyBatch>,
}

impl ClearingInstruction {
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}
