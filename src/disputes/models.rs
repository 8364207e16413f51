use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Processing status of a dispute case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Original,
    Open,
    Solved,
    Closed,
    Devaluated,
}

impl CaseStatus {
    pub fn from_code(code: u8) -> Option<CaseStatus> {
        match code {
            0 => Some(CaseStatus::Original),
            1 => Some(CaseStatus::Open),
            2 => Some(CaseStatus::Solved),
            3 => Some(CaseStatus::Closed),
            4 => Some(CaseStatus::Devaluated),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            CaseStatus::Original => 0,
            CaseStatus::Open => 1,
            CaseStatus::Solved => 2,
            CaseStatus::Closed => 3,
            CaseStatus::Devaluated => 4,
        }
    }
}

/// A dispute case record, read-only after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub debtor: u64,
    pub case_id: u64,
    pub notification: Option<u64>,
    pub status_sales: String,
    pub assignment: String,
    pub status: CaseStatus,
    pub created_on: NaiveDate,
    /// Accounting status note; bounded to 50 characters by the backend
    pub status_ac: String,
    pub processor: String,
    pub category_description: String,
    pub root_cause: Option<String>,
    pub note: String,
    pub fax_number: String,
    pub category: Option<String>,
}
