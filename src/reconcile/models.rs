use serde::{Deserialize, Serialize};

use crate::customers::Channel;
use crate::disputes::models::CaseRecord;
use crate::ledger::models::ItemRecord;

/// A ledger open item joined with its dispute case (ledger-outer),
/// carrying the grouping identifier and match evaluation state.
///
/// `group_id` starts as the item's assigned case identifier and is
/// replaced by a synthetic identifier when the item belongs to a
/// multi-case group; the original identifier is then demoted to
/// `demoted_id` so all matching logic operates on one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub item: ItemRecord,
    pub case: Option<CaseRecord>,

    pub group_id: Option<u64>,
    pub demoted_id: Option<u64>,

    pub id_matched: bool,
    pub amount_matched: bool,
    pub tax_matched: bool,

    /// Single-slot inconsistency annotation; later checks overwrite
    /// earlier ones
    pub warning: Option<String>,

    pub customer_name: Option<String>,
    pub channel: Option<Channel>,
}

impl ConsolidatedRecord {
    pub fn new(item: ItemRecord, case: Option<CaseRecord>) -> Self {
        let group_id = item.case_id;

        Self {
            item,
            case,
            group_id,
            demoted_id: None,
            id_matched: false,
            amount_matched: false,
            tax_matched: false,
            warning: None,
            customer_name: None,
            channel: None,
        }
    }

    /// Whether the record is part of a fully matched, clearable group
    pub fn is_matched(&self) -> bool {
        self.id_matched && self.amount_matched && self.tax_matched
    }
}
