use std::collections::HashMap;

use crate::clearing::models::ClearingInstruction;
use crate::disputes::models::CaseRecord;
use crate::error::{AppResult, ClearingError};
use crate::ledger::models::ItemRecord;
use crate::reconcile::models::ConsolidatedRecord;

/// Names of the intermediate products a stage can hand downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    LedgerItems,
    CaseRecords,
    Consolidated,
    Evaluated,
    Matched,
    ClearingInput,
    ClearingOutput,
    CaseClosingOutput,
    NotificationClosingOutput,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::LedgerItems => "ledger_items",
            DataKind::CaseRecords => "case_records",
            DataKind::Consolidated => "consolidated",
            DataKind::Evaluated => "evaluated",
            DataKind::Matched => "matched",
            DataKind::ClearingInput => "clearing_input",
            DataKind::ClearingOutput => "clearing_output",
            DataKind::CaseClosingOutput => "case_closing_output",
            DataKind::NotificationClosingOutput => "notification_closing_output",
        }
    }
}

/// One stored dataset
#[derive(Debug, Clone)]
pub enum DataSet {
    Items(Vec<ItemRecord>),
    Cases(Vec<CaseRecord>),
    Consolidated(Vec<ConsolidatedRecord>),
    Clearing(ClearingInstruction),
}

/// Process-lifetime store of intermediate stage products, keyed by
/// (entity, data kind).
///
/// Entries are write-once: a stage that produced a dataset must not
/// be silently re-run within one process; resumption paths overwrite
/// explicitly via `record_forced`. Absence of an entry means the
/// stage produced nothing for that entity, which downstream stages
/// treat as "no data", not as an error.
#[derive(Debug, Default)]
pub struct Accumulator {
    entries: HashMap<(String, DataKind), DataSet>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entity: &str, kind: DataKind, data: DataSet) -> AppResult<()> {
        let key = (entity.to_string(), kind);

        if self.entries.contains_key(&key) {
            return Err(ClearingError::AccumulatorOccupied {
                entity: entity.to_string(),
                kind: kind.as_str(),
            }
            .into());
        }

        self.entries.insert(key, data);
        Ok(())
    }

    pub fn record_forced(&mut self, entity: &str, kind: DataKind, data: DataSet) {
        self.entries.insert((entity.to_string(), kind), data);
    }

    pub fn get(&self, entity: &str, kind: DataKind) -> Option<&DataSet> {
        self.entries.get(&(entity.to_string(), kind))
    }

    pub fn items(&self, entity: &str) -> Option<&Vec<ItemRecord>> {
        match self.get(entity, DataKind::LedgerItems) {
            Some(DataSet::Items(items)) => Some(items),
            _ => None,
        }
    }

    pub fn cases(&self, entity: &str) -> Option<&Vec<CaseRecord>> {
        match self.get(entity, DataKind::CaseRecords) {
            Some(DataSet::Cases(cases)) => Some(cases),
            _ => None,
        }
    }

    pub fn consolidated(&self, entity: &str, kind: DataKind) -> Option<&Vec<ConsolidatedRecord>> {
        match self.get(entity, kind) {
            Some(DataSet::Consolidated(rows)) => Some(rows),
            _ => None,
        }
    }

    pub fn clearing(&self, entity: &str, kind: DataKind) -> Option<&ClearingInstruction> {
        match self.get(entity, kind) {
            Some(DataSet::Clearing(instruction)) => Some(instruction),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_once_is_enforced() {
        let mut accum = Accumulator::new();

        accum
            .record("CH01", DataKind::LedgerItems, DataSet::Items(vec![]))
            .unwrap();

        let again = accum.record("CH01", DataKind::LedgerItems, DataSet::Items(vec![]));
        assert!(again.is_err());

        // forcing is the explicit escape hatch for resumption paths
        accum.record_forced("CH01", DataKind::LedgerItems, DataSet::Items(vec![]));
    }

    #[test]
    fn test_absence_means_no_data() {
        let mut accum = Accumulator::new();
        accum
            .record("CH01", DataKind::LedgerItems, DataSet::Items(vec![]))
            .unwrap();

        assert!(accum.items("CH01").is_some());
        assert!(accum.items("AT01").is_none());
        assert!(accum.cases("CH01").is_none());
    }
}
