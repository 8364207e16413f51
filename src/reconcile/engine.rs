use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::customers::CustomerDirectory;
use crate::disputes::models::{CaseRecord, CaseStatus};
use crate::error::{AppResult, ClearingError};
use crate::ledger::models::ItemRecord;
use crate::reconcile::models::ConsolidatedRecord;

/// Synthetic group identifiers start above the real case-identifier
/// range so the two can never collide.
const VIRTUAL_ID_BASE: u64 = 10_000_000;

/// Tax codes that may pair with a missing tax code inside one group
const NULL_TAX_COMPATIBLE: [&str; 10] = [
    "YR", "YN", "TT", "TZ", "YO", "C3", "IG", "K6", "AU", "UU",
];

/// Left-merges open items with their dispute cases and prepares the
/// rows for match evaluation:
/// - ledger-outer join on the assigned case identifier
/// - optional customer enrichment by head office; any account missing
///   from the lookup aborts consolidation for the entity (`None`)
/// - synthetic group identifiers for items referencing several cases
/// - inconsistency annotations (single slot, last writer wins)
/// - deterministic order: group identifier descending, unidentified last
pub fn consolidate(
    entity: &str,
    items: &[ItemRecord],
    cases: &[CaseRecord],
    customers: Option<&CustomerDirectory>,
    valid_taxes: &[String],
) -> AppResult<Option<Vec<ConsolidatedRecord>>> {
    if items.is_empty() {
        return Err(ClearingError::EmptyMerge(entity.to_string()).into());
    }

    let case_index: HashMap<u64, &CaseRecord> =
        cases.iter().map(|c| (c.case_id, c)).collect();

    let mut rows: Vec<ConsolidatedRecord> = items
        .iter()
        .map(|item| {
            let case = item
                .case_id
                .and_then(|id| case_index.get(&id))
                .map(|c| (*c).clone());
            ConsolidatedRecord::new(item.clone(), case)
        })
        .collect();

    if let Some(lookup) = customers {
        for row in &mut rows {
            match lookup.get(row.item.head_office) {
                Some(customer) => {
                    row.customer_name = Some(customer.name.clone());
                    row.channel = Some(customer.channel);
                }
                None => {
                    warn!(
                        "Head office {} not found in customer data; consolidation incomplete.",
                        row.item.head_office
                    );
                    return Ok(None);
                }
            }
        }
    }

    synthesize_virtual_ids(&mut rows);
    detect_inconsistencies(&mut rows, valid_taxes);

    rows.sort_by_key(|r| (r.group_id.is_none(), std::cmp::Reverse(r.group_id)));

    Ok(Some(rows))
}

/// Allocates a synthetic identifier for every item whose text carries
/// two or more case references and re-keys all records sharing any of
/// the referenced identifiers. The real identifier is demoted so that
/// downstream matching sees a single identifier column.
fn synthesize_virtual_ids(rows: &mut [ConsolidatedRecord]) {
    let mut next_virtual = VIRTUAL_ID_BASE;
    let mut assigned: Vec<Option<u64>> = vec![None; rows.len()];

    for idx in 0..rows.len() {
        if rows[idx].item.case_refs.len() < 2 {
            continue;
        }

        let virtual_id = next_virtual;
        next_virtual += 1;

        assigned[idx] = Some(virtual_id);

        let refs = rows[idx].item.case_refs.clone();
        for (other_idx, other) in rows.iter().enumerate() {
            if let Some(id) = other.group_id {
                if refs.contains(&id) {
                    assigned[other_idx] = Some(virtual_id);
                }
            }
        }
    }

    for (row, virtual_id) in rows.iter_mut().zip(assigned) {
        if let Some(virtual_id) = virtual_id {
            row.demoted_id = row.group_id;
            row.group_id = Some(virtual_id);
        }
    }
}

/// Validates critical accounting parameters. Purely descriptive:
/// the annotations never block matching.
fn detect_inconsistencies(rows: &mut [ConsolidatedRecord], valid_taxes: &[String]) {
    for row in rows.iter_mut() {
        if let Some(case) = &row.case {
            if case.debtor != row.item.branch {
                row.warning = Some("Ledger and case debtor accounts not equal!".to_string());
            }
        }

        if !valid_taxes.iter().any(|t| t == &row.item.tax_code) {
            row.warning = Some("Unexpected tax code detected!".to_string());
        }

        if let Some(case) = &row.case {
            if case.status == CaseStatus::Devaluated {
                row.warning = Some("Devaluated case assigned to an open item!".to_string());
            }
        }
    }
}

/// Evaluates consolidated rows against the jurisdiction's matching
/// criteria. Rows match if and only if:
/// - their group identifiers are equal (`id_matched`)
/// - their tax codes are compatible (`tax_matched`)
/// - the absolute sum of their amounts falls below the applicable
///   threshold, with at least one debit and one credit among them
///   (`amount_matched`)
///
/// Re-running the evaluation on an already-evaluated set yields the
/// same flags.
pub fn evaluate_items(
    consolidated: &[ConsolidatedRecord],
    base_threshold: Decimal,
    tax_thresholds: &HashMap<String, Decimal>,
) -> Vec<ConsolidatedRecord> {
    let mut data: Vec<ConsolidatedRecord> = consolidated.to_vec();

    // a zero base would exclude exact-zero differences through the
    // strict comparison below
    let base_threshold = if base_threshold == Decimal::ZERO {
        dec!(0.01)
    } else {
        base_threshold
    };

    let mut occurrences: BTreeMap<u64, usize> = BTreeMap::new();
    for row in &data {
        if let Some(id) = row.group_id {
            *occurrences.entry(id).or_default() += 1;
        }
    }

    let duplicated: BTreeSet<u64> = occurrences
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect();

    if duplicated.is_empty() {
        return data;
    }

    for row in &mut data {
        if row.group_id.is_some_and(|id| duplicated.contains(&id)) {
            row.id_matched = true;
        }
    }

    for id in duplicated {
        let members: Vec<usize> = data
            .iter()
            .enumerate()
            .filter(|(_, r)| r.group_id == Some(id))
            .map(|(i, _)| i)
            .collect();

        let mut taxes: Vec<&str> = members
            .iter()
            .map(|&i| data[i].item.tax_code.as_str())
            .collect();
        taxes.sort_unstable();
        taxes.dedup();

        let mut tax_code = "";
        let mut tax_matched = false;

        match taxes.as_slice() {
            &[only] => {
                tax_code = only;
                tax_matched = true;
            }
            &[a, b] if a.is_empty() || b.is_empty() => {
                tax_code = if a.is_empty() { b } else { a };
                tax_matched = NULL_TAX_COMPATIBLE.contains(&tax_code);
            }
            _ => {}
        }

        let threshold = tax_thresholds
            .get(tax_code)
            .copied()
            .unwrap_or(base_threshold);

        let amounts: Vec<Decimal> = members.iter().map(|&i| data[i].item.amount).collect();
        let total: Decimal = amounts.iter().sum();
        let amount_matched = total.abs() < threshold
            && amounts.iter().any(|a| *a > Decimal::ZERO)
            && amounts.iter().any(|a| *a < Decimal::ZERO);

        for &i in &members {
            if tax_matched {
                data[i].tax_matched = true;
            }
            if amount_matched {
                data[i].amount_matched = true;
            }
        }
    }

    data
}

/// Filters the evaluated rows down to the authoritative clearable set.
pub fn matched_items(evaluated: &[ConsolidatedRecord]) -> Vec<ConsolidatedRecord> {
    evaluated
        .iter()
        .filter(|r| r.is_matched())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::Channel;
    use chrono::NaiveDate;

    fn item(doc: u64, amount: Decimal, tax: &str, refs: &[u64]) -> ItemRecord {
        ItemRecord {
            document_number: doc,
            assignment: String::new(),
            document_type: "DA".to_string(),
            document_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            amount,
            currency: "CHF".to_string(),
            tax_code: tax.to_string(),
            text: String::new(),
            branch: 501234,
            head_office: 601234,
            case_refs: refs.to_vec(),
            case_id: match refs {
                [single] => Some(*single),
                _ => None,
            },
        }
    }

    fn case(case_id: u64, status: CaseStatus) -> CaseRecord {
        CaseRecord {
            debtor: 501234,
            case_id,
            notification: Some(400012345),
            status_sales: String::new(),
            assignment: String::new(),
            status,
            created_on: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            status_ac: "PROM 2024".to_string(),
            processor: String::new(),
            category_description: String::new(),
            root_cause: None,
            note: String::new(),
            fax_number: String::new(),
            category: Some("010".to_string()),
        }
    }

    fn consolidated(items: Vec<ItemRecord>, cases: Vec<CaseRecord>) -> Vec<ConsolidatedRecord> {
        consolidate("TEST", &items, &cases, None, &["C3".to_string(), String::new()])
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_balanced_pair_matches() {
        let rows = consolidated(
            vec![
                item(1, dec!(100), "C3", &[1234567]),
                item(2, dec!(-100), "C3", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );

        let evaluated = evaluate_items(&rows, dec!(1.0), &HashMap::new());
        let matched = matched_items(&evaluated);

        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|r| r.id_matched));
        assert!(matched.iter().all(|r| r.tax_matched));
        assert!(matched.iter().all(|r| r.amount_matched));
    }

    #[test]
    fn test_one_sided_group_is_not_amount_matched() {
        // both amounts positive, sum well under the threshold
        let rows = consolidated(
            vec![
                item(1, dec!(0.10), "C3", &[1234567]),
                item(2, dec!(0.20), "C3", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );

        let evaluated = evaluate_items(&rows, dec!(1.0), &HashMap::new());
        assert!(evaluated.iter().all(|r| r.id_matched));
        assert!(evaluated.iter().all(|r| !r.amount_matched));
        assert!(matched_items(&evaluated).is_empty());
    }

    #[test]
    fn test_zero_base_threshold_is_nudged() {
        let exact = consolidated(
            vec![
                item(1, dec!(100.00), "C3", &[1234567]),
                item(2, dec!(-100.00), "C3", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );
        let evaluated = evaluate_items(&exact, Decimal::ZERO, &HashMap::new());
        assert!(evaluated.iter().all(|r| r.amount_matched));

        let off = consolidated(
            vec![
                item(1, dec!(100.02), "C3", &[1234567]),
                item(2, dec!(-100.00), "C3", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );
        let evaluated = evaluate_items(&off, Decimal::ZERO, &HashMap::new());
        assert!(evaluated.iter().all(|r| !r.amount_matched));
    }

    #[test]
    fn test_null_tax_pairs_only_with_allow_listed_code() {
        let compatible = consolidated(
            vec![
                item(1, dec!(100), "C3", &[1234567]),
                item(2, dec!(-100), "", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );
        let evaluated = evaluate_items(&compatible, dec!(1.0), &HashMap::new());
        assert!(evaluated.iter().all(|r| r.tax_matched));

        let incompatible = consolidated(
            vec![
                item(1, dec!(100), "XX", &[1234567]),
                item(2, dec!(-100), "", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );
        let evaluated = evaluate_items(&incompatible, dec!(1.0), &HashMap::new());
        assert!(evaluated.iter().all(|r| !r.tax_matched));
        assert!(matched_items(&evaluated).is_empty());
    }

    #[test]
    fn test_per_tax_threshold_overrides_base() {
        let rows = consolidated(
            vec![
                item(1, dec!(103), "C3", &[1234567]),
                item(2, dec!(-100), "C3", &[1234567]),
            ],
            vec![case(1234567, CaseStatus::Open)],
        );

        let evaluated = evaluate_items(&rows, dec!(1.0), &HashMap::new());
        assert!(evaluated.iter().all(|r| !r.amount_matched));

        let thresholds = HashMap::from([("C3".to_string(), dec!(5.0))]);
        let evaluated = evaluate_items(&rows, dec!(1.0), &thresholds);
        assert!(evaluated.iter().all(|r| r.amount_matched));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let rows = consolidated(
            vec![
                item(1, dec!(100), "C3", &[1234567]),
                item(2, dec!(-100), "C3", &[1234567]),
                item(3, dec!(55), "C3", &[7654321]),
            ],
            vec![
                case(1234567, CaseStatus::Open),
                case(7654321, CaseStatus::Open),
            ],
        );

        let once = evaluate_items(&rows, dec!(1.0), &HashMap::new());
        let twice = evaluate_items(&once, dec!(1.0), &HashMap::new());

        let first: Vec<u64> = matched_items(&once).iter().map(|r| r.item.document_number).collect();
        let second: Vec<u64> = matched_items(&twice).iter().map(|r| r.item.document_number).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_virtual_id_synthesis_rekeys_referenced_records() {
        let rows = consolidated(
            vec![
                item(1, dec!(70), "C3", &[1234567]),
                item(2, dec!(30), "C3", &[7654321]),
                item(3, dec!(-100), "C3", &[1234567, 7654321]),
            ],
            vec![
                case(1234567, CaseStatus::Open),
                case(7654321, CaseStatus::Open),
            ],
        );

        let virtual_id = rows
            .iter()
            .find(|r| r.item.document_number == 3)
            .and_then(|r| r.group_id)
            .unwrap();

        assert!(virtual_id >= VIRTUAL_ID_BASE);
        assert!(rows.iter().all(|r| r.group_id == Some(virtual_id)));

        // the original real identifiers are demoted, not lost
        let demoted: BTreeSet<u64> =
            rows.iter().filter_map(|r| r.demoted_id).collect();
        assert_eq!(demoted, BTreeSet::from([1234567, 7654321]));

        // and the whole group clears as one
        let evaluated = evaluate_items(&rows, dec!(1.0), &HashMap::new());
        assert_eq!(matched_items(&evaluated).len(), 3);
    }

    #[test]
    fn test_empty_merge_is_entity_fatal() {
        let result = consolidate("TEST", &[], &[], None, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_customer_enrichment_skips_entity() {
        let lookup = CustomerDirectory::default();

        let items = vec![item(1, dec!(100), "C3", &[1234567])];
        let cases = vec![case(1234567, CaseStatus::Open)];

        let result =
            consolidate("TEST", &items, &cases, Some(&lookup), &["C3".to_string()]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_enrichment_attaches_customer_name_and_channel() {
        let lookup = CustomerDirectory::parse("601234|ACME Stores|retail\n").unwrap();

        let items = vec![item(1, dec!(100), "C3", &[1234567])];
        let cases = vec![case(1234567, CaseStatus::Open)];

        let rows = consolidate("TEST", &items, &cases, Some(&lookup), &["C3".to_string()])
            .unwrap()
            .unwrap();

        assert_eq!(rows[0].customer_name.as_deref(), Some("ACME Stores"));
        assert_eq!(rows[0].channel, Some(Channel::Retail));
    }

    #[test]
    fn test_warning_slot_is_last_writer_wins() {
        let mut devaluated_case = case(1234567, CaseStatus::Devaluated);
        devaluated_case.debtor = 999999; // also a debtor mismatch

        let rows = consolidated(
            vec![item(1, dec!(100), "C3", &[1234567])],
            vec![devaluated_case],
        );

        // the devaluation check runs last and overwrites the mismatch
        assert_eq!(
            rows[0].warning.as_deref(),
            Some("Devaluated case assigned to an open item!")
        );
    }

    #[test]
    fn test_rows_ordered_by_group_id_descending() {
        let rows = consolidated(
            vec![
                item(1, dec!(10), "C3", &[1234567]),
                item(2, dec!(10), "C3", &[7654321]),
                item(3, dec!(10), "C3", &[]),
            ],
            vec![
                case(1234567, CaseStatus::Open),
                case(7654321, CaseStatus::Open),
            ],
        );

        assert_eq!(rows[0].group_id, Some(7654321));
        assert_eq!(rows[1].group_id, Some(1234567));
        assert_eq!(rows[2].group_id, None);
    }
}
