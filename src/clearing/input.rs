use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::debug;

use crate::clearing::models::{ClearingInstruction, ClearingRecord, CurrencyBatch, RootCause};
use crate::customers::{Channel, CustomerDirectory};
use crate::error::{AppResult, ClearingError};
use crate::reconcile::models::ConsolidatedRecord;
use crate::rules::{CompanyRules, EntityRules, GlAccount};

/// Dispute categories posted to the penalty account when one is
/// configured
const PENALTY_CATEGORIES: [&str; 3] = ["010", "011", "012"];

/// Transforms matched items into per-currency clearing instructions.
///
/// Groups are processed per currency, then per group identifier in
/// descending order. Records that cannot be posted automatically are
/// marked skipped with an explanatory message instead of being
/// dropped; they still contribute to the per-currency document and
/// case aggregates, since their documents may be needed to balance
/// the posting.
pub fn create_clearing_input(
    matched: &[ConsolidatedRecord],
    company: &CompanyRules,
    entity: &EntityRules,
    customers: Option<&CustomerDirectory>,
) -> AppResult<ClearingInstruction> {
    let mut instruction = ClearingInstruction::default();

    let currencies: BTreeSet<&str> = matched.iter().map(|r| r.item.currency.as_str()).collect();

    for currency in currencies {
        let rows: Vec<&ConsolidatedRecord> = matched
            .iter()
            .filter(|r| r.item.currency == currency)
            .collect();

        let mut batch = CurrencyBatch::new(rows.len());

        let group_ids: BTreeSet<u64> = rows.iter().filter_map(|r| r.group_id).collect();

        for &group_id in group_ids.iter().rev() {
            let members: Vec<&&ConsolidatedRecord> = rows
                .iter()
                .filter(|r| r.group_id == Some(group_id))
                .collect();

            let record = build_record(group_id, &members, company, entity, customers)?;

            for member in &members {
                let docs = batch
                    .head_office_docs
                    .entry(member.item.head_office)
                    .or_default();
                if !docs.contains(&member.item.document_number) {
                    docs.push(member.item.document_number);
                }
            }
            batch.case_ids.extend(&record.case_ids);

            batch.records.insert(group_id, record);
        }

        for docs in batch.head_office_docs.values_mut() {
            docs.sort_unstable();
        }
        batch.case_ids.sort_unstable();
        batch.case_ids.dedup();

        instruction.currencies.insert(currency.to_string(), batch);
    }

    Ok(instruction)
}

fn build_record(
    group_id: u64,
    members: &[&&ConsolidatedRecord],
    company: &CompanyRules,
    entity: &EntityRules,
    customers: Option<&CustomerDirectory>,
) -> AppResult<ClearingRecord> {
    let currency = members[0].item.currency.clone();
    let head_office = members[0].item.head_office;
    let branch = members[0].item.branch;

    let mut tax_codes: Vec<&str> = members.iter().map(|m| m.item.tax_code.as_str()).collect();
    tax_codes.sort_unstable();
    tax_codes.dedup();

    let doc_types: BTreeSet<&str> = members
        .iter()
        .map(|m| m.item.document_type.as_str())
        .collect();

    let category = members
        .iter()
        .find_map(|m| m.case.as_ref().and_then(|c| c.category.clone()));
    let prior_root_cause = members
        .iter()
        .find_map(|m| m.case.as_ref().and_then(|c| c.root_cause.clone()));
    let notification = members
        .iter()
        .find_map(|m| m.case.as_ref().and_then(|c| c.notification));
    let customer_name = members.iter().find_map(|m| m.customer_name.clone());

    let rest_amount: Decimal = members
        .iter()
        .map(|m| m.item.amount)
        .sum::<Decimal>()
        .round_dp(2);

    // real member identifiers; for a synthetic group these were
    // demoted during consolidation
    let mut case_ids: Vec<u64> = members.iter().filter_map(|m| m.demoted_id).collect();
    case_ids.sort_unstable();
    case_ids.dedup();
    if case_ids.is_empty() {
        case_ids.push(group_id);
    }

    let mut skipped = false;
    let mut message = String::new();

    let tax_code = resolve_tax_code(
        &currency,
        &tax_codes,
        company,
        entity,
        head_office,
        category.as_deref(),
    );

    if tax_code.is_empty() {
        skipped = true;
        message.push_str(
            "No tax code used! Program attempted to assign a valid tax code, \
             but failed to find a suitable accounting rule.",
        );
    }

    let root_cause = resolve_root_cause(group_id, prior_root_cause.as_deref(), &doc_types)?;

    let gl_account = select_gl_account(rest_amount, entity, category.as_deref());
    let (gl_number, cost_center) = match gl_account {
        None => (None, None),
        Some(account) => {
            let cost_center = resolve_cost_center(account, branch, members, customers)?;
            (Some(account.number), Some(cost_center))
        }
    };

    if entity.skipped_taxes.contains(&tax_code) || company.skipped_taxes.contains(&tax_code) {
        skipped = true;
        message
            .push_str("Clearing skipped based on tax exclusion criteria defined in accounting rules.");
    }

    let posting_text = posting_text(rest_amount, company, customer_name.as_deref(), &case_ids);
    let assignment = company
        .assignment_override
        .clone()
        .unwrap_or_else(|| group_id.to_string());

    debug!(
        "Group {}: tax '{}', root cause {}, rest amount {}",
        group_id, tax_code, root_cause, rest_amount
    );

    Ok(ClearingRecord {
        skipped,
        message,
        case_ids,
        currency,
        assignment,
        head_office,
        tax_code,
        root_cause,
        gl_account: gl_number,
        cost_center,
        posting_text,
        rest_amount,
        notification,
        clearing_status: String::new(),
        case_closing_status: String::new(),
        notification_closing_status: String::new(),
    })
}

/// Determines the posting tax code.
///
/// Resolution order: jurisdiction-wide forced code, then any tax code
/// already carried by the group, then currency-, head-office- and
/// category-specific overrides, then the jurisdiction fallback code.
/// An empty result means no rule applied; the caller marks the group
/// skipped.
fn resolve_tax_code(
    currency: &str,
    group_taxes: &[&str],
    company: &CompanyRules,
    entity: &EntityRules,
    head_office: u64,
    category: Option<&str>,
) -> String {
    let mut tax_code: String = group_taxes.concat();

    if let Some(universal) = &company.universal_tax_code {
        tax_code = universal.clone();
    }

    if !tax_code.is_empty() {
        return tax_code;
    }

    if let Some(code) = company.currency_taxes.get(currency) {
        return code.clone();
    }
    if let Some(code) = entity.head_office_taxes.get(&head_office.to_string()) {
        return code.clone();
    }
    if let Some(code) = category.and_then(|c| company.category_taxes.get(c)) {
        return code.clone();
    }

    company.fallback_tax_code.clone().unwrap_or_default()
}

/// Resolves the root cause for case closing. An already-assigned
/// L01/L06 is preserved; otherwise the document types of the group
/// decide: credit memos close as L06, standard and debit documents
/// as L01. Any other outcome would make the posting unsafe and halts
/// the run.
fn resolve_root_cause(
    group_id: u64,
    prior: Option<&str>,
    doc_types: &BTreeSet<&str>,
) -> Result<RootCause, ClearingError> {
    if let Some(root_cause) = prior.and_then(RootCause::from_code) {
        return Ok(root_cause);
    }

    if doc_types.contains("DG") {
        Ok(RootCause::L06)
    } else if doc_types.contains("DZ") || doc_types.contains("DA") {
        Ok(RootCause::L01)
    } else {
        Err(ClearingError::RootCauseUnresolved(group_id))
    }
}

/// Picks the GL account for the rest-amount posting; a zero rest
/// amount needs no posting at all.
fn select_gl_account<'a>(
    rest_amount: Decimal,
    entity: &'a EntityRules,
    category: Option<&str>,
) -> Option<&'a GlAccount> {
    let accounts = &entity.gl_accounts;

    if rest_amount == Decimal::ZERO {
        return None;
    }

    if let Some(penalties) = &accounts.penalties {
        if category.is_some_and(|c| PENALTY_CATEGORIES.contains(&c)) {
            return Some(penalties);
        }
    }

    if rest_amount > Decimal::ZERO {
        if let Some(debits) = &accounts.write_off_debits {
            return Some(debits);
        }
    }
    if rest_amount < Decimal::ZERO {
        if let Some(credits) = &accounts.write_off_credits {
            return Some(credits);
        }
    }

    Some(&accounts.write_off_common)
}

/// Resolves the cost center of a GL account. When the configured
/// trade and retail cost centers differ, the customer channel decides;
/// without channel information the entity cannot be posted safely.
fn resolve_cost_center(
    account: &GlAccount,
    branch: u64,
    members: &[&&ConsolidatedRecord],
    customers: Option<&CustomerDirectory>,
) -> Result<String, ClearingError> {
    if account.cost_center.trade == account.cost_center.retail {
        return Ok(account.cost_center.trade.clone());
    }

    let channel = match members.iter().find_map(|m| m.channel) {
        Some(channel) => channel,
        None => match customers {
            Some(lookup) => {
                lookup
                    .get(branch)
                    .ok_or(ClearingError::AccountUnknown(branch))?
                    .channel
            }
            None => return Err(ClearingError::ChannelUnresolved(branch)),
        },
    };

    Ok(match channel {
        Channel::Trade => account.cost_center.trade.clone(),
        Channel::Retail => account.cost_center.retail.clone(),
    })
}

/// Compiles the difference posting text: the jurisdiction template
/// with the customer substituted, suffixed with every member case.
fn posting_text(
    rest_amount: Decimal,
    company: &CompanyRules,
    customer_name: Option<&str>,
    case_ids: &[u64],
) -> String {
    if rest_amount == Decimal::ZERO {
        return String::new();
    }

    let mut text = company
        .difference_text
        .replace("$customer$", customer_name.unwrap_or_default());

    for case_id in case_ids {
        text.push_str(" D ");
        text.push_str(&case_id.to_string());
    }

    text
}
