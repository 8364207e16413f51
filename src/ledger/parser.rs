use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::ParseError;
use crate::ledger::models::ItemRecord;
use crate::reconcile::caseid::CaseIdExtractor;

const LEDGER_COLUMNS: usize = 11;

/// Extracts the relevant accounting lines from a raw ledger export.
///
/// Only table rows whose first cell starts with a numeric token are
/// kept; headers, separators and footer lines are dropped silently.
/// User-entered double quotes are stripped as they carry no meaning
/// in the export.
fn compact(text: &str) -> Vec<String> {
    let row = Regex::new(r"^\|\s*\d+.*\|$").unwrap();

    text.lines()
        .filter(|line| row.is_match(line))
        .map(|line| {
            line.trim_start_matches('|')
                .trim_end_matches('|')
                .replace('"', "")
        })
        .collect()
}

/// Converts an amount in ledger numeric format (`1.234,56-`,
/// trailing sign, dot thousands separator) into a decimal.
pub(crate) fn parse_amount(value: &str, line: usize) -> Result<Decimal, ParseError> {
    let mut normalized = value.replace('.', "").replace(',', ".");

    if normalized.ends_with('-') {
        normalized = format!("-{}", normalized.trim_end_matches('-'));
    }

    normalized.parse().map_err(|_| ParseError::InvalidAmount {
        line,
        value: value.to_string(),
    })
}

pub(crate) fn parse_date(value: &str, line: usize) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(value, "%d.%m.%Y").map_err(|_| ParseError::InvalidDate {
        line,
        value: value.to_string(),
    })
}

pub(crate) fn parse_number(
    value: &str,
    field: &'static str,
    line: usize,
) -> Result<u64, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        line,
        field,
        value: value.to_string(),
    })
}

/// Parses a raw ledger export into typed open-item records.
pub fn parse_ledger_export(
    text: &str,
    extractor: &CaseIdExtractor,
) -> Result<Vec<ItemRecord>, ParseError> {
    let mut items = Vec::new();

    for (line_no, line) in compact(text).iter().enumerate() {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();

        if fields.len() != LEDGER_COLUMNS {
            return Err(ParseError::ColumnCount {
                line: line_no,
                expected: LEDGER_COLUMNS,
                got: fields.len(),
            });
        }

        let tax_code = if fields[7] == "**" { "" } else { fields[7] };
        let text_field = fields[8].to_string();
        let case_refs = extractor.extract(&text_field);
        let case_id = match case_refs.as_slice() {
            [single] => Some(*single),
            _ => None,
        };

        items.push(ItemRecord {
            document_number: parse_number(fields[0], "document_number", line_no)?,
            assignment: fields[1].to_string(),
            document_type: fields[2].to_string(),
            document_date: parse_date(fields[3], line_no)?,
            due_date: parse_date(fields[4], line_no)?,
            amount: parse_amount(fields[5], line_no)?,
            currency: fields[6].to_string(),
            tax_code: tax_code.to_string(),
            text: text_field,
            branch: parse_number(fields[9], "branch", line_no)?,
            head_office: parse_number(fields[10], "head_office", line_no)?,
            case_refs,
            case_id,
        });
    }

    Ok(items)
}
