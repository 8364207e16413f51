use regex::Regex;

use crate::disputes::models::{CaseRecord, CaseStatus};
use crate::error::ParseError;
use crate::ledger::parser::{parse_date, parse_number};

const CASE_COLUMNS: usize = 14;

/// Keeps only the table rows of a raw case export: the third cell
/// must start with a numeric token (the case identifier). Everything
/// else is layout noise and dropped silently.
fn compact(text: &str) -> Vec<String> {
    let row = Regex::new(r"^\|.*?\|.*?\|\d+.*$").unwrap();

    text.lines()
        .filter(|line| row.is_match(line))
        .map(|line| {
            line.trim_start_matches('|')
                .trim_end_matches('|')
                .replace('"', "")
        })
        .collect()
}

fn optional_number(value: &str, field: &'static str, line: usize) -> Result<Option<u64>, ParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_number(value, field, line).map(Some)
}

fn optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses a raw case export into typed case records, ordered by
/// case identifier descending.
pub fn parse_case_export(text: &str) -> Result<Vec<CaseRecord>, ParseError> {
    let mut cases = Vec::new();

    for (line_no, line) in compact(text).iter().enumerate() {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();

        if fields.len() != CASE_COLUMNS {
            return Err(ParseError::ColumnCount {
                line: line_no,
                expected: CASE_COLUMNS,
                got: fields.len(),
            });
        }

        let status_code = parse_number(fields[5], "status", line_no)? as u8;
        let status = CaseStatus::from_code(status_code)
            .ok_or_else(|| ParseError::UnknownStatus(fields[5].to_string()))?;

        cases.push(CaseRecord {
            debtor: parse_number(fields[0], "debtor", line_no)?,
            case_id: parse_number(fields[1], "case_id", line_no)?,
            notification: optional_number(fields[2], "notification", line_no)?,
            status_sales: fields[3].to_string(),
            assignment: fields[4].to_string(),
            status,
            created_on: parse_date(fields[6], line_no)?,
            status_ac: fields[7].to_string(),
            processor: fields[8].to_string(),
            category_description: fields[9].to_string(),
            root_cause: optional_text(fields[10]),
            note: fields[11].to_string(),
            fax_number: fields[12].to_string(),
            category: optional_text(fields[13]),
        });
    }

    cases.sort_by(|a, b| b.case_id.cmp(&a.case_id));

    Ok(cases)
}
