use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppResult, ParseError};
use crate::ledger::parser::parse_number;

/// Sales channel of a customer account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Trade,
    Retail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub account: u64,
    pub name: String,
    pub channel: Channel,
}

/// Customer master lookup, keyed by head-office account.
///
/// The lookup is optional per company code; when the file exists it
/// must cover every account appearing in the consolidated data, which
/// is enforced by the reconciliation engine.
#[derive(Debug, Clone, Default)]
pub struct CustomerDirectory {
    by_account: HashMap<u64, CustomerRecord>,
}

impl CustomerDirectory {
    /// Parses a pipe-delimited customer file (`account|name|channel`).
    /// Rows not starting with a numeric account token are dropped.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut by_account = HashMap::new();

        for (line_no, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split('|').map(str::trim).collect();

            if fields.len() != 3 || !fields[0].chars().next().is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }

            let channel = match fields[2].to_ascii_lowercase().as_str() {
                "trade" => Channel::Trade,
                "retail" => Channel::Retail,
                other => return Err(ParseError::UnknownChannel(other.to_string())),
            };

            let record = CustomerRecord {
                account: parse_number(fields[0], "account", line_no)?,
                name: fields[1].to_string(),
                channel,
            };

            by_account.insert(record.account, record);
        }

        Ok(Self { by_account })
    }

    /// Loads the customer file for a company code; `None` when no
    /// file is configured, which is a valid setup.
    pub fn load(path: &Path) -> AppResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        info!("Loading customer data from '{}' ...", path.display());
        let text = std::fs::read_to_string(path)?;

        Ok(Some(Self::parse(&text)?))
    }

    pub fn get(&self, account: u64) -> Option<&CustomerRecord> {
        self.by_account.get(&account)
    }
}
