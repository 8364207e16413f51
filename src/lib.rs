//! Automated reconciliation and clearing of accounts-receivable open
//! items against dispute-case records.
//!
//! The crate parses raw ledger and dispute-case exports, matches open
//! items under identifier/tax/amount rules, builds per-currency
//! clearing instructions and drives a crash-resumable, checkpointed
//! pipeline against an external automation backend.

pub mod backend;
pub mod bootstrap;
pub mod clearing;
pub mod config;
pub mod customers;
pub mod dates;
pub mod disputes;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod rules;
