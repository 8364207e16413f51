use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Clearing rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("Automation backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Clearing error: {0}")]
    Clearing(#[from] ClearingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while converting raw export text into typed records
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unexpected column count on line {line}: expected {expected}, got {got}")]
    ColumnCount {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("Invalid amount '{value}' on line {line}")]
    InvalidAmount { line: usize, value: String },

    #[error("Invalid date '{value}' on line {line}")]
    InvalidDate { line: usize, value: String },

    #[error("Invalid numeric field '{field}' = '{value}' on line {line}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("Unknown case status code '{0}'")]
    UnknownStatus(String),

    #[error("Unknown customer channel '{0}'")]
    UnknownChannel(String),
}

/// Errors raised when loading or validating the clearing rules
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Failed to parse rules: {0}")]
    Load(#[from] serde_yaml::Error),

    #[error("Cannot read rules file '{0}': {1}")]
    Unreadable(String, String),

    #[error("Company code '{0}' has an invalid case identifier pattern")]
    InvalidCasePattern(String),

    #[error("Company code '{0}': difference text template is missing the '$customer$' placeholder")]
    TemplateMissingPlaceholder(String),

    #[error("Company code '{0}': base threshold must not be negative")]
    NegativeThreshold(String),

    #[error("Company code '{0}' defines no entities")]
    NoEntities(String),
}

/// Faults raised by the automation backend collaborator
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection to the automation backend lost: {0}")]
    ConnectionLost(String),

    #[error("No data found: {0}")]
    NoDataFound(String),

    #[error("No matching case records found: {0}")]
    NoCaseFound(String),

    #[error("Document not found on account: {0}")]
    DocumentNotFound(String),

    #[error("Customer account {0} is blocked for posting")]
    AccountBlocked(u64),

    #[error("Item selection failed: {0}")]
    SelectionFailed(String),

    #[error("Posting rejected: {0}")]
    PostingRejected(String),

    #[error("Could not save case changes: {0}")]
    SavingChangesRejected(String),

    #[error("Case {0} could not be edited")]
    CaseEditRejected(u64),

    #[error("Notification {0} not found")]
    NotificationNotFound(u64),

    #[error("Notification {0} is already completed")]
    NotificationAlreadyCompleted(u64),

    #[error("Backend transaction not started: {0}")]
    TransactionNotStarted(String),

    #[error("Backend runtime fault: {0}")]
    Runtime(String),
}

/// Data-integrity and resolution errors raised by the reconciliation
/// and instruction-building stages
#[derive(Error, Debug)]
pub enum ClearingError {
    #[error("Merge of ledger items and case records for '{0}' produced no rows; check the merge key")]
    EmptyMerge(String),

    #[error("Customer account {0} not found in the customer lookup")]
    AccountUnknown(u64),

    #[error("Customer lookup is required to resolve the cost center channel for account {0}")]
    ChannelUnresolved(u64),

    #[error("Group {0}: root cause could not be resolved to L01 or L06")]
    RootCauseUnresolved(u64),

    #[error("Accumulator entry for entity '{entity}', kind '{kind}' is already occupied")]
    AccumulatorOccupied { entity: String, kind: &'static str },
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Internal(format!("Decimal conversion error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
