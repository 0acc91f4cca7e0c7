use quota_scheduler::{PlanError, ScheduleError};
use thiserror::Error;

/// Invalid or unreadable traffic configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("total must be positive, got {0}")]
    NonPositiveTotal(i64),

    #[error("max_user_number must be at least 1")]
    NoUsers,

    #[error("weight for `{action}` is not a number: {value}")]
    NonNumericWeight { action: String, value: String },

    #[error("unknown action type `{0}`")]
    UnknownAction(String),

    #[error("region name must be 1 or 2 ASCII alphanumeric characters, got `{0}`")]
    InvalidName(String),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Failure to build, sign or encode a transaction.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown action type `{0}`")]
    UnknownAction(String),

    #[error("action `{action}` is missing parameter `{param}`")]
    MissingParam { action: String, param: &'static str },

    #[error("action `{action}` has an invalid `{param}` parameter")]
    InvalidParam { action: String, param: &'static str },

    #[error("signing failed: {0}")]
    Signing(#[from] k256::ecdsa::Error),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The pool was asked for something it cannot provide.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("unknown action type `{0}`")]
    UnknownAction(String),

    #[error("pool cannot satisfy `{0}` right now")]
    Unsatisfied(String),
}

/// Anything that stops a generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanic,
}

impl GenerateError {
    /// The action type an ordered run could not satisfy, if that is why it stopped.
    pub fn infeasible_action(&self) -> Option<&str> {
        match self {
            GenerateError::Schedule(err) => err.action(),
            _ => None,
        }
    }
}
