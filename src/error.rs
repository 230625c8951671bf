use sled::transaction::TransactionError;

use crate::status::{Action, Role, Status};
use crate::types::Amount;

/// Business-rule violations. These are the caller's fault and carry a message
/// fit to show back to them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action} a submission in status {from}")]
    InvalidTransition { action: Action, from: Status },
    #[error("role {role} may not {}", .action.permission())]
    Forbidden { role: Role, action: Action },
    #[error("rejection reason is required")]
    ReasonRequired,
    #[error("revision comment is required")]
    CommentRequired,
    #[error("payment would exceed approved amount ({paid} paid + {requested} requested > {approved} approved)")]
    PaymentCapExceeded {
        approved: Amount,
        paid: Amount,
        requested: Amount,
    },
    #[error("submission is closed; reopen before recording payments")]
    SubmissionClosed,
    #[error("payments can only be recorded against approved submissions (status {0})")]
    NotApproved(Status),
    #[error("payment events require at least one attachment")]
    AttachmentRequired,
    #[error("submission is missing fund application detail")]
    MissingFundDetail,
    #[error("submission is missing applicant information")]
    MissingApplicant,
    #[error("submission does not belong to research fund category")]
    NotResearchFund,
    #[error("unsupported event type {0}")]
    UnsupportedEventType(String),
    #[error("amount must be a positive number")]
    InvalidAmount,
    #[error("operation only supports {expected} submissions")]
    WrongSubmissionType { expected: &'static str },
    #[error("submission {0} not found")]
    SubmissionNotFound(String),
    #[error("year {0} not found")]
    YearNotFound(String),
    #[error("target year {0} already exists")]
    YearExists(String),
    #[error("category {0} not found")]
    CategoryNotFound(String),
    #[error("subcategory {0} not found")]
    SubcategoryNotFound(String),
    #[error("subcategory budget {0} not found")]
    BudgetNotFound(String),
    #[error("cannot delete budget that has been used ({0} used)")]
    BudgetInUse(Amount),
    #[error("cannot delete budget that has applications ({0} linked)")]
    BudgetReferenced(u32),
    #[error("invalid budget configuration: {0}")]
    InvalidBudget(&'static str),
    #[error("budget is disabled")]
    BudgetDisabled,
    #[error("insufficient remaining budget ({remaining} remaining, {requested} requested)")]
    BudgetExhausted { remaining: Amount, requested: Amount },
    #[error("amount {requested} exceeds the per-grant cap of {cap}")]
    GrantCapExceeded { cap: Amount, requested: Amount },
    #[error("amount would exceed the yearly cap of {cap}")]
    YearlyCapExceeded { cap: Amount },
    #[error("no grants remaining under this budget")]
    GrantsExhausted,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("file storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to generate identifier: {0}")]
    Identifier(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Domain errors map to client-fault responses, everything else to
    /// server-fault responses.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Error::Workflow(_))
    }

    pub fn workflow(&self) -> Option<&WorkflowError> {
        match self {
            Error::Workflow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransactionError<Error>> for Error {
    fn from(value: TransactionError<Error>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Error::Database(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
