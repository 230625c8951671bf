//! Submission lifecycle and budget ledger engine for research grant
//! administration.

pub mod audit;
pub mod budget;
pub mod config;
pub mod error;
pub mod fund_config;
pub mod ledger;
pub mod lock;
pub mod notify;
pub mod payment;
pub mod service;
pub mod status;
pub mod storage;
pub mod store;
pub mod submission;
pub mod types;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result, WorkflowError};
pub use service::FundService;
pub use status::{Action, Actor, Role, Status};
pub use store::Store;
