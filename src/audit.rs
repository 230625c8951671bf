//! Append-only audit records written with every state change
use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::error::Result;
use crate::store::{TxResult, child_key, tx_put};
use crate::types::TimeStamp;
use crate::utils::{AUDIT_HRP, new_uuid_to_bech32};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    #[n(0)]
    Create,
    #[n(1)]
    Update,
    #[n(2)]
    Delete,
    #[n(3)]
    Submit,
    #[n(4)]
    Approve,
    #[n(5)]
    Reject,
    #[n(6)]
    RequestRevision,
    #[n(7)]
    Close,
    #[n(8)]
    Reopen,
    #[n(9)]
    RecordEvent,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Submit => "submit",
            AuditAction::Approve => "approve",
            AuditAction::Reject => "reject",
            AuditAction::RequestRevision => "request_revision",
            AuditAction::Close => "close",
            AuditAction::Reopen => "reopen",
            AuditAction::RecordEvent => "record_event",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    #[n(0)]
    Submission,
    #[n(1)]
    Budget,
    #[n(2)]
    Year,
    #[n(3)]
    Category,
    #[n(4)]
    Subcategory,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub actor_id: String,
    #[n(2)]
    pub action: AuditAction,
    #[n(3)]
    pub entity: EntityKind,
    #[n(4)]
    pub entity_id: String,
    // human-facing reference such as the submission number
    #[n(5)]
    pub entity_number: Option<String>,
    #[n(6)]
    pub description: String,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl AuditEntry {
    /// Entry with a fresh id and no description yet.
    pub fn new(
        actor_id: &str,
        action: AuditAction,
        entity: EntityKind,
        entity_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: new_uuid_to_bech32(AUDIT_HRP)?,
            actor_id: actor_id.to_string(),
            action,
            entity,
            entity_id: entity_id.to_string(),
            entity_number: None,
            description: String::new(),
            created_at: now,
        })
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_number(mut self, number: &str) -> Self {
        self.entity_number = Some(number.to_string());
        self
    }

    pub fn key(&self) -> String {
        child_key(&self.entity_id, &self.id)
    }

    /// Writes the entry inside an open transaction.
    pub(crate) fn record(&self, audit: &TransactionalTree) -> TxResult<()> {
        tx_put(audit, &self.key(), self)
    }

    /// Emits the committed entry to the log.
    pub(crate) fn trace(&self) {
        tracing::info!(
            audit_id = %self.id,
            actor = %self.actor_id,
            action = self.action.as_str(),
            entity_id = %self.entity_id,
            "{}",
            self.description
        );
    }
}
