//! Research-fund payment ledger operations on [`FundService`]
use sled::Transactional;

use crate::audit::{AuditAction, AuditEntry, EntityKind};
use crate::error::{Result, WorkflowError};
use crate::ledger::{
    Attachment, CLOSE_COMMENT, EventBody, EventKind, LedgerTotals, PaymentSummary, REOPEN_COMMENT,
    ResearchFundEvent, validate_payment,
};
use crate::service::{FundService, load_live, require_role};
use crate::status::{Action, Actor, Role, Status, ensure_transition};
use crate::storage::{FolderSpec, StoredFile, Upload};
use crate::store::{TxResult, child_key, fail, tx_get, tx_put};
use crate::submission::Submission;
use crate::types::{Amount, TimeStamp};
use crate::utils::{EVENT_HRP, FILE_HRP, new_uuid_to_bech32, non_blank};

/// Administrator input for a new ledger event.
#[derive(Debug, Clone, Default)]
pub struct EventRequest {
    pub kind: Option<EventKind>,
    pub amount: Option<Amount>,
    pub comment: Option<String>,
    pub files: Vec<Upload>,
}

impl EventRequest {
    pub fn payment(amount: Amount) -> Self {
        Self {
            kind: Some(EventKind::Payment),
            amount: Some(amount),
            ..Default::default()
        }
    }

    pub fn note(comment: impl Into<String>) -> Self {
        Self {
            kind: Some(EventKind::Note),
            comment: Some(comment.into()),
            ..Default::default()
        }
    }

    pub fn add_file(mut self, upload: Upload) -> Self {
        self.files.push(upload);
        self
    }

    pub fn set_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl FundService {
    pub(crate) fn ledger_totals(&self, id: &str) -> Result<LedgerTotals> {
        Ok(self
            .store
            .get::<LedgerTotals>(&self.store.ledgers, id)?
            .unwrap_or_default())
    }

    pub(crate) fn load_events(&self, id: &str) -> Result<Vec<ResearchFundEvent>> {
        let mut events: Vec<ResearchFundEvent> =
            self.store.scan_prefix(&self.store.events, &format!("{id}/"))?;
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Loads a live submission that belongs to the research fund.
    fn research_fund_submission(&self, id: &str) -> Result<Submission> {
        let submission = self.get_submission(id)?;
        let (_, _, detection) = self.classify(&submission)?;
        if !detection.is_research_fund() {
            return Err(WorkflowError::NotResearchFund.into());
        }
        Ok(submission)
    }

    /// Ledger events of a research-fund submission, oldest first
    pub fn list_payment_events(&self, id: &str) -> Result<Vec<ResearchFundEvent>> {
        self.research_fund_submission(id)?;
        self.load_events(id)
    }

    pub fn payment_summary(&self, id: &str) -> Result<PaymentSummary> {
        let submission = self.research_fund_submission(id)?;
        Ok(PaymentSummary::new(&submission, &self.ledger_totals(id)?))
    }

    /// Append a note or payment event.
    ///
    /// Attached files are written before the transaction opens and deleted
    /// again if it does not commit, so a failed call leaves neither an event
    /// row nor files behind.
    pub fn create_payment_event(
        &self,
        actor: &Actor,
        id: &str,
        request: EventRequest,
    ) -> Result<ResearchFundEvent> {
        require_role(actor, &[Role::Admin], Action::RecordPayment)?;
        let kind = EventKind::resolve(request.kind, request.amount)?;

        let _guard = self.locks.submission(id);
        let submission = self.research_fund_submission(id)?;

        // reject obviously invalid payments before touching the filesystem
        if kind == EventKind::Payment {
            validate_payment(
                &submission,
                &self.ledger_totals(id)?,
                request.amount,
                request.files.len(),
            )?;
        }
        if !request.files.is_empty() && submission.applicant_id.trim().is_empty() {
            return Err(WorkflowError::MissingApplicant.into());
        }

        let now = TimeStamp::new();
        let event_id = new_uuid_to_bech32(EVENT_HRP)?;
        let entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::RecordEvent,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;
        let folder = FolderSpec {
            owner_id: submission.applicant_id.clone(),
            submission_type: submission.submission_type(),
            submission_id: submission.id.clone(),
            event_id: event_id.clone(),
        };

        let mut stored: Vec<StoredFile> = Vec::with_capacity(request.files.len());
        let result = self
            .store_files(&folder, &request.files, &mut stored)
            .and_then(|attachments| {
                let event = ResearchFundEvent {
                    id: event_id.clone(),
                    submission_id: id.to_string(),
                    body: EventBody::Note,
                    comment: non_blank(request.comment.as_deref()),
                    attachments,
                    created_by: actor.user_id.clone(),
                    created_at: now.clone(),
                };
                self.commit_event(id, kind, request.amount, event, &entry)
            });

        match result {
            Ok((event, entry)) => {
                tracing::info!(
                    submission_id = %id,
                    event_id = %event.id,
                    kind = event.body.kind().as_str(),
                    amount = event.body.amount().unwrap_or(0),
                    "recorded research fund event"
                );
                entry.trace();
                Ok(event)
            }
            Err(e) => {
                for file in &stored {
                    if let Err(cleanup) = self.storage.delete(&file.stored_path) {
                        tracing::warn!(path = %file.stored_path, error = %cleanup, "failed to remove attachment");
                    }
                }
                Err(e)
            }
        }
    }

    fn store_files(
        &self,
        folder: &FolderSpec,
        files: &[Upload],
        stored: &mut Vec<StoredFile>,
    ) -> Result<Vec<Attachment>> {
        let mut attachments = Vec::with_capacity(files.len());
        for upload in files {
            let file = self.storage.store(folder, upload)?;
            stored.push(file.clone());
            attachments.push(Attachment {
                file_id: new_uuid_to_bech32(FILE_HRP)?,
                original_name: file.original_name,
                stored_path: file.stored_path,
                size: file.size,
                mime_type: file.mime_type,
                sha256: file.sha256,
            });
        }
        Ok(attachments)
    }

    fn commit_event(
        &self,
        id: &str,
        kind: EventKind,
        amount: Option<Amount>,
        event: ResearchFundEvent,
        entry: &AuditEntry,
    ) -> Result<(ResearchFundEvent, AuditEntry)> {
        let store = &self.store;
        let committed = (&store.submissions, &store.ledgers, &store.events, &store.audit).transaction(
            |(submissions, ledgers, events, audit)| -> TxResult<(ResearchFundEvent, AuditEntry)> {
                let submission = load_live(submissions, id)?;
                let mut totals = tx_get::<LedgerTotals>(ledgers, id)?.unwrap_or_default();

                let mut event = event.clone();
                if kind == EventKind::Payment {
                    match validate_payment(&submission, &totals, amount, event.attachments.len()) {
                        Ok(amount) => event.body = EventBody::Payment { amount },
                        Err(e) => return fail(e),
                    }
                }
                if let Err(e) = totals.push(&event.body) {
                    return fail(e);
                }

                let description = match event.body.amount() {
                    Some(amount) => format!("Recorded payment of {amount}"),
                    None => "Recorded note".to_string(),
                };
                let entry = entry
                    .clone()
                    .with_number(&submission.number)
                    .describe(description);

                tx_put(events, &child_key(id, &event.id), &event)?;
                tx_put(ledgers, id, &totals)?;
                entry.record(audit)?;
                Ok((event, entry))
            },
        )?;
        Ok(committed)
    }

    /// Close an approved research-fund submission, or reopen a closed one.
    /// Each toggle appends a closure event recording the status reached.
    pub fn toggle_closure(
        &self,
        actor: &Actor,
        id: &str,
        comment: Option<&str>,
    ) -> Result<(Submission, ResearchFundEvent)> {
        require_role(actor, &[Role::Admin], Action::Close)?;

        let _guard = self.locks.submission(id);
        self.research_fund_submission(id)?;

        let now = TimeStamp::new();
        let event_id = new_uuid_to_bech32(EVENT_HRP)?;
        let close_entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::Close,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;

        let store = &self.store;
        let (submission, event, entry) = (&store.submissions, &store.ledgers, &store.events, &store.audit)
            .transaction(
                |(submissions, ledgers, events, audit)| -> TxResult<(Submission, ResearchFundEvent, AuditEntry)> {
                    let mut submission = load_live(submissions, id)?;
                    let closing = !submission.is_closed();
                    let action = if closing { Action::Close } else { Action::Reopen };
                    if let Err(e) = ensure_transition(actor.role, action, submission.status) {
                        return fail(e);
                    }

                    let (status_after, audit_action, default_comment) = if closing {
                        submission.close(now.clone());
                        (Status::AdminClosed, AuditAction::Close, CLOSE_COMMENT)
                    } else {
                        submission.reopen(now.clone());
                        (Status::Approved, AuditAction::Reopen, REOPEN_COMMENT)
                    };
                    let comment = non_blank(comment).unwrap_or_else(|| default_comment.to_string());

                    let event = ResearchFundEvent {
                        id: event_id.clone(),
                        submission_id: id.to_string(),
                        body: EventBody::Closure { status_after },
                        comment: Some(comment.clone()),
                        attachments: vec![],
                        created_by: actor.user_id.clone(),
                        created_at: now.clone(),
                    };
                    let mut totals = tx_get::<LedgerTotals>(ledgers, id)?.unwrap_or_default();
                    if let Err(e) = totals.push(&event.body) {
                        return fail(e);
                    }

                    let mut entry = close_entry
                        .clone()
                        .with_number(&submission.number)
                        .describe(comment);
                    entry.action = audit_action;

                    tx_put(submissions, id, &submission)?;
                    tx_put(events, &child_key(id, &event.id), &event)?;
                    tx_put(ledgers, id, &totals)?;
                    entry.record(audit)?;
                    Ok((submission, event, entry))
                },
            )?;

        entry.trace();
        Ok((submission, event))
    }
}
