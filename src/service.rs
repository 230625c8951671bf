//! Service layer API for submission review workflow operations
use std::sync::Arc;

use chrono::Utc;
use sled::Transactional;
use sled::transaction::TransactionalTree;

use crate::audit::{AuditAction, AuditEntry, EntityKind};
use crate::budget::{Category, Subcategory, SubcategoryBudget, Year};
use crate::config::Config;
use crate::error::{Result, WorkflowError};
use crate::ledger::{DetectionMeta, PaymentSummary, ResearchFundEvent, ResearchFundMatcher};
use crate::lock::KeyedLocks;
use crate::notify::{Notifier, TracingNotifier};
use crate::status::{Action, Actor, Role, Status, StatusDirectory, ensure_transition};
use crate::storage::{FileStorage, LocalFileStorage};
use crate::store::{Store, TxResult, fail, tx_get, tx_put, tx_require};
use crate::submission::{ApprovalPayload, Detail, RewardAmounts, Submission, SubmissionDraft};
use crate::types::TimeStamp;
use crate::utils::{SUBMISSION_HRP, new_uuid_to_bech32, non_blank};

pub struct FundService {
    pub(crate) store: Store,
    pub(crate) storage: Arc<dyn FileStorage>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) statuses: StatusDirectory,
    pub(crate) config: Config,
    pub(crate) matcher: ResearchFundMatcher,
    pub(crate) locks: KeyedLocks,
}

/// Everything a reviewer sees for one submission.
#[derive(Debug, Clone)]
pub struct SubmissionView {
    pub submission: Submission,
    pub status_id: Option<u32>,
    pub category: Option<Category>,
    pub subcategory: Option<Subcategory>,
    pub budget: Option<SubcategoryBudget>,
    pub detection: DetectionMeta,
    // only present for research-fund submissions
    pub payment_ledger: Option<PaymentLedger>,
}

#[derive(Debug, Clone)]
pub struct PaymentLedger {
    pub summary: PaymentSummary,
    pub events: Vec<ResearchFundEvent>,
}

pub(crate) fn require_role(actor: &Actor, allowed: &[Role], action: Action) -> Result<(), WorkflowError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden {
            role: actor.role,
            action,
        })
    }
}

/// Loads a submission inside a transaction, treating retired rows as absent.
pub(crate) fn load_live(submissions: &TransactionalTree, id: &str) -> TxResult<Submission> {
    let submission: Submission =
        tx_require(submissions, id, WorkflowError::SubmissionNotFound(id.to_string()))?;
    if submission.is_retired {
        return fail(WorkflowError::SubmissionNotFound(id.to_string()));
    }
    Ok(submission)
}

impl FundService {
    pub fn new(store: Store, config: Config) -> Self {
        let matcher = ResearchFundMatcher::new(
            config.research_fund_category_ids.clone(),
            &config.research_fund_keyword,
        );
        Self {
            store,
            storage: Arc::new(LocalFileStorage::new(config.upload_path.clone())),
            notifier: Arc::new(TracingNotifier),
            statuses: StatusDirectory::standard(),
            config,
            matcher,
            locks: KeyedLocks::new(),
        }
    }

    /// Opens the database at the configured path.
    pub fn open(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        Ok(Self::new(store, config))
    }

    pub fn with_storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_statuses(mut self, statuses: StatusDirectory) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn statuses(&self) -> &StatusDirectory {
        &self.statuses
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Load a live submission from the database
    pub fn get_submission(&self, id: &str) -> Result<Submission> {
        match self.store.get::<Submission>(&self.store.submissions, id)? {
            Some(submission) if !submission.is_retired => Ok(submission),
            _ => Err(WorkflowError::SubmissionNotFound(id.to_string()).into()),
        }
    }

    /// Runs one status transition on a submission: re-reads it under its
    /// lock, checks the source status, applies `apply` and records the audit
    /// entry, all in a single transaction.
    fn transition<F>(
        &self,
        actor: &Actor,
        id: &str,
        action: Action,
        audit_action: AuditAction,
        apply: F,
    ) -> Result<Submission>
    where
        F: Fn(&mut Submission, &TimeStamp<Utc>) -> Result<String, WorkflowError>,
    {
        let _guard = self.locks.submission(id);
        let now = TimeStamp::new();
        let entry = AuditEntry::new(
            &actor.user_id,
            audit_action,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;

        let (submission, entry) = (&self.store.submissions, &self.store.audit).transaction(
            |(submissions, audit)| -> TxResult<(Submission, AuditEntry)> {
                let mut submission = load_live(submissions, id)?;
                if let Err(e) = ensure_transition(actor.role, action, submission.status) {
                    return fail(e);
                }
                let description = match apply(&mut submission, &now) {
                    Ok(description) => description,
                    Err(e) => return fail(e),
                };
                let entry = entry
                    .clone()
                    .with_number(&submission.number)
                    .describe(description);

                tx_put(submissions, id, &submission)?;
                entry.record(audit)?;
                Ok((submission, entry))
            },
        )?;

        entry.trace();
        Ok(submission)
    }

    /// Create a new draft owned by the calling applicant
    pub fn create_draft(&self, actor: &Actor, draft: SubmissionDraft) -> Result<Submission> {
        require_role(actor, &[Role::Applicant], Action::Submit)?;

        let now = TimeStamp::new();
        let id = new_uuid_to_bech32(SUBMISSION_HRP)?;
        let submission = Submission::from_draft(id.clone(), actor.user_id.clone(), draft, now.clone());
        let entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::Create,
            EntityKind::Submission,
            &id,
            now,
        )?
        .with_number(&submission.number)
        .describe(format!("Draft {} created", submission.number));

        let store = &self.store;
        (
            &store.submissions,
            &store.years,
            &store.categories,
            &store.subcategories,
            &store.budgets,
            &store.audit,
        )
            .transaction(
                |(submissions, years, categories, subcategories, budgets, audit)| -> TxResult<()> {
                    if tx_get::<Year>(years, &submission.year_id)?.is_none() {
                        return fail(WorkflowError::YearNotFound(submission.year_id.clone()));
                    }
                    if let Some(category_id) = &submission.category_id
                        && tx_get::<Category>(categories, category_id)?.is_none()
                    {
                        return fail(WorkflowError::CategoryNotFound(category_id.clone()));
                    }
                    if let Some(subcategory_id) = &submission.subcategory_id {
                        let missing = WorkflowError::SubcategoryNotFound(subcategory_id.clone());
                        let mut subcategory: Subcategory =
                            tx_require(subcategories, subcategory_id, missing.clone())?;
                        if submission
                            .category_id
                            .as_ref()
                            .is_some_and(|c| *c != subcategory.category_id)
                        {
                            return fail(missing);
                        }
                        subcategory.linked_submissions += 1;
                        tx_put(subcategories, subcategory_id, &subcategory)?;
                    }
                    if let Some(budget_id) = &submission.budget_id {
                        let missing = WorkflowError::BudgetNotFound(budget_id.clone());
                        let mut budget: SubcategoryBudget =
                            tx_require(budgets, budget_id, missing.clone())?;
                        let wrong_subcategory = submission
                            .subcategory_id
                            .as_ref()
                            .is_some_and(|s| *s != budget.subcategory_id);
                        if budget.is_retired || wrong_subcategory {
                            return fail(missing);
                        }
                        budget.linked_submissions += 1;
                        tx_put(budgets, budget_id, &budget)?;
                    }
                    tx_put(submissions, &submission.id, &submission)?;
                    entry.record(audit)?;
                    Ok(())
                },
            )?;

        entry.trace();
        Ok(submission)
    }

    /// Send a draft or a returned submission for review
    pub fn submit(&self, actor: &Actor, id: &str) -> Result<Submission> {
        require_role(actor, &[Role::Applicant], Action::Submit)?;
        let target = if self.config.require_dept_head_review {
            Status::DeptHeadPending
        } else {
            Status::Pending
        };

        self.transition(actor, id, Action::Submit, AuditAction::Submit, |submission, now| {
            if submission.applicant_id != actor.user_id {
                return Err(WorkflowError::Forbidden {
                    role: actor.role,
                    action: Action::Submit,
                });
            }
            submission.mark_submitted(target, now.clone());
            Ok(format!("Submitted {} for review", submission.number))
        })
    }

    /// Soft-delete a draft and release its subcategory and budget references
    pub fn retire_submission(&self, actor: &Actor, id: &str) -> Result<Submission> {
        require_role(actor, &[Role::Applicant, Role::Admin], Action::Retire)?;

        let _guard = self.locks.submission(id);
        let now = TimeStamp::new();
        let entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::Delete,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;

        let store = &self.store;
        let (submission, entry) = (
            &store.submissions,
            &store.subcategories,
            &store.budgets,
            &store.audit,
        )
            .transaction(
                |(submissions, subcategories, budgets, audit)| -> TxResult<(Submission, AuditEntry)> {
                    let mut submission = load_live(submissions, id)?;
                    if actor.role == Role::Applicant && submission.applicant_id != actor.user_id {
                        return fail(WorkflowError::Forbidden {
                            role: actor.role,
                            action: Action::Retire,
                        });
                    }
                    if let Err(e) = ensure_transition(actor.role, Action::Retire, submission.status) {
                        return fail(e);
                    }
                    submission.retire(now.clone());

                    if let Some(subcategory_id) = &submission.subcategory_id
                        && let Some(mut subcategory) = tx_get::<Subcategory>(subcategories, subcategory_id)?
                    {
                        subcategory.linked_submissions = subcategory.linked_submissions.saturating_sub(1);
                        tx_put(subcategories, subcategory_id, &subcategory)?;
                    }
                    if let Some(budget_id) = &submission.budget_id
                        && let Some(mut budget) = tx_get::<SubcategoryBudget>(budgets, budget_id)?
                    {
                        budget.linked_submissions = budget.linked_submissions.saturating_sub(1);
                        tx_put(budgets, budget_id, &budget)?;
                    }

                    let entry = entry
                        .clone()
                        .with_number(&submission.number)
                        .describe(format!("Retired {}", submission.number));
                    tx_put(submissions, id, &submission)?;
                    entry.record(audit)?;
                    Ok((submission, entry))
                },
            )?;

        entry.trace();
        Ok(submission)
    }

    /// Department head forwards the submission to the administrators
    pub fn recommend(
        &self,
        actor: &Actor,
        id: &str,
        comment: Option<&str>,
        signature: Option<&str>,
    ) -> Result<Submission> {
        require_role(actor, &[Role::DeptHead], Action::Recommend)?;

        self.transition(actor, id, Action::Recommend, AuditAction::Approve, |submission, now| {
            submission.head_recommend(&actor.user_id, now.clone(), comment, signature);
            Ok(match non_blank(comment) {
                Some(comment) => format!("Department head recommended: {comment}"),
                None => "Department head recommended submission".to_string(),
            })
        })
    }

    /// Reject a submission as department head or administrator
    pub fn reject(
        &self,
        actor: &Actor,
        id: &str,
        reason: &str,
        comment: Option<&str>,
    ) -> Result<Submission> {
        require_role(actor, &[Role::DeptHead, Role::Admin], Action::Reject)?;
        let reason = non_blank(Some(reason)).ok_or(WorkflowError::ReasonRequired)?;

        self.transition(actor, id, Action::Reject, AuditAction::Reject, |submission, now| {
            match actor.role {
                Role::DeptHead => submission.head_reject(&actor.user_id, now.clone(), &reason),
                _ => submission.admin_reject(&actor.user_id, now.clone(), &reason, comment),
            }
            Ok(reason.clone())
        })
    }

    /// Return a submission to its applicant. The applicant is notified once
    /// the change is committed; a failed notification is only logged.
    pub fn request_revision(&self, actor: &Actor, id: &str, comment: &str) -> Result<Submission> {
        require_role(actor, &[Role::DeptHead, Role::Admin], Action::RequestRevision)?;
        let comment = non_blank(Some(comment)).ok_or(WorkflowError::CommentRequired)?;
        let reviewer = match actor.role {
            Role::DeptHead => "Department head",
            _ => "Admin",
        };

        let submission = self.transition(
            actor,
            id,
            Action::RequestRevision,
            AuditAction::RequestRevision,
            |submission, now| {
                submission.request_revision(actor.role, now.clone(), &comment);
                Ok(format!("{reviewer} requested revision: {comment}"))
            },
        )?;

        if let Err(e) = self.notifier.needs_more_info(&submission, actor.role, &comment) {
            tracing::warn!(submission_id = %submission.id, error = %e, "revision notification failed");
        }
        Ok(submission)
    }

    /// Approve a submission. A fund application linked to a budget consumes
    /// its approved amount from that budget in the same transaction.
    pub fn approve(&self, actor: &Actor, id: &str, payload: &ApprovalPayload) -> Result<Submission> {
        require_role(actor, &[Role::Admin], Action::Approve)?;

        // lock order: submission, then budget
        let _guard = self.locks.submission(id);
        let budget_id = self.get_submission(id)?.budget_id;
        let _budget_guard = budget_id.as_deref().map(|budget_id| self.locks.budget(budget_id));

        let now = TimeStamp::new();
        let entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::Approve,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;

        let store = &self.store;
        let (submission, entry) = (&store.submissions, &store.budgets, &store.audit).transaction(
            |(submissions, budgets, audit)| -> TxResult<(Submission, AuditEntry)> {
                let mut submission = load_live(submissions, id)?;
                if let Err(e) = ensure_transition(actor.role, Action::Approve, submission.status) {
                    return fail(e);
                }
                let amount = match submission.approve(&actor.user_id, now.clone(), payload) {
                    Ok(amount) => amount,
                    Err(e) => return fail(e),
                };
                let mut description = format!(
                    "Approved {} for {}",
                    submission.number,
                    submission.detail.approved_amount()
                );

                if let (Detail::FundApplication(_), Some(budget_id)) =
                    (&submission.detail, &submission.budget_id)
                    && amount > 0
                {
                    let mut budget: SubcategoryBudget = tx_require(
                        budgets,
                        budget_id,
                        WorkflowError::BudgetNotFound(budget_id.clone()),
                    )?;
                    if let Err(e) = budget.consume(amount, now.clone()) {
                        return fail(e);
                    }
                    tx_put(budgets, budget_id, &budget)?;
                    description.push_str(&format!("; consumed from budget {budget_id}"));
                }

                let entry = entry
                    .clone()
                    .with_number(&submission.number)
                    .describe(description);
                tx_put(submissions, id, &submission)?;
                entry.record(audit)?;
                Ok((submission, entry))
            },
        )?;

        entry.trace();
        Ok(submission)
    }

    /// Revise the approved components of a publication reward
    pub fn update_reward_amounts(
        &self,
        actor: &Actor,
        id: &str,
        amounts: &RewardAmounts,
    ) -> Result<Submission> {
        require_role(actor, &[Role::Admin], Action::Approve)?;

        let _guard = self.locks.submission(id);
        let now = TimeStamp::new();
        let entry = AuditEntry::new(
            &actor.user_id,
            AuditAction::Update,
            EntityKind::Submission,
            id,
            now.clone(),
        )?;

        let (submission, entry) = (&self.store.submissions, &self.store.audit).transaction(
            |(submissions, audit)| -> TxResult<(Submission, AuditEntry)> {
                let mut submission = load_live(submissions, id)?;
                if let Err(e) = submission.update_reward_amounts(amounts, now.clone()) {
                    return fail(e);
                }
                let entry = entry
                    .clone()
                    .with_number(&submission.number)
                    .describe(format!(
                        "Updated reward amounts (total {})",
                        submission.detail.approved_amount()
                    ));
                tx_put(submissions, id, &submission)?;
                entry.record(audit)?;
                Ok((submission, entry))
            },
        )?;

        entry.trace();
        Ok(submission)
    }

    /// Category and subcategory of a submission plus the research-fund
    /// detection result. The category falls back to the subcategory's parent.
    pub(crate) fn classify(
        &self,
        submission: &Submission,
    ) -> Result<(Option<Category>, Option<Subcategory>, DetectionMeta)> {
        let store = &self.store;
        let subcategory = match &submission.subcategory_id {
            Some(id) => store.get::<Subcategory>(&store.subcategories, id)?,
            None => None,
        };
        let category_id = submission
            .category_id
            .clone()
            .or_else(|| subcategory.as_ref().map(|s| s.category_id.clone()));
        let category = match category_id {
            Some(id) => store.get::<Category>(&store.categories, &id)?,
            None => None,
        };
        let detection = self.matcher.detect(category.as_ref(), subcategory.as_ref());
        tracing::debug!(
            submission_id = %submission.id,
            research_fund = detection.is_research_fund(),
            "classified submission"
        );
        Ok((category, subcategory, detection))
    }

    /// Full view of one submission, including the payment ledger for
    /// research-fund submissions
    pub fn get_submission_details(&self, id: &str) -> Result<SubmissionView> {
        let submission = self.get_submission(id)?;
        let (category, subcategory, detection) = self.classify(&submission)?;
        let budget = match &submission.budget_id {
            Some(budget_id) => self
                .store
                .get::<SubcategoryBudget>(&self.store.budgets, budget_id)?,
            None => None,
        };

        let payment_ledger = if detection.is_research_fund() {
            Some(PaymentLedger {
                summary: PaymentSummary::new(&submission, &self.ledger_totals(id)?),
                events: self.load_events(id)?,
            })
        } else {
            None
        };

        Ok(SubmissionView {
            status_id: self.statuses.id_of(submission.status),
            submission,
            category,
            subcategory,
            budget,
            detection,
            payment_ledger,
        })
    }

    /// Audit entries for one entity, oldest first
    pub fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .scan_prefix(&self.store.audit, &format!("{entity_id}/"))?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::FundApplicationDetail;

    #[test]
    fn role_gate_reports_caller_role() {
        let head = Actor::dept_head("u1");
        assert_eq!(
            require_role(&head, &[Role::Admin], Action::Approve),
            Err(WorkflowError::Forbidden {
                role: Role::DeptHead,
                action: Action::Approve
            })
        );
        assert!(require_role(&head, &[Role::DeptHead, Role::Admin], Action::Reject).is_ok());
    }

    #[test]
    fn draft_requires_known_year() {
        let service = FundService::new(Store::temporary().unwrap(), Config::default());
        let draft = SubmissionDraft::new(
            "year_missing",
            Detail::FundApplication(FundApplicationDetail::default()),
        );
        let err = service
            .create_draft(&Actor::applicant("u1"), draft)
            .unwrap_err();
        assert_eq!(
            err.workflow(),
            Some(&WorkflowError::YearNotFound("year_missing".into()))
        );
    }
}
