//! Submission records and their type-specific details
use chrono::Utc;

use crate::error::WorkflowError;
use crate::status::{Role, Status};
use crate::types::{Amount, TimeStamp};
use crate::utils::non_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
    FundApplication,
    PublicationReward,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionType::FundApplication => "fund_application",
            SubmissionType::PublicationReward => "publication_reward",
        }
    }

    fn number_prefix(&self) -> &'static str {
        match self {
            SubmissionType::FundApplication => "FA",
            SubmissionType::PublicationReward => "PR",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct FundApplicationDetail {
    #[n(0)]
    pub project_title: String,
    #[n(1)]
    pub project_description: String,
    #[n(2)]
    pub requested_amount: Amount,
    #[n(3)]
    pub approved_amount: Amount,
    #[n(4)]
    pub announce_reference: Option<String>,
    #[n(5)]
    pub closed_at: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub comment: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationRewardDetail {
    #[n(0)]
    pub paper_title: String,
    #[n(1)]
    pub journal_name: String,
    #[n(2)]
    pub quartile: Option<String>,
    #[n(3)]
    pub requested_reward: Amount,
    #[n(4)]
    pub reward_approve_amount: Amount,
    #[n(5)]
    pub revision_fee_approve_amount: Amount,
    #[n(6)]
    pub publication_fee_approve_amount: Amount,
    #[n(7)]
    pub total_approve_amount: Amount,
    #[n(8)]
    pub announce_reference: Option<String>,
}

/// Exactly one detail is attached to a submission and it decides the
/// submission type.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Detail {
    #[n(0)]
    FundApplication(#[n(0)] FundApplicationDetail),
    #[n(1)]
    PublicationReward(#[n(0)] PublicationRewardDetail),
}

impl Detail {
    pub fn submission_type(&self) -> SubmissionType {
        match self {
            Detail::FundApplication(_) => SubmissionType::FundApplication,
            Detail::PublicationReward(_) => SubmissionType::PublicationReward,
        }
    }

    /// Amount the submission is approved for, used as the payment cap.
    pub fn approved_amount(&self) -> Amount {
        match self {
            Detail::FundApplication(d) => d.approved_amount,
            Detail::PublicationReward(d) => d.total_approve_amount,
        }
    }

    pub fn announce_reference(&self) -> Option<&str> {
        match self {
            Detail::FundApplication(d) => d.announce_reference.as_deref(),
            Detail::PublicationReward(d) => d.announce_reference.as_deref(),
        }
    }

    pub fn fund_application(&self) -> Option<&FundApplicationDetail> {
        match self {
            Detail::FundApplication(d) => Some(d),
            Detail::PublicationReward(_) => None,
        }
    }
}

/// Decision stamps written by one reviewing role.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewStamps {
    #[n(0)]
    pub approved_by: Option<String>,
    #[n(1)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub rejected_by: Option<String>,
    #[n(3)]
    pub rejected_at: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub rejection_reason: Option<String>,
    #[n(5)]
    pub comment: Option<String>,
    #[n(6)]
    pub signature: Option<String>,
}

impl ReviewStamps {
    fn clear_approval(&mut self) {
        self.approved_by = None;
        self.approved_at = None;
    }
    fn clear_rejection(&mut self) {
        self.rejected_by = None;
        self.rejected_at = None;
        self.rejection_reason = None;
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CoAuthor {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub is_corresponding: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    #[n(0)]
    pub file_id: String,
    #[n(1)]
    pub document_type: String,
    #[n(2)]
    pub original_name: String,
    #[n(3)]
    pub stored_path: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub number: String,
    #[n(2)]
    pub applicant_id: String,
    #[n(3)]
    pub year_id: String,
    #[n(4)]
    pub category_id: Option<String>,
    #[n(5)]
    pub subcategory_id: Option<String>,
    #[n(6)]
    pub budget_id: Option<String>,
    #[n(7)]
    pub status: Status,
    #[n(8)]
    pub detail: Detail,
    #[n(9)]
    pub head: ReviewStamps,
    #[n(10)]
    pub admin: ReviewStamps,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
    #[n(13)]
    pub submitted_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub closed_at: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub co_authors: Vec<CoAuthor>,
    #[n(17)]
    pub documents: Vec<DocumentRef>,
    #[n(18)]
    pub is_retired: bool,
    #[n(19)]
    pub retired_at: Option<TimeStamp<Utc>>,
}

/// Applicant input for a new draft.
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub number: Option<String>,
    pub year_id: String,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    pub budget_id: Option<String>,
    pub detail: Detail,
    pub co_authors: Vec<CoAuthor>,
    pub documents: Vec<DocumentRef>,
}

impl SubmissionDraft {
    pub fn new(year_id: impl Into<String>, detail: Detail) -> Self {
        Self {
            number: None,
            year_id: year_id.into(),
            category_id: None,
            subcategory_id: None,
            budget_id: None,
            detail,
            co_authors: vec![],
            documents: vec![],
        }
    }
    pub fn set_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }
    pub fn set_subcategory(mut self, subcategory_id: impl Into<String>) -> Self {
        self.subcategory_id = Some(subcategory_id.into());
        self
    }
    pub fn set_budget(mut self, budget_id: impl Into<String>) -> Self {
        self.budget_id = Some(budget_id.into());
        self
    }
    pub fn set_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
    pub fn add_co_author(mut self, co_author: CoAuthor) -> Self {
        self.co_authors.push(co_author);
        self
    }
    pub fn add_document(mut self, document: DocumentRef) -> Self {
        self.documents.push(document);
        self
    }
}

/// Amounts and references an administrator supplies when approving.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPayload {
    pub reward_amount: Option<Amount>,
    pub revision_fee_amount: Option<Amount>,
    pub publication_fee_amount: Option<Amount>,
    pub total_amount: Option<Amount>,
    // older clients send a single approved amount
    pub approved_amount: Option<Amount>,
    pub announce_reference: Option<String>,
    pub comment: Option<String>,
}

/// Replacement reward components for a publication reward detail.
#[derive(Debug, Clone, Default)]
pub struct RewardAmounts {
    pub reward_amount: Amount,
    pub revision_fee_amount: Amount,
    pub publication_fee_amount: Amount,
    pub total_amount: Option<Amount>,
}

/// Sum of the publication reward components.
fn reward_total(
    reward: Amount,
    revision_fee: Amount,
    publication_fee: Amount,
) -> Result<Amount, WorkflowError> {
    reward
        .checked_add(revision_fee)
        .and_then(|sum| sum.checked_add(publication_fee))
        .ok_or(WorkflowError::InvalidAmount)
}

impl Submission {
    pub fn from_draft(
        id: String,
        applicant_id: String,
        draft: SubmissionDraft,
        now: TimeStamp<Utc>,
    ) -> Self {
        let number = draft.number.unwrap_or_else(|| {
            let suffix = id.get(id.len().saturating_sub(6)..).unwrap_or(&id);
            format!(
                "{}-{}-{}",
                draft.detail.submission_type().number_prefix(),
                now.to_datetime_utc().format("%Y%m%d"),
                suffix.to_uppercase()
            )
        });

        Self {
            id,
            number,
            applicant_id,
            year_id: draft.year_id,
            category_id: draft.category_id,
            subcategory_id: draft.subcategory_id,
            budget_id: draft.budget_id,
            status: Status::Draft,
            detail: draft.detail,
            head: ReviewStamps::default(),
            admin: ReviewStamps::default(),
            created_at: now.clone(),
            updated_at: now,
            submitted_at: None,
            reviewed_at: None,
            closed_at: None,
            co_authors: draft.co_authors,
            documents: draft.documents,
            is_retired: false,
            retired_at: None,
        }
    }

    pub fn submission_type(&self) -> SubmissionType {
        self.detail.submission_type()
    }

    pub fn announce_reference(&self) -> Option<&str> {
        self.detail.announce_reference()
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub(crate) fn mark_submitted(&mut self, target: Status, now: TimeStamp<Utc>) {
        self.status = target;
        self.submitted_at = Some(now.clone());
        self.updated_at = now;
    }

    pub(crate) fn head_recommend(
        &mut self,
        head_id: &str,
        now: TimeStamp<Utc>,
        comment: Option<&str>,
        signature: Option<&str>,
    ) {
        self.status = Status::Pending;
        self.head.clear_rejection();
        self.admin.clear_rejection();
        self.head.approved_by = Some(head_id.to_string());
        self.head.approved_at = Some(now.clone());
        if let Some(comment) = non_blank(comment) {
            self.head.comment = Some(comment);
        }
        if let Some(signature) = non_blank(signature) {
            self.head.signature = Some(signature);
        }
        self.reviewed_at = Some(now.clone());
        self.updated_at = now;
    }

    pub(crate) fn head_reject(&mut self, head_id: &str, now: TimeStamp<Utc>, reason: &str) {
        self.status = Status::Rejected;
        self.head.clear_approval();
        self.head.rejected_by = Some(head_id.to_string());
        self.head.rejected_at = Some(now.clone());
        self.head.rejection_reason = Some(reason.to_string());
        self.reviewed_at = Some(now.clone());
        self.updated_at = now;
    }

    /// Sends the submission back to the applicant. Every decision from the
    /// current cycle is cleared and `submitted_at` is nulled so that the
    /// applicant has to submit again.
    pub(crate) fn request_revision(&mut self, by: Role, now: TimeStamp<Utc>, comment: &str) {
        self.status = Status::NeedsMoreInfo;
        self.head.clear_approval();
        self.head.clear_rejection();
        self.admin.clear_approval();
        self.admin.clear_rejection();
        match by {
            Role::DeptHead => self.head.comment = Some(comment.to_string()),
            _ => self.admin.comment = Some(comment.to_string()),
        }
        self.submitted_at = None;
        self.reviewed_at = Some(now.clone());
        self.updated_at = now;
    }

    /// Applies an administrator approval and returns the amount to consume
    /// from the linked budget.
    pub(crate) fn approve(
        &mut self,
        admin_id: &str,
        now: TimeStamp<Utc>,
        payload: &ApprovalPayload,
    ) -> Result<Amount, WorkflowError> {
        if let Detail::PublicationReward(d) = &self.detail {
            reward_total(
                payload.reward_amount.unwrap_or(d.reward_approve_amount),
                payload.revision_fee_amount.unwrap_or(d.revision_fee_approve_amount),
                payload.publication_fee_amount.unwrap_or(d.publication_fee_approve_amount),
            )?;
        }

        self.status = Status::Approved;
        self.admin.approved_by = Some(admin_id.to_string());
        self.admin.approved_at = Some(now.clone());
        if let Some(comment) = non_blank(payload.comment.as_deref()) {
            self.admin.comment = Some(comment);
        }
        self.reviewed_at = Some(now.clone());
        self.updated_at = now;

        let announce_reference = non_blank(payload.announce_reference.as_deref());
        match &mut self.detail {
            Detail::PublicationReward(d) => {
                if let Some(amount) = payload.reward_amount {
                    d.reward_approve_amount = amount;
                }
                if let Some(amount) = payload.revision_fee_amount {
                    d.revision_fee_approve_amount = amount;
                }
                if let Some(amount) = payload.publication_fee_amount {
                    d.publication_fee_approve_amount = amount;
                }
                let parts = reward_total(
                    d.reward_approve_amount,
                    d.revision_fee_approve_amount,
                    d.publication_fee_approve_amount,
                )?;
                d.total_approve_amount = payload
                    .total_amount
                    .or(payload.approved_amount)
                    .unwrap_or(parts);
                d.announce_reference = announce_reference;
                Ok(0)
            }
            Detail::FundApplication(d) => {
                d.approved_amount = payload
                    .total_amount
                    .or(payload.approved_amount)
                    .unwrap_or(0);
                d.announce_reference = announce_reference;
                Ok(d.approved_amount)
            }
        }
    }

    pub(crate) fn admin_reject(
        &mut self,
        admin_id: &str,
        now: TimeStamp<Utc>,
        reason: &str,
        comment: Option<&str>,
    ) {
        self.status = Status::Rejected;
        self.admin.rejected_by = Some(admin_id.to_string());
        self.admin.rejected_at = Some(now.clone());
        self.admin.rejection_reason = Some(reason.to_string());
        if let Some(comment) = non_blank(comment) {
            self.admin.comment = Some(comment);
        }
        self.reviewed_at = Some(now.clone());
        self.updated_at = now;
    }

    pub(crate) fn close(&mut self, now: TimeStamp<Utc>) {
        self.status = Status::AdminClosed;
        self.closed_at = Some(now.clone());
        if let Detail::FundApplication(d) = &mut self.detail {
            d.closed_at = Some(now.clone());
        }
        self.updated_at = now;
    }

    pub(crate) fn reopen(&mut self, now: TimeStamp<Utc>) {
        self.status = Status::Approved;
        self.closed_at = None;
        if let Detail::FundApplication(d) = &mut self.detail {
            d.closed_at = None;
        }
        self.updated_at = now;
    }

    pub(crate) fn update_reward_amounts(
        &mut self,
        amounts: &RewardAmounts,
        now: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        let Detail::PublicationReward(d) = &mut self.detail else {
            return Err(WorkflowError::WrongSubmissionType {
                expected: SubmissionType::PublicationReward.as_str(),
            });
        };
        let parts = reward_total(
            amounts.reward_amount,
            amounts.revision_fee_amount,
            amounts.publication_fee_amount,
        )?;
        d.reward_approve_amount = amounts.reward_amount;
        d.revision_fee_approve_amount = amounts.revision_fee_amount;
        d.publication_fee_approve_amount = amounts.publication_fee_amount;
        d.total_approve_amount = amounts.total_amount.unwrap_or(parts);
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn retire(&mut self, now: TimeStamp<Utc>) {
        self.is_retired = true;
        self.retired_at = Some(now.clone());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reward_submission() -> Submission {
        let detail = Detail::PublicationReward(PublicationRewardDetail {
            paper_title: "Sparse attention".into(),
            journal_name: "J. Things".into(),
            ..Default::default()
        });
        Submission::from_draft(
            "sub_test".into(),
            "user_a".into(),
            SubmissionDraft::new("year_1", detail),
            TimeStamp::new(),
        )
    }

    #[test]
    fn reward_total_defaults_to_sum_of_parts() {
        let mut submission = reward_submission();
        let payload = ApprovalPayload {
            reward_amount: Some(5_000),
            revision_fee_amount: Some(1_200),
            publication_fee_amount: Some(800),
            ..Default::default()
        };
        assert_eq!(submission.approve("admin", TimeStamp::new(), &payload), Ok(0));

        assert_eq!(submission.detail.approved_amount(), 7_000);
        assert_eq!(submission.status, Status::Approved);
    }

    #[test]
    fn explicit_reward_total_wins() {
        let mut submission = reward_submission();
        let payload = ApprovalPayload {
            reward_amount: Some(5_000),
            total_amount: Some(4_000),
            announce_reference: Some("  ANN-7 ".into()),
            ..Default::default()
        };
        submission.approve("admin", TimeStamp::new(), &payload).unwrap();

        assert_eq!(submission.detail.approved_amount(), 4_000);
        assert_eq!(submission.announce_reference(), Some("ANN-7"));
    }

    #[test]
    fn reward_parts_that_overflow_are_refused() {
        let mut submission = reward_submission();
        let before = submission.clone();
        let payload = ApprovalPayload {
            reward_amount: Some(u64::MAX),
            revision_fee_amount: Some(1),
            ..Default::default()
        };

        assert_eq!(
            submission.approve("admin", TimeStamp::new(), &payload),
            Err(WorkflowError::InvalidAmount)
        );
        assert_eq!(submission, before);

        let amounts = RewardAmounts {
            reward_amount: u64::MAX,
            publication_fee_amount: 1,
            ..Default::default()
        };
        assert_eq!(
            submission.update_reward_amounts(&amounts, TimeStamp::new()),
            Err(WorkflowError::InvalidAmount)
        );
        assert_eq!(submission, before);
    }

    #[test]
    fn generated_number_uses_type_prefix() {
        let submission = reward_submission();
        assert!(submission.number.starts_with("PR-"));
    }

    #[test]
    fn reward_amounts_refuse_fund_applications() {
        let mut submission = Submission::from_draft(
            "sub_fa".into(),
            "user_a".into(),
            SubmissionDraft::new(
                "year_1",
                Detail::FundApplication(FundApplicationDetail::default()),
            ),
            TimeStamp::new(),
        );
        let err = submission.update_reward_amounts(&RewardAmounts::default(), TimeStamp::new());
        assert!(matches!(err, Err(WorkflowError::WrongSubmissionType { .. })));
    }
}
