//! Research-fund payment ledger: event records, running totals and the
//! rules deciding whether an event may be appended
use std::collections::HashSet;

use chrono::Utc;

use crate::budget::{Category, Subcategory};
use crate::error::WorkflowError;
use crate::status::Status;
use crate::submission::{Detail, Submission};
use crate::types::{Amount, TimeStamp};
use crate::utils::collapse_name;

pub const CLOSE_COMMENT: &str = "Submission closed by admin";
pub const REOPEN_COMMENT: &str = "Submission reopened by admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Note,
    Payment,
    Closure,
}

impl EventKind {
    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value.trim().to_lowercase().as_str() {
            "note" => Ok(EventKind::Note),
            "payment" => Ok(EventKind::Payment),
            "closure" => Ok(EventKind::Closure),
            other => Err(WorkflowError::UnsupportedEventType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Note => "note",
            EventKind::Payment => "payment",
            EventKind::Closure => "closure",
        }
    }

    /// Kind of an event created directly by an administrator. Without an
    /// explicit kind a supplied amount means a payment. Closure events are
    /// only written by the closure toggle.
    pub fn resolve(kind: Option<EventKind>, amount: Option<Amount>) -> Result<Self, WorkflowError> {
        match kind {
            Some(EventKind::Closure) => Err(WorkflowError::UnsupportedEventType(
                EventKind::Closure.as_str().to_string(),
            )),
            Some(kind) => Ok(kind),
            None if amount.is_some() => Ok(EventKind::Payment),
            None => Ok(EventKind::Note),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    #[n(0)]
    Note,
    #[n(1)]
    Payment {
        #[n(0)]
        amount: Amount,
    },
    #[n(2)]
    Closure {
        #[n(0)]
        status_after: Status,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Note => EventKind::Note,
            EventBody::Payment { .. } => EventKind::Payment,
            EventBody::Closure { .. } => EventKind::Closure,
        }
    }

    pub fn amount(&self) -> Option<Amount> {
        match self {
            EventBody::Payment { amount } => Some(*amount),
            _ => None,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    #[n(0)]
    pub file_id: String,
    #[n(1)]
    pub original_name: String,
    #[n(2)]
    pub stored_path: String,
    #[n(3)]
    pub size: u64,
    #[n(4)]
    pub mime_type: Option<String>,
    #[n(5)]
    pub sha256: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ResearchFundEvent {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub submission_id: String,
    #[n(2)]
    pub body: EventBody,
    #[n(3)]
    pub comment: Option<String>,
    #[n(4)]
    pub attachments: Vec<Attachment>,
    #[n(5)]
    pub created_by: String,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

/// Running aggregates per submission, kept next to the event rows so the
/// payment cap can be checked inside a transaction.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    #[n(0)]
    pub paid: Amount,
    #[n(1)]
    pub events: u32,
}

impl LedgerTotals {
    pub fn push(&mut self, body: &EventBody) -> Result<(), WorkflowError> {
        if let Some(amount) = body.amount() {
            self.paid = self
                .paid
                .checked_add(amount)
                .ok_or(WorkflowError::InvalidAmount)?;
        }
        self.events = self.events.saturating_add(1);
        Ok(())
    }
}

/// Checks a payment of `amount` with `attachments` files against the
/// submission's state and what has already been paid.
pub fn validate_payment(
    submission: &Submission,
    totals: &LedgerTotals,
    amount: Option<Amount>,
    attachments: usize,
) -> Result<Amount, WorkflowError> {
    let amount = amount
        .filter(|a| *a > 0)
        .ok_or(WorkflowError::InvalidAmount)?;
    if attachments == 0 {
        return Err(WorkflowError::AttachmentRequired);
    }
    let Detail::FundApplication(detail) = &submission.detail else {
        return Err(WorkflowError::MissingFundDetail);
    };
    match submission.status {
        Status::Approved => {}
        Status::AdminClosed => return Err(WorkflowError::SubmissionClosed),
        other => return Err(WorkflowError::NotApproved(other)),
    }
    let within_cap = totals
        .paid
        .checked_add(amount)
        .is_some_and(|total| total <= detail.approved_amount);
    if !within_cap {
        return Err(WorkflowError::PaymentCapExceeded {
            approved: detail.approved_amount,
            paid: totals.paid,
            requested: amount,
        });
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSummary {
    pub total_events: u32,
    pub total_paid: Amount,
    pub approved_amount: Amount,
    pub remaining: Amount,
    pub is_closed: bool,
    pub closed_at: Option<TimeStamp<Utc>>,
    pub detail_closed_at: Option<TimeStamp<Utc>>,
}

impl PaymentSummary {
    pub fn new(submission: &Submission, totals: &LedgerTotals) -> Self {
        let detail = submission.detail.fund_application();
        let approved_amount = detail.map(|d| d.approved_amount).unwrap_or(0);
        Self {
            total_events: totals.events,
            total_paid: totals.paid,
            approved_amount,
            remaining: approved_amount.saturating_sub(totals.paid),
            is_closed: submission.is_closed(),
            closed_at: submission.closed_at.clone(),
            detail_closed_at: detail.and_then(|d| d.closed_at.clone()),
        }
    }
}

/// What was inspected when deciding research-fund membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionMeta {
    pub keyword: String,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    pub candidates: Vec<String>,
    pub flagged: bool,
    pub configured_id: bool,
    pub matched_candidate: Option<String>,
}

impl DetectionMeta {
    pub fn is_research_fund(&self) -> bool {
        self.flagged || self.configured_id || self.matched_candidate.is_some()
    }
}

/// Decides whether a submission belongs to the research fund. The explicit
/// category flag and the configured category ids are authoritative; the
/// keyword match on display names covers legacy categories carrying neither.
#[derive(Debug, Clone)]
pub struct ResearchFundMatcher {
    category_ids: HashSet<String>,
    keyword: String,
}

impl ResearchFundMatcher {
    pub fn new(category_ids: impl IntoIterator<Item = String>, keyword: &str) -> Self {
        Self {
            category_ids: category_ids.into_iter().collect(),
            keyword: keyword.trim().to_string(),
        }
    }

    pub fn detect(&self, category: Option<&Category>, subcategory: Option<&Subcategory>) -> DetectionMeta {
        let candidates: Vec<String> = [
            category.map(|c| c.name.as_str()),
            subcategory.map(|s| s.name.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

        let needle = collapse_name(&self.keyword);
        let matched_candidate = if needle.is_empty() {
            None
        } else {
            candidates
                .iter()
                .find(|candidate| collapse_name(candidate).contains(&needle))
                .cloned()
        };

        DetectionMeta {
            keyword: self.keyword.clone(),
            category_id: category.map(|c| c.id.clone()),
            subcategory_id: subcategory.map(|s| s.id.clone()),
            candidates,
            flagged: category.is_some_and(|c| c.is_research_fund),
            configured_id: category.is_some_and(|c| self.category_ids.contains(&c.id)),
            matched_candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ActiveStatus;
    use crate::submission::{FundApplicationDetail, SubmissionDraft};

    fn approved(amount: Amount) -> Submission {
        let detail = Detail::FundApplication(FundApplicationDetail {
            approved_amount: amount,
            ..Default::default()
        });
        let mut submission = Submission::from_draft(
            "sub_x".into(),
            "user_a".into(),
            SubmissionDraft::new("year_1", detail),
            TimeStamp::new(),
        );
        submission.status = Status::Approved;
        submission
    }

    fn category(name: &str, flagged: bool) -> Category {
        Category {
            id: "cat_1".into(),
            year_id: "year_1".into(),
            name: name.into(),
            status: ActiveStatus::Active,
            is_research_fund: flagged,
            created_at: TimeStamp::new(),
        }
    }

    #[test]
    fn amount_implies_payment() {
        assert_eq!(EventKind::resolve(None, Some(10)), Ok(EventKind::Payment));
        assert_eq!(EventKind::resolve(None, None), Ok(EventKind::Note));
        assert!(EventKind::resolve(Some(EventKind::Closure), None).is_err());
        assert!(EventKind::parse("refund").is_err());
    }

    #[test]
    fn payment_checks_run_in_order() {
        let submission = approved(1_000);
        let totals = LedgerTotals::default();
        assert_eq!(
            validate_payment(&submission, &totals, Some(0), 1),
            Err(WorkflowError::InvalidAmount)
        );
        assert_eq!(
            validate_payment(&submission, &totals, Some(10), 0),
            Err(WorkflowError::AttachmentRequired)
        );
        assert_eq!(validate_payment(&submission, &totals, Some(1_000), 1), Ok(1_000));
    }

    #[test]
    fn payment_cap_is_inclusive() {
        let submission = approved(1_000);
        let totals = LedgerTotals { paid: 600, events: 1 };
        assert!(validate_payment(&submission, &totals, Some(400), 1).is_ok());
        assert!(matches!(
            validate_payment(&submission, &totals, Some(401), 1),
            Err(WorkflowError::PaymentCapExceeded { .. })
        ));
    }

    #[test]
    fn oversized_payment_is_refused() {
        let submission = approved(10_000);
        let totals = LedgerTotals { paid: 4_000, events: 1 };
        assert_eq!(
            validate_payment(&submission, &totals, Some(u64::MAX), 1),
            Err(WorkflowError::PaymentCapExceeded {
                approved: 10_000,
                paid: 4_000,
                requested: u64::MAX,
            })
        );
    }

    #[test]
    fn totals_refuse_to_wrap() {
        let mut totals = LedgerTotals { paid: 4_000, events: 1 };
        assert_eq!(
            totals.push(&EventBody::Payment { amount: u64::MAX }),
            Err(WorkflowError::InvalidAmount)
        );
        assert_eq!(totals, LedgerTotals { paid: 4_000, events: 1 });

        totals.push(&EventBody::Note).unwrap();
        assert_eq!(totals, LedgerTotals { paid: 4_000, events: 2 });
    }

    #[test]
    fn closed_submission_refuses_payment() {
        let mut submission = approved(1_000);
        submission.status = Status::AdminClosed;
        assert_eq!(
            validate_payment(&submission, &LedgerTotals::default(), Some(1), 1),
            Err(WorkflowError::SubmissionClosed)
        );
    }

    #[test]
    fn keyword_match_ignores_spacing() {
        let matcher = ResearchFundMatcher::new(vec![], "ทุนส่งเสริมการวิจัย");
        let meta = matcher.detect(Some(&category("ทุน ส่งเสริม การวิจัย 2567", false)), None);
        assert!(meta.is_research_fund());
        assert_eq!(meta.matched_candidate.as_deref(), Some("ทุน ส่งเสริม การวิจัย 2567"));

        let meta = matcher.detect(Some(&category("ทุนอื่น", false)), None);
        assert!(!meta.is_research_fund());
    }

    #[test]
    fn explicit_flag_and_configured_id_win() {
        let matcher = ResearchFundMatcher::new(vec!["cat_1".to_string()], "unrelated");
        assert!(matcher.detect(Some(&category("Travel", false)), None).is_research_fund());

        let matcher = ResearchFundMatcher::new(vec![], "unrelated");
        assert!(matcher.detect(Some(&category("Travel", true)), None).is_research_fund());
        assert!(!matcher.detect(None, None).is_research_fund());
    }

    #[test]
    fn summary_reports_remaining() {
        let submission = approved(10_000);
        let summary = PaymentSummary::new(&submission, &LedgerTotals { paid: 9_000, events: 3 });
        assert_eq!(summary.remaining, 1_000);
        assert!(!summary.is_closed);
    }
}
