//! Property-based tests for budget arithmetic, the payment cap and the
//! transition table
//!
//! The strategies generate arbitrary allocation/consumption sequences and
//! payment streams; the properties are the invariants that must hold after
//! every accepted or refused step.

use fund_ledger::budget::{BudgetDraft, BudgetPatch, RecordScope, SubcategoryBudget};
use fund_ledger::ledger::{EventBody, LedgerTotals, validate_payment};
use fund_ledger::status::{ALL_STATUSES, allowed_sources, ensure_transition};
use fund_ledger::submission::{Detail, FundApplicationDetail, Submission, SubmissionDraft};
use fund_ledger::types::TimeStamp;
use fund_ledger::{Action, Role, Status};
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

fn role_strategy() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Applicant), Just(Role::DeptHead), Just(Role::Admin)]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Submit),
        Just(Action::Recommend),
        Just(Action::Approve),
        Just(Action::Reject),
        Just(Action::RequestRevision),
        Just(Action::Close),
        Just(Action::Reopen),
        Just(Action::Retire),
    ]
}

fn status_strategy() -> impl Strategy<Value = Status> {
    (0usize..ALL_STATUSES.len()).prop_map(|i| ALL_STATUSES[i])
}

/// Rule or overall budget with random caps
fn budget_strategy() -> impl Strategy<Value = SubcategoryBudget> {
    (
        any::<bool>(),
        1_000u64..1_000_000,
        1u64..100_000,
        prop::option::of(1u64..1_000_000),
        prop::option::of(1u32..20),
    )
        .prop_map(|(rule, allocated, per_grant, yearly, grants)| {
            let mut draft = if rule {
                BudgetDraft::rule("subcat_p", allocated, per_grant)
            } else {
                BudgetDraft::overall("subcat_p", allocated)
            };
            draft.max_amount_per_year = yearly;
            draft.max_grants = grants;
            draft
                .into_budget("budget_p".into(), TimeStamp::new())
                .expect("strategy only builds valid drafts")
        })
}

fn approved_submission(amount: u64) -> Submission {
    let detail = Detail::FundApplication(FundApplicationDetail {
        approved_amount: amount,
        ..Default::default()
    });
    let mut submission = Submission::from_draft(
        "sub_p".into(),
        "user_p".into(),
        SubmissionDraft::new("year_p", detail),
        TimeStamp::new(),
    );
    submission.status = Status::Approved;
    submission
}

proptest! {
    /// remaining == allocated - used after every consumption attempt, whether
    /// it was accepted or refused
    #[test]
    fn remaining_tracks_allocation(
        mut budget in budget_strategy(),
        amounts in prop::collection::vec(1u64..200_000, 0..30),
    ) {
        for amount in amounts {
            let before = budget.clone();
            if budget.consume(amount, TimeStamp::new()).is_err() {
                prop_assert_eq!(&budget, &before);
            }
            prop_assert_eq!(budget.remaining_budget, budget.allocated_amount - budget.used_amount);
            prop_assert!(budget.used_amount <= budget.allocated_amount);
            if let Some(cap) = budget.max_amount_per_year {
                prop_assert!(budget.used_amount <= cap);
            }
        }
    }

    /// Scope normalisation holds for created and patched budgets alike
    #[test]
    fn scopes_never_carry_foreign_caps(
        mut budget in budget_strategy(),
        to_overall in any::<bool>(),
        yearly in prop::option::of(1u64..1_000_000),
        per_grant in 1u64..100_000,
        allocated in prop::option::of(0u64..2_000_000),
    ) {
        let patch = BudgetPatch {
            allocated_amount: allocated,
            scope: Some(if to_overall { RecordScope::Overall } else { RecordScope::Rule }),
            max_amount_per_year: Some(yearly),
            max_amount_per_grant: Some(Some(per_grant)),
            ..Default::default()
        };
        let _ = budget.apply_patch(&patch, TimeStamp::new());

        match budget.scope {
            RecordScope::Rule => {
                prop_assert_eq!(budget.max_amount_per_year, None);
                prop_assert_eq!(budget.max_grants, None);
                prop_assert!(budget.max_amount_per_grant.is_some_and(|c| c > 0));
            }
            RecordScope::Overall => prop_assert_eq!(budget.max_amount_per_grant, None),
        }
        prop_assert_eq!(budget.remaining_budget, budget.allocated_amount - budget.used_amount);
    }

    /// Accepted payments never add up to more than the approved amount
    #[test]
    fn payments_never_exceed_approved(
        approved in 0u64..100_000,
        amounts in prop::collection::vec(0u64..40_000, 0..25),
    ) {
        let submission = approved_submission(approved);
        let mut totals = LedgerTotals::default();
        for amount in amounts {
            if let Ok(amount) = validate_payment(&submission, &totals, Some(amount), 1) {
                let pushed = totals.push(&EventBody::Payment { amount });
                prop_assert!(pushed.is_ok());
            }
            prop_assert!(totals.paid <= approved);
        }
    }

    /// Amounts close to the integer limit are refused instead of wrapping
    /// the paid total
    #[test]
    fn huge_payments_never_wrap(
        approved in 1u64..100_000,
        paid_share in 0u64..100,
        slack in 0u64..1_000_000,
    ) {
        let submission = approved_submission(approved);
        let paid = approved * paid_share / 100;
        let totals = LedgerTotals { paid, events: 1 };
        let amount = u64::MAX - slack;

        prop_assert!(validate_payment(&submission, &totals, Some(amount), 1).is_err());
        let mut pushed = totals;
        if pushed.push(&EventBody::Payment { amount }).is_ok() {
            prop_assert_eq!(pushed.paid, paid + amount);
        } else {
            prop_assert_eq!(pushed, totals);
        }
    }

    /// A transition is legal exactly when the current status is one of the
    /// documented sources for the role and action
    #[test]
    fn transition_legal_iff_source_listed(
        role in role_strategy(),
        action in action_strategy(),
        from in status_strategy(),
    ) {
        let listed = allowed_sources(role, action).contains(&from);
        prop_assert_eq!(ensure_transition(role, action, from).is_ok(), listed);
    }
}

#[test]
fn admin_sources_match_review_states() {
    let sources = allowed_sources(Role::Admin, Action::Approve);
    for status in [
        Status::Pending,
        Status::Draft,
        Status::DeptHeadPending,
        Status::DeptHeadRecommended,
    ] {
        assert!(sources.contains(&status));
    }
    assert!(!sources.contains(&Status::Approved));
    assert!(!sources.contains(&Status::DeptHeadNotRecommended));
}
