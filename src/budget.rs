//! Fiscal years, fund categories and subcategory budget records
//!
//! A `SubcategoryBudget` either caps a single grant (`Rule` scope) or pools a
//! yearly total with an optional grant count (`Overall` scope). The fields a
//! scope does not use are forced to `None` whenever a record is created,
//! patched or copied, so a rule budget never carries a yearly cap and an
//! overall budget never carries a per-grant cap.
use chrono::Utc;

use crate::error::WorkflowError;
use crate::types::{Amount, TimeStamp};
use crate::utils::non_blank;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    #[n(0)]
    Rule,
    #[n(1)]
    Overall,
}

impl RecordScope {
    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value.trim().to_lowercase().as_str() {
            "" | "rule" => Ok(RecordScope::Rule),
            "overall" => Ok(RecordScope::Overall),
            _ => Err(WorkflowError::InvalidBudget(
                "record_scope must be either 'rule' or 'overall'",
            )),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveStatus {
    #[n(0)]
    #[default]
    Active,
    #[n(1)]
    Disabled,
}

impl ActiveStatus {
    pub fn toggled(self) -> Self {
        match self {
            ActiveStatus::Active => ActiveStatus::Disabled,
            ActiveStatus::Disabled => ActiveStatus::Active,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Year {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub budget: Amount,
    #[n(3)]
    pub status: ActiveStatus,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Category {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub year_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub status: ActiveStatus,
    // explicit marker for the research fund; name matching is the fallback
    #[n(4)]
    pub is_research_fund: bool,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Subcategory {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub category_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub fund_condition: Option<String>,
    #[n(4)]
    pub target_roles: Vec<String>,
    #[n(5)]
    pub status: ActiveStatus,
    // live (non-retired) submissions referencing this subcategory
    #[n(6)]
    pub linked_submissions: u32,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SubcategoryBudget {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub subcategory_id: String,
    #[n(2)]
    pub scope: RecordScope,
    #[n(3)]
    pub allocated_amount: Amount,
    #[n(4)]
    pub used_amount: Amount,
    #[n(5)]
    pub remaining_budget: Amount,
    #[n(6)]
    pub max_amount_per_year: Option<Amount>,
    #[n(7)]
    pub max_grants: Option<u32>,
    #[n(8)]
    pub remaining_grant: Option<u32>,
    #[n(9)]
    pub max_amount_per_grant: Option<Amount>,
    #[n(10)]
    pub granted_count: u32,
    #[n(11)]
    pub level: Option<String>,
    #[n(12)]
    pub status: ActiveStatus,
    #[n(13)]
    pub fund_description: Option<String>,
    #[n(14)]
    pub comment: Option<String>,
    #[n(15)]
    pub linked_submissions: u32,
    #[n(16)]
    pub is_retired: bool,
    #[n(17)]
    pub created_at: TimeStamp<Utc>,
    #[n(18)]
    pub updated_at: TimeStamp<Utc>,
}

/// Administrator input for a new budget record.
#[derive(Debug, Clone)]
pub struct BudgetDraft {
    pub subcategory_id: String,
    pub scope: RecordScope,
    pub allocated_amount: Amount,
    pub max_amount_per_year: Option<Amount>,
    pub max_grants: Option<u32>,
    pub max_amount_per_grant: Option<Amount>,
    pub level: Option<String>,
    pub fund_description: Option<String>,
    pub comment: Option<String>,
}

impl BudgetDraft {
    pub fn rule(subcategory_id: impl Into<String>, allocated: Amount, per_grant: Amount) -> Self {
        Self {
            subcategory_id: subcategory_id.into(),
            scope: RecordScope::Rule,
            allocated_amount: allocated,
            max_amount_per_year: None,
            max_grants: None,
            max_amount_per_grant: Some(per_grant),
            level: None,
            fund_description: None,
            comment: None,
        }
    }

    pub fn overall(subcategory_id: impl Into<String>, allocated: Amount) -> Self {
        Self {
            subcategory_id: subcategory_id.into(),
            scope: RecordScope::Overall,
            allocated_amount: allocated,
            max_amount_per_year: None,
            max_grants: None,
            max_amount_per_grant: None,
            level: None,
            fund_description: None,
            comment: None,
        }
    }

    pub fn set_yearly_cap(mut self, cap: Amount) -> Self {
        self.max_amount_per_year = Some(cap);
        self
    }
    pub fn set_max_grants(mut self, grants: u32) -> Self {
        self.max_grants = Some(grants);
        self
    }
    pub fn set_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn into_budget(
        self,
        id: String,
        now: TimeStamp<Utc>,
    ) -> Result<SubcategoryBudget, WorkflowError> {
        let mut budget = SubcategoryBudget {
            id,
            subcategory_id: self.subcategory_id,
            scope: self.scope,
            allocated_amount: self.allocated_amount,
            used_amount: 0,
            remaining_budget: self.allocated_amount,
            max_amount_per_year: self.max_amount_per_year.filter(|cap| *cap > 0),
            max_grants: self.max_grants.filter(|grants| *grants > 0),
            remaining_grant: None,
            max_amount_per_grant: self.max_amount_per_grant,
            granted_count: 0,
            level: non_blank(self.level.as_deref()),
            status: ActiveStatus::Active,
            fund_description: non_blank(self.fund_description.as_deref()),
            comment: non_blank(self.comment.as_deref()),
            linked_submissions: 0,
            is_retired: false,
            created_at: now.clone(),
            updated_at: now,
        };
        budget.normalise_scope()?;
        budget.remaining_grant = budget.max_grants;
        Ok(budget)
    }
}

/// Typed partial update for a budget record. Outer `None` leaves a field
/// untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct BudgetPatch {
    pub allocated_amount: Option<Amount>,
    pub scope: Option<RecordScope>,
    pub max_amount_per_year: Option<Option<Amount>>,
    pub max_grants: Option<Option<u32>>,
    pub max_amount_per_grant: Option<Option<Amount>>,
    pub level: Option<String>,
    pub status: Option<ActiveStatus>,
    pub fund_description: Option<String>,
    pub comment: Option<String>,
}

impl BudgetPatch {
    pub fn is_empty(&self) -> bool {
        self.allocated_amount.is_none()
            && self.scope.is_none()
            && self.max_amount_per_year.is_none()
            && self.max_grants.is_none()
            && self.max_amount_per_grant.is_none()
            && self.level.is_none()
            && self.status.is_none()
            && self.fund_description.is_none()
            && self.comment.is_none()
    }
}

impl SubcategoryBudget {
    /// Nulls the fields the current scope does not carry and checks the
    /// scope's mandatory fields.
    fn normalise_scope(&mut self) -> Result<(), WorkflowError> {
        match self.scope {
            RecordScope::Rule => {
                if !self.max_amount_per_grant.is_some_and(|cap| cap > 0) {
                    return Err(WorkflowError::InvalidBudget(
                        "max_amount_per_grant must be provided for rule scope",
                    ));
                }
                self.max_amount_per_year = None;
                self.max_grants = None;
                self.remaining_grant = None;
            }
            RecordScope::Overall => {
                self.max_amount_per_grant = None;
                self.level = None;
            }
        }
        Ok(())
    }

    pub fn apply_patch(
        &mut self,
        patch: &BudgetPatch,
        now: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        if patch.is_empty() {
            return Err(WorkflowError::InvalidBudget("no fields to update"));
        }
        if let Some(allocated) = patch.allocated_amount {
            if allocated < self.used_amount {
                return Err(WorkflowError::InvalidBudget(
                    "allocated_amount cannot be lower than used_amount",
                ));
            }
            self.allocated_amount = allocated;
            self.remaining_budget = allocated - self.used_amount;
        }
        if let Some(scope) = patch.scope {
            self.scope = scope;
        }
        if let Some(cap) = patch.max_amount_per_year {
            self.max_amount_per_year = cap.filter(|c| *c > 0);
        }
        if let Some(cap) = patch.max_amount_per_grant {
            self.max_amount_per_grant = cap;
        }
        if let Some(grants) = patch.max_grants {
            let grants = grants.filter(|g| *g > 0);
            if let Some(g) = grants
                && g < self.granted_count
            {
                return Err(WorkflowError::InvalidBudget(
                    "max_grants cannot be lower than grants already awarded",
                ));
            }
            self.max_grants = grants;
            self.remaining_grant = grants.map(|g| g - self.granted_count);
        }
        if let Some(level) = &patch.level {
            self.level = non_blank(Some(level.as_str()));
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(description) = &patch.fund_description {
            self.fund_description = non_blank(Some(description.as_str()));
        }
        if let Some(comment) = &patch.comment {
            self.comment = non_blank(Some(comment.as_str()));
        }
        self.normalise_scope()?;
        self.updated_at = now;
        Ok(())
    }

    /// Checks the caps for one grant of `amount` without mutating.
    pub fn check_consumption(&self, amount: Amount) -> Result<(), WorkflowError> {
        if self.status == ActiveStatus::Disabled {
            return Err(WorkflowError::BudgetDisabled);
        }
        if let (RecordScope::Rule, Some(cap)) = (self.scope, self.max_amount_per_grant)
            && amount > cap
        {
            return Err(WorkflowError::GrantCapExceeded {
                cap,
                requested: amount,
            });
        }
        if amount > self.remaining_budget {
            return Err(WorkflowError::BudgetExhausted {
                remaining: self.remaining_budget,
                requested: amount,
            });
        }
        if let Some(cap) = self.max_amount_per_year
            && self.used_amount + amount > cap
        {
            return Err(WorkflowError::YearlyCapExceeded { cap });
        }
        if self.remaining_grant == Some(0) {
            return Err(WorkflowError::GrantsExhausted);
        }
        Ok(())
    }

    /// Records one approved grant of `amount` against this budget.
    pub fn consume(&mut self, amount: Amount, now: TimeStamp<Utc>) -> Result<(), WorkflowError> {
        self.check_consumption(amount)?;
        self.used_amount += amount;
        self.remaining_budget = self.allocated_amount - self.used_amount;
        self.granted_count += 1;
        if let Some(remaining) = self.remaining_grant.as_mut() {
            *remaining -= 1;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<(), WorkflowError> {
        if self.used_amount > 0 {
            return Err(WorkflowError::BudgetInUse(self.used_amount));
        }
        if self.linked_submissions > 0 {
            return Err(WorkflowError::BudgetReferenced(self.linked_submissions));
        }
        Ok(())
    }

    /// Fresh copy for another fiscal year: nothing used, balances recomputed
    /// from the copied caps.
    pub fn copy_for_year(&self, id: String, subcategory_id: String, now: TimeStamp<Utc>) -> Self {
        let overall = self.scope == RecordScope::Overall;
        let max_grants = self.max_grants.filter(|g| overall && *g > 0);
        Self {
            id,
            subcategory_id,
            scope: self.scope,
            allocated_amount: self.allocated_amount,
            used_amount: 0,
            remaining_budget: self.allocated_amount,
            max_amount_per_year: self.max_amount_per_year.filter(|c| overall && *c > 0),
            max_grants,
            remaining_grant: max_grants,
            max_amount_per_grant: self.max_amount_per_grant.filter(|c| !overall && *c > 0),
            granted_count: 0,
            level: if overall { None } else { self.level.clone() },
            status: self.status,
            fund_description: self.fund_description.clone(),
            comment: self.comment.clone(),
            linked_submissions: 0,
            is_retired: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
