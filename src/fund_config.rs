//! Fiscal-year, category and budget administration on [`FundService`]
use chrono::Utc;
use sled::Transactional;

use crate::audit::{AuditAction, AuditEntry, EntityKind};
use crate::budget::{
    ActiveStatus, BudgetDraft, BudgetPatch, Category, Subcategory, SubcategoryBudget, Year,
};
use crate::error::{Result, WorkflowError};
use crate::service::{FundService, require_role};
use crate::status::{Action, Actor, Role};
use crate::store::{TxResult, fail, tx_get, tx_put, tx_require};
use crate::types::{Amount, TimeStamp};
use crate::utils::{
    BUDGET_HRP, CATEGORY_HRP, SUBCATEGORY_HRP, YEAR_HRP, new_uuid_to_bech32, non_blank,
};

/// Input for a new subcategory.
#[derive(Debug, Clone, Default)]
pub struct SubcategoryDraft {
    pub category_id: String,
    pub name: String,
    pub fund_condition: Option<String>,
    pub target_roles: Vec<String>,
}

fn manage(actor: &Actor) -> Result<(), WorkflowError> {
    require_role(actor, &[Role::Admin], Action::ManageBudgets)
}

fn audit_entry(
    actor: &Actor,
    action: AuditAction,
    entity: EntityKind,
    id: &str,
    now: &TimeStamp<Utc>,
    description: String,
) -> Result<AuditEntry> {
    Ok(AuditEntry::new(&actor.user_id, action, entity, id, now.clone())?.describe(description))
}

impl FundService {
    pub fn create_year(&self, actor: &Actor, label: &str, budget: Amount) -> Result<Year> {
        manage(actor)?;
        let label = non_blank(Some(label)).ok_or(WorkflowError::InvalidBudget("year label is required"))?;

        let now = TimeStamp::new();
        let year = Year {
            id: new_uuid_to_bech32(YEAR_HRP)?,
            label: label.clone(),
            budget,
            status: ActiveStatus::Active,
            created_at: now.clone(),
        };
        let entry = audit_entry(
            actor,
            AuditAction::Create,
            EntityKind::Year,
            &year.id,
            &now,
            format!("Created year {label}"),
        )?;

        let store = &self.store;
        (&store.years, &store.year_labels, &store.audit).transaction(
            |(years, labels, audit)| -> TxResult<()> {
                if labels.get(label.as_bytes())?.is_some() {
                    return fail(WorkflowError::YearExists(label.clone()));
                }
                labels.insert(label.as_bytes(), year.id.as_bytes())?;
                tx_put(years, &year.id, &year)?;
                entry.record(audit)?;
                Ok(())
            },
        )?;

        entry.trace();
        Ok(year)
    }

    pub fn get_year(&self, id: &str) -> Result<Year> {
        match self.store.get::<Year>(&self.store.years, id)? {
            Some(year) => Ok(year),
            None => Err(WorkflowError::YearNotFound(id.to_string()).into()),
        }
    }

    pub fn year_by_label(&self, label: &str) -> Result<Option<Year>> {
        match self.store.year_labels.get(label.trim().as_bytes())? {
            Some(id) => self.store.get(&self.store.years, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn create_category(
        &self,
        actor: &Actor,
        year_id: &str,
        name: &str,
        is_research_fund: bool,
    ) -> Result<Category> {
        manage(actor)?;
        let name = non_blank(Some(name)).ok_or(WorkflowError::InvalidBudget("category name is required"))?;

        let now = TimeStamp::new();
        let category = Category {
            id: new_uuid_to_bech32(CATEGORY_HRP)?,
            year_id: year_id.to_string(),
            name,
            status: ActiveStatus::Active,
            is_research_fund,
            created_at: now.clone(),
        };
        let entry = audit_entry(
            actor,
            AuditAction::Create,
            EntityKind::Category,
            &category.id,
            &now,
            format!("Created category {}", category.name),
        )?;

        let store = &self.store;
        (&store.years, &store.categories, &store.audit).transaction(
            |(years, categories, audit)| -> TxResult<()> {
                if tx_get::<Year>(years, year_id)?.is_none() {
                    return fail(WorkflowError::YearNotFound(year_id.to_string()));
                }
                tx_put(categories, &category.id, &category)?;
                entry.record(audit)?;
                Ok(())
            },
        )?;

        entry.trace();
        Ok(category)
    }

    pub fn create_subcategory(&self, actor: &Actor, draft: SubcategoryDraft) -> Result<Subcategory> {
        manage(actor)?;
        let name = non_blank(Some(draft.name.as_str()))
            .ok_or(WorkflowError::InvalidBudget("subcategory name is required"))?;

        let now = TimeStamp::new();
        let subcategory = Subcategory {
            id: new_uuid_to_bech32(SUBCATEGORY_HRP)?,
            category_id: draft.category_id.clone(),
            name,
            fund_condition: non_blank(draft.fund_condition.as_deref()),
            target_roles: draft.target_roles,
            status: ActiveStatus::Active,
            linked_submissions: 0,
            created_at: now.clone(),
        };
        let entry = audit_entry(
            actor,
            AuditAction::Create,
            EntityKind::Subcategory,
            &subcategory.id,
            &now,
            format!("Created subcategory {}", subcategory.name),
        )?;

        let store = &self.store;
        (&store.categories, &store.subcategories, &store.audit).transaction(
            |(categories, subcategories, audit)| -> TxResult<()> {
                if tx_get::<Category>(categories, &subcategory.category_id)?.is_none() {
                    return fail(WorkflowError::CategoryNotFound(subcategory.category_id.clone()));
                }
                tx_put(subcategories, &subcategory.id, &subcategory)?;
                entry.record(audit)?;
                Ok(())
            },
        )?;

        entry.trace();
        Ok(subcategory)
    }

    pub fn create_budget(&self, actor: &Actor, draft: BudgetDraft) -> Result<SubcategoryBudget> {
        manage(actor)?;

        let now = TimeStamp::new();
        let budget = draft.into_budget(new_uuid_to_bech32(BUDGET_HRP)?, now.clone())?;
        let entry = audit_entry(
            actor,
            AuditAction::Create,
            EntityKind::Budget,
            &budget.id,
            &now,
            format!("Created budget with allocation {}", budget.allocated_amount),
        )?;

        let store = &self.store;
        (&store.subcategories, &store.budgets, &store.audit).transaction(
            |(subcategories, budgets, audit)| -> TxResult<()> {
                if tx_get::<Subcategory>(subcategories, &budget.subcategory_id)?.is_none() {
                    return fail(WorkflowError::SubcategoryNotFound(budget.subcategory_id.clone()));
                }
                tx_put(budgets, &budget.id, &budget)?;
                entry.record(audit)?;
                Ok(())
            },
        )?;

        entry.trace();
        Ok(budget)
    }

    pub fn get_budget(&self, id: &str) -> Result<SubcategoryBudget> {
        match self.store.get::<SubcategoryBudget>(&self.store.budgets, id)? {
            Some(budget) if !budget.is_retired => Ok(budget),
            _ => Err(WorkflowError::BudgetNotFound(id.to_string()).into()),
        }
    }

    /// Live budgets of one subcategory, oldest first
    pub fn list_budgets(&self, subcategory_id: &str) -> Result<Vec<SubcategoryBudget>> {
        let mut budgets: Vec<SubcategoryBudget> = self
            .store
            .scan_all::<SubcategoryBudget>(&self.store.budgets)?
            .into_iter()
            .filter(|b| !b.is_retired && b.subcategory_id == subcategory_id)
            .collect();
        budgets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(budgets)
    }

    pub fn list_categories(&self, year_id: &str) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self
            .store
            .scan_all::<Category>(&self.store.categories)?
            .into_iter()
            .filter(|c| c.year_id == year_id)
            .collect();
        categories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(categories)
    }

    pub fn list_subcategories(&self, category_id: &str) -> Result<Vec<Subcategory>> {
        let mut subcategories: Vec<Subcategory> = self
            .store
            .scan_all::<Subcategory>(&self.store.subcategories)?
            .into_iter()
            .filter(|s| s.category_id == category_id)
            .collect();
        subcategories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(subcategories)
    }

    /// Read-modify-write of one live budget under its lock.
    fn modify_budget<F>(
        &self,
        actor: &Actor,
        id: &str,
        action: AuditAction,
        apply: F,
    ) -> Result<SubcategoryBudget>
    where
        F: Fn(&mut SubcategoryBudget, &Option<Subcategory>, &TimeStamp<Utc>) -> Result<String, WorkflowError>,
    {
        manage(actor)?;

        let _guard = self.locks.budget(id);
        let now = TimeStamp::new();
        let entry = AuditEntry::new(&actor.user_id, action, EntityKind::Budget, id, now.clone())?;

        let store = &self.store;
        let (budget, entry) = (&store.budgets, &store.subcategories, &store.audit).transaction(
            |(budgets, subcategories, audit)| -> TxResult<(SubcategoryBudget, AuditEntry)> {
                let missing = WorkflowError::BudgetNotFound(id.to_string());
                let mut budget: SubcategoryBudget = tx_require(budgets, id, missing.clone())?;
                if budget.is_retired {
                    return fail(missing);
                }
                let subcategory = tx_get::<Subcategory>(subcategories, &budget.subcategory_id)?;
                let description = match apply(&mut budget, &subcategory, &now) {
                    Ok(description) => description,
                    Err(e) => return fail(e),
                };
                let entry = entry.clone().describe(description);
                tx_put(budgets, id, &budget)?;
                entry.record(audit)?;
                Ok((budget, entry))
            },
        )?;

        entry.trace();
        Ok(budget)
    }

    pub fn update_budget(&self, actor: &Actor, id: &str, patch: &BudgetPatch) -> Result<SubcategoryBudget> {
        self.modify_budget(actor, id, AuditAction::Update, |budget, _, now| {
            budget.apply_patch(patch, now.clone())?;
            Ok(format!(
                "Updated budget: allocated {}, remaining {}",
                budget.allocated_amount, budget.remaining_budget
            ))
        })
    }

    pub fn toggle_budget_status(&self, actor: &Actor, id: &str) -> Result<SubcategoryBudget> {
        self.modify_budget(actor, id, AuditAction::Update, |budget, _, now| {
            budget.status = budget.status.toggled();
            budget.updated_at = now.clone();
            Ok(match budget.status {
                ActiveStatus::Active => "Enabled budget".to_string(),
                ActiveStatus::Disabled => "Disabled budget".to_string(),
            })
        })
    }

    /// Retire a budget nothing has drawn on and nothing references.
    pub fn delete_budget(&self, actor: &Actor, id: &str) -> Result<SubcategoryBudget> {
        self.modify_budget(actor, id, AuditAction::Delete, |budget, subcategory, now| {
            budget.ensure_deletable()?;
            if let Some(subcategory) = subcategory
                && subcategory.linked_submissions > 0
            {
                return Err(WorkflowError::BudgetReferenced(subcategory.linked_submissions));
            }
            budget.is_retired = true;
            budget.updated_at = now.clone();
            Ok("Deleted budget".to_string())
        })
    }

    /// Duplicate a year's categories, subcategories and budgets into a new
    /// year labelled `target_label`. Copied budgets start unused.
    pub fn copy_year(&self, actor: &Actor, source_year_id: &str, target_label: &str) -> Result<Year> {
        manage(actor)?;
        let label = non_blank(Some(target_label))
            .ok_or(WorkflowError::InvalidBudget("year label is required"))?;
        let source = self.get_year(source_year_id)?;
        let now = TimeStamp::new();

        let target = Year {
            id: new_uuid_to_bech32(YEAR_HRP)?,
            label: label.clone(),
            budget: source.budget,
            status: source.status,
            created_at: now.clone(),
        };

        // build the copied hierarchy up front; transactions cannot scan
        let store = &self.store;
        let categories: Vec<Category> = store
            .scan_all::<Category>(&store.categories)?
            .into_iter()
            .filter(|c| c.year_id == source.id)
            .collect();
        let all_subcategories: Vec<Subcategory> = store.scan_all(&store.subcategories)?;
        let all_budgets: Vec<SubcategoryBudget> = store.scan_all(&store.budgets)?;

        let mut new_categories = Vec::new();
        let mut new_subcategories = Vec::new();
        let mut new_budgets = Vec::new();
        for category in &categories {
            let category_copy = Category {
                id: new_uuid_to_bech32(CATEGORY_HRP)?,
                year_id: target.id.clone(),
                created_at: now.clone(),
                ..category.clone()
            };
            for subcategory in all_subcategories.iter().filter(|s| s.category_id == category.id) {
                let subcategory_copy = Subcategory {
                    id: new_uuid_to_bech32(SUBCATEGORY_HRP)?,
                    category_id: category_copy.id.clone(),
                    linked_submissions: 0,
                    created_at: now.clone(),
                    ..subcategory.clone()
                };
                for budget in all_budgets
                    .iter()
                    .filter(|b| !b.is_retired && b.subcategory_id == subcategory.id)
                {
                    new_budgets.push(budget.copy_for_year(
                        new_uuid_to_bech32(BUDGET_HRP)?,
                        subcategory_copy.id.clone(),
                        now.clone(),
                    ));
                }
                new_subcategories.push(subcategory_copy);
            }
            new_categories.push(category_copy);
        }

        let entry = audit_entry(
            actor,
            AuditAction::Create,
            EntityKind::Year,
            &target.id,
            &now,
            format!(
                "Copied year {} to {label}: {} categories, {} subcategories, {} budgets",
                source.label,
                new_categories.len(),
                new_subcategories.len(),
                new_budgets.len()
            ),
        )?;

        (
            &store.years,
            &store.year_labels,
            &store.categories,
            &store.subcategories,
            &store.budgets,
            &store.audit,
        )
            .transaction(
                |(years, labels, categories, subcategories, budgets, audit)| -> TxResult<()> {
                    if labels.get(label.as_bytes())?.is_some() {
                        return fail(WorkflowError::YearExists(label.clone()));
                    }
                    labels.insert(label.as_bytes(), target.id.as_bytes())?;
                    tx_put(years, &target.id, &target)?;
                    for category in &new_categories {
                        tx_put(categories, &category.id, category)?;
                    }
                    for subcategory in &new_subcategories {
                        tx_put(subcategories, &subcategory.id, subcategory)?;
                    }
                    for budget in &new_budgets {
                        tx_put(budgets, &budget.id, budget)?;
                    }
                    entry.record(audit)?;
                    Ok(())
                },
            )?;

        entry.trace();
        Ok(target)
    }
}
