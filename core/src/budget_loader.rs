//! Budget data loader.
//!
//! Pulls every budget line item that can influence a projection window
//! together with the daily statements that fall into its confidence range.
//! The loader is read-only and performs exactly two queries.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::{
    clock::days_before,
    error::PacingResult,
    store::{BudgetWithCredit, PacingStore, StatementRow},
    types::{overlap_days, AccountId, AgencyId, Breakdown, CampaignId},
};

/// Days of history before the window start that still count as evidence
/// for a projection.
pub const CONFIDENCE_OFFSET_DAYS: u64 = 7;

/// Constraints on which budgets are loaded. Every constraint that is set
/// must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionFilter {
    pub agency_ids: Option<Vec<AgencyId>>,
    pub account_ids: Option<Vec<AccountId>>,
    pub campaign_ids: Option<Vec<CampaignId>>,
}

impl ProjectionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn agencies(ids: Vec<AgencyId>) -> Self {
        Self {
            agency_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn accounts(ids: Vec<AccountId>) -> Self {
        Self {
            account_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn campaigns(ids: Vec<CampaignId>) -> Self {
        Self {
            campaign_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &BudgetWithCredit) -> bool {
        let agency_ok = match (&self.agency_ids, item.agency_id) {
            (None, _) => true,
            (Some(ids), Some(agency_id)) => ids.contains(&agency_id),
            (Some(_), None) => false,
        };
        let account_ok = self
            .account_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&item.account_id));
        let campaign_ok = self
            .campaign_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&item.budget.campaign_id));
        agency_ok && account_ok && campaign_ok
    }
}

/// A budget with its credit, hierarchy ids and its statements inside
/// `[confidence_date, projection_date]`, ordered by date.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBudget {
    pub item: BudgetWithCredit,
    pub statements: Vec<StatementRow>,
}

impl LoadedBudget {
    pub fn key(&self, breakdown: Breakdown) -> i64 {
        match breakdown {
            Breakdown::Account => self.item.account_id,
            Breakdown::Campaign => self.item.budget.campaign_id,
        }
    }

    /// Days of the budget's flight inside `[start, end]`.
    pub fn overlap_with(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        let b = &self.item.budget;
        overlap_days(b.start_date, b.end_date, start, end)
    }
}

#[derive(Debug, Clone)]
pub struct BudgetDataLoader {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub projection_date: NaiveDate,
    pub confidence_date: NaiveDate,
    pub budgets: Vec<LoadedBudget>,
}

impl BudgetDataLoader {
    pub fn load(
        store: &PacingStore,
        start: NaiveDate,
        end: NaiveDate,
        projection_date: NaiveDate,
        filter: &ProjectionFilter,
    ) -> PacingResult<Self> {
        let confidence_date = days_before(start, CONFIDENCE_OFFSET_DAYS);

        let items: Vec<BudgetWithCredit> = store
            .budgets_overlapping(confidence_date, end)?
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect();

        let mut by_budget: HashMap<i64, Vec<StatementRow>> = HashMap::new();
        if projection_date >= confidence_date {
            for s in store.statements_between(confidence_date, projection_date)? {
                by_budget.entry(s.budget_id).or_default().push(s);
            }
        }

        let budgets: Vec<LoadedBudget> = items
            .into_iter()
            .map(|item| {
                let statements = by_budget.remove(&item.budget.id).unwrap_or_default();
                LoadedBudget { item, statements }
            })
            .collect();

        log::debug!(
            "loaded {} budgets for [{start}, {end}] (confidence from {confidence_date}, projecting at {projection_date})",
            budgets.len()
        );

        Ok(Self {
            start,
            end,
            projection_date,
            confidence_date,
            budgets,
        })
    }

    pub fn group_by(&self, breakdown: Breakdown) -> BTreeMap<i64, Vec<&LoadedBudget>> {
        let mut groups: BTreeMap<i64, Vec<&LoadedBudget>> = BTreeMap::new();
        for b in &self.budgets {
            groups.entry(b.key(breakdown)).or_default().push(b);
        }
        groups
    }
}
