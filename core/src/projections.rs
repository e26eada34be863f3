//! Budget projections.
//!
//! For a date window and a breakdown (account or campaign) computes the
//! allocated budget, how far actual spend is from the time-prorated ideal
//! (pacing) and where spend and fees will land by the end of the window.
//!
//! Projections are derived on demand and never persisted.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    budget_loader::{BudgetDataLoader, LoadedBudget, ProjectionFilter, CONFIDENCE_OFFSET_DAYS},
    clock::{first_day_of_month, last_day_of_month, previous_day},
    error::PacingResult,
    store::{CreditRow, PacingStore},
    types::{days_inclusive, nano_to_decimal, AccountId, AgencyId, Breakdown, CreditId, Nano},
};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionField {
    AllocatedTotalBudget,
    AllocatedMediaBudget,
    IdealMediaSpend,
    AttributedMediaSpend,
    Pacing,
    MediaSpendProjection,
    LicenseFeeProjection,
    AttributedLicenseFee,
    FlatFee,
    TotalFee,
    TotalFeeProjection,
}

/// Fee recognition, computed for the account breakdown only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeeRecognition {
    pub attributed_license_fee: Decimal,
    pub flat_fee: Decimal,
    pub total_fee: Decimal,
    pub total_fee_projection: Decimal,
}

impl FeeRecognition {
    fn add(&mut self, other: &FeeRecognition) {
        self.attributed_license_fee += other.attributed_license_fee;
        self.flat_fee += other.flat_fee;
        self.total_fee += other.total_fee;
        self.total_fee_projection += other.total_fee_projection;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionRow {
    pub allocated_total_budget: Decimal,
    pub allocated_media_budget: Decimal,
    pub ideal_media_spend: Decimal,
    pub attributed_media_spend: Decimal,
    /// None when the ideal spend is zero.
    pub pacing: Option<Decimal>,
    pub media_spend_projection: Decimal,
    pub license_fee_projection: Decimal,
    pub fees: Option<FeeRecognition>,
}

impl ProjectionRow {
    pub fn value(&self, field: ProjectionField) -> Option<Decimal> {
        let fees = self.fees.as_ref();
        match field {
            ProjectionField::AllocatedTotalBudget => Some(self.allocated_total_budget),
            ProjectionField::AllocatedMediaBudget => Some(self.allocated_media_budget),
            ProjectionField::IdealMediaSpend => Some(self.ideal_media_spend),
            ProjectionField::AttributedMediaSpend => Some(self.attributed_media_spend),
            ProjectionField::Pacing => self.pacing,
            ProjectionField::MediaSpendProjection => Some(self.media_spend_projection),
            ProjectionField::LicenseFeeProjection => Some(self.license_fee_projection),
            ProjectionField::AttributedLicenseFee => fees.map(|f| f.attributed_license_fee),
            ProjectionField::FlatFee => fees.map(|f| f.flat_fee),
            ProjectionField::TotalFee => fees.map(|f| f.total_fee),
            ProjectionField::TotalFeeProjection => fees.map(|f| f.total_fee_projection),
        }
    }
}

fn pacing(attributed: Decimal, ideal: Decimal) -> Option<Decimal> {
    if ideal.is_zero() {
        None
    } else {
        Some(attributed / ideal * HUNDRED)
    }
}

#[derive(Debug, Clone)]
pub struct BudgetProjections {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub projection_date: NaiveDate,
    pub breakdown: Breakdown,
    /// Elapsed days of the window up to the projection date, clamped to
    /// `[0, forecast_days]`.
    pub past_days: i64,
    pub forecast_days: i64,
    rows: BTreeMap<i64, ProjectionRow>,
    totals: ProjectionRow,
}

impl BudgetProjections {
    pub fn new(
        store: &PacingStore,
        start: NaiveDate,
        end: NaiveDate,
        breakdown: Breakdown,
        projection_date: NaiveDate,
        filter: &ProjectionFilter,
        accounts: &[AccountId],
    ) -> PacingResult<Self> {
        let loader = BudgetDataLoader::load(store, start, end, projection_date, filter)?;
        let forecast_days = days_inclusive(start, end);
        let past_days = ((projection_date - start).num_days() + 1).clamp(0, forecast_days);

        let mut projections = Self {
            start,
            end,
            projection_date,
            breakdown,
            past_days,
            forecast_days,
            rows: BTreeMap::new(),
            totals: ProjectionRow::default(),
        };

        if breakdown == Breakdown::Account {
            for account_id in accounts {
                projections.rows.insert(
                    *account_id,
                    ProjectionRow {
                        fees: Some(FeeRecognition::default()),
                        ..ProjectionRow::default()
                    },
                );
            }
        }

        let flat_fees = FlatFeeShares::collect(store, &loader, start, end)?;
        for (key, budgets) in loader.group_by(breakdown) {
            let row = projections.calculate_row(&budgets, &flat_fees);
            projections.rows.insert(key, row);
        }
        projections.totals = projections.calculate_totals();

        log::debug!(
            "projections {:?} [{start}, {end}] at {projection_date}: {} rows, pacing {:?}",
            breakdown,
            projections.rows.len(),
            projections.totals.pacing
        );
        Ok(projections)
    }

    /// Projections as they stand at the end of `today - 1`.
    pub fn as_of(
        store: &PacingStore,
        start: NaiveDate,
        end: NaiveDate,
        breakdown: Breakdown,
        today: NaiveDate,
        filter: &ProjectionFilter,
        accounts: &[AccountId],
    ) -> PacingResult<Self> {
        Self::new(store, start, end, breakdown, previous_day(today), filter, accounts)
    }

    pub fn keys(&self) -> Vec<i64> {
        self.rows.keys().copied().collect()
    }

    pub fn row(&self, key: i64) -> Option<&ProjectionRow> {
        self.rows.get(&key)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&i64, &ProjectionRow)> {
        self.rows.iter()
    }

    pub fn row_value(&self, key: i64, field: ProjectionField) -> Option<Decimal> {
        self.rows.get(&key).and_then(|row| row.value(field))
    }

    pub fn total(&self, field: ProjectionField) -> Option<Decimal> {
        self.totals.value(field)
    }

    pub fn totals(&self) -> &ProjectionRow {
        &self.totals
    }

    fn calculate_row(&self, budgets: &[&LoadedBudget], flat_fees: &FlatFeeShares) -> ProjectionRow {
        let mut row = ProjectionRow::default();

        for b in budgets {
            let overlap = b.overlap_with(self.start, self.end);
            let budget_days = b.item.budget.days();
            if overlap == 0 || budget_days == 0 {
                continue;
            }
            let allocated =
                b.item.budget.allocated_amount() * Decimal::from(overlap) / Decimal::from(budget_days);
            row.allocated_total_budget += allocated;
            row.allocated_media_budget += allocated * (Decimal::ONE - b.item.credit.license_fee);
        }

        row.ideal_media_spend = if self.forecast_days == 0 {
            Decimal::ZERO
        } else {
            row.allocated_media_budget * Decimal::from(self.past_days)
                / Decimal::from(self.forecast_days)
        };

        let mut spend_nano: Nano = 0;
        let mut license_fee_nano: Nano = 0;
        let mut spend_dates = BTreeSet::new();
        for b in budgets {
            for s in &b.statements {
                if s.spend_nano() > 0 {
                    spend_dates.insert(s.date);
                }
                if s.date >= self.start && s.date <= self.projection_date {
                    spend_nano += s.spend_nano();
                    license_fee_nano += s.license_fee_nano;
                }
            }
        }
        row.attributed_media_spend = nano_to_decimal(spend_nano);
        let attributed_license_fee = nano_to_decimal(license_fee_nano);
        row.pacing = pacing(row.attributed_media_spend, row.ideal_media_spend);

        let allocated_fee = row.allocated_total_budget - row.allocated_media_budget;
        let spend_days = spend_dates.len() as u64;
        if spend_days <= CONFIDENCE_OFFSET_DAYS || self.past_days == 0 {
            row.media_spend_projection = row.allocated_media_budget;
            row.license_fee_projection = allocated_fee;
        } else {
            let forecast = Decimal::from(self.forecast_days);
            let past = Decimal::from(self.past_days);
            row.media_spend_projection =
                (row.attributed_media_spend * forecast / past).min(row.allocated_media_budget);
            row.license_fee_projection =
                (attributed_license_fee * forecast / past).min(allocated_fee);
        }

        if self.breakdown == Breakdown::Account {
            let flat_fee = budgets
                .first()
                .map(|b| flat_fees.flat_fee_for_account(b.item.account_id, b.item.agency_id))
                .unwrap_or_default();
            row.fees = Some(FeeRecognition {
                attributed_license_fee,
                flat_fee,
                total_fee: attributed_license_fee + flat_fee,
                total_fee_projection: row.license_fee_projection + flat_fee,
            });
        }

        row
    }

    fn calculate_totals(&self) -> ProjectionRow {
        let mut totals = ProjectionRow {
            fees: (self.breakdown == Breakdown::Account).then(FeeRecognition::default),
            ..ProjectionRow::default()
        };
        for row in self.rows.values() {
            totals.allocated_total_budget += row.allocated_total_budget;
            totals.allocated_media_budget += row.allocated_media_budget;
            totals.ideal_media_spend += row.ideal_media_spend;
            totals.attributed_media_spend += row.attributed_media_spend;
            totals.media_spend_projection += row.media_spend_projection;
            totals.license_fee_projection += row.license_fee_projection;
            if let (Some(total_fees), Some(fees)) = (totals.fees.as_mut(), row.fees.as_ref()) {
                total_fees.add(fees);
            }
        }
        totals.pacing = pacing(totals.attributed_media_spend, totals.ideal_media_spend);
        totals
    }
}

// ── Flat fee recognition ──────────────────────────────────────────

/// Prorated flat fees of the credits behind the loaded budgets, and the
/// accounts that share each agency's credits.
///
/// An agency's pool and its sharing accounts are collected over every
/// budget of the agency in the window, not only the filtered ones.
struct FlatFeeShares {
    account_credits: BTreeMap<AccountId, BTreeMap<CreditId, Decimal>>,
    agency_credits: BTreeMap<AgencyId, BTreeMap<CreditId, Decimal>>,
    active_accounts: BTreeMap<AgencyId, BTreeSet<AccountId>>,
}

impl FlatFeeShares {
    fn collect(
        store: &PacingStore,
        loader: &BudgetDataLoader,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PacingResult<Self> {
        let mut shares = Self {
            account_credits: BTreeMap::new(),
            agency_credits: BTreeMap::new(),
            active_accounts: BTreeMap::new(),
        };
        let mut agencies = BTreeSet::new();
        for b in &loader.budgets {
            let credit: &CreditRow = &b.item.credit;
            if let Some(account_id) = credit.account_id {
                shares
                    .account_credits
                    .entry(account_id)
                    .or_default()
                    .insert(credit.id, credit.flat_fee_on_date_range(start, end));
            }
            if let Some(agency_id) = b.item.agency_id {
                agencies.insert(agency_id);
            }
        }
        if agencies.is_empty() {
            return Ok(shares);
        }

        let window = store.budgets_overlapping(start, end)?;
        for agency_id in agencies {
            let members: BTreeSet<AccountId> = store
                .accounts_for_agency(agency_id)?
                .into_iter()
                .map(|a| a.id)
                .collect();
            for item in window.iter().filter(|i| members.contains(&i.account_id)) {
                if item.credit.is_agency_credit() && item.credit.agency_id == Some(agency_id) {
                    shares
                        .agency_credits
                        .entry(agency_id)
                        .or_default()
                        .insert(item.credit.id, item.credit.flat_fee_on_date_range(start, end));
                }
                shares
                    .active_accounts
                    .entry(agency_id)
                    .or_default()
                    .insert(item.account_id);
            }
        }
        Ok(shares)
    }

    fn flat_fee_for_account(&self, account_id: AccountId, agency_id: Option<AgencyId>) -> Decimal {
        let own: Decimal = self
            .account_credits
            .get(&account_id)
            .map(|credits| credits.values().copied().sum())
            .unwrap_or_default();

        let agency_share = agency_id
            .and_then(|agency_id| {
                let active = self.active_accounts.get(&agency_id)?;
                if !active.contains(&account_id) {
                    return None;
                }
                let pool: Decimal = self.agency_credits.get(&agency_id)?.values().copied().sum();
                Some(pool / Decimal::from(active.len()))
            })
            .unwrap_or_default();

        own + agency_share
    }
}

// ── Current month ─────────────────────────────────────────────────

/// Projections over the month containing `today`, projected at `today`.
#[derive(Debug, Clone)]
pub struct CurrentMonthBudgetProjections;

impl CurrentMonthBudgetProjections {
    pub fn new(
        store: &PacingStore,
        today: NaiveDate,
        breakdown: Breakdown,
        filter: &ProjectionFilter,
        accounts: &[AccountId],
    ) -> PacingResult<BudgetProjections> {
        BudgetProjections::new(
            store,
            first_day_of_month(today),
            last_day_of_month(today),
            breakdown,
            today,
            filter,
            accounts,
        )
    }
}
