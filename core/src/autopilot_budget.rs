//! Budget autopilot allocation.
//!
//! Splits an ad group's autopilot daily budget across its active sources:
//! every source gets its floor, the rest is water-filled by weight up to
//! each source's ceiling, then the result is rounded to the budget step so
//! it sums exactly to the target. Pure: the output depends only on the
//! inputs, so re-running on the same stats converges on the same split.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::types::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetComment {
    /// Floors of the active sources exceed the autopilot budget.
    InsufficientBudget,
    /// Every source hit its ceiling before the budget was spent.
    NewBudgetNotEqualDailyBudget,
}

impl BudgetComment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientBudget => "INSUFFICIENT_BUDGET",
            Self::NewBudgetNotEqualDailyBudget => "NEW_BUDGET_NOT_EQUAL_DAILY_BUDGET",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCandidate {
    pub source_id: SourceId,
    pub floor: Decimal,
    pub ceiling: Decimal,
    pub weight: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    Allocated(BTreeMap<SourceId, Decimal>),
    NoChange(BudgetComment),
}

/// Weight of a source from yesterday's stats: clicks per unit of spend.
/// None when the source has no usable stats.
pub fn source_weight(clicks: i64, spend: Decimal) -> Option<Decimal> {
    if spend > Decimal::ZERO {
        Some(Decimal::from(clicks) / spend)
    } else {
        None
    }
}

/// Sources without stats take the smallest known weight, or 1 when no
/// source has any.
pub fn fill_missing_weights(weights: &[Option<Decimal>]) -> Vec<Decimal> {
    let fallback = weights
        .iter()
        .flatten()
        .copied()
        .min()
        .unwrap_or(Decimal::ONE);
    weights.iter().map(|w| w.unwrap_or(fallback)).collect()
}

fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    (value / step).ceil() * step
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    (value / step).floor() * step
}

pub fn allocate(target: Decimal, candidates: &[BudgetCandidate], step: Decimal) -> BudgetDecision {
    let step = if step > Decimal::ZERO { step } else { Decimal::ONE };
    if candidates.is_empty() {
        return BudgetDecision::Allocated(BTreeMap::new());
    }

    let floors: Vec<Decimal> = candidates.iter().map(|c| ceil_to_step(c.floor, step)).collect();
    let ceilings: Vec<Decimal> = candidates
        .iter()
        .zip(&floors)
        .map(|(c, floor)| floor_to_step(c.ceiling, step).max(*floor))
        .collect();

    let floor_total: Decimal = floors.iter().copied().sum();
    if floor_total > target {
        return BudgetDecision::NoChange(BudgetComment::InsufficientBudget);
    }

    // ── Water-fill ────────────────────────────────────────────────
    let mut alloc = floors.clone();
    let mut remaining = target - floor_total;
    let mut open: Vec<usize> = (0..candidates.len())
        .filter(|&i| ceilings[i] > floors[i])
        .collect();

    while remaining > Decimal::ZERO && !open.is_empty() {
        let total_weight: Decimal = open.iter().map(|&i| candidates[i].weight).sum();
        let share_of = |i: usize| {
            if total_weight.is_zero() {
                remaining / Decimal::from(open.len())
            } else {
                remaining * candidates[i].weight / total_weight
            }
        };

        let saturated: Vec<usize> = open
            .iter()
            .copied()
            .filter(|&i| alloc[i] + share_of(i) >= ceilings[i])
            .collect();

        if saturated.is_empty() {
            let shares: Vec<(usize, Decimal)> = open.iter().map(|&i| (i, share_of(i))).collect();
            for (i, share) in shares {
                alloc[i] += share;
            }
            remaining = Decimal::ZERO;
            break;
        }

        for i in &saturated {
            remaining -= ceilings[*i] - alloc[*i];
            alloc[*i] = ceilings[*i];
        }
        open.retain(|i| !saturated.contains(i));
    }

    if remaining > Decimal::ZERO {
        return BudgetDecision::NoChange(BudgetComment::NewBudgetNotEqualDailyBudget);
    }

    // ── Round to step by largest remainder ────────────────────────
    let mut rounded: Vec<Decimal> = alloc.iter().map(|a| floor_to_step(*a, step)).collect();
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let rem_a = alloc[a] - rounded[a];
        let rem_b = alloc[b] - rounded[b];
        rem_b
            .cmp(&rem_a)
            .then(candidates[b].weight.cmp(&candidates[a].weight))
            .then(candidates[a].source_id.cmp(&candidates[b].source_id))
    });

    let target_steps = floor_to_step(target, step);
    let mut missing = target_steps - rounded.iter().copied().sum::<Decimal>();
    for &i in &order {
        if missing < step {
            break;
        }
        if rounded[i] + step <= ceilings[i] {
            rounded[i] += step;
            missing -= step;
        }
    }

    let sub_step = target - target_steps;
    if sub_step > Decimal::ZERO {
        if let Some(&i) = order.iter().find(|&&i| rounded[i] + sub_step <= ceilings[i]) {
            rounded[i] += sub_step;
        }
    }

    if rounded.iter().copied().sum::<Decimal>() != target {
        return BudgetDecision::NoChange(BudgetComment::NewBudgetNotEqualDailyBudget);
    }

    BudgetDecision::Allocated(
        candidates
            .iter()
            .zip(rounded)
            .map(|(c, budget)| (c.source_id, budget))
            .collect(),
    )
}
