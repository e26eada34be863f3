//! CPC autopilot.
//!
//! Moves a source's bid according to how much of yesterday's daily budget
//! it spent: under-spending sources bid up, over-spending ones bid down.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::AutopilotConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpcComment {
    CpcNotSet,
    BudgetNotSet,
    /// No stats row for yesterday.
    OldData,
    SpendWithinTarget,
    UnderAutopilotMinCpc,
    OverAutopilotMaxCpc,
    OverAdGroupMaxCpc,
    /// The ad group's max CPC is below the source's floor; no valid bid exists.
    AdGroupMaxCpcUnderMinCpc,
}

impl CpcComment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpcNotSet => "CPC_NOT_SET",
            Self::BudgetNotSet => "BUDGET_NOT_SET",
            Self::OldData => "OLD_DATA",
            Self::SpendWithinTarget => "SPEND_WITHIN_TARGET",
            Self::UnderAutopilotMinCpc => "UNDER_AUTOPILOT_MIN_CPC",
            Self::OverAutopilotMaxCpc => "OVER_AUTOPILOT_MAX_CPC",
            Self::OverAdGroupMaxCpc => "OVER_AD_GROUP_MAX_CPC",
            Self::AdGroupMaxCpcUnderMinCpc => "AD_GROUP_MAX_CPC_UNDER_MIN_CPC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpcInput {
    pub current_cpc: Option<Decimal>,
    /// Daily budget the source ran with yesterday.
    pub daily_budget: Option<Decimal>,
    /// None when the warehouse has no row for yesterday.
    pub yesterday_spend: Option<Decimal>,
    /// `max(autopilot.min_cpc, source_type.min_cpc)`
    pub floor: Decimal,
    /// `min(autopilot.max_cpc, source_type.max_cpc)`
    pub ceiling: Decimal,
    pub ad_group_max_cpc: Option<Decimal>,
    pub decimal_places: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpcRecommendation {
    /// The bid after this run; equal to the current bid when unchanged.
    pub new_cpc: Option<Decimal>,
    pub comments: Vec<CpcComment>,
}

impl CpcRecommendation {
    fn unchanged(current: Option<Decimal>, comment: CpcComment) -> Self {
        Self {
            new_cpc: current,
            comments: vec![comment],
        }
    }
}

pub fn recommend(input: &CpcInput, config: &AutopilotConfig) -> CpcRecommendation {
    let Some(cpc) = input.current_cpc else {
        return CpcRecommendation::unchanged(None, CpcComment::CpcNotSet);
    };
    let budget = match input.daily_budget {
        Some(b) if b > Decimal::ZERO => b,
        _ => return CpcRecommendation::unchanged(Some(cpc), CpcComment::BudgetNotSet),
    };
    let Some(spend) = input.yesterday_spend else {
        return CpcRecommendation::unchanged(Some(cpc), CpcComment::OldData);
    };

    let spend_perc = spend / budget;
    let change = config
        .cpc_change_table
        .iter()
        .find(|bucket| bucket.contains(spend_perc))
        .map(|bucket| bucket.change)
        .unwrap_or(Decimal::ZERO);
    if change.is_zero() {
        return CpcRecommendation::unchanged(Some(cpc), CpcComment::SpendWithinTarget);
    }

    let raw_delta = cpc * change;
    let magnitude = raw_delta
        .abs()
        .max(config.min_cpc_change)
        .min(config.max_cpc_change);
    let delta = if raw_delta.is_sign_negative() { -magnitude } else { magnitude };

    let mut new_cpc = (cpc + delta)
        .round_dp_with_strategy(input.decimal_places, RoundingStrategy::MidpointAwayFromZero);
    let mut comments = Vec::new();

    if new_cpc < input.floor {
        new_cpc = input.floor;
        comments.push(CpcComment::UnderAutopilotMinCpc);
    }
    if new_cpc > input.ceiling {
        new_cpc = input.ceiling;
        comments.push(CpcComment::OverAutopilotMaxCpc);
    }
    if let Some(max_cpc) = input.ad_group_max_cpc {
        if new_cpc > max_cpc {
            if max_cpc < input.floor {
                let comment = CpcComment::AdGroupMaxCpcUnderMinCpc;
                return CpcRecommendation::unchanged(Some(cpc), comment);
            }
            new_cpc = max_cpc;
            comments.push(CpcComment::OverAdGroupMaxCpc);
        }
    }

    CpcRecommendation {
        new_cpc: Some(new_cpc),
        comments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use rust_decimal_macros::dec;

    fn input(cpc: Decimal, budget: Decimal, spend: Decimal) -> CpcInput {
        CpcInput {
            current_cpc: Some(cpc),
            daily_budget: Some(budget),
            yesterday_spend: Some(spend),
            floor: dec!(0.05),
            ceiling: dec!(3),
            ad_group_max_cpc: None,
            decimal_places: 3,
        }
    }

    #[test]
    fn underspending_bids_up_and_overspending_bids_down() {
        let config = PacingConfig::default_test().autopilot;

        // 20% of budget spent: +10%.
        let up = recommend(&input(dec!(1), dec!(100), dec!(20)), &config);
        assert_eq!(up.new_cpc, Some(dec!(1.1)));
        assert!(up.comments.is_empty());

        // 150% of budget spent: -10%.
        let down = recommend(&input(dec!(1), dec!(100), dec!(150)), &config);
        assert_eq!(down.new_cpc, Some(dec!(0.9)));
    }

    #[test]
    fn small_moves_are_raised_to_the_minimum_change() {
        let config = PacingConfig::default_test().autopilot;
        // 100% spent on a 0.30 bid: -5% is 0.015, below the 0.02 minimum.
        let rec = recommend(&input(dec!(0.30), dec!(50), dec!(50)), &config);
        assert_eq!(rec.new_cpc, Some(dec!(0.28)));
    }

    #[test]
    fn large_moves_are_capped() {
        let config = PacingConfig::default_test().autopilot;
        let rec = recommend(&input(dec!(2.9), dec!(100), dec!(0)), &config);
        // +10% would be 0.29; capped by the ceiling instead.
        assert_eq!(rec.new_cpc, Some(dec!(3)));
        assert_eq!(rec.comments, vec![CpcComment::OverAutopilotMaxCpc]);
    }

    #[test]
    fn floor_and_ad_group_max_clamp() {
        let config = PacingConfig::default_test().autopilot;
        let rec = recommend(&input(dec!(0.06), dec!(100), dec!(200)), &config);
        assert_eq!(rec.new_cpc, Some(dec!(0.05)));
        assert_eq!(rec.comments, vec![CpcComment::UnderAutopilotMinCpc]);

        let mut capped = input(dec!(1), dec!(100), dec!(10));
        capped.ad_group_max_cpc = Some(dec!(1.05));
        let rec = recommend(&capped, &config);
        assert_eq!(rec.new_cpc, Some(dec!(1.05)));
        assert_eq!(rec.comments, vec![CpcComment::OverAdGroupMaxCpc]);
    }

    #[test]
    fn ad_group_max_below_the_floor_keeps_the_bid() {
        let config = PacingConfig::default_test().autopilot;
        let mut capped = input(dec!(0.10), dec!(60), dec!(90));
        capped.ad_group_max_cpc = Some(dec!(0.04));
        let rec = recommend(&capped, &config);
        assert_eq!(rec.new_cpc, Some(dec!(0.10)));
        assert_eq!(rec.comments, vec![CpcComment::AdGroupMaxCpcUnderMinCpc]);
    }

    #[test]
    fn missing_inputs_leave_the_bid_alone() {
        let config = PacingConfig::default_test().autopilot;

        let mut no_cpc = input(dec!(1), dec!(100), dec!(50));
        no_cpc.current_cpc = None;
        assert_eq!(recommend(&no_cpc, &config).comments, vec![CpcComment::CpcNotSet]);

        let mut no_budget = input(dec!(1), dec!(100), dec!(50));
        no_budget.daily_budget = None;
        assert_eq!(recommend(&no_budget, &config).comments, vec![CpcComment::BudgetNotSet]);

        let mut no_stats = input(dec!(1), dec!(100), dec!(50));
        no_stats.yesterday_spend = None;
        let rec = recommend(&no_stats, &config);
        assert_eq!(rec.new_cpc, Some(dec!(1)));
        assert_eq!(rec.comments, vec![CpcComment::OldData]);

        let within = recommend(&input(dec!(1), dec!(100), dec!(80)), &config);
        assert_eq!(within.new_cpc, Some(dec!(1)));
        assert_eq!(within.comments, vec![CpcComment::SpendWithinTarget]);
    }
}
