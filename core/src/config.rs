use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Nano, SourceTypeId};

// ── Source type catalog ─────────────────────────────────────────────

/// Bidding and budget limits of one exchange integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceType {
    pub id: SourceTypeId,
    pub slug: String,
    pub min_cpc: Decimal,
    pub max_cpc: Decimal,
    pub min_daily_budget: Decimal,
    pub max_daily_budget: Decimal,
    #[serde(default)]
    pub supports_cpm: bool,
    #[serde(default)]
    pub min_cpm: Option<Decimal>,
    #[serde(default)]
    pub max_cpm: Option<Decimal>,
    #[serde(default = "default_cpc_decimal_places")]
    pub cpc_decimal_places: u32,
}

fn default_cpc_decimal_places() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
struct SourceTypeCatalogFile {
    source_types: Vec<SourceType>,
}

// ── Autopilot ───────────────────────────────────────────────────────

/// One row of the CPC change table: when yesterday's spend / daily budget
/// falls in `[min_spend_perc, max_spend_perc)`, the bid moves by `change`
/// (a fraction of the current CPC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpcChangeBucket {
    pub min_spend_perc: Decimal,
    #[serde(default)]
    pub max_spend_perc: Option<Decimal>,
    pub change: Decimal,
}

impl CpcChangeBucket {
    pub fn contains(&self, spend_perc: Decimal) -> bool {
        spend_perc >= self.min_spend_perc
            && self.max_spend_perc.map_or(true, |max| spend_perc < max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    /// Platform-wide CPC floor applied on top of each source's own minimum.
    pub min_cpc: Decimal,
    pub max_cpc: Decimal,
    /// Platform-wide per-source daily budget floor under budget autopilot.
    pub budget_ap_min_source_budget: Decimal,
    /// Granularity of autopilot daily budgets.
    pub budget_step: Decimal,
    /// Smallest absolute bid move autopilot makes when it moves at all.
    pub min_cpc_change: Decimal,
    /// Largest absolute bid move in a single run.
    pub max_cpc_change: Decimal,
    /// Largest relative bid move the audit tolerates.
    pub max_cpc_change_perc: Decimal,
    pub cpc_change_table: Vec<CpcChangeBucket>,
}

// ── Audit ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub spend_integrity_max_err_nano: Nano,
    pub spend_pattern_threshold: Decimal,
    pub first_in_month_threshold: Decimal,
    pub spend_pattern_day_range: u32,
    pub min_pacing: Decimal,
    pub max_pacing: Decimal,
    pub budget_totals_epsilon: Decimal,
    #[serde(default)]
    pub digest_recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub autopilot: AutopilotConfig,
    pub audit: AuditConfig,
    pub source_types: HashMap<String, SourceType>,
}

impl PacingConfig {
    /// Load from the data/ directory.
    /// In tests, use PacingConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let autopilot_path = format!("{data_dir}/autopilot/autopilot_config.json");
        let autopilot_content = std::fs::read_to_string(&autopilot_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {autopilot_path}: {e}"))?;
        let autopilot: AutopilotConfig = serde_json::from_str(&autopilot_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {autopilot_path}: {e}"))?;

        let audit_path = format!("{data_dir}/audit/audit_config.json");
        let audit_content = std::fs::read_to_string(&audit_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {audit_path}: {e}"))?;
        let audit: AuditConfig = serde_json::from_str(&audit_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {audit_path}: {e}"))?;

        let catalog_path = format!("{data_dir}/sources/source_types.json");
        let catalog_content = std::fs::read_to_string(&catalog_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {catalog_path}: {e}"))?;
        let catalog: SourceTypeCatalogFile = serde_json::from_str(&catalog_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {catalog_path}: {e}"))?;
        let source_types = catalog
            .source_types
            .into_iter()
            .map(|s| (s.slug.clone(), s))
            .collect();

        let config = Self {
            autopilot,
            audit,
            source_types,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject catalogs the allocator cannot work with.
    fn validate(&self) -> anyhow::Result<()> {
        if self.autopilot.budget_step <= Decimal::ZERO {
            anyhow::bail!("autopilot.budget_step must be positive");
        }
        if self.autopilot.min_cpc > self.autopilot.max_cpc {
            anyhow::bail!("autopilot.min_cpc is above autopilot.max_cpc");
        }
        for st in self.source_types.values() {
            if st.min_daily_budget > st.max_daily_budget || st.min_cpc > st.max_cpc {
                anyhow::bail!("source type {} has inverted limits", st.slug);
            }
        }
        Ok(())
    }

    /// Source types ordered by id, for seeding the store.
    pub fn source_types_sorted(&self) -> Vec<&SourceType> {
        let mut types: Vec<&SourceType> = self.source_types.values().collect();
        types.sort_by_key(|s| s.id);
        types
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let dec = Decimal::new;

        let source_types = [
            SourceType {
                id: 1,
                slug: "outbrain".into(),
                min_cpc: dec(5, 2),
                max_cpc: dec(3, 0),
                min_daily_budget: dec(10, 0),
                max_daily_budget: dec(10000, 0),
                supports_cpm: false,
                min_cpm: None,
                max_cpm: None,
                cpc_decimal_places: 3,
            },
            SourceType {
                id: 2,
                slug: "yahoo".into(),
                min_cpc: dec(1, 2),
                max_cpc: dec(4, 0),
                min_daily_budget: dec(1, 0),
                max_daily_budget: dec(40, 0),
                supports_cpm: true,
                min_cpm: Some(dec(5, 1)),
                max_cpm: Some(dec(25, 0)),
                cpc_decimal_places: 2,
            },
        ]
        .into_iter()
        .map(|s| (s.slug.clone(), s))
        .collect();

        Self {
            autopilot: AutopilotConfig {
                min_cpc: dec(3, 2),
                max_cpc: dec(4, 0),
                budget_ap_min_source_budget: dec(5, 0),
                budget_step: dec(1, 0),
                min_cpc_change: dec(2, 2),
                max_cpc_change: dec(5, 1),
                max_cpc_change_perc: dec(5, 1),
                cpc_change_table: vec![
                    CpcChangeBucket {
                        min_spend_perc: dec(0, 0),
                        max_spend_perc: Some(dec(5, 1)),
                        change: dec(1, 1),
                    },
                    CpcChangeBucket {
                        min_spend_perc: dec(5, 1),
                        max_spend_perc: Some(dec(75, 2)),
                        change: dec(5, 2),
                    },
                    CpcChangeBucket {
                        min_spend_perc: dec(75, 2),
                        max_spend_perc: Some(dec(95, 2)),
                        change: Decimal::ZERO,
                    },
                    CpcChangeBucket {
                        min_spend_perc: dec(95, 2),
                        max_spend_perc: Some(dec(11, 1)),
                        change: dec(-5, 2),
                    },
                    CpcChangeBucket {
                        min_spend_perc: dec(11, 1),
                        max_spend_perc: None,
                        change: dec(-1, 1),
                    },
                ],
            },
            audit: AuditConfig {
                spend_integrity_max_err_nano: 10_000_000,
                spend_pattern_threshold: dec(8, 1),
                first_in_month_threshold: dec(6, 1),
                spend_pattern_day_range: 1,
                min_pacing: dec(50, 0),
                max_pacing: dec(200, 0),
                budget_totals_epsilon: dec(1, 3),
                digest_recipients: vec!["ops@example.com".into()],
            },
            source_types,
        }
    }
}
