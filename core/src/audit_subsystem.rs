//! Daily audit job.
//!
//! Execution order: after AutopilotSubsystem (slot 1).
//! Spend and pacing audits look at yesterday, whose statements the ETL has
//! already closed. Autopilot audits look at today, which the autopilot job
//! has just processed.
//!
//! Detect, don't self-heal: alarms become events and a digest email.

use std::any::Any;

use crate::{
    budget_loader::ProjectionFilter,
    clock::previous_day,
    error::PacingResult,
    event::PacingEvent,
    monitor,
    notification::{Email, Incident},
    subsystem::{JobContext, PacingSubsystem},
};

/// One finding of one audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub audit: &'static str,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct DailyAuditSubsystem {
    pub last_alarms: Vec<Alarm>,
}

impl DailyAuditSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every audit for the job date.
    pub fn collect_alarms(ctx: &JobContext<'_>) -> PacingResult<Vec<Alarm>> {
        let cfg = &ctx.config.audit;
        let yesterday = previous_day(ctx.date);
        let mut alarms = Vec::new();

        let integrity =
            monitor::audit_spend_integrity(ctx.store, yesterday, cfg.spend_integrity_max_err_nano)?;
        for a in integrity {
            alarms.push(Alarm {
                audit: "spend_integrity",
                detail: format!(
                    "{} on {yesterday}: statements {} vs warehouse {} (nano, diff {})",
                    a.metric,
                    a.statements_nano,
                    a.warehouse_nano,
                    a.diff_nano()
                ),
            });
        }

        for (day, ratio) in monitor::audit_spend_patterns(
            ctx.store,
            yesterday,
            cfg.spend_pattern_threshold,
            cfg.first_in_month_threshold,
            cfg.spend_pattern_day_range,
        )? {
            alarms.push(Alarm {
                audit: "spend_patterns",
                detail: format!("spend on {day} is {} of the previous day", ratio.round_dp(4)),
            });
        }

        for (campaign_id, pacing, kind) in monitor::audit_pacing(
            ctx.store,
            yesterday,
            cfg.min_pacing,
            cfg.max_pacing,
            &ProjectionFilter::all(),
        )? {
            alarms.push(Alarm {
                audit: "pacing",
                detail: format!("campaign {campaign_id}: {} pacing {pacing}%", kind.as_str()),
            });
        }

        for ad_group_id in monitor::audit_autopilot_ad_groups(ctx.store, ctx.date)? {
            alarms.push(Alarm {
                audit: "autopilot_ad_groups",
                detail: format!("ad group {ad_group_id} was not processed by autopilot"),
            });
        }

        let cpc_changes =
            monitor::audit_autopilot_cpc_changes(ctx.store, ctx.date, &ctx.config.autopilot)?;
        for a in cpc_changes {
            alarms.push(Alarm {
                audit: "autopilot_cpc_changes",
                detail: format!(
                    "ad group {} source {}: cpc {:?} -> {}",
                    a.ad_group_id, a.source_id, a.previous_cpc, a.new_cpc
                ),
            });
        }

        let totals =
            monitor::audit_autopilot_budget_totals(ctx.store, ctx.date, cfg.budget_totals_epsilon)?;
        for a in totals {
            alarms.push(Alarm {
                audit: "autopilot_budget_totals",
                detail: format!(
                    "ad group {}: sources sum to {}, autopilot budget is {}",
                    a.ad_group_id, a.sources_total, a.autopilot_daily_budget
                ),
            });
        }

        let changes =
            monitor::audit_autopilot_budget_changes(ctx.store, ctx.date, cfg.budget_totals_epsilon)?;
        for a in changes {
            alarms.push(Alarm {
                audit: "autopilot_budget_changes",
                detail: format!(
                    "ad group {}: logged budgets sum to {}, autopilot budget is {}",
                    a.ad_group_id, a.sources_total, a.autopilot_daily_budget
                ),
            });
        }

        Ok(alarms)
    }

    fn send_digest(&self, ctx: &JobContext<'_>, alarms: &[Alarm]) -> bool {
        let recipients = ctx.config.audit.digest_recipients.clone();
        if recipients.is_empty() {
            log::warn!("{} audit alarms but no digest recipients configured", alarms.len());
            return false;
        }

        let mut body = format!("{} alarms raised on {}:\n", alarms.len(), ctx.date);
        for alarm in alarms {
            body.push_str(&format!("[{}] {}\n", alarm.audit, alarm.detail));
        }
        let email = Email {
            recipients,
            subject: format!("Daily audit {}: {} alarms", ctx.date, alarms.len()),
            body,
            created_dt: ctx.created_dt,
        };

        match ctx.notifier.send_email(ctx.store, &email) {
            Ok(()) => true,
            Err(e) => {
                log::error!("audit digest for {} failed: {e:#}", ctx.date);
                let incident = Incident {
                    key: format!("audit-digest-{}", ctx.date),
                    description: format!("Daily audit digest could not be sent: {e}"),
                    created_dt: ctx.created_dt,
                };
                if let Err(page_err) = ctx.notifier.trigger_incident(ctx.store, &incident) {
                    log::error!("paging for audit digest failed too: {page_err:#}");
                }
                false
            }
        }
    }
}

impl PacingSubsystem for DailyAuditSubsystem {
    fn name(&self) -> &'static str {
        "daily_audit"
    }

    fn update(
        &mut self,
        ctx: &JobContext<'_>,
        _events_in: &[PacingEvent],
    ) -> PacingResult<Vec<PacingEvent>> {
        let alarms = Self::collect_alarms(ctx)?;

        let mut events: Vec<PacingEvent> = alarms
            .iter()
            .map(|a| PacingEvent::AuditAlarmRaised {
                date: ctx.date,
                audit: a.audit.to_string(),
                detail: a.detail.clone(),
            })
            .collect();

        let digest_sent = !alarms.is_empty() && self.send_digest(ctx, &alarms);
        events.push(PacingEvent::DailyAuditCompleted {
            date: ctx.date,
            alarm_count: alarms.len(),
            digest_sent,
        });

        log::debug!("daily audit {}: {} alarms", ctx.date, alarms.len());
        self.last_alarms = alarms;
        Ok(events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
