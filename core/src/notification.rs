//! Outbound notifications.
//!
//! Email and paging are external channels. Jobs hand messages to a
//! `Notifier`; a failed delivery is reported to the caller, which logs
//! it and carries on. Settings already written are never rolled back
//! because a message could not be sent.

use chrono::NaiveDateTime;

use crate::store::PacingStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub created_dt: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    /// Deduplication key for the pager.
    pub key: String,
    pub description: String,
    pub created_dt: NaiveDateTime,
}

pub trait Notifier: Send + Sync {
    fn send_email(&self, store: &PacingStore, email: &Email) -> anyhow::Result<()>;
    fn trigger_incident(&self, store: &PacingStore, incident: &Incident) -> anyhow::Result<()>;
}

/// Writes every accepted message to the `notification_outbox` table for a
/// mail relay to pick up.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxNotifier;

impl Notifier for OutboxNotifier {
    fn send_email(&self, store: &PacingStore, email: &Email) -> anyhow::Result<()> {
        if email.recipients.is_empty() {
            anyhow::bail!("email '{}' has no recipients", email.subject);
        }
        for recipient in &email.recipients {
            store.insert_outbox("email", recipient, &email.subject, &email.body, email.created_dt)?;
        }
        Ok(())
    }

    fn trigger_incident(&self, store: &PacingStore, incident: &Incident) -> anyhow::Result<()> {
        store.insert_outbox(
            "incident",
            &incident.key,
            &incident.key,
            &incident.description,
            incident.created_dt,
        )?;
        Ok(())
    }
}

/// Only logs. Used by dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_email(&self, _store: &PacingStore, email: &Email) -> anyhow::Result<()> {
        log::info!(
            "email to {}: {} ({} bytes)",
            email.recipients.join(", "),
            email.subject,
            email.body.len()
        );
        Ok(())
    }

    fn trigger_incident(&self, _store: &PacingStore, incident: &Incident) -> anyhow::Result<()> {
        log::warn!("incident {}: {}", incident.key, incident.description);
        Ok(())
    }
}
