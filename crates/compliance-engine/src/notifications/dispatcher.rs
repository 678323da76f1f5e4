use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{
    Channel, DeliveryOutcome, NotificationCandidate, NotificationReason, NotificationRecord,
    RecordId,
};
use crate::obligations::domain::{ComplianceEvent, UserId};
use crate::repository::{NotificationRepository, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    pub email: bool,
    pub sms: bool,
    pub in_app: bool,
}

impl ChannelPreferences {
    pub const fn in_app_only() -> Self {
        Self {
            email: false,
            sms: false,
            in_app: true,
        }
    }

    pub fn enabled(&self) -> Vec<Channel> {
        Channel::ordered()
            .into_iter()
            .filter(|channel| match channel {
                Channel::Email => self.email,
                Channel::Sms => self.sms,
                Channel::InApp => self.in_app,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreferenceError {
    #[error("preference store unavailable: {0}")]
    Unavailable(String),
}

pub trait PreferenceStore: Send + Sync {
    fn channels(&self, user_id: &UserId) -> Result<ChannelPreferences, PreferenceError>;
    fn contact(&self, user_id: &UserId) -> Result<UserContact, PreferenceError>;
}

/// Sender failure. Only transport failures are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rejected by provider: {0}")]
    Rejected(String),
}

pub trait EmailSender: Send + Sync {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError>;
}

pub trait SmsSender: Send + Sync {
    fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError>;
}

pub trait InAppSender: Send + Sync {
    fn post(&self, user_id: &UserId, subject: &str, body: &str) -> Result<(), SendError>;
}

#[derive(Clone)]
pub struct ChannelSenders {
    pub email: Arc<dyn EmailSender>,
    pub sms: Arc<dyn SmsSender>,
    pub in_app: Arc<dyn InAppSender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub max_attempts: u8,
    pub retry_base_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

pub fn render_message(
    candidate: &NotificationCandidate,
    event: &ComplianceEvent,
) -> RenderedMessage {
    let prefix = match candidate.reason {
        NotificationReason::DeadlineApproaching => "Due soon",
        NotificationReason::Overdue => "Overdue",
        NotificationReason::Escalation => "Escalated",
        NotificationReason::RecurrenceCreated => "Scheduled",
    };
    let subject = format!("[{prefix}] {} due {}", event.title, event.due_date);

    let mut body = format!(
        "{} for entity {} is due on {} (status: {}, priority: {}).",
        event.title,
        event.entity_id,
        event.due_date,
        event.status,
        event.priority.label()
    );
    if !event.description.is_empty() {
        body.push_str("\n\n");
        body.push_str(&event.description);
    }
    RenderedMessage { subject, body }
}

/// Delivers admitted candidates and writes the audit trail.
pub struct Dispatcher {
    config: DispatchConfig,
    preferences: Arc<dyn PreferenceStore>,
    senders: ChannelSenders,
    records: Arc<dyn NotificationRepository>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        preferences: Arc<dyn PreferenceStore>,
        senders: ChannelSenders,
        records: Arc<dyn NotificationRepository>,
    ) -> Self {
        Self {
            config,
            preferences,
            senders,
            records,
        }
    }

    /// Enabled channels for the user; in-app only when preferences cannot be read.
    pub fn channels_for(&self, user_id: &UserId) -> Vec<Channel> {
        match self.preferences.channels(user_id) {
            Ok(preferences) => preferences.enabled(),
            Err(err) => {
                warn!(%user_id, error = %err, "falling back to in-app notifications");
                ChannelPreferences::in_app_only().enabled()
            }
        }
    }

    /// Sends on the candidate's channel and writes exactly one record, whatever the outcome.
    pub fn dispatch(
        &self,
        candidate: &NotificationCandidate,
        event: &ComplianceEvent,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, RepositoryError> {
        let message = render_message(candidate, event);
        let (outcome, attempts, error) = match self.deliver(candidate, &message) {
            Ok(attempts) => (DeliveryOutcome::Sent, attempts, None),
            Err((attempts, err)) => (DeliveryOutcome::Failed, attempts, Some(err)),
        };

        if let Some(err) = &error {
            warn!(
                user_id = %candidate.user_id,
                event_id = %candidate.event_id,
                channel = candidate.channel.label(),
                attempts,
                error = %err,
                "notification delivery failed"
            );
        } else {
            info!(
                user_id = %candidate.user_id,
                event_id = %candidate.event_id,
                channel = candidate.channel.label(),
                score = candidate.score,
                reason = candidate.reason.label(),
                "notification sent"
            );
        }

        let record = self.record(candidate, now, outcome, attempts, error);
        self.records.insert(record).map_err(|err| {
            // the slot would otherwise stay held for the rest of the process
            if let Err(release_err) = self.records.release(&candidate.slot()) {
                warn!(user_id = %candidate.user_id, error = %release_err, "delivery slot not released");
            }
            err
        })
    }

    /// Audit record for a rate-limited candidate. Dedup ignores these.
    pub fn record_deferred(
        &self,
        candidate: &NotificationCandidate,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, RepositoryError> {
        self.records.insert(self.record(
            candidate,
            now,
            DeliveryOutcome::Throttled,
            0,
            Some("rate limited".to_string()),
        ))
    }

    fn record(
        &self,
        candidate: &NotificationCandidate,
        now: DateTime<Utc>,
        delivery_outcome: DeliveryOutcome,
        attempts: u8,
        error: Option<String>,
    ) -> NotificationRecord {
        NotificationRecord {
            id: RecordId::generate(),
            event_id: candidate.event_id.clone(),
            user_id: candidate.user_id.clone(),
            channel: candidate.channel,
            sent_at: now,
            dedup_key: candidate.dedup_key.clone(),
            reason: candidate.reason,
            score: candidate.score,
            delivery_outcome,
            attempts,
            error,
        }
    }

    fn deliver(
        &self,
        candidate: &NotificationCandidate,
        message: &RenderedMessage,
    ) -> Result<u8, (u8, String)> {
        let contact = match candidate.channel {
            Channel::InApp => UserContact::default(),
            Channel::Email | Channel::Sms => self
                .preferences
                .contact(&candidate.user_id)
                .map_err(|err| (0, err.to_string()))?,
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let result = match candidate.channel {
                Channel::Email => {
                    let to = contact
                        .email
                        .as_deref()
                        .ok_or_else(|| (0, "no email address on file".to_string()))?;
                    self.senders
                        .email
                        .send_email(to, &message.subject, &message.body)
                }
                Channel::Sms => {
                    let to = contact
                        .phone
                        .as_deref()
                        .ok_or_else(|| (0, "no phone number on file".to_string()))?;
                    self.senders.sms.send_sms(to, &message.subject)
                }
                Channel::InApp => {
                    self.senders
                        .in_app
                        .post(&candidate.user_id, &message.subject, &message.body)
                }
            };

            match result {
                Ok(()) => return Ok(attempt),
                Err(SendError::Transport(reason)) if attempt < max_attempts => {
                    let delay = Duration::from_millis(
                        self.config.retry_base_delay_ms * 2u64.pow(u32::from(attempt - 1)),
                    );
                    warn!(
                        attempt,
                        max_attempts,
                        channel = candidate.channel.label(),
                        "send failed, retrying in {delay:?}: {reason}"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err((attempt, err.to_string())),
            }
        }
    }
}
