use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};

use crate::obligations::domain::{EntityId, EventId, EventStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(format!("ntf-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    InApp,
}

impl Channel {
    pub const fn ordered() -> [Self; 3] {
        [Self::Email, Self::Sms, Self::InApp]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InApp => "in_app",
        }
    }
}

/// Why a notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    DeadlineApproaching,
    Overdue,
    Escalation,
    RecurrenceCreated,
}

impl NotificationReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::DeadlineApproaching => "deadline_approaching",
            Self::Overdue => "overdue",
            Self::Escalation => "escalation",
            Self::RecurrenceCreated => "recurrence_created",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Throttled,
}

/// Coarse position of an event relative to its due date. The dedup key only changes when
/// an event moves into a different bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueDateBucket {
    Beyond,
    Within(u32),
    Overdue,
    OverdueEscalated,
    Created,
}

impl DueDateBucket {
    /// `boundaries` are day thresholds such as `[30, 14, 7, 1]`, in any order.
    pub fn classify(days_remaining: i64, boundaries: &[u32], escalate_after_days: u32) -> Self {
        if days_remaining < 0 {
            return if -days_remaining > i64::from(escalate_after_days) {
                Self::OverdueEscalated
            } else {
                Self::Overdue
            };
        }

        boundaries
            .iter()
            .copied()
            .filter(|boundary| days_remaining <= i64::from(*boundary))
            .min()
            .map(Self::Within)
            .unwrap_or(Self::Beyond)
    }

    pub fn key(self) -> String {
        match self {
            Self::Beyond => "beyond".to_string(),
            Self::Within(days) => format!("within_{days}"),
            Self::Overdue => "overdue".to_string(),
            Self::OverdueEscalated => "overdue_escalated".to_string(),
            Self::Created => "created".to_string(),
        }
    }
}

/// Hex SHA-256 fingerprint of `(event_id, status, due-date bucket)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn derive(event_id: &EventId, status: EventStatus, bucket: DueDateBucket) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(event_id.0.as_bytes());
        hasher.update(b"|");
        hasher.update(status.label().as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.key().as_bytes());

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What deduplication keys on: one user, one channel, one `(event, status, bucket)` condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliverySlot {
    pub user_id: UserId,
    pub channel: Channel,
    pub dedup_key: DedupKey,
}

impl DeliverySlot {
    pub fn covers(&self, record: &NotificationRecord) -> bool {
        record.user_id == self.user_id
            && record.channel == self.channel
            && record.dedup_key == self.dedup_key
    }
}

/// A scored, not yet admitted notification for one user on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationCandidate {
    pub event_id: EventId,
    pub entity_id: EntityId,
    pub user_id: UserId,
    pub channel: Channel,
    pub score: u8,
    pub reason: NotificationReason,
    pub status: EventStatus,
    pub title: String,
    pub due_date: NaiveDate,
    pub bucket: DueDateBucket,
    pub dedup_key: DedupKey,
}

/// Immutable audit record written once per attempted channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: RecordId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub channel: Channel,
    pub sent_at: DateTime<Utc>,
    pub dedup_key: DedupKey,
    pub reason: NotificationReason,
    pub score: u8,
    pub delivery_outcome: DeliveryOutcome,
    pub attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Opened,
    Clicked,
    Dismissed,
}

/// User feedback on a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInteraction {
    pub record_id: RecordId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub kind: InteractionKind,
    pub at: DateTime<Utc>,
}

impl NotificationCandidate {
    pub fn slot(&self) -> DeliverySlot {
        DeliverySlot {
            user_id: self.user_id.clone(),
            channel: self.channel,
            dedup_key: self.dedup_key.clone(),
        }
    }
}

impl NotificationRecord {
    pub fn slot(&self) -> DeliverySlot {
        DeliverySlot {
            user_id: self.user_id.clone(),
            channel: self.channel,
            dedup_key: self.dedup_key.clone(),
        }
    }
}
