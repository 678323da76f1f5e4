mod config;
mod rules;

pub use config::ScoringConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::NotificationReason;
use super::profile::UserNotificationProfile;
use crate::obligations::domain::ComplianceEvent;

/// Stateless scorer turning an event and the recipient's engagement into a 0..=100 urgency.
#[derive(Debug, Clone)]
pub struct NotificationScorer {
    config: ScoringConfig,
    due_soon_window_days: u32,
}

impl NotificationScorer {
    pub fn new(config: ScoringConfig, due_soon_window_days: u32) -> Self {
        Self {
            config,
            due_soon_window_days,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// `None` when the event should not notify: pending, terminal, or below the threshold.
    pub fn score(
        &self,
        event: &ComplianceEvent,
        profile: &UserNotificationProfile,
        now: DateTime<Utc>,
    ) -> Option<NotificationScore> {
        let scored = rules::score_event(
            event,
            profile,
            now.date_naive(),
            &self.config,
            self.due_soon_window_days,
        )?;

        let score = scored.total.round().clamp(0.0, 100.0) as u8;
        if score < self.config.minimum_score {
            return None;
        }

        Some(NotificationScore {
            score,
            reason: scored.reason,
            components: scored.components,
        })
    }

    /// Informational score for a freshly spawned recurrence cycle.
    pub fn score_recurrence_notice(&self, event: &ComplianceEvent) -> NotificationScore {
        let score = self.config.recurrence_notice_score.min(100);
        NotificationScore {
            score,
            reason: NotificationReason::RecurrenceCreated,
            components: vec![ScoreComponent {
                factor: ScoreFactor::Base,
                delta: f32::from(score),
                notes: format!("next cycle due {}", event.due_date),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    Base,
    Proximity,
    PriorityWeight,
    Escalation,
    Damping,
    OverdueFloor,
}

/// Discrete contribution to a score, kept for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: ScoreFactor,
    pub delta: f32,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationScore {
    pub score: u8,
    pub reason: NotificationReason,
    pub components: Vec<ScoreComponent>,
}
