use chrono::NaiveDate;

use super::config::ScoringConfig;
use super::{ScoreComponent, ScoreFactor};
use crate::notifications::domain::NotificationReason;
use crate::notifications::profile::UserNotificationProfile;
use crate::obligations::domain::{ComplianceEvent, EventStatus};

pub(crate) struct ScoredEvent {
    pub components: Vec<ScoreComponent>,
    pub total: f32,
    pub reason: NotificationReason,
}

pub(crate) fn score_event(
    event: &ComplianceEvent,
    profile: &UserNotificationProfile,
    today: NaiveDate,
    config: &ScoringConfig,
    due_soon_window_days: u32,
) -> Option<ScoredEvent> {
    let mut components = Vec::new();
    let days_remaining = event.days_until_due(today);

    let (base, mut reason) = match event.status {
        EventStatus::Overdue => (config.overdue_base, NotificationReason::Overdue),
        EventStatus::DueSoon => (config.due_soon_base, NotificationReason::DeadlineApproaching),
        EventStatus::Pending | EventStatus::Completed | EventStatus::Waived => return None,
    };
    components.push(ScoreComponent {
        factor: ScoreFactor::Base,
        delta: f32::from(base),
        notes: format!("{} base", event.status),
    });
    let mut total = f32::from(base);

    if event.status == EventStatus::DueSoon {
        let closer_by = i64::from(due_soon_window_days) - days_remaining.max(0);
        let bonus = closer_by.clamp(0, i64::from(config.proximity_cap)) as f32;
        if bonus > 0.0 {
            components.push(ScoreComponent {
                factor: ScoreFactor::Proximity,
                delta: bonus,
                notes: format!("{days_remaining} days remaining"),
            });
            total += bonus;
        }
    }

    let weight = config.weight_for(event.priority);
    let weighted = total * weight;
    if (weighted - total).abs() > f32::EPSILON {
        components.push(ScoreComponent {
            factor: ScoreFactor::PriorityWeight,
            delta: weighted - total,
            notes: format!("{} priority x{weight:.1}", event.priority.label()),
        });
    }
    total = weighted;

    let overdue_days = -days_remaining;
    if event.status == EventStatus::Overdue
        && overdue_days > i64::from(config.escalate_after_days)
        && !profile.acknowledged(&event.id)
    {
        components.push(ScoreComponent {
            factor: ScoreFactor::Escalation,
            delta: f32::from(config.escalation_bonus),
            notes: format!("overdue {overdue_days} days without acknowledgement"),
        });
        total += f32::from(config.escalation_bonus);
        reason = NotificationReason::Escalation;
    }

    let dismissals = profile.trailing_dismissals(&event.id);
    if config.damping_dismissals > 0 && dismissals >= config.damping_dismissals {
        let damped = total * config.damping_factor;
        components.push(ScoreComponent {
            factor: ScoreFactor::Damping,
            delta: damped - total,
            notes: format!("{dismissals} consecutive dismissals"),
        });
        total = damped;
    }

    if event.status == EventStatus::Overdue && total < f32::from(config.overdue_floor) {
        let floor = f32::from(config.overdue_floor);
        components.push(ScoreComponent {
            factor: ScoreFactor::OverdueFloor,
            delta: floor - total,
            notes: format!("overdue events never score below {}", config.overdue_floor),
        });
        total = floor;
    }

    Some(ScoredEvent {
        components,
        total,
        reason,
    })
}
