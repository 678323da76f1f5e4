use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use super::domain::{ComplianceEvent, EventId, EventStatus, Waiver};

/// Status an event should hold on `today`.
///
/// Terminal events are returned unchanged and the result never ranks below the current
/// status, so a shortened window or clock skew cannot move an event backwards.
pub fn derive_status(
    event: &ComplianceEvent,
    today: NaiveDate,
    due_soon_window_days: u32,
) -> EventStatus {
    if event.status.is_terminal() {
        return event.status;
    }

    let derived = if today > event.due_date {
        EventStatus::Overdue
    } else if today >= event.due_date - Duration::days(i64::from(due_soon_window_days)) {
        EventStatus::DueSoon
    } else {
        EventStatus::Pending
    };

    if derived.rank() >= event.status.rank() {
        derived
    } else {
        event.status
    }
}

/// Signal emitted whenever an event's status moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub event_id: EventId,
    pub from: EventStatus,
    pub to: EventStatus,
}

/// What a refresh changed on an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refresh {
    pub change: Option<StatusChange>,
    pub escalated: bool,
}

impl Refresh {
    pub fn is_dirty(&self) -> bool {
        self.change.is_some() || self.escalated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot move event {event_id} from {from} to {attempted}")]
    InvalidTransition {
        event_id: EventId,
        from: EventStatus,
        attempted: EventStatus,
    },
    #[error("a waiver requires a reason")]
    MissingWaiverReason,
}

/// Owns every status mutation of a [`ComplianceEvent`].
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    due_soon_window_days: u32,
    escalate_after_days: u32,
}

impl LifecycleTracker {
    pub fn new(due_soon_window_days: u32, escalate_after_days: u32) -> Self {
        Self {
            due_soon_window_days,
            escalate_after_days,
        }
    }

    pub fn due_soon_window_days(&self) -> u32 {
        self.due_soon_window_days
    }

    /// Applies [`derive_status`] and, once an event has been overdue for longer than the
    /// escalation threshold, raises its priority one level above the assigned one.
    pub fn refresh(&self, event: &mut ComplianceEvent, now: DateTime<Utc>) -> Refresh {
        if event.status.is_terminal() {
            return Refresh::default();
        }

        let today = now.date_naive();
        let next = derive_status(event, today, self.due_soon_window_days);
        let change = (next != event.status).then(|| StatusChange {
            event_id: event.id.clone(),
            from: event.status,
            to: next,
        });
        event.status = next;

        let overdue_days = -event.days_until_due(today);
        let escalated = event.status == EventStatus::Overdue
            && overdue_days > i64::from(self.escalate_after_days)
            && event.priority == event.assigned_priority
            && event.priority.escalated() != event.priority;
        if escalated {
            event.priority = event.priority.escalated();
        }

        Refresh { change, escalated }
    }

    pub fn complete(
        &self,
        event: &mut ComplianceEvent,
        by: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, LifecycleError> {
        let from = self.ensure_open(event, EventStatus::Completed)?;
        event.status = EventStatus::Completed;
        event.completed_at = Some(now);
        event.completed_by = Some(by.to_string());
        Ok(StatusChange {
            event_id: event.id.clone(),
            from,
            to: EventStatus::Completed,
        })
    }

    pub fn waive(
        &self,
        event: &mut ComplianceEvent,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, LifecycleError> {
        if reason.trim().is_empty() {
            return Err(LifecycleError::MissingWaiverReason);
        }
        let from = self.ensure_open(event, EventStatus::Waived)?;
        event.status = EventStatus::Waived;
        event.waiver = Some(Waiver {
            by: by.to_string(),
            reason: reason.trim().to_string(),
            at: now,
        });
        Ok(StatusChange {
            event_id: event.id.clone(),
            from,
            to: EventStatus::Waived,
        })
    }

    fn ensure_open(
        &self,
        event: &ComplianceEvent,
        attempted: EventStatus,
    ) -> Result<EventStatus, LifecycleError> {
        if event.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                event_id: event.id.clone(),
                from: event.status,
                attempted,
            });
        }
        Ok(event.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::domain::{CycleKey, EntityId, EventType, Priority, Recurrence};
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn event(due_date: NaiveDate, priority: Priority) -> ComplianceEvent {
        ComplianceEvent {
            id: EventId("evt-annual".to_string()),
            entity_id: EntityId("ent-1".to_string()),
            event_type: EventType::AnnualReport,
            title: "Annual Report".to_string(),
            description: String::new(),
            due_date,
            recurrence: Some(Recurrence::annual()),
            anchor_date: due_date,
            cycle: CycleKey::for_due_date(due_date, Some(&Recurrence::annual())),
            assigned_priority: priority,
            priority,
            status: EventStatus::Pending,
            created_at: at(2023, 12, 1),
            completed_at: None,
            completed_by: None,
            waiver: None,
        }
    }

    #[test]
    fn derive_status_walks_forward_through_window() {
        let event = event(date(2024, 1, 10), Priority::Medium);
        assert_eq!(derive_status(&event, date(2023, 12, 10), 30), EventStatus::Pending);
        assert_eq!(derive_status(&event, date(2023, 12, 11), 30), EventStatus::DueSoon);
        assert_eq!(derive_status(&event, date(2024, 1, 10), 30), EventStatus::DueSoon);
        assert_eq!(derive_status(&event, date(2024, 1, 11), 30), EventStatus::Overdue);
    }

    #[test]
    fn derive_status_never_regresses() {
        let mut event = event(date(2024, 1, 10), Priority::Medium);
        event.status = EventStatus::Overdue;
        assert_eq!(derive_status(&event, date(2023, 11, 1), 30), EventStatus::Overdue);

        event.status = EventStatus::Waived;
        assert_eq!(derive_status(&event, date(2024, 6, 1), 30), EventStatus::Waived);
    }

    #[test]
    fn refresh_reports_status_change_once() {
        let tracker = LifecycleTracker::new(30, 7);
        let mut event = event(date(2024, 1, 10), Priority::Medium);

        let refresh = tracker.refresh(&mut event, at(2024, 1, 1));
        assert_eq!(
            refresh.change,
            Some(StatusChange {
                event_id: event.id.clone(),
                from: EventStatus::Pending,
                to: EventStatus::DueSoon,
            })
        );
        assert!(!tracker.refresh(&mut event, at(2024, 1, 2)).is_dirty());
    }

    #[test]
    fn refresh_escalates_priority_after_threshold_once() {
        let tracker = LifecycleTracker::new(30, 7);
        let mut event = event(date(2024, 1, 10), Priority::Low);

        let early = tracker.refresh(&mut event, at(2024, 1, 15));
        assert!(!early.escalated);
        assert_eq!(event.priority, Priority::Low);

        let late = tracker.refresh(&mut event, at(2024, 1, 20));
        assert!(late.escalated);
        assert_eq!(event.priority, Priority::Medium);

        let later = tracker.refresh(&mut event, at(2024, 2, 20));
        assert!(!later.escalated);
        assert_eq!(event.priority, Priority::Medium);
    }

    #[test]
    fn complete_sets_timestamp_and_rejects_repeat() {
        let tracker = LifecycleTracker::new(30, 7);
        let mut event = event(date(2024, 1, 10), Priority::Medium);
        event.status = EventStatus::Overdue;

        let change = tracker
            .complete(&mut event, "owner@example.com", at(2024, 1, 12))
            .expect("overdue events can be completed");
        assert_eq!(change.from, EventStatus::Overdue);
        assert_eq!(event.completed_at, Some(at(2024, 1, 12)));

        match tracker.complete(&mut event, "owner@example.com", at(2024, 1, 13)) {
            Err(LifecycleError::InvalidTransition { from, .. }) => {
                assert_eq!(from, EventStatus::Completed)
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
        assert_eq!(event.completed_at, Some(at(2024, 1, 12)));
    }

    #[test]
    fn waive_requires_reason_and_open_event() {
        let tracker = LifecycleTracker::new(30, 7);
        let mut event = event(date(2024, 1, 10), Priority::Medium);

        assert_eq!(
            tracker.waive(&mut event, "admin", "  ", at(2024, 1, 1)),
            Err(LifecycleError::MissingWaiverReason)
        );

        tracker
            .waive(&mut event, "admin", "entity dissolved", at(2024, 1, 1))
            .expect("pending events can be waived");
        assert_eq!(event.status, EventStatus::Waived);
        assert!(event.completed_at.is_none());
        assert!(tracker
            .waive(&mut event, "admin", "again", at(2024, 1, 2))
            .is_err());
    }
}
