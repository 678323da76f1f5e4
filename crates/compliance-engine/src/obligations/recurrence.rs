use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{ComplianceEvent, CycleKey, EventId, EventStatus};
use super::materializer::EventMaterializer;
use crate::repository::RepositoryError;

/// Spawns the following cycle of a recurring obligation once the current one is terminal.
pub struct RecurrenceGenerator {
    materializer: Arc<EventMaterializer>,
}

impl RecurrenceGenerator {
    pub fn new(materializer: Arc<EventMaterializer>) -> Self {
        Self { materializer }
    }

    /// Returns the newly created event, or `None` when the event is not terminal, does not
    /// recur, or its next cycle already exists.
    pub fn on_terminal(
        &self,
        event: &ComplianceEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ComplianceEvent>, RepositoryError> {
        let Some(next) = next_cycle(event, now) else {
            return Ok(None);
        };

        let created = self.materializer.insert_unique(next)?;
        if let Some(created) = &created {
            info!(
                previous = %event.id,
                next = %created.id,
                due_date = %created.due_date,
                "spawned next compliance cycle"
            );
        }
        Ok(created)
    }
}

/// Builds the occurrence that follows the previous due date, never `now`, so late completion
/// keeps the calendar alignment. Dates are counted from the anchor, which keeps month-end
/// anchors from drifting after a clamped month.
pub fn next_cycle(event: &ComplianceEvent, now: DateTime<Utc>) -> Option<ComplianceEvent> {
    if !event.status.is_terminal() {
        return None;
    }
    let recurrence = event.recurrence?;
    let due_date = recurrence.first_on_or_after(event.anchor_date, event.due_date.succ_opt()?)?;

    Some(ComplianceEvent {
        id: EventId::generate(),
        entity_id: event.entity_id.clone(),
        event_type: event.event_type,
        title: event.title.clone(),
        description: event.description.clone(),
        due_date,
        recurrence: Some(recurrence),
        anchor_date: event.anchor_date,
        cycle: CycleKey::for_due_date(due_date, Some(&recurrence)),
        assigned_priority: event.assigned_priority,
        priority: event.assigned_priority,
        status: EventStatus::Pending,
        created_at: now,
        completed_at: None,
        completed_by: None,
        waiver: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::domain::{EntityId, EventType, IntervalUnit, Priority, Recurrence};
    use crate::obligations::materializer::next_occurrence;
    use crate::obligations::rules::ObligationTemplate;
    use chrono::{NaiveDate, TimeZone};

    fn completed_event(due_date: NaiveDate, recurrence: Option<Recurrence>) -> ComplianceEvent {
        ComplianceEvent {
            id: EventId("evt-prev".to_string()),
            entity_id: EntityId("ent-1".to_string()),
            event_type: EventType::AnnualReport,
            title: "Annual Report".to_string(),
            description: String::new(),
            due_date,
            recurrence,
            anchor_date: due_date,
            cycle: CycleKey::for_due_date(due_date, recurrence.as_ref()),
            assigned_priority: Priority::Medium,
            priority: Priority::High,
            status: EventStatus::Completed,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            completed_at: Some(Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap()),
            completed_by: Some("owner".to_string()),
            waiver: None,
        }
    }

    #[test]
    fn next_cycle_is_aligned_to_previous_due_date() {
        let due = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let previous = completed_event(due, Some(Recurrence::annual()));
        let completed_late = Utc.with_ymd_and_hms(2024, 4, 2, 16, 30, 0).unwrap();

        let next = next_cycle(&previous, completed_late).expect("annual event recurs");
        assert_eq!(next.due_date, NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());
        assert_eq!(next.cycle, CycleKey("2025".to_string()));
        assert_eq!(next.status, EventStatus::Pending);
        assert_eq!(next.priority, Priority::Medium, "escalation does not carry over");
    }

    #[test]
    fn one_time_and_open_events_do_not_recur() {
        let due = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
        assert!(next_cycle(&completed_event(due, None), now).is_none());

        let mut open = completed_event(due, Some(Recurrence::annual()));
        open.status = EventStatus::Overdue;
        assert!(next_cycle(&open, now).is_none());
    }

    #[test]
    fn month_end_anchor_does_not_drift_after_short_month() {
        let monthly = Recurrence::every(IntervalUnit::Month, 1);
        let anchor = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let february = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut previous = completed_event(february, Some(monthly));
        previous.anchor_date = anchor;
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let next = next_cycle(&previous, now).expect("monthly event recurs");
        assert_eq!(next.due_date, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(next.anchor_date, anchor);

        let template = ObligationTemplate {
            event_type: EventType::TaxFiling,
            title: "Sales Tax Return".to_string(),
            description: String::new(),
            recurrence: Some(monthly),
            anchor_offset_days: 0,
            priority: Priority::Medium,
        };
        assert_eq!(
            next_occurrence(&template, anchor, now.date_naive()),
            Some(next.due_date),
            "materializer and recurrence agree on the cycle date"
        );
    }
}
