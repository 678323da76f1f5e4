use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::domain::{BusinessEntity, ComplianceEvent, CycleKey, EntityId, EventId, EventStatus};
use super::rules::{ObligationTemplate, RuleLookup, RulesProvider};
use crate::repository::{EntityDirectory, EventRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Expands obligation templates into dated events inside a look-ahead window.
pub struct EventMaterializer {
    rules: Arc<dyn RulesProvider>,
    entities: Arc<dyn EntityDirectory>,
    events: Arc<dyn EventRepository>,
}

impl EventMaterializer {
    pub fn new(
        rules: Arc<dyn RulesProvider>,
        entities: Arc<dyn EntityDirectory>,
        events: Arc<dyn EventRepository>,
    ) -> Self {
        Self {
            rules,
            entities,
            events,
        }
    }

    /// Creates the events whose next occurrence falls in `[today, today + look_ahead_days]`.
    /// Returns only the events created by this call.
    pub fn materialize(
        &self,
        entity_id: &EntityId,
        look_ahead_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComplianceEvent>, MaterializeError> {
        let entity = self
            .entities
            .fetch(entity_id)?
            .ok_or_else(|| MaterializeError::EntityNotFound(entity_id.clone()))?;
        self.materialize_entity(&entity, look_ahead_days, now)
    }

    pub fn materialize_entity(
        &self,
        entity: &BusinessEntity,
        look_ahead_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComplianceEvent>, MaterializeError> {
        let templates = match self
            .rules
            .obligations(entity.entity_type, &entity.jurisdiction)
        {
            Ok(RuleLookup::Supported(templates)) => templates,
            Ok(RuleLookup::Unsupported { reason }) => {
                warn!(entity_id = %entity.id, jurisdiction = %entity.jurisdiction, %reason, "no obligations for entity");
                return Ok(Vec::new());
            }
            Err(err) => {
                warn!(entity_id = %entity.id, error = %err, "rules provider failed; treating as zero obligations");
                return Ok(Vec::new());
            }
        };

        let today = now.date_naive();
        let horizon = today + Duration::days(i64::from(look_ahead_days));
        let mut created = Vec::new();

        for template in &templates {
            let Some(anchor) = anchor_date(template, entity.formation_date) else {
                continue;
            };
            let Some(due_date) = next_occurrence(template, entity.formation_date, today) else {
                continue;
            };
            if due_date > horizon {
                continue;
            }

            let event = build_event(entity, template, due_date, anchor, now);
            if let Some(stored) = self.insert_unique(event)? {
                created.push(stored);
            }
        }

        if !created.is_empty() {
            info!(entity_id = %entity.id, created = created.len(), "materialized compliance events");
        }

        Ok(created)
    }

    /// Inserts through the repository's uniqueness constraint. A conflict means the cycle
    /// already exists (or a concurrent writer won) and yields `Ok(None)`.
    pub(crate) fn insert_unique(
        &self,
        event: ComplianceEvent,
    ) -> Result<Option<ComplianceEvent>, RepositoryError> {
        let (entity_id, event_type, cycle) =
            (event.entity_id.clone(), event.event_type, event.cycle.clone());
        match self.events.insert(event) {
            Ok(stored) => Ok(Some(stored)),
            Err(RepositoryError::Conflict) => {
                debug!(%entity_id, ?event_type, %cycle, "cycle already materialized");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// First occurrence of `template` due on or after `today`.
///
/// One-time obligations occur once at `formation_date + anchor_offset_days`; recurring ones
/// at that base plus `k` intervals for `k >= 1`.
pub fn next_occurrence(
    template: &ObligationTemplate,
    formation_date: NaiveDate,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let base = anchor_date(template, formation_date)?;

    let Some(recurrence) = template.recurrence else {
        return (base >= today).then_some(base);
    };

    recurrence.first_on_or_after(base, today)
}

fn anchor_date(template: &ObligationTemplate, formation_date: NaiveDate) -> Option<NaiveDate> {
    formation_date.checked_add_signed(Duration::days(template.anchor_offset_days))
}

fn build_event(
    entity: &BusinessEntity,
    template: &ObligationTemplate,
    due_date: NaiveDate,
    anchor_date: NaiveDate,
    now: DateTime<Utc>,
) -> ComplianceEvent {
    ComplianceEvent {
        id: EventId::generate(),
        entity_id: entity.id.clone(),
        event_type: template.event_type,
        title: template.title.clone(),
        description: template.description.clone(),
        due_date,
        recurrence: template.recurrence,
        anchor_date,
        cycle: CycleKey::for_due_date(due_date, template.recurrence.as_ref()),
        assigned_priority: template.priority,
        priority: template.priority,
        status: EventStatus::Pending,
        created_at: now,
        completed_at: None,
        completed_by: None,
        waiver: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::domain::{EventType, IntervalUnit, Priority, Recurrence};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn template(recurrence: Option<Recurrence>, offset: i64) -> ObligationTemplate {
        ObligationTemplate {
            event_type: EventType::AnnualReport,
            title: "Annual Report".to_string(),
            description: String::new(),
            recurrence,
            anchor_offset_days: offset,
            priority: Priority::Medium,
        }
    }

    #[test]
    fn annual_occurrence_lands_on_next_anniversary() {
        let annual = template(Some(Recurrence::annual()), 0);
        assert_eq!(
            next_occurrence(&annual, date(2023, 1, 10), date(2024, 1, 1)),
            Some(date(2024, 1, 10))
        );
        assert_eq!(
            next_occurrence(&annual, date(2023, 1, 10), date(2024, 1, 11)),
            Some(date(2025, 1, 10))
        );
    }

    #[test]
    fn first_recurring_occurrence_skips_formation_date() {
        let annual = template(Some(Recurrence::annual()), 0);
        assert_eq!(
            next_occurrence(&annual, date(2023, 1, 10), date(2023, 1, 1)),
            Some(date(2024, 1, 10))
        );
    }

    #[test]
    fn quarterly_occurrence_uses_offset_base() {
        let quarterly = template(Some(Recurrence::every(IntervalUnit::Quarter, 1)), 15);
        assert_eq!(
            next_occurrence(&quarterly, date(2020, 1, 1), date(2024, 5, 20)),
            Some(date(2024, 7, 16))
        );
    }

    #[test]
    fn one_time_obligation_expires_after_base() {
        let once = template(None, 90);
        assert_eq!(
            next_occurrence(&once, date(2024, 1, 1), date(2024, 2, 1)),
            Some(date(2024, 3, 31))
        );
        assert_eq!(next_occurrence(&once, date(2024, 1, 1), date(2024, 4, 1)), None);
    }
}
