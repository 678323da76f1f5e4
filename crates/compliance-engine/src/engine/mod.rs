//! Service layer composing the obligation lifecycle with notification delivery.

pub mod router;
mod sweep;

#[cfg(test)]
mod tests;

pub use router::engine_router;
pub use sweep::{SweepCancellation, SweepReport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::notifications::dispatcher::{ChannelSenders, Dispatcher, PreferenceStore};
use crate::notifications::domain::{
    DedupKey, DueDateBucket, InteractionKind, NotificationCandidate, NotificationInteraction,
    NotificationRecord, RecordId,
};
use crate::notifications::gate::{GateDecision, ThrottleGate};
use crate::notifications::profile::UserNotificationProfile;
use crate::notifications::scoring::NotificationScorer;
use crate::obligations::domain::{
    BusinessEntity, ComplianceEvent, EntityId, EventId, EventStatus, UserId,
};
use crate::obligations::lifecycle::{LifecycleError, LifecycleTracker, Refresh, StatusChange};
use crate::obligations::materializer::{EventMaterializer, MaterializeError};
use crate::obligations::recurrence::RecurrenceGenerator;
use crate::obligations::rules::RulesProvider;
use crate::repository::{
    CheckpointStore, EntityDirectory, EventRepository, NotificationRepository, RateCounter,
    RepositoryError,
};

const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Collaborators the engine is wired with.
#[derive(Clone)]
pub struct EngineDependencies {
    pub rules: Arc<dyn RulesProvider>,
    pub entities: Arc<dyn EntityDirectory>,
    pub events: Arc<dyn EventRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub rate_counter: Arc<dyn RateCounter>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub senders: ChannelSenders,
}

/// Error raised by the compliance engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("event {0} not found")]
    EventNotFound(EventId),
    #[error("notification {0} not found")]
    RecordNotFound(RecordId),
    #[error("event {0} kept changing concurrently; retry the request")]
    ConcurrentUpdate(EventId),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<MaterializeError> for EngineError {
    fn from(value: MaterializeError) -> Self {
        match value {
            MaterializeError::EntityNotFound(id) => Self::EntityNotFound(id),
            MaterializeError::Repository(err) => Self::Repository(err),
        }
    }
}

/// Result of completing or waiving an event.
#[derive(Debug, Clone, Serialize)]
pub struct EventTransition {
    pub event: ComplianceEvent,
    pub change: StatusChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cycle: Option<ComplianceEvent>,
}

/// Per-entity view grouping events by urgency.
#[derive(Debug, Clone, Serialize)]
pub struct EntityDashboard {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub as_of: NaiveDate,
    pub overdue: Vec<ComplianceEvent>,
    pub due_soon: Vec<ComplianceEvent>,
    pub pending: Vec<ComplianceEvent>,
    pub closed: Vec<ComplianceEvent>,
}

/// What a refresh pass over one entity's events changed.
#[derive(Debug, Default)]
pub(crate) struct EntityRefresh {
    pub events: Vec<ComplianceEvent>,
    pub changes: Vec<StatusChange>,
    pub escalations: usize,
}

pub struct ComplianceEngine {
    config: EngineConfig,
    entities: Arc<dyn EntityDirectory>,
    events: Arc<dyn EventRepository>,
    notifications: Arc<dyn NotificationRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    materializer: Arc<EventMaterializer>,
    lifecycle: LifecycleTracker,
    recurrence: RecurrenceGenerator,
    scorer: NotificationScorer,
    gate: ThrottleGate,
    dispatcher: Dispatcher,
    entity_locks: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl ComplianceEngine {
    pub fn new(mut config: EngineConfig, deps: EngineDependencies) -> Self {
        config.scoring.escalate_after_days = config.escalate_after_days;
        let materializer = Arc::new(EventMaterializer::new(
            deps.rules,
            deps.entities.clone(),
            deps.events.clone(),
        ));
        let lifecycle =
            LifecycleTracker::new(config.due_soon_window_days, config.escalate_after_days);
        let recurrence = RecurrenceGenerator::new(materializer.clone());
        let scorer = NotificationScorer::new(config.scoring.clone(), config.due_soon_window_days);
        let gate = ThrottleGate::new(
            config.throttle(),
            deps.notifications.clone(),
            deps.rate_counter,
        );
        let dispatcher = Dispatcher::new(
            config.dispatch(),
            deps.preferences,
            deps.senders,
            deps.notifications.clone(),
        );

        Self {
            config,
            entities: deps.entities,
            events: deps.events,
            notifications: deps.notifications,
            checkpoints: deps.checkpoints,
            materializer,
            lifecycle,
            recurrence,
            scorer,
            gate,
            dispatcher,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Materializes the entity's obligations inside the configured look-ahead window.
    pub fn materialize(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComplianceEvent>, EngineError> {
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .materializer
            .materialize(entity_id, self.config.look_ahead_days, now)?)
    }

    /// Open events due between today and `within_days` from today, soonest first.
    pub fn list_upcoming(
        &self,
        entity_id: &EntityId,
        within_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComplianceEvent>, EngineError> {
        let today = now.date_naive();
        let horizon = today + Duration::days(i64::from(within_days));
        let (_, refresh) =
            self.sync_entity(entity_id, within_days.max(self.config.look_ahead_days), now)?;

        Ok(refresh
            .events
            .into_iter()
            .filter(|event| {
                event.is_active() && event.due_date >= today && event.due_date <= horizon
            })
            .collect())
    }

    pub fn list_overdue(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComplianceEvent>, EngineError> {
        let (_, refresh) = self.sync_entity(entity_id, self.config.look_ahead_days, now)?;
        Ok(refresh
            .events
            .into_iter()
            .filter(|event| event.status == EventStatus::Overdue)
            .collect())
    }

    pub fn dashboard(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<EntityDashboard, EngineError> {
        let (entity, refresh) = self.sync_entity(entity_id, self.config.look_ahead_days, now)?;
        let mut dashboard = EntityDashboard {
            entity_id: entity.id,
            entity_name: entity.name,
            as_of: now.date_naive(),
            overdue: Vec::new(),
            due_soon: Vec::new(),
            pending: Vec::new(),
            closed: Vec::new(),
        };
        for event in refresh.events {
            match event.status {
                EventStatus::Overdue => dashboard.overdue.push(event),
                EventStatus::DueSoon => dashboard.due_soon.push(event),
                EventStatus::Pending => dashboard.pending.push(event),
                EventStatus::Completed | EventStatus::Waived => dashboard.closed.push(event),
            }
        }
        Ok(dashboard)
    }

    pub fn mark_completed(
        &self,
        event_id: &EventId,
        by: &str,
        now: DateTime<Utc>,
    ) -> Result<EventTransition, EngineError> {
        self.transition(event_id, now, |tracker, event| tracker.complete(event, by, now))
    }

    pub fn mark_waived(
        &self,
        event_id: &EventId,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EventTransition, EngineError> {
        self.transition(event_id, now, |tracker, event| {
            tracker.waive(event, by, reason, now)
        })
    }

    /// Stores user feedback against the notification it refers to.
    pub fn record_interaction(
        &self,
        record_id: &RecordId,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> Result<NotificationInteraction, EngineError> {
        let record = self
            .notifications
            .fetch(record_id)?
            .ok_or_else(|| EngineError::RecordNotFound(record_id.clone()))?;
        let interaction = NotificationInteraction {
            record_id: record.id,
            event_id: record.event_id,
            user_id: record.user_id,
            kind,
            at: now,
        };
        self.notifications.record_interaction(interaction.clone())?;
        Ok(interaction)
    }

    /// Audit trail for one user, newest first.
    pub fn notification_history(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<NotificationRecord>, EngineError> {
        Ok(self.notifications.for_user(user_id)?)
    }

    fn transition<F>(
        &self,
        event_id: &EventId,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<EventTransition, EngineError>
    where
        F: Fn(&LifecycleTracker, &mut ComplianceEvent) -> Result<StatusChange, LifecycleError>,
    {
        let entity_id = self
            .events
            .fetch(event_id)?
            .ok_or_else(|| EngineError::EventNotFound(event_id.clone()))?
            .entity_id;
        let lock = self.entity_lock(&entity_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let mut event = self
                .events
                .fetch(event_id)?
                .ok_or_else(|| EngineError::EventNotFound(event_id.clone()))?;
            let change = apply(&self.lifecycle, &mut event)?;

            match self.events.update(event.clone(), change.from) {
                Ok(()) => {}
                Err(RepositoryError::Conflict) => {
                    debug!(%event_id, "event changed during transition; retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            info!(%event_id, from = %change.from, to = %change.to, "compliance event closed");
            let next_cycle = self.spawn_next_cycle(&event, now)?;
            return Ok(EventTransition {
                event,
                change,
                next_cycle,
            });
        }

        Err(EngineError::ConcurrentUpdate(event_id.clone()))
    }

    /// Materializes and refreshes one entity under its lock.
    fn sync_entity(
        &self,
        entity_id: &EntityId,
        look_ahead_days: u32,
        now: DateTime<Utc>,
    ) -> Result<(BusinessEntity, EntityRefresh), EngineError> {
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let entity = self
            .entities
            .fetch(entity_id)?
            .ok_or_else(|| EngineError::EntityNotFound(entity_id.clone()))?;
        self.materializer
            .materialize_entity(&entity, look_ahead_days, now)?;
        let refresh = self.refresh_events(entity_id, now)?;
        Ok((entity, refresh))
    }

    /// Applies the lifecycle to every open event and persists what moved. Callers hold the
    /// entity lock.
    pub(crate) fn refresh_events(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<EntityRefresh, EngineError> {
        let mut result = EntityRefresh::default();

        for mut event in self.events.for_entity(entity_id)? {
            let previous = event.status;
            let refresh: Refresh = self.lifecycle.refresh(&mut event, now);
            if refresh.is_dirty() {
                match self.events.update(event.clone(), previous) {
                    Ok(()) => {
                        if refresh.escalated {
                            result.escalations += 1;
                            info!(event_id = %event.id, priority = event.priority.label(), "priority escalated");
                        }
                        result.changes.extend(refresh.change);
                    }
                    Err(RepositoryError::Conflict) => {
                        debug!(event_id = %event.id, "event changed concurrently; keeping stored copy");
                        if let Some(stored) = self.events.fetch(&event.id)? {
                            event = stored;
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            result.events.push(event);
        }
        Ok(result)
    }

    /// Scored candidates for every owner and enabled channel of the entity's open events.
    pub(crate) fn candidates_for(
        &self,
        entity: &BusinessEntity,
        events: &[ComplianceEvent],
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationCandidate>, EngineError> {
        let today = now.date_naive();
        let since = now - Duration::days(i64::from(self.config.dedup_window_days));
        let mut candidates = Vec::new();

        for owner in &entity.owners {
            let interactions = self.notifications.interactions_for(owner, since)?;
            let profile = UserNotificationProfile::from_interactions(&interactions);
            let channels = self.dispatcher.channels_for(owner);

            for event in events.iter().filter(|event| event.is_active()) {
                let Some(score) = self.scorer.score(event, &profile, now) else {
                    continue;
                };
                let bucket = self
                    .gate
                    .config()
                    .bucket(event.days_until_due(today), self.config.escalate_after_days);
                let dedup_key = DedupKey::derive(&event.id, event.status, bucket);
                for channel in &channels {
                    candidates.push(NotificationCandidate {
                        event_id: event.id.clone(),
                        entity_id: entity.id.clone(),
                        user_id: owner.clone(),
                        channel: *channel,
                        score: score.score,
                        reason: score.reason,
                        status: event.status,
                        title: event.title.clone(),
                        due_date: event.due_date,
                        bucket,
                        dedup_key: dedup_key.clone(),
                    });
                }
            }
        }
        Ok(candidates)
    }

    /// Creates the cycle after a closed event and notifies the owners about it.
    pub(crate) fn spawn_next_cycle(
        &self,
        closed: &ComplianceEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ComplianceEvent>, EngineError> {
        let next_cycle = self.recurrence.on_terminal(closed, now)?;
        if let Some(next) = &next_cycle {
            self.notify_recurrence(next, now);
        }
        Ok(next_cycle)
    }

    /// Tells the entity's owners a new cycle exists. Failures are logged, never raised.
    fn notify_recurrence(&self, next: &ComplianceEvent, now: DateTime<Utc>) {
        let entity = match self.entities.fetch(&next.entity_id) {
            Ok(Some(entity)) => entity,
            Ok(None) => return,
            Err(err) => {
                warn!(entity_id = %next.entity_id, error = %err, "cannot load owners for recurrence notice");
                return;
            }
        };

        let score = self.scorer.score_recurrence_notice(next);
        let dedup_key = DedupKey::derive(&next.id, next.status, DueDateBucket::Created);
        for owner in &entity.owners {
            for channel in self.dispatcher.channels_for(owner) {
                let candidate = NotificationCandidate {
                    event_id: next.id.clone(),
                    entity_id: entity.id.clone(),
                    user_id: owner.clone(),
                    channel,
                    score: score.score,
                    reason: score.reason,
                    status: next.status,
                    title: next.title.clone(),
                    due_date: next.due_date,
                    bucket: DueDateBucket::Created,
                    dedup_key: dedup_key.clone(),
                };
                let outcome = match self.gate.admit(&candidate, now) {
                    Ok(GateDecision::Accepted) => {
                        self.dispatcher.dispatch(&candidate, next, now).map(|_| ())
                    }
                    Ok(GateDecision::Deferred(_)) => {
                        self.dispatcher.record_deferred(&candidate, now).map(|_| ())
                    }
                    Ok(GateDecision::Rejected(_)) => Ok(()),
                    Err(err) => Err(err),
                };
                if let Err(err) = outcome {
                    warn!(user_id = %owner, event_id = %next.id, error = %err, "recurrence notice not recorded");
                }
            }
        }
    }

    pub(crate) fn entity_lock(&self, entity_id: &EntityId) -> Arc<Mutex<()>> {
        let mut locks = self
            .entity_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
