use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{ComplianceEngine, EngineError};
use crate::notifications::domain::{DeliveryOutcome, NotificationCandidate};
use crate::obligations::domain::{ComplianceEvent, EntityId, EventId, UserId};

/// Cooperative stop signal checked between units of sweep work.
#[derive(Debug, Clone, Default)]
pub struct SweepCancellation {
    flag: Arc<AtomicBool>,
}

impl SweepCancellation {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub run_date: Option<NaiveDate>,
    pub entities_processed: usize,
    pub entities_skipped: usize,
    pub entities_failed: usize,
    pub events_created: usize,
    pub events_transitioned: usize,
    pub events_escalated: usize,
    pub recurrences_created: usize,
    pub candidates: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub duplicates_suppressed: usize,
    pub deferred: usize,
    pub cancelled: bool,
}

/// Phase one output for one entity.
struct EntityOutcome {
    entity_id: EntityId,
    created: usize,
    transitioned: usize,
    escalated: usize,
    recurrences: usize,
    events: Vec<ComplianceEvent>,
    candidates: Vec<NotificationCandidate>,
}

#[derive(Default)]
struct UserOutcome {
    sent: usize,
    failed: usize,
    duplicates: usize,
    deferred: usize,
}

impl ComplianceEngine {
    pub fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        self.run_sweep_with(now, &SweepCancellation::default())
    }

    /// Two-phase sweep over every active entity.
    ///
    /// Phase one materializes, refreshes, and scores each entity on the worker pool. Phase two
    /// gates and dispatches each user's candidates as one batch. An entity is checkpointed for
    /// the run date once all of its candidates were gated, so a resumed sweep skips it.
    pub fn run_sweep_with(
        &self,
        now: DateTime<Utc>,
        cancellation: &SweepCancellation,
    ) -> Result<SweepReport, EngineError> {
        let run_date = now.date_naive();
        let mut report = SweepReport {
            run_date: Some(run_date),
            ..SweepReport::default()
        };

        let done = self.checkpoints.processed(run_date)?;
        let (pending, skipped): (Vec<EntityId>, Vec<EntityId>) = self
            .entities
            .active_entities()?
            .into_iter()
            .partition(|entity_id| !done.contains(entity_id));
        report.entities_skipped = skipped.len();

        let outcomes = self.run_pool(&pending, cancellation, |entity_id| {
            match self.sweep_entity(entity_id, now) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!(%entity_id, error = %err, "sweep failed for entity");
                    None
                }
            }
        });

        let mut events: HashMap<EventId, ComplianceEvent> = HashMap::new();
        let mut by_user: BTreeMap<UserId, Vec<NotificationCandidate>> = BTreeMap::new();
        let mut finished = Vec::new();
        for outcome in outcomes {
            match outcome {
                Some(outcome) => {
                    report.entities_processed += 1;
                    report.events_created += outcome.created;
                    report.events_transitioned += outcome.transitioned;
                    report.events_escalated += outcome.escalated;
                    report.recurrences_created += outcome.recurrences;
                    report.candidates += outcome.candidates.len();
                    for candidate in outcome.candidates.iter().cloned() {
                        by_user
                            .entry(candidate.user_id.clone())
                            .or_default()
                            .push(candidate);
                    }
                    events.extend(
                        outcome
                            .events
                            .into_iter()
                            .map(|event| (event.id.clone(), event)),
                    );
                    finished.push((outcome.entity_id, outcome.candidates));
                }
                None => report.entities_failed += 1,
            }
        }

        let batches: Vec<(UserId, Vec<NotificationCandidate>)> = by_user.into_iter().collect();
        let user_outcomes = self.run_pool(&batches, cancellation, |batch| {
            let (user_id, candidates): &(UserId, Vec<NotificationCandidate>) = batch;
            match self.deliver_batch(candidates.clone(), &events, now) {
                Ok(outcome) => Some((user_id.clone(), outcome)),
                Err(err) => {
                    warn!(%user_id, error = %err, "notification batch failed");
                    None
                }
            }
        });

        let mut gated_users = HashSet::new();
        for (user_id, outcome) in user_outcomes.into_iter().flatten() {
            report.notifications_sent += outcome.sent;
            report.notifications_failed += outcome.failed;
            report.duplicates_suppressed += outcome.duplicates;
            report.deferred += outcome.deferred;
            gated_users.insert(user_id);
        }

        let checkpointed: Vec<EntityId> = finished
            .into_iter()
            .filter(|(_, candidates)| {
                candidates
                    .iter()
                    .all(|candidate| gated_users.contains(&candidate.user_id))
            })
            .map(|(entity_id, _)| entity_id)
            .collect();
        self.checkpoints.mark_processed(run_date, &checkpointed)?;

        report.cancelled = cancellation.is_cancelled();
        info!(
            %run_date,
            entities = report.entities_processed,
            skipped = report.entities_skipped,
            failed = report.entities_failed,
            transitioned = report.events_transitioned,
            sent = report.notifications_sent,
            deferred = report.deferred,
            cancelled = report.cancelled,
            "compliance sweep finished"
        );
        Ok(report)
    }

    /// Runs `work` over `items` on at most `sweep_workers` scoped threads, stopping early once
    /// cancelled. Results keep no particular order.
    fn run_pool<T, R, F>(&self, items: &[T], cancellation: &SweepCancellation, work: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let workers = self.config.sweep_workers.clamp(1, items.len().max(1));
        let next = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(items.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancellation.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    let result = work(item);
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(result);
                });
            }
        });

        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_entity(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<EntityOutcome, EngineError> {
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let entity = self
            .entities
            .fetch(entity_id)?
            .ok_or_else(|| EngineError::EntityNotFound(entity_id.clone()))?;
        let created = self
            .materializer
            .materialize_entity(&entity, self.config.look_ahead_days, now)?;
        let recurrences = self.backfill_recurrences(entity_id, now)?;
        let refresh = self.refresh_events(entity_id, now)?;
        let candidates = self.candidates_for(&entity, &refresh.events, now)?;

        Ok(EntityOutcome {
            entity_id: entity.id,
            created: created.len(),
            transitioned: refresh.changes.len(),
            escalated: refresh.escalations,
            recurrences,
            events: refresh.events,
            candidates,
        })
    }

    /// Spawns missing next cycles for recurring obligations whose latest cycle is closed.
    fn backfill_recurrences(
        &self,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let mut latest: HashMap<_, ComplianceEvent> = HashMap::new();
        for event in self.events.for_entity(entity_id)? {
            if event.recurrence.is_none() {
                continue;
            }
            match latest.get(&event.event_type) {
                Some(current) if current.due_date >= event.due_date => {}
                _ => {
                    latest.insert(event.event_type, event);
                }
            }
        }

        let mut created = 0;
        for event in latest.values() {
            if self.spawn_next_cycle(event, now)?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    }

    fn deliver_batch(
        &self,
        candidates: Vec<NotificationCandidate>,
        events: &HashMap<EventId, ComplianceEvent>,
        now: DateTime<Utc>,
    ) -> Result<UserOutcome, EngineError> {
        let admission = self.gate.admit_batch(candidates, now)?;
        let mut outcome = UserOutcome {
            duplicates: admission.rejected.len(),
            deferred: admission.deferred.len(),
            ..UserOutcome::default()
        };

        let mut accepted = admission.accepted.into_iter();
        while let Some(candidate) = accepted.next() {
            let Some(event) = events.get(&candidate.event_id) else {
                self.gate.release(&candidate);
                continue;
            };
            let record = match self.dispatcher.dispatch(&candidate, event, now) {
                Ok(record) => record,
                Err(err) => {
                    accepted.by_ref().for_each(|rest| self.gate.release(&rest));
                    return Err(err.into());
                }
            };
            match record.delivery_outcome {
                DeliveryOutcome::Sent => outcome.sent += 1,
                DeliveryOutcome::Failed | DeliveryOutcome::Throttled => outcome.failed += 1,
            }
        }
        for candidate in &admission.deferred {
            self.dispatcher.record_deferred(candidate, now)?;
        }
        Ok(outcome)
    }
}
