//! Process-local implementations of the storage seams, used by the service binary and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use crate::notifications::dispatcher::{
    ChannelPreferences, PreferenceError, PreferenceStore, UserContact,
};
use crate::notifications::domain::{
    DeliveryOutcome, DeliverySlot, NotificationInteraction, NotificationRecord, RecordId,
};
use crate::obligations::domain::{
    BusinessEntity, ComplianceEvent, CycleKey, EntityId, EventId, EventStatus, EventType, UserId,
};
use crate::repository::{
    CheckpointStore, EntityDirectory, EventRepository, NotificationRepository, RateCounter,
    RepositoryError,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
}

#[derive(Debug, Default)]
pub struct InMemoryEntityDirectory {
    entities: Mutex<BTreeMap<EntityId, BusinessEntity>>,
}

impl InMemoryEntityDirectory {
    pub fn with_entities(entities: impl IntoIterator<Item = BusinessEntity>) -> Self {
        Self {
            entities: Mutex::new(
                entities
                    .into_iter()
                    .map(|entity| (entity.id.clone(), entity))
                    .collect(),
            ),
        }
    }

    pub fn upsert(&self, entity: BusinessEntity) -> Result<(), RepositoryError> {
        lock(&self.entities)?.insert(entity.id.clone(), entity);
        Ok(())
    }
}

impl EntityDirectory for InMemoryEntityDirectory {
    fn fetch(&self, id: &EntityId) -> Result<Option<BusinessEntity>, RepositoryError> {
        Ok(lock(&self.entities)?.get(id).cloned())
    }

    fn active_entities(&self) -> Result<Vec<EntityId>, RepositoryError> {
        Ok(lock(&self.entities)?
            .values()
            .filter(|entity| entity.active)
            .map(|entity| entity.id.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
struct EventTable {
    events: HashMap<EventId, ComplianceEvent>,
    cycles: HashMap<(EntityId, EventType, CycleKey), EventId>,
}

/// Event store enforcing the `(entity, event type, cycle)` uniqueness constraint.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    table: Mutex<EventTable>,
}

impl EventRepository for InMemoryEventRepository {
    fn insert(&self, event: ComplianceEvent) -> Result<ComplianceEvent, RepositoryError> {
        let mut table = lock(&self.table)?;
        let cycle = (
            event.entity_id.clone(),
            event.event_type,
            event.cycle.clone(),
        );
        if table.cycles.contains_key(&cycle) || table.events.contains_key(&event.id) {
            return Err(RepositoryError::Conflict);
        }
        table.cycles.insert(cycle, event.id.clone());
        table.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    fn update(
        &self,
        event: ComplianceEvent,
        expected: EventStatus,
    ) -> Result<(), RepositoryError> {
        let mut table = lock(&self.table)?;
        let stored = table
            .events
            .get_mut(&event.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict);
        }
        *stored = event;
        Ok(())
    }

    fn fetch(&self, id: &EventId) -> Result<Option<ComplianceEvent>, RepositoryError> {
        Ok(lock(&self.table)?.events.get(id).cloned())
    }

    fn for_entity(&self, entity_id: &EntityId) -> Result<Vec<ComplianceEvent>, RepositoryError> {
        let table = lock(&self.table)?;
        let mut events: Vec<_> = table
            .events
            .values()
            .filter(|event| &event.entity_id == entity_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }
}

/// Lock order is `records` before `claims`, so claiming and recording stay atomic together.
#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    records: Mutex<Vec<NotificationRecord>>,
    claims: Mutex<HashSet<DeliverySlot>>,
    interactions: Mutex<Vec<NotificationInteraction>>,
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn insert(&self, record: NotificationRecord) -> Result<NotificationRecord, RepositoryError> {
        let mut records = lock(&self.records)?;
        if records.iter().any(|existing| existing.id == record.id) {
            return Err(RepositoryError::Conflict);
        }
        if record.delivery_outcome != DeliveryOutcome::Throttled {
            lock(&self.claims)?.remove(&record.slot());
        }
        records.push(record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &RecordId) -> Result<Option<NotificationRecord>, RepositoryError> {
        Ok(lock(&self.records)?
            .iter()
            .find(|record| &record.id == id)
            .cloned())
    }

    fn claim(&self, slot: &DeliverySlot, since: DateTime<Utc>) -> Result<(), RepositoryError> {
        let records = lock(&self.records)?;
        let delivered = records.iter().any(|record| {
            slot.covers(record)
                && record.sent_at >= since
                && record.delivery_outcome != DeliveryOutcome::Throttled
        });
        if delivered || !lock(&self.claims)?.insert(slot.clone()) {
            return Err(RepositoryError::Conflict);
        }
        Ok(())
    }

    fn release(&self, slot: &DeliverySlot) -> Result<(), RepositoryError> {
        lock(&self.claims)?.remove(slot);
        Ok(())
    }

    fn for_user(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let mut records: Vec<_> = lock(&self.records)?
            .iter()
            .filter(|record| &record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(records)
    }

    fn record_interaction(
        &self,
        interaction: NotificationInteraction,
    ) -> Result<(), RepositoryError> {
        lock(&self.interactions)?.push(interaction);
        Ok(())
    }

    fn interactions_for(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NotificationInteraction>, RepositoryError> {
        Ok(lock(&self.interactions)?
            .iter()
            .filter(|interaction| &interaction.user_id == user_id && interaction.at >= since)
            .cloned()
            .collect())
    }
}

/// Single-process rate counter. The mutex makes increment-and-check atomic.
#[derive(Debug, Default)]
pub struct InMemoryRateCounter {
    counts: Mutex<HashMap<(UserId, i64), u32>>,
}

impl InMemoryRateCounter {
    pub fn count(&self, user_id: &UserId, window: i64) -> Result<u32, RepositoryError> {
        Ok(lock(&self.counts)?
            .get(&(user_id.clone(), window))
            .copied()
            .unwrap_or(0))
    }
}

impl RateCounter for InMemoryRateCounter {
    fn try_acquire(
        &self,
        user_id: &UserId,
        window: i64,
        limit: u32,
    ) -> Result<bool, RepositoryError> {
        // Windows are never pruned: callers pick `now`, so an earlier window can come back.
        let mut counts = lock(&self.counts)?;
        let count = counts.entry((user_id.clone(), window)).or_insert(0);
        if *count >= limit {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    runs: Mutex<HashMap<NaiveDate, HashSet<EntityId>>>,
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn processed(&self, run: NaiveDate) -> Result<HashSet<EntityId>, RepositoryError> {
        Ok(lock(&self.runs)?.get(&run).cloned().unwrap_or_default())
    }

    fn mark_processed(&self, run: NaiveDate, entities: &[EntityId]) -> Result<(), RepositoryError> {
        lock(&self.runs)?
            .entry(run)
            .or_default()
            .extend(entities.iter().cloned());
        Ok(())
    }
}

/// Preferences keyed by user. Users without an entry get in-app only.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    users: Mutex<HashMap<UserId, (ChannelPreferences, UserContact)>>,
}

impl InMemoryPreferenceStore {
    pub fn set(
        &self,
        user_id: UserId,
        channels: ChannelPreferences,
        contact: UserContact,
    ) -> Result<(), PreferenceError> {
        self.users
            .lock()
            .map_err(|_| PreferenceError::Unavailable("preference mutex poisoned".to_string()))?
            .insert(user_id, (channels, contact));
        Ok(())
    }

    fn entry(
        &self,
        user_id: &UserId,
    ) -> Result<Option<(ChannelPreferences, UserContact)>, PreferenceError> {
        Ok(self
            .users
            .lock()
            .map_err(|_| PreferenceError::Unavailable("preference mutex poisoned".to_string()))?
            .get(user_id)
            .cloned())
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn channels(&self, user_id: &UserId) -> Result<ChannelPreferences, PreferenceError> {
        Ok(self
            .entry(user_id)?
            .map(|(channels, _)| channels)
            .unwrap_or_else(ChannelPreferences::in_app_only))
    }

    fn contact(&self, user_id: &UserId) -> Result<UserContact, PreferenceError> {
        Ok(self
            .entry(user_id)?
            .map(|(_, contact)| contact)
            .unwrap_or_default())
    }
}
