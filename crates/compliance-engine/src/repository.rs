//! Storage seams consumed by the engine.
//!
//! Each trait describes the guarantees the engine relies on rather than a particular
//! database. Implementations backed by a shared store must uphold the same atomicity rules
//! as the in-memory versions in [`crate::memory`]: unique inserts for events, compare-and-set
//! status updates, atomic delivery slot claims, and an atomic increment-and-check for the
//! rate counter.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};

use crate::notifications::domain::{
    DeliverySlot, NotificationInteraction, NotificationRecord, RecordId,
};
use crate::obligations::domain::{
    BusinessEntity, ComplianceEvent, EntityId, EventId, EventStatus, UserId,
};

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the business entities owned by the surrounding application.
pub trait EntityDirectory: Send + Sync {
    fn fetch(&self, id: &EntityId) -> Result<Option<BusinessEntity>, RepositoryError>;
    fn active_entities(&self) -> Result<Vec<EntityId>, RepositoryError>;
}

/// Persistence for compliance events.
pub trait EventRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when an event already exists for the same
    /// `(entity_id, event_type, cycle)`, whatever its status.
    fn insert(&self, event: ComplianceEvent) -> Result<ComplianceEvent, RepositoryError>;

    /// Replaces the stored event only if its status still equals `expected`.
    /// A mismatch yields [`RepositoryError::Conflict`].
    fn update(&self, event: ComplianceEvent, expected: EventStatus)
        -> Result<(), RepositoryError>;

    fn fetch(&self, id: &EventId) -> Result<Option<ComplianceEvent>, RepositoryError>;
    fn for_entity(&self, entity_id: &EntityId) -> Result<Vec<ComplianceEvent>, RepositoryError>;
}

/// Append-only notification audit trail plus the interactions users report back.
pub trait NotificationRepository: Send + Sync {
    fn insert(&self, record: NotificationRecord) -> Result<NotificationRecord, RepositoryError>;
    fn fetch(&self, id: &RecordId) -> Result<Option<NotificationRecord>, RepositoryError>;

    /// Reserves `slot` for one in-flight delivery. Fails with [`RepositoryError::Conflict`]
    /// when a sent or failed record for the slot exists at or after `since`, or another
    /// delivery already holds it. The check and the reservation must be one atomic step.
    /// Inserting a sent or failed record for the slot releases the reservation; throttled
    /// records never match and never release.
    fn claim(&self, slot: &DeliverySlot, since: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Drops a reservation that will not be followed by a sent or failed record.
    fn release(&self, slot: &DeliverySlot) -> Result<(), RepositoryError>;

    fn for_user(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>, RepositoryError>;

    fn record_interaction(&self, interaction: NotificationInteraction)
        -> Result<(), RepositoryError>;

    fn interactions_for(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NotificationInteraction>, RepositoryError>;
}

/// Per-user notification budget keyed by `(user_id, window)`.
pub trait RateCounter: Send + Sync {
    /// Atomically increments the counter when it is below `limit`. Returns `false`, leaving
    /// the counter untouched, when the budget is exhausted.
    fn try_acquire(&self, user_id: &UserId, window: i64, limit: u32)
        -> Result<bool, RepositoryError>;
}

/// Remembers which entities a sweep run already finished so a restart can skip them.
pub trait CheckpointStore: Send + Sync {
    fn processed(&self, run: NaiveDate) -> Result<HashSet<EntityId>, RepositoryError>;
    fn mark_processed(&self, run: NaiveDate, entities: &[EntityId])
        -> Result<(), RepositoryError>;
}
