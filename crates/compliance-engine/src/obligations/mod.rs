//! Obligation derivation and the event lifecycle: rules lookup, materialization into dated
//! events, the status state machine, and recurrence.

pub mod domain;
pub mod lifecycle;
pub mod materializer;
pub mod recurrence;
pub mod roster;
pub mod rules;

pub use domain::{
    BusinessEntity, ComplianceEvent, CycleKey, EntityId, EntityType, EventId, EventStatus,
    EventType, IntervalUnit, Jurisdiction, Priority, Recurrence, UserId, Waiver,
};
pub use lifecycle::{derive_status, LifecycleError, LifecycleTracker, Refresh, StatusChange};
pub use materializer::{next_occurrence, EventMaterializer, MaterializeError};
pub use recurrence::{next_cycle, RecurrenceGenerator};
pub use roster::{EntityRoster, RosterImportError};
pub use rules::{ObligationTemplate, RuleLookup, RulesError, RulesProvider, StaticRulesProvider};
