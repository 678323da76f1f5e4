use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use compliance_engine::config::EngineConfig;
use compliance_engine::engine::{ComplianceEngine, EngineDependencies};
use compliance_engine::memory::{
    InMemoryCheckpointStore, InMemoryEntityDirectory, InMemoryEventRepository,
    InMemoryNotificationRepository, InMemoryPreferenceStore, InMemoryRateCounter,
};
use compliance_engine::notifications::{
    ChannelSenders, DeliveryOutcome, DueDateBucket, EmailSender, InAppSender, NotificationReason,
    SendError, SmsSender,
};
use compliance_engine::obligations::{
    BusinessEntity, EntityId, EntityType, EventStatus, EventType, Jurisdiction,
    ObligationTemplate, Priority, Recurrence, StaticRulesProvider, UserId,
};
use compliance_engine::repository::{EventRepository, NotificationRepository};

struct SilentSender;

impl EmailSender for SilentSender {
    fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), SendError> {
        Ok(())
    }
}

impl SmsSender for SilentSender {
    fn send_sms(&self, _to: &str, _body: &str) -> Result<(), SendError> {
        Ok(())
    }
}

impl InAppSender for SilentSender {
    fn post(&self, _user_id: &UserId, _subject: &str, _body: &str) -> Result<(), SendError> {
        Ok(())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 7, 30, 0)
        .single()
        .expect("valid instant")
}

fn annual_report_rules() -> StaticRulesProvider {
    StaticRulesProvider::empty().with_rules(
        Jurisdiction::parse("DE").expect("valid jurisdiction"),
        vec![EntityType::Llc],
        vec![ObligationTemplate {
            event_type: EventType::AnnualReport,
            title: "Annual Report".to_string(),
            description: String::new(),
            recurrence: Some(Recurrence::annual()),
            anchor_offset_days: 0,
            priority: Priority::Medium,
        }],
    )
}

fn entity(formation_date: NaiveDate) -> BusinessEntity {
    BusinessEntity {
        id: EntityId("ent-1".to_string()),
        name: "Northwind Ventures LLC".to_string(),
        entity_type: EntityType::Llc,
        jurisdiction: Jurisdiction::parse("DE").expect("valid jurisdiction"),
        formation_date,
        owners: vec![UserId("founder".to_string())],
        active: true,
    }
}

struct Fixture {
    engine: ComplianceEngine,
    events: Arc<InMemoryEventRepository>,
    notifications: Arc<InMemoryNotificationRepository>,
}

fn fixture(formation_date: NaiveDate) -> Fixture {
    let events = Arc::new(InMemoryEventRepository::default());
    let notifications = Arc::new(InMemoryNotificationRepository::default());
    let sender = Arc::new(SilentSender);
    let engine = ComplianceEngine::new(
        EngineConfig::default(),
        EngineDependencies {
            rules: Arc::new(annual_report_rules()),
            entities: Arc::new(InMemoryEntityDirectory::with_entities([entity(
                formation_date,
            )])),
            events: events.clone(),
            notifications: notifications.clone(),
            rate_counter: Arc::new(InMemoryRateCounter::default()),
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            preferences: Arc::new(InMemoryPreferenceStore::default()),
            senders: ChannelSenders {
                email: sender.clone(),
                sms: sender.clone(),
                in_app: sender,
            },
        },
    );
    Fixture {
        engine,
        events,
        notifications,
    }
}

#[test]
fn annual_report_reminders_fire_once_per_condition() {
    let fixture = fixture(date(2023, 1, 10));
    let founder = UserId("founder".to_string());

    fixture.engine.run_sweep(at(2024, 1, 1)).expect("first sweep");
    let events = fixture
        .events
        .for_entity(&EntityId("ent-1".to_string()))
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].due_date, date(2024, 1, 10));
    assert_eq!(events[0].status, EventStatus::DueSoon);

    fixture.engine.run_sweep(at(2024, 1, 5)).expect("mid sweep");
    fixture.engine.run_sweep(at(2024, 1, 11)).expect("overdue sweep");
    fixture.engine.run_sweep(at(2024, 1, 12)).expect("repeat sweep");

    let events = fixture
        .events
        .for_entity(&EntityId("ent-1".to_string()))
        .expect("events");
    assert_eq!(events[0].status, EventStatus::Overdue);

    let sent: Vec<_> = fixture
        .notifications
        .for_user(&founder)
        .expect("history")
        .into_iter()
        .filter(|record| record.delivery_outcome == DeliveryOutcome::Sent)
        .collect();
    // 2024-01-05 moves into the 7 day bucket, which is a new condition
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent.iter()
            .filter(|record| record.reason == NotificationReason::Overdue)
            .count(),
        1
    );
    assert_eq!(
        sent.iter()
            .filter(|record| record.reason == NotificationReason::DeadlineApproaching)
            .count(),
        2
    );
}

#[test]
fn due_soon_and_overdue_sweeps_yield_one_record_each() {
    let fixture = fixture(date(2023, 1, 10));

    let due_soon = fixture.engine.run_sweep(at(2024, 1, 1)).expect("sweep");
    let overdue = fixture.engine.run_sweep(at(2024, 1, 11)).expect("sweep");

    assert_eq!(due_soon.notifications_sent, 1);
    assert_eq!(overdue.notifications_sent, 1);
    let history = fixture
        .engine
        .notification_history(&UserId("founder".to_string()))
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_ne!(history[0].dedup_key, history[1].dedup_key);
}

#[test]
fn materialization_is_idempotent_across_calls() {
    let fixture = fixture(date(2023, 1, 10));
    let entity_id = EntityId("ent-1".to_string());

    for _ in 0..3 {
        fixture
            .engine
            .materialize(&entity_id, at(2024, 1, 1))
            .expect("materializes");
    }

    assert_eq!(fixture.events.for_entity(&entity_id).expect("events").len(), 1);
}

#[test]
fn late_completion_keeps_calendar_alignment() {
    let fixture = fixture(date(2023, 3, 15));
    let entity_id = EntityId("ent-1".to_string());
    let created = fixture
        .engine
        .materialize(&entity_id, at(2024, 3, 1))
        .expect("materializes");
    assert_eq!(created[0].due_date, date(2024, 3, 15));

    let transition = fixture
        .engine
        .mark_completed(&created[0].id, "founder", at(2024, 4, 2))
        .expect("completes");

    let next = transition.next_cycle.expect("next cycle created");
    assert_eq!(next.due_date, date(2025, 3, 15));
    assert_eq!(
        DueDateBucket::classify(
            (next.due_date - date(2024, 4, 2)).num_days(),
            &[30, 14, 7, 1],
            7
        ),
        DueDateBucket::Beyond
    );
}
