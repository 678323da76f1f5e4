use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::engine::{ComplianceEngine, EngineDependencies};
use crate::memory::{
    InMemoryCheckpointStore, InMemoryEntityDirectory, InMemoryEventRepository,
    InMemoryNotificationRepository, InMemoryPreferenceStore, InMemoryRateCounter,
};
use crate::notifications::dispatcher::{
    ChannelSenders, EmailSender, InAppSender, SendError, SmsSender,
};
use crate::notifications::domain::Channel;
use crate::obligations::domain::{
    BusinessEntity, EntityId, EntityType, EventType, Jurisdiction, Priority, Recurrence, UserId,
};
use crate::obligations::rules::{
    ObligationTemplate, RuleLookup, RulesError, RulesProvider, StaticRulesProvider,
};

pub(super) const OWNER: &str = "owner-1";

pub(super) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub(super) fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 6, 0, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn owner() -> UserId {
    UserId(OWNER.to_string())
}

pub(super) fn entity(id: &str, formation_date: NaiveDate) -> BusinessEntity {
    BusinessEntity {
        id: EntityId(id.to_string()),
        name: format!("{id} Holdings LLC"),
        entity_type: EntityType::Llc,
        jurisdiction: Jurisdiction::parse("DE").expect("valid jurisdiction"),
        formation_date,
        owners: vec![owner()],
        active: true,
    }
}

pub(super) fn harbor_labs() -> BusinessEntity {
    entity("ent-harbor", date(2023, 1, 10))
}

pub(super) fn annual_report_rules() -> StaticRulesProvider {
    StaticRulesProvider::empty().with_rules(
        Jurisdiction::parse("DE").expect("valid jurisdiction"),
        vec![EntityType::Llc],
        vec![ObligationTemplate {
            event_type: EventType::AnnualReport,
            title: "Delaware Annual Report".to_string(),
            description: "File the annual report with the Division of Corporations.".to_string(),
            recurrence: Some(Recurrence::annual()),
            anchor_offset_days: 0,
            priority: Priority::Medium,
        }],
    )
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        retry_base_delay_ms: 1,
        sweep_workers: 2,
        ..EngineConfig::default()
    }
}

/// Sender double for every channel. Fails the first `failures` calls with a transport error
/// and holds each call for `delay`.
#[derive(Default)]
pub(super) struct RecordingSender {
    failures: AtomicU32,
    delay: Duration,
    deliveries: Mutex<Vec<(Channel, String, String)>>,
}

impl RecordingSender {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub(super) fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(super) fn deliveries(&self) -> Vec<(Channel, String, String)> {
        self.deliveries
            .lock()
            .expect("sender mutex poisoned")
            .clone()
    }

    fn deliver(&self, channel: Channel, to: &str, subject: &str) -> Result<(), SendError> {
        std::thread::sleep(self.delay);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SendError::Transport("smtp relay timed out".to_string()));
        }
        self.deliveries
            .lock()
            .expect("sender mutex poisoned")
            .push((channel, to.to_string(), subject.to_string()));
        Ok(())
    }
}

impl EmailSender for RecordingSender {
    fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), SendError> {
        self.deliver(Channel::Email, to, subject)
    }
}

impl SmsSender for RecordingSender {
    fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError> {
        self.deliver(Channel::Sms, to, body)
    }
}

impl InAppSender for RecordingSender {
    fn post(&self, user_id: &UserId, subject: &str, _body: &str) -> Result<(), SendError> {
        self.deliver(Channel::InApp, &user_id.0, subject)
    }
}

pub(super) struct UnavailableRules;

impl RulesProvider for UnavailableRules {
    fn obligations(
        &self,
        _entity_type: EntityType,
        _jurisdiction: &Jurisdiction,
    ) -> Result<RuleLookup, RulesError> {
        Err(RulesError::Unavailable("rules service offline".to_string()))
    }
}

pub(super) struct Harness {
    pub(super) engine: Arc<ComplianceEngine>,
    pub(super) entities: Arc<InMemoryEntityDirectory>,
    pub(super) events: Arc<InMemoryEventRepository>,
    pub(super) notifications: Arc<InMemoryNotificationRepository>,
    pub(super) preferences: Arc<InMemoryPreferenceStore>,
    pub(super) sender: Arc<RecordingSender>,
}

pub(super) fn harness_with(
    config: EngineConfig,
    rules: Arc<dyn RulesProvider>,
    entities: Vec<BusinessEntity>,
    sender: RecordingSender,
) -> Harness {
    let directory = Arc::new(InMemoryEntityDirectory::with_entities(entities));
    let events = Arc::new(InMemoryEventRepository::default());
    let notifications = Arc::new(InMemoryNotificationRepository::default());
    let preferences = Arc::new(InMemoryPreferenceStore::default());
    let sender = Arc::new(sender);

    let engine = ComplianceEngine::new(
        config,
        EngineDependencies {
            rules,
            entities: directory.clone(),
            events: events.clone(),
            notifications: notifications.clone(),
            rate_counter: Arc::new(InMemoryRateCounter::default()),
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            preferences: preferences.clone(),
            senders: ChannelSenders {
                email: sender.clone(),
                sms: sender.clone(),
                in_app: sender.clone(),
            },
        },
    );

    Harness {
        engine: Arc::new(engine),
        entities: directory,
        events,
        notifications,
        preferences,
        sender,
    }
}

/// Harbor Labs with a single annual report obligation and in-app delivery.
pub(super) fn harness() -> Harness {
    harness_with(
        engine_config(),
        Arc::new(annual_report_rules()),
        vec![harbor_labs()],
        RecordingSender::default(),
    )
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
