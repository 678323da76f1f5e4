use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use compliance_engine::engine::EngineDependencies;
use compliance_engine::memory::{
    InMemoryCheckpointStore, InMemoryEntityDirectory, InMemoryEventRepository,
    InMemoryNotificationRepository, InMemoryPreferenceStore, InMemoryRateCounter,
};
use compliance_engine::notifications::{
    ChannelSenders, EmailSender, InAppSender, SendError, SmsSender,
};
use compliance_engine::obligations::{BusinessEntity, RulesProvider, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Logs each delivery instead of handing it to a provider.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingSender;

impl EmailSender for TracingSender {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
        info!(channel = "email", %to, subject, body_len = body.len(), "notification delivered");
        Ok(())
    }
}

impl SmsSender for TracingSender {
    fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError> {
        info!(channel = "sms", %to, body, "notification delivered");
        Ok(())
    }
}

impl InAppSender for TracingSender {
    fn post(&self, user_id: &UserId, subject: &str, _body: &str) -> Result<(), SendError> {
        info!(channel = "in_app", user = %user_id, subject, "notification delivered");
        Ok(())
    }
}

pub(crate) fn in_memory_dependencies(
    rules: Arc<dyn RulesProvider>,
    entities: Vec<BusinessEntity>,
) -> EngineDependencies {
    let sender = Arc::new(TracingSender);
    EngineDependencies {
        rules,
        entities: Arc::new(InMemoryEntityDirectory::with_entities(entities)),
        events: Arc::new(InMemoryEventRepository::default()),
        notifications: Arc::new(InMemoryNotificationRepository::default()),
        rate_counter: Arc::new(InMemoryRateCounter::default()),
        checkpoints: Arc::new(InMemoryCheckpointStore::default()),
        preferences: Arc::new(InMemoryPreferenceStore::default()),
        senders: ChannelSenders {
            email: sender.clone(),
            sms: sender.clone(),
            in_app: sender,
        },
    }
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
