//! Notification prioritization: scoring, admission control, and delivery.

pub mod dispatcher;
pub mod domain;
pub mod gate;
pub mod profile;
pub mod scoring;

pub use dispatcher::{
    render_message, ChannelPreferences, ChannelSenders, DispatchConfig, Dispatcher, EmailSender,
    InAppSender, PreferenceError, PreferenceStore, SendError, SmsSender, UserContact,
};
pub use domain::{
    Channel, DedupKey, DeliveryOutcome, DeliverySlot, DueDateBucket, InteractionKind,
    NotificationCandidate, NotificationInteraction, NotificationReason, NotificationRecord,
    RecordId,
};
pub use gate::{
    BatchAdmission, DeferralReason, GateDecision, RejectionReason, ThrottleConfig, ThrottleGate,
};
pub use profile::UserNotificationProfile;
pub use scoring::{
    NotificationScore, NotificationScorer, ScoreComponent, ScoreFactor, ScoringConfig,
};
