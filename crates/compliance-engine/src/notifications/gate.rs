use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{DueDateBucket, NotificationCandidate};
use crate::repository::{NotificationRepository, RateCounter, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum admitted notifications per user per window.
    pub rate_limit: u32,
    pub rate_window_hours: u32,
    pub dedup_window_days: u32,
    pub bucket_boundaries: Vec<u32>,
}

impl ThrottleConfig {
    pub fn bucket(&self, days_remaining: i64, escalate_after_days: u32) -> DueDateBucket {
        DueDateBucket::classify(days_remaining, &self.bucket_boundaries, escalate_after_days)
    }

    /// Fixed window index used as part of the rate counter key.
    pub fn window_index(&self, now: DateTime<Utc>) -> i64 {
        let width = i64::from(self.rate_window_hours.max(1)) * 3600;
        now.timestamp().div_euclid(width)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit: 5,
            rate_window_hours: 24,
            dedup_window_days: 30,
            bucket_boundaries: vec![30, 14, 7, 1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralReason {
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum GateDecision {
    Accepted,
    Rejected(RejectionReason),
    Deferred(DeferralReason),
}

/// Outcome of gating one user's candidates together.
#[derive(Debug, Clone, Default)]
pub struct BatchAdmission {
    pub accepted: Vec<NotificationCandidate>,
    pub rejected: Vec<(NotificationCandidate, RejectionReason)>,
    pub deferred: Vec<NotificationCandidate>,
}

/// Admission control: suppresses duplicates and enforces the per-user rate budget.
pub struct ThrottleGate {
    config: ThrottleConfig,
    records: Arc<dyn NotificationRepository>,
    counter: Arc<dyn RateCounter>,
}

impl ThrottleGate {
    pub fn new(
        config: ThrottleConfig,
        records: Arc<dyn NotificationRepository>,
        counter: Arc<dyn RateCounter>,
    ) -> Self {
        Self {
            config,
            records,
            counter,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// An accepted candidate holds its delivery slot until the dispatcher records the outcome
    /// or [`ThrottleGate::release`] gives it back.
    pub fn admit(
        &self,
        candidate: &NotificationCandidate,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, RepositoryError> {
        let since = now - Duration::days(i64::from(self.config.dedup_window_days));
        let slot = candidate.slot();
        match self.records.claim(&slot, since) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                debug!(
                    user_id = %candidate.user_id,
                    event_id = %candidate.event_id,
                    channel = candidate.channel.label(),
                    "duplicate notification suppressed"
                );
                return Ok(GateDecision::Rejected(RejectionReason::Duplicate));
            }
            Err(err) => return Err(err),
        }

        let window = self.config.window_index(now);
        match self
            .counter
            .try_acquire(&candidate.user_id, window, self.config.rate_limit)
        {
            Ok(true) => Ok(GateDecision::Accepted),
            Ok(false) => {
                self.records.release(&slot)?;
                Ok(GateDecision::Deferred(DeferralReason::RateLimited))
            }
            Err(err) => {
                self.release(candidate);
                Err(err)
            }
        }
    }

    /// Gives back the slot of an accepted candidate that will not be dispatched.
    pub fn release(&self, candidate: &NotificationCandidate) {
        if let Err(err) = self.records.release(&candidate.slot()) {
            warn!(
                user_id = %candidate.user_id,
                event_id = %candidate.event_id,
                error = %err,
                "delivery slot not released"
            );
        }
    }

    /// Admits in score order (ties: earliest due date, then event id) so the highest-scored
    /// candidates consume the rate budget first.
    pub fn admit_batch(
        &self,
        mut candidates: Vec<NotificationCandidate>,
        now: DateTime<Utc>,
    ) -> Result<BatchAdmission, RepositoryError> {
        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.due_date.cmp(&b.due_date))
                .then_with(|| a.event_id.cmp(&b.event_id))
                .then_with(|| a.channel.cmp(&b.channel))
        });

        let mut admission = BatchAdmission::default();
        let mut seen = HashSet::new();
        for candidate in candidates {
            if !seen.insert(candidate.slot()) {
                admission
                    .rejected
                    .push((candidate, RejectionReason::Duplicate));
                continue;
            }

            let decision = match self.admit(&candidate, now) {
                Ok(decision) => decision,
                Err(err) => {
                    for accepted in &admission.accepted {
                        self.release(accepted);
                    }
                    return Err(err);
                }
            };
            match decision {
                GateDecision::Accepted => admission.accepted.push(candidate),
                GateDecision::Rejected(reason) => admission.rejected.push((candidate, reason)),
                GateDecision::Deferred(_) => admission.deferred.push(candidate),
            }
        }
        Ok(admission)
    }
}
