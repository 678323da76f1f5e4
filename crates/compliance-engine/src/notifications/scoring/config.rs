use serde::{Deserialize, Serialize};

use crate::obligations::domain::Priority;

/// Weights and thresholds applied by the notification scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub overdue_base: u8,
    pub due_soon_base: u8,
    /// Ceiling for the one-point-per-day proximity bonus.
    pub proximity_cap: u8,
    pub high_weight: f32,
    pub medium_weight: f32,
    pub low_weight: f32,
    pub escalation_bonus: u8,
    pub escalate_after_days: u32,
    /// Consecutive dismissals of the same event that trigger damping.
    pub damping_dismissals: u32,
    pub damping_factor: f32,
    pub overdue_floor: u8,
    pub minimum_score: u8,
    pub recurrence_notice_score: u8,
}

impl ScoringConfig {
    pub fn weight_for(&self, priority: Priority) -> f32 {
        match priority {
            Priority::High => self.high_weight,
            Priority::Medium => self.medium_weight,
            Priority::Low => self.low_weight,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            overdue_base: 90,
            due_soon_base: 60,
            proximity_cap: 30,
            high_weight: 1.2,
            medium_weight: 1.0,
            low_weight: 0.7,
            escalation_bonus: 15,
            escalate_after_days: 7,
            damping_dismissals: 3,
            damping_factor: 0.5,
            overdue_floor: 40,
            minimum_score: 20,
            recurrence_notice_score: 25,
        }
    }
}
