use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::domain::{InteractionKind, NotificationInteraction, RecordId};
use crate::obligations::domain::EventId;

/// Per-event engagement summary built from a user's recent interactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserNotificationProfile {
    trailing_dismissals: HashMap<EventId, u32>,
    acknowledged: HashSet<EventId>,
}

impl UserNotificationProfile {
    /// Groups interactions by notification record. A record counts as dismissed when the
    /// user dismissed it without ever opening or clicking it; trailing dismissals are
    /// counted backwards from the most recent record of each event.
    pub fn from_interactions(interactions: &[NotificationInteraction]) -> Self {
        let mut per_record: BTreeMap<RecordId, RecordEngagement> = BTreeMap::new();
        for interaction in interactions {
            let entry = per_record
                .entry(interaction.record_id.clone())
                .or_insert_with(|| RecordEngagement {
                    event_id: interaction.event_id.clone(),
                    first_at: interaction.at,
                    dismissed: false,
                    engaged: false,
                });
            entry.first_at = entry.first_at.min(interaction.at);
            match interaction.kind {
                InteractionKind::Dismissed => entry.dismissed = true,
                InteractionKind::Opened | InteractionKind::Clicked => entry.engaged = true,
            }
        }

        let mut per_event: HashMap<EventId, Vec<RecordEngagement>> = HashMap::new();
        for engagement in per_record.into_values() {
            per_event
                .entry(engagement.event_id.clone())
                .or_default()
                .push(engagement);
        }

        let mut profile = Self::default();
        for (event_id, mut records) in per_event {
            records.sort_by_key(|record| record.first_at);
            if records.iter().any(|record| record.engaged) {
                profile.acknowledged.insert(event_id.clone());
            }
            let trailing = records
                .iter()
                .rev()
                .take_while(|record| record.dismissed && !record.engaged)
                .count();
            if trailing > 0 {
                profile
                    .trailing_dismissals
                    .insert(event_id, u32::try_from(trailing).unwrap_or(u32::MAX));
            }
        }
        profile
    }

    pub fn trailing_dismissals(&self, event_id: &EventId) -> u32 {
        self.trailing_dismissals.get(event_id).copied().unwrap_or(0)
    }

    /// True once the user opened or clicked any notification about the event.
    pub fn acknowledged(&self, event_id: &EventId) -> bool {
        self.acknowledged.contains(event_id)
    }
}

#[derive(Debug)]
struct RecordEngagement {
    event_id: EventId,
    first_at: DateTime<Utc>,
    dismissed: bool,
    engaged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::domain::UserId;
    use chrono::TimeZone;

    fn interaction(
        record: &str,
        event: &str,
        kind: InteractionKind,
        day: u32,
    ) -> NotificationInteraction {
        NotificationInteraction {
            record_id: RecordId(record.to_string()),
            event_id: EventId(event.to_string()),
            user_id: UserId("owner".to_string()),
            kind,
            at: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn counts_only_trailing_dismissals() {
        let profile = UserNotificationProfile::from_interactions(&[
            interaction("r1", "evt-1", InteractionKind::Dismissed, 1),
            interaction("r2", "evt-1", InteractionKind::Opened, 2),
            interaction("r3", "evt-1", InteractionKind::Dismissed, 3),
            interaction("r4", "evt-1", InteractionKind::Dismissed, 4),
        ]);

        assert_eq!(profile.trailing_dismissals(&EventId("evt-1".to_string())), 2);
        assert!(profile.acknowledged(&EventId("evt-1".to_string())));
    }

    #[test]
    fn dismissal_after_open_is_not_a_dismissal() {
        let profile = UserNotificationProfile::from_interactions(&[
            interaction("r1", "evt-2", InteractionKind::Opened, 1),
            interaction("r1", "evt-2", InteractionKind::Dismissed, 1),
        ]);

        assert_eq!(profile.trailing_dismissals(&EventId("evt-2".to_string())), 0);
        assert!(!profile.acknowledged(&EventId("evt-9".to_string())));
    }
}
