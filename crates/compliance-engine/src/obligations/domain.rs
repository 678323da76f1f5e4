use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a business entity owned by the surrounding CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

/// Identifier of a materialized compliance event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

/// Identifier of a user who receives reminders for the entities they own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(format!("evt-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainParseError {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),
    #[error("jurisdiction '{0}' must be a two letter state code or US")]
    InvalidJurisdiction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Llc,
    Corporation,
    Nonprofit,
    Partnership,
}

impl EntityType {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::Llc,
            Self::Corporation,
            Self::Nonprofit,
            Self::Partnership,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Llc => "Limited Liability Company",
            Self::Corporation => "Corporation",
            Self::Nonprofit => "Nonprofit Corporation",
            Self::Partnership => "Limited Partnership",
        }
    }
}

impl FromStr for EntityType {
    type Err = DomainParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llc" | "limited_liability_company" => Ok(Self::Llc),
            "corp" | "corporation" | "c_corp" | "s_corp" => Ok(Self::Corporation),
            "nonprofit" | "non_profit" => Ok(Self::Nonprofit),
            "lp" | "partnership" => Ok(Self::Partnership),
            other => Err(DomainParseError::UnknownEntityType(other.to_string())),
        }
    }
}

/// Two letter jurisdiction code (`DE`, `CA`, ...) or `US` for federal obligations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jurisdiction(String);

impl Jurisdiction {
    pub fn parse(raw: &str) -> Result<Self, DomainParseError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(DomainParseError::InvalidJurisdiction(raw.to_string()))
        }
    }

    pub fn federal() -> Self {
        Self("US".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Jurisdiction {
    type Error = DomainParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Jurisdiction> for String {
    fn from(value: Jurisdiction) -> Self {
        value.0
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business entity snapshot supplied by the entity directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessEntity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    pub jurisdiction: Jurisdiction,
    pub formation_date: NaiveDate,
    pub owners: Vec<UserId>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AnnualReport,
    TaxFiling,
    AgentRenewal,
    OwnershipDisclosure,
    FranchiseTax,
}

impl EventType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::AnnualReport => "Annual Report",
            Self::TaxFiling => "Tax Filing",
            Self::AgentRenewal => "Registered Agent Renewal",
            Self::OwnershipDisclosure => "Ownership Disclosure",
            Self::FranchiseTax => "Franchise Tax",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Year,
    Quarter,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval_unit: IntervalUnit,
    pub interval_count: u32,
}

impl Recurrence {
    pub const fn annual() -> Self {
        Self {
            interval_unit: IntervalUnit::Year,
            interval_count: 1,
        }
    }

    pub const fn every(interval_unit: IntervalUnit, interval_count: u32) -> Self {
        Self {
            interval_unit,
            interval_count,
        }
    }

    fn months(&self) -> u32 {
        let count = self.interval_count.max(1);
        match self.interval_unit {
            IntervalUnit::Year => 12 * count,
            IntervalUnit::Quarter => 3 * count,
            IntervalUnit::Month => count,
        }
    }

    /// Adds one interval. Month-end dates clamp to the last day of the target month.
    pub fn advance(&self, from: NaiveDate) -> Option<NaiveDate> {
        from.checked_add_months(Months::new(self.months()))
    }

    /// The `n`th occurrence counted from `base`, computed from the base rather than by
    /// chaining `advance` so clamping never accumulates.
    pub fn nth_after(&self, base: NaiveDate, n: u32) -> Option<NaiveDate> {
        self.months()
            .checked_mul(n)
            .and_then(|months| base.checked_add_months(Months::new(months)))
    }

    /// First occurrence `anchor + k` intervals (`k >= 1`) falling on or after `from`.
    pub fn first_on_or_after(&self, anchor: NaiveDate, from: NaiveDate) -> Option<NaiveDate> {
        let step = i64::from(self.months());
        let elapsed_months = i64::from(from.year() - anchor.year()) * 12
            + i64::from(from.month0())
            - i64::from(anchor.month0());
        // any k below elapsed / step - 1 lands in an earlier month than `from`
        let mut k = u32::try_from((elapsed_months / step - 1).max(1)).ok()?;

        loop {
            let candidate = self.nth_after(anchor, k)?;
            if candidate >= from {
                return Some(candidate);
            }
            k = k.checked_add(1)?;
        }
    }
}

/// Identifies one occurrence of an obligation: the due date truncated to the recurrence
/// granularity (`2024`, `2024-Q1`, `2024-03`), or `once` for one-time obligations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleKey(pub String);

impl CycleKey {
    pub fn for_due_date(due_date: NaiveDate, recurrence: Option<&Recurrence>) -> Self {
        let key = match recurrence.map(|rule| rule.interval_unit) {
            None => "once".to_string(),
            Some(IntervalUnit::Year) => format!("{}", due_date.year()),
            Some(IntervalUnit::Quarter) => {
                format!("{}-Q{}", due_date.year(), due_date.month0() / 3 + 1)
            }
            Some(IntervalUnit::Month) => format!("{}-{:02}", due_date.year(), due_date.month()),
        };
        Self(key)
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub const fn escalated(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    DueSoon,
    Overdue,
    Completed,
    Waived,
}

impl EventStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
            Self::Completed => "completed",
            Self::Waived => "waived",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Waived)
    }

    /// Position in the forward-only lifecycle; terminal states share the top rank.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::DueSoon => 1,
            Self::Overdue => 2,
            Self::Completed | Self::Waived => 3,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    pub by: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A concrete, dated occurrence of an obligation for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceEvent {
    pub id: EventId,
    pub entity_id: EntityId,
    pub event_type: EventType,
    pub title: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub recurrence: Option<Recurrence>,
    /// Date the recurrence counts from: formation date plus the template offset.
    pub anchor_date: NaiveDate,
    pub cycle: CycleKey,
    /// Priority handed out by the rules provider; `priority` may be escalated above it.
    pub assigned_priority: Priority,
    pub priority: Priority,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub waiver: Option<Waiver>,
}

impl ComplianceEvent {
    /// Negative once the due date has passed.
    pub fn days_until_due(&self, today: NaiveDate) -> i64 {
        (self.due_date - today).num_days()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
