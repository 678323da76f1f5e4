use serde::{Deserialize, Serialize};

use super::domain::{EntityType, EventType, IntervalUnit, Jurisdiction, Priority, Recurrence};

/// Obligation rule for an entity type/jurisdiction pair, before it is anchored to a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationTemplate {
    pub event_type: EventType,
    pub title: String,
    pub description: String,
    pub recurrence: Option<Recurrence>,
    /// Days added to the formation date before recurrence intervals are applied.
    pub anchor_offset_days: i64,
    pub priority: Priority,
}

/// Result of a rules lookup. Unsupported pairs are an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleLookup {
    Supported(Vec<ObligationTemplate>),
    Unsupported { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("rules provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of obligation templates (static tables, a rules service, ...).
pub trait RulesProvider: Send + Sync {
    fn obligations(
        &self,
        entity_type: EntityType,
        jurisdiction: &Jurisdiction,
    ) -> Result<RuleLookup, RulesError>;
}

#[derive(Debug, Clone)]
struct JurisdictionRules {
    jurisdiction: Jurisdiction,
    entity_types: Vec<EntityType>,
    templates: Vec<ObligationTemplate>,
}

/// In-process rule table. Federal templates apply wherever a jurisdiction table matches.
#[derive(Debug, Clone, Default)]
pub struct StaticRulesProvider {
    federal: Vec<ObligationTemplate>,
    tables: Vec<JurisdictionRules>,
}

impl StaticRulesProvider {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut provider = Self::empty().with_federal(federal_templates());
        for (code, entity_types, templates) in state_tables() {
            if let Ok(jurisdiction) = Jurisdiction::parse(code) {
                provider = provider.with_rules(jurisdiction, entity_types, templates);
            }
        }
        provider
    }

    pub fn with_federal(mut self, templates: Vec<ObligationTemplate>) -> Self {
        self.federal.extend(templates);
        self
    }

    pub fn with_rules(
        mut self,
        jurisdiction: Jurisdiction,
        entity_types: Vec<EntityType>,
        templates: Vec<ObligationTemplate>,
    ) -> Self {
        self.tables.push(JurisdictionRules {
            jurisdiction,
            entity_types,
            templates,
        });
        self
    }

    pub fn jurisdictions(&self) -> Vec<&Jurisdiction> {
        let mut codes: Vec<&Jurisdiction> =
            self.tables.iter().map(|table| &table.jurisdiction).collect();
        codes.sort();
        codes.dedup();
        codes
    }
}

impl RulesProvider for StaticRulesProvider {
    fn obligations(
        &self,
        entity_type: EntityType,
        jurisdiction: &Jurisdiction,
    ) -> Result<RuleLookup, RulesError> {
        let tables: Vec<&JurisdictionRules> = self
            .tables
            .iter()
            .filter(|table| &table.jurisdiction == jurisdiction)
            .collect();

        if tables.is_empty() {
            return Ok(RuleLookup::Unsupported {
                reason: format!("no rule table for jurisdiction {jurisdiction}"),
            });
        }

        let matching: Vec<&JurisdictionRules> = tables
            .into_iter()
            .filter(|table| table.entity_types.contains(&entity_type))
            .collect();

        if matching.is_empty() {
            return Ok(RuleLookup::Unsupported {
                reason: format!(
                    "{} is not covered by the {jurisdiction} rule table",
                    entity_type.label()
                ),
            });
        }

        let mut templates = self.federal.clone();
        for table in matching {
            templates.extend(table.templates.iter().cloned());
        }

        Ok(RuleLookup::Supported(templates))
    }
}

fn template(
    event_type: EventType,
    title: &str,
    description: &str,
    recurrence: Option<Recurrence>,
    anchor_offset_days: i64,
    priority: Priority,
) -> ObligationTemplate {
    ObligationTemplate {
        event_type,
        title: title.to_string(),
        description: description.to_string(),
        recurrence,
        anchor_offset_days,
        priority,
    }
}

fn federal_templates() -> Vec<ObligationTemplate> {
    vec![template(
        EventType::OwnershipDisclosure,
        "Beneficial Ownership Information Report",
        "File the initial beneficial ownership report with FinCEN listing every beneficial owner and company applicant.",
        None,
        90,
        Priority::High,
    )]
}

type StateTable = (&'static str, Vec<EntityType>, Vec<ObligationTemplate>);

fn state_tables() -> Vec<StateTable> {
    let for_profit = vec![EntityType::Llc, EntityType::Corporation, EntityType::Partnership];
    let all_types = EntityType::ordered().to_vec();

    vec![
        (
            "DE",
            vec![EntityType::Llc, EntityType::Partnership],
            vec![template(
                EventType::FranchiseTax,
                "Delaware Annual Tax",
                "Pay the flat annual alternative entity tax to the Delaware Division of Corporations.",
                Some(Recurrence::annual()),
                0,
                Priority::High,
            )],
        ),
        (
            "DE",
            vec![EntityType::Corporation],
            vec![
                template(
                    EventType::AnnualReport,
                    "Delaware Annual Franchise Tax Report",
                    "File the annual franchise tax report listing directors, officers, and authorized shares.",
                    Some(Recurrence::annual()),
                    0,
                    Priority::High,
                ),
                template(
                    EventType::FranchiseTax,
                    "Delaware Franchise Tax Payment",
                    "Pay franchise tax computed under the authorized shares or assumed par value method.",
                    Some(Recurrence::annual()),
                    0,
                    Priority::High,
                ),
            ],
        ),
        (
            "DE",
            all_types.clone(),
            vec![template(
                EventType::AgentRenewal,
                "Registered Agent Renewal",
                "Renew the Delaware registered agent engagement so service of process stays valid.",
                Some(Recurrence::annual()),
                -30,
                Priority::Medium,
            )],
        ),
        (
            "WY",
            all_types,
            vec![
                template(
                    EventType::AnnualReport,
                    "Wyoming Annual Report",
                    "File the annual report and license tax on the first day of the anniversary month.",
                    Some(Recurrence::annual()),
                    0,
                    Priority::Medium,
                ),
                template(
                    EventType::AgentRenewal,
                    "Registered Agent Renewal",
                    "Confirm the Wyoming registered agent is retained for another year.",
                    Some(Recurrence::annual()),
                    -14,
                    Priority::Low,
                ),
            ],
        ),
        (
            "CA",
            vec![EntityType::Llc],
            vec![template(
                EventType::AnnualReport,
                "Statement of Information",
                "File the biennial Statement of Information with the California Secretary of State.",
                Some(Recurrence::every(IntervalUnit::Year, 2)),
                0,
                Priority::Medium,
            )],
        ),
        (
            "CA",
            vec![EntityType::Corporation, EntityType::Nonprofit],
            vec![template(
                EventType::AnnualReport,
                "Statement of Information",
                "File the annual Statement of Information with the California Secretary of State.",
                Some(Recurrence::annual()),
                0,
                Priority::Medium,
            )],
        ),
        (
            "CA",
            for_profit.clone(),
            vec![template(
                EventType::TaxFiling,
                "Franchise Tax Board Return",
                "File the annual franchise tax return and pay the minimum franchise tax.",
                Some(Recurrence::annual()),
                105,
                Priority::High,
            )],
        ),
        (
            "NY",
            vec![EntityType::Llc, EntityType::Corporation],
            vec![template(
                EventType::AnnualReport,
                "Biennial Statement",
                "File the biennial statement with the New York Department of State.",
                Some(Recurrence::every(IntervalUnit::Year, 2)),
                0,
                Priority::Medium,
            )],
        ),
        (
            "NY",
            for_profit,
            vec![template(
                EventType::TaxFiling,
                "Estimated Tax Installment",
                "Pay the quarterly estimated franchise tax installment.",
                Some(Recurrence::every(IntervalUnit::Quarter, 1)),
                15,
                Priority::Medium,
            )],
        ),
    ]
}
