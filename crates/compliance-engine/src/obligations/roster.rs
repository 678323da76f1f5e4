use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::Path;

use super::domain::{BusinessEntity, DomainParseError, EntityId, EntityType, Jurisdiction, UserId};

#[derive(Debug)]
pub enum RosterImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: u64, message: String },
}

impl std::fmt::Display for RosterImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterImportError::Io(err) => write!(f, "failed to read entity roster: {}", err),
            RosterImportError::Csv(err) => write!(f, "invalid entity roster CSV: {}", err),
            RosterImportError::InvalidRow { line, message } => {
                write!(f, "entity roster line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for RosterImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterImportError::Io(err) => Some(err),
            RosterImportError::Csv(err) => Some(err),
            RosterImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for RosterImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for RosterImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Loads business entities from a CSV export of the entity table.
///
/// Expected columns: `entity_id,name,entity_type,jurisdiction,formation_date,owners,active`.
/// `owners` is a `;`-separated list of user ids; `active` defaults to true when blank.
pub struct EntityRoster;

impl EntityRoster {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<BusinessEntity>, RosterImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<BusinessEntity>, RosterImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut entities = Vec::new();

        for (index, row) in csv_reader.deserialize::<RosterRow>().enumerate() {
            let row = row?;
            // header is line 1
            let line = index as u64 + 2;
            let entity = row
                .into_entity()
                .map_err(|err| RosterImportError::InvalidRow {
                    line,
                    message: err.to_string(),
                })?;
            entities.push(entity);
        }

        Ok(entities)
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    entity_id: String,
    name: String,
    entity_type: String,
    jurisdiction: String,
    formation_date: NaiveDate,
    #[serde(default)]
    owners: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    active: Option<String>,
}

impl RosterRow {
    fn into_entity(self) -> Result<BusinessEntity, DomainParseError> {
        let entity_type: EntityType = self.entity_type.parse()?;
        let jurisdiction = Jurisdiction::parse(&self.jurisdiction)?;
        let owners = self
            .owners
            .split(';')
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(|owner| UserId(owner.to_string()))
            .collect();
        let active = !matches!(
            self.active.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("false" | "no" | "0" | "inactive")
        );

        Ok(BusinessEntity {
            id: EntityId(self.entity_id),
            name: self.name,
            entity_type,
            jurisdiction,
            formation_date: self.formation_date,
            owners,
            active,
        })
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "entity_id,name,entity_type,jurisdiction,formation_date,owners,active\n";

    #[test]
    fn parses_owners_and_defaults_active() {
        let csv = format!(
            "{HEADER}ent-1,Harbor Labs LLC,llc,de,2023-01-10,u-1; u-2,\nent-2,Old Co,corporation,WY,2019-06-01,u-3,false\n"
        );
        let entities = EntityRoster::from_reader(Cursor::new(csv)).expect("roster parses");

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].jurisdiction.code(), "DE");
        assert_eq!(
            entities[0].owners,
            vec![UserId("u-1".to_string()), UserId("u-2".to_string())]
        );
        assert!(entities[0].active);
        assert!(!entities[1].active);
        assert_eq!(entities[1].entity_type, EntityType::Corporation);
    }

    #[test]
    fn reports_line_of_invalid_row() {
        let csv = format!("{HEADER}ent-1,Harbor Labs,trust,DE,2023-01-10,u-1,\n");
        match EntityRoster::from_reader(Cursor::new(csv)) {
            Err(RosterImportError::InvalidRow { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("trust"));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }
    }

    #[test]
    fn from_path_propagates_io_errors() {
        match EntityRoster::from_path("./missing-roster.csv") {
            Err(RosterImportError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
