use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScanError;

/// Externally assigned item template id. Never minted here, only discovered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in placeholder names.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = ScanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ScanError::InvalidIdentity(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for Identity {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

/// Normalized result of one item lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identity: Identity,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub parent_identity: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub localized_fields: Map<String, Value>,
    #[serde(default)]
    pub handbook: Map<String, Value>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub fetched_at: DateTime<Utc>,
}

impl Record {
    pub fn new(identity: Identity, fetched_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            display_name: String::new(),
            parent_identity: String::new(),
            kind: String::new(),
            properties: Map::new(),
            localized_fields: Map::new(),
            handbook: Map::new(),
            fetched_at,
        }
    }

    pub fn localized_name(&self) -> Option<&str> {
        non_empty_str(&self.localized_fields, "Name")
    }

    pub fn localized_short_name(&self) -> Option<&str> {
        non_empty_str(&self.localized_fields, "ShortName")
    }

    pub fn localized_description(&self) -> Option<&str> {
        non_empty_str(&self.localized_fields, "Description")
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        non_empty_str(&self.properties, key)
    }

    pub fn rarity(&self) -> Option<&str> {
        self.property_str("RarityPvE")
    }

    /// Handbook price in roubles. Fractional prices are truncated.
    pub fn price(&self) -> Option<i64> {
        let value = self.handbook.get("Price")?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|price| price as i64))
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
}

/// Lifecycle of one scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "message")]
pub enum ScanState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed(String),
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Cancelled | ScanState::Failed(_)
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Running => write!(f, "running"),
            ScanState::Paused => write!(f, "paused"),
            ScanState::Completed => write!(f, "completed"),
            ScanState::Cancelled => write!(f, "cancelled"),
            ScanState::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_identity_trims() {
        let id: Identity = "  5448be9a4bdc2dfd2f8b456a ".parse().unwrap();
        assert_eq!(id.as_str(), "5448be9a4bdc2dfd2f8b456a");
        assert_eq!(id.short(), "5448be9a");
    }

    #[test]
    fn parse_identity_rejects_blank() {
        let err = "   ".parse::<Identity>().unwrap_err();
        assert_matches!(err, ScanError::InvalidIdentity(_));
    }

    #[test]
    fn record_deserialize_rejects_empty_identity() {
        let raw = json!({ "identity": "", "fetched_at": 0 });
        assert!(serde_json::from_value::<Record>(raw).is_err());
    }

    #[test]
    fn typed_accessors_skip_empty_values() {
        let mut record = Record::new("abc".parse().unwrap(), Utc::now());
        record
            .localized_fields
            .insert("Name".to_string(), json!(""));
        record
            .localized_fields
            .insert("ShortName".to_string(), json!("AI-2"));
        record.handbook.insert("Price".to_string(), json!(1230.7));

        assert_eq!(record.localized_name(), None);
        assert_eq!(record.localized_short_name(), Some("AI-2"));
        assert_eq!(record.price(), Some(1230));
    }
}
