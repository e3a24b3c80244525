use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{Cache, write_file_atomic};
use crate::domain::{Identity, Record};
use crate::error::ScanError;

/// Display-oriented summary of one cached record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadableEntry {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub price: i64,
    pub rarity: String,
    pub kind: String,
    pub fetched_at: i64,
}

pub type ReadableIndex = BTreeMap<Identity, ReadableEntry>;

pub fn export(cache: &Cache) -> ReadableIndex {
    cache
        .iter()
        .map(|(id, record)| (id.clone(), readable_entry(record)))
        .collect()
}

pub fn readable_entry(record: &Record) -> ReadableEntry {
    let id = &record.identity;
    let name = record
        .localized_name()
        .or_else(|| record.property_str("Name"))
        .or_else(|| Some(record.display_name.as_str()).filter(|name| !name.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown Item ({}...)", id.short()));
    let short_name = record
        .localized_short_name()
        .or_else(|| record.property_str("ShortName"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown ({}...)", id.short()));
    let description = record
        .localized_description()
        .or_else(|| record.property_str("Description"))
        .unwrap_or("No description available")
        .to_string();
    let kind = if record.kind.is_empty() {
        "Unknown".to_string()
    } else {
        record.kind.clone()
    };

    ReadableEntry {
        id: id.to_string(),
        name,
        short_name,
        description,
        price: record.price().unwrap_or(0),
        rarity: record.rarity().unwrap_or("Unknown").to_string(),
        kind,
        fetched_at: record.fetched_at.timestamp(),
    }
}

pub fn write_readable(path: &Utf8Path, index: &ReadableIndex) -> Result<(), ScanError> {
    let content =
        serde_json::to_vec_pretty(index).map_err(|err| ScanError::Serialize(err.to_string()))?;
    write_file_atomic(path, &content)?;
    info!(count = index.len(), path = %path, "readable cache exported");
    Ok(())
}
