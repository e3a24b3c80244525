//! Collapses several candidate records for one identity into the most
//! complete one.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::cache::Cache;
use crate::domain::{Identity, Record};
use crate::error::ScanError;

/// Completeness weights; each populated top-level field adds `populated_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub localized_name: u32,
    pub price: u32,
    pub rarity: u32,
    pub short_name: u32,
    pub description: u32,
    pub populated_field: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            localized_name: 10,
            price: 8,
            rarity: 6,
            short_name: 4,
            description: 3,
            populated_field: 1,
        }
    }
}

pub fn completeness_score(record: &Record, weights: &ScoreWeights) -> Result<u32, ScanError> {
    let mut score = 0;
    if record.localized_name().is_some() {
        score += weights.localized_name;
    }
    if record.price().is_some_and(|price| price > 0) {
        score += weights.price;
    }
    if record.rarity().is_some() {
        score += weights.rarity;
    }
    if record.localized_short_name().is_some() {
        score += weights.short_name;
    }
    if record.localized_description().is_some() {
        score += weights.description;
    }

    let fields = serde_json::to_value(record).map_err(|err| ScanError::Serialize(err.to_string()))?;
    if let Value::Object(fields) = fields {
        let populated = fields.values().filter(|value| is_populated(value)).count() as u32;
        score += populated * weights.populated_field;
    }
    Ok(score)
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub fn resolve<I>(candidates: I) -> Result<Cache, ScanError>
where
    I: IntoIterator<Item = Record>,
{
    resolve_with(candidates, &ScoreWeights::default())
}

/// Keeps the strictly highest-scoring candidate per identity; ties go to
/// the candidate seen first.
pub fn resolve_with<I>(candidates: I, weights: &ScoreWeights) -> Result<Cache, ScanError>
where
    I: IntoIterator<Item = Record>,
{
    let mut groups: BTreeMap<Identity, Vec<Record>> = BTreeMap::new();
    for record in candidates {
        groups
            .entry(record.identity.clone())
            .or_default()
            .push(record);
    }

    let mut resolved = Cache::new();
    for (id, group) in groups {
        if group.len() == 1 {
            resolved.extend(group);
            continue;
        }

        let mut best: Option<(u32, Record)> = None;
        for candidate in group {
            let score = completeness_score(&candidate, weights)?;
            match &best {
                Some((best_score, _)) if score <= *best_score => {}
                _ => best = Some((score, candidate)),
            }
        }
        if let Some((score, record)) = best {
            debug!(id = %id, score, "kept most complete duplicate");
            resolved.insert(record);
        }
    }
    Ok(resolved)
}
