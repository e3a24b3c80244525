//! Identity discovery from the server's local database files.
//!
//! Two sources feed a scan: the item catalog (`templates/items.json`, an
//! object keyed by template id) and the hideout recipe list
//! (`hideout/production.json`). Each source fails independently; a missing
//! or broken file only logs a warning and contributes nothing.

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::domain::Identity;
use crate::error::ScanError;

/// Catalog keys must be strictly longer than this to count as template ids.
pub const MIN_CATALOG_ID_LEN: usize = 10;

#[derive(Debug, Deserialize)]
struct RecipeFile {
    #[serde(default)]
    recipes: Vec<Recipe>,
}

#[derive(Debug, Deserialize)]
struct Recipe {
    #[serde(default, rename = "endProduct")]
    end_product: Option<String>,
    #[serde(default)]
    requirements: Vec<Requirement>,
}

#[derive(Debug, Deserialize)]
struct Requirement {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, rename = "templateId")]
    template_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentitySources {
    catalog: Utf8PathBuf,
    recipes: Utf8PathBuf,
}

impl IdentitySources {
    pub fn new(catalog: Utf8PathBuf, recipes: Utf8PathBuf) -> Self {
        Self { catalog, recipes }
    }

    pub fn catalog_path(&self) -> &Utf8Path {
        &self.catalog
    }

    pub fn recipes_path(&self) -> &Utf8Path {
        &self.recipes
    }

    /// Union of catalog and recipe identities, in sorted order.
    pub fn extract_identities(&self) -> BTreeSet<Identity> {
        let mut identities = self.extract_catalog();
        identities.extend(self.extract_recipes());
        info!(count = identities.len(), "collected unique item identities");
        identities
    }

    pub fn extract_catalog(&self) -> BTreeSet<Identity> {
        match read_catalog(&self.catalog) {
            Ok(ids) => {
                info!(count = ids.len(), path = %self.catalog, "catalog identities");
                ids
            }
            Err(err) => {
                warn!(%err, "catalog unavailable, continuing without it");
                BTreeSet::new()
            }
        }
    }

    pub fn extract_recipes(&self) -> BTreeSet<Identity> {
        match read_recipes(&self.recipes) {
            Ok(ids) => {
                info!(count = ids.len(), path = %self.recipes, "recipe identities");
                ids
            }
            Err(err) => {
                warn!(%err, "recipe file unavailable, continuing without it");
                BTreeSet::new()
            }
        }
    }
}

fn read_json(path: &Utf8Path) -> Result<Value, ScanError> {
    let content = fs::read(path.as_std_path()).map_err(|err| ScanError::SourceRead {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    serde_json::from_slice(&content).map_err(|err| ScanError::SourceParse {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })
}

fn read_catalog(path: &Utf8Path) -> Result<BTreeSet<Identity>, ScanError> {
    let value = read_json(path)?;
    let catalog: Map<String, Value> =
        serde_json::from_value(value).map_err(|err| ScanError::SourceParse {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
    Ok(catalog
        .keys()
        .filter(|key| key.len() > MIN_CATALOG_ID_LEN)
        .filter_map(|key| key.parse().ok())
        .collect())
}

fn read_recipes(path: &Utf8Path) -> Result<BTreeSet<Identity>, ScanError> {
    let value = read_json(path)?;
    let file: RecipeFile = serde_json::from_value(value).map_err(|err| ScanError::SourceParse {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;

    let mut ids = BTreeSet::new();
    for recipe in file.recipes {
        if let Some(id) = recipe.end_product.and_then(|raw| raw.parse().ok()) {
            ids.insert(id);
        }
        for requirement in recipe.requirements {
            if !matches!(requirement.kind.as_deref(), Some("Item") | Some("Tool")) {
                continue;
            }
            if let Some(id) = requirement.template_id.and_then(|raw| raw.parse().ok()) {
                ids.insert(id);
            }
        }
    }
    Ok(ids)
}
