//! Seed field catalog.
//!
//! Declares the canonical fields (and their known aliases) a deployment
//! starts from. The registry seeds itself from this at startup; fields that
//! already exist in the store are skipped, so re-seeding is harmless.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::error;
use walkdir::WalkDir;

use leadforge_core::{
    Alias, AliasConfidence, AliasScope, FieldDataType, SystemField,
};

use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCatalog {
    pub fields: Vec<CatalogField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogField {
    /// Canonical field key (stable, unique)
    pub key: String,

    pub label: String,

    pub data_type: FieldDataType,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub aliases: Vec<CatalogAlias>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAlias {
    /// Raw alias string as vendors send it
    pub value: String,

    #[serde(default)]
    pub scope: AliasScope,

    #[serde(default = "default_confidence")]
    pub confidence: AliasConfidence,

    #[serde(default)]
    pub vendor_id: Option<String>,

    #[serde(default)]
    pub source_id: Option<String>,
}

fn default_confidence() -> AliasConfidence {
    AliasConfidence::High
}

impl FieldCatalog {
    pub fn merge(&mut self, other: FieldCatalog) {
        self.fields.extend(other.fields);
    }

    /// Build the registry seed. Fails if an alias's scope is missing its
    /// qualifier (a vendor alias with no `vendor_id`, etc.).
    pub fn to_fields(&self) -> ConfigResult<Vec<SystemField>> {
        self.fields.iter().map(build_field).collect()
    }
}

fn build_field(entry: &CatalogField) -> ConfigResult<SystemField> {
    let mut field =
        SystemField::new(&entry.key, &entry.label, entry.data_type);
    field.category = entry.category.clone();
    field.is_required = entry.required;

    for alias in &entry.aliases {
        let built = match alias.scope {
            AliasScope::Global => {
                Alias::global(&alias.value, alias.confidence)
            }
            AliasScope::Vendor => {
                let vendor =
                    alias.vendor_id.as_deref().ok_or_else(|| {
                        ConfigError::Catalog(format!(
                            "vendor alias '{}' on field '{}' has no \
                             vendor_id",
                            alias.value, entry.key
                        ))
                    })?;
                Alias::vendor(&alias.value, alias.confidence, vendor)
            }
            AliasScope::Source => {
                let source =
                    alias.source_id.as_deref().ok_or_else(|| {
                        ConfigError::Catalog(format!(
                            "source alias '{}' on field '{}' has no \
                             source_id",
                            alias.value, entry.key
                        ))
                    })?;
                Alias::source(&alias.value, alias.confidence, source)
            }
        };
        field.aliases.push(built);
    }
    Ok(field)
}

/// Load a catalog from one YAML file, with env expansion.
pub fn load_catalog_from_path(file_path: &str) -> ConfigResult<FieldCatalog> {
    let raw = fs::read_to_string(file_path)?;
    let expanded = shellexpand::env(&raw)
        .map_err(|e| ConfigError::Env(e.to_string()))?;
    Ok(serde_yaml::from_str(&expanded)?)
}

/// Load a catalog from a file, or merge every file in a directory.
pub fn load_catalog(path: &str) -> ConfigResult<FieldCatalog> {
    let catalog_path = Path::new(path);
    if !catalog_path.is_dir() {
        return load_catalog_from_path(path);
    }

    let mut entries: Vec<_> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    let mut catalog = FieldCatalog::default();
    for entry in entries {
        match entry.to_str() {
            Some(path_str) => {
                catalog.merge(load_catalog_from_path(path_str)?)
            }
            None => {
                error!(file = %entry.display(), "skipping file in catalog dir")
            }
        }
    }
    Ok(catalog)
}
