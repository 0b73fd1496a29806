//! Product-key to control-point registry (spec §3, §4.D).
//!
//! Grounded on `housetuya_model.c`: a small case-insensitively-scanned
//! table, merged in place on every config refresh (`housetuya_model_refresh`):
//! rows present in the incoming document are added or updated by id, and
//! rows absent from it are left untouched.

use serde::{Deserialize, Serialize};

/// One row of the model registry: a product key mapped to the data-point
/// index used for on/off control on that model (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub control: u32,
}

/// In-memory model table (spec §4.D). Lookup is a linear, case-insensitive
/// scan — the table is expected to hold at most a few dozen rows.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, product_key: &str) -> Option<&ModelEntry> {
        self.entries
            .iter()
            .find(|m| m.id.eq_ignore_ascii_case(product_key))
    }

    /// Resolve the control dps for `product_key`, or `0` ("unknown") if no
    /// model row matches (spec §4.D).
    pub fn lookup_control(&self, product_key: &str) -> u32 {
        self.find(product_key).map(|m| m.control).unwrap_or(0)
    }

    pub fn get(&self, product_key: &str) -> Option<&ModelEntry> {
        self.find(product_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter()
    }

    /// Merge `incoming` into the table: a row is added or updated in place
    /// by id, and a row whose id is absent from `incoming` is left
    /// untouched (spec §3: "rows are rebuilt on every config refresh,
    /// preserving prior entries and updating fields in place"), mirroring
    /// how `config::apply` merges `DeviceTable`. Rows with no `control`
    /// are skipped by the caller before they ever reach here (spec §3: "a
    /// model without `control` is ignored").
    pub fn refresh(&mut self, incoming: Vec<ModelEntry>) {
        for entry in incoming {
            match self
                .entries
                .iter_mut()
                .find(|m| m.id.eq_ignore_ascii_case(&entry.id))
            {
                Some(existing) => *existing = entry,
                None => self.entries.push(entry),
            }
        }
    }
}
