//! Whole-session export and import
//!
//! A snapshot is the same JSON document the session storage holds, gathered
//! under one object so a session can be saved to disk and restored later.

use serde::{Deserialize, Serialize};
use shared_types::{PageRect, Signee};

use crate::error::RosterError;
use crate::registry::SigneeRegistry;
use crate::store::{PlacementSchema, PlacementStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub pdf_signature_data: PlacementSchema,
    pub users: Vec<Signee>,
    #[serde(default)]
    pub box_sizes: Vec<PageRect>,
}

impl SessionSnapshot {
    pub fn capture(store: &PlacementStore, registry: &SigneeRegistry) -> Self {
        Self {
            pdf_signature_data: store.to_schema(),
            users: registry.signees(),
            box_sizes: store.box_sizes(),
        }
    }

    /// Load the snapshot into the live store and registry.
    ///
    /// The roster is validated first so a rejected import leaves the
    /// placements untouched.
    pub fn restore(
        self,
        store: &PlacementStore,
        registry: &SigneeRegistry,
    ) -> Result<(), RosterError> {
        registry.replace_all(self.users)?;
        for (key, list) in self.pdf_signature_data {
            let placements = list.into_iter().map(|p| p.into_placement(&key)).collect();
            store.replace_all(&key, placements);
        }
        store.set_box_sizes(self.box_sizes);
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
