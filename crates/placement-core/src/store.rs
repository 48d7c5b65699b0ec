//! Placement session store
//!
//! Append-only list of placements per document key. The in-memory map is
//! authoritative for the session; every mutation is written through to the
//! session storage under `pdfSignatureData` (all documents) and `boxSizes`
//! (rectangles of the document just written, index-aligned with its entry).
//!
//! Mutations are append-or-flag only, so interleaved writers never lose each
//! other's placements.

use serde::{Deserialize, Serialize};
use shared_types::{DocumentKey, FieldName, PageRect, Placement, PlacementType, SigneeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::storage::{SessionStorage, KEY_BOX_SIZES, KEY_PLACEMENTS};

/// Serialized placement: a page rectangle extended with its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPlacement {
    #[serde(flatten)]
    pub page_rect: PageRect,
    pub field_name: FieldName,
    pub signee_id: SigneeId,
    #[serde(rename = "type")]
    pub placement_type: PlacementType,
    #[serde(default)]
    pub signed: bool,
}

impl StoredPlacement {
    pub fn from_placement(placement: &Placement) -> Self {
        Self {
            page_rect: placement.page_rect,
            field_name: placement.field_name.clone(),
            signee_id: placement.signee_id,
            placement_type: placement.placement_type,
            signed: placement.signed,
        }
    }

    pub fn into_placement(self, document_key: &DocumentKey) -> Placement {
        Placement {
            document_key: document_key.clone(),
            signee_id: self.signee_id,
            placement_type: self.placement_type,
            page_rect: self.page_rect,
            field_name: self.field_name,
            signed: self.signed,
        }
    }
}

/// Serialized form of the whole store (`pdfSignatureData`)
pub type PlacementSchema = BTreeMap<DocumentKey, Vec<StoredPlacement>>;

pub struct PlacementStore {
    storage: Rc<dyn SessionStorage>,
    placements: RefCell<BTreeMap<DocumentKey, Vec<Placement>>>,
    /// Mirror of `boxSizes`
    box_sizes: RefCell<Vec<PageRect>>,
}

impl PlacementStore {
    /// Open the store, picking up whatever this session already saved
    pub fn open(storage: Rc<dyn SessionStorage>) -> Result<Self, StoreError> {
        let store = Self {
            storage,
            placements: RefCell::new(BTreeMap::new()),
            box_sizes: RefCell::new(Vec::new()),
        };
        if let Some(raw) = store.storage.get_item(KEY_PLACEMENTS)? {
            let schema: PlacementSchema = serde_json::from_str(&raw)?;
            store.load_schema(schema);
        }
        if let Some(raw) = store.storage.get_item(KEY_BOX_SIZES)? {
            *store.box_sizes.borrow_mut() = serde_json::from_str(&raw)?;
        }
        Ok(store)
    }

    /// Add a placement to the end of the document's list.
    ///
    /// Never deduplicates: identical geometry is still a new placement.
    pub fn append(&self, key: &DocumentKey, mut placement: Placement) {
        placement.document_key = key.clone();
        debug!(document = %key, field = %placement.field_name, "append placement");
        self.placements
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .push(placement);
        self.persist(key);
    }

    /// All placements for a document in insertion order
    pub fn list_for(&self, key: &DocumentKey) -> Vec<Placement> {
        self.placements
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, key: &DocumentKey, field_name: &FieldName) -> Option<Placement> {
        self.placements
            .borrow()
            .get(key)?
            .iter()
            .find(|p| &p.field_name == field_name)
            .cloned()
    }

    pub fn field_names(&self, key: &DocumentKey) -> HashSet<FieldName> {
        self.placements
            .borrow()
            .get(key)
            .map(|list| list.iter().map(|p| p.field_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn document_keys(&self) -> Vec<DocumentKey> {
        self.placements.borrow().keys().cloned().collect()
    }

    /// Flag a placement as signed.
    ///
    /// Returns false when no placement matches; that is not an error since a
    /// concurrent reload may have raced the caller.
    pub fn mark_signed(&self, key: &DocumentKey, field_name: &FieldName) -> bool {
        let found = self.update(key, field_name, |p| p.signed = true);
        if !found {
            debug!(document = %key, field = %field_name, "mark_signed: no such placement");
        }
        found
    }

    /// Move a placement to a new page rectangle
    pub fn relocate(&self, key: &DocumentKey, field_name: &FieldName, page_rect: PageRect) -> bool {
        self.update(key, field_name, |p| p.page_rect = page_rect)
    }

    /// Overwrite a document's list, used when importing a saved session
    pub fn replace_all(&self, key: &DocumentKey, placements: Vec<Placement>) {
        let placements = placements
            .into_iter()
            .map(|mut p| {
                p.document_key = key.clone();
                p
            })
            .collect();
        self.placements
            .borrow_mut()
            .insert(key.clone(), placements);
        self.persist(key);
    }

    /// Rectangles of the most recently written document
    pub fn box_sizes(&self) -> Vec<PageRect> {
        self.box_sizes.borrow().clone()
    }

    /// Overwrite `boxSizes`, used when importing a saved session
    pub fn set_box_sizes(&self, rects: Vec<PageRect>) {
        *self.box_sizes.borrow_mut() = rects;
        if let Err(e) = self.write_box_sizes() {
            warn!(error = %e, "failed to persist box sizes");
        }
    }

    pub fn to_schema(&self) -> PlacementSchema {
        self.placements
            .borrow()
            .iter()
            .map(|(key, list)| {
                (
                    key.clone(),
                    list.iter().map(StoredPlacement::from_placement).collect(),
                )
            })
            .collect()
    }

    fn load_schema(&self, schema: PlacementSchema) {
        let mut placements = self.placements.borrow_mut();
        for (key, list) in schema {
            let list = list.into_iter().map(|s| s.into_placement(&key)).collect();
            placements.insert(key, list);
        }
    }

    fn update<F>(&self, key: &DocumentKey, field_name: &FieldName, mut apply: F) -> bool
    where
        F: FnMut(&mut Placement),
    {
        let found = {
            let mut placements = self.placements.borrow_mut();
            let mut found = false;
            if let Some(list) = placements.get_mut(key) {
                for placement in list.iter_mut().filter(|p| &p.field_name == field_name) {
                    apply(placement);
                    found = true;
                }
            }
            found
        };
        if found {
            self.persist(key);
        }
        found
    }

    /// Write through to session storage.
    ///
    /// The in-memory map stays authoritative, so a storage failure is logged
    /// and the session carries on.
    fn persist(&self, touched: &DocumentKey) {
        if let Err(e) = self.write_storage(touched) {
            warn!(document = %touched, error = %e, "failed to persist placements");
        }
    }

    fn write_storage(&self, touched: &DocumentKey) -> Result<(), StoreError> {
        let schema = serde_json::to_string(&self.to_schema())?;
        self.storage.set_item(KEY_PLACEMENTS, &schema)?;

        let box_sizes: Vec<PageRect> = self
            .placements
            .borrow()
            .get(touched)
            .map(|list| list.iter().map(|p| p.page_rect).collect())
            .unwrap_or_default();
        *self.box_sizes.borrow_mut() = box_sizes;
        self.write_box_sizes()
    }

    fn write_box_sizes(&self) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&*self.box_sizes.borrow())?;
        self.storage.set_item(KEY_BOX_SIZES, &raw)?;
        Ok(())
    }
}
