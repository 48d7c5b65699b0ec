//! Session-scoped key-value storage
//!
//! Mirrors the browser's `sessionStorage`: string keys, string values,
//! discarded with the session. The stores serialize into it; the mechanism
//! itself is supplied by the host.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::StoreError;

pub const KEY_PLACEMENTS: &str = "pdfSignatureData";
pub const KEY_USERS: &str = "users";
pub const KEY_BOX_SIZES: &str = "boxSizes";

pub trait SessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process session storage
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: RefCell<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}
