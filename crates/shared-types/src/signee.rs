//! Participants who own placements

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigneeId(pub u32);

impl fmt::Display for SigneeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Prepares the document: places fields for everyone, sees the toolbar
    Editor,
    /// Fills in only the fields assigned to them
    Signer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigneeColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl SigneeColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// CSS `rgb()` form used by widget custom data
    pub fn css(&self) -> String {
        format!("rgb({},{},{})", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signee {
    pub id: SigneeId,
    pub name: String,
    pub email: String,
    pub color: SigneeColor,
    pub role: Role,
}

impl Signee {
    pub fn is_editor(&self) -> bool {
        self.role == Role::Editor
    }
}
