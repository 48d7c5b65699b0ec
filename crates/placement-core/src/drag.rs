//! Drag payload carried from the widget palette to the drop target
//!
//! The drag source only has a text channel, so the payload is encoded as
//! `placement%<signee id>%<type>`. It is captured at drag start from the
//! active signee, which is who the drop gets attributed to.

use shared_types::{PlacementType, SigneeId};

use crate::error::PlacementError;
use crate::registry::SigneeRegistry;

const PREFIX: &str = "placement";
const SEPARATOR: char = '%';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragPayload {
    pub signee_id: SigneeId,
    pub placement_type: PlacementType,
}

impl DragPayload {
    /// Capture the active signee when a drag starts
    pub fn capture(
        registry: &SigneeRegistry,
        placement_type: PlacementType,
    ) -> Result<Self, PlacementError> {
        let signee = registry
            .active_signee()
            .ok_or(PlacementError::NoActiveSignee)?;
        Ok(Self {
            signee_id: signee.id,
            placement_type,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{PREFIX}{SEPARATOR}{}{SEPARATOR}{}",
            self.signee_id,
            self.placement_type.as_str()
        )
    }

    pub fn decode(raw: &str) -> Result<Self, PlacementError> {
        let invalid = || PlacementError::InvalidPayload(raw.to_string());

        let mut parts = raw.split(SEPARATOR);
        if parts.next() != Some(PREFIX) {
            return Err(invalid());
        }
        let signee_id = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .map(SigneeId)
            .ok_or_else(invalid)?;
        let placement_type = parts
            .next()
            .and_then(PlacementType::parse)
            .ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            signee_id,
            placement_type,
        })
    }
}
