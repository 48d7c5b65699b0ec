//! Durable placement records

use serde::{Deserialize, Serialize};

use crate::signee::SigneeId;
use crate::types::{DocumentKey, FieldName, PageRect};

/// Kind of widget dragged onto the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementType {
    Signature,
    Initial,
    Name,
    Date,
    /// Digital (certificate) signature, submitted to the signing service
    #[serde(rename = "ds")]
    DigitalSignature,
}

impl PlacementType {
    pub const ALL: [PlacementType; 5] = [
        PlacementType::Signature,
        PlacementType::Initial,
        PlacementType::Name,
        PlacementType::Date,
        PlacementType::DigitalSignature,
    ];

    /// Tag carried in drag payloads and widget custom data
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementType::Signature => "signature",
            PlacementType::Initial => "initial",
            PlacementType::Name => "name",
            PlacementType::Date => "date",
            PlacementType::DigitalSignature => "ds",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "signature" => Some(PlacementType::Signature),
            "initial" | "initials" => Some(PlacementType::Initial),
            "name" => Some(PlacementType::Name),
            "date" => Some(PlacementType::Date),
            "ds" => Some(PlacementType::DigitalSignature),
            _ => None,
        }
    }

    /// Prefix for generated field names, e.g. `SignatureField0`
    pub fn field_prefix(&self) -> &'static str {
        match self {
            PlacementType::Signature | PlacementType::DigitalSignature => "Signature",
            PlacementType::Initial => "Initial",
            PlacementType::Name => "Name",
            PlacementType::Date => "Date",
        }
    }

    /// Whether the engine form field for this type is a signature field
    pub fn is_signature(&self) -> bool {
        matches!(
            self,
            PlacementType::Signature | PlacementType::DigitalSignature
        )
    }
}

/// Where a signature-related widget belongs, independent of any engine load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub document_key: DocumentKey,
    pub signee_id: SigneeId,
    #[serde(rename = "type")]
    pub placement_type: PlacementType,
    pub page_rect: PageRect,
    pub field_name: FieldName,
    pub signed: bool,
}
