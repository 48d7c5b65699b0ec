//! Capability surface of the external document engine
//!
//! The engine renders the PDF, owns annotation storage and does the
//! coordinate math. This crate only drives it through [`DocumentEngine`].
//! Engine identifiers ([`EngineHandle`], [`EngineObjectId`]) are valid for a
//! single load and are never persisted.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{ClientRect, FieldName, PageRect, PlacementType, SigneeColor, SigneeId};
use std::fmt;

use crate::error::EngineError;

/// Handle of one loaded engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

/// Engine-assigned id of an annotation or form field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineObjectId(pub String);

impl fmt::Display for EngineObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine ids of the widget/form-field pair backing one placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAnnotationRef {
    pub widget_id: EngineObjectId,
    pub form_field_id: EngineObjectId,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub container: String,
    pub base_url: Option<String>,
}

/// Raw rectangle as returned by the engine's projection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Custom data attached to placement widgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetData {
    #[serde(rename = "type")]
    pub placement_type: PlacementType,
    pub signee_id: SigneeId,
    pub signer_email: String,
    pub signer_color: Option<SigneeColor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSpec {
    pub form_field_name: FieldName,
    pub page_rect: PageRect,
    pub label: String,
    pub custom_data: WidgetData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFieldKind {
    Signature,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormFieldSpec {
    pub name: FieldName,
    pub kind: FormFieldKind,
    pub read_only: bool,
}

/// Object submitted through `create_annotations`
#[derive(Debug, Clone, PartialEq)]
pub enum EngineObject {
    Widget(WidgetSpec),
    FormField(FormFieldSpec),
}

/// Annotation as reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineAnnotation {
    pub id: EngineObjectId,
    pub page_rect: PageRect,
    /// Set for widgets bound to a form field
    pub form_field_name: Option<FieldName>,
    /// Ink/image annotation produced by the engine's signing UI
    pub is_signature: bool,
    pub custom_data: Option<WidgetData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineFormField {
    pub id: EngineObjectId,
    pub name: FieldName,
    pub kind: FormFieldKind,
    pub read_only: bool,
    pub annotation_ids: Vec<EngineObjectId>,
}

/// Drop of a dragged widget inside the engine's content area
#[derive(Debug, Clone, PartialEq)]
pub struct DropEvent {
    pub client_x: f64,
    pub client_y: f64,
    pub page_index: u32,
    /// Text payload set by the drag source
    pub payload: String,
}

/// Externally driven events delivered by the host
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Drop(DropEvent),
    /// `annotations.create`
    AnnotationsCreate(Vec<EngineAnnotation>),
    /// `annotations.load`
    AnnotationsLoad(Vec<EngineAnnotation>),
}

/// Operations the placement engine needs from the document engine.
///
/// All async calls may suspend; callers re-check their own state after every
/// await. `unload` is synchronous so teardown can run on every exit path,
/// including `Drop`.
#[async_trait(?Send)]
pub trait DocumentEngine {
    async fn load(&self, document: &[u8], options: &LoadOptions)
        -> Result<EngineHandle, EngineError>;

    fn unload(&self, handle: EngineHandle) -> Result<(), EngineError>;

    async fn transform_client_rect_to_page_rect(
        &self,
        handle: EngineHandle,
        rect: ClientRect,
        page_index: u32,
    ) -> Result<EngineRect, EngineError>;

    /// Create objects, returning their engine ids in submission order
    async fn create_annotations(
        &self,
        handle: EngineHandle,
        objects: Vec<EngineObject>,
    ) -> Result<Vec<EngineObjectId>, EngineError>;

    /// Move an existing widget
    async fn update_annotation(
        &self,
        handle: EngineHandle,
        id: &EngineObjectId,
        page_rect: PageRect,
    ) -> Result<(), EngineError>;

    async fn get_annotations(
        &self,
        handle: EngineHandle,
        page_index: u32,
    ) -> Result<Vec<EngineAnnotation>, EngineError>;

    async fn get_form_fields(&self, handle: EngineHandle)
        -> Result<Vec<EngineFormField>, EngineError>;

    async fn set_form_field_read_only(
        &self,
        handle: EngineHandle,
        id: &EngineObjectId,
        read_only: bool,
    ) -> Result<(), EngineError>;

    async fn export_document_bytes(&self, handle: EngineHandle) -> Result<Vec<u8>, EngineError>;
}
