//! Annotation lifecycle reconciler
//!
//! Drives one engine instance per open document through
//! `Unloaded -> Loading -> Ready -> Replaying -> Live -> Unloaded`.
//!
//! - On every load, persisted placements are replayed into the engine as
//!   widget + form-field pairs named by their `fieldName`.
//! - While `Live`, drops become new placements attributed to the signee
//!   captured at drag start.
//! - Events arriving in any other state are logged and ignored.
//!
//! Engine calls suspend, so state lives in `Cell`/`RefCell` and is never
//! borrowed across an `.await`. Each load gets a generation number; work
//! that resumes after a teardown or a newer load sees the generation change
//! and stops.

use shared_types::{DocumentKey, FieldName, Placement, PlacementType, Signee, SigneeId};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::config::Footprints;
use crate::coords;
use crate::drag::DragPayload;
use crate::engine::{
    DocumentEngine, DropEvent, EngineAnnotation, EngineAnnotationRef, EngineEvent, EngineHandle,
    EngineObject, EngineObjectId, FormFieldKind, FormFieldSpec, LoadOptions, WidgetData,
    WidgetSpec,
};
use crate::error::{PlacementError, RosterError};
use crate::registry::{field_capabilities, SigneeRegistry};
use crate::store::PlacementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Replaying,
    Live,
}

/// Outcome of replaying a document's placements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Placements recreated in the engine
    pub created: usize,
    /// Placements whose form field was already in the document
    pub attached: usize,
    /// Placements the engine rejected; they stay in the store
    pub failed: Vec<FieldName>,
}

struct OpenDocument {
    key: DocumentKey,
    handle: Option<EngineHandle>,
    /// Engine ids for this load only
    refs: HashMap<FieldName, EngineAnnotationRef>,
    signed_markers: BTreeSet<FieldName>,
    signature_annotations: Vec<EngineObjectId>,
}

pub struct Reconciler {
    engine: Rc<dyn DocumentEngine>,
    store: Rc<PlacementStore>,
    registry: Rc<SigneeRegistry>,
    footprints: Footprints,
    options: LoadOptions,
    state: Cell<LoadState>,
    generation: Cell<u64>,
    open: RefCell<Option<OpenDocument>>,
}

impl Reconciler {
    pub fn new(
        engine: Rc<dyn DocumentEngine>,
        store: Rc<PlacementStore>,
        registry: Rc<SigneeRegistry>,
        footprints: Footprints,
        options: LoadOptions,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            footprints,
            options,
            state: Cell::new(LoadState::Unloaded),
            generation: Cell::new(0),
            open: RefCell::new(None),
        }
    }

    pub fn state(&self) -> LoadState {
        self.state.get()
    }

    pub fn is_live(&self) -> bool {
        self.state.get() == LoadState::Live
    }

    /// Bumped by every `open` and `close`; equal values mean the same load
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn current_key(&self) -> Option<DocumentKey> {
        self.open.borrow().as_ref().map(|d| d.key.clone())
    }

    pub fn current_handle(&self) -> Option<EngineHandle> {
        self.open.borrow().as_ref().and_then(|d| d.handle)
    }

    /// Engine ids backing a placement in the current load
    pub fn engine_ref(&self, field_name: &FieldName) -> Option<EngineAnnotationRef> {
        self.open
            .borrow()
            .as_ref()
            .and_then(|d| d.refs.get(field_name).cloned())
    }

    /// Placements whose widget has a signature drawn over it in this load
    pub fn signed_markers(&self) -> BTreeSet<FieldName> {
        self.open
            .borrow()
            .as_ref()
            .map(|d| d.signed_markers.clone())
            .unwrap_or_default()
    }

    /// Signature annotations seen through create/load events in this load
    pub fn signature_annotations(&self) -> Vec<EngineObjectId> {
        self.open
            .borrow()
            .as_ref()
            .map(|d| d.signature_annotations.clone())
            .unwrap_or_default()
    }

    /// Load `document` under `key` and replay its placements.
    ///
    /// Any document already open is torn down first. Fails with
    /// `Superseded` when `close` or another `open` runs while this one is
    /// suspended; the engine handle is released in every case.
    pub async fn open(
        &self,
        key: DocumentKey,
        document: Vec<u8>,
    ) -> Result<ReplayReport, PlacementError> {
        if self.state.get() != LoadState::Unloaded {
            self.close();
        }

        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        *self.open.borrow_mut() = Some(OpenDocument {
            key: key.clone(),
            handle: None,
            refs: HashMap::new(),
            signed_markers: BTreeSet::new(),
            signature_annotations: Vec::new(),
        });
        self.transition(LoadState::Loading);

        let loaded = self.engine.load(&document, &self.options).await;
        let handle = match loaded {
            Ok(handle) => handle,
            Err(e) => {
                warn!(document = %key, error = %e, "engine load failed");
                if self.is_current(generation) {
                    self.reset();
                }
                return Err(e.into());
            }
        };

        if !self.is_current(generation) {
            // Torn down while loading: nobody else knows this handle
            self.release(handle);
            return Err(PlacementError::Superseded(key));
        }

        if let Some(open) = self.open.borrow_mut().as_mut() {
            open.handle = Some(handle);
        }
        self.transition(LoadState::Ready);

        self.transition(LoadState::Replaying);
        let report = match self.replay(&key, handle, generation).await {
            Ok(report) => report,
            Err(e) => {
                self.abort(generation);
                return Err(e);
            }
        };
        if let Err(e) = self.apply_read_only_flags(handle, generation).await {
            if !self.is_current(generation) {
                return Err(e);
            }
            // Recoverable: flags are recomputed on the next switch or load
            warn!(document = %key, error = %e, "could not apply read-only flags");
        }

        self.transition(LoadState::Live);
        info!(
            document = %key,
            created = report.created,
            attached = report.attached,
            failed = report.failed.len(),
            "document live"
        );
        Ok(report)
    }

    /// Release the engine handle and return to `Unloaded` from any state
    pub fn close(&self) {
        self.generation.set(self.generation.get() + 1);
        let open = self.open.borrow_mut().take();
        if let Some(handle) = open.and_then(|d| d.handle) {
            self.release(handle);
        }
        self.transition(LoadState::Unloaded);
    }

    /// Swap the working document of the open key for new bytes
    pub async fn reload(&self, document: Vec<u8>) -> Result<ReplayReport, PlacementError> {
        let key = self
            .current_key()
            .ok_or(PlacementError::NotReady(self.state.get()))?;
        self.open(key, document).await
    }

    /// Dispatch an engine event. Failures are logged; events are fire-and-forget.
    pub async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Drop(drop) => {
                if let Err(e) = self.handle_drop(drop).await {
                    warn!(error = %e, "drop ignored");
                }
            }
            EngineEvent::AnnotationsCreate(annotations)
            | EngineEvent::AnnotationsLoad(annotations) => {
                self.reconcile_signatures(annotations).await;
            }
        }
    }

    /// Turn a drop into a persisted placement plus its engine objects.
    ///
    /// Drops outside `Live` are rejected with `NotReady` and change nothing.
    pub async fn handle_drop(&self, drop: DropEvent) -> Result<Placement, PlacementError> {
        let (key, handle, generation) = self.live_context()?;

        let payload = DragPayload::decode(&drop.payload)?;
        let signee = self
            .registry
            .get(payload.signee_id)
            .ok_or(RosterError::UnknownSignee(payload.signee_id))?;

        let pointer = coords::pointer_rect_for(
            payload.placement_type,
            drop.client_x,
            drop.client_y,
            &self.footprints,
        );
        let page_rect =
            coords::to_page_rect(&*self.engine, Some(handle), pointer, drop.page_index).await?;

        if !self.is_current(generation) || !self.is_live() {
            warn!(document = %key, "document changed during drop; ignoring");
            return Err(PlacementError::NotReady(self.state.get()));
        }

        let field_name = next_field_name(payload.placement_type, &self.store.field_names(&key));
        let placement = Placement {
            document_key: key.clone(),
            signee_id: signee.id,
            placement_type: payload.placement_type,
            page_rect,
            field_name,
            signed: false,
        };
        self.store.append(&key, placement.clone());

        let read_only = !self.editable_by_active(&placement);
        let objects = engine_objects(&placement, Some(&signee), read_only);
        match self.engine.create_annotations(handle, objects).await {
            Ok(ids) => self.remember_refs(generation, &placement.field_name, ids),
            Err(e) => {
                // Persisted anyway; the next load replays it
                warn!(field = %placement.field_name, error = %e, "engine rejected new placement");
            }
        }
        debug!(field = %placement.field_name, signee = %signee.id, "placement created");
        Ok(placement)
    }

    /// Move a placement so it is centered on a new pointer position.
    ///
    /// Only the active signee's editable fields may move; anything else is
    /// rejected with `NotAuthorized` before the engine is touched.
    pub async fn move_placement(
        &self,
        field_name: &FieldName,
        client_x: f64,
        client_y: f64,
    ) -> Result<Placement, PlacementError> {
        let (key, handle, generation) = self.live_context()?;
        let placement = self
            .store
            .find(&key, field_name)
            .ok_or_else(|| PlacementError::UnknownField(field_name.clone()))?;
        let active = self
            .registry
            .active_signee()
            .ok_or(PlacementError::NoActiveSignee)?;

        let caps = field_capabilities(&active, std::slice::from_ref(&placement));
        if !caps.get(field_name).map(|c| c.editable).unwrap_or(false) {
            return Err(PlacementError::NotAuthorized {
                signee: active.id,
                field: field_name.clone(),
            });
        }

        let widget_id = self
            .engine_ref(field_name)
            .map(|r| r.widget_id)
            .ok_or_else(|| PlacementError::UnknownField(field_name.clone()))?;
        let pointer = coords::pointer_rect_for(
            placement.placement_type,
            client_x,
            client_y,
            &self.footprints,
        );
        let page_index = placement.page_rect.page_index();
        let page_rect = coords::to_page_rect(&*self.engine, Some(handle), pointer, page_index).await?;

        if !self.is_current(generation) {
            return Err(PlacementError::Superseded(key));
        }
        self.engine
            .update_annotation(handle, &widget_id, page_rect)
            .await?;
        self.store.relocate(&key, field_name, page_rect);

        Ok(Placement {
            page_rect,
            ..placement
        })
    }

    /// Make `id` the active signee and refresh read-only flags to match
    pub async fn switch_active_signee(&self, id: SigneeId) -> Result<(), PlacementError> {
        self.registry.set_active(id)?;
        if !self.is_live() {
            // Flags are applied on the next load
            return Ok(());
        }
        let (_, handle, generation) = self.live_context()?;
        self.apply_read_only_flags(handle, generation).await
    }

    /// Current document bytes, including engine-side changes
    pub async fn export_document(&self) -> Result<Vec<u8>, PlacementError> {
        let (_, handle, _) = self.live_context()?;
        Ok(self.engine.export_document_bytes(handle).await?)
    }

    async fn replay(
        &self,
        key: &DocumentKey,
        handle: EngineHandle,
        generation: u64,
    ) -> Result<ReplayReport, PlacementError> {
        let placements = self.store.list_for(key);
        let mut report = ReplayReport::default();

        // Fields already in the document (e.g. returned signed) are reused
        let existing = match self.engine.get_form_fields(handle).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(document = %key, error = %e, "could not list form fields before replay");
                Vec::new()
            }
        };
        self.ensure_current(key, generation)?;

        let active = self.registry.active_signee();
        let caps = active
            .as_ref()
            .map(|a| field_capabilities(a, &placements))
            .unwrap_or_default();

        for placement in &placements {
            if let Some(field) = existing.iter().find(|f| f.name == placement.field_name) {
                if let Some(widget_id) = field.annotation_ids.first() {
                    self.remember_refs(
                        generation,
                        &placement.field_name,
                        vec![widget_id.clone(), field.id.clone()],
                    );
                }
                report.attached += 1;
                continue;
            }

            let signee = self.registry.get(placement.signee_id);
            let read_only = caps
                .get(&placement.field_name)
                .map(|c| c.read_only())
                .unwrap_or(true);
            let objects = engine_objects(placement, signee.as_ref(), read_only);

            let created = self.engine.create_annotations(handle, objects).await;
            self.ensure_current(key, generation)?;
            match created {
                Ok(ids) => {
                    self.remember_refs(generation, &placement.field_name, ids);
                    report.created += 1;
                }
                Err(e) => {
                    warn!(field = %placement.field_name, error = %e, "replay failed for placement");
                    report.failed.push(placement.field_name.clone());
                }
            }
        }
        Ok(report)
    }

    /// Set every placement form field's read-only flag for the active signee
    async fn apply_read_only_flags(
        &self,
        handle: EngineHandle,
        generation: u64,
    ) -> Result<(), PlacementError> {
        let key = match self.current_key() {
            Some(key) => key,
            None => return Ok(()),
        };
        let placements = self.store.list_for(&key);
        let caps = match self.registry.active_signee() {
            Some(active) => field_capabilities(&active, &placements),
            None => Default::default(),
        };

        let fields = self.engine.get_form_fields(handle).await?;
        self.ensure_current(&key, generation)?;

        for field in fields {
            // Fields that are not placements (pre-existing form) are left alone
            if !placements.iter().any(|p| p.field_name == field.name) {
                continue;
            }
            let read_only = caps
                .get(&field.name)
                .map(|c| c.read_only())
                .unwrap_or(true);
            if field.read_only == read_only {
                continue;
            }
            let result = self
                .engine
                .set_form_field_read_only(handle, &field.id, read_only)
                .await;
            self.ensure_current(&key, generation)?;
            if let Err(e) = result {
                warn!(field = %field.name, error = %e, "could not update read-only flag");
            }
        }
        Ok(())
    }

    /// Cosmetic: mark placements a signature annotation was drawn over
    async fn reconcile_signatures(&self, annotations: Vec<EngineAnnotation>) {
        let (key, handle, generation) = match self.live_context() {
            Ok(context) => context,
            Err(e) => {
                debug!(error = %e, "annotation event ignored");
                return;
            }
        };

        let signatures: Vec<_> = annotations.into_iter().filter(|a| a.is_signature).collect();
        if signatures.is_empty() {
            return;
        }
        let known = self.store.field_names(&key);
        let pages: HashSet<u32> = signatures.iter().map(|a| a.page_rect.page_index()).collect();

        let mut marked = BTreeSet::new();
        for page in pages {
            let on_page = match self.engine.get_annotations(handle, page).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(page, error = %e, "could not read annotations for signature reconciliation");
                    continue;
                }
            };
            if !self.is_current(generation) {
                return;
            }
            for widget in &on_page {
                let name = match &widget.form_field_name {
                    Some(name) if known.contains(name) => name,
                    _ => continue,
                };
                if signatures.iter().any(|s| s.page_rect.overlaps(&widget.page_rect)) {
                    marked.insert(name.clone());
                }
            }
        }

        if let Some(open) = self.open.borrow_mut().as_mut() {
            open.signature_annotations
                .extend(signatures.iter().map(|s| s.id.clone()));
            open.signed_markers.extend(marked);
        }
    }

    fn editable_by_active(&self, placement: &Placement) -> bool {
        self.registry
            .active_signee()
            .map(|active| {
                field_capabilities(&active, std::slice::from_ref(placement))
                    .values()
                    .all(|c| c.editable)
            })
            .unwrap_or(false)
    }

    fn live_context(&self) -> Result<(DocumentKey, EngineHandle, u64), PlacementError> {
        let state = self.state.get();
        let open = self.open.borrow();
        match (state, open.as_ref()) {
            (LoadState::Live, Some(OpenDocument {
                key,
                handle: Some(handle),
                ..
            })) => Ok((key.clone(), *handle, self.generation.get())),
            _ => Err(PlacementError::NotReady(state)),
        }
    }

    fn remember_refs(&self, generation: u64, field_name: &FieldName, ids: Vec<EngineObjectId>) {
        if !self.is_current(generation) {
            return;
        }
        let mut ids = ids.into_iter();
        if let (Some(widget_id), Some(form_field_id)) = (ids.next(), ids.next()) {
            if let Some(open) = self.open.borrow_mut().as_mut() {
                open.refs.insert(
                    field_name.clone(),
                    EngineAnnotationRef {
                        widget_id,
                        form_field_id,
                    },
                );
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    fn ensure_current(&self, key: &DocumentKey, generation: u64) -> Result<(), PlacementError> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(PlacementError::Superseded(key.clone()))
        }
    }

    fn release(&self, handle: EngineHandle) {
        if let Err(e) = self.engine.unload(handle) {
            warn!(handle = handle.0, error = %e, "engine unload failed");
        }
    }

    /// Tear down a load that failed part-way, unless something newer owns the viewer
    fn abort(&self, generation: u64) {
        if self.is_current(generation) {
            self.close();
        }
    }

    fn reset(&self) {
        self.open.borrow_mut().take();
        self.transition(LoadState::Unloaded);
    }

    fn transition(&self, next: LoadState) {
        let prev = self.state.replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "load state");
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if self.current_handle().is_some() {
            self.close();
        }
    }
}

/// Next unused `<Prefix>Field<n>` name for a document.
///
/// Depends only on names already taken, never on placement content.
pub fn next_field_name(placement_type: PlacementType, taken: &HashSet<FieldName>) -> FieldName {
    let prefix = placement_type.field_prefix();
    let mut n = taken
        .iter()
        .filter(|name| name.as_str().starts_with(prefix))
        .count();
    loop {
        let candidate = FieldName::new(format!("{}Field{}", prefix, n));
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn widget_label(placement_type: PlacementType, signee_name: &str) -> String {
    match placement_type {
        PlacementType::Signature | PlacementType::DigitalSignature => {
            format!("Sign for {}", signee_name)
        }
        PlacementType::Initial => format!("Initials for {}", signee_name),
        PlacementType::Name => format!("Name of {}", signee_name),
        PlacementType::Date => format!("Date for {}", signee_name),
    }
}

/// Widget + form-field pair for a placement, named by its `fieldName`
fn engine_objects(
    placement: &Placement,
    signee: Option<&Signee>,
    read_only: bool,
) -> Vec<EngineObject> {
    let (name, email, color) = match signee {
        Some(s) => (s.name.as_str(), s.email.clone(), Some(s.color)),
        None => ("unknown signee", String::new(), None),
    };
    let kind = if placement.placement_type.is_signature() {
        FormFieldKind::Signature
    } else {
        FormFieldKind::Text
    };

    vec![
        EngineObject::Widget(WidgetSpec {
            form_field_name: placement.field_name.clone(),
            page_rect: placement.page_rect,
            label: widget_label(placement.placement_type, name),
            custom_data: WidgetData {
                placement_type: placement.placement_type,
                signee_id: placement.signee_id,
                signer_email: email,
                signer_color: color,
            },
        }),
        EngineObject::FormField(FormFieldSpec {
            name: placement.field_name.clone(),
            kind,
            read_only,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{DocumentKey, PageRect, Role, SigneeColor};

    fn names(list: &[&str]) -> HashSet<FieldName> {
        list.iter().map(|n| FieldName::from(*n)).collect()
    }

    #[test]
    fn test_next_field_name_counts_per_prefix() {
        let taken = names(&["SignatureField0", "DateField0"]);
        assert_eq!(
            next_field_name(PlacementType::Signature, &taken),
            FieldName::from("SignatureField1")
        );
        assert_eq!(
            next_field_name(PlacementType::Initial, &taken),
            FieldName::from("InitialField0")
        );
    }

    #[test]
    fn test_next_field_name_skips_collisions() {
        // A gap leaves the count pointing at a taken name
        let taken = names(&["SignatureField1", "SignatureField2"]);
        assert_eq!(
            next_field_name(PlacementType::DigitalSignature, &taken),
            FieldName::from("SignatureField3")
        );
    }

    #[test]
    fn test_engine_objects_pair() {
        let signee = Signee {
            id: SigneeId(5),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            color: SigneeColor::rgb(1, 2, 3),
            role: Role::Signer,
        };
        let placement = Placement {
            document_key: DocumentKey::from_reference("a.pdf"),
            signee_id: signee.id,
            placement_type: PlacementType::Signature,
            page_rect: PageRect::new(1.0, 2.0, 250.0, 100.0, 0).unwrap(),
            field_name: FieldName::from("SignatureField0"),
            signed: false,
        };

        let objects = engine_objects(&placement, Some(&signee), true);
        match objects.as_slice() {
            [EngineObject::Widget(w), EngineObject::FormField(f)] => {
                assert_eq!(w.label, "Sign for Alice");
                assert_eq!(w.form_field_name, placement.field_name);
                assert_eq!(w.custom_data.signer_email, "alice@example.com");
                assert_eq!(f.name, placement.field_name);
                assert_eq!(f.kind, FormFieldKind::Signature);
                assert!(f.read_only);
            }
            other => panic!("unexpected objects: {:?}", other),
        }
    }
}
