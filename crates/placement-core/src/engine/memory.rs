//! In-process document engine
//!
//! Keeps annotations and form fields in memory and projects coordinates with
//! per-page [`PageViewport`]s. Every load hands out fresh object ids, the
//! same way the real engine does, which makes it useful for exercising
//! reload behaviour. Failure injection and counters are provided for tests.

use async_trait::async_trait;
use shared_types::{ClientRect, FieldName, PageRect};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use uuid::Uuid;

use super::{
    DocumentEngine, EngineAnnotation, EngineFormField, EngineHandle, EngineObject,
    EngineObjectId, EngineRect, FormFieldKind, LoadOptions,
};
use crate::coords::{client_rect_to_page, PageViewport};
use crate::error::EngineError;

/// Form field baked into a document's bytes, e.g. by the signing service
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedField {
    pub name: FieldName,
    pub kind: FormFieldKind,
    pub page_rect: PageRect,
}

#[derive(Debug, Default)]
struct Instance {
    document: Vec<u8>,
    annotations: Vec<EngineAnnotation>,
    form_fields: Vec<EngineFormField>,
}

#[derive(Debug)]
struct Inner {
    next_handle: u64,
    instances: HashMap<EngineHandle, Instance>,
    viewports: Vec<PageViewport>,
    embedded: HashMap<Vec<u8>, Vec<EmbeddedField>>,
    load_yields: usize,
    fail_next_load: bool,
    fail_export: bool,
    fail_create_for: HashSet<FieldName>,
    loads: usize,
    unloads: usize,
    mutations: usize,
}

pub struct InMemoryEngine {
    inner: RefCell<Inner>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryEngine {
    /// Engine whose documents have `page_count` Letter pages at 100% zoom
    pub fn new(page_count: usize) -> Self {
        Self::with_viewports(vec![PageViewport::letter(); page_count.max(1)])
    }

    pub fn with_viewports(viewports: Vec<PageViewport>) -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_handle: 1,
                instances: HashMap::new(),
                viewports,
                embedded: HashMap::new(),
                load_yields: 0,
                fail_next_load: false,
                fail_export: false,
                fail_create_for: HashSet::new(),
                loads: 0,
                unloads: 0,
                mutations: 0,
            }),
        }
    }

    /// Declare form fields that loading `document` will already contain
    pub fn embed_fields(&self, document: &[u8], fields: Vec<EmbeddedField>) {
        self.inner
            .borrow_mut()
            .embedded
            .insert(document.to_vec(), fields);
    }

    /// Make `load` suspend this many times before resolving
    pub fn set_load_yields(&self, yields: usize) {
        self.inner.borrow_mut().load_yields = yields;
    }

    pub fn fail_next_load(&self) {
        self.inner.borrow_mut().fail_next_load = true;
    }

    pub fn set_fail_export(&self, fail: bool) {
        self.inner.borrow_mut().fail_export = fail;
    }

    /// Reject creation of any object named `name`
    pub fn fail_create_for(&self, name: FieldName) {
        self.inner.borrow_mut().fail_create_for.insert(name);
    }

    pub fn load_count(&self) -> usize {
        self.inner.borrow().loads
    }

    pub fn unload_count(&self) -> usize {
        self.inner.borrow().unloads
    }

    /// Number of instances currently bound to a container
    pub fn live_instances(&self) -> usize {
        self.inner.borrow().instances.len()
    }

    /// Create/update/read-only calls that changed engine state
    pub fn mutation_count(&self) -> usize {
        self.inner.borrow().mutations
    }

    /// Simulate the engine's own signing UI stamping a signature image
    pub fn add_signature_annotation(
        &self,
        handle: EngineHandle,
        page_rect: PageRect,
    ) -> Result<EngineAnnotation, EngineError> {
        let mut inner = self.inner.borrow_mut();
        let instance = inner
            .instances
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle.0))?;
        let annotation = EngineAnnotation {
            id: fresh_id(),
            page_rect,
            form_field_name: None,
            is_signature: true,
            custom_data: None,
        };
        instance.annotations.push(annotation.clone());
        Ok(annotation)
    }

    fn page_count(&self) -> u32 {
        self.inner.borrow().viewports.len() as u32
    }
}

fn fresh_id() -> EngineObjectId {
    EngineObjectId(Uuid::new_v4().to_string())
}

fn instance_mut(inner: &mut Inner, handle: EngineHandle) -> Result<&mut Instance, EngineError> {
    inner
        .instances
        .get_mut(&handle)
        .ok_or(EngineError::UnknownHandle(handle.0))
}

fn instance(inner: &Inner, handle: EngineHandle) -> Result<&Instance, EngineError> {
    inner
        .instances
        .get(&handle)
        .ok_or(EngineError::UnknownHandle(handle.0))
}

/// Resolves after being polled `remaining + 1` times
struct YieldNow {
    remaining: usize,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.remaining == 0 {
            return Poll::Ready(());
        }
        self.remaining -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[async_trait(?Send)]
impl DocumentEngine for InMemoryEngine {
    async fn load(
        &self,
        document: &[u8],
        _options: &LoadOptions,
    ) -> Result<EngineHandle, EngineError> {
        let yields = self.inner.borrow().load_yields;
        YieldNow { remaining: yields }.await;

        let mut inner = self.inner.borrow_mut();
        if std::mem::take(&mut inner.fail_next_load) {
            return Err(EngineError::Load("document could not be parsed".into()));
        }
        if document.is_empty() {
            return Err(EngineError::Load("empty document".into()));
        }

        let handle = EngineHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.loads += 1;

        let mut instance = Instance {
            document: document.to_vec(),
            ..Instance::default()
        };
        let embedded = inner.embedded.get(document).cloned().unwrap_or_default();
        for field in embedded {
            let widget = EngineAnnotation {
                id: fresh_id(),
                page_rect: field.page_rect,
                form_field_name: Some(field.name.clone()),
                is_signature: false,
                custom_data: None,
            };
            instance.form_fields.push(EngineFormField {
                id: fresh_id(),
                name: field.name,
                kind: field.kind,
                read_only: false,
                annotation_ids: vec![widget.id.clone()],
            });
            instance.annotations.push(widget);
        }
        inner.instances.insert(handle, instance);
        Ok(handle)
    }

    fn unload(&self, handle: EngineHandle) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        inner
            .instances
            .remove(&handle)
            .ok_or(EngineError::UnknownHandle(handle.0))?;
        inner.unloads += 1;
        Ok(())
    }

    async fn transform_client_rect_to_page_rect(
        &self,
        handle: EngineHandle,
        rect: ClientRect,
        page_index: u32,
    ) -> Result<EngineRect, EngineError> {
        let inner = self.inner.borrow();
        instance(&inner, handle)?;
        let viewport = inner
            .viewports
            .get(page_index as usize)
            .ok_or_else(|| EngineError::Operation(format!("no page {}", page_index)))?;
        let (left, top, width, height) = client_rect_to_page(rect, viewport);
        Ok(EngineRect {
            left,
            top,
            width,
            height,
        })
    }

    async fn create_annotations(
        &self,
        handle: EngineHandle,
        objects: Vec<EngineObject>,
    ) -> Result<Vec<EngineObjectId>, EngineError> {
        let page_count = self.page_count();
        let mut inner = self.inner.borrow_mut();

        // Validate the whole batch first so a rejected batch creates nothing
        for object in &objects {
            let name = match object {
                EngineObject::Widget(w) => {
                    if w.page_rect.page_index() >= page_count {
                        return Err(EngineError::Operation(format!(
                            "page {} out of range",
                            w.page_rect.page_index()
                        )));
                    }
                    &w.form_field_name
                }
                EngineObject::FormField(f) => &f.name,
            };
            if inner.fail_create_for.contains(name) {
                return Err(EngineError::Operation(format!("cannot create {}", name)));
            }
        }

        let instance = instance_mut(&mut inner, handle)?;
        let mut ids = Vec::with_capacity(objects.len());
        let mut widgets_by_field: HashMap<FieldName, Vec<EngineObjectId>> = HashMap::new();
        let mut pending_fields = Vec::new();

        for object in objects {
            let id = fresh_id();
            match object {
                EngineObject::Widget(w) => {
                    widgets_by_field
                        .entry(w.form_field_name.clone())
                        .or_default()
                        .push(id.clone());
                    instance.annotations.push(EngineAnnotation {
                        id: id.clone(),
                        page_rect: w.page_rect,
                        form_field_name: Some(w.form_field_name),
                        is_signature: false,
                        custom_data: Some(w.custom_data),
                    });
                }
                EngineObject::FormField(f) => pending_fields.push((id.clone(), f)),
            }
            ids.push(id);
        }
        // Form fields reference the widgets of the same batch
        for (id, f) in pending_fields {
            let annotation_ids = widgets_by_field.get(&f.name).cloned().unwrap_or_default();
            instance.form_fields.push(EngineFormField {
                id,
                name: f.name,
                kind: f.kind,
                read_only: f.read_only,
                annotation_ids,
            });
        }
        inner.mutations += 1;
        Ok(ids)
    }

    async fn update_annotation(
        &self,
        handle: EngineHandle,
        id: &EngineObjectId,
        page_rect: PageRect,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let instance = instance_mut(&mut inner, handle)?;
        let annotation = instance
            .annotations
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| EngineError::UnknownObject(id.to_string()))?;
        annotation.page_rect = page_rect;
        inner.mutations += 1;
        Ok(())
    }

    async fn get_annotations(
        &self,
        handle: EngineHandle,
        page_index: u32,
    ) -> Result<Vec<EngineAnnotation>, EngineError> {
        let inner = self.inner.borrow();
        let instance = instance(&inner, handle)?;
        Ok(instance
            .annotations
            .iter()
            .filter(|a| a.page_rect.page_index() == page_index)
            .cloned()
            .collect())
    }

    async fn get_form_fields(
        &self,
        handle: EngineHandle,
    ) -> Result<Vec<EngineFormField>, EngineError> {
        let inner = self.inner.borrow();
        Ok(instance(&inner, handle)?.form_fields.clone())
    }

    async fn set_form_field_read_only(
        &self,
        handle: EngineHandle,
        id: &EngineObjectId,
        read_only: bool,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let instance = instance_mut(&mut inner, handle)?;
        let field = instance
            .form_fields
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| EngineError::UnknownObject(id.to_string()))?;
        field.read_only = read_only;
        inner.mutations += 1;
        Ok(())
    }

    async fn export_document_bytes(&self, handle: EngineHandle) -> Result<Vec<u8>, EngineError> {
        let inner = self.inner.borrow();
        if inner.fail_export {
            return Err(EngineError::Operation("export failed".into()));
        }
        Ok(instance(&inner, handle)?.document.clone())
    }
}
