//! Shared wiring for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use placement_core::config::{Footprints, PlacementConfig};
use placement_core::engine::memory::InMemoryEngine;
use placement_core::registry::RosterPolicy;
use placement_core::signing::{SigningRequest, SigningService};
use placement_core::{
    DragPayload, DropEvent, LoadOptions, MemorySessionStorage, PlacementStore, Reconciler,
    SigneeRegistry, SigningOrchestrator, SigningServiceError,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared_types::{DocumentKey, PlacementType, Role, Signee};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const PDF: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";
pub const SIGNED_PDF: &[u8] = b"%PDF-1.7\n% signed\n%%EOF\n";

pub struct Harness {
    pub storage: Rc<MemorySessionStorage>,
    pub engine: Rc<InMemoryEngine>,
    pub store: Rc<PlacementStore>,
    pub registry: Rc<SigneeRegistry>,
    pub reconciler: Rc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(InMemoryEngine::new(2))
    }

    pub fn with_engine(engine: InMemoryEngine) -> Self {
        Self::with_storage(Rc::new(MemorySessionStorage::new()), engine)
    }

    /// Fresh components over existing session storage, like a page refresh
    pub fn with_storage(storage: Rc<MemorySessionStorage>, engine: InMemoryEngine) -> Self {
        let engine = Rc::new(engine);
        let store = Rc::new(PlacementStore::open(storage.clone()).unwrap());
        let registry = Rc::new(SigneeRegistry::with_rng(
            storage.clone(),
            &PlacementConfig::default().palette,
            RosterPolicy::default(),
            StdRng::seed_from_u64(7),
        ));
        let reconciler = Rc::new(Reconciler::new(
            engine.clone(),
            store.clone(),
            registry.clone(),
            Footprints::default(),
            LoadOptions::default(),
        ));
        Self {
            storage,
            engine,
            store,
            registry,
            reconciler,
        }
    }

    pub fn editor(&self) -> Signee {
        self.registry
            .add_with_role("Editor", "editor@example.com", Role::Editor)
            .unwrap()
    }

    /// Drop event as the viewer would deliver it for the active signee
    pub fn drop_at(&self, x: f64, y: f64, placement_type: PlacementType) -> DropEvent {
        let payload = DragPayload::capture(&self.registry, placement_type).unwrap();
        DropEvent {
            client_x: x,
            client_y: y,
            page_index: 0,
            payload: payload.encode(),
        }
    }

    pub fn orchestrator(&self, service: Rc<MockSigner>) -> SigningOrchestrator {
        SigningOrchestrator::new(
            self.reconciler.clone(),
            self.store.clone(),
            self.registry.clone(),
            service,
            PlacementConfig::default().signing,
            b"watermark".to_vec(),
        )
    }
}

pub fn contract_key() -> DocumentKey {
    DocumentKey::for_upload("contract.pdf", PDF)
}

/// Signing service double; yields once so concurrent callers interleave
pub struct MockSigner {
    response: Result<Vec<u8>, SigningServiceError>,
    calls: Cell<usize>,
    last: RefCell<Option<SigningRequest>>,
}

impl MockSigner {
    pub fn returning(bytes: &[u8]) -> Rc<Self> {
        Rc::new(Self {
            response: Ok(bytes.to_vec()),
            calls: Cell::new(0),
            last: RefCell::new(None),
        })
    }

    pub fn failing(err: SigningServiceError) -> Rc<Self> {
        Rc::new(Self {
            response: Err(err),
            calls: Cell::new(0),
            last: RefCell::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn last_request(&self) -> Option<SigningRequest> {
        self.last.borrow().clone()
    }
}

#[async_trait(?Send)]
impl SigningService for MockSigner {
    async fn sign(&self, request: SigningRequest) -> Result<Vec<u8>, SigningServiceError> {
        self.calls.set(self.calls.get() + 1);
        *self.last.borrow_mut() = Some(request);
        tokio::task::yield_now().await;
        self.response.clone()
    }
}
