//! End-to-end placement, reload and signing flows against the in-memory engine

mod common;

use common::{contract_key, Harness, MockSigner, PDF, SIGNED_PDF};
use placement_core::engine::memory::{EmbeddedField, InMemoryEngine};
use placement_core::engine::{DocumentEngine, EngineEvent, FormFieldKind};
use placement_core::{LoadState, PlacementError, SigningError, SigningServiceError};
use pretty_assertions::assert_eq;
use shared_types::{DocumentKey, FieldName, PageRect, PlacementType};

const OTHER_PDF: &[u8] = b"%PDF-1.7\n% other\n%%EOF\n";

async fn placement_widgets(h: &Harness, page: u32) -> Vec<(FieldName, PageRect)> {
    let handle = h.reconciler.current_handle().unwrap();
    h.engine
        .get_annotations(handle, page)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|a| a.form_field_name.map(|name| (name, a.page_rect)))
        .collect()
}

// ============================================================
// Placement and reload
// ============================================================

#[tokio::test]
async fn test_editor_places_signature_and_reload_restores_it() {
    let h = Harness::new();
    let editor = h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    assert_eq!(h.reconciler.state(), LoadState::Live);

    let placement = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();

    assert_eq!(placement.page_rect.page_index(), 0);
    assert!(placement.page_rect.width() > 0.0 && placement.page_rect.height() > 0.0);
    assert_eq!(placement.signee_id, editor.id);
    assert!(!placement.signed);
    assert_eq!(placement.field_name, FieldName::from("SignatureField0"));
    // Centered on the drop point at 100% zoom
    assert_eq!(
        placement.page_rect,
        PageRect::new(175.0, 350.0, 250.0, 100.0, 0).unwrap()
    );
    assert_eq!(h.store.list_for(&key), vec![placement.clone()]);

    let first_ref = h.reconciler.engine_ref(&placement.field_name).unwrap();
    h.reconciler.reload(PDF.to_vec()).await.unwrap();

    let widgets = placement_widgets(&h, 0).await;
    assert_eq!(widgets, vec![(placement.field_name.clone(), placement.page_rect)]);
    assert_eq!(h.store.list_for(&key).len(), 1);
    // Engine ids are per load
    let second_ref = h.reconciler.engine_ref(&placement.field_name).unwrap();
    assert_ne!(first_ref, second_ref);
    assert_eq!(h.engine.live_instances(), 1);
}

#[tokio::test]
async fn test_placements_survive_page_refresh() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    h.reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();
    h.reconciler
        .handle_drop(h.drop_at(200.0, 600.0, PlacementType::Date))
        .await
        .unwrap();
    let before = h.store.list_for(&key);
    h.reconciler.close();

    // New components over the same session storage
    let refreshed = Harness::with_storage(h.storage.clone(), InMemoryEngine::new(2));
    refreshed.registry.restore(&Default::default()).unwrap();
    let report = refreshed.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(refreshed.store.list_for(&key), before);
    assert_eq!(placement_widgets(&refreshed, 0).await.len(), 2);
}

#[tokio::test]
async fn test_replay_failure_is_skipped_and_kept() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    for x in [150.0, 300.0, 450.0] {
        h.reconciler
            .handle_drop(h.drop_at(x, 200.0, PlacementType::Signature))
            .await
            .unwrap();
    }

    h.engine.fail_create_for(FieldName::from("SignatureField1"));
    let report = h.reconciler.reload(PDF.to_vec()).await.unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.failed, vec![FieldName::from("SignatureField1")]);
    assert_eq!(h.reconciler.state(), LoadState::Live);
    assert_eq!(h.store.list_for(&key).len(), 3);
}

#[tokio::test]
async fn test_failed_load_releases_nothing_and_resets() {
    let h = Harness::new();
    h.editor();
    h.engine.fail_next_load();

    let result = h.reconciler.open(contract_key(), PDF.to_vec()).await;
    assert!(matches!(result, Err(PlacementError::Engine(_))));
    assert_eq!(h.reconciler.state(), LoadState::Unloaded);
    assert_eq!(h.engine.live_instances(), 0);
}

#[tokio::test]
async fn test_close_during_load_releases_handle() {
    let h = Harness::new();
    h.editor();
    h.engine.set_load_yields(3);

    let (opened, ()) = futures::join!(
        h.reconciler.open(contract_key(), PDF.to_vec()),
        async { h.reconciler.close() }
    );

    assert!(matches!(opened, Err(PlacementError::Superseded(_))));
    assert_eq!(h.reconciler.state(), LoadState::Unloaded);
    assert_eq!(h.engine.load_count(), 1);
    assert_eq!(h.engine.live_instances(), 0);
}

#[tokio::test]
async fn test_drop_while_loading_is_ignored() {
    let h = Harness::new();
    h.editor();
    h.engine.set_load_yields(3);
    let event = h.drop_at(300.0, 400.0, PlacementType::Signature);

    let (opened, dropped) = futures::join!(
        h.reconciler.open(contract_key(), PDF.to_vec()),
        h.reconciler.handle_drop(event)
    );

    opened.unwrap();
    assert!(matches!(
        dropped,
        Err(PlacementError::NotReady(LoadState::Loading))
    ));
    assert!(h.store.list_for(&contract_key()).is_empty());
}

#[tokio::test]
async fn test_foreign_drag_payload_is_rejected() {
    let h = Harness::new();
    h.editor();
    h.reconciler.open(contract_key(), PDF.to_vec()).await.unwrap();
    let mut event = h.drop_at(300.0, 400.0, PlacementType::Signature);
    event.payload = "https://example.com/image.png".into();

    h.reconciler.handle_event(EngineEvent::Drop(event)).await;
    assert!(h.store.list_for(&contract_key()).is_empty());
}

#[tokio::test]
async fn test_signature_annotation_marks_overlapped_placement() {
    let h = Harness::new();
    h.editor();
    h.reconciler.open(contract_key(), PDF.to_vec()).await.unwrap();
    let target = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();
    h.reconciler
        .handle_drop(h.drop_at(300.0, 700.0, PlacementType::Signature))
        .await
        .unwrap();

    let handle = h.reconciler.current_handle().unwrap();
    let stamp = h
        .engine
        .add_signature_annotation(handle, PageRect::new(200.0, 380.0, 100.0, 40.0, 0).unwrap())
        .unwrap();
    h.reconciler
        .handle_event(EngineEvent::AnnotationsCreate(vec![stamp.clone()]))
        .await;

    assert_eq!(
        h.reconciler.signed_markers().into_iter().collect::<Vec<_>>(),
        vec![target.field_name]
    );
    assert_eq!(h.reconciler.signature_annotations(), vec![stamp.id]);
}

// ============================================================
// Roles and authorization
// ============================================================

#[tokio::test]
async fn test_signer_cannot_move_another_signers_field() {
    let h = Harness::new();
    let alice = h.registry.add("Alice", "alice@example.com").unwrap();
    let bob = h.registry.add("Bob", "bob@example.com").unwrap();
    assert_eq!(h.registry.active_signee().unwrap().id, alice.id);

    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let alices = h
        .reconciler
        .handle_drop(h.drop_at(200.0, 200.0, PlacementType::Signature))
        .await
        .unwrap();

    h.reconciler.switch_active_signee(bob.id).await.unwrap();
    let bobs = h
        .reconciler
        .handle_drop(h.drop_at(200.0, 500.0, PlacementType::Signature))
        .await
        .unwrap();
    assert_eq!(alices.signee_id, alice.id);
    assert_eq!(bobs.signee_id, bob.id);

    let mutations = h.engine.mutation_count();
    let rejected = h
        .reconciler
        .move_placement(&alices.field_name, 400.0, 400.0)
        .await;
    assert!(matches!(
        rejected,
        Err(PlacementError::NotAuthorized { signee, .. }) if signee == bob.id
    ));
    assert_eq!(h.engine.mutation_count(), mutations);
    assert_eq!(h.store.find(&key, &alices.field_name).unwrap(), alices);

    let moved = h
        .reconciler
        .move_placement(&bobs.field_name, 400.0, 600.0)
        .await
        .unwrap();
    assert_eq!(
        moved.page_rect,
        PageRect::new(275.0, 550.0, 250.0, 100.0, 0).unwrap()
    );
    assert_eq!(h.store.find(&key, &bobs.field_name).unwrap(), moved);

    // Read-only flags follow the active signee
    let handle = h.reconciler.current_handle().unwrap();
    let fields = h.engine.get_form_fields(handle).await.unwrap();
    let read_only = |name: &FieldName| fields.iter().find(|f| &f.name == name).unwrap().read_only;
    assert!(read_only(&alices.field_name));
    assert!(!read_only(&bobs.field_name));
}

#[tokio::test]
async fn test_editor_may_move_any_unsigned_field() {
    let h = Harness::new();
    let editor = h.editor();
    let alice = h.registry.add("Alice", "alice@example.com").unwrap();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();

    h.reconciler.switch_active_signee(alice.id).await.unwrap();
    let alices = h
        .reconciler
        .handle_drop(h.drop_at(200.0, 200.0, PlacementType::Initial))
        .await
        .unwrap();
    assert_eq!(alices.field_name, FieldName::from("InitialField0"));

    h.reconciler.switch_active_signee(editor.id).await.unwrap();
    assert!(h
        .reconciler
        .move_placement(&alices.field_name, 300.0, 300.0)
        .await
        .is_ok());
}

// ============================================================
// Signing
// ============================================================

#[tokio::test]
async fn test_concurrent_sign_runs_once() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    for y in [200.0, 500.0] {
        h.reconciler
            .handle_drop(h.drop_at(300.0, y, PlacementType::Signature))
            .await
            .unwrap();
    }

    let signer = MockSigner::returning(SIGNED_PDF);
    let orchestrator = h.orchestrator(signer.clone());
    let field = FieldName::from("SignatureField0");

    let (first, second) = futures::join!(
        orchestrator.sign(&key, &field),
        orchestrator.sign(&key, &field)
    );

    assert_eq!(first.unwrap(), SIGNED_PDF.to_vec());
    assert!(matches!(second, Err(SigningError::SigningInProgress(_))));
    assert_eq!(signer.calls(), 1);
    assert!(!orchestrator.is_signing(&key));

    // Swapped in exactly once: initial load plus one reload
    assert_eq!(h.engine.load_count(), 2);
    assert_eq!(h.reconciler.state(), LoadState::Live);
    assert_eq!(h.reconciler.export_document().await.unwrap(), SIGNED_PDF.to_vec());

    let signed: Vec<_> = h
        .store
        .list_for(&key)
        .into_iter()
        .map(|p| (p.field_name.to_string(), p.signed))
        .collect();
    assert_eq!(
        signed,
        vec![
            ("SignatureField0".to_string(), true),
            ("SignatureField1".to_string(), false)
        ]
    );
}

#[tokio::test]
async fn test_sign_request_carries_field_and_signer() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    h.reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::DigitalSignature))
        .await
        .unwrap();

    let signer = MockSigner::returning(SIGNED_PDF);
    h.orchestrator(signer.clone())
        .sign(&key, &FieldName::from("SignatureField0"))
        .await
        .unwrap();

    let request = signer.last_request().unwrap();
    assert_eq!(request.file, PDF.to_vec());
    assert_eq!(request.image, b"watermark".to_vec());
    assert_eq!(request.data.form_field_name, FieldName::from("SignatureField0"));
    assert_eq!(request.data.signature_metadata.signer_name, "Editor");
    assert_eq!(request.data.cades_level, "b-lt");
}

#[tokio::test]
async fn test_failed_sign_changes_nothing() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    h.reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();

    let schema_before = h.store.to_schema();
    let bytes_before = h.reconciler.export_document().await.unwrap();
    let loads_before = h.engine.load_count();

    let signer = MockSigner::failing(SigningServiceError::Rejected {
        status: 502,
        body: "upstream unavailable".into(),
    });
    let result = h
        .orchestrator(signer)
        .sign(&key, &FieldName::from("SignatureField0"))
        .await;

    assert!(matches!(result, Err(SigningError::Failed { .. })));
    assert_eq!(h.store.to_schema(), schema_before);
    assert_eq!(h.reconciler.export_document().await.unwrap(), bytes_before);
    assert_eq!(h.engine.load_count(), loads_before);
    assert_eq!(h.reconciler.state(), LoadState::Live);
}

#[tokio::test]
async fn test_non_pdf_response_is_a_failure() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    h.reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();

    let result = h
        .orchestrator(MockSigner::returning(b"<html>error</html>"))
        .sign(&key, &FieldName::from("SignatureField0"))
        .await;

    assert!(matches!(result, Err(SigningError::Failed { .. })));
    assert!(!h.store.list_for(&key)[0].signed);
}

#[tokio::test]
async fn test_sign_preconditions() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    let signer = MockSigner::returning(SIGNED_PDF);
    let orchestrator = h.orchestrator(signer.clone());

    let not_open = orchestrator.sign(&key, &FieldName::from("SignatureField0")).await;
    assert!(matches!(not_open, Err(SigningError::NotReady)));

    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let unknown = orchestrator.sign(&key, &FieldName::from("SignatureField9")).await;
    assert!(matches!(unknown, Err(SigningError::UnknownField(_))));
    assert_eq!(signer.calls(), 0);
}

#[tokio::test]
async fn test_signed_document_fields_are_attached_not_duplicated() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let placement = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();

    // The signing service returns the field baked into the document
    h.engine.embed_fields(
        SIGNED_PDF,
        vec![EmbeddedField {
            name: placement.field_name.clone(),
            kind: FormFieldKind::Signature,
            page_rect: placement.page_rect,
        }],
    );
    h.orchestrator(MockSigner::returning(SIGNED_PDF))
        .sign(&key, &placement.field_name)
        .await
        .unwrap();

    assert_eq!(placement_widgets(&h, 0).await.len(), 1);
    assert!(h.reconciler.engine_ref(&placement.field_name).is_some());
    assert!(h.store.find(&key, &placement.field_name).unwrap().signed);
}

#[tokio::test]
async fn test_close_while_signing_keeps_viewer_closed() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let placement = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();
    let orchestrator = h.orchestrator(MockSigner::returning(SIGNED_PDF));

    let (signed, ()) = futures::join!(
        orchestrator.sign(&key, &placement.field_name),
        async { h.reconciler.close() }
    );

    let err = signed.unwrap_err();
    assert!(matches!(err, SigningError::Superseded { .. }));
    assert_eq!(err.signed_document(), Some(SIGNED_PDF));
    assert_eq!(h.reconciler.state(), LoadState::Unloaded);
    assert_eq!(h.engine.live_instances(), 0);
    assert_eq!(h.engine.load_count(), 1);
    assert!(h.store.find(&key, &placement.field_name).unwrap().signed);
}

#[tokio::test]
async fn test_opening_another_document_while_signing_keeps_it() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let placement = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();
    let orchestrator = h.orchestrator(MockSigner::returning(SIGNED_PDF));
    let other = DocumentKey::for_upload("other.pdf", OTHER_PDF);

    let (signed, opened) = futures::join!(
        orchestrator.sign(&key, &placement.field_name),
        h.reconciler.open(other.clone(), OTHER_PDF.to_vec())
    );

    opened.unwrap();
    assert!(matches!(signed, Err(SigningError::Superseded { .. })));
    assert_eq!(h.reconciler.current_key(), Some(other));
    assert_eq!(h.reconciler.state(), LoadState::Live);
    assert_eq!(h.engine.live_instances(), 1);
    assert_eq!(
        h.reconciler.export_document().await.unwrap(),
        OTHER_PDF.to_vec()
    );
    assert!(h.store.find(&key, &placement.field_name).unwrap().signed);
}

#[tokio::test]
async fn test_failed_reload_hands_back_signed_document() {
    let h = Harness::new();
    h.editor();
    let key = contract_key();
    h.reconciler.open(key.clone(), PDF.to_vec()).await.unwrap();
    let placement = h
        .reconciler
        .handle_drop(h.drop_at(300.0, 400.0, PlacementType::Signature))
        .await
        .unwrap();

    h.engine.fail_next_load();
    let err = h
        .orchestrator(MockSigner::returning(SIGNED_PDF))
        .sign(&key, &placement.field_name)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SigningError::Reload {
            source: PlacementError::Engine(_),
            ..
        }
    ));
    assert_eq!(err.signed_document(), Some(SIGNED_PDF));
    assert!(h.store.find(&key, &placement.field_name).unwrap().signed);
    assert_eq!(h.reconciler.state(), LoadState::Unloaded);
    assert_eq!(h.engine.live_instances(), 0);
}
