//! Signing workflow orchestration
//!
//! Exports the live document, sends it with placement and signer metadata
//! to the remote signing service, and on success swaps the signed bytes in
//! as the working document and flags the placement as signed. A failed
//! request leaves both the document and the placement store untouched.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{DocumentKey, FieldName};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{info, warn};

use crate::config::{Appearance, SigningSettings};
use crate::error::{SigningError, SigningServiceError};
use crate::reconciler::Reconciler;
use crate::registry::SigneeRegistry;
use crate::store::PlacementStore;

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMetadata {
    pub signer_name: String,
    pub signature_reason: String,
    pub signature_location: String,
    /// RFC 3339
    pub signing_time: String,
}

/// JSON part of the signing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningData {
    pub signature_type: String,
    pub flatten: bool,
    pub cades_level: String,
    pub appearance: Appearance,
    pub form_field_name: FieldName,
    pub signature_metadata: SignatureMetadata,
}

/// Everything the signing service receives: `file`, `image` and `data`
#[derive(Debug, Clone, PartialEq)]
pub struct SigningRequest {
    pub file: Vec<u8>,
    pub image: Vec<u8>,
    pub data: SigningData,
}

/// Remote service that applies the cryptographic signature
#[async_trait(?Send)]
pub trait SigningService {
    /// Returns the signed PDF
    async fn sign(&self, request: SigningRequest) -> Result<Vec<u8>, SigningServiceError>;
}

/// Removes the key from the in-flight set on every exit path
struct InFlight<'a> {
    set: &'a RefCell<HashSet<DocumentKey>>,
    key: DocumentKey,
}

impl<'a> InFlight<'a> {
    fn acquire(
        set: &'a RefCell<HashSet<DocumentKey>>,
        key: &DocumentKey,
    ) -> Result<Self, SigningError> {
        if !set.borrow_mut().insert(key.clone()) {
            return Err(SigningError::SigningInProgress(key.clone()));
        }
        Ok(Self {
            set,
            key: key.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.key);
    }
}

pub struct SigningOrchestrator {
    reconciler: Rc<Reconciler>,
    store: Rc<PlacementStore>,
    registry: Rc<SigneeRegistry>,
    service: Rc<dyn SigningService>,
    settings: SigningSettings,
    watermark: Vec<u8>,
    in_flight: RefCell<HashSet<DocumentKey>>,
}

impl SigningOrchestrator {
    pub fn new(
        reconciler: Rc<Reconciler>,
        store: Rc<PlacementStore>,
        registry: Rc<SigneeRegistry>,
        service: Rc<dyn SigningService>,
        settings: SigningSettings,
        watermark: Vec<u8>,
    ) -> Self {
        Self {
            reconciler,
            store,
            registry,
            service,
            settings,
            watermark,
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    pub fn is_signing(&self, key: &DocumentKey) -> bool {
        self.in_flight.borrow().contains(key)
    }

    /// Sign `field_name` of the open document `key`.
    ///
    /// Returns the signed bytes, which are already loaded as the working
    /// document when this resolves. One call per key may be in flight.
    ///
    /// Once the service has signed, the placement is flagged even if the
    /// viewer was closed or switched documents meanwhile. The viewer is then
    /// left alone and `Superseded` hands back the signed bytes; a failed
    /// reload does the same through `Reload`.
    pub async fn sign(
        &self,
        key: &DocumentKey,
        field_name: &FieldName,
    ) -> Result<Vec<u8>, SigningError> {
        let _guard = InFlight::acquire(&self.in_flight, key)?;

        if !self.is_viewing(key) {
            return Err(SigningError::NotReady);
        }
        let generation = self.reconciler.generation();
        let placement = self
            .store
            .find(key, field_name)
            .ok_or_else(|| SigningError::UnknownField(field_name.clone()))?;
        let signer_name = self
            .registry
            .get(placement.signee_id)
            .map(|s| s.name)
            .ok_or_else(|| SigningError::Failed {
                cause: format!("placement owner {} is not on the roster", placement.signee_id),
            })?;

        let file = self
            .reconciler
            .export_document()
            .await
            .map_err(|e| SigningError::Failed {
                cause: format!("export failed: {}", e),
            })?;
        if self.reconciler.generation() != generation {
            return Err(SigningError::NotReady);
        }

        let request = SigningRequest {
            file,
            image: self.watermark.clone(),
            data: self.signing_data(field_name, signer_name),
        };

        info!(document = %key, field = %field_name, "submitting for signature");
        let signed = match self.service.sign(request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(document = %key, field = %field_name, error = %e, "signing failed");
                return Err(e.into());
            }
        };
        if !signed.starts_with(PDF_MAGIC) {
            warn!(document = %key, "signing service returned a non-PDF body");
            return Err(SigningError::Failed {
                cause: "malformed response: not a PDF".to_string(),
            });
        }

        // Flag first so the replay of the signed document already sees it
        self.store.mark_signed(key, field_name);

        if self.reconciler.generation() != generation || !self.is_viewing(key) {
            warn!(
                document = %key,
                field = %field_name,
                "viewer changed while signing; not reloading"
            );
            return Err(SigningError::Superseded {
                key: key.clone(),
                document: signed,
            });
        }
        if let Err(source) = self.reconciler.open(key.clone(), signed.clone()).await {
            warn!(document = %key, error = %source, "signed document failed to load");
            return Err(SigningError::Reload {
                document: signed,
                source,
            });
        }

        info!(document = %key, field = %field_name, "document signed");
        Ok(signed)
    }

    fn is_viewing(&self, key: &DocumentKey) -> bool {
        self.reconciler.is_live() && self.reconciler.current_key().as_ref() == Some(key)
    }

    fn signing_data(&self, field_name: &FieldName, signer_name: String) -> SigningData {
        SigningData {
            signature_type: self.settings.signature_type.clone(),
            flatten: self.settings.flatten,
            cades_level: self.settings.cades_level.clone(),
            appearance: self.settings.appearance.clone(),
            form_field_name: field_name.clone(),
            signature_metadata: SignatureMetadata {
                signer_name,
                signature_reason: self.settings.reason.clone(),
                signature_location: self.settings.location.clone(),
                signing_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        }
    }
}
