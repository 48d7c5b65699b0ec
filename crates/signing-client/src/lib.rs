//! HTTP client for the remote signing service
//!
//! Posts the exported document, the watermark image and the JSON signing
//! data as a multipart form (`file`, `image`, `data`) and returns the signed
//! PDF from the response body.

use async_trait::async_trait;
use placement_core::config::SigningSettings;
use placement_core::signing::{SigningRequest, SigningService};
use placement_core::SigningServiceError;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Request};
use tracing::{debug, instrument, warn};

/// Signing service reached over HTTP
pub struct HttpSigningService {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSigningService {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(Client::new(), endpoint, token)
    }

    /// Create with a preconfigured client (proxies, timeouts, tests)
    pub fn with_client(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    pub fn from_settings(settings: &SigningSettings) -> Result<Self, SigningServiceError> {
        let endpoint = settings
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| SigningServiceError::NotConfigured("no signing endpoint".into()))?;
        Ok(Self::new(endpoint, settings.token.clone()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, request: SigningRequest) -> Result<Request, SigningServiceError> {
        let data = serde_json::to_string(&request.data)
            .map_err(|e| SigningServiceError::Transport(format!("encode signing data: {e}")))?;

        let file = Part::bytes(request.file)
            .file_name("document.pdf")
            .mime_str("application/pdf")
            .map_err(transport)?;
        let image = Part::bytes(request.image)
            .file_name("watermark.png")
            .mime_str("image/png")
            .map_err(transport)?;
        let form = Form::new()
            .part("file", file)
            .part("image", image)
            .text("data", data);

        let mut builder = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder.build().map_err(transport)
    }
}

fn transport(err: reqwest::Error) -> SigningServiceError {
    SigningServiceError::Transport(err.to_string())
}

#[async_trait(?Send)]
impl SigningService for HttpSigningService {
    #[instrument(skip_all, fields(field = %request.data.form_field_name))]
    async fn sign(&self, request: SigningRequest) -> Result<Vec<u8>, SigningServiceError> {
        debug!(endpoint = %self.endpoint, "posting signing request");
        let request = self.build_request(request)?;
        let response = self.client.execute(request).await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "signing service rejected request");
            return Err(SigningServiceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        debug!(len = bytes.len(), "received signed document");
        Ok(bytes.to_vec())
    }
}
