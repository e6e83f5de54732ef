// HTTP-based license validation against the remote licensing service.
//
// The server is the only authority: it returns {valid, message} and this
// module maps that onto three outcomes. A transport failure is not a verdict.
// Periodic re-checks treat it as a grace pass so connectivity problems never
// punish a paying user; first activation treats it as a hard failure because
// there is no credential to fall back on.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::settings::SettingsStore;

/// Base URL of the licensing service.
pub const API_URL: &str = "https://screen-api-eac9.onrender.com/api/screen-watermark";

/// Request body for POST /validate-license.
///
/// `watermark_text` is omitted from the JSON entirely when absent; the server
/// uses its presence to re-register the text during a re-activation.
#[derive(Debug, Serialize)]
pub struct ValidationRequest<'a> {
    pub license_key: &'a str,
    pub device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_text: Option<&'a str>,
}

/// Response body from the licensing service.
#[derive(Debug, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response: {0}")]
    Read(String),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Transport seam for the licensing round trip.
pub trait ValidationEndpoint {
    fn validate(&self, request: &ValidationRequest<'_>) -> Result<ValidationResponse, TransportError>;
}

/// Production endpoint speaking JSON over HTTPS via ureq.
pub struct HttpEndpoint {
    base_url: String,
}

impl HttpEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpEndpoint {
    fn default() -> Self {
        Self::new(API_URL)
    }
}

impl ValidationEndpoint for HttpEndpoint {
    fn validate(&self, request: &ValidationRequest<'_>) -> Result<ValidationResponse, TransportError> {
        let url = format!("{}/validate-license", self.base_url);
        let body = serde_json::to_string(request)?;

        let response = ureq::post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let body = response
            .into_string()
            .map_err(|e| TransportError::Read(e.to_string()))?;

        Ok(serde_json::from_str(&body)?)
    }
}

/// Outcome of one validation round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid { message: Option<String> },
    Invalid { message: Option<String> },
    /// The oracle could not be reached or answered garbage. Not a verdict.
    Unreachable,
}

/// Wraps an endpoint with this machine's identity and the payload rules.
pub struct LicenseValidator<E: ValidationEndpoint> {
    endpoint: E,
    device_id: String,
}

impl<E: ValidationEndpoint> LicenseValidator<E> {
    pub fn new(endpoint: E, device_id: String) -> Self {
        Self { endpoint, device_id }
    }

    /// Validate the stored credentials.
    ///
    /// The stored watermark text rides along only on a first activation that
    /// already has one (re-activation on a wiped server record).
    pub fn validate(&self, settings: &SettingsStore, first_activation: bool) -> Verdict {
        let Some(license_key) = settings.license_key() else {
            warn!("license check requested without a stored key");
            return Verdict::Invalid { message: None };
        };
        let watermark_text = if first_activation {
            settings.watermark_text()
        } else {
            None
        };
        self.dispatch(&ValidationRequest {
            license_key,
            device_id: &self.device_id,
            watermark_text,
        })
    }

    /// Validate submitted credentials during the activation flow.
    /// The watermark text is always part of an activation request.
    pub fn submit(&self, license_key: &str, watermark_text: &str) -> Verdict {
        self.dispatch(&ValidationRequest {
            license_key,
            device_id: &self.device_id,
            watermark_text: Some(watermark_text),
        })
    }

    fn dispatch(&self, request: &ValidationRequest<'_>) -> Verdict {
        match self.endpoint.validate(request) {
            Ok(response) if response.valid => {
                info!(message = ?response.message, "license valid");
                Verdict::Valid {
                    message: response.message,
                }
            }
            Ok(response) => {
                info!(message = ?response.message, "license invalid");
                Verdict::Invalid {
                    message: response.message,
                }
            }
            Err(e) => {
                warn!(error = %e, "license validation unreachable");
                Verdict::Unreachable
            }
        }
    }
}
