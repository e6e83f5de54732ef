// First-run activation flow.
//
// Two states: AwaitingInput until a submission comes back valid, then
// Completed. Unlike the periodic re-check there is no grace pass here: a
// network failure leaves the flow exactly where it was and nothing is
// persisted. Credentials hit the store only after an explicit valid verdict,
// and both fields land in one save.

use tracing::{error, info};

use crate::license::{LicenseValidator, ValidationEndpoint, Verdict};
use crate::settings::SettingsStore;

/// Generic message shown when the oracle cannot be reached during activation.
pub const NETWORK_RETRY_MESSAGE: &str = "Network error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    AwaitingInput,
    Completed,
}

/// Result of one submission, handed back across the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    pub success: bool,
    pub message: Option<String>,
}

pub struct ActivationFlow {
    state: ActivationState,
}

impl ActivationFlow {
    /// A store that already holds credentials starts out completed.
    pub fn new(activated: bool) -> Self {
        Self {
            state: if activated {
                ActivationState::Completed
            } else {
                ActivationState::AwaitingInput
            },
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Validate submitted credentials and persist them on success.
    ///
    /// A repeat submission after completion runs the same round trip; the
    /// server treats it as a re-activation of this device.
    pub fn submit<E: ValidationEndpoint>(
        &mut self,
        settings: &mut SettingsStore,
        validator: &LicenseValidator<E>,
        license_key: &str,
        watermark_text: &str,
    ) -> ActivationOutcome {
        match validator.submit(license_key, watermark_text) {
            Verdict::Valid { message } => {
                if let Err(e) = settings.set_credentials(license_key, watermark_text) {
                    error!(error = %e, "activated but credentials could not be saved");
                    return ActivationOutcome {
                        success: false,
                        message: Some("Could not save activation. Please try again.".into()),
                    };
                }
                info!("activation complete");
                self.state = ActivationState::Completed;
                ActivationOutcome {
                    success: true,
                    message,
                }
            }
            Verdict::Invalid { message } => ActivationOutcome {
                success: false,
                message,
            },
            Verdict::Unreachable => ActivationOutcome {
                success: false,
                message: Some(NETWORK_RETRY_MESSAGE.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{TransportError, ValidationRequest, ValidationResponse};
    use std::cell::RefCell;

    struct OneShotEndpoint {
        result: RefCell<Option<Result<ValidationResponse, TransportError>>>,
    }

    impl OneShotEndpoint {
        fn new(result: Result<ValidationResponse, TransportError>) -> Self {
            Self {
                result: RefCell::new(Some(result)),
            }
        }
    }

    impl ValidationEndpoint for OneShotEndpoint {
        fn validate(
            &self,
            _request: &ValidationRequest<'_>,
        ) -> Result<ValidationResponse, TransportError> {
            self.result.borrow_mut().take().expect("single call expected")
        }
    }

    fn fresh_store(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::at(dir.path().join("settings.json"))
    }

    #[test]
    fn valid_verdict_persists_both_fields_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = fresh_store(&dir);
        let validator = LicenseValidator::new(
            OneShotEndpoint::new(Ok(ValidationResponse {
                valid: true,
                message: None,
            })),
            "DEV".into(),
        );
        let mut flow = ActivationFlow::new(store.has_credentials());
        assert_eq!(flow.state(), ActivationState::AwaitingInput);

        let outcome = flow.submit(&mut store, &validator, "KEY-1", "LICENSED TO ACME");

        assert!(outcome.success);
        assert_eq!(flow.state(), ActivationState::Completed);
        assert_eq!(store.license_key(), Some("KEY-1"));
        assert_eq!(store.watermark_text(), Some("LICENSED TO ACME"));
    }

    #[test]
    fn invalid_verdict_persists_nothing_and_passes_message_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = fresh_store(&dir);
        let validator = LicenseValidator::new(
            OneShotEndpoint::new(Ok(ValidationResponse {
                valid: false,
                message: Some("Key already bound to another device".into()),
            })),
            "DEV".into(),
        );
        let mut flow = ActivationFlow::new(false);

        let outcome = flow.submit(&mut store, &validator, "KEY-1", "text");

        assert!(!outcome.success);
        assert_eq!(
            outcome.message.as_deref(),
            Some("Key already bound to another device")
        );
        assert_eq!(flow.state(), ActivationState::AwaitingInput);
        assert!(!store.has_credentials());
        assert_eq!(store.license_key(), None);
    }

    #[test]
    fn network_failure_is_a_hard_failure_during_activation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = fresh_store(&dir);
        let validator = LicenseValidator::new(
            OneShotEndpoint::new(Err(TransportError::Request("timed out".into()))),
            "DEV".into(),
        );
        let mut flow = ActivationFlow::new(false);

        let outcome = flow.submit(&mut store, &validator, "KEY-1", "text");

        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some(NETWORK_RETRY_MESSAGE));
        assert_eq!(flow.state(), ActivationState::AwaitingInput);
        assert!(!store.has_credentials());
    }
}
