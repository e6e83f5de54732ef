// Single-threaded application loop.
//
// Everything that touches the overlay set, the settings store, or the
// activation flow runs on this thread; platform threads (tray, window pump,
// OS hooks) only send events into the channel. Delayed work is expressed as
// deadlines the loop computes before each blocking receive:
//
//   • settle refresh: topology/power events do not rebuild immediately.
//     Display geometry reported while the OS is still reshuffling monitors
//     or waking from sleep can be transient, so the rebuild waits out a
//     settle delay. A newer event replaces the pending deadline, so the last
//     event wins and only one rebuild runs.
//   • license re-check: recurring background validation of the stored key.
//   • liveness watchdog: recreates the whole set when some surface was
//     destroyed behind our back (explorer restart kills topmost tool
//     windows).

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::activation::{ActivationFlow, ActivationOutcome};
use crate::display::SystemEvent;
use crate::license::{LicenseValidator, ValidationEndpoint, Verdict};
use crate::overlay::{OverlayBackend, OverlayManager};
use crate::settings::SettingsStore;

/// Pause between a topology/power event and the rebuild it triggers.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Cadence of background license re-checks.
pub const LICENSE_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cadence of the externally-destroyed-surface check.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Receive timeout when no deadline is pending.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Manual actions from the tray menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayCommand {
    EditWatermark,
    CheckLicense,
    Quit,
}

/// Request/response operations served to the UI layer.
#[derive(Debug)]
pub enum ControlRequest {
    Activate {
        license_key: String,
        watermark_text: String,
        reply: Sender<ActivationOutcome>,
    },
    UpdateWatermark {
        text: String,
        reply: Sender<bool>,
    },
    GetWatermark {
        reply: Sender<String>,
    },
}

/// Push notifications to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiRequest {
    ShowActivation,
    CloseActivation,
    OpenWatermarkEditor,
}

/// Everything the loop consumes.
#[derive(Debug)]
pub enum AppEvent {
    System(SystemEvent),
    Tray(TrayCommand),
    Control(ControlRequest),
}

pub struct App<B: OverlayBackend, E: ValidationEndpoint> {
    settings: SettingsStore,
    manager: OverlayManager<B>,
    validator: LicenseValidator<E>,
    flow: ActivationFlow,
    ui: Option<Sender<UiRequest>>,
    /// Overlays may run. Cleared on an explicit invalid verdict and on quit.
    overlays_enabled: bool,
    pending_refresh: Option<Instant>,
    next_license_check: Option<Instant>,
    next_liveness_check: Option<Instant>,
    quit: bool,
}

impl<B: OverlayBackend, E: ValidationEndpoint> App<B, E> {
    pub fn new(settings: SettingsStore, backend: B, validator: LicenseValidator<E>) -> Self {
        let activated = settings.has_credentials();
        Self {
            settings,
            manager: OverlayManager::new(backend),
            validator,
            flow: ActivationFlow::new(activated),
            ui: None,
            overlays_enabled: false,
            pending_refresh: None,
            next_license_check: None,
            next_liveness_check: None,
            quit: false,
        }
    }

    /// Attach the channel the UI layer listens on.
    pub fn with_ui(mut self, ui: Sender<UiRequest>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Startup path: validate stored credentials and either bring up the
    /// overlays or ask for activation. An unreachable oracle passes (grace);
    /// an explicit invalid verdict withholds overlays but leaves the stored
    /// credentials alone.
    pub fn start(&mut self, now: Instant) {
        if self.settings.has_credentials() {
            if self.check_license(false) {
                self.enable_overlays(now);
            } else {
                self.notify_ui(UiRequest::ShowActivation);
            }
            self.next_license_check = Some(now + LICENSE_CHECK_INTERVAL);
        } else {
            info!("no stored credentials, activation required");
            self.notify_ui(UiRequest::ShowActivation);
        }
    }

    /// Run until quit, alternating deadline work and event handling.
    pub fn run(mut self, events: Receiver<AppEvent>) {
        self.start(Instant::now());
        while !self.quit {
            let now = Instant::now();
            self.tick(now);
            if self.quit {
                break;
            }
            let timeout = self
                .next_deadline()
                .map(|d| d.saturating_duration_since(now))
                .unwrap_or(IDLE_TIMEOUT);
            match events.recv_timeout(timeout) {
                Ok(event) => self.handle(event, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("event channel closed, shutting down");
                    break;
                }
            }
        }
        self.manager.destroy_overlays();
    }

    pub fn handle(&mut self, event: AppEvent, now: Instant) {
        match event {
            AppEvent::System(SystemEvent::SessionLocked) => {
                debug!("session locked");
            }
            AppEvent::System(event) => {
                if self.overlays_enabled {
                    debug!(?event, "scheduling overlay refresh");
                    self.pending_refresh = Some(now + SETTLE_DELAY);
                } else {
                    debug!(?event, "ignoring system event, overlays disabled");
                }
            }
            AppEvent::Tray(TrayCommand::EditWatermark) => {
                self.notify_ui(UiRequest::OpenWatermarkEditor);
            }
            AppEvent::Tray(TrayCommand::CheckLicense) => {
                self.check_license(false);
            }
            AppEvent::Tray(TrayCommand::Quit) => {
                info!("quit requested");
                self.manager.destroy_overlays();
                self.overlays_enabled = false;
                self.quit = true;
            }
            AppEvent::Control(ControlRequest::Activate {
                license_key,
                watermark_text,
                reply,
            }) => {
                let outcome =
                    self.flow
                        .submit(&mut self.settings, &self.validator, &license_key, &watermark_text);
                if outcome.success {
                    self.notify_ui(UiRequest::CloseActivation);
                    self.enable_overlays(now);
                    self.register_autostart();
                }
                let _ = reply.send(outcome);
            }
            AppEvent::Control(ControlRequest::UpdateWatermark { text, reply }) => {
                let saved = match self.settings.set_watermark_text(&text) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "watermark update could not be saved");
                        false
                    }
                };
                if saved && self.overlays_enabled {
                    self.manager.refresh_overlays(&text);
                }
                let _ = reply.send(saved);
            }
            AppEvent::Control(ControlRequest::GetWatermark { reply }) => {
                let text = self.settings.watermark_text().unwrap_or_default().to_owned();
                let _ = reply.send(text);
            }
        }
    }

    /// Fire whichever deadlines have passed.
    pub fn tick(&mut self, now: Instant) {
        if self.pending_refresh.is_some_and(|due| now >= due) {
            self.pending_refresh = None;
            if self.overlays_enabled {
                debug!("settle delay elapsed, rebuilding overlays");
                self.apply_refresh();
            }
        }

        if self.next_license_check.is_some_and(|due| now >= due) {
            self.next_license_check = Some(now + LICENSE_CHECK_INTERVAL);
            if self.settings.has_credentials() {
                self.check_license(false);
            }
        }

        if self.next_liveness_check.is_some_and(|due| now >= due) {
            self.next_liveness_check = Some(now + WATCHDOG_INTERVAL);
            if self.overlays_enabled && self.manager.surface_count() > 0 && self.manager.any_surface_dead()
            {
                info!("overlay surface lost externally, rebuilding");
                self.apply_refresh();
            }
        }
    }

    /// Validate now; on an explicit invalid verdict disable output and tear
    /// the overlay set down. Transport failure counts as still valid.
    pub fn check_license(&mut self, first_activation: bool) -> bool {
        match self.validator.validate(&self.settings, first_activation) {
            Verdict::Valid { .. } => true,
            Verdict::Invalid { message } => {
                info!(?message, "license rejected, removing overlays");
                self.manager.destroy_overlays();
                self.overlays_enabled = false;
                false
            }
            Verdict::Unreachable => true,
        }
    }

    fn enable_overlays(&mut self, now: Instant) {
        self.overlays_enabled = true;
        self.apply_refresh();
        self.next_license_check = Some(now + LICENSE_CHECK_INTERVAL);
        self.next_liveness_check = Some(now + WATCHDOG_INTERVAL);
    }

    /// Destroy and rebuild against current displays and current settings.
    fn apply_refresh(&mut self) {
        let text = self.settings.watermark_text().unwrap_or_default().to_owned();
        self.manager.refresh_overlays(&text);
    }

    fn register_autostart(&self) {
        #[cfg(windows)]
        {
            if !crate::autostart::is_enabled() {
                if crate::autostart::enable() {
                    info!("auto-launch registered");
                } else {
                    warn!("auto-launch registration failed");
                }
            }
        }
    }

    fn notify_ui(&self, request: UiRequest) {
        match &self.ui {
            Some(ui) => {
                if ui.send(request).is_err() {
                    warn!(?request, "ui channel closed");
                }
            }
            None => debug!(?request, "no ui attached"),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending_refresh,
            self.next_license_check,
            self.next_liveness_check,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn overlays_enabled(&self) -> bool {
        self.overlays_enabled
    }

    pub fn manager(&self) -> &OverlayManager<B> {
        &self.manager
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }
}
