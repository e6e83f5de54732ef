// End-to-end lifecycle scenarios: activation, topology churn with settle
// delays, license teardown, and the liveness watchdog, all driven through
// the app loop with a scripted backend and endpoint. Time is synthetic:
// tests call handle/tick with chosen instants instead of sleeping.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

use aquamark::activation::NETWORK_RETRY_MESSAGE;
use aquamark::app::{App, AppEvent, ControlRequest, TrayCommand, UiRequest, SETTLE_DELAY, WATCHDOG_INTERVAL};
use aquamark::display::{Bounds, DisplayId, DisplayInfo, SystemEvent};
use aquamark::license::{
    HttpEndpoint, LicenseValidator, TransportError, ValidationEndpoint, ValidationRequest,
    ValidationResponse,
};
use aquamark::overlay::{OverlayBackend, SurfaceError, SurfaceHandle};
use aquamark::settings::SettingsStore;

// ── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BackendState {
    displays: Vec<DisplayInfo>,
    live: Vec<(SurfaceHandle, Bounds, String)>,
    next_handle: isize,
    dead: HashSet<isize>,
}

#[derive(Clone, Default)]
struct FakeBackend {
    state: Rc<RefCell<BackendState>>,
}

impl OverlayBackend for FakeBackend {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.state.borrow().displays.clone()
    }

    fn create_surface(&mut self, display: &DisplayInfo, text: &str) -> Result<SurfaceHandle, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = SurfaceHandle(state.next_handle);
        state.live.push((handle, display.bounds, text.to_owned()));
        Ok(handle)
    }

    fn destroy_surface(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.live.retain(|(h, _, _)| *h != handle);
        state.dead.remove(&handle.0);
        Ok(())
    }

    fn surface_alive(&self, handle: SurfaceHandle) -> bool {
        !self.state.borrow().dead.contains(&handle.0)
    }
}

#[derive(Clone, Default)]
struct ScriptedEndpoint {
    script: Rc<RefCell<VecDeque<Result<ValidationResponse, TransportError>>>>,
    watermarks_seen: Rc<RefCell<Vec<Option<String>>>>,
}

impl ScriptedEndpoint {
    fn push_valid(&self) {
        self.script.borrow_mut().push_back(Ok(ValidationResponse {
            valid: true,
            message: None,
        }));
    }

    fn push_invalid(&self, message: &str) {
        self.script.borrow_mut().push_back(Ok(ValidationResponse {
            valid: false,
            message: Some(message.to_owned()),
        }));
    }

    fn push_unreachable(&self) {
        self.script
            .borrow_mut()
            .push_back(Err(TransportError::Request("connection refused".into())));
    }
}

impl ValidationEndpoint for ScriptedEndpoint {
    fn validate(&self, request: &ValidationRequest<'_>) -> Result<ValidationResponse, TransportError> {
        self.watermarks_seen
            .borrow_mut()
            .push(request.watermark_text.map(str::to_owned));
        self.script
            .borrow_mut()
            .pop_front()
            .expect("validation request beyond the scripted results")
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

fn display(id: isize, x: i32, y: i32, width: i32, height: i32) -> DisplayInfo {
    DisplayInfo {
        id: DisplayId(id),
        bounds: Bounds { x, y, width, height },
    }
}

fn two_displays() -> Vec<DisplayInfo> {
    vec![display(1, 0, 0, 1920, 1080), display(2, 1920, 0, 1366, 768)]
}

struct Harness {
    app: App<FakeBackend, ScriptedEndpoint>,
    backend: FakeBackend,
    endpoint: ScriptedEndpoint,
    ui: Receiver<UiRequest>,
    _dir: tempfile::TempDir,
}

/// Build an app over a fresh store; `credentials` pre-activates it.
fn harness(displays: Vec<DisplayInfo>, credentials: Option<(&str, &str)>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SettingsStore::at(dir.path().join("settings.json"));
    if let Some((key, text)) = credentials {
        store.set_credentials(key, text).unwrap();
    }

    let backend = FakeBackend::default();
    backend.state.borrow_mut().displays = displays;
    let endpoint = ScriptedEndpoint::default();
    let (ui_tx, ui_rx) = channel();

    let app = App::new(
        store,
        backend.clone(),
        LicenseValidator::new(endpoint.clone(), "DEV-1".into()),
    )
    .with_ui(ui_tx);

    Harness {
        app,
        backend,
        endpoint,
        ui: ui_rx,
        _dir: dir,
    }
}

fn activate(h: &mut Harness, key: &str, text: &str, now: Instant) -> aquamark::activation::ActivationOutcome {
    let (reply, result) = channel();
    h.app.handle(
        AppEvent::Control(ControlRequest::Activate {
            license_key: key.to_owned(),
            watermark_text: text.to_owned(),
            reply,
        }),
        now,
    );
    result.recv().unwrap()
}

// ── Startup ─────────────────────────────────────────────────────────────────

#[test]
fn startup_with_valid_credentials_builds_all_overlays() {
    let mut h = harness(two_displays(), Some(("KEY", "LICENSED TO ACME")));
    h.endpoint.push_valid();

    h.app.start(Instant::now());

    assert!(h.app.overlays_enabled());
    assert_eq!(h.app.manager().surface_count(), 2);
    // Periodic re-checks never resend the watermark text.
    assert_eq!(h.endpoint.watermarks_seen.borrow()[0], None);
}

#[test]
fn startup_with_invalid_verdict_requests_activation_but_keeps_credentials() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_invalid("License revoked");

    h.app.start(Instant::now());

    assert!(!h.app.overlays_enabled());
    assert_eq!(h.app.manager().surface_count(), 0);
    assert_eq!(h.ui.try_recv(), Ok(UiRequest::ShowActivation));
    // Credentials stay in the store; there is no automatic reversal to the
    // not-activated state.
    assert!(h.app.settings().has_credentials());
}

#[test]
fn startup_unreachable_oracle_passes_on_grace() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_unreachable();

    h.app.start(Instant::now());

    assert!(h.app.overlays_enabled());
    assert_eq!(h.app.manager().surface_count(), 2);
}

#[test]
fn startup_without_credentials_requests_activation() {
    let mut h = harness(two_displays(), None);

    h.app.start(Instant::now());

    assert_eq!(h.app.manager().surface_count(), 0);
    assert_eq!(h.ui.try_recv(), Ok(UiRequest::ShowActivation));
}

// ── Activation ──────────────────────────────────────────────────────────────

#[test]
fn successful_activation_persists_and_builds_overlays() {
    let mut h = harness(two_displays(), None);
    let now = Instant::now();
    h.app.start(now);
    h.endpoint.push_valid();

    let outcome = activate(&mut h, "KEY-9", "LICENSED TO ACME", now);

    assert!(outcome.success);
    assert_eq!(h.app.settings().license_key(), Some("KEY-9"));
    assert_eq!(h.app.settings().watermark_text(), Some("LICENSED TO ACME"));
    assert_eq!(h.app.manager().surface_count(), 2);
    assert!(h
        .app
        .manager()
        .surfaces()
        .iter()
        .all(|s| s.text == "LICENSED TO ACME"));
    // Activation always carries the watermark text to the server.
    assert_eq!(
        h.endpoint.watermarks_seen.borrow()[0].as_deref(),
        Some("LICENSED TO ACME")
    );

    assert_eq!(h.ui.try_recv(), Ok(UiRequest::ShowActivation));
    assert_eq!(h.ui.try_recv(), Ok(UiRequest::CloseActivation));
}

#[test]
fn rejected_activation_changes_nothing_and_reports_the_server_message() {
    let mut h = harness(two_displays(), None);
    let now = Instant::now();
    h.app.start(now);
    h.endpoint.push_invalid("Key already in use");

    let outcome = activate(&mut h, "KEY-9", "TEXT", now);

    assert!(!outcome.success);
    assert_eq!(outcome.message.as_deref(), Some("Key already in use"));
    assert!(!h.app.settings().has_credentials());
    assert_eq!(h.app.manager().surface_count(), 0);
}

#[test]
fn unreachable_oracle_fails_activation_with_retry_message() {
    let mut h = harness(two_displays(), None);
    let now = Instant::now();
    h.app.start(now);
    h.endpoint.push_unreachable();

    let outcome = activate(&mut h, "KEY-9", "TEXT", now);

    assert!(!outcome.success);
    assert_eq!(outcome.message.as_deref(), Some(NETWORK_RETRY_MESSAGE));
    assert!(!h.app.settings().has_credentials());
}

// ── Topology churn ──────────────────────────────────────────────────────────

#[test]
fn display_removal_rebuilds_after_the_settle_delay() {
    let mut h = harness(two_displays(), Some(("KEY", "LICENSED TO ACME")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);
    assert_eq!(h.app.manager().surface_count(), 2);

    // Display B disappears.
    h.backend.state.borrow_mut().displays = vec![display(1, 0, 0, 1920, 1080)];
    h.app.handle(AppEvent::System(SystemEvent::DisplayRemoved), t0);

    // Before the settle delay the stale pair still stands.
    h.app.tick(t0 + SETTLE_DELAY / 2);
    assert_eq!(h.app.manager().surface_count(), 2);

    // After it, exactly one surface with the surviving bounds and text.
    h.app.tick(t0 + SETTLE_DELAY + Duration::from_millis(1));
    assert_eq!(h.app.manager().surface_count(), 1);
    let surface = &h.app.manager().surfaces()[0];
    assert_eq!(surface.bounds, Bounds { x: 0, y: 0, width: 1920, height: 1080 });
    assert_eq!(surface.text, "LICENSED TO ACME");
}

#[test]
fn newer_topology_event_supersedes_a_pending_refresh() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);

    h.app.handle(AppEvent::System(SystemEvent::DisplayMetricsChanged), t0);
    // A second event lands mid-delay and moves the deadline.
    let t1 = t0 + SETTLE_DELAY / 2;
    h.backend.state.borrow_mut().displays = vec![display(1, 0, 0, 2560, 1440)];
    h.app.handle(AppEvent::System(SystemEvent::DisplayAdded), t1);

    // The first deadline passes without a rebuild.
    h.app.tick(t0 + SETTLE_DELAY + Duration::from_millis(1));
    assert_eq!(h.app.manager().surface_count(), 2);

    // The superseding deadline rebuilds against the new topology.
    h.app.tick(t1 + SETTLE_DELAY + Duration::from_millis(1));
    assert_eq!(h.app.manager().surface_count(), 1);
    assert_eq!(
        h.app.manager().surfaces()[0].bounds,
        Bounds { x: 0, y: 0, width: 2560, height: 1440 }
    );
}

#[test]
fn refresh_after_unchanged_topology_is_idempotent() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);

    h.app.handle(AppEvent::System(SystemEvent::DisplayMetricsChanged), t0);
    h.app.tick(t0 + SETTLE_DELAY + Duration::from_millis(1));
    let first: Vec<Bounds> = h.app.manager().surfaces().iter().map(|s| s.bounds).collect();

    let t1 = t0 + Duration::from_secs(1);
    h.app.handle(AppEvent::System(SystemEvent::DisplayMetricsChanged), t1);
    h.app.tick(t1 + SETTLE_DELAY + Duration::from_millis(1));
    let second: Vec<Bounds> = h.app.manager().surfaces().iter().map(|s| s.bounds).collect();

    assert_eq!(first, second);
    assert_eq!(h.app.manager().surface_count(), 2);
}

#[test]
fn lock_is_log_only_but_unlock_and_resume_schedule_refreshes() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);

    h.backend.state.borrow_mut().displays = vec![display(1, 0, 0, 1920, 1080)];

    // Lock alone never triggers a rebuild.
    h.app.handle(AppEvent::System(SystemEvent::SessionLocked), t0);
    h.app.tick(t0 + SETTLE_DELAY * 4);
    assert_eq!(h.app.manager().surface_count(), 2);

    // Unlock does.
    let t1 = t0 + SETTLE_DELAY * 4;
    h.app.handle(AppEvent::System(SystemEvent::SessionUnlocked), t1);
    h.app.tick(t1 + SETTLE_DELAY + Duration::from_millis(1));
    assert_eq!(h.app.manager().surface_count(), 1);
}

// ── License enforcement ─────────────────────────────────────────────────────

#[test]
fn invalid_verdict_tears_down_and_network_failure_leaves_state_alone() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);
    assert_eq!(h.app.manager().surface_count(), 2);

    // Explicit invalid verdict: everything comes down.
    h.endpoint.push_invalid("License expired");
    h.app.handle(AppEvent::Tray(TrayCommand::CheckLicense), t0);
    assert_eq!(h.app.manager().surface_count(), 0);
    assert!(!h.app.overlays_enabled());
    // Credentials survive; only the output is disabled.
    assert!(h.app.settings().has_credentials());

    // A later network-only failure changes nothing in either direction.
    h.endpoint.push_unreachable();
    h.app.handle(AppEvent::Tray(TrayCommand::CheckLicense), t0);
    assert_eq!(h.app.manager().surface_count(), 0);

    // Topology events while disabled stay inert.
    h.app.handle(AppEvent::System(SystemEvent::DisplayAdded), t0);
    h.app.tick(t0 + SETTLE_DELAY * 2);
    assert_eq!(h.app.manager().surface_count(), 0);

    // Even a later valid re-check does not resurrect the overlays; only a
    // restart or a fresh activation does.
    h.endpoint.push_valid();
    h.app.handle(AppEvent::Tray(TrayCommand::CheckLicense), t0);
    assert_eq!(h.app.manager().surface_count(), 0);
    assert!(!h.app.overlays_enabled());
}

#[test]
fn network_failure_does_not_disturb_running_overlays() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);

    h.endpoint.push_unreachable();
    h.app.handle(AppEvent::Tray(TrayCommand::CheckLicense), t0);

    assert!(h.app.overlays_enabled());
    assert_eq!(h.app.manager().surface_count(), 2);
}

// ── Watermark edits and control surface ─────────────────────────────────────

#[test]
fn watermark_update_persists_and_rebuilds_with_the_new_text() {
    let mut h = harness(two_displays(), Some(("KEY", "old text")));
    h.endpoint.push_valid();
    let now = Instant::now();
    h.app.start(now);

    let (reply, result) = channel();
    h.app.handle(
        AppEvent::Control(ControlRequest::UpdateWatermark {
            text: "new text".into(),
            reply,
        }),
        now,
    );

    assert!(result.recv().unwrap());
    assert_eq!(h.app.settings().watermark_text(), Some("new text"));
    assert_eq!(h.app.manager().surface_count(), 2);
    assert!(h.app.manager().surfaces().iter().all(|s| s.text == "new text"));
}

#[test]
fn get_watermark_returns_the_stored_text() {
    let mut h = harness(two_displays(), Some(("KEY", "LICENSED TO ACME")));
    let (reply, result) = channel();
    h.app.handle(
        AppEvent::Control(ControlRequest::GetWatermark { reply }),
        Instant::now(),
    );
    assert_eq!(result.recv().unwrap(), "LICENSED TO ACME");
}

#[test]
fn edit_watermark_tray_action_asks_the_ui_to_open_the_editor() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.app
        .handle(AppEvent::Tray(TrayCommand::EditWatermark), Instant::now());
    assert_eq!(h.ui.try_recv(), Ok(UiRequest::OpenWatermarkEditor));
}

// ── Watchdog and shutdown ───────────────────────────────────────────────────

#[test]
fn watchdog_rebuilds_after_an_external_surface_kill() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let t0 = Instant::now();
    h.app.start(t0);

    let lost = h.app.manager().surfaces()[0].handle.0;
    h.backend.state.borrow_mut().dead.insert(lost);

    h.app.tick(t0 + WATCHDOG_INTERVAL + Duration::from_millis(1));

    assert_eq!(h.app.manager().surface_count(), 2);
    assert!(!h.app.manager().any_surface_dead());
}

#[test]
fn quit_destroys_every_surface() {
    let mut h = harness(two_displays(), Some(("KEY", "TEXT")));
    h.endpoint.push_valid();
    let now = Instant::now();
    h.app.start(now);
    assert_eq!(h.app.manager().surface_count(), 2);

    h.app.handle(AppEvent::Tray(TrayCommand::Quit), now);

    assert!(h.app.should_quit());
    assert_eq!(h.app.manager().surface_count(), 0);
    assert!(h.backend.state.borrow().live.is_empty());
}

// ── Endpoint construction ───────────────────────────────────────────────────

#[test]
fn http_endpoint_default_points_at_the_licensing_service() {
    // Construction only; no request leaves the machine here.
    let _ = HttpEndpoint::default();
    let _ = HttpEndpoint::new("http://127.0.0.1:1");
}
