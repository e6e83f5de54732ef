// Prevents console window in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    #[cfg(windows)]
    run();

    #[cfg(not(windows))]
    {
        tracing::error!("aquamark only runs on Windows");
        std::process::exit(1);
    }
}

#[cfg(windows)]
fn run() {
    use std::sync::mpsc::channel;

    use aquamark::app::App;
    use aquamark::device;
    use aquamark::license::{HttpEndpoint, LicenseValidator};
    use aquamark::platform;
    use aquamark::settings::SettingsStore;

    // Single-instance check
    if platform::windows::is_already_running() {
        return;
    }

    let (events_tx, events_rx) = channel();
    let backend = platform::windows::spawn(events_tx);
    let pump = backend.clone();

    // UI pushes go back to the pump thread, which owns all windows.
    let (ui_tx, ui_rx) = channel();
    let ui_pump = backend.clone();
    std::thread::spawn(move || {
        for request in ui_rx {
            ui_pump.notify_ui(request);
        }
    });

    let settings = SettingsStore::open();
    let validator = LicenseValidator::new(HttpEndpoint::default(), device::device_id());

    App::new(settings, backend, validator).with_ui(ui_tx).run(events_rx);

    pump.shutdown();
}
