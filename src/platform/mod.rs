// Platform layer - OS-facing overlay windows and event sources.

#[cfg(target_os = "windows")]
pub mod windows;
