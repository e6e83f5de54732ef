// Display descriptors and the OS notifications the app reacts to.
//
// Descriptors are supplied by the platform layer at enumeration time and are
// never cached across a rebuild: bounds read before a topology event settles
// may describe geometry that no longer exists.

use std::fmt;

/// Opaque per-display identifier (monitor handle on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(pub isize);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Virtual-desktop rectangle of one display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One attached display as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub bounds: Bounds,
}

/// Topology and power notifications delivered by the platform layer.
///
/// Which display changed is deliberately not carried: every change rebuilds
/// the full overlay set from a fresh enumeration, so the payload would never
/// be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    DisplayAdded,
    DisplayRemoved,
    DisplayMetricsChanged,
    PowerResumed,
    SessionLocked,
    SessionUnlocked,
}
