// Overlay surface lifecycle.
//
// One surface per attached display, owned exclusively by the manager.
// Surfaces are never updated in place: a watermark edit, a topology change,
// or a power event always goes through destroy-all then build-all, reading
// fresh display bounds and fresh watermark text at build time. Teardown is
// forceful: an individual release failure is logged and the batch continues,
// and the tracked set is cleared unconditionally so no stale handle lingers.

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::display::{Bounds, DisplayId, DisplayInfo};

/// Opaque platform handle for one overlay surface (HWND on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub isize);

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to create surface on display {display}: {reason}")]
    Create { display: DisplayId, reason: String },
    #[error("failed to release surface: {reason}")]
    Release { reason: String },
}

/// Platform seam the manager drives.
///
/// `create_surface` must produce a window that never takes pointer or
/// keyboard input, stays above normal application windows, is absent from
/// the taskbar and switcher, cannot be moved, resized, or closed by the
/// user, and paints `text` as its sole content.
pub trait OverlayBackend {
    fn displays(&self) -> Vec<DisplayInfo>;

    fn create_surface(&mut self, display: &DisplayInfo, text: &str) -> Result<SurfaceHandle, SurfaceError>;

    fn destroy_surface(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError>;

    /// Whether the surface still exists on the OS side. Backends that cannot
    /// lose surfaces externally can keep the default.
    fn surface_alive(&self, _handle: SurfaceHandle) -> bool {
        true
    }
}

/// One tracked overlay surface. Bounds and text are frozen at creation.
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    pub handle: SurfaceHandle,
    pub bounds: Bounds,
    pub text: String,
}

/// Owns the overlay surface set and keeps it in lockstep with the displays.
pub struct OverlayManager<B: OverlayBackend> {
    backend: B,
    surfaces: Vec<OverlaySurface>,
}

impl<B: OverlayBackend> OverlayManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            surfaces: Vec::new(),
        }
    }

    /// Create one surface per currently attached display, each matching that
    /// display's bounds and carrying `text`.
    ///
    /// Callers pair this with `destroy_overlays`; if the set is somehow
    /// non-empty the old surfaces are torn down first so the display/surface
    /// invariant holds either way.
    pub fn build_overlays(&mut self, text: &str) {
        if !self.surfaces.is_empty() {
            warn!(
                surfaces = self.surfaces.len(),
                "overlay build requested while surfaces exist, destroying first"
            );
            self.destroy_overlays();
        }

        let displays = self.backend.displays();
        for display in &displays {
            match self.backend.create_surface(display, text) {
                Ok(handle) => self.surfaces.push(OverlaySurface {
                    handle,
                    bounds: display.bounds,
                    text: text.to_owned(),
                }),
                Err(e) => {
                    let display_id = display.id;
                    error!(display_id = %display_id, error = %e, "overlay surface creation failed");
                }
            }
        }
        debug!(
            surfaces = self.surfaces.len(),
            displays = displays.len(),
            "overlay build complete"
        );
    }

    /// Forcefully release every tracked surface. Individual failures are
    /// logged without aborting the batch; the tracked set is always left
    /// empty.
    pub fn destroy_overlays(&mut self) {
        for surface in self.surfaces.drain(..) {
            if let Err(e) = self.backend.destroy_surface(surface.handle) {
                warn!(error = %e, "overlay surface release failed");
            }
        }
    }

    /// Destroy then rebuild, re-reading displays and using `text` as the
    /// watermark for the new set.
    pub fn refresh_overlays(&mut self, text: &str) {
        self.destroy_overlays();
        self.build_overlays(text);
    }

    /// True when some tracked surface no longer exists on the OS side.
    pub fn any_surface_dead(&self) -> bool {
        self.surfaces
            .iter()
            .any(|s| !self.backend.surface_alive(s.handle))
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn surfaces(&self) -> &[OverlaySurface] {
        &self.surfaces
    }
}
