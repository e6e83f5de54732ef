// Win32 backend: overlay windows, display enumeration, and OS notifications.
//
// All window work runs on one dedicated pump thread, because Win32 ties a
// window to the thread that created it. The app loop talks to that thread
// through a request channel; each send is followed by a thread message so
// GetMessageW wakes up and drains the queue. OS notifications flow the other
// way: a hidden top-level window (message-only windows never receive
// broadcasts) catches WM_DISPLAYCHANGE, WM_POWERBROADCAST, and
// WM_WTSSESSION_CHANGE plus the tray callbacks, and forwards them into the
// app channel.
//
// Overlay windows are created with
//   WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_TOOLWINDOW |
//   WS_EX_NOACTIVATE  and  WS_POPUP | WS_VISIBLE | WS_DISABLED
// which makes them click-through, unfocusable, above normal windows, and
// invisible to the taskbar and switcher. The watermark text is the window
// text; black is the color key, so only the text pixels show.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use tracing::{debug, error, warn};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreateSolidBrush, EndPaint, EnumDisplayMonitors, GetMonitorInfoW, SetBkMode,
    SetTextColor, DrawTextW, DT_CENTER, DT_SINGLELINE, DT_VCENTER, HDC, HMONITOR, MONITORINFO,
    PAINTSTRUCT, TRANSPARENT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::RemoteDesktop::{
    WTSRegisterSessionNotification, WTSUnRegisterSessionNotification, NOTIFY_FOR_THIS_SESSION,
};
use windows::Win32::System::Threading::{
    CreateMutexW, GetCurrentThreadId, OpenMutexW, SYNCHRONIZATION_ACCESS_RIGHTS,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClientRect, GetMessageW,
    GetWindowTextW, IsWindow, PostQuitMessage, PostThreadMessageW, RegisterClassW,
    SetLayeredWindowAttributes, SetWindowPos, SetWindowTextW, ShowWindow, TranslateMessage,
    CS_HREDRAW, CS_VREDRAW, HWND_TOPMOST, LWA_ALPHA, LWA_COLORKEY, MSG, SWP_NOACTIVATE,
    SWP_NOMOVE, SWP_NOSENDCHANGING, SWP_NOSIZE, SW_HIDE, WM_COMMAND, WM_DISPLAYCHANGE, WM_PAINT,
    WM_POWERBROADCAST, WM_RBUTTONUP, WNDCLASSW, WS_DISABLED, WS_EX_LAYERED, WS_EX_NOACTIVATE,
    WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_EX_TRANSPARENT, WS_OVERLAPPED, WS_POPUP, WS_VISIBLE,
};

use crate::app::{AppEvent, TrayCommand, UiRequest};
use crate::display::{Bounds, DisplayId, DisplayInfo, SystemEvent};
use crate::overlay::{OverlayBackend, SurfaceError, SurfaceHandle};
use crate::tray;
use crate::ui;

const OVERLAY_CLASS: &str = "AquamarkOverlay\0";
const EVENT_CLASS: &str = "AquamarkEvents\0";
const SINGLE_INSTANCE_MUTEX: &str = "AquamarkMutex\0";

/// Thread message that tells the pump to drain the request queue.
const WM_APP_WAKE: u32 = 0x0402; // one above the tray callback id

/// Alpha applied to the watermark text pixels.
const WATERMARK_ALPHA: u8 = 160;

// Session and power broadcast constants
const WM_WTSSESSION_CHANGE: u32 = 0x02B1;
const WTS_SESSION_LOCK: usize = 0x7;
const WTS_SESSION_UNLOCK: usize = 0x8;
const PBT_APMRESUMESUSPEND: usize = 0x7;
const PBT_APMRESUMEAUTOMATIC: usize = 0x12;

// The pump thread reads these; the wndprocs have no other way to reach state.
static EVENT_SINK: Mutex<Option<Sender<AppEvent>>> = Mutex::new(None);
static REQUESTS: Mutex<Option<Receiver<PlatformRequest>>> = Mutex::new(None);
static LAST_DISPLAY_COUNT: Mutex<usize> = Mutex::new(0);

enum PlatformRequest {
    Displays(Sender<Vec<DisplayInfo>>),
    CreateSurface {
        display: DisplayInfo,
        text: String,
        reply: Sender<Result<SurfaceHandle, SurfaceError>>,
    },
    DestroySurface {
        handle: SurfaceHandle,
        reply: Sender<Result<(), SurfaceError>>,
    },
    SurfaceAlive {
        handle: SurfaceHandle,
        reply: Sender<bool>,
    },
    Ui(UiRequest),
    Shutdown,
}

/// Handle to the pump thread; the overlay backend for this OS.
#[derive(Clone)]
pub struct WindowsPlatform {
    requests: Sender<PlatformRequest>,
    thread_id: u32,
}

/// Whether another instance already holds the named mutex. Claims it if not.
pub fn is_already_running() -> bool {
    let name: Vec<u16> = SINGLE_INSTANCE_MUTEX.encode_utf16().collect();

    unsafe {
        let existing = OpenMutexW(
            SYNCHRONIZATION_ACCESS_RIGHTS(0x001F0001), // MUTEX_ALL_ACCESS
            false,
            PCWSTR(name.as_ptr()),
        );
        if existing.is_ok() {
            return true;
        }

        // Held for the lifetime of the process.
        let _ = CreateMutexW(None, true, PCWSTR(name.as_ptr()));
        false
    }
}

/// Start the pump thread: window classes, hidden event window, tray icon,
/// session notifications. Returns once the thread is ready for requests.
pub fn spawn(events: Sender<AppEvent>) -> WindowsPlatform {
    let (req_tx, req_rx) = channel();
    let (ready_tx, ready_rx) = channel();

    *EVENT_SINK.lock().unwrap() = Some(events);
    *REQUESTS.lock().unwrap() = Some(req_rx);

    std::thread::spawn(move || pump_thread(ready_tx));

    let thread_id = ready_rx.recv().expect("platform pump thread failed to start");
    WindowsPlatform {
        requests: req_tx,
        thread_id,
    }
}

impl WindowsPlatform {
    /// Tear down the tray icon and stop the pump thread.
    pub fn shutdown(&self) {
        self.post(PlatformRequest::Shutdown);
    }

    /// Hand a UI push from the app loop to the pump thread, which owns the
    /// activation and editor windows.
    pub fn notify_ui(&self, request: UiRequest) {
        self.post(PlatformRequest::Ui(request));
    }

    fn post(&self, request: PlatformRequest) -> bool {
        if self.requests.send(request).is_err() {
            error!("platform pump thread is gone");
            return false;
        }
        unsafe {
            if PostThreadMessageW(self.thread_id, WM_APP_WAKE, WPARAM(0), LPARAM(0)).is_err() {
                error!("platform pump thread not accepting messages");
                return false;
            }
        }
        true
    }
}

impl OverlayBackend for WindowsPlatform {
    fn displays(&self) -> Vec<DisplayInfo> {
        let (reply, result) = channel();
        if !self.post(PlatformRequest::Displays(reply)) {
            return Vec::new();
        }
        result.recv().unwrap_or_default()
    }

    fn create_surface(&mut self, display: &DisplayInfo, text: &str) -> Result<SurfaceHandle, SurfaceError> {
        let (reply, result) = channel();
        if !self.post(PlatformRequest::CreateSurface {
            display: *display,
            text: text.to_owned(),
            reply,
        }) {
            return Err(SurfaceError::Create {
                display: display.id,
                reason: "platform pump thread unavailable".into(),
            });
        }
        result.recv().unwrap_or_else(|_| {
            Err(SurfaceError::Create {
                display: display.id,
                reason: "platform pump thread unavailable".into(),
            })
        })
    }

    fn destroy_surface(&mut self, handle: SurfaceHandle) -> Result<(), SurfaceError> {
        let (reply, result) = channel();
        if !self.post(PlatformRequest::DestroySurface { handle, reply }) {
            return Err(SurfaceError::Release {
                reason: "platform pump thread unavailable".into(),
            });
        }
        result.recv().unwrap_or_else(|_| {
            Err(SurfaceError::Release {
                reason: "platform pump thread unavailable".into(),
            })
        })
    }

    fn surface_alive(&self, handle: SurfaceHandle) -> bool {
        let (reply, result) = channel();
        if !self.post(PlatformRequest::SurfaceAlive { handle, reply }) {
            return false;
        }
        result.recv().unwrap_or(false)
    }
}

// ── Pump thread ─────────────────────────────────────────────────────────────

fn pump_thread(ready: Sender<u32>) {
    unsafe {
        if !register_class(OVERLAY_CLASS, Some(overlay_window_proc))
            || !register_class(EVENT_CLASS, Some(event_window_proc))
        {
            error!("window class registration failed");
            drop(ready);
            return;
        }

        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        let class_name: Vec<u16> = EVENT_CLASS.encode_utf16().collect();
        let event_hwnd = match CreateWindowExW(
            WS_EX_TOOLWINDOW,
            PCWSTR(class_name.as_ptr()),
            PCWSTR::null(),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            None,
            None,
            Some(hinstance.into()),
            None,
        ) {
            Ok(hwnd) => hwnd,
            Err(e) => {
                error!(error = %e, "event window creation failed");
                drop(ready);
                return;
            }
        };

        if WTSRegisterSessionNotification(event_hwnd, NOTIFY_FOR_THIS_SESSION).is_err() {
            warn!("session lock/unlock notifications unavailable");
        }

        if !tray::add_tray_icon(event_hwnd) {
            warn!("tray icon could not be added");
        }

        *LAST_DISPLAY_COUNT.lock().unwrap() = enum_displays().len();

        let _ = ready.send(GetCurrentThreadId());

        let mut msg = MSG::default();
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            if msg.message == WM_APP_WAKE {
                drain_requests();
                continue;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        tray::remove_tray_icon(event_hwnd);
        let _ = WTSUnRegisterSessionNotification(event_hwnd);
        let _ = DestroyWindow(event_hwnd);
    }
}

fn drain_requests() {
    let guard = REQUESTS.lock().unwrap();
    let Some(rx) = guard.as_ref() else { return };
    while let Ok(request) = rx.try_recv() {
        match request {
            PlatformRequest::Displays(reply) => {
                let _ = reply.send(enum_displays());
            }
            PlatformRequest::CreateSurface { display, text, reply } => {
                let _ = reply.send(create_overlay_window(&display, &text));
            }
            PlatformRequest::DestroySurface { handle, reply } => {
                let _ = reply.send(destroy_overlay_window(handle));
            }
            PlatformRequest::SurfaceAlive { handle, reply } => {
                let alive = unsafe { IsWindow(Some(hwnd_of(handle))).as_bool() };
                let _ = reply.send(alive);
            }
            PlatformRequest::Ui(request) => ui::handle_request(request),
            PlatformRequest::Shutdown => unsafe {
                PostQuitMessage(0);
            },
        }
    }
}

fn register_class(name: &str, proc: windows::Win32::UI::WindowsAndMessaging::WNDPROC) -> bool {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        let class_name: Vec<u16> = name.encode_utf16().collect();

        let wc = WNDCLASSW {
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: proc,
            hInstance: hinstance.into(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            hbrBackground: CreateSolidBrush(COLORREF(0)),
            ..Default::default()
        };

        RegisterClassW(&wc) != 0
    }
}

fn hwnd_of(handle: SurfaceHandle) -> HWND {
    HWND(handle.0 as *mut std::ffi::c_void)
}

pub(crate) fn post_event(event: AppEvent) {
    if let Some(tx) = EVENT_SINK.lock().unwrap().as_ref() {
        let _ = tx.send(event);
    }
}

// ── Display enumeration ─────────────────────────────────────────────────────

unsafe extern "system" fn monitor_enum_proc(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _lprect: *mut RECT,
    lparam: LPARAM,
) -> windows::core::BOOL {
    let displays = &mut *(lparam.0 as *mut Vec<DisplayInfo>);

    let mut mi = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if GetMonitorInfoW(hmonitor, &mut mi).as_bool() {
        let rect = mi.rcMonitor;
        displays.push(DisplayInfo {
            id: DisplayId(hmonitor.0 as isize),
            bounds: Bounds {
                x: rect.left,
                y: rect.top,
                width: rect.right - rect.left,
                height: rect.bottom - rect.top,
            },
        });
    }

    windows::core::BOOL::from(true)
}

fn enum_displays() -> Vec<DisplayInfo> {
    let mut displays: Vec<DisplayInfo> = Vec::new();
    unsafe {
        let _ = EnumDisplayMonitors(
            None,
            None,
            Some(monitor_enum_proc),
            LPARAM(&mut displays as *mut _ as isize),
        );
    }
    displays
}

// ── Overlay windows ─────────────────────────────────────────────────────────

fn create_overlay_window(display: &DisplayInfo, text: &str) -> Result<SurfaceHandle, SurfaceError> {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        let class_name: Vec<u16> = OVERLAY_CLASS.encode_utf16().collect();

        let hwnd = CreateWindowExW(
            WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE,
            PCWSTR(class_name.as_ptr()),
            PCWSTR::null(),
            WS_POPUP | WS_VISIBLE | WS_DISABLED,
            display.bounds.x,
            display.bounds.y,
            display.bounds.width,
            display.bounds.height,
            None,
            None,
            Some(hinstance.into()),
            None,
        )
        .map_err(|e| SurfaceError::Create {
            display: display.id,
            reason: e.to_string(),
        })?;

        // The watermark text doubles as the window text; WM_PAINT reads it
        // back so no extra per-window state is needed.
        let wide_text: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
        let _ = SetWindowTextW(hwnd, PCWSTR(wide_text.as_ptr()));

        // Black is keyed out, so only the text pixels remain visible.
        let _ = SetLayeredWindowAttributes(
            hwnd,
            COLORREF(0),
            WATERMARK_ALPHA,
            LWA_ALPHA | LWA_COLORKEY,
        );

        let _ = SetWindowPos(
            hwnd,
            Some(HWND_TOPMOST),
            0,
            0,
            0,
            0,
            SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE | SWP_NOSENDCHANGING,
        );

        Ok(SurfaceHandle(hwnd.0 as isize))
    }
}

fn destroy_overlay_window(handle: SurfaceHandle) -> Result<(), SurfaceError> {
    unsafe {
        let hwnd = hwnd_of(handle);
        // Already gone (destroyed externally): nothing left to release.
        if !IsWindow(Some(hwnd)).as_bool() {
            return Ok(());
        }
        let _ = ShowWindow(hwnd, SW_HIDE);
        DestroyWindow(hwnd).map_err(|e| SurfaceError::Release {
            reason: e.to_string(),
        })
    }
}

/// Paints the window text centered on the color-keyed background.
unsafe extern "system" fn overlay_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_PAINT {
        let mut ps = PAINTSTRUCT::default();
        let hdc = BeginPaint(hwnd, &mut ps);

        let mut text = [0u16; 256];
        let len = GetWindowTextW(hwnd, &mut text) as usize;

        let mut rect = RECT::default();
        let _ = GetClientRect(hwnd, &mut rect);

        SetBkMode(hdc, TRANSPARENT);
        SetTextColor(hdc, COLORREF(0x00FF_FFFF));
        DrawTextW(hdc, &mut text[..len], &mut rect, DT_CENTER | DT_VCENTER | DT_SINGLELINE);

        let _ = EndPaint(hwnd, &ps);
        return LRESULT(0);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

// ── Event window ────────────────────────────────────────────────────────────

unsafe extern "system" fn event_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        tray::WM_TRAY_ICON => {
            if lparam.0 as u32 == WM_RBUTTONUP {
                tray::show_context_menu(hwnd);
            }
            LRESULT(0)
        }
        WM_COMMAND => {
            match (wparam.0 & 0xFFFF) as u32 {
                tray::IDM_EDIT_WATERMARK => post_event(AppEvent::Tray(TrayCommand::EditWatermark)),
                tray::IDM_CHECK_LICENSE => post_event(AppEvent::Tray(TrayCommand::CheckLicense)),
                tray::IDM_QUIT => post_event(AppEvent::Tray(TrayCommand::Quit)),
                other => debug!(command = other, "unhandled menu command"),
            }
            LRESULT(0)
        }
        WM_DISPLAYCHANGE => {
            let count = enum_displays().len();
            let mut last = LAST_DISPLAY_COUNT.lock().unwrap();
            let event = if count > *last {
                SystemEvent::DisplayAdded
            } else if count < *last {
                SystemEvent::DisplayRemoved
            } else {
                SystemEvent::DisplayMetricsChanged
            };
            *last = count;
            drop(last);
            post_event(AppEvent::System(event));
            LRESULT(0)
        }
        WM_POWERBROADCAST => {
            if wparam.0 == PBT_APMRESUMEAUTOMATIC || wparam.0 == PBT_APMRESUMESUSPEND {
                post_event(AppEvent::System(SystemEvent::PowerResumed));
            }
            LRESULT(1)
        }
        WM_WTSSESSION_CHANGE => {
            match wparam.0 {
                WTS_SESSION_LOCK => post_event(AppEvent::System(SystemEvent::SessionLocked)),
                WTS_SESSION_UNLOCK => post_event(AppEvent::System(SystemEvent::SessionUnlocked)),
                _ => {}
            }
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
