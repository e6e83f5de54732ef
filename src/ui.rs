// Activation window and watermark editor.
//
// Plain Win32 forms built from the standard STATIC/EDIT/BUTTON classes,
// living on the platform pump thread like every other window. The app loop
// opens and closes them with UiRequest pushes; submissions travel back as
// ControlRequest events carrying a reply channel. The pump thread must never
// block on the app loop (the app loop blocks on the pump for surface work),
// so replies are polled with a window timer instead of a blocking receive.

use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Mutex;

use tracing::{debug, warn};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::CreateSolidBrush;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    AdjustWindowRectEx, CreateWindowExW, DefWindowProcW, DestroyWindow, GetWindowTextW, IsWindow,
    KillTimer, RegisterClassW, SetForegroundWindow, SetTimer, SetWindowTextW, ShowWindow,
    CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, HMENU, SW_SHOW, WINDOW_EX_STYLE, WINDOW_STYLE,
    WM_CLOSE, WM_COMMAND, WM_DESTROY, WM_TIMER, WNDCLASSW, WNDPROC, WS_BORDER, WS_CAPTION,
    WS_CHILD, WS_OVERLAPPED, WS_SYSMENU, WS_TABSTOP, WS_VISIBLE,
};

use crate::activation::ActivationOutcome;
use crate::app::{AppEvent, ControlRequest, UiRequest};
use crate::platform::windows::post_event;

const ACTIVATION_CLASS: &str = "AquamarkActivationWnd\0";
const EDITOR_CLASS: &str = "AquamarkEditorWnd\0";

// Edit and button styles the windows crate feature set does not surface.
const ES_AUTOHSCROLL: u32 = 0x0080;
const BS_DEFPUSHBUTTON: u32 = 0x0001;

const IDC_SUBMIT: u32 = 2001;
const IDC_SAVE: u32 = 2002;

/// Timer that polls the app loop's reply channel.
const POLL_TIMER_ID: usize = 1;
const POLL_INTERVAL_MS: u32 = 100;

const INPUT_LIMIT: usize = 512;

struct ActivationWindow {
    hwnd: isize,
    license_edit: isize,
    text_edit: isize,
    status: isize,
    reply: Option<Receiver<ActivationOutcome>>,
}

struct EditorWindow {
    hwnd: isize,
    edit: isize,
    status: isize,
    prefill: Option<Receiver<String>>,
    save: Option<Receiver<bool>>,
}

static ACTIVATION: Mutex<Option<ActivationWindow>> = Mutex::new(None);
static EDITOR: Mutex<Option<EditorWindow>> = Mutex::new(None);
static CLASSES_REGISTERED: Mutex<bool> = Mutex::new(false);

/// Entry point for the pump thread: apply one UI push from the app loop.
pub fn handle_request(request: UiRequest) {
    match request {
        UiRequest::ShowActivation => show_activation(),
        UiRequest::CloseActivation => close_activation(),
        UiRequest::OpenWatermarkEditor => open_editor(),
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn hwnd_of(raw: isize) -> HWND {
    HWND(raw as *mut std::ffi::c_void)
}

fn register_classes() -> bool {
    let mut registered = CLASSES_REGISTERED.lock().unwrap();
    if *registered {
        return true;
    }
    let classes: [(&str, WNDPROC); 2] = [
        (ACTIVATION_CLASS, Some(activation_proc)),
        (EDITOR_CLASS, Some(editor_proc)),
    ];
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        for (name, proc) in classes {
            let class_name: Vec<u16> = name.encode_utf16().collect();
            let wc = WNDCLASSW {
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: proc,
                hInstance: hinstance.into(),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                hbrBackground: CreateSolidBrush(COLORREF(0x00F0F0F0)),
                ..Default::default()
            };
            if RegisterClassW(&wc) == 0 {
                warn!(class = name.trim_end_matches('\0'), "window class registration failed");
                return false;
            }
        }
    }
    *registered = true;
    true
}

/// Create a top-level form window sized to the given client area.
fn create_form(class: &str, title: &str, client_w: i32, client_h: i32) -> Option<HWND> {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        let class_name: Vec<u16> = class.encode_utf16().collect();
        let title = wide(title);

        let mut wr = RECT {
            left: 0,
            top: 0,
            right: client_w,
            bottom: client_h,
        };
        let style = WS_OVERLAPPED | WS_CAPTION | WS_SYSMENU;
        let _ = AdjustWindowRectEx(&mut wr, style, false, WINDOW_EX_STYLE::default());

        match CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(title.as_ptr()),
            style,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            wr.right - wr.left,
            wr.bottom - wr.top,
            None,
            None,
            Some(hinstance.into()),
            None,
        ) {
            Ok(hwnd) => Some(hwnd),
            Err(e) => {
                warn!(error = %e, "form window creation failed");
                None
            }
        }
    }
}

fn create_child(
    parent: HWND,
    class: &str,
    text: &str,
    style: WINDOW_STYLE,
    id: u32,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
) -> isize {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        let class = wide(class);
        let text = wide(text);
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class.as_ptr()),
            PCWSTR(text.as_ptr()),
            WS_CHILD | WS_VISIBLE | style,
            x,
            y,
            w,
            h,
            Some(parent),
            Some(HMENU(id as usize as *mut std::ffi::c_void)),
            Some(hinstance.into()),
            None,
        )
        .map(|hwnd| hwnd.0 as isize)
        .unwrap_or_default()
    }
}

fn edit_style() -> WINDOW_STYLE {
    WS_BORDER | WS_TABSTOP | WINDOW_STYLE(ES_AUTOHSCROLL)
}

fn read_text(raw: isize) -> String {
    let mut buf = [0u16; INPUT_LIMIT];
    let len = unsafe { GetWindowTextW(hwnd_of(raw), &mut buf) } as usize;
    String::from_utf16_lossy(&buf[..len.min(buf.len())])
}

fn set_text(raw: isize, text: &str) {
    let text = wide(text);
    unsafe {
        let _ = SetWindowTextW(hwnd_of(raw), PCWSTR(text.as_ptr()));
    }
}

// ── Activation window ───────────────────────────────────────────────────────

fn show_activation() {
    {
        let guard = ACTIVATION.lock().unwrap();
        if let Some(win) = guard.as_ref() {
            if unsafe { IsWindow(Some(hwnd_of(win.hwnd))).as_bool() } {
                unsafe {
                    let _ = SetForegroundWindow(hwnd_of(win.hwnd));
                }
                return;
            }
        }
    }
    if !register_classes() {
        return;
    }
    let Some(hwnd) = create_form(ACTIVATION_CLASS, "Activate Aquamark", 380, 196) else {
        return;
    };

    create_child(hwnd, "STATIC", "License key:", WINDOW_STYLE(0), 0, 16, 14, 348, 18);
    let license_edit = create_child(hwnd, "EDIT", "", edit_style(), 0, 16, 34, 348, 24);
    create_child(hwnd, "STATIC", "Watermark text:", WINDOW_STYLE(0), 0, 16, 68, 348, 18);
    let text_edit = create_child(hwnd, "EDIT", "", edit_style(), 0, 16, 88, 348, 24);
    let status = create_child(hwnd, "STATIC", "", WINDOW_STYLE(0), 0, 16, 128, 230, 52);
    create_child(
        hwnd,
        "BUTTON",
        "Activate",
        WS_TABSTOP | WINDOW_STYLE(BS_DEFPUSHBUTTON),
        IDC_SUBMIT,
        256,
        146,
        108,
        28,
    );

    *ACTIVATION.lock().unwrap() = Some(ActivationWindow {
        hwnd: hwnd.0 as isize,
        license_edit,
        text_edit,
        status,
        reply: None,
    });

    unsafe {
        let _ = ShowWindow(hwnd, SW_SHOW);
        let _ = SetForegroundWindow(hwnd);
    }
}

/// Close the activation window if it still exists. The handle can be stale:
/// the user may have closed the window while a submission was in flight.
fn close_activation() {
    let raw = {
        let guard = ACTIVATION.lock().unwrap();
        match guard.as_ref() {
            Some(win) => win.hwnd,
            None => {
                debug!("activation window already gone");
                return;
            }
        }
    };
    if !unsafe { IsWindow(Some(hwnd_of(raw))).as_bool() } {
        warn!("stale activation window handle, dropping it");
        *ACTIVATION.lock().unwrap() = None;
        return;
    }
    // WM_DESTROY clears the tracked state; no lock may be held here.
    unsafe {
        let _ = DestroyWindow(hwnd_of(raw));
    }
}

fn activation_submit(hwnd: HWND) {
    let (license_edit, text_edit, status) = {
        let guard = ACTIVATION.lock().unwrap();
        match guard.as_ref() {
            Some(win) => (win.license_edit, win.text_edit, win.status),
            None => return,
        }
    };

    let license_key = read_text(license_edit).trim().to_owned();
    let watermark_text = read_text(text_edit).trim().to_owned();
    if license_key.is_empty() || watermark_text.is_empty() {
        set_text(status, "Enter a license key and watermark text.");
        return;
    }

    let (reply, result) = channel();
    if let Some(win) = ACTIVATION.lock().unwrap().as_mut() {
        win.reply = Some(result);
    }
    post_event(AppEvent::Control(ControlRequest::Activate {
        license_key,
        watermark_text,
        reply,
    }));
    set_text(status, "Checking license...");
    unsafe {
        SetTimer(Some(hwnd), POLL_TIMER_ID, POLL_INTERVAL_MS, None);
    }
}

fn activation_poll(hwnd: HWND) {
    let mut guard = ACTIVATION.lock().unwrap();
    let Some(win) = guard.as_mut() else { return };
    let Some(receiver) = win.reply.as_ref() else { return };

    let outcome = match receiver.try_recv() {
        Ok(outcome) => outcome,
        Err(TryRecvError::Empty) => return,
        Err(TryRecvError::Disconnected) => ActivationOutcome {
            success: false,
            message: Some("Activation failed. Please try again.".into()),
        },
    };
    win.reply = None;
    let status = win.status;
    drop(guard);

    unsafe {
        let _ = KillTimer(Some(hwnd), POLL_TIMER_ID);
    }
    if outcome.success {
        // The app loop closes this window with a CloseActivation push.
        set_text(status, "Activated.");
    } else {
        set_text(
            status,
            outcome.message.as_deref().unwrap_or("License was not accepted."),
        );
    }
}

unsafe extern "system" fn activation_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_COMMAND if (wparam.0 & 0xFFFF) as u32 == IDC_SUBMIT => {
            activation_submit(hwnd);
            LRESULT(0)
        }
        WM_TIMER if wparam.0 == POLL_TIMER_ID => {
            activation_poll(hwnd);
            LRESULT(0)
        }
        WM_CLOSE => {
            // Closing without activating leaves the app idle in the tray.
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }
        WM_DESTROY => {
            let mut guard = ACTIVATION.lock().unwrap();
            if guard.as_ref().is_some_and(|win| win.hwnd == hwnd.0 as isize) {
                *guard = None;
            }
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

// ── Watermark editor ────────────────────────────────────────────────────────

fn open_editor() {
    {
        let guard = EDITOR.lock().unwrap();
        if let Some(win) = guard.as_ref() {
            if unsafe { IsWindow(Some(hwnd_of(win.hwnd))).as_bool() } {
                unsafe {
                    let _ = SetForegroundWindow(hwnd_of(win.hwnd));
                }
                return;
            }
        }
    }
    if !register_classes() {
        return;
    }
    let Some(hwnd) = create_form(EDITOR_CLASS, "Edit Watermark Text", 380, 124) else {
        return;
    };

    create_child(hwnd, "STATIC", "Watermark text:", WINDOW_STYLE(0), 0, 16, 14, 348, 18);
    let edit = create_child(hwnd, "EDIT", "", edit_style(), 0, 16, 34, 348, 24);
    let status = create_child(hwnd, "STATIC", "", WINDOW_STYLE(0), 0, 16, 74, 230, 34);
    create_child(
        hwnd,
        "BUTTON",
        "Save",
        WS_TABSTOP | WINDOW_STYLE(BS_DEFPUSHBUTTON),
        IDC_SAVE,
        256,
        74,
        108,
        28,
    );

    // Prefill with the stored text once the app loop answers.
    let (reply, result) = channel();
    *EDITOR.lock().unwrap() = Some(EditorWindow {
        hwnd: hwnd.0 as isize,
        edit,
        status,
        prefill: Some(result),
        save: None,
    });
    post_event(AppEvent::Control(ControlRequest::GetWatermark { reply }));

    unsafe {
        SetTimer(Some(hwnd), POLL_TIMER_ID, POLL_INTERVAL_MS, None);
        let _ = ShowWindow(hwnd, SW_SHOW);
        let _ = SetForegroundWindow(hwnd);
    }
}

fn editor_save(hwnd: HWND) {
    let (edit, status) = {
        let guard = EDITOR.lock().unwrap();
        match guard.as_ref() {
            Some(win) => (win.edit, win.status),
            None => return,
        }
    };

    let text = read_text(edit).trim().to_owned();
    if text.is_empty() {
        set_text(status, "Watermark text cannot be empty.");
        return;
    }

    let (reply, result) = channel();
    if let Some(win) = EDITOR.lock().unwrap().as_mut() {
        win.save = Some(result);
    }
    post_event(AppEvent::Control(ControlRequest::UpdateWatermark { text, reply }));
    set_text(status, "Saving...");
    unsafe {
        SetTimer(Some(hwnd), POLL_TIMER_ID, POLL_INTERVAL_MS, None);
    }
}

fn editor_poll(hwnd: HWND) {
    let mut guard = EDITOR.lock().unwrap();
    let Some(win) = guard.as_mut() else { return };

    if let Some(receiver) = win.prefill.as_ref() {
        match receiver.try_recv() {
            Ok(text) => {
                win.prefill = None;
                // A save already in flight means the user has replaced the
                // text; the stored value would clobber their input.
                if win.save.is_none() {
                    let edit = win.edit;
                    drop(guard);
                    unsafe {
                        let _ = KillTimer(Some(hwnd), POLL_TIMER_ID);
                    }
                    set_text(edit, &text);
                    return;
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => win.prefill = None,
        }
    }

    let Some(receiver) = win.save.as_ref() else {
        if win.prefill.is_none() {
            drop(guard);
            unsafe {
                let _ = KillTimer(Some(hwnd), POLL_TIMER_ID);
            }
        }
        return;
    };
    let saved = match receiver.try_recv() {
        Ok(saved) => saved,
        Err(TryRecvError::Empty) => return,
        Err(TryRecvError::Disconnected) => false,
    };
    win.save = None;
    let status = win.status;
    drop(guard);

    unsafe {
        let _ = KillTimer(Some(hwnd), POLL_TIMER_ID);
    }
    if saved {
        unsafe {
            let _ = DestroyWindow(hwnd);
        }
    } else {
        set_text(status, "Could not save the watermark text.");
    }
}

unsafe extern "system" fn editor_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_COMMAND if (wparam.0 & 0xFFFF) as u32 == IDC_SAVE => {
            editor_save(hwnd);
            LRESULT(0)
        }
        WM_TIMER if wparam.0 == POLL_TIMER_ID => {
            editor_poll(hwnd);
            LRESULT(0)
        }
        WM_CLOSE => {
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }
        WM_DESTROY => {
            let mut guard = EDITOR.lock().unwrap();
            if guard.as_ref().is_some_and(|win| win.hwnd == hwnd.0 as isize) {
                *guard = None;
            }
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
