// System tray icon with context menu.
//
// The icon attaches to the hidden event window owned by the platform pump;
// menu clicks come back to that window as WM_COMMAND and are forwarded into
// the app channel from there.

use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, POINT};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Shell::{
    Shell_NotifyIconW, NIF_ICON, NIF_MESSAGE, NIF_TIP, NIM_ADD, NIM_DELETE, NOTIFYICONDATAW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CreatePopupMenu, DestroyMenu, GetCursorPos, LoadIconW, SetForegroundWindow,
    TrackPopupMenu, IDI_APPLICATION, MF_SEPARATOR, MF_STRING, TPM_BOTTOMALIGN, TPM_LEFTALIGN,
};

use tracing::warn;

/// Custom message ID for tray icon callbacks
pub const WM_TRAY_ICON: u32 = 0x0401; // WM_APP + 1

/// Menu item IDs
pub const IDM_EDIT_WATERMARK: u32 = 1001;
pub const IDM_CHECK_LICENSE: u32 = 1002;
pub const IDM_QUIT: u32 = 1003;

fn wide_str(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Add the system tray icon
pub fn add_tray_icon(hwnd: HWND) -> bool {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null()).unwrap_or_default();
        // Embedded resource icon (ID 1), falling back to the stock
        // application icon when the executable carries no resources.
        let icon_id = PCWSTR(1 as *const u16);
        let mut hicon = LoadIconW(Some(hinstance.into()), icon_id);
        if hicon.is_err() {
            hicon = LoadIconW(None, IDI_APPLICATION);
        }

        let mut nid = NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: hwnd,
            uID: 1,
            uFlags: NIF_ICON | NIF_MESSAGE | NIF_TIP,
            uCallbackMessage: WM_TRAY_ICON,
            ..Default::default()
        };

        match hicon {
            Ok(icon) => nid.hIcon = icon,
            Err(e) => warn!(error = %e, "tray icon unavailable"),
        }

        let tip = wide_str("Aquamark Screen Watermark");
        let len = tip.len().min(nid.szTip.len());
        nid.szTip[..len].copy_from_slice(&tip[..len]);

        Shell_NotifyIconW(NIM_ADD, &nid).as_bool()
    }
}

/// Remove the system tray icon
pub fn remove_tray_icon(hwnd: HWND) {
    unsafe {
        let nid = NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: hwnd,
            uID: 1,
            ..Default::default()
        };
        let _ = Shell_NotifyIconW(NIM_DELETE, &nid);
    }
}

/// Show the tray context menu
pub fn show_context_menu(hwnd: HWND) {
    unsafe {
        let menu = match CreatePopupMenu() {
            Ok(menu) => menu,
            Err(e) => {
                warn!(error = %e, "tray menu creation failed");
                return;
            }
        };
        let edit_text = wide_str("Edit Watermark Text");
        let check_text = wide_str("Check License");
        let quit_text = wide_str("Quit");

        let _ = AppendMenuW(
            menu,
            MF_STRING,
            IDM_EDIT_WATERMARK as usize,
            PCWSTR(edit_text.as_ptr()),
        );
        let _ = AppendMenuW(
            menu,
            MF_STRING,
            IDM_CHECK_LICENSE as usize,
            PCWSTR(check_text.as_ptr()),
        );
        let _ = AppendMenuW(menu, MF_SEPARATOR, 0, PCWSTR::null());
        let _ = AppendMenuW(menu, MF_STRING, IDM_QUIT as usize, PCWSTR(quit_text.as_ptr()));

        let mut pt = POINT::default();
        let _ = GetCursorPos(&mut pt);

        // Required for TrackPopupMenu to work correctly with tray icons
        let _ = SetForegroundWindow(hwnd);

        let _ = TrackPopupMenu(
            menu,
            TPM_LEFTALIGN | TPM_BOTTOMALIGN,
            pt.x,
            pt.y,
            Some(0),
            hwnd,
            None,
        );

        let _ = DestroyMenu(menu);
    }
}
