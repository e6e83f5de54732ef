// Launch-on-login registration.
//
// One registry value under HKCU\...\Run pointing at the current executable,
// written once after a successful activation. Quoting the path matters:
// config directories with spaces break the Run entry otherwise.

use windows::core::PCWSTR;
use windows::Win32::System::Registry::{
    RegCloseKey, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW, HKEY, HKEY_CURRENT_USER,
    KEY_READ, KEY_WRITE, REG_SAM_FLAGS, REG_SZ,
};

use tracing::warn;

const RUN_KEY: &str = "Software\\Microsoft\\Windows\\CurrentVersion\\Run\0";
const VALUE_NAME: &str = "Aquamark\0";

fn open_run_key(access: REG_SAM_FLAGS) -> Option<HKEY> {
    let key_path: Vec<u16> = RUN_KEY.encode_utf16().collect();
    let mut hkey = HKEY::default();
    unsafe {
        RegOpenKeyExW(
            HKEY_CURRENT_USER,
            PCWSTR(key_path.as_ptr()),
            Some(0),
            access,
            &mut hkey,
        )
        .ok()
        .ok()
        .map(|_| hkey)
    }
}

/// Register the current executable for launch on login.
pub fn enable() -> bool {
    let Some(hkey) = open_run_key(KEY_WRITE) else {
        warn!("could not open the Run registry key for writing");
        return false;
    };
    let exe_path = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            warn!(error = %e, "current executable path unavailable");
            unsafe {
                let _ = RegCloseKey(hkey);
            }
            return false;
        }
    };

    let value_name: Vec<u16> = VALUE_NAME.encode_utf16().collect();
    let command: Vec<u16> = format!("\"{}\"\0", exe_path.display()).encode_utf16().collect();
    let data = unsafe {
        std::slice::from_raw_parts(command.as_ptr() as *const u8, command.len() * 2)
    };

    unsafe {
        let result = RegSetValueExW(
            hkey,
            PCWSTR(value_name.as_ptr()),
            Some(0),
            REG_SZ,
            Some(data),
        );
        let _ = RegCloseKey(hkey);
        result.is_ok()
    }
}

/// Whether the Run entry already exists.
pub fn is_enabled() -> bool {
    let Some(hkey) = open_run_key(KEY_READ) else {
        return false;
    };
    let value_name: Vec<u16> = VALUE_NAME.encode_utf16().collect();
    unsafe {
        let result = RegQueryValueExW(hkey, PCWSTR(value_name.as_ptr()), None, None, None, None);
        let _ = RegCloseKey(hkey);
        result.is_ok()
    }
}
