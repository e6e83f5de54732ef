// Stable per-machine identifier sent with every validation request.
//
// Windows: the cryptography MachineGuid from the registry, which survives
// reinstalls of the app but not of the OS. Elsewhere: the systemd/dbus
// machine-id. The value only needs to be deterministic per machine; it is
// not a secret.

use tracing::warn;

/// Deterministic identifier for this machine.
pub fn device_id() -> String {
    match read_machine_id() {
        Some(id) if !id.is_empty() => id,
        _ => {
            warn!("no machine identifier available, using fallback id");
            "unknown-device".to_owned()
        }
    }
}

#[cfg(windows)]
fn read_machine_id() -> Option<String> {
    use windows::core::PCWSTR;
    use windows::Win32::System::Registry::{
        RegCloseKey, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ,
    };

    let key_path: Vec<u16> = "SOFTWARE\\Microsoft\\Cryptography\0".encode_utf16().collect();
    let value_name: Vec<u16> = "MachineGuid\0".encode_utf16().collect();

    unsafe {
        let mut hkey = HKEY::default();
        RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            PCWSTR(key_path.as_ptr()),
            Some(0),
            KEY_READ,
            &mut hkey,
        )
        .ok()
        .ok()?;

        let mut buf = [0u16; 80];
        let mut size = (buf.len() * 2) as u32;
        let result = RegQueryValueExW(
            hkey,
            PCWSTR(value_name.as_ptr()),
            None,
            None,
            Some(buf.as_mut_ptr() as *mut u8),
            Some(&mut size),
        );
        let _ = RegCloseKey(hkey);
        result.ok().ok()?;

        let chars = (size as usize / 2).min(buf.len());
        let guid: String = char::decode_utf16(buf[..chars].iter().copied())
            .filter_map(Result::ok)
            .take_while(|c| *c != '\0')
            .collect();
        Some(guid)
    }
}

#[cfg(not(windows))]
fn read_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(data) = std::fs::read_to_string(path) {
            let id = data.trim();
            if !id.is_empty() {
                return Some(id.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_deterministic() {
        assert_eq!(device_id(), device_id());
    }

    #[test]
    fn device_id_is_never_empty() {
        assert!(!device_id().is_empty());
    }
}
