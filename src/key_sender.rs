//! Key identifiers and synthetic key injection.
//!
//! Keys are resolved to Windows virtual-key codes on every platform so that
//! sequences can be validated anywhere; actual delivery is platform specific.

use crate::error::{Result, SequencerError};
use crate::process_finder::Target;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// A parsed key: the identifier as written plus its virtual-key code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCode {
    name: String,
    vk: u16,
}

impl KeyCode {
    /// Parse a symbolic key name (`"a"`, `"space"`, `"f5"`) or a raw
    /// virtual-key code written in hex (`"0x41"`).
    pub fn parse(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(SequencerError::invalid_key(key, "key cannot be empty"));
        }

        let lower = trimmed.to_lowercase();
        let vk = match lower.strip_prefix("0x") {
            Some(hex) => {
                let code = u16::from_str_radix(hex, 16).map_err(|e| {
                    SequencerError::invalid_key(key, format!("bad virtual-key code: {e}"))
                })?;
                if !(0x01..=0xFE).contains(&code) {
                    return Err(SequencerError::invalid_key(
                        key,
                        "virtual-key code must be within 0x01..=0xFE",
                    ));
                }
                code
            }
            None => virtual_key(&lower)
                .ok_or_else(|| SequencerError::invalid_key(key, "unknown key name"))?,
        };

        Ok(Self { name: lower, vk })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vk(&self) -> u16 {
        self.vk
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn virtual_key(name: &str) -> Option<u16> {
    if let [c] = name.as_bytes() {
        match c {
            b'a'..=b'z' => return Some(u16::from(c.to_ascii_uppercase())),
            b'0'..=b'9' => return Some(u16::from(*c)),
            _ => {}
        }
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u16>().ok()) {
        return (1..=24).contains(&n).then(|| 0x6F + n);
    }
    if let Some(n) = name.strip_prefix("numpad").and_then(|n| n.parse::<u16>().ok()) {
        return (n <= 9).then(|| 0x60 + n);
    }

    let vk = match name {
        "space" => 0x20,
        "enter" | "return" => 0x0D,
        "tab" => 0x09,
        "escape" | "esc" => 0x1B,
        "backspace" => 0x08,
        "delete" | "del" => 0x2E,
        "insert" | "ins" => 0x2D,
        "home" => 0x24,
        "end" => 0x23,
        "pageup" => 0x21,
        "pagedown" => 0x22,
        "left" | "arrowleft" => 0x25,
        "up" | "arrowup" => 0x26,
        "right" | "arrowright" => 0x27,
        "down" | "arrowdown" => 0x28,
        "shift" => 0x10,
        "ctrl" | "control" => 0x11,
        "alt" => 0x12,
        "pause" => 0x13,
        "capslock" => 0x14,
        "printscreen" => 0x2C,
        "numlock" => 0x90,
        "scrolllock" => 0x91,
        ";" | "semicolon" => 0xBA,
        "=" | "equals" => 0xBB,
        "," | "comma" => 0xBC,
        "-" | "minus" => 0xBD,
        "." | "period" => 0xBE,
        "/" | "slash" => 0xBF,
        "`" | "backquote" => 0xC0,
        "[" | "bracketleft" => 0xDB,
        "\\" | "backslash" => 0xDC,
        "]" | "bracketright" => 0xDD,
        "'" | "quote" => 0xDE,
        _ => return None,
    };
    Some(vk)
}

/// Why a single injection failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InjectError {
    /// A one-off failure; the target may still be healthy.
    #[error("transient injection failure: {0}")]
    Transient(String),

    /// The failure proves the target no longer exists.
    #[error("target is gone")]
    TargetGone,

    /// The input path is unusable; continuing would be pointless.
    #[error("input subsystem unusable: {0}")]
    Fatal(String),
}

/// Delivers one key press (down + up) to a resolved target.
///
/// Implementations must be fast and non-blocking; the dispatch loop treats
/// injection as effectively synchronous.
pub trait KeyInjector: Send + Sync {
    fn inject(&self, target: &Target, key: &KeyCode) -> std::result::Result<(), InjectError>;
}

/// Posts key messages directly to the target's window.
///
/// Posting to the window queue works without bringing the window to the
/// foreground, which is what lets several game clients be driven at once.
#[derive(Debug, Clone, Default)]
pub struct KeySender;

impl KeySender {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl KeyInjector for KeySender {
    fn inject(&self, target: &Target, key: &KeyCode) -> std::result::Result<(), InjectError> {
        let window = target.window().ok_or_else(|| {
            InjectError::Fatal(format!("process {} has no window to post to", target.pid()))
        })?;
        debug!(pid = target.pid(), window, key = %key, vk = key.vk(), "posting key");
        post_key(window, key.vk())
    }
}

#[cfg(windows)]
fn post_key(window: u64, vk: u16) -> std::result::Result<(), InjectError> {
    use winapi::shared::minwindef::{LPARAM, WPARAM};
    use winapi::shared::windef::HWND;
    use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_INVALID_WINDOW_HANDLE};
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::winuser::{MapVirtualKeyW, PostMessageW, MAPVK_VK_TO_VSC, WM_KEYDOWN, WM_KEYUP};

    let hwnd = window as usize as HWND;
    let scan = unsafe { MapVirtualKeyW(u32::from(vk), MAPVK_VK_TO_VSC) };
    // repeat count 1, scan code in bits 16..24
    let down = 1u32 | (scan << 16);
    // previous-state and transition bits for a release
    let up = down | (1 << 30) | (1 << 31);

    for (message, lparam) in [(WM_KEYDOWN, down), (WM_KEYUP, up)] {
        let posted = unsafe { PostMessageW(hwnd, message, vk as WPARAM, lparam as LPARAM) };
        if posted == 0 {
            let code = unsafe { GetLastError() };
            return Err(match code {
                ERROR_INVALID_WINDOW_HANDLE => InjectError::TargetGone,
                ERROR_ACCESS_DENIED => InjectError::Fatal(
                    "access denied posting to target (is it running elevated?)".to_string(),
                ),
                other => InjectError::Transient(format!("PostMessageW failed with error {other}")),
            });
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn post_key(_window: u64, _vk: u16) -> std::result::Result<(), InjectError> {
    Err(InjectError::Fatal(
        "key injection is only supported on Windows; use --dry-run".to_string(),
    ))
}

/// Logs keys instead of injecting them.
#[derive(Debug, Default)]
pub struct DryRunSender {
    sent: AtomicU64,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys "sent" so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl KeyInjector for DryRunSender {
    fn inject(&self, target: &Target, key: &KeyCode) -> std::result::Result<(), InjectError> {
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(pid = target.pid(), key = %key, count, "DRY-RUN key press");
        Ok(())
    }
}
