use crate::dispatch::RunHandle;
use crate::error::{Result, SequencerError};
use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A system-wide hotkey that stops the current run.
///
/// The manager must stay alive for the hotkey to remain registered.
pub struct StopHotkey {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
}

impl StopHotkey {
    pub fn register(hotkey_str: &str) -> Result<Self> {
        let hotkey = parse_hotkey(hotkey_str)?;

        let manager = GlobalHotKeyManager::new()
            .map_err(|e| SequencerError::hotkey(format!("failed to create hotkey manager: {e}")))?;
        manager.register(hotkey).map_err(|e| {
            SequencerError::hotkey(format!("failed to register '{hotkey_str}': {e}"))
        })?;

        info!(hotkey = hotkey_str, "stop hotkey registered");
        Ok(Self { manager, hotkey })
    }

    /// Poll for presses and stop `handle` on the first one.
    ///
    /// The listener exits on its own once the run has been stopped by any
    /// other means.
    pub fn spawn_listener(&self, handle: RunHandle) -> JoinHandle<()> {
        let id = self.hotkey.id();
        let receiver = GlobalHotKeyEvent::receiver();

        tokio::task::spawn_blocking(move || {
            while !handle.is_stopped() {
                if let Ok(event) = receiver.try_recv() {
                    if event.id == id && event.state == HotKeyState::Pressed {
                        info!("stop hotkey pressed");
                        handle.stop();
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            debug!("hotkey listener exiting");
        })
    }
}

impl Drop for StopHotkey {
    fn drop(&mut self) {
        if let Err(e) = self.manager.unregister(self.hotkey) {
            warn!(error = %e, "failed to unregister stop hotkey");
        }
    }
}

/// Parse strings like `ctrl+alt+s` or `shift+f9`.
pub fn parse_hotkey(hotkey_str: &str) -> Result<HotKey> {
    let binding = hotkey_str.trim();
    if binding.is_empty() {
        return Err(SequencerError::hotkey("empty hotkey string"));
    }

    binding
        .parse::<HotKey>()
        .map_err(|e| SequencerError::hotkey(format!("invalid hotkey '{hotkey_str}': {e}")))
}
