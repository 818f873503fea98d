//! Target resolution and liveness probing.
//!
//! A [`Target`] is the process a run is bound to, plus (on Windows) the
//! top-level window key messages are posted to. Resolution happens once when
//! a run starts; liveness is re-probed before every key.

use crate::error::{Result, SequencerError};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, trace};

/// A resolved injection target. Read-only once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pid: u32,
    window: Option<u64>,
}

impl Target {
    pub fn new(pid: u32, window: Option<u64>) -> Self {
        Self { pid, window }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Native window handle, if the platform delivers keys to windows.
    pub fn window(&self) -> Option<u64> {
        self.window
    }
}

/// Turns a process identifier into a [`Target`] and keeps checking it.
pub trait TargetResolver: Send + Sync {
    /// Fails with `TargetNotFound` when no live process with this id exists
    /// or it exposes nothing that can receive input.
    fn resolve(&self, pid: u32) -> Result<Target>;

    /// Cheap liveness probe. Returns false instead of failing.
    fn is_alive(&self, target: &Target) -> bool;
}

/// Resolves targets from the live process table.
///
/// Uses `sysinfo` for process lookup. On Windows the process's first
/// visible, unowned top-level window becomes the injection surface.
///
/// # Example
///
/// ```no_run
/// use process_key_sequencer::{ProcessFinder, TargetResolver};
///
/// let finder = ProcessFinder::new();
/// for pid in finder.find_processes("WowClassic.exe") {
///     match finder.resolve(pid) {
///         Ok(target) => println!("PID {} -> window {:?}", pid, target.window()),
///         Err(e) => eprintln!("Error: {}", e),
///     }
/// }
/// ```
pub struct ProcessFinder {
    system: Mutex<System>,
}

impl Clone for ProcessFinder {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for ProcessFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFinder {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// PIDs of running processes whose name contains `process_name`
    /// (case-insensitive), in ascending order.
    pub fn find_processes(&self, process_name: &str) -> Vec<u32> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);

        let needle = process_name.to_lowercase();
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| {
                process
                    .name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&needle)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();

        debug!(process_name, found = pids.len(), "process lookup");
        pids
    }

    fn process_exists(&self, pid: u32) -> bool {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        system
            .process(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }
}

impl TargetResolver for ProcessFinder {
    fn resolve(&self, pid: u32) -> Result<Target> {
        if !self.process_exists(pid) {
            return Err(SequencerError::target_not_found(
                pid,
                "no running process with this id",
            ));
        }

        let window = platform::main_window(pid);
        if platform::NEEDS_WINDOW && window.is_none() {
            return Err(SequencerError::target_not_found(
                pid,
                "process has no visible top-level window",
            ));
        }

        debug!(pid, ?window, "target resolved");
        Ok(Target::new(pid, window))
    }

    fn is_alive(&self, target: &Target) -> bool {
        let window_ok = target.window().is_none_or(platform::window_exists);
        let alive = window_ok && self.process_exists(target.pid());
        trace!(pid = target.pid(), alive, "liveness probe");
        alive
    }
}

#[cfg(windows)]
mod platform {
    use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPARAM, TRUE};
    use winapi::shared::windef::HWND;
    use winapi::um::winuser::{
        EnumWindows, GetWindow, GetWindowThreadProcessId, IsWindow, IsWindowVisible, GW_OWNER,
    };

    pub const NEEDS_WINDOW: bool = true;

    struct Search {
        pid: DWORD,
        found: Option<HWND>,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut Search);
        let mut owner: DWORD = 0;
        GetWindowThreadProcessId(hwnd, &mut owner);

        if owner == search.pid
            && IsWindowVisible(hwnd) != 0
            && GetWindow(hwnd, GW_OWNER).is_null()
        {
            search.found = Some(hwnd);
            return FALSE;
        }
        TRUE
    }

    pub fn main_window(pid: u32) -> Option<u64> {
        let mut search = Search { pid, found: None };
        unsafe {
            EnumWindows(Some(visit), &mut search as *mut Search as LPARAM);
        }
        search.found.map(|hwnd| hwnd as usize as u64)
    }

    pub fn window_exists(window: u64) -> bool {
        unsafe { IsWindow(window as usize as HWND) != 0 }
    }
}

#[cfg(not(windows))]
mod platform {
    pub const NEEDS_WINDOW: bool = false;

    pub fn main_window(_pid: u32) -> Option<u64> {
        None
    }

    pub fn window_exists(_window: u64) -> bool {
        true
    }
}
