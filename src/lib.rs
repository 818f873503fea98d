//! # Process Key Sequencer
//!
//! Replays a cyclic sequence of keystrokes, each followed by its own delay,
//! into one externally selected process until told to stop.
//!
//! ## Features
//!
//! - Bind a run to a single process by PID
//! - Per-step delays, including zero-delay back-to-back presses
//! - Immediate, idempotent stop (API, global hotkey, or Ctrl+C)
//! - Target liveness re-checked before every key
//! - Ordered status stream ending in exactly one terminal event
//! - Dry-run mode for trying sequences without a target window
//!
//! ## Example
//!
//! ```no_run
//! use process_key_sequencer::{Dispatcher, RunEvent, SequenceFile};
//!
//! # async fn demo() -> process_key_sequencer::Result<()> {
//! let config = SequenceFile::from_file("rotation.json")?.into_config(4242)?;
//! let (handle, mut events) = Dispatcher::system()?.start(config)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RunEvent::Status(status) => println!("{}", status.text),
//!         RunEvent::Finished(reason) => println!("done: {reason}"),
//!     }
//! }
//! # drop(handle);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "key_sequence": ["1", "2", "space"],
//!   "sleep_times": [500, 500, "2s"],
//!   "stop_hotkey": "ctrl+alt+s"
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod global_hotkey;
pub mod key_sender;
pub mod process_finder;

pub use config::{KeyStep, SequenceConfig, SequenceFile};
pub use dispatch::{Dispatcher, RunEvent, RunEvents, RunHandle, Severity, StatusEvent, TerminalReason};
pub use error::{Result, SequencerError};
pub use global_hotkey::StopHotkey;
pub use key_sender::{DryRunSender, InjectError, KeyCode, KeyInjector, KeySender};
pub use process_finder::{ProcessFinder, Target, TargetResolver};
