//! The dispatch loop.
//!
//! [`Dispatcher::start`] validates the sequence, resolves the target once and
//! then hands the run to its own tokio task. The task walks the steps
//! cyclically until stopped, reporting progress on an unbounded channel that
//! always ends with exactly one [`RunEvent::Finished`].
//!
//! ```no_run
//! use process_key_sequencer::{Dispatcher, SequenceConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> process_key_sequencer::Result<()> {
//! let config = SequenceConfig::from_parallel(
//!     &["1", "space"],
//!     &[Duration::from_millis(500), Duration::from_secs(1)],
//!     4242,
//! )?;
//! let (handle, events) = Dispatcher::system()?.start(config)?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! handle.stop();
//! let reason = events.wait().await;
//! println!("run ended: {reason}");
//! # Ok(())
//! # }
//! ```

use crate::config::{KeyStep, SequenceConfig};
use crate::error::{Result, SequencerError};
use crate::key_sender::{InjectError, KeyInjector, KeySender};
use crate::process_finder::{ProcessFinder, Target, TargetResolver};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// A human-readable progress message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub severity: Severity,
    pub text: String,
}

impl StatusEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    Cancelled,
    TargetLost,
    FatalError(String),
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TargetLost => f.write_str("target lost"),
            Self::FatalError(reason) => write!(f, "fatal error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Status(StatusEvent),
    /// Always the last event of a run.
    Finished(TerminalReason),
}

/// Cancellation handle for one run. Cheap to clone.
///
/// Dropping the last clone cancels the run as well, so a run never outlives
/// every way of stopping it.
#[derive(Debug, Clone)]
pub struct RunHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl RunHandle {
    /// Request cancellation. Idempotent, and harmless once the run has ended.
    ///
    /// No key is injected after the loop's next checkpoint; a pending delay
    /// is cut short.
    pub fn stop(&self) {
        if !self.cancel.send_replace(true) {
            debug!("stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// The ordered event stream of one run.
#[derive(Debug)]
pub struct RunEvents {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl RunEvents {
    /// Next event, or `None` after the terminal event has been consumed.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Discard status events until the run ends.
    pub async fn wait(mut self) -> TerminalReason {
        while let Some(event) = self.recv().await {
            if let RunEvent::Finished(reason) = event {
                return reason;
            }
        }
        TerminalReason::FatalError("run ended without a terminal event".to_string())
    }
}

/// Starts runs against a resolver and an injector.
#[derive(Clone)]
pub struct Dispatcher {
    resolver: Arc<dyn TargetResolver>,
    injector: Arc<dyn KeyInjector>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn TargetResolver>, injector: Arc<dyn KeyInjector>) -> Self {
        Self { resolver, injector }
    }

    /// Live process table plus real key injection.
    pub fn system() -> Result<Self> {
        Ok(Self::new(
            Arc::new(ProcessFinder::new()),
            Arc::new(KeySender::new()?),
        ))
    }

    /// Start a run on the current tokio runtime.
    ///
    /// Fails without emitting anything if the sequence is empty
    /// (`InvalidSequence`) or the target cannot be resolved
    /// (`TargetNotFound`). The config is consumed, so a config can never
    /// back two runs at once.
    pub fn start(&self, config: SequenceConfig) -> Result<(RunHandle, RunEvents)> {
        if config.steps().is_empty() {
            return Err(SequencerError::invalid_sequence(
                "sequence must contain at least one step",
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SequencerError::Runtime(e.to_string()))?;

        let pid = config.target_pid();
        let target = self.resolver.resolve(pid)?;
        let failure_limit = config.max_consecutive_failures();
        let steps = config.into_steps();

        info!(pid, steps = steps.len(), "starting run");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state = RunState {
            steps,
            index: 0,
            target,
            cancel: cancel_rx,
            events: events_tx,
            resolver: Arc::clone(&self.resolver),
            injector: Arc::clone(&self.injector),
            failure_limit,
        };
        drop(runtime.spawn(state.execute()));

        Ok((
            RunHandle {
                cancel: Arc::new(cancel_tx),
            },
            RunEvents { rx: events_rx },
        ))
    }
}

/// Owned by the run's task; only the cancel flag is shared with the caller.
struct RunState {
    steps: Vec<KeyStep>,
    index: usize,
    target: Target,
    cancel: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<RunEvent>,
    resolver: Arc<dyn TargetResolver>,
    injector: Arc<dyn KeyInjector>,
    failure_limit: Option<NonZeroU32>,
}

impl RunState {
    async fn execute(mut self) {
        let reason = self.run().await;
        info!(pid = self.target.pid(), %reason, "run finished");
        // receiver may already be gone
        let _ = self.events.send(RunEvent::Finished(reason));
    }

    async fn run(&mut self) -> TerminalReason {
        let mut failures: u32 = 0;

        loop {
            if self.is_cancelled() {
                return TerminalReason::Cancelled;
            }

            if !self.resolver.is_alive(&self.target) {
                warn!(pid = self.target.pid(), "target is no longer alive");
                return TerminalReason::TargetLost;
            }

            let step = &self.steps[self.index];
            let position = format!("step {}/{}", self.index + 1, self.steps.len());

            match self.injector.inject(&self.target, &step.key) {
                Ok(()) => {
                    failures = 0;
                    debug!(key = %step.key, step = self.index, "key sent");
                    self.emit(StatusEvent::info(format!("sent key '{}' ({position})", step.key)));
                }
                Err(InjectError::TargetGone) => {
                    warn!(pid = self.target.pid(), key = %step.key, "target vanished during injection");
                    return TerminalReason::TargetLost;
                }
                Err(InjectError::Fatal(reason)) => {
                    return TerminalReason::FatalError(reason);
                }
                Err(InjectError::Transient(reason)) => {
                    failures += 1;
                    warn!(key = %step.key, failures, %reason, "key injection failed");
                    self.emit(StatusEvent::error(format!(
                        "failed to send key '{}' ({position}): {reason}",
                        step.key
                    )));

                    if self.failure_limit.is_some_and(|limit| failures >= limit.get()) {
                        return TerminalReason::FatalError(format!(
                            "{failures} consecutive injection failures"
                        ));
                    }
                }
            }

            let delay = step.delay;
            self.pause(delay).await;
            self.index = (self.index + 1) % self.steps.len();
        }
    }

    /// Wait out a step's delay, returning early if cancellation arrives.
    async fn pause(&mut self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }

        // wait_for also completes when the last handle is dropped
        let deadline = Instant::now() + delay;
        tokio::select! {
            () = time::sleep_until(deadline) => {}
            _ = self.cancel.wait_for(|stopped| *stopped) => {}
        }
    }

    /// A stop request, or every `RunHandle` gone so nobody could stop us later.
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.events.send(RunEvent::Status(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_sender::{DryRunSender, KeyCode};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct AlwaysAlive;

    impl TargetResolver for AlwaysAlive {
        fn resolve(&self, pid: u32) -> Result<Target> {
            Ok(Target::new(pid, None))
        }

        fn is_alive(&self, _target: &Target) -> bool {
            true
        }
    }

    /// Fails every injection with the given error.
    struct Failing(InjectError);

    impl KeyInjector for Failing {
        fn inject(&self, _: &Target, _: &KeyCode) -> std::result::Result<(), InjectError> {
            Err(self.0.clone())
        }
    }

    /// Fails only the first injection.
    #[derive(Default)]
    struct FlakyOnce {
        failed: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl KeyInjector for FlakyOnce {
        fn inject(&self, _: &Target, key: &KeyCode) -> std::result::Result<(), InjectError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(InjectError::Transient("queue full".into()));
            }
            self.sent.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn config(keys: &[&str], delay_ms: u64) -> SequenceConfig {
        let delays = vec![Duration::from_millis(delay_ms); keys.len()];
        SequenceConfig::from_parallel(keys, &delays, 1).unwrap()
    }

    async fn collect(mut events: RunEvents) -> Vec<RunEvent> {
        let mut all = Vec::new();
        while let Some(event) = events.recv().await {
            all.push(event);
        }
        all
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_does_not_end_run() {
        let injector = Arc::new(FlakyOnce::default());
        let dispatcher = Dispatcher::new(Arc::new(AlwaysAlive), injector.clone());
        let (handle, events) = dispatcher.start(config(&["a", "b"], 10)).unwrap();

        time::sleep(Duration::from_millis(25)).await;
        handle.stop();
        let events = collect(events).await;

        assert!(matches!(
            &events[0],
            RunEvent::Status(StatusEvent { severity: Severity::Error, .. })
        ));
        assert_eq!(
            events.last(),
            Some(&RunEvent::Finished(TerminalReason::Cancelled))
        );
        assert_eq!(*injector.sent.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_limit_escalates() {
        let dispatcher = Dispatcher::new(
            Arc::new(AlwaysAlive),
            Arc::new(Failing(InjectError::Transient("busy".into()))),
        );
        let config = config(&["a"], 5).with_failure_limit(NonZeroU32::new(3));
        let (_handle, events) = dispatcher.start(config).unwrap();

        let events = collect(events).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events.last(),
            Some(RunEvent::Finished(TerminalReason::FatalError(_)))
        ));
    }

    #[tokio::test]
    async fn test_fatal_injection_ends_run() {
        let dispatcher = Dispatcher::new(
            Arc::new(AlwaysAlive),
            Arc::new(Failing(InjectError::Fatal("no input".into()))),
        );
        let (_handle, events) = dispatcher.start(config(&["a"], 5)).unwrap();
        assert_eq!(
            events.wait().await,
            TerminalReason::FatalError("no input".into())
        );
    }

    #[tokio::test]
    async fn test_target_gone_during_injection() {
        let dispatcher = Dispatcher::new(
            Arc::new(AlwaysAlive),
            Arc::new(Failing(InjectError::TargetGone)),
        );
        let (_handle, events) = dispatcher.start(config(&["a"], 5)).unwrap();
        assert_eq!(events.wait().await, TerminalReason::TargetLost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cuts_delay_short() {
        let dispatcher = Dispatcher::new(Arc::new(AlwaysAlive), Arc::new(DryRunSender::new()));
        let (handle, events) = dispatcher.start(config(&["a"], 60_000)).unwrap();

        time::sleep(Duration::from_millis(10)).await;
        let stopped_at = Instant::now();
        handle.stop();
        assert_eq!(events.wait().await, TerminalReason::Cancelled);
        assert!(Instant::now() - stopped_at < Duration::from_secs(1));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let dispatcher = Dispatcher::new(Arc::new(AlwaysAlive), Arc::new(DryRunSender::new()));
        let err = dispatcher.start(config(&["a"], 5)).unwrap_err();
        assert!(matches!(err, SequencerError::Runtime(_)));
    }

    #[test]
    fn test_terminal_reason_display() {
        assert_eq!(TerminalReason::Cancelled.to_string(), "cancelled");
        assert_eq!(TerminalReason::TargetLost.to_string(), "target lost");
        assert_eq!(
            TerminalReason::FatalError("boom".into()).to_string(),
            "fatal error: boom"
        );
    }
}
