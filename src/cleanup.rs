//! Release stack for privileged resources.
//!
//! Every pipeline step that acquires host state (a loop device, a scratch
//! directory, a mounted tree) pushes exactly one release action onto the
//! [`CleanupStack`]. On any exit path the stack unwinds in strict reverse
//! order of registration; a failing action is reported and skipped, never
//! allowed to stop the actions registered before it.
//!
//! Setting `NO_CLEANUP` to a non-empty value skips the unwind entirely and
//! leaves all resources attached for post-mortem inspection of a failed
//! build.
//!
//! The stack is cheaply cloneable so the Ctrl-C handler can share it with
//! the pipeline; whichever side unwinds first wins, the other becomes a
//! no-op.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, MutexGuard};

type Action = Box<dyn FnOnce() -> Result<()> + Send>;

/// Lifecycle of the stack. `Done` is reached exactly once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Accumulating,
    Unwinding,
    Done,
}

struct Entry {
    label: String,
    action: Action,
}

struct Inner {
    state: State,
    entries: Vec<Entry>,
    suppress: bool,
}

#[derive(Clone)]
pub struct CleanupStack {
    inner: Arc<Mutex<Inner>>,
}

impl CleanupStack {
    /// New empty stack. `suppress` skips the unwind (see [`suppressed_by_env`]).
    pub fn new(suppress: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Empty,
                entries: Vec::new(),
                suppress,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned mutex only means some earlier holder panicked; the
        // release actions must still run.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a release action for a just-acquired resource.
    ///
    /// `label` names the resource in progress and warning messages.
    pub fn push<F>(&self, label: impl AsRef<str>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let label = label.as_ref().to_string();
        let mut inner = self.lock();
        match inner.state {
            State::Empty | State::Accumulating => {
                inner.state = State::Accumulating;
                inner.entries.push(Entry {
                    label,
                    action: Box::new(action),
                });
            }
            State::Unwinding | State::Done => {
                eprintln!("warning: cleanup for '{label}' registered after unwind; ignoring");
                // Dropping the closure could release the resource early;
                // leak it instead.
                std::mem::forget(Box::new(action) as Action);
            }
        }
    }

    /// Execute all registered actions in reverse order of registration.
    ///
    /// Idempotent: only the first call does anything. The lock is held for
    /// the whole unwind so a concurrent caller (the interrupt handler)
    /// blocks until the actions have run, then sees `Done` and returns.
    pub fn unwind(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::Unwinding | State::Done => return,
            State::Empty => {
                inner.state = State::Done;
                return;
            }
            State::Accumulating => inner.state = State::Unwinding,
        }

        let entries = std::mem::take(&mut inner.entries);

        if inner.suppress {
            for entry in &entries {
                println!("NO_CLEANUP set; leaving {} in place", entry.label);
            }
            // The closures own live handles (e.g. the scratch directory);
            // dropping them would release what the operator asked to keep.
            std::mem::forget(entries);
            inner.state = State::Done;
            return;
        }

        println!("Cleaning up...");
        for entry in entries.into_iter().rev() {
            if let Err(err) = (entry.action)() {
                eprintln!("warning: releasing {} failed: {err:#}", entry.label);
            }
        }
        inner.state = State::Done;
    }

    /// Install a Ctrl-C handler that unwinds this stack, then exits.
    ///
    /// Must be called before the first resource is acquired so an early
    /// interrupt cannot leak anything.
    pub fn install_interrupt_hook(&self) -> Result<()> {
        let stack = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted; releasing resources...");
            stack.unwind();
            std::process::exit(130);
        })
        .context("failed to install interrupt handler")
    }
}

/// True when `NO_CLEANUP` is set to a non-empty value.
pub fn suppressed_by_env() -> bool {
    std::env::var_os("NO_CLEANUP").is_some_and(|v| !v.is_empty())
}
