//! Lifecycle callbacks exposed by the engine.
//!
//! The hooks are synchronous observers invoked from the single control flow;
//! calls never overlap.

use std::time::Duration;

use super::stats::RunStats;
use super::RunState;

/// Observer callback receiving the current state and stats snapshot.
pub type HookFn = Box<dyn Fn(&RunState, &RunStats) + Send + Sync>;

/// Decision callback for interactive confirmation.
pub type ConfirmFn = Box<dyn Fn(&ConfirmPrompt) -> bool + Send + Sync>;

/// Lifecycle hooks: fired once at run start, after every delete attempt, and
/// once at run end.
#[derive(Default)]
pub struct RunHooks {
    pub on_start: Option<HookFn>,
    pub on_progress: Option<HookFn>,
    pub on_stop: Option<HookFn>,
}

impl RunHooks {
    pub(crate) fn start(&self, state: &RunState, stats: &RunStats) {
        if let Some(hook) = &self.on_start {
            hook(state, stats);
        }
    }

    pub(crate) fn progress(&self, state: &RunState, stats: &RunStats) {
        if let Some(hook) = &self.on_progress {
            hook(state, stats);
        }
    }

    pub(crate) fn stop(&self, state: &RunState, stats: &RunStats) {
        if let Some(hook) = &self.on_stop {
            hook(state, stats);
        }
    }
}

/// Everything the operator needs to accept or reject a pending deletion set.
#[derive(Debug, Clone)]
pub struct ConfirmPrompt {
    /// Largest total-results estimate seen so far.
    pub grand_total: u64,
    /// Current estimated time remaining.
    pub eta: Duration,
    /// One preview line per message pending deletion on this page.
    pub preview: Vec<String>,
}
