//! Session timers counted in one-second ticks.
//!
//! At most one timer per kind is armed. Arming a kind replaces the previous one, and
//! every phase transition that supersedes a timer cancels it here, so a fired timer
//! always belongs to the current phase.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Countdown from arm to the first ring.
    PreCall,
    /// Persistent-mode delay before the next ring.
    NextCall,
    /// Return from `ended` to `idle`.
    EndedReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    kind: TimerKind,
    remaining: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    timers: Vec<Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `kind` after `ticks` ticks. `ticks` of 0 is treated as 1.
    pub fn arm(&mut self, kind: TimerKind, ticks: u32) {
        self.cancel(kind);
        self.timers.push(Timer {
            kind,
            remaining: ticks.max(1),
        });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.timers.retain(|t| t.kind != kind);
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    pub fn remaining(&self, kind: TimerKind) -> Option<u32> {
        self.timers.iter().find(|t| t.kind == kind).map(|t| t.remaining)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Advance one tick and return the kinds that fired, in arming order.
    pub fn tick(&mut self) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        for timer in &mut self.timers {
            timer.remaining = timer.remaining.saturating_sub(1);
            if timer.remaining == 0 {
                fired.push(timer.kind);
            }
        }
        self.timers.retain(|t| t.remaining > 0);
        fired
    }
}
