//! Per-interface sampling-period tracking (SPEC_FULL.md §E.3, spec.md
//! §4.4 "Sampling period").
//!
//! Grounded on `original_source/src/sacn/sampling_period_netint.c`: a
//! networking reset may only touch a subset of a receiver's interfaces, so
//! sampling state is tracked per interface rather than as one receiver-wide
//! flag. This is what makes scenario 6 (a sampling merger isolating a
//! source that only appeared on a newly reset interface) representable.

use std::time::{Duration, Instant};

use crate::config::T_SAMPLE;
use crate::net::InterfaceId;

/// Whether an interface is in the receiver's *current* sampling window, a
/// *future* one (queued by a reset that hasn't completed its own window
/// yet), or not sampling at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Current,
    Future,
}

/// Tracks, per interface, whether it's within a sampling period.
#[derive(Default)]
pub struct SamplingTracker {
    deadline: Option<Instant>,
    interfaces: Vec<(InterfaceId, Status)>,
}

impl SamplingTracker {
    /// Creates a tracker with no interfaces in a sampling period.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a sampling period of [T_SAMPLE] for
    /// `interfaces`, marking them current. Interfaces not named keep
    /// whatever status they already had.
    pub fn start(&mut self, interfaces: &[InterfaceId], now: Instant) {
        self.deadline = Some(now + T_SAMPLE);
        for &id in interfaces {
            match self.interfaces.iter_mut().find(|(i, _)| *i == id) {
                Some(entry) => entry.1 = Status::Current,
                None => self.interfaces.push((id, Status::Current)),
            }
        }
    }

    /// Marks `interfaces` as belonging to a *future* sampling period — used
    /// when a reset only affects some interfaces while others are still
    /// mid-sample (spec.md §4.4: "A networking reset may mark only a
    /// subset of interfaces as in the next sampling period").
    pub fn queue_future(&mut self, interfaces: &[InterfaceId]) {
        for &id in interfaces {
            match self.interfaces.iter_mut().find(|(i, _)| *i == id) {
                Some(entry) => entry.1 = Status::Future,
                None => self.interfaces.push((id, Status::Future)),
            }
        }
    }

    /// Whether `interface` is currently within a sampling period.
    pub fn is_sampling(&self, interface: Option<InterfaceId>) -> bool {
        match interface {
            Some(id) => {
                self.interfaces.iter().any(|(i, s)| *i == id && *s == Status::Current)
            }
            // No interface context (shared-socket mode): fall back to
            // whether the receiver-wide timer is live at all.
            None => self.deadline.is_some(),
        }
    }

    /// Whether every tracked interface has reached [Status::Current] (none
    /// are queued as [Status::Future]) and the window has elapsed.
    ///
    /// On success, every future interface is promoted to current and the
    /// timer is cleared — callers should treat this as the
    /// `sampling-period-ended` trigger.
    pub fn try_end(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline else { return false };
        if now < deadline {
            return false;
        }
        if self.interfaces.iter().any(|(_, s)| *s == Status::Future) {
            // Any future interface present means the window isn't over for
            // everyone yet; promote them and restart the timer so they get
            // their own full T_SAMPLE window.
            for (_, status) in self.interfaces.iter_mut() {
                *status = Status::Current;
            }
            self.deadline = Some(now + T_SAMPLE);
            return false;
        }

        self.deadline = None;
        self.interfaces.clear();
        true
    }

    /// Time remaining in the current window, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}
