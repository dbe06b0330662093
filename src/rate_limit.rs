//! A one-shot-until-reset notification debounce.
//!
//! Grounded on `original_source/src/mem/receiver/source_limit_exceeded.c`:
//! both the receiver's per-universe source cap and the source detector's
//! tracked-source/universes-per-source caps need the same shape — fire
//! once when a count first crosses its limit, stay silent on every
//! subsequent tick the count remains over, and re-arm only once the count
//! has fallen back under the limit (SPEC_FULL.md §E.2, §E.4).

/// Debounces a boolean "over limit" condition into a single edge-triggered
/// notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitedFlag {
    notified: bool,
}

impl RateLimitedFlag {
    /// Creates a flag that hasn't yet notified.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates the condition for this tick. Returns `true` exactly once
    /// per over-limit episode — on the tick `over_limit` first becomes
    /// true after having been false (or never evaluated).
    pub fn should_notify(&mut self, over_limit: bool) -> bool {
        if over_limit {
            if self.notified {
                false
            } else {
                self.notified = true;
                true
            }
        } else {
            self.notified = false;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_episode() {
        let mut flag = RateLimitedFlag::new();
        assert!(flag.should_notify(true));
        assert!(!flag.should_notify(true));
        assert!(!flag.should_notify(true));

        assert!(!flag.should_notify(false));
        assert!(flag.should_notify(true), "re-armed after falling under the limit");
    }
}
