//! Write-once cancellation signal shared between the temperature monitor and
//! the batch processor.
//!
//! The monitor is the only writer. Readers poll with `observe()`; nothing ever
//! blocks on the signal.

use std::sync::{Arc, OnceLock};

/// Current state of a `CancellationSignal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalState {
    Active,
    Cancelled(String),
}

impl SignalState {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SignalState::Cancelled(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SignalState::Active => None,
            SignalState::Cancelled(reason) => Some(reason),
        }
    }
}

/// Cloneable handle to one run's cancellation state.
///
/// Transitions `Active -> Cancelled(reason)` at most once and never resets.
/// The first `trigger` wins, later calls leave the stored reason untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    reason: Arc<OnceLock<String>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking read of the current state.
    pub fn observe(&self) -> SignalState {
        match self.reason.get() {
            Some(reason) => SignalState::Cancelled(reason.clone()),
            None => SignalState::Active,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Request cancellation. Returns `true` only for the call that performed
    /// the transition.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        self.reason.set(reason.into()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_active() {
        let signal = CancellationSignal::new();
        assert_eq!(signal.observe(), SignalState::Active);
        assert!(!signal.is_cancelled());
        assert_eq!(signal.observe().reason(), None);
    }

    #[test]
    fn test_trigger_transitions_once() {
        let signal = CancellationSignal::new();
        assert!(signal.trigger("CPU limit exceeded: 92.3 > 80.0"));
        assert!(signal.is_cancelled());
        assert_eq!(
            signal.observe(),
            SignalState::Cancelled("CPU limit exceeded: 92.3 > 80.0".to_string())
        );
    }

    #[test]
    fn test_second_trigger_keeps_first_reason() {
        let signal = CancellationSignal::new();
        assert!(signal.trigger("first"));
        assert!(!signal.trigger("second"));
        assert!(!signal.trigger("third"));
        assert_eq!(signal.observe().reason(), Some("first"));
    }

    #[test]
    fn test_clones_share_state() {
        let writer = CancellationSignal::new();
        let reader = writer.clone();
        assert!(!reader.is_cancelled());

        writer.trigger("GPU limit exceeded: 90.0 > 85.0");
        assert_eq!(reader.observe().reason(), Some("GPU limit exceeded: 90.0 > 85.0"));
    }

    #[test]
    fn test_concurrent_triggers_have_one_winner() {
        let signal = CancellationSignal::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let signal = signal.clone();
                std::thread::spawn(move || signal.trigger(format!("writer {}", i)))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(signal.observe().reason().unwrap().starts_with("writer "));
    }
}
