//! Process-wide connection lifecycle counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the listener and every session task.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    accept_errors: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub accept_errors: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection was accepted and its session is about to start.
    pub fn session_started(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// A session reached its terminal state.
    pub fn session_finished(&self, clean: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if clean {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle_counts() {
        let stats = ServerStats::new();
        stats.session_started();
        stats.session_started();
        stats.record_accept_error();

        assert_eq!(stats.snapshot().active, 2);

        stats.session_finished(true);
        stats.session_finished(false);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                accepted: 2,
                accept_errors: 1,
                active: 0,
                completed: 1,
                failed: 1,
            }
        );
    }
}
