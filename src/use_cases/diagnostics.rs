// Engine-wide counters and log throttling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const LOG_THROTTLE: Duration = Duration::from_secs(2);

/// Exact totals for events that are only logged occasionally.
#[derive(Debug, Default)]
pub struct EngineDiagnostics {
    pub inputs_queued: AtomicU64,
    pub inputs_dropped_overflow: AtomicU64,
    pub inputs_discarded_no_task: AtomicU64,
    pub inputs_discarded_unknown_participant: AtomicU64,
    pub inputs_discarded_stale: AtomicU64,
    pub broadcasts_delivered: AtomicU64,
    pub broadcasts_dropped: AtomicU64,
    pub claims_lost: AtomicU64,
    pub instances_launched: AtomicU64,
    pub instances_ended: AtomicU64,
    pub instances_failed: AtomicU64,
    pub final_writes_lost: AtomicU64,
}

/// Point-in-time copy of [`EngineDiagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsSnapshot {
    pub inputs_queued: u64,
    pub inputs_dropped_overflow: u64,
    pub inputs_discarded_no_task: u64,
    pub inputs_discarded_unknown_participant: u64,
    pub inputs_discarded_stale: u64,
    pub broadcasts_delivered: u64,
    pub broadcasts_dropped: u64,
    pub claims_lost: u64,
    pub instances_launched: u64,
    pub instances_ended: u64,
    pub instances_failed: u64,
    pub final_writes_lost: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            inputs_queued: read(&self.inputs_queued),
            inputs_dropped_overflow: read(&self.inputs_dropped_overflow),
            inputs_discarded_no_task: read(&self.inputs_discarded_no_task),
            inputs_discarded_unknown_participant: read(&self.inputs_discarded_unknown_participant),
            inputs_discarded_stale: read(&self.inputs_discarded_stale),
            broadcasts_delivered: read(&self.broadcasts_delivered),
            broadcasts_dropped: read(&self.broadcasts_dropped),
            claims_lost: read(&self.claims_lost),
            instances_launched: read(&self.instances_launched),
            instances_ended: read(&self.instances_ended),
            instances_failed: read(&self.instances_failed),
            final_writes_lost: read(&self.final_writes_lost),
        }
    }
}

/// Lets a log line through at most once per `every`.
#[derive(Debug)]
pub struct LogThrottle {
    every: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last: Mutex::new(None),
        }
    }

    pub fn ready(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if at.elapsed() < self.every => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(LOG_THROTTLE)
    }
}
