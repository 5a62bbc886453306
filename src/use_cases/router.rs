// Input router: forwards inbound events to the queue of the owning task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::domain::{InputEvent, InstanceId, ParticipantId};
use crate::use_cases::diagnostics::{EngineDiagnostics, LogThrottle, bump};
use crate::use_cases::live::{LiveInstances, PushOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Queued,
    /// Queued after evicting the oldest pending event of that instance.
    QueuedDroppedOldest,
    /// No live task owns the instance (not started yet, or already finished).
    Discarded,
}

impl RouteOutcome {
    pub fn accepted(self) -> bool {
        !matches!(self, RouteOutcome::Discarded)
    }
}

/// Routes events by instance id using the supervisor's live table.
///
/// Events for instances without a live task are never parked, so a late or
/// early event cannot grow any buffer.
pub struct InputRouter {
    live: Arc<LiveInstances>,
    diagnostics: Arc<EngineDiagnostics>,
    discard_log: LogThrottle,
    overflow_log: LogThrottle,
    admin_seq: AtomicU64,
}

impl InputRouter {
    pub fn new(live: Arc<LiveInstances>, diagnostics: Arc<EngineDiagnostics>) -> Self {
        Self {
            live,
            diagnostics,
            discard_log: LogThrottle::default(),
            overflow_log: LogThrottle::default(),
            admin_seq: AtomicU64::new(1),
        }
    }

    pub async fn route(&self, event: InputEvent) -> RouteOutcome {
        let (instance_id, participant) = (event.instance_id, event.participant);
        let Some(handle) = self.live.get(&instance_id).await else {
            return self.discard(instance_id, participant);
        };

        match handle.queue.push(event) {
            PushOutcome::Queued => {
                bump(&self.diagnostics.inputs_queued);
                RouteOutcome::Queued
            }
            PushOutcome::QueuedDroppedOldest => {
                bump(&self.diagnostics.inputs_queued);
                bump(&self.diagnostics.inputs_dropped_overflow);
                if self.overflow_log.ready() {
                    warn!(instance_id = %instance_id, "input queue full; dropped oldest event");
                }
                RouteOutcome::QueuedDroppedOldest
            }
            // The task closed its queue between lookup and push.
            PushOutcome::Closed => self.discard(instance_id, participant),
        }
    }

    /// Queues an administrative stop for `instance_id`.
    ///
    /// Stop travels through the ordinary input stream so the task sees it at
    /// a tick boundary like any other event.
    pub async fn request_stop(&self, instance_id: InstanceId) -> RouteOutcome {
        let seq = self.admin_seq.fetch_add(1, Ordering::Relaxed);
        let outcome = self.route(InputEvent::stop(instance_id, seq)).await;
        debug!(instance_id = %instance_id, ?outcome, "stop requested");
        outcome
    }

    fn discard(&self, instance_id: InstanceId, participant: ParticipantId) -> RouteOutcome {
        bump(&self.diagnostics.inputs_discarded_no_task);
        if self.discard_log.ready() {
            debug!(
                instance_id = %instance_id,
                participant,
                "input discarded: no live task for instance"
            );
        }
        RouteOutcome::Discarded
    }
}
