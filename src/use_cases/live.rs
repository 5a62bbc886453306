// Live-instance table shared by the supervisor and the input router.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, watch};

use crate::domain::{InputEvent, InstanceId, StateDescription};

/// Result of offering an event to an instance queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued, but the oldest pending event was dropped to make room.
    QueuedDroppedOldest,
    /// The owning task has finished; the event was discarded.
    Closed,
}

#[derive(Debug)]
struct QueueInner {
    events: VecDeque<InputEvent>,
    // Pending stop request; held apart so overflow eviction never drops it.
    stop: Option<InputEvent>,
    closed: bool,
}

/// Bounded per-instance input buffer, drained once per tick.
///
/// Overflow drops the oldest event: most games only care about the latest
/// input state of each participant. A stop request sits outside the bound
/// and is always delivered by the next drain.
#[derive(Debug)]
pub struct InputQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity.max(1)),
                stop: None,
                closed: false,
            }),
        }
    }

    pub fn push(&self, event: InputEvent) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return PushOutcome::Closed;
        }

        if event.payload.is_stop() {
            if inner.stop.is_none() {
                inner.stop = Some(event);
            }
            return PushOutcome::Queued;
        }

        let mut outcome = PushOutcome::Queued;
        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
            outcome = PushOutcome::QueuedDroppedOldest;
        }
        inner.events.push_back(event);
        outcome
    }

    /// Takes every pending event, ordered by (participant, seq).
    ///
    /// The sort is stable, so equal keys keep their arrival order.
    pub fn drain(&self) -> Vec<InputEvent> {
        let mut events: Vec<InputEvent> = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let stop = inner.stop.take();
            inner.events.drain(..).chain(stop).collect()
        };
        events.sort_by_key(|event| (event.participant, event.seq));
        events
    }

    /// Rejects all further events and drops anything still pending.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        let pending = inner.events.len() + usize::from(inner.stop.is_some());
        inner.events.clear();
        inner.stop = None;
        pending
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.events.len() + usize::from(inner.stop.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-instance access handle for everything outside the simulation task.
#[derive(Clone)]
pub struct InstanceHandle {
    pub instance_id: InstanceId,
    pub module_id: Arc<str>,
    /// Inputs flowing from the router into the task.
    pub queue: Arc<InputQueue>,
    /// Latest state description published by the task after each tick.
    pub latest: watch::Receiver<StateDescription>,
}

/// Map of instance id to the handle of its running task.
#[derive(Default)]
pub struct LiveInstances {
    handles: RwLock<HashMap<InstanceId, InstanceHandle>>,
}

impl LiveInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle; returns false if the instance is already live.
    pub async fn insert(&self, handle: InstanceHandle) -> bool {
        let mut handles = self.handles.write().await;
        if handles.contains_key(&handle.instance_id) {
            return false;
        }
        handles.insert(handle.instance_id, handle);
        true
    }

    pub async fn remove(&self, instance_id: &InstanceId) -> Option<InstanceHandle> {
        let mut handles = self.handles.write().await;
        handles.remove(instance_id)
    }

    pub async fn get(&self, instance_id: &InstanceId) -> Option<InstanceHandle> {
        let handles = self.handles.read().await;
        handles.get(instance_id).cloned()
    }

    pub async fn contains(&self, instance_id: &InstanceId) -> bool {
        let handles = self.handles.read().await;
        handles.contains_key(instance_id)
    }

    pub async fn len(&self) -> usize {
        let handles = self.handles.read().await;
        handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<InstanceId> {
        let handles = self.handles.read().await;
        handles.keys().copied().collect()
    }
}
