// Simulation task: exclusive owner of one instance's state and its tick loop.

use serde_json::{Value, json};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::domain::{
    BroadcastMessage, Element, FaultPhase, GameInstance, GameState, InputEvent, InstanceId,
    InstanceStatus, InstanceStore, MessageBody, ModuleFault, ParticipantId, StateDescription,
    Topic,
};
use crate::use_cases::diagnostics::{EngineDiagnostics, LogThrottle, bump};
use crate::use_cases::gateway::{BroadcastGateway, now_epoch_millis};
use crate::use_cases::live::InputQueue;

/// Bounded retry for the single terminal store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalWritePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for FinalWritePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Collaborators shared by every task a supervisor launches.
#[derive(Clone)]
pub struct TaskContext {
    pub gateway: BroadcastGateway,
    pub store: Arc<dyn InstanceStore>,
    pub diagnostics: Arc<EngineDiagnostics>,
    pub final_write: FinalWritePolicy,
}

/// Reported to the supervisor when the loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskExit {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub ticks: u64,
}

pub struct SimulationTask {
    instance_id: InstanceId,
    participants: HashSet<ParticipantId>,
    tick_interval: Duration,
    broadcast_interval: Duration,
    state: Box<dyn GameState>,
    queue: Arc<InputQueue>,
    latest_tx: watch::Sender<StateDescription>,
    ctx: TaskContext,
    last_seq: HashMap<ParticipantId, u64>,
    last_timestamp_ms: u64,
    last_elements: Vec<Element>,
    discard_log: LogThrottle,
    ticks: u64,
}

impl SimulationTask {
    /// Binds an initialized module state to its instance.
    pub fn new(
        instance: &GameInstance,
        state: Box<dyn GameState>,
        queue: Arc<InputQueue>,
        latest_tx: watch::Sender<StateDescription>,
        ctx: TaskContext,
    ) -> Self {
        Self {
            instance_id: instance.id,
            participants: instance.participants.iter().copied().collect(),
            tick_interval: instance.definition.tick_interval,
            broadcast_interval: instance.definition.broadcast_interval,
            state,
            queue,
            latest_tx,
            ctx,
            last_seq: HashMap::new(),
            last_timestamp_ms: 0,
            last_elements: Vec::new(),
            discard_log: LogThrottle::default(),
            ticks: 0,
        }
    }

    /// Runs the tick loop until the module reports a terminal state or faults.
    pub async fn run(mut self) -> TaskExit {
        let started = Instant::now();
        // Boundaries are absolute; a late tick fires once and then realigns.
        let mut ticker = interval_at(started + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_broadcast = started;

        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            broadcast_ms = self.broadcast_interval.as_millis() as u64,
            "simulation started"
        );

        let status = loop {
            let boundary = ticker.tick().await;

            let description = match self.step() {
                Ok(description) => description,
                Err(fault) => {
                    error!(ticks = self.ticks, fault = %fault, "module fault; instance failed");
                    self.fail(fault).await;
                    break InstanceStatus::Error;
                }
            };
            self.latest_tx.send_replace(description.clone());

            if description.terminal {
                info!(
                    ticks = self.ticks,
                    status = %description.snapshot.status,
                    "simulation reached a terminal state"
                );
                match self.finish().await {
                    Ok(()) => break InstanceStatus::Ended,
                    Err(fault) => {
                        error!(fault = %fault, "final state export failed");
                        self.fail(fault).await;
                        break InstanceStatus::Error;
                    }
                }
            }

            // Cadence is measured between tick boundaries, not wake-up times.
            if boundary.duration_since(last_broadcast) >= self.broadcast_interval {
                self.broadcast(&description);
                last_broadcast = boundary;
            }
        };

        TaskExit {
            instance_id: self.instance_id,
            status,
            ticks: self.ticks,
        }
    }

    /// One tick: apply drained inputs, advance once, describe the result.
    fn step(&mut self) -> Result<StateDescription, ModuleFault> {
        let drained = self.queue.drain();
        let events = self.accept_inputs(drained);
        let state = &mut self.state;
        if !events.is_empty() {
            guarded(FaultPhase::HandleInput, || state.handle_input(&events))?;
        }

        let dt = self.tick_interval;
        guarded(FaultPhase::Tick, || state.tick(dt))?;
        self.ticks += 1;

        let state = &self.state;
        guarded(FaultPhase::DescribeState, || state.describe_state())
    }

    /// Filters a drained batch down to events the module should see.
    ///
    /// Stop requests always pass. Everything else must come from a listed
    /// participant and must not go backwards relative to what was applied
    /// on earlier ticks.
    fn accept_inputs(&mut self, events: Vec<InputEvent>) -> Vec<InputEvent> {
        let mut accepted = Vec::with_capacity(events.len());
        for event in events {
            if event.payload.is_stop() {
                accepted.push(event);
                continue;
            }

            if !self.participants.contains(&event.participant) {
                bump(&self.ctx.diagnostics.inputs_discarded_unknown_participant);
                if self.discard_log.ready() {
                    warn!(
                        participant = event.participant,
                        "input from unknown participant discarded"
                    );
                }
                continue;
            }

            let last = self.last_seq.entry(event.participant).or_insert(event.seq);
            if event.seq < *last {
                bump(&self.ctx.diagnostics.inputs_discarded_stale);
                debug!(
                    participant = event.participant,
                    seq = event.seq,
                    last_applied = *last,
                    "stale input discarded"
                );
                continue;
            }
            *last = event.seq;
            accepted.push(event);
        }
        accepted
    }

    fn broadcast(&mut self, description: &StateDescription) {
        let target = Topic::room(self.instance_id);
        let timestamp_ms = self.next_timestamp();
        self.ctx.gateway.publish(BroadcastMessage {
            target,
            body: MessageBody::GameState(description.snapshot.clone()),
            timestamp_ms,
        });

        if description.elements != self.last_elements {
            let timestamp_ms = self.next_timestamp();
            self.ctx.gateway.publish(BroadcastMessage {
                target,
                body: MessageBody::ElementsUpdate(description.elements.clone()),
                timestamp_ms,
            });
            self.last_elements = description.elements.clone();
        }
    }

    /// Wall-clock millis, bumped when needed so snapshots never share or
    /// reverse a timestamp.
    fn next_timestamp(&mut self) -> u64 {
        let timestamp = now_epoch_millis().max(self.last_timestamp_ms + 1);
        self.last_timestamp_ms = timestamp;
        timestamp
    }

    async fn finish(&mut self) -> Result<(), ModuleFault> {
        self.close_queue();
        let exported = guarded(FaultPhase::ExportState, || self.state.export_state())?;
        persist_final(
            self.ctx.store.as_ref(),
            &self.ctx.diagnostics,
            self.ctx.final_write,
            self.instance_id,
            exported,
            InstanceStatus::Ended,
        )
        .await;
        Ok(())
    }

    /// Records the fault together with whatever state the module can still export.
    async fn fail(&mut self, fault: ModuleFault) {
        self.close_queue();
        let partial = match guarded(FaultPhase::ExportState, || self.state.export_state()) {
            Ok(value) => value,
            Err(export_fault) => {
                warn!(fault = %export_fault, "partial state could not be exported");
                Value::Null
            }
        };
        let record = json!({
            "error": {
                "phase": fault.phase.as_str(),
                "message": fault.message,
                "ticks": self.ticks,
            },
            "state": partial,
        });
        persist_final(
            self.ctx.store.as_ref(),
            &self.ctx.diagnostics,
            self.ctx.final_write,
            self.instance_id,
            record,
            InstanceStatus::Error,
        )
        .await;
    }

    fn close_queue(&self) {
        let pending = self.queue.close();
        if pending > 0 {
            debug!(pending, "pending inputs dropped at shutdown");
        }
    }
}

/// Runs a module call, turning a panic into a fault of `phase`.
pub(crate) fn guarded<T>(
    phase: FaultPhase,
    call: impl FnOnce() -> Result<T, ModuleFault>,
) -> Result<T, ModuleFault> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(ModuleFault::new(
            phase,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Writes the terminal record, retrying per `policy`.
///
/// Returns false when every attempt failed; that loss is logged at error
/// level and counted.
pub(crate) async fn persist_final(
    store: &dyn InstanceStore,
    diagnostics: &EngineDiagnostics,
    policy: FinalWritePolicy,
    instance_id: InstanceId,
    state: Value,
    status: InstanceStatus,
) -> bool {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match store.write_final(instance_id, state.clone(), status).await {
            Ok(()) => {
                debug!(instance_id = %instance_id, %status, attempt, "final state written");
                return true;
            }
            Err(err) => {
                warn!(
                    instance_id = %instance_id,
                    %status,
                    attempt,
                    attempts,
                    error = %err,
                    "final state write failed"
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    bump(&diagnostics.final_writes_lost);
    error!(
        instance_id = %instance_id,
        %status,
        attempts,
        "final state lost: store rejected every write"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GameDefinition, InputPayload, TopicTransport};
    use crate::use_cases::live::PushOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Records every participant/seq pair it sees and counts ticks.
    #[derive(Default)]
    struct Scripted {
        applied: Arc<Mutex<Vec<(ParticipantId, u64)>>>,
        ticks: u32,
        end_after: Option<u32>,
        stopped: bool,
        panic_on_tick: Option<u32>,
    }

    impl GameState for Scripted {
        fn handle_input(&mut self, events: &[InputEvent]) -> Result<(), ModuleFault> {
            for event in events {
                if event.payload.is_stop() {
                    self.stopped = true;
                } else {
                    self.applied.lock().unwrap().push((event.participant, event.seq));
                }
            }
            Ok(())
        }

        fn tick(&mut self, _dt: Duration) -> Result<(), ModuleFault> {
            self.ticks += 1;
            if self.panic_on_tick == Some(self.ticks) {
                panic!("scripted state exploded");
            }
            Ok(())
        }

        fn describe_state(&self) -> Result<StateDescription, ModuleFault> {
            let mut description = StateDescription::default();
            description.snapshot.progress = self.ticks;
            description.terminal =
                self.stopped || self.end_after.is_some_and(|limit| self.ticks >= limit);
            Ok(description)
        }

        fn export_state(&self) -> Result<Value, ModuleFault> {
            Ok(json!({ "ticks": self.ticks }))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(InstanceStatus, Value)>>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl InstanceStore for RecordingStore {
        async fn find(&self, _status: InstanceStatus) -> Result<Vec<GameInstance>, String> {
            Ok(Vec::new())
        }

        async fn conditional_transition(
            &self,
            _id: InstanceId,
            _from: InstanceStatus,
            _to: InstanceStatus,
        ) -> Result<bool, String> {
            Ok(true)
        }

        async fn write_final(
            &self,
            _id: InstanceId,
            state: Value,
            status: InstanceStatus,
        ) -> Result<(), String> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err("store unavailable".to_string());
            }
            self.writes.lock().unwrap().push((status, state));
            Ok(())
        }

        async fn get(&self, _id: InstanceId) -> Result<Option<GameInstance>, String> {
            Ok(None)
        }

        async fn definition(&self, _id: &str) -> Result<Option<GameDefinition>, String> {
            Ok(None)
        }

        async fn create(&self, _instance: GameInstance) -> Result<(), String> {
            Ok(())
        }

        async fn update_settings(&self, _id: InstanceId, _settings: Value) -> Result<bool, String> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct NullTransport;

    impl TopicTransport for NullTransport {
        fn deliver(&self, _topic: &str, _message: &BroadcastMessage) -> Result<(), String> {
            Ok(())
        }
    }

    fn instance(participants: Vec<ParticipantId>) -> GameInstance {
        GameInstance::ready(
            GameDefinition {
                id: "Scripted".to_string(),
                module_id: "scripted".to_string(),
                max_participants: 4,
                tick_interval: Duration::from_millis(100),
                broadcast_interval: Duration::from_millis(1000),
                default_settings: json!({}),
            },
            participants,
            json!({}),
        )
    }

    fn task_for(
        instance: &GameInstance,
        scripted: Scripted,
        store: Arc<RecordingStore>,
    ) -> (SimulationTask, Arc<InputQueue>) {
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let ctx = TaskContext {
            gateway: BroadcastGateway::new(Arc::new(NullTransport), diagnostics.clone()),
            store,
            diagnostics,
            final_write: FinalWritePolicy {
                attempts: 2,
                backoff: Duration::from_millis(10),
            },
        };
        let queue = Arc::new(InputQueue::new(16));
        let (latest_tx, _latest_rx) = watch::channel(StateDescription::default());
        let task = SimulationTask::new(instance, Box::new(scripted), queue.clone(), latest_tx, ctx);
        (task, queue)
    }

    fn keys(instance_id: InstanceId, participant: ParticipantId, seq: u64) -> InputEvent {
        InputEvent {
            instance_id,
            participant,
            seq,
            payload: InputPayload::HeldKeys {
                keys: vec!["up".to_string()],
            },
        }
    }

    #[test]
    fn when_module_panics_then_guard_reports_a_fault_for_that_phase() {
        let result: Result<(), ModuleFault> = guarded(FaultPhase::Tick, || panic!("boom"));

        let fault = result.unwrap_err();
        assert_eq!(fault.phase, FaultPhase::Tick);
        assert!(fault.message.contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn when_module_reports_terminal_then_task_ends_and_writes_final_state() {
        let instance = instance(vec![1]);
        let store = Arc::new(RecordingStore::default());
        let scripted = Scripted {
            end_after: Some(5),
            ..Default::default()
        };
        let (task, queue) = task_for(&instance, scripted, store.clone());

        let exit = task.run().await;

        assert_eq!(exit.status, InstanceStatus::Ended);
        assert_eq!(exit.ticks, 5);
        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), &[(InstanceStatus::Ended, json!({"ticks": 5}))]);
        assert_eq!(queue.push(keys(instance.id, 1, 1)), PushOutcome::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn when_inputs_arrive_out_of_order_then_module_sees_sequence_order() {
        let instance = instance(vec![1, 2]);
        let applied = Arc::new(Mutex::new(Vec::new()));
        let scripted = Scripted {
            applied: applied.clone(),
            end_after: Some(3),
            ..Default::default()
        };
        let (task, queue) = task_for(&instance, scripted, Arc::new(RecordingStore::default()));

        queue.push(keys(instance.id, 1, 5));
        queue.push(keys(instance.id, 2, 1));
        queue.push(keys(instance.id, 1, 4));
        queue.push(keys(instance.id, 9, 1));
        task.run().await;

        assert_eq!(*applied.lock().unwrap(), vec![(1, 4), (1, 5), (2, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn when_tick_panics_then_partial_state_is_kept_in_the_error_record() {
        let instance = instance(vec![1]);
        let store = Arc::new(RecordingStore::default());
        let scripted = Scripted {
            panic_on_tick: Some(3),
            ..Default::default()
        };
        let (task, _queue) = task_for(&instance, scripted, store.clone());

        let exit = task.run().await;

        assert_eq!(exit.status, InstanceStatus::Error);
        let writes = store.writes.lock().unwrap();
        let (status, record) = &writes[0];
        assert_eq!(*status, InstanceStatus::Error);
        assert_eq!(record["error"]["phase"], "tick");
        assert_eq!(record["state"]["ticks"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn when_store_keeps_failing_then_final_write_is_reported_lost() {
        let store = RecordingStore {
            failures_left: AtomicU32::new(5),
            ..Default::default()
        };
        let diagnostics = EngineDiagnostics::default();
        let policy = FinalWritePolicy {
            attempts: 3,
            backoff: Duration::from_millis(50),
        };

        let written = persist_final(
            &store,
            &diagnostics,
            policy,
            Uuid::new_v4(),
            json!({}),
            InstanceStatus::Ended,
        )
        .await;

        assert!(!written);
        assert_eq!(diagnostics.snapshot().final_writes_lost, 1);
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn when_store_recovers_within_the_retry_budget_then_final_write_lands() {
        let store = RecordingStore {
            failures_left: AtomicU32::new(1),
            ..Default::default()
        };
        let diagnostics = EngineDiagnostics::default();

        let written = persist_final(
            &store,
            &diagnostics,
            FinalWritePolicy::default(),
            Uuid::new_v4(),
            json!({"done": true}),
            InstanceStatus::Ended,
        )
        .await;

        assert!(written);
        assert_eq!(store.writes.lock().unwrap().len(), 1);
        assert_eq!(diagnostics.snapshot().final_writes_lost, 0);
    }
}
