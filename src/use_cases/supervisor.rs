// Supervisor: discovers ready instances, claims them, and runs their tasks.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{
    EngineError, FaultPhase, GameInstance, GameState, InstanceId, InstanceStatus, InstanceStore,
    StateDescription, TopicTransport,
};
use crate::use_cases::diagnostics::{DiagnosticsSnapshot, EngineDiagnostics, bump};
use crate::use_cases::gateway::BroadcastGateway;
use crate::use_cases::live::{InputQueue, InstanceHandle, LiveInstances};
use crate::use_cases::management::{announce_room_updated, announce_settings_changed};
use crate::use_cases::registry::GameModuleRegistry;
use crate::use_cases::router::InputRouter;
use crate::use_cases::simulation::{
    FinalWritePolicy, SimulationTask, TaskContext, TaskExit, guarded, panic_message,
    persist_final,
};

/// Tunables for discovery and the tasks it launches.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Delay between discovery passes.
    pub poll_interval: Duration,
    /// Upper bound on live tasks; `None` means unbounded.
    pub max_concurrent: Option<usize>,
    /// Per-instance input queue bound.
    pub input_queue_capacity: usize,
    pub final_write: FinalWritePolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_concurrent: None,
            input_queue_capacity: 256,
            final_write: FinalWritePolicy::default(),
        }
    }
}

struct DiscoveryLoop {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Owns the live-instance table; the router and gateway get handles to it.
pub struct Supervisor {
    settings: SupervisorSettings,
    store: Arc<dyn InstanceStore>,
    registry: GameModuleRegistry,
    live: Arc<LiveInstances>,
    router: Arc<InputRouter>,
    gateway: BroadcastGateway,
    diagnostics: Arc<EngineDiagnostics>,
    discovery: Mutex<Option<DiscoveryLoop>>,
    // Serializes passes so the concurrency bound is checked against a settled table.
    pass_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        store: Arc<dyn InstanceStore>,
        registry: GameModuleRegistry,
        transport: Arc<dyn TopicTransport>,
    ) -> Arc<Self> {
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let live = Arc::new(LiveInstances::new());
        let router = Arc::new(InputRouter::new(live.clone(), diagnostics.clone()));
        let gateway = BroadcastGateway::new(transport, diagnostics.clone());

        Arc::new(Self {
            settings,
            store,
            registry,
            live,
            router,
            gateway,
            diagnostics,
            discovery: Mutex::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn router(&self) -> Arc<InputRouter> {
        self.router.clone()
    }

    pub fn gateway(&self) -> BroadcastGateway {
        self.gateway.clone()
    }

    pub fn store(&self) -> Arc<dyn InstanceStore> {
        self.store.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub async fn live_count(&self) -> usize {
        self.live.len().await
    }

    /// Latest state description published by a live task.
    pub async fn describe(&self, instance_id: InstanceId) -> Option<StateDescription> {
        let handle = self.live.get(&instance_id).await?;
        let latest = handle.latest.borrow().clone();
        Some(latest)
    }

    /// Starts the polling discovery loop. Returns false if it already runs.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut discovery = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if discovery.is_some() {
            return false;
        }

        let shutdown = Arc::new(Notify::new());
        let supervisor = Arc::clone(self);
        let stop_signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_signal.notified() => break,
                    _ = ticker.tick() => {
                        supervisor.discover_pass().await;
                    }
                }
            }
            debug!("discovery loop exited");
        });

        info!(
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            max_concurrent = ?self.settings.max_concurrent,
            "discovery started"
        );
        *discovery = Some(DiscoveryLoop { shutdown, handle });
        true
    }

    /// Stops discovery after the pass in flight. Live tasks keep running.
    pub async fn stop(&self) -> bool {
        let running = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(discovery) = running else {
            return false;
        };

        discovery.shutdown.notify_one();
        if let Err(err) = discovery.handle.await {
            warn!(error = %err, "discovery loop did not exit cleanly");
        }
        info!("discovery stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// One discovery pass: claim and launch ready instances in store order
    /// until the concurrency bound is hit. Returns the number launched.
    pub async fn discover_pass(&self) -> usize {
        let _pass = self.pass_lock.lock().await;

        let ready = match self.store.find(InstanceStatus::Ready).await {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "discovery query failed");
                return 0;
            }
        };

        let mut launched = 0;
        for instance in ready {
            if !self.has_free_slot().await {
                debug!("concurrency bound reached; remaining instances stay ready");
                break;
            }
            if self.live.contains(&instance.id).await || !self.claim(&instance).await {
                continue;
            }
            if self.launch(instance).await.is_ok() {
                launched += 1;
            }
        }
        launched
    }

    async fn has_free_slot(&self) -> bool {
        match self.settings.max_concurrent {
            Some(max) => self.live.len().await < max,
            None => true,
        }
    }

    /// Atomic `ready -> starting`; losing the race or a store error both
    /// leave the instance to whoever else holds it, or to the next pass.
    pub async fn claim(&self, instance: &GameInstance) -> bool {
        match self
            .store
            .conditional_transition(instance.id, InstanceStatus::Ready, InstanceStatus::Starting)
            .await
        {
            Ok(true) => {
                debug!(instance_id = %instance.id, "instance claimed");
                true
            }
            Ok(false) => {
                bump(&self.diagnostics.claims_lost);
                debug!(instance_id = %instance.id, "claim lost to another owner");
                false
            }
            Err(err) => {
                warn!(instance_id = %instance.id, error = %err, "claim failed; will retry");
                false
            }
        }
    }

    /// Initializes a claimed instance and spawns its task. Any failure marks
    /// the instance `error` and is never retried.
    pub async fn launch(&self, instance: GameInstance) -> Result<(), EngineError> {
        let instance_id = instance.id;
        let module_id = instance.definition.module_id.clone();

        let (state, settings) = match self.prepare(&instance) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.mark_failed(instance_id, &err).await;
                return Err(err);
            }
        };

        match self
            .store
            .conditional_transition(instance_id, InstanceStatus::Starting, InstanceStatus::Ongoing)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(instance_id = %instance_id, "instance left starting before launch; skipped");
                return Err(EngineError::InstanceNotReady(instance_id));
            }
            Err(err) => {
                let err = EngineError::StoreFailure(err);
                self.mark_failed(instance_id, &err).await;
                return Err(err);
            }
        }

        let queue = Arc::new(InputQueue::new(self.settings.input_queue_capacity));
        let (latest_tx, latest) = watch::channel(StateDescription::default());
        self.live
            .insert(InstanceHandle {
                instance_id,
                module_id: Arc::from(module_id.as_str()),
                queue: queue.clone(),
                latest,
            })
            .await;

        announce_settings_changed(&self.gateway, instance_id, settings, None);
        announce_room_updated(&self.gateway, instance_id, &instance.participants);

        let task = SimulationTask::new(&instance, state, queue, latest_tx, self.task_context());
        let span = info_span!("instance", instance_id = %instance_id, module_id = %module_id);
        let join = tokio::spawn(task.run().instrument(span));
        tokio::spawn(monitor(
            join,
            instance_id,
            self.live.clone(),
            self.task_context(),
        ));

        bump(&self.diagnostics.instances_launched);
        info!(
            instance_id = %instance_id,
            module_id = %module_id,
            participants = instance.participants.len(),
            "instance launched"
        );
        Ok(())
    }

    fn prepare(
        &self,
        instance: &GameInstance,
    ) -> Result<(Box<dyn GameState>, Value), EngineError> {
        let module = self.registry.resolve(&instance.definition.module_id)?;
        let settings = instance.effective_settings()?;
        if instance.definition.tick_interval.is_zero() {
            return Err(EngineError::ConfigMalformedSettings(format!(
                "definition {} has a zero tick interval",
                instance.definition.id
            )));
        }

        let state = guarded(FaultPhase::Initialize, || {
            module.initialize(&settings, &instance.participants)
        })?;
        Ok((state, settings))
    }

    async fn mark_failed(&self, instance_id: InstanceId, err: &EngineError) {
        bump(&self.diagnostics.instances_failed);
        error!(instance_id = %instance_id, error = %err, "instance launch failed");
        persist_final(
            self.store.as_ref(),
            &self.diagnostics,
            self.settings.final_write,
            instance_id,
            json!({ "error": { "message": err.to_string() } }),
            InstanceStatus::Error,
        )
        .await;
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            diagnostics: self.diagnostics.clone(),
            final_write: self.settings.final_write,
        }
    }
}

/// Waits for one task, frees its slot, and absorbs anything that escaped it.
async fn monitor(
    join: JoinHandle<TaskExit>,
    instance_id: InstanceId,
    live: Arc<LiveInstances>,
    ctx: TaskContext,
) {
    let outcome = join.await;
    if let Some(handle) = live.remove(&instance_id).await {
        handle.queue.close();
    }

    match outcome {
        Ok(exit) if exit.status == InstanceStatus::Ended => {
            bump(&ctx.diagnostics.instances_ended);
            info!(instance_id = %instance_id, ticks = exit.ticks, "instance ended");
        }
        Ok(exit) => {
            bump(&ctx.diagnostics.instances_failed);
            warn!(
                instance_id = %instance_id,
                ticks = exit.ticks,
                status = %exit.status,
                "instance failed"
            );
        }
        Err(err) => escaped(instance_id, err, &ctx).await,
    }
}

async fn escaped(instance_id: InstanceId, err: JoinError, ctx: &TaskContext) {
    bump(&ctx.diagnostics.instances_failed);
    let message = if err.is_panic() {
        let payload = err.into_panic();
        format!("task panicked: {}", panic_message(payload.as_ref()))
    } else {
        "task cancelled".to_string()
    };
    error!(instance_id = %instance_id, error = %message, "simulation task escaped");
    persist_final(
        ctx.store.as_ref(),
        &ctx.diagnostics,
        ctx.final_write,
        instance_id,
        json!({ "error": { "message": message } }),
        InstanceStatus::Error,
    )
    .await;
}
