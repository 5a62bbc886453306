// Shared harness for engine and HTTP integration tests.
#![allow(dead_code)]

use game_engine::domain::{
    BroadcastMessage, Element, FaultPhase, GameDefinition, GameInstance, GameModule, GameState,
    InputEvent, InstanceId, InstanceStore, ModuleFault, ParticipantId, Position, Settings,
    StateDescription, TopicTransport,
};
use game_engine::interface_adapters::store::InMemoryInstanceStore;
use game_engine::use_cases::{GameModuleRegistry, Supervisor, SupervisorSettings};
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

pub const SCRIPTED_MODULE_ID: &str = "scripted";

// Test module driven entirely by its settings:
// `end_after_ticks`, `fault_on_tick`, `panic_on_tick`, `fail_initialize`,
// and `stall_on_tick` with `stall_ms` to block the runtime inside one tick.
pub struct ScriptedModule;

impl GameModule for ScriptedModule {
    fn module_id(&self) -> &'static str {
        SCRIPTED_MODULE_ID
    }

    fn initialize(
        &self,
        settings: &Settings,
        _participants: &[ParticipantId],
    ) -> Result<Box<dyn GameState>, ModuleFault> {
        if settings.get("fail_initialize").and_then(Value::as_bool) == Some(true) {
            return Err(ModuleFault::new(
                FaultPhase::Initialize,
                "scripted module refused to start",
            ));
        }
        let read = |key: &str| settings.get(key).and_then(Value::as_u64);
        Ok(Box::new(ScriptedState {
            ticks: 0,
            applied: Vec::new(),
            stopped: false,
            end_after: read("end_after_ticks"),
            fault_on: read("fault_on_tick"),
            panic_on: read("panic_on_tick"),
            stall_on: read("stall_on_tick"),
            stall: Duration::from_millis(read("stall_ms").unwrap_or(0)),
        }))
    }
}

struct ScriptedState {
    ticks: u64,
    applied: Vec<(ParticipantId, u64)>,
    stopped: bool,
    end_after: Option<u64>,
    fault_on: Option<u64>,
    panic_on: Option<u64>,
    stall_on: Option<u64>,
    stall: Duration,
}

impl GameState for ScriptedState {
    fn handle_input(&mut self, events: &[InputEvent]) -> Result<(), ModuleFault> {
        for event in events {
            if event.payload.is_stop() {
                self.stopped = true;
            } else {
                self.applied.push((event.participant, event.seq));
            }
        }
        Ok(())
    }

    fn tick(&mut self, _dt: Duration) -> Result<(), ModuleFault> {
        self.ticks += 1;
        if self.fault_on == Some(self.ticks) {
            return Err(ModuleFault::new(FaultPhase::Tick, "scripted fault"));
        }
        if self.panic_on == Some(self.ticks) {
            panic!("scripted panic at tick {}", self.ticks);
        }
        if self.stall_on == Some(self.ticks) {
            std::thread::sleep(self.stall);
        }
        Ok(())
    }

    fn describe_state(&self) -> Result<StateDescription, ModuleFault> {
        let mut description = StateDescription::default();
        description.snapshot.status = if self.stopped { "stopped" } else { "running" }.to_string();
        description.snapshot.progress = self.ticks as u32;
        description
            .snapshot
            .resources
            .insert("applied".to_string(), self.applied.len() as i64);
        description.elements = vec![Element {
            id: "marker".to_string(),
            kind: "marker".to_string(),
            position: Position::default(),
            state: "idle".to_string(),
            properties: json!({}),
        }];
        description.terminal =
            self.stopped || self.end_after.is_some_and(|limit| self.ticks >= limit);
        Ok(description)
    }

    fn export_state(&self) -> Result<Value, ModuleFault> {
        Ok(json!({
            "ticks": self.ticks,
            "applied": self.applied,
            "stopped": self.stopped,
        }))
    }
}

pub fn scripted_definition(tick_ms: u64, broadcast_ms: u64) -> GameDefinition {
    GameDefinition {
        id: format!("Scripted{tick_ms}x{broadcast_ms}"),
        module_id: SCRIPTED_MODULE_ID.to_string(),
        max_participants: 4,
        tick_interval: Duration::from_millis(tick_ms),
        broadcast_interval: Duration::from_millis(broadcast_ms),
        default_settings: json!({}),
    }
}

// One delivered message and the (possibly paused) clock reading at delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub message: BroadcastMessage,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingTransport {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn of_kind(&self, topic: &str, kind: &str) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.topic == topic && d.message.body.kind() == kind)
            .collect()
    }
}

impl TopicTransport for RecordingTransport {
    fn deliver(&self, topic: &str, message: &BroadcastMessage) -> Result<(), String> {
        self.deliveries.lock().unwrap().push(Delivery {
            topic: topic.to_string(),
            message: message.clone(),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryInstanceStore>,
    pub transport: Arc<RecordingTransport>,
    pub supervisor: Arc<Supervisor>,
}

pub fn registry() -> GameModuleRegistry {
    let mut registry = GameModuleRegistry::with_builtin();
    registry.register(Arc::new(ScriptedModule));
    registry
}

pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        poll_interval: Duration::from_millis(50),
        ..SupervisorSettings::default()
    }
}

impl Harness {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self::with_store(Arc::new(InMemoryInstanceStore::new()), settings)
    }

    pub fn with_store(store: Arc<InMemoryInstanceStore>, settings: SupervisorSettings) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let supervisor = Supervisor::new(settings, store.clone(), registry(), transport.clone());
        Self {
            store,
            transport,
            supervisor,
        }
    }

    // Second supervisor over the same store, as a competing process would be.
    pub fn rival(&self) -> Arc<Supervisor> {
        Supervisor::new(
            fast_settings(),
            self.store.clone(),
            registry(),
            self.transport.clone(),
        )
    }

    pub async fn ready(
        &self,
        definition: GameDefinition,
        participants: Vec<ParticipantId>,
        settings: Value,
    ) -> InstanceId {
        let instance = GameInstance::ready(definition, participants, settings);
        let id = instance.id;
        self.store.create(instance).await.expect("create instance");
        id
    }

    pub async fn record(&self, id: InstanceId) -> GameInstance {
        self.store
            .get(id)
            .await
            .expect("store read")
            .expect("instance exists")
    }
}

// Global base URL used by all tests after the server publishes its bound address.
static SERVER_URL: OnceLock<String> = OnceLock::new();
// One-time guard that ensures the server bootstrap path runs only once.
static SERVER_READY: OnceLock<()> = OnceLock::new();

// Ensure the test server is running and return the shared base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // The server outlives individual `#[tokio::test]` runtimes on its own thread.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("http://{}", addr));
                game_engine::run(listener).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");

    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}
