use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::InputEvent;
use crate::interface_adapters::topic_hub::TopicHub;
use crate::use_cases::Supervisor;

#[derive(Clone)]
pub struct AppState {
    // Engine entry point: discovery, live table, router, gateway.
    pub supervisor: Arc<Supervisor>,
    // Outbound topics that transport connections subscribe to.
    pub topics: Arc<TopicHub>,
    // Inbound event stream feeding the router.
    pub inbound_tx: mpsc::Sender<InputEvent>,
}
