// Inbound pump: drains the transport's event stream into the input router.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::InputEvent;
use crate::use_cases::InputRouter;

/// Forwards every event from `inbound` to the router until the sender side
/// closes. Resolves to the number of events forwarded.
pub fn spawn_inbound_pump(
    mut inbound: mpsc::Receiver<InputEvent>,
    router: Arc<InputRouter>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut forwarded = 0u64;
        while let Some(event) = inbound.recv().await {
            let outcome = router.route(event).await;
            debug!(?outcome, "inbound event routed");
            forwarded += 1;
        }
        info!(forwarded, "inbound stream closed");
        forwarded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InputPayload;
    use crate::use_cases::{EngineDiagnostics, LiveInstances};
    use uuid::Uuid;

    #[tokio::test]
    async fn when_sender_closes_then_pump_reports_forwarded_count() {
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let router = Arc::new(InputRouter::new(
            Arc::new(LiveInstances::new()),
            diagnostics.clone(),
        ));
        let (tx, rx) = mpsc::channel(4);
        let pump = spawn_inbound_pump(rx, router);

        for seq in 0..3 {
            tx.send(InputEvent {
                instance_id: Uuid::new_v4(),
                participant: 1,
                seq,
                payload: InputPayload::Pointer { x: 0.0, y: 0.0 },
            })
            .await
            .unwrap();
        }
        drop(tx);

        assert_eq!(pump.await.unwrap(), 3);
        assert_eq!(diagnostics.snapshot().inputs_discarded_no_task, 3);
    }
}
