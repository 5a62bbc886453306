use axum::{
    Json,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::domain::{InputEvent, InstanceId, ParticipantId, Topic, topic_name};
use crate::interface_adapters::protocol::{ErrorResponse, InputEventDto};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::topic_hub::TopicHub;

const LOG_THROTTLE: Duration = Duration::from_secs(2);
// Frames buffered between the topic forwarders and the socket writer.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, serde::Deserialize)]
pub struct ConnectQuery {
    // Instance whose room and waiting area the client follows.
    instance_id: String,
    // Present for participants; spectators connect without one and cannot send input.
    #[serde(default)]
    participant_id: Option<ParticipantId>,
}

enum LoopControl {
    Continue,
    Disconnect,
}

struct ConnCtx {
    instance_id: InstanceId,
    participant: Option<ParticipantId>,
    inbound_tx: mpsc::Sender<InputEvent>,
    close_frame: Option<CloseFrame>,
    frames_in: u64,
    frames_out: u64,
    rejected: u64,
    last_reject_log: Option<Instant>,
}

fn not_found(error: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let Ok(instance_id) = Uuid::parse_str(&query.instance_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid instance id".to_string(),
            }),
        )
            .into_response();
    };

    match state.supervisor.store().get(instance_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("instance not found"),
        Err(err) => {
            warn!(instance_id = %instance_id, error = %err, "instance lookup failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "instance store unavailable".to_string(),
                }),
            )
                .into_response();
        }
    }

    let ctx = ConnCtx {
        instance_id,
        participant: query.participant_id,
        inbound_tx: state.inbound_tx.clone(),
        close_frame: None,
        frames_in: 0,
        frames_out: 0,
        rejected: 0,
        last_reject_log: None,
    };
    let topics = state.topics.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, topics, ctx))
}

async fn handle_socket(socket: WebSocket, topics: Arc<TopicHub>, mut ctx: ConnCtx) {
    let span = info_span!(
        "conn",
        instance_id = %ctx.instance_id,
        participant = ?ctx.participant
    );

    async move {
        let mut subscriptions = vec![
            Topic::room(ctx.instance_id),
            Topic::waiting_area(ctx.instance_id),
        ];
        if let Some(participant) = ctx.participant {
            subscriptions.push(Topic::participant(ctx.instance_id, participant));
        }

        // One forwarder per topic funnels pre-serialized frames into a single queue.
        let (out_tx, mut out_rx) = mpsc::channel::<Utf8Bytes>(OUTBOUND_BUFFER);
        let forwarders: Vec<JoinHandle<()>> = subscriptions
            .iter()
            .map(|topic| {
                let rx = topics.subscribe(&topic_name(topic));
                tokio::spawn(forward_topic(rx, out_tx.clone()))
            })
            .collect();
        drop(out_tx);

        info!(topics = forwarders.len(), "client connected");

        let (mut sender, mut receiver) = socket.split();
        loop {
            let control = tokio::select! {
                incoming = receiver.next() => handle_incoming(incoming, &mut ctx).await,
                outbound = out_rx.recv() => match outbound {
                    Some(frame) => forward_frame(&mut sender, frame, &mut ctx).await,
                    None => LoopControl::Disconnect,
                },
            };
            if let LoopControl::Disconnect = control {
                break;
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        if let Some(frame) = ctx.close_frame.take() {
            let _ = sender.send(Message::Close(Some(frame))).await;
        }
        if let Err(err) = sender.close().await {
            debug!(error = %err, "socket close error");
        }

        info!(
            frames_in = ctx.frames_in,
            frames_out = ctx.frames_out,
            rejected = ctx.rejected,
            "client disconnected"
        );
    }
    .instrument(span)
    .await
}

async fn forward_topic(mut rx: broadcast::Receiver<Utf8Bytes>, out: mpsc::Sender<Utf8Bytes>) {
    loop {
        match rx.recv().await {
            Ok(frame) => {
                if out.send(frame).await.is_err() {
                    break;
                }
            }
            // Lagging subscribers skip to the newest frames.
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "subscriber lagged; skipping to newer messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: Utf8Bytes,
    ctx: &mut ConnCtx,
) -> LoopControl {
    match sender.send(Message::Text(frame)).await {
        Ok(()) => {
            ctx.frames_out += 1;
            LoopControl::Continue
        }
        Err(err) => {
            warn!(error = %err, "failed to send frame");
            LoopControl::Disconnect
        }
    }
}

async fn handle_incoming(
    incoming: Option<Result<Message, axum::Error>>,
    ctx: &mut ConnCtx,
) -> LoopControl {
    let message = match incoming {
        Some(Ok(message)) => message,
        Some(Err(err)) => {
            warn!(error = %err, "websocket recv error");
            return LoopControl::Disconnect;
        }
        None => return LoopControl::Disconnect,
    };

    match message {
        Message::Text(text) => {
            ctx.frames_in += 1;
            match parse_input(text.as_str(), ctx) {
                Ok(event) => {
                    if ctx.inbound_tx.send(event).await.is_err() {
                        warn!("inbound stream closed; disconnecting");
                        ctx.close_frame = Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "engine shutting down".into(),
                        });
                        return LoopControl::Disconnect;
                    }
                }
                Err(reason) => {
                    ctx.rejected += 1;
                    let now = Instant::now();
                    if ctx
                        .last_reject_log
                        .is_none_or(|last| now.duration_since(last) >= LOG_THROTTLE)
                    {
                        ctx.last_reject_log = Some(now);
                        warn!(reason = %reason, rejected = ctx.rejected, "input frame rejected");
                    }
                }
            }
            LoopControl::Continue
        }
        Message::Binary(_) => {
            ctx.close_frame = Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "binary messages not supported".into(),
            });
            LoopControl::Disconnect
        }
        Message::Ping(_) | Message::Pong(_) => LoopControl::Continue,
        Message::Close(_) => LoopControl::Disconnect,
    }
}

/// Decodes a client frame and pins it to the connection's own identity.
fn parse_input(text: &str, ctx: &ConnCtx) -> Result<InputEvent, String> {
    let Some(participant) = ctx.participant else {
        return Err("spectators cannot send input".to_string());
    };
    let dto: InputEventDto = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if dto.instance_id != ctx.instance_id || dto.participant_id != participant {
        return Err("frame does not match the connection's instance or participant".to_string());
    }
    InputEvent::try_from(dto)
}
