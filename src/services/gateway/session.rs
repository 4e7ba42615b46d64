use crate::api::schemas::gateway::{ClientFrame, ControlFrame, ServerFrame};
use crate::domain::event::{Channel, ChatEvent};
use crate::services::conversation_service::ConversationService;
use crate::services::fanout::FanoutService;
use crate::services::gateway::Metrics;
use crate::services::presence_service::PresenceService;
use crate::services::typing_service::TypingService;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::collections::HashSet;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) user_id: Uuid,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) fanout: FanoutService,
    pub(crate) presence: PresenceService,
    pub(crate) typing: TypingService,
    pub(crate) conversations: ConversationService,
    pub(crate) metrics: Metrics,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

type WsSink = SplitSink<WebSocket, WsMessage>;

/// What the select loop decided to do this turn. Extracting an owned step
/// first keeps the stream map free for the handlers to mutate.
enum Step {
    Shutdown,
    Inbound(Option<Result<WsMessage, axum::Error>>),
    Event(Option<(Channel, Result<ChatEvent, BroadcastStreamRecvError>)>),
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = %Uuid::new_v4()
        )
    )]
    pub(crate) async fn run(self) {
        let Self { user_id, socket, fanout, presence, typing, conversations, metrics, mut shutdown_rx, .. } = self;

        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();

        // Every session carries its user's conversation-list channel plus the
        // presence broadcast; conversation channels come and go with the UI.
        let mut streams: StreamMap<Channel, BroadcastStream<ChatEvent>> = StreamMap::new();
        streams.insert(Channel::UserFeed(user_id), fanout.subscribe(Channel::UserFeed(user_id)).into_stream());
        streams.insert(Channel::Presence, fanout.subscribe(Channel::Presence).into_stream());

        let mut suppressed: HashSet<Channel> = HashSet::new();

        loop {
            let step = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => Step::Shutdown,

                msg = ws_stream.next() => Step::Inbound(msg),

                event = streams.next() => Step::Event(event),
            };

            match step {
                Step::Shutdown => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Shutdown signal received, closing WebSocket");
                        let _ = ws_sink
                            .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                                code: axum::extract::ws::close_code::AWAY,
                                reason: "Server shutting down".into(),
                            })))
                            .await;
                        break;
                    }
                }

                Step::Inbound(msg) => {
                    let continue_loop = match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let ctx = FrameContext {
                                user_id,
                                streams: &mut streams,
                                suppressed: &mut suppressed,
                                fanout: &fanout,
                                presence: &presence,
                                typing: &typing,
                                conversations: &conversations,
                                metrics: &metrics,
                                ws_sink: &mut ws_sink,
                            };
                            handle_client_frame(text.as_str(), ctx).await
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                            // Transport-level liveness doubles as a heartbeat.
                            presence.heartbeat(user_id).await;
                            true
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::warn!("Received unexpected binary frame");
                            metrics.frames_dropped_total.add(1, &[]);
                            true
                        }
                        Some(Ok(WsMessage::Close(_)) | Err(_)) | None => false,
                    };

                    if !continue_loop {
                        break;
                    }
                }

                Step::Event(event) => match event {
                    Some((channel, Ok(event))) => {
                        if suppressed.contains(&channel) && event.actor() == Some(user_id) {
                            metrics.events_suppressed_total.add(1, &[]);
                            continue;
                        }

                        if !send_frame(&mut ws_sink, &ServerFrame::Event(event)).await {
                            break;
                        }
                        metrics.events_delivered_total.add(1, &[]);
                    }
                    Some((channel, Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                        // The buffer ran out under this subscriber; it must
                        // backfill through the ledger list instead.
                        tracing::warn!(channel = %channel, missed, "Subscriber lagged");
                        let frame =
                            ServerFrame::Control(ControlFrame::Lagged { channel: channel.to_string(), missed });
                        if !send_frame(&mut ws_sink, &frame).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let _ = ws_sink.close().await;

        // Dropping the stream map releases every channel subscription this
        // session registered; the fan-out GC reclaims empty channels later.
        drop(streams);

        tracing::info!("WebSocket disconnected");
    }
}

struct FrameContext<'a> {
    user_id: Uuid,
    streams: &'a mut StreamMap<Channel, BroadcastStream<ChatEvent>>,
    suppressed: &'a mut HashSet<Channel>,
    fanout: &'a FanoutService,
    presence: &'a PresenceService,
    typing: &'a TypingService,
    conversations: &'a ConversationService,
    metrics: &'a Metrics,
    ws_sink: &'a mut WsSink,
}

/// Applies one inbound frame. Returns false when the session should close.
async fn handle_client_frame(raw: &str, ctx: FrameContext<'_>) -> bool {
    let FrameContext { user_id, streams, suppressed, fanout, presence, typing, conversations, metrics, ws_sink } =
        ctx;

    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            // A malformed frame is logged and dropped, never fatal.
            tracing::warn!(error = %e, "Failed to decode client frame");
            metrics.frames_dropped_total.add(1, &[]);
            return true;
        }
    };

    match frame {
        ClientFrame::Subscribe { conversation_id, suppress_echo } => {
            match conversations.is_participant(conversation_id, user_id).await {
                Ok(true) => {
                    let channel = Channel::Conversation(conversation_id);
                    streams.insert(channel, fanout.subscribe(channel).into_stream());
                    if suppress_echo {
                        suppressed.insert(channel);
                    } else {
                        suppressed.remove(&channel);
                    }

                    let typing_user_ids = typing.typists(conversation_id).iter().map(|t| t.user_id).collect();
                    let ack = ServerFrame::Control(ControlFrame::Subscribed { conversation_id, typing_user_ids });
                    send_frame(ws_sink, &ack).await
                }
                Ok(false) => {
                    let frame = ServerFrame::Control(ControlFrame::Error {
                        message: "Not a participant of this conversation".to_string(),
                    });
                    send_frame(ws_sink, &frame).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Subscribe participant check failed");
                    let frame = ServerFrame::Control(ControlFrame::Error {
                        message: "Subscription temporarily unavailable".to_string(),
                    });
                    send_frame(ws_sink, &frame).await
                }
            }
        }
        ClientFrame::Unsubscribe { conversation_id } => {
            let channel = Channel::Conversation(conversation_id);
            streams.remove(&channel);
            suppressed.remove(&channel);
            send_frame(ws_sink, &ServerFrame::Control(ControlFrame::Unsubscribed { conversation_id })).await
        }
        ClientFrame::Typing { conversation_id } => {
            // Typing is restricted to channels the session proved interest in;
            // everything else is dropped as noise.
            if streams.keys().any(|k| *k == Channel::Conversation(conversation_id)) {
                typing.start_typing(conversation_id, user_id);
            } else {
                metrics.frames_dropped_total.add(1, &[]);
            }
            true
        }
        ClientFrame::TypingStop { conversation_id } => {
            typing.stop_typing(conversation_id, user_id);
            true
        }
        ClientFrame::Presence { status, active_conversation_id } => {
            presence.set_status(user_id, status, active_conversation_id).await;
            true
        }
        ClientFrame::Heartbeat => {
            presence.heartbeat(user_id).await;
            true
        }
    }
}

async fn send_frame(ws_sink: &mut WsSink, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => ws_sink.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server frame");
            true
        }
    }
}
