//! # WebSocket Connection Handler
//!
//! One actor per client connection on `/ws`. The actor owns the session's
//! lifecycle: it registers the session on start, routes inbound protocol
//! messages, and tears the session down on disconnect.
//!
//! ## Actor Model:
//! Heavy work never runs on the actor itself. Audio evaluation and turn
//! processing are spawned onto the runtime, and results come back to the
//! connection through the actor's mailbox (an [`Outbound`] message per
//! event), so the socket stays responsive while a turn is in flight.
//!
//! ## Audio flow per chunk:
//! decode → append to the session buffer → spawn one segmentation pass.
//! An interruption verdict cancels client playback immediately; a finalized
//! utterance clears the buffer and starts a turn.

use crate::audio::buffer::decode_f32_chunk;
use crate::audio::segmenter::SegmentDecision;
use crate::protocol::{ClientMessage, EventSink, ServerEvent};
use crate::session::Session;
use crate::state::AppState;
use crate::turn::TurnInput;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connections silent for longer than this are dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Greeting pushed as a `status` event the moment a connection is accepted.
const CONNECT_MESSAGE: &str = "Connected to Ambit AI backend";

/// Event to deliver to the client, sent to the actor's mailbox from
/// spawned tasks.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound(pub ServerEvent);

/// [`EventSink`] that forwards into a connection actor's mailbox.
struct ActorSink {
    addr: Addr<AmbitWebSocket>,
}

impl EventSink for ActorSink {
    fn send(&self, event: ServerEvent) {
        self.addr.do_send(Outbound(event));
    }
}

/// WebSocket actor for one voice-assistant connection.
pub struct AmbitWebSocket {
    session: Option<Arc<Session>>,
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl AmbitWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            session: None,
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "failed to serialize outbound event"),
        }
    }

    /// Route one parsed client message.
    fn handle_client_message(
        &mut self,
        message: ClientMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let session = match &self.session {
            Some(session) => Arc::clone(session),
            None => return,
        };

        match message {
            ClientMessage::Configure { settings } => {
                session.apply_settings(&settings);
                debug!(session_id = %session.id, "session configured");
                self.send_event(ctx, &ServerEvent::status("configured"));
            }

            ClientMessage::Message { text, settings } => {
                session.apply_settings(&settings);
                self.start_turn(session, TurnInput::Text(text), ctx);
            }

            ClientMessage::AudioStream {
                data,
                sample_rate,
                settings,
            } => {
                session.apply_settings(&settings);
                self.handle_audio_chunk(session, &data, sample_rate, ctx);
            }

            ClientMessage::Unknown => {
                // Tolerated for forward compatibility
                debug!("ignoring message with unknown type");
            }
        }
    }

    /// Decode and buffer one audio chunk, then kick off a segmentation pass
    /// unless one is already running for this session.
    fn handle_audio_chunk(
        &mut self,
        session: Arc<Session>,
        data: &str,
        sample_rate: u32,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let samples = match decode_f32_chunk(data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "dropping malformed audio chunk");
                self.send_event(ctx, &ServerEvent::error(e));
                return;
            }
        };

        let buffer = match session.buffer_for_rate(sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                // Rate mismatch: the chunk is dropped, the connection lives on
                self.send_event(ctx, &ServerEvent::error(e.to_string()));
                return;
            }
        };

        buffer.append(&samples);

        if !session.begin_evaluation() {
            return;
        }

        let segmenter = Arc::clone(&self.state.segmenter);
        let orchestrator = Arc::clone(&self.state.orchestrator);
        let sink = ActorSink {
            addr: ctx.address(),
        };

        tokio::spawn(async move {
            let speaking = session.is_speaking();
            let verdict = {
                let segmenter = Arc::clone(&segmenter);
                let buffer = Arc::clone(&buffer);
                // VAD over up to 15s of samples is CPU work
                tokio::task::spawn_blocking(move || segmenter.evaluate(&buffer, speaking)).await
            };

            let result = match verdict {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    // Drop the ambiguous window rather than reprocess it;
                    // the client is not told.
                    error!(session_id = %session.id, error = %e, "segmentation failed, clearing buffer");
                    buffer.clear();
                    session.end_evaluation();
                    return;
                }
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "segmentation task panicked");
                    buffer.clear();
                    session.end_evaluation();
                    return;
                }
            };

            if result.interrupted {
                info!(session_id = %session.id, "user interrupted playback");
                sink.send(ServerEvent::CancelAudio);
                session.set_speaking(false);
            }

            match result.decision {
                SegmentDecision::Finalized(utterance) => {
                    buffer.clear();
                    session.end_evaluation();
                    orchestrator
                        .run_turn(
                            &session,
                            TurnInput::Audio {
                                samples: utterance,
                                sample_rate,
                            },
                            &sink,
                        )
                        .await;
                }
                SegmentDecision::InsufficientData
                | SegmentDecision::NoSpeech
                | SegmentDecision::StillSpeaking => {
                    session.end_evaluation();
                }
            }
        });
    }

    /// Spawn a full turn off the actor thread.
    fn start_turn(
        &mut self,
        session: Arc<Session>,
        input: TurnInput,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let orchestrator = Arc::clone(&self.state.orchestrator);
        let sink = ActorSink {
            addr: ctx.address(),
        };

        tokio::spawn(async move {
            orchestrator.run_turn(&session, input, &sink).await;
        });
    }
}

impl Actor for AmbitWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match self.state.connections.create_session() {
            Ok(session) => {
                info!(session_id = %session.id, "WebSocket connection started");
                self.session = Some(session);
                self.send_event(ctx, &ServerEvent::status(CONNECT_MESSAGE));
            }
            Err(e) => {
                warn!(error = %e, "rejecting WebSocket connection");
                self.send_event(ctx, &ServerEvent::error(e.to_string()));
                ctx.stop();
                return;
            }
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = &self.session {
            info!(session_id = %session.id, "WebSocket connection stopped");
            self.state.connections.remove_session(&session.id);
        }
    }
}

impl Handler<Outbound> for AmbitWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        self.send_event(ctx, &msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AmbitWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(e) => {
                    debug!(error = %e, "malformed client message");
                    self.send_event(ctx, &ServerEvent::error("invalid message format"));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                // Audio rides in JSON text frames; binary frames are not
                // part of the protocol
                debug!("ignoring binary frame");
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// HTTP entry point that upgrades to the WebSocket protocol.
pub async fn websocket_route(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(AmbitWebSocket::new(state), &req, stream)
}
