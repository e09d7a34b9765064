//! The websocket endpoint.
//!
//! `GET /ws` upgrades the connection and runs one session on it: a
//! sequential handshake on the intact socket, then the four concurrent pumps
//! of [`crate::services::session`]. The handshake tolerates ping/pong while
//! waiting for the auth frame; anything else before a valid [`AuthRequest`]
//! terminates the connection. On success the [`AuthResponse`] is always the
//! first server-to-client frame.
//!
//! Whatever ends the session, the peer gets at most one close frame whose
//! reason is the terminating error (see [`Error::into_close_frame`]), and
//! the transport is dropped afterwards.

use std::time::Instant;

use axum::{
    Router,
    extract::{
        WebSocketUpgrade,
        ws::{self, CloseFrame, WebSocket, close_code},
    },
    routing::any,
};
use relay_types::Address;
use relay_types::api::v1::{AuthPayload, AuthRequest, AuthResponse};
use tracing::{Instrument as _, instrument};

use crate::api::errors::Error;
use crate::auth;
use crate::metrics::{
    METRICS_ID_GATEWAY_HANDSHAKE_FAILURE, METRICS_ID_GATEWAY_HANDSHAKE_SUCCESS,
    METRICS_ID_GATEWAY_SESSIONS_OPEN, METRICS_ID_GATEWAY_VERIFY_DURATION,
};
use crate::services::clock::ClockService;
use crate::services::message_log::MessageLogService;
use crate::services::session;

#[derive(Clone)]
pub(crate) struct WsArgs {
    pub(crate) log: MessageLogService,
    pub(crate) clock: ClockService,
    pub(crate) max_message_size: usize,
}

/// Creates a `Router` with the single `/ws` route.
///
/// Clients upgrade via the websocket upgrade protocol. Axum supports both
/// HTTP/1.1 and HTTP/2.0 websocket connections, therefore we accept
/// connections with `any`.
pub(crate) fn routes(args: WsArgs) -> Router {
    Router::new().route("/ws", any(move |upgrade| handler(upgrade, args.clone())))
}

#[instrument(level = "debug", skip_all, name = "session", fields(address = tracing::field::Empty))]
async fn handler(upgrade: WebSocketUpgrade, args: WsArgs) -> axum::response::Response {
    let parent_span = tracing::Span::current();
    upgrade
        .max_message_size(args.max_message_size)
        .on_failed_upgrade(|err| {
            tracing::warn!("could not establish websocket connection: {err:?}");
        })
        .on_upgrade(move |socket| serve_connection(socket, args).instrument(parent_span))
}

/// One accepted connection, from upgrade to closed transport.
async fn serve_connection(socket: WebSocket, args: WsArgs) {
    ::metrics::gauge!(METRICS_ID_GATEWAY_SESSIONS_OPEN).increment(1);
    let (socket, result) = drive(socket, args).await;
    let close_frame = match result {
        Ok(()) => Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "session closed".into(),
        }),
        Err(err) => err.into_close_frame(),
    };
    if let (Some(mut socket), Some(close_frame)) = (socket, close_frame) {
        tracing::trace!(" < sending close frame");
        // best effort; the peer may already be gone
        let _ = socket.send(ws::Message::Close(Some(close_frame))).await;
    }
    ::metrics::gauge!(METRICS_ID_GATEWAY_SESSIONS_OPEN).decrement(1);
}

async fn drive(mut socket: WebSocket, args: WsArgs) -> (Option<WebSocket>, Result<(), Error>) {
    let address = match await_auth(&mut socket, &args).await {
        Ok(address) => address,
        Err(err) => {
            ::metrics::counter!(METRICS_ID_GATEWAY_HANDSHAKE_FAILURE).increment(1);
            return (Some(socket), Err(err));
        }
    };
    ::metrics::counter!(METRICS_ID_GATEWAY_HANDSHAKE_SUCCESS).increment(1);
    tracing::Span::current().record("address", address.to_string());

    let response = serde_json::to_string(&AuthResponse {
        authenticated_until: 1,
    })
    .expect("can serialize auth response");
    if let Err(err) = socket.send(ws::Message::text(response)).await {
        return (Some(socket), Err(Error::Axum(err)));
    }

    tracing::debug!("session running");
    session::run(
        socket,
        session::SessionArgs {
            address,
            log: args.log,
            clock: args.clock,
        },
    )
    .await
}

/// Reads frames until the peer proves an identity.
///
/// The first text frame must be a valid [`AuthRequest`] whose embedded
/// payload parses as [`AuthPayload`], whose signature recovers the claimed
/// address, and whose expiry (if any) is still in the future.
#[instrument(level = "debug", skip_all)]
async fn await_auth(socket: &mut WebSocket, args: &WsArgs) -> Result<Address, Error> {
    loop {
        match socket.recv().await.ok_or(Error::ConnectionClosed)?? {
            ws::Message::Text(frame) => {
                let request: AuthRequest = serde_json::from_str(frame.as_str())?;
                let payload: AuthPayload = serde_json::from_str(&request.payload)?;
                let start_verify = Instant::now();
                auth::verify_signature(payload.address, &request.payload, &request.signature)?;
                ::metrics::histogram!(METRICS_ID_GATEWAY_VERIFY_DURATION)
                    .record(start_verify.elapsed().as_millis() as f64);
                if payload.expires_at > 0 && payload.expires_at < args.clock.now_ms() {
                    return Err(Error::AuthExpired(payload.expires_at));
                }
                return Ok(payload.address);
            }
            ws::Message::Binary(_) => return Err(Error::UnexpectedBinary),
            ws::Message::Close(_) => return Err(Error::ConnectionClosed),
            // the transport library answers pings itself
            ws::Message::Ping(_) | ws::Message::Pong(_) => {}
        }
    }
}
