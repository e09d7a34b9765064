#![deny(missing_docs)]
//! This crate provides the core functionality of the address-relay gateway.
//!
//! Clients connect over a websocket (`GET /ws`), prove control of an account
//! address by signing a challenge payload with the corresponding secp256k1
//! key, then exchange chat messages with other authenticated addresses.
//! Delivery is durable and replayable: every message is appended to the
//! per-address subject of a JetStream stream, and a session replays its own
//! subject from sequence 1 on every connect, so a reconnecting client always
//! receives its full history in stable order.
//!
//! The main entry point is the [`RelayGatewayBuilder`]. Hosting applications
//! construct a [`message_log::MessageLog`] implementation (normally
//! [`message_log::NatsMessageLog`], which also creates the backing stream),
//! hand it to the builder, and serve the returned `axum::Router`:
//!
//! ```ignore
//! let log = NatsMessageLog::connect(&config.nats_url).await?;
//! let router = RelayGatewayBuilder::new(config, Arc::new(log)).build();
//! axum::serve(listener, router).await?;
//! ```
//!
//! Per accepted upgrade the gateway runs one session: a sequential handshake
//! followed by four concurrent pumps (transport reader, log publisher, log
//! subscriber, transport writer) that collapse together on the first terminal
//! failure. All per-connection state lives inside the session; the only
//! process-wide state is the shared log handle.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::ws::WsArgs;
use crate::config::RelayGatewayConfig;
use crate::services::clock::{ClockService, SystemClock};
use crate::services::message_log::MessageLogService;

pub(crate) mod api;
pub mod auth;
pub mod config;
pub mod metrics;
pub(crate) mod services;

pub use services::clock;
pub use services::message_log;

/// [`RelayGatewayBuilder`] assembles the gateway router from its services.
pub struct RelayGatewayBuilder {
    config: RelayGatewayConfig,
    log: MessageLogService,
    clock: ClockService,
}

impl RelayGatewayBuilder {
    /// Creates a builder over the given configuration and message log.
    ///
    /// The log is shared by every session; implementations must be safe for
    /// concurrent use. Stream creation is the log implementation's concern
    /// and happens before the builder is constructed.
    pub fn new(config: RelayGatewayConfig, log: MessageLogService) -> Self {
        Self {
            config,
            log,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock used for message timestamps and handshake
    /// expiry checks. Mainly useful for tests that need a pinned clock.
    pub fn clock(mut self, clock: ClockService) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the `axum` [`Router`] serving `/ws`, `/alivez` and `/readyz`.
    pub fn build(self) -> Router {
        Router::new()
            .merge(api::health::routes())
            .merge(api::ws::routes(WsArgs {
                log: self.log,
                clock: self.clock,
                max_message_size: self.config.ws_max_message_size,
            }))
            .layer(TraceLayer::new_for_http())
    }
}
