//! API module for the relay gateway.
//!
//! This module defines the HTTP endpoints the gateway serves and organizes
//! them into submodules:
//!
//! - [`errors`] – Session error types and their mapping onto close frames.
//! - [`health`] – Health endpoints (`/alivez`, `/readyz`).
//! - [`ws`] – The websocket endpoint `/ws`: upgrade, handshake, session.

pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod ws;
