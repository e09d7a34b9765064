//! Internal services of the relay gateway.
//!
//! - [`clock`] – the injectable wall-clock used for timestamps and expiry.
//! - [`message_log`] – the durable, subject-addressed message log.
//! - [`session`] – the per-connection pump orchestration.

pub mod clock;
pub mod message_log;
pub(crate) mod session;
