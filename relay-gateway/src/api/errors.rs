//! This module defines the [`Error`] a relay session may encounter. It
//! further provides a method to transform an encountered error into the
//! close frame the peer sees, if any.

use std::io::ErrorKind;

use axum::extract::ws::{CloseFrame, close_code};
use relay_types::api::v1::close_codes;
use tracing::instrument;
use tungstenite::error::ProtocolError;

use crate::auth::AuthError;
use crate::services::message_log::LogError;

/// All errors that may terminate a relay session.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error(transparent)]
    Axum(#[from] axum::Error),
    #[error("unexpected binary message")]
    UnexpectedBinary,
    #[error("could not verify signature: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("authentication payload expired at {0}")]
    AuthExpired(i64),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Log(#[from] LogError),
}

impl Error {
    /// Transforms the error into a [`CloseFrame`] if necessary.
    ///
    /// Peer-initiated closes and dead transports get no frame; everything
    /// else carries the error string as the close reason, which is the
    /// diagnostic a terminated session owes its peer.
    #[instrument(level = "debug", skip_all)]
    pub(crate) fn into_close_frame(self) -> Option<CloseFrame> {
        tracing::debug!("{self:?}");
        match self {
            Error::ConnectionClosed => {
                // nothing to do here
                None
            }
            Error::Axum(axum_error) => {
                // try down casting if close-without-handshake
                let inner = axum_error.into_inner();
                if let Some(tungstenite::Error::Protocol(
                    ProtocolError::ResetWithoutClosingHandshake,
                )) = inner.downcast_ref()
                {
                    tracing::trace!("nothing to do client closed session (tungstenite error)");
                    None
                } else if let Some(io_err) = inner.downcast_ref::<std::io::Error>()
                    && io_err.kind() == ErrorKind::ConnectionReset
                {
                    tracing::trace!("nothing to do client closed session (Os error)");
                    None
                } else {
                    Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "unexpected error".into(),
                    })
                }
            }
            Error::UnexpectedBinary => Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "unexpected binary message".into(),
            }),
            Error::Unauthorized(err) => Some(CloseFrame {
                code: close_code::POLICY,
                reason: format!("could not verify signature: {err}").into(),
            }),
            Error::AuthExpired(expires_at) => Some(CloseFrame {
                code: close_code::POLICY,
                reason: format!("authentication payload expired at {expires_at}").into(),
            }),
            Error::Json(err) => Some(CloseFrame {
                code: close_codes::BAD_REQUEST,
                reason: err.to_string().into(),
            }),
            Error::Log(err) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: err.to_string().into(),
            }),
        }
    }
}
