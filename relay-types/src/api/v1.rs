//! # v1 wire protocol
//!
//! Data transfer objects for the version 1 relay protocol.
//!
//! All frames are JSON over websocket text frames. Unknown fields are
//! ignored on decode; missing required fields are a decode failure. The
//! handshake frames carry the signed challenge ([`AuthRequest`] /
//! [`AuthResponse`]), everything after the handshake is either an inbound
//! [`SendRequest`] or an outbound [`SyncMessage`] replaying the durable
//! per-address log.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Address;

/// Relay-specific websocket close codes.
pub mod close_codes {
    /// Bad request (undecodable frame, protocol violation).
    pub const BAD_REQUEST: u16 = 4002;
}

/// The first frame a client sends: proof of control over an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// The exact JSON encoding of the signed [`AuthPayload`].
    ///
    /// The signature covers these bytes verbatim, so the string is carried
    /// as-is and only parsed after transport decoding.
    pub payload: String,
    /// 65-byte recoverable ECDSA signature over the prefixed hash of
    /// `payload`, encoded as `0x`-prefixed lowercase hex.
    pub signature: String,
}

/// The challenge a client signs to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// The address the client claims control of.
    pub address: Address,
    /// Expiry of the payload in epoch milliseconds. Non-positive means the
    /// payload does not expire.
    pub expires_at: i64,
}

/// Server response to a successful [`AuthRequest`].
///
/// Always the first server-to-client frame of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Opaque integer reserved for future use.
    pub authenticated_until: i64,
}

/// A client's request to relay a message to a set of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient addresses. May be empty and may contain duplicates; the
    /// gateway publishes per distinct participant.
    pub to: Vec<Address>,
    /// Opaque message body.
    pub content: String,
}

/// A durable chat message, immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned publication time in epoch milliseconds.
    pub sent_at: i64,
    /// The authenticated sender.
    pub from: Address,
    /// The recipients as given in the originating [`SendRequest`].
    pub to: Vec<Address>,
    /// Opaque message body.
    pub content: String,
}

impl Message {
    /// The addresses this message is filed under: {from} and every distinct
    /// recipient. A message with N distinct participants appears in N
    /// per-address logs.
    pub fn participants(&self) -> BTreeSet<Address> {
        let mut participants: BTreeSet<Address> = self.to.iter().copied().collect();
        participants.insert(self.from);
        participants
    }
}

/// Server frame delivering durable messages back to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// The delivered messages.
    pub messages: Vec<Message>,
    /// Per-subject stream sequence number of the last message included.
    pub seqno: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(last_byte: u8) -> Address {
        format!("0x00000000000000000000000000000000000000{last_byte:02x}")
            .parse()
            .unwrap()
    }

    #[test]
    fn auth_request_round_trips() {
        let request = AuthRequest {
            payload: r#"{"address":"0x33a8122f5c41eee796de9da8d63af7670f310964","expiresAt":0}"#
                .to_owned(),
            signature: "0xabcd".to_owned(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: AuthRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn auth_payload_uses_wire_field_names() {
        let payload: AuthPayload = serde_json::from_str(
            r#"{"address":"0x33a8122f5c41eee796de9da8d63af7670f310964","expiresAt":42}"#,
        )
        .unwrap();
        assert_eq!(payload.expires_at, 42);
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"expiresAt\":42"));
    }

    #[test]
    fn auth_payload_rejects_missing_fields() {
        assert!(serde_json::from_str::<AuthPayload>(r#"{"expiresAt":42}"#).is_err());
        assert!(
            serde_json::from_str::<AuthRequest>(r#"{"payload":"{}"}"#).is_err(),
            "signature is required"
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let request: SendRequest =
            serde_json::from_str(r#"{"to":[],"content":"hi","ttl":9}"#).unwrap();
        assert_eq!(request.content, "hi");
    }

    #[test]
    fn message_round_trips_with_wire_field_names() {
        let message = Message {
            sent_at: 1_640_118_000_000,
            from: address(1),
            to: vec![address(2)],
            content: "hello".to_owned(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"sentAt\":1640118000000"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn participants_include_the_sender() {
        let message = Message {
            sent_at: 0,
            from: address(1),
            to: vec![address(2), address(3)],
            content: String::new(),
        };
        let participants = message.participants();
        assert_eq!(participants.len(), 3);
        assert!(participants.contains(&address(1)));
    }

    #[test]
    fn participants_of_an_empty_recipient_list_is_just_the_sender() {
        let message = Message {
            sent_at: 0,
            from: address(1),
            to: vec![],
            content: String::new(),
        };
        assert_eq!(message.participants().into_iter().collect::<Vec<_>>(), vec![address(1)]);
    }

    #[test]
    fn participants_deduplicate_recipients() {
        let message = Message {
            sent_at: 0,
            from: address(1),
            to: vec![address(2), address(2), address(1)],
            content: String::new(),
        };
        assert_eq!(message.participants().len(), 2);
    }

    #[test]
    fn sync_message_round_trips() {
        let sync = SyncMessage {
            messages: vec![Message {
                sent_at: 7,
                from: address(1),
                to: vec![address(1)],
                content: "hi".to_owned(),
            }],
            seqno: 1,
        };
        let json = serde_json::to_string(&sync).unwrap();
        let back: SyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sync);
    }
}
