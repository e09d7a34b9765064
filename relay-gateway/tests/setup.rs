use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum_test::{TestServer, TestWebSocket, WsMessage};
use bytes::Bytes;
use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use relay_gateway::auth;
use relay_gateway::config::RelayGatewayConfig;
use relay_gateway::message_log::{DeliveryAck, LogDelivery, LogError, LogSubscription, MessageLog};
use relay_gateway::RelayGatewayBuilder;
use relay_types::api::v1::{AuthPayload, AuthRequest, AuthResponse};
use relay_types::Address;
use tokio::sync::watch;

/// In-memory stand-in for the JetStream-backed log: per-subject append-only
/// records with replay-from-beginning subscriptions and 1-based sequence
/// numbers. Tracks the number of live subscriptions so tests can observe
/// that sessions drain on teardown.
#[derive(Clone)]
pub struct MemoryMessageLog(Arc<MemoryLogInner>);

struct MemoryLogInner {
    topics: Mutex<HashMap<Address, Vec<Bytes>>>,
    appended: watch::Sender<u64>,
    live_subscriptions: AtomicUsize,
}

impl Default for MemoryMessageLog {
    fn default() -> Self {
        Self(Arc::new(MemoryLogInner {
            topics: Mutex::new(HashMap::new()),
            appended: watch::Sender::new(0),
            live_subscriptions: AtomicUsize::new(0),
        }))
    }
}

impl MemoryMessageLog {
    /// Appends a raw record, bypassing the gateway. Used to seed history and
    /// poison records.
    pub fn append_raw(&self, address: &Address, payload: Bytes) {
        self.0
            .topics
            .lock()
            .entry(*address)
            .or_default()
            .push(payload);
        self.0.appended.send_modify(|version| *version += 1);
    }

    pub fn records(&self, address: &Address) -> Vec<Bytes> {
        self.0
            .topics
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subjects(&self) -> Vec<Address> {
        self.0.topics.lock().keys().copied().collect()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.0.live_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn publish(&self, address: &Address, payload: Bytes) -> Result<(), LogError> {
        self.append_raw(address, payload);
        Ok(())
    }

    async fn subscribe(&self, address: &Address) -> Result<Box<dyn LogSubscription>, LogError> {
        self.0.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySubscription {
            appended: self.0.appended.subscribe(),
            log: self.clone(),
            address: *address,
            cursor: 0,
        }))
    }
}

struct MemorySubscription {
    log: MemoryMessageLog,
    appended: watch::Receiver<u64>,
    address: Address,
    cursor: usize,
}

#[async_trait]
impl LogSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<LogDelivery, LogError>> {
        loop {
            let record = self
                .log
                .0
                .topics
                .lock()
                .get(&self.address)
                .and_then(|records| records.get(self.cursor))
                .cloned();
            if let Some(payload) = record {
                self.cursor += 1;
                return Some(Ok(LogDelivery::new(
                    payload,
                    self.cursor as u64,
                    Box::new(NoopAck),
                )));
            }
            if self.appended.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn drain(self: Box<Self>) {
        self.log.0.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct NoopAck;

#[async_trait]
impl DeliveryAck for NoopAck {
    async fn ack(self: Box<Self>) -> Result<(), LogError> {
        Ok(())
    }
}

/// A fresh keypair plus helpers to build signed handshakes.
pub struct TestIdentity {
    key: SigningKey,
    pub address: Address,
}

impl TestIdentity {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::thread_rng());
        let address = auth::address_of_key(key.verifying_key());
        Self { key, address }
    }

    pub fn sign(&self, payload: &str) -> String {
        let digest = alloy::primitives::eip191_hash_message(payload.as_bytes());
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("can sign");
        format!(
            "0x{}{:02x}",
            alloy::primitives::hex::encode(signature.to_bytes()),
            recovery_id.to_byte() + 27
        )
    }

    pub fn auth_request(&self, expires_at: i64) -> AuthRequest {
        self.auth_request_claiming(self.address, expires_at)
    }

    pub fn auth_request_claiming(&self, address: Address, expires_at: i64) -> AuthRequest {
        let payload = serde_json::to_string(&AuthPayload {
            address,
            expires_at,
        })
        .expect("can serialize payload");
        let signature = self.sign(&payload);
        AuthRequest { payload, signature }
    }
}

pub fn test_server(log: MemoryMessageLog) -> TestServer {
    let config = RelayGatewayConfig {
        nats_url: "nats://unused".to_owned(),
        ws_max_message_size: 64 * 1024,
    };
    let router = RelayGatewayBuilder::new(config, Arc::new(log)).build();
    TestServer::builder()
        .http_transport()
        .build(router)
        .expect("Can build test-server")
}

pub async fn connect(server: &TestServer) -> TestWebSocket {
    server.get_websocket("/ws").await.into_websocket().await
}

/// Opens a websocket and completes the handshake for `identity`.
pub async fn authenticate(server: &TestServer, identity: &TestIdentity) -> TestWebSocket {
    let mut websocket = connect(server).await;
    websocket.send_json(&identity.auth_request(0)).await;
    let response: AuthResponse = websocket.receive_json().await;
    assert_eq!(response.authenticated_until, 1);
    websocket
}

/// Reads frames until the server's close frame arrives and returns its code
/// and reason.
pub async fn expect_close(websocket: &mut TestWebSocket) -> Option<(u16, String)> {
    loop {
        match websocket.receive_message().await {
            WsMessage::Close(frame) => {
                return frame.map(|frame| (u16::from(frame.code), frame.reason.as_str().to_owned()));
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
}
