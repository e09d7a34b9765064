//! Per-connection session orchestration.
//!
//! After the handshake the socket splits into four cooperating pumps:
//!
//! ```text
//! socket ⇒ read pump ⇒ `read` ⇒ publish pump ⇒ log
//! log ⇒ subscribe pump ⇒ `write` ⇒ write pump ⇒ socket
//! ```
//!
//! The first pump to hit a terminal condition reports it to a capacity-one
//! rendezvous (later reports are dropped); the controller then cancels the
//! shared `done` token and the rest collapses by channel closure: the read
//! pump closes `read`, which ends the publish pump; the subscribe pump exits
//! on `done`, drains its subscription and closes `write`, which ends the
//! write pump. Exactly one task produces into, and closes, each channel.

use std::time::Instant;

use axum::extract::ws::{self, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use relay_types::Address;
use relay_types::api::v1::{Message, SendRequest, SyncMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::errors::Error;
use crate::metrics::{
    METRICS_ID_GATEWAY_MESSAGES_PUBLISHED, METRICS_ID_GATEWAY_PUBLISH_DURATION,
    METRICS_ID_GATEWAY_SYNC_DELIVERED,
};
use crate::services::clock::ClockService;
use crate::services::message_log::{LogError, LogSubscription, MessageLogService};

pub(crate) struct SessionArgs {
    pub(crate) address: Address,
    pub(crate) log: MessageLogService,
    pub(crate) clock: ClockService,
}

/// Runs the four pumps until the first terminal failure, then tears the
/// session down: cancel `done`, let the channel-close chain collapse the
/// pumps, join them all. Returns the reunited socket (so the caller can
/// deliver a final diagnostic) and the first error.
pub(crate) async fn run(
    socket: WebSocket,
    args: SessionArgs,
) -> (Option<WebSocket>, Result<(), Error>) {
    let SessionArgs {
        address,
        log,
        clock,
    } = args;
    let (sink, stream) = socket.split();
    let done = CancellationToken::new();
    // capacity 1 keeps the unbuffered backpressure chain of the protocol: a
    // slow broker throttles the reader (and thereby the peer), a slow peer
    // throttles the subscriber (and thereby broker acknowledgments)
    let (read_tx, read_rx) = mpsc::channel::<ws::Utf8Bytes>(1);
    let (write_tx, write_rx) = mpsc::channel::<String>(1);
    // first terminal signal wins; later reports are dropped
    let (err_tx, mut err_rx) = mpsc::channel::<Error>(1);

    let read_task = tokio::spawn({
        let done = done.clone();
        let err_tx = err_tx.clone();
        async move {
            let mut stream = stream;
            if let Err(err) = read_pump(&mut stream, read_tx, &done).await {
                tracing::debug!("read pump: {err}");
                let _ = err_tx.try_send(err);
            }
            stream
        }
    });
    let publish_task = tokio::spawn({
        let log = log.clone();
        let err_tx = err_tx.clone();
        async move {
            if let Err(err) = publish_pump(read_rx, address, log, clock).await {
                tracing::debug!("publish pump: {err}");
                let _ = err_tx.try_send(err);
            }
        }
    });
    let subscribe_task = tokio::spawn({
        let done = done.clone();
        let err_tx = err_tx.clone();
        async move {
            if let Err(err) = subscribe_pump(address, log, write_tx, &done).await {
                tracing::debug!("subscribe pump: {err}");
                let _ = err_tx.try_send(err);
            }
        }
    });
    let write_task = tokio::spawn({
        let done = done.clone();
        async move {
            let mut sink = sink;
            if let Err(err) = write_pump(&mut sink, write_rx, &done).await {
                tracing::debug!("write pump: {err}");
                let _ = err_tx.try_send(err);
            }
            sink
        }
    });

    let first = err_rx.recv().await;
    done.cancel();

    let (stream, sink) = tokio::join!(read_task, write_task);
    let _ = tokio::join!(publish_task, subscribe_task);
    // joining only fails if a pump panicked; without both halves there is no
    // socket left to say goodbye on
    let socket = match (sink, stream) {
        (Ok(sink), Ok(stream)) => sink.reunite(stream).ok(),
        _ => None,
    };
    (socket, first.map_or(Ok(()), Err))
}

/// Blocks on the transport. Text frames go to the publish pump, ping/pong is
/// the transport library's business, anything else is terminal. Closes
/// `read` on exit by dropping its only sender.
async fn read_pump(
    stream: &mut SplitStream<WebSocket>,
    read: mpsc::Sender<ws::Utf8Bytes>,
    done: &CancellationToken,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            () = done.cancelled() => return Ok(()),
            frame = stream.next() => match frame.ok_or(Error::ConnectionClosed)?? {
                ws::Message::Text(frame) => {
                    // the publish pump is the only receiver; it only goes
                    // away during teardown
                    if read.send(frame).await.is_err() {
                        return Ok(());
                    }
                }
                ws::Message::Binary(_) => return Err(Error::UnexpectedBinary),
                ws::Message::Close(_) => return Err(Error::ConnectionClosed),
                ws::Message::Ping(_) | ws::Message::Pong(_) => {}
            },
        }
    }
}

/// Turns inbound send requests into durable publications, one per distinct
/// participant (the sender included). Exits when `read` closes.
async fn publish_pump(
    mut read: mpsc::Receiver<ws::Utf8Bytes>,
    address: Address,
    log: MessageLogService,
    clock: ClockService,
) -> Result<(), Error> {
    while let Some(frame) = read.recv().await {
        let request: SendRequest = serde_json::from_str(frame.as_str())?;
        let message = Message {
            sent_at: clock.now_ms(),
            from: address,
            to: request.to,
            content: request.content,
        };
        let payload = Bytes::from(serde_json::to_vec(&message).expect("can serialize message"));
        let start = Instant::now();
        for participant in message.participants() {
            log.publish(&participant, payload.clone()).await?;
        }
        ::metrics::histogram!(METRICS_ID_GATEWAY_PUBLISH_DURATION)
            .record(start.elapsed().as_millis() as f64);
        ::metrics::counter!(METRICS_ID_GATEWAY_MESSAGES_PUBLISHED).increment(1);
    }
    Ok(())
}

/// Replays the session's own subject from the beginning and forwards every
/// record as a sync frame, acknowledging after the forward. Exits on `done`;
/// always drains the subscription and closes `write` on the way out.
async fn subscribe_pump(
    address: Address,
    log: MessageLogService,
    write: mpsc::Sender<String>,
    done: &CancellationToken,
) -> Result<(), Error> {
    let mut subscription = tokio::select! {
        () = done.cancelled() => return Ok(()),
        subscription = log.subscribe(&address) => subscription?,
    };
    let result = pump_deliveries(subscription.as_mut(), write, done).await;
    subscription.drain().await;
    result
}

async fn pump_deliveries(
    subscription: &mut dyn LogSubscription,
    write: mpsc::Sender<String>,
    done: &CancellationToken,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            () = done.cancelled() => return Ok(()),
            delivery = subscription.next() => {
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(err)) => return Err(err.into()),
                    None => return Err(Error::Log(LogError::SubscriptionEnded)),
                };
                let seqno = delivery.stream_sequence();
                match serde_json::from_slice::<Message>(delivery.payload()) {
                    Ok(message) => {
                        let sync = SyncMessage {
                            messages: vec![message],
                            seqno,
                        };
                        let frame =
                            serde_json::to_string(&sync).expect("can serialize sync frame");
                        // the write pump is the only receiver; it only goes
                        // away during teardown
                        if write.send(frame).await.is_err() {
                            return Ok(());
                        }
                        delivery.ack().await?;
                        ::metrics::counter!(METRICS_ID_GATEWAY_SYNC_DELIVERED).increment(1);
                    }
                    Err(err) => {
                        // a poison record must not wedge the subject
                        tracing::warn!(seqno, "skipping undecodable log record: {err}");
                        delivery.ack().await?;
                    }
                }
            }
        }
    }
}

/// Writes sync frames back to the peer. Exits when `write` closes, or on
/// `done` so a stalled peer cannot hold teardown open.
async fn write_pump(
    sink: &mut SplitSink<WebSocket, ws::Message>,
    mut write: mpsc::Receiver<String>,
    done: &CancellationToken,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            () = done.cancelled() => return Ok(()),
            frame = write.recv() => match frame {
                Some(frame) => sink.send(ws::Message::text(frame)).await?,
                None => return Ok(()),
            },
        }
    }
}
