//! Communication layer for the adapter wire protocol.
//!
//! Owns the sequence counter, the pending request map and the writer half
//! of the child's stdio. Inbound frames are pulled off the transport bridge
//! by a dedicated reader thread: responses complete their waiting request
//! future, events and reverse requests are handed to the dispatch context.

use std::collections::HashMap;
use std::io::BufReader;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{self, EventMessage, InboundMessage, PeerRequest, Response};
use crate::transport::{BridgeControl, BridgeReader};
use crate::{DapError, Result};

/// Inbound traffic that is not a response to one of our requests.
#[derive(Debug)]
pub enum DispatchItem {
    Event(EventMessage),
    PeerRequest(PeerRequest),
}

/// Manages request/response traffic with the adapter process.
pub struct DapCommunication {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    seq: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Response>>>,
    bridge: BridgeControl,
}

impl DapCommunication {
    pub fn new(stdin: ChildStdin, bridge: BridgeControl) -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            seq: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            bridge,
        }
    }

    /// Send a request and wait for its response body. Fails with
    /// `PeerRejected` when the peer answers `success = false`.
    pub async fn request(&self, command: &str, arguments: Value) -> Result<Value> {
        let receiver = self.begin_request(command, arguments).await?;
        Self::finish_request(command, receiver).await
    }

    /// Send a request, bounded by a hard timeout. Used by the narrow set of
    /// simple host queries that must never wedge the host indefinitely.
    pub async fn request_with_timeout(
        &self,
        command: &'static str,
        arguments: Value,
        limit: Duration,
    ) -> Result<Value> {
        let receiver = self.begin_request(command, arguments).await?;
        match tokio::time::timeout(limit, Self::finish_request(command, receiver)).await {
            Ok(result) => result,
            Err(_) => Err(DapError::Timeout(command)),
        }
    }

    /// Send a request without waiting. The returned receiver resolves when
    /// the response arrives; it fails if the transport goes down first.
    pub async fn begin_request(
        &self,
        command: &str,
        arguments: Value,
    ) -> Result<oneshot::Receiver<Response>> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let payload = protocol::request_payload(seq, command, &arguments);

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().unwrap().insert(seq, sender);

        log::debug!("SEND[{seq}]: {command}");
        if let Err(err) = self.write_payload(&payload).await {
            self.pending.lock().unwrap().remove(&seq);
            return Err(err);
        }
        Ok(receiver)
    }

    pub(crate) async fn finish_request(
        command: &str,
        receiver: oneshot::Receiver<Response>,
    ) -> Result<Value> {
        let response = receiver.await.map_err(|_| DapError::TransportClosed)?;
        log::debug!(
            "RECV[{}]: {command} success={}",
            response.request_seq,
            response.success
        );
        if !response.success {
            return Err(DapError::PeerRejected {
                command: command.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            });
        }
        Ok(response.body)
    }

    /// Answer a reverse request we do not service.
    pub async fn reject_peer_request(&self, request: &PeerRequest) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let payload =
            protocol::reject_payload(seq, request, "request is not supported by this client");
        self.write_payload(&payload).await
    }

    /// Forward raw console input to the adapter process, unframed.
    pub async fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(DapError::TransportClosed)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn write_payload(&self, payload: &Value) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let frame = protocol::encode_frame(&body);
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(DapError::TransportClosed)?;
        stdin.write_all(&frame).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Start the reader thread that drains the transport bridge for the
    /// session's lifetime. Responses go straight to their waiters; the rest
    /// goes to the dispatch channel.
    pub fn spawn_reader(
        self: &Arc<Self>,
        reader: BridgeReader,
        dispatch: mpsc::UnboundedSender<DispatchItem>,
    ) -> JoinHandle<()> {
        let comm = Arc::clone(self);
        std::thread::spawn(move || {
            log::debug!("peer reader started");
            let mut reader = BufReader::new(reader);
            loop {
                match protocol::read_frame(&mut reader) {
                    Ok(Some(frame)) => comm.route(&frame, &dispatch),
                    Ok(None) => {
                        log::debug!("peer stream ended");
                        break;
                    }
                    Err(err) => {
                        log::debug!("peer read failed: {err}");
                        break;
                    }
                }
            }
            comm.fail_pending();
            log::debug!("peer reader finished");
        })
    }

    fn route(&self, frame: &[u8], dispatch: &mpsc::UnboundedSender<DispatchItem>) {
        match serde_json::from_slice::<InboundMessage>(frame) {
            Ok(InboundMessage::Response(response)) => {
                let sender = self
                    .pending
                    .lock()
                    .unwrap()
                    .remove(&response.request_seq);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(response);
                    }
                    None => log::warn!(
                        "RECV: no pending request for response seq {}",
                        response.request_seq
                    ),
                }
            }
            Ok(InboundMessage::Event(event)) => {
                log::debug!("EVENT: {}", event.event);
                let _ = dispatch.send(DispatchItem::Event(event));
            }
            Ok(InboundMessage::Request(request)) => {
                log::debug!("REVERSE: {}", request.command);
                let _ = dispatch.send(DispatchItem::PeerRequest(request));
            }
            Err(err) => log::warn!("unparseable peer message: {err}"),
        }
    }

    /// Drop every pending waiter; their futures resolve to TransportClosed.
    pub fn fail_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Tear down: close the bridge (waking the reader thread), drop stdin,
    /// fail anything still in flight.
    pub async fn shutdown(&self) {
        self.bridge.close();
        self.stdin.lock().await.take();
        self.fail_pending();
    }

    pub fn is_open(&self) -> bool {
        !self.bridge.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport;

    #[tokio::test]
    async fn reader_routes_events_to_dispatch() {
        let (writer, reader, control) = transport::bridge();
        // A communication layer without stdin is enough to exercise routing.
        let comm = Arc::new(dummy_comm(control));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = comm.spawn_reader(reader, tx);

        let body = br#"{"seq":1,"type":"event","event":"initialized"}"#;
        writer.push(protocol::encode_frame(body)).unwrap();
        drop(writer);

        match rx.recv().await {
            Some(DispatchItem::Event(ev)) => assert_eq!(ev.event, "initialized"),
            other => panic!("expected event, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn reader_end_fails_pending_waiters() {
        let (writer, reader, control) = transport::bridge();
        let comm = Arc::new(dummy_comm(control));
        let (tx, _rx) = mpsc::unbounded_channel();

        let (sender, receiver) = oneshot::channel();
        comm.pending.lock().unwrap().insert(7, sender);

        let handle = comm.spawn_reader(reader, tx);
        drop(writer);
        handle.join().unwrap();

        assert!(receiver.await.is_err());
    }

    fn dummy_comm(bridge: BridgeControl) -> DapCommunication {
        DapCommunication {
            stdin: tokio::sync::Mutex::new(None),
            seq: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            bridge,
        }
    }
}
