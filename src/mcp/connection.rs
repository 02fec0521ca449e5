//! Line-delimited JSON-RPC over a byte stream (stdio in production).
//!
//! Reading, writing and tool execution are decoupled: every `tools/call` runs
//! on its own task, all outbound messages go through one writer task, and
//! server-initiated requests made through a [`Peer`] are matched to the
//! client's responses by id.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::mcp::{
    dispatch,
    jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION},
    ToolHandler,
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeerError {
    #[error("connection closed")]
    Closed,
    #[error("client returned error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),
}

enum Outbound {
    Message(Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, JsonRpcError>>>>>;

/// Sends requests to the connected client and awaits its answers.
#[derive(Clone)]
pub struct Peer {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

/// Drops the pending slot when the waiting request is cancelled or finishes.
struct PendingSlot {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl Peer {
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, PeerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| PeerError::Closed)?
            .insert(id, sender);
        let _slot = PendingSlot {
            id,
            pending: Arc::clone(&self.pending),
        };

        let request = JsonRpcRequest::new(id, method, params);
        let message = serde_json::to_value(&request).map_err(|_| PeerError::Closed)?;
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| PeerError::Closed)?;
        debug!(id, method, "sent request to client");

        match receiver.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(PeerError::Remote(error)),
            Err(_) => Err(PeerError::Closed),
        }
    }

    /// A peer whose requests always fail with [`PeerError::Closed`].
    pub fn disconnected() -> Self {
        let (outbound, _) = mpsc::unbounded_channel();
        Self {
            outbound,
            pending: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound_writes: mpsc::UnboundedReceiver<Outbound>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

impl Connection {
    pub fn new() -> Self {
        let (outbound, inbound_writes) = mpsc::unbounded_channel();
        Self {
            outbound,
            inbound_writes,
            pending: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn peer(&self) -> Peer {
        Peer {
            outbound: self.outbound.clone(),
            pending: Arc::clone(&self.pending),
            next_id: Arc::clone(&self.next_id),
        }
    }

    /// Serves until the reader reaches end of input.
    pub async fn serve<R, W>(
        self,
        reader: R,
        writer: W,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Connection {
            outbound,
            inbound_writes,
            pending,
            ..
        } = self;

        let writer_task = tokio::spawn(write_loop(writer, inbound_writes));
        let mut in_flight: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            in_flight.retain(|_, task| !task.is_finished());

            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(err) => {
                    warn!("dropping malformed message: {err}");
                    send(&outbound, JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(err)));
                    continue;
                }
            };

            match JsonRpcMessage::classify(value) {
                JsonRpcMessage::Response(response) => route_response(&pending, response),
                JsonRpcMessage::Invalid { id, reason } => {
                    send(&outbound, JsonRpcResponse::failure(id, JsonRpcError::invalid_request(reason)));
                }
                JsonRpcMessage::Request(request) if request.method == "notifications/cancelled" => {
                    cancel(&mut in_flight, request.params.as_ref());
                }
                JsonRpcMessage::Request(request) if request.method == "tools/call" && !request.is_notification() => {
                    let key = request.id.as_ref().map(Value::to_string).unwrap_or_default();
                    let handler = Arc::clone(&handler);
                    let outbound = outbound.clone();
                    let task = tokio::spawn(async move {
                        if let Some(response) = dispatch(handler.as_ref(), request).await {
                            send(&outbound, response);
                        }
                    });
                    in_flight.insert(key, task);
                }
                JsonRpcMessage::Request(request) => {
                    if let Some(response) = dispatch(handler.as_ref(), request).await {
                        send(&outbound, response);
                    }
                }
            }
        }

        info!("input closed, shutting down connection");
        for (_, task) in in_flight.drain() {
            task.abort();
        }
        if let Ok(mut pending) = pending.lock() {
            pending.clear();
        }
        let _ = outbound.send(Outbound::Shutdown);
        writer_task.await?
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

fn send(outbound: &mpsc::UnboundedSender<Outbound>, response: JsonRpcResponse) {
    match serde_json::to_value(&response) {
        Ok(value) => {
            if outbound.send(Outbound::Message(value)).is_err() {
                warn!("writer closed, dropping response");
            }
        }
        Err(err) => warn!("failed to encode response: {err}"),
    }
}

fn route_response(pending: &PendingMap, response: JsonRpcResponse) {
    let Some(id) = response.id.as_u64() else {
        warn!(id = %response.id, "response with unexpected id");
        return;
    };
    let waiter = pending.lock().ok().and_then(|mut pending| pending.remove(&id));
    let Some(waiter) = waiter else {
        debug!(id, "no pending request for response");
        return;
    };

    let outcome = match (response.result, response.error) {
        (_, Some(error)) => Err(error),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    };
    let _ = waiter.send(outcome);
}

fn cancel(in_flight: &mut HashMap<String, JoinHandle<()>>, params: Option<&Value>) {
    let Some(request_id) = params.and_then(|params| params.get("requestId")) else {
        return;
    };
    if let Some(task) = in_flight.remove(&request_id.to_string()) {
        info!(request_id = %request_id, "cancelling in-flight tool call");
        task.abort();
    }
}

async fn write_loop<W>(mut writer: W, mut messages: mpsc::UnboundedReceiver<Outbound>) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(Outbound::Message(message)) = messages.recv().await {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Notification payload a client sends to abort one of its requests.
pub fn cancellation(request_id: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "notifications/cancelled",
        "params": { "requestId": request_id }
    })
}
