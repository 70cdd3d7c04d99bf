//! The typed push channel towards the external observer.
//!
//! A `RelayHandle` is cloned freely across the orchestrator; all
//! events funnel into a single writer task that owns the downstream
//! connection. Delivery is at-most-once: a failed send is logged and
//! dropped, and the channel is never restarted.

use std::io;

use log::{info, warn};
use serde_json::Value;
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};

use crate::{
    FrameSender,
    event::{DirectoryEvent, MessageType},
};

/// Cheap-to-clone sending handle for directory/schedule events.
#[derive(Clone)]
pub struct RelayHandle {
    sender_id: String,
    tx: Option<UnboundedSender<DirectoryEvent>>,
}

impl RelayHandle {
    /// A handle that silently drops every event (relay disabled).
    pub fn disabled() -> Self {
        Self {
            sender_id: String::new(),
            tx: None,
        }
    }

    /// A connected handle plus the receiving end of its queue.
    ///
    /// Used by tests and by in-process consumers; `connect` is the
    /// TCP-backed equivalent.
    pub fn pair(sender_id: &str) -> (Self, UnboundedReceiver<DirectoryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            sender_id: sender_id.to_string(),
            tx: Some(tx),
        };
        (handle, rx)
    }

    /// Enqueues one event, stamped with the current time.
    ///
    /// Never blocks and never fails from the caller's point of view;
    /// an unreachable relay is a logged, non-fatal condition.
    pub fn send(&self, message_type: MessageType, message: Value) {
        let Some(tx) = &self.tx else { return };

        let event = DirectoryEvent::now(&self.sender_id, message_type, message);
        if tx.send(event).is_err() {
            warn!("relay writer is gone, dropping event");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

/// Connects to the downstream observer and spawns the writer task.
///
/// The task runs for the lifetime of the process; per-event send
/// failures are logged and the event dropped.
///
/// # Errors
/// Returns `io::Error` if the initial connection fails.
pub async fn connect<A: ToSocketAddrs>(addr: A, sender_id: &str) -> io::Result<RelayHandle> {
    let stream = TcpStream::connect(addr).await?;
    info!("relay connected to {}", stream.peer_addr()?);

    let (handle, rx) = RelayHandle::pair(sender_id);
    tokio::spawn(write_loop(stream, rx));
    Ok(handle)
}

async fn write_loop(stream: TcpStream, mut rx: UnboundedReceiver<DirectoryEvent>) {
    let (_, tx) = stream.into_split();
    let mut tx = FrameSender::new(tx);

    while let Some(event) = rx.recv().await {
        if let Err(e) = tx.send(&event).await {
            warn!("relay send failed: {e}");
        }
    }
}
