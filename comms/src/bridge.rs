//! Raw pass-through bridge.
//!
//! Decouples the orchestrator's listening endpoint from the
//! downstream system's connecting endpoint: frames pushed by workers
//! into the bound side come out unchanged on the connected side.
//! There is no parsing and no batching; backpressure is whatever the
//! two underlying streams impose.

use std::io;

use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};

use crate::{FrameReceiver, FrameSender};

/// Forwards every frame from `rx` to `tx`, unmodified, until either
/// side errors or `rx` reaches end of stream.
pub async fn bridge<R, W>(mut rx: FrameReceiver<R>, mut tx: FrameSender<W>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = rx.recv_raw().await?;
        tx.send_raw(&frame).await?;
    }
}

/// Binds `bind_addr` for inbound producers, connects `connect_addr`
/// downstream, and pumps frames between them for the process
/// lifetime.
///
/// Many inbound connections may push concurrently; their frames are
/// funneled through an mpsc so the outbound stream has exactly one
/// writer. Per-connection errors drop that connection and are
/// logged; they never stop the bridge.
///
/// # Returns
/// The bound inbound address and the accept-loop task handle.
///
/// # Errors
/// Returns `io::Error` if binding or the initial downstream
/// connection fails.
pub async fn spawn<A, B>(
    bind_addr: A,
    connect_addr: B,
) -> io::Result<(std::net::SocketAddr, JoinHandle<()>)>
where
    A: ToSocketAddrs,
    B: ToSocketAddrs,
{
    let listener = TcpListener::bind(bind_addr).await?;
    let outbound = TcpStream::connect(connect_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(
        "bridge listening at {local_addr}, forwarding to {}",
        outbound.peer_addr()?
    );

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let (_, out_half) = outbound.into_split();
    let mut out_tx = FrameSender::new(out_half);
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = out_tx.send_raw(&frame).await {
                warn!("bridge forward failed: {e}");
            }
        }
    });

    let task = tokio::spawn(accept_loop(listener, frame_tx));
    Ok((local_addr, task))
}

async fn accept_loop(listener: TcpListener, frame_tx: UnboundedSender<Vec<u8>>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("bridge producer connected from {addr}");
                let frame_tx = frame_tx.clone();
                tokio::spawn(async move {
                    let (rx, _) = stream.into_split();
                    let mut rx = FrameReceiver::new(rx);
                    loop {
                        match rx.recv_raw().await {
                            Ok(frame) => {
                                if frame_tx.send(frame).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                info!("bridge producer {addr} gone: {e}");
                                return;
                            }
                        }
                    }
                });
            }
            Err(e) => warn!("bridge accept failed: {e}"),
        }
    }
}
