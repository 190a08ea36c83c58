// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! TCP link transport.
//!
//! The ephemeral radio link is a point-to-point IP hop, so the session
//! channel is one TCP connection: a single-connection accept loop on the
//! advertising side, a dial on the seeking side, and a little-endian `u16`
//! length prefix per frame. Progress is driven by explicit events, never
//! by sleeping on the connect path.

use crate::networking::transport::{
    drive_link, FrameIo, HandlerFactory, LinkTransport, TransportError,
};
use crate::networking::NodeEvent;
use crate::sync::wire::FRAME_CAP;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Frame length prefix size.
const LEN_PREFIX: usize = 2;

/// Framed I/O over one TCP stream.
pub struct TcpFrameIo {
    stream: TcpStream,
}

impl TcpFrameIo {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl FrameIo for TcpFrameIo {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > FRAME_CAP {
            return Err(TransportError::Oversize);
        }
        let len = (frame.len() as u16).to_le_bytes();
        self.stream
            .write_all(&len)
            .await
            .map_err(|_| TransportError::Io)?;
        self.stream
            .write_all(frame)
            .await
            .map_err(|_| TransportError::Io)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut len_bytes = [0u8; LEN_PREFIX];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            // Orderly close between frames.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(_) => return Err(TransportError::Io),
        }
        let len = u16::from_le_bytes(len_bytes) as usize;
        if len > FRAME_CAP {
            return Err(TransportError::Oversize);
        }
        let mut frame = vec![0u8; len];
        self.stream
            .read_exact(&mut frame)
            .await
            .map_err(|_| TransportError::Io)?;
        Ok(Some(frame))
    }
}

/// Where the next dial goes; set by discovery on associate.
#[derive(Clone, Default)]
pub struct DialHandle {
    target: Arc<Mutex<Option<String>>>,
}

impl DialHandle {
    /// Point the next dial at `addr`.
    pub async fn set_target(&self, addr: String) {
        *self.target.lock().await = Some(addr);
    }

    /// Clear the dial target.
    pub async fn clear_target(&self) {
        *self.target.lock().await = None;
    }

    async fn take(&self) -> Option<String> {
        self.target.lock().await.clone()
    }
}

/// Transport settings.
#[derive(Clone, Debug)]
pub struct TcpTransportConfig {
    /// Accept-loop port.
    pub listen_port: u16,
    /// Receive inactivity budget.
    pub inactivity: Duration,
    /// Dial budget.
    pub connect_timeout: Duration,
}

/// TCP transport: one accept loop, one dial path, one session at a time.
pub struct TcpTransport {
    cfg: TcpTransportConfig,
    factory: HandlerFactory,
    events: mpsc::Sender<NodeEvent>,
    dial: DialHandle,
    busy: Arc<AtomicBool>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TcpTransport {
    /// Handle used by discovery to aim the dial path.
    pub fn dial_handle(&self) -> DialHandle {
        self.dial.clone()
    }
}

/// Start the accept loop and return the transport control handle.
pub fn spawn_tcp_transport(
    cfg: TcpTransportConfig,
    factory: HandlerFactory,
    events: mpsc::Sender<NodeEvent>,
) -> Arc<TcpTransport> {
    let transport = Arc::new(TcpTransport {
        cfg: cfg.clone(),
        factory: factory.clone(),
        events: events.clone(),
        dial: DialHandle::default(),
        busy: Arc::new(AtomicBool::new(false)),
        accept_task: Mutex::new(None),
    });

    let busy = transport.busy.clone();
    let task = tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", cfg.listen_port)).await {
            Ok(l) => l,
            Err(e) => {
                warn!(port = cfg.listen_port, error = %e, "listen failed");
                return;
            }
        };
        info!(port = cfg.listen_port, "accept loop started");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            // Single-peered: refuse a second concurrent session.
            if busy.swap(true, Ordering::AcqRel) {
                warn!(%peer, "session active, refusing connection");
                drop(stream);
                continue;
            }
            debug!(%peer, "peer connected");
            let _ = events.send(NodeEvent::PeerAttached).await;
            let _ = events.send(NodeEvent::LinkEstablished).await;

            let mut io = TcpFrameIo::new(stream);
            let mut handler = (factory)(false);
            let code = drive_link(&mut io, handler.as_mut(), cfg.inactivity).await;
            let _ = events.send(NodeEvent::SessionDone(code)).await;
            busy.store(false, Ordering::Release);
        }
    });

    if let Ok(mut slot) = transport.accept_task.try_lock() {
        *slot = Some(task);
    }
    transport
}

#[async_trait]
impl LinkTransport for TcpTransport {
    async fn open(&self) -> Result<(), TransportError> {
        let Some(addr) = self.dial.take().await else {
            return Err(TransportError::Closed);
        };
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Busy);
        }

        let events = self.events.clone();
        let factory = self.factory.clone();
        let busy = self.busy.clone();
        let cfg = self.cfg.clone();
        tokio::spawn(async move {
            let connect = tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(&addr));
            let stream = match connect.await {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "dial failed");
                    busy.store(false, Ordering::Release);
                    let _ = events.send(NodeEvent::LinkDown).await;
                    return;
                }
                Err(_) => {
                    warn!(%addr, "dial timed out");
                    busy.store(false, Ordering::Release);
                    let _ = events.send(NodeEvent::LinkDown).await;
                    return;
                }
            };
            debug!(%addr, "dial connected");
            let _ = events.send(NodeEvent::LinkEstablished).await;

            let mut io = TcpFrameIo::new(stream);
            let mut handler = (factory)(true);
            let code = drive_link(&mut io, handler.as_mut(), cfg.inactivity).await;
            let _ = events.send(NodeEvent::SessionDone(code)).await;
            busy.store(false, Ordering::Release);
        });
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
    }
}
