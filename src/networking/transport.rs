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

//! Link transport boundary.
//!
//! A link is a single-peered, full-duplex, message-framed channel. The
//! transport owns sockets and framing; the protocol lives behind
//! [`LinkHandler`] upcalls. Guarantees: in-order delivery, one close per
//! open, no upcall re-entrancy per link, frames ≤ 4 KiB.

use crate::sync::wire::FRAME_CAP;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the peer.
    #[error("connect failed")]
    Connect,
    /// Socket/channel failure mid-link.
    #[error("link io")]
    Io,
    /// Frame exceeded the cap.
    #[error("oversize frame")]
    Oversize,
    /// A session is already active.
    #[error("link busy")]
    Busy,
    /// No link to operate on.
    #[error("no link")]
    Closed,
}

/// Handler verdict after an upcall.
#[derive(Debug)]
pub enum Action {
    /// Send one frame to the peer.
    Reply(Vec<u8>),
    /// Tear the link down.
    Close,
    /// Nothing to transmit; wait for the peer.
    NoOp,
}

/// Protocol side of a link. One handler instance per link.
pub trait LinkHandler: Send {
    /// Link established. The initiator transmits first.
    fn on_open(&mut self) -> Action;

    /// One inbound frame.
    fn on_data(&mut self, frame: &[u8]) -> Action;

    /// Link gone; `transport_code` is 0 for an orderly remote close and
    /// nonzero for a transport fault. Returns the session exit code.
    fn on_close(&mut self, transport_code: i32) -> i32;
}

/// Builds the protocol handler for a fresh link; the argument tells the
/// handler whether this side initiated.
pub type HandlerFactory =
    std::sync::Arc<dyn Fn(bool) -> Box<dyn LinkHandler> + Send + Sync>;

/// Framed byte channel under a driven link.
#[async_trait]
pub trait FrameIo: Send {
    /// Transmit one frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one frame; `None` on orderly remote close.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Transport control surface used by the node state machine.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Initiator path: dial the currently associated peer and run a session
    /// over the resulting link. Completion arrives as a node event.
    async fn open(&self) -> Result<(), TransportError>;

    /// Drop any active link and stop dialing.
    async fn shutdown(&self);
}

/// Transport-level close code for faults (timeouts, resets).
pub const LINK_FAULT: i32 = -1;

/// Drive one link to completion: deliver `on_open`/`on_data` upcalls,
/// transmit replies, enforce the receive inactivity budget, and finally
/// deliver exactly one `on_close`. Returns the session exit code.
pub async fn drive_link(
    io: &mut dyn FrameIo,
    handler: &mut dyn LinkHandler,
    inactivity: Duration,
) -> i32 {
    match handler.on_open() {
        Action::Reply(frame) => {
            if io.send(&frame).await.is_err() {
                return handler.on_close(LINK_FAULT);
            }
        }
        Action::Close => return handler.on_close(0),
        Action::NoOp => {}
    }

    loop {
        let inbound = match tokio::time::timeout(inactivity, io.recv()).await {
            Err(_) => {
                debug!("link receive inactivity budget exhausted");
                return handler.on_close(LINK_FAULT);
            }
            Ok(Err(_)) => return handler.on_close(LINK_FAULT),
            Ok(Ok(None)) => return handler.on_close(0),
            Ok(Ok(Some(frame))) => frame,
        };

        match handler.on_data(&inbound) {
            Action::Reply(frame) => {
                if frame.len() > FRAME_CAP {
                    return handler.on_close(LINK_FAULT);
                }
                if io.send(&frame).await.is_err() {
                    return handler.on_close(LINK_FAULT);
                }
            }
            Action::Close => return handler.on_close(0),
            Action::NoOp => {}
        }
    }
}
