#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: discovery boundary, peer table and link transports.

pub mod discovery;
pub mod peer_table;
pub mod sim;
pub mod tcp;
pub mod transport;

/// Events delivered to the node state machine by the discovery service and
/// the link transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// A peer attached to our advertisement (non-initiator path).
    PeerAttached,
    /// The link layer came up after an associate (initiator path).
    LinkUp,
    /// The link layer dropped.
    LinkDown,
    /// The session channel is established; the session engine owns the
    /// link from here.
    LinkEstablished,
    /// The active session terminated with this exit code.
    SessionDone(i32),
}
