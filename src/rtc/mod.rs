//! str0m backend
//!
//! Implements the session collaborators on top of a sans-IO str0m [`Rtc`]
//! per remote peer. The host owns the UDP socket and drives each [`Peer`]
//! with input and timeouts, the same way it would drive a bare `Rtc`.
//!
//! [`Rtc`]: str0m::Rtc

pub mod peer;
pub mod tracks;

use std::time::Instant;

use crate::model::connection::ConnectionId;

pub use peer::{Peer, PeerChannel};
pub use tracks::PeerRtpSender;

/// What a single [`Peer::poll_output`] call produced for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOutput {
    /// Nothing the host needs to act on.
    Noop,

    /// The peer has no more output until this instant.
    Timeout(Instant),

    /// The peer's data channel opened and any registered slot is now bound.
    ChannelOpen(ConnectionId),
}
