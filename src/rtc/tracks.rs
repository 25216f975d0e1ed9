//! Outbound track state for a str0m peer
//!
//! Each sender registered with a [`Peer`](super::Peer) becomes one send-only
//! media line. The line goes through SDP negotiation before the sender is
//! attached to it.

use std::sync::Arc;

use parking_lot::Mutex;
use str0m::media::Mid;

use crate::broker::Registration;
use crate::error::SenderError;
use crate::media::{MediaSender, MediaTrack, RtpSender};
use crate::model::params::SendParameters;

/// A registered sender and the media line carrying it.
pub struct TrackOut {
    /// The sender that was registered with the peer
    pub(crate) sender: Arc<dyn MediaSender>,
    /// The track the sender produced at registration
    pub(crate) track: MediaTrack,
    /// Current state of the media line
    pub(crate) state: TrackOutState,
    /// Handle given to the sender once the line is open
    pub(crate) rtp: Option<Arc<PeerRtpSender>>,
    /// Receipt shared with the session that registered the sender
    pub(crate) registration: Registration,
}

/// The negotiation state of an outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutState {
    /// Track needs to be opened in the next SDP negotiation
    ToOpen,
    /// Track negotiation is in progress with the given Mid
    Negotiating(Mid),
    /// Track is fully negotiated and open for media transmission
    Open(Mid),
}

impl TrackOut {
    pub(crate) fn new(
        sender: Arc<dyn MediaSender>,
        track: MediaTrack,
        registration: Registration,
    ) -> TrackOut {
        TrackOut {
            sender,
            track,
            state: TrackOutState::ToOpen,
            rtp: None,
            registration,
        }
    }

    /// Gets the media ID (Mid) for this track, if assigned.
    pub fn mid(&self) -> Option<Mid> {
        match self.state {
            TrackOutState::ToOpen => None,
            TrackOutState::Negotiating(m) | TrackOutState::Open(m) => Some(m),
        }
    }
}

/// Encoder parameters for one open media line.
///
/// str0m packetises already encoded media, so these parameters are read back
/// by whatever feeds the line, and their bitrates steer the peer's bandwidth
/// estimator.
#[derive(Debug)]
pub struct PeerRtpSender {
    mid: Mid,
    parameters: Mutex<SendParameters>,
}

impl PeerRtpSender {
    pub(crate) fn new(mid: Mid) -> PeerRtpSender {
        PeerRtpSender {
            mid,
            parameters: Mutex::new(SendParameters::single_layer()),
        }
    }

    pub fn mid(&self) -> Mid {
        self.mid
    }
}

impl RtpSender for PeerRtpSender {
    fn parameters(&self) -> SendParameters {
        self.parameters.lock().clone()
    }

    fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError> {
        if parameters.encodings.is_empty() {
            return Err(SenderError::Parameters(format!(
                "media line {:?} needs at least one encoding",
                self.mid
            )));
        }
        *self.parameters.lock() = parameters;
        Ok(())
    }
}
