//! Outbound media senders
//!
//! This module defines the contract between a session and the things that
//! actually put media on the wire. A [`MediaSender`] produces one track and
//! may stream it to several peer connections at once; for each connection it
//! is handed an [`RtpSender`] that exposes that connection's encoder
//! parameters.

pub mod channel;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use str0m::media::MediaKind;
use tracing::{debug, info};

use crate::error::SenderError;
use crate::model::connection::ConnectionId;
use crate::model::params::SendParameters;

/// Per-connection handle onto the encoder feeding one outbound track.
pub trait RtpSender: Send + Sync {
    fn parameters(&self) -> SendParameters;

    fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError>;
}

pub type SharedRtpSender = Arc<dyn RtpSender>;

/// Something that streams one media track to bound peer connections.
pub trait MediaSender: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn label(&self) -> &str;

    /// The outbound track, created on first use and cached afterwards.
    fn track(&self) -> Result<MediaTrack, SenderError>;

    /// Attach (`Some`) or detach (`None`) this sender for a connection.
    /// Attaching is the point at which streaming to that connection starts.
    fn set_target(&self, connection: &ConnectionId, sender: Option<SharedRtpSender>);

    /// Pause or resume output without touching any attachment.
    fn set_active(&self, active: bool);

    fn is_active(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> TrackId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        TrackId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// An outbound media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    id: TrackId,
    kind: MediaKind,
    label: String,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, label: &str) -> MediaTrack {
        MediaTrack {
            id: TrackId::next(),
            kind,
            label: label.to_string(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Bookkeeping shared by every [`MediaSender`] implementation: the cached
/// track, the per-connection RTP senders and the connection that most
/// recently started streaming.
pub struct SenderCore {
    label: String,
    kind: MediaKind,
    active: AtomicBool,
    state: Mutex<CoreState>,
}

#[derive(Default)]
struct CoreState {
    track: Option<MediaTrack>,
    senders: HashMap<ConnectionId, SharedRtpSender>,
    started: Option<ConnectionId>,
}

impl SenderCore {
    pub fn new(kind: MediaKind, label: &str) -> SenderCore {
        SenderCore {
            label: label.to_string(),
            kind,
            active: AtomicBool::new(true),
            state: Mutex::new(CoreState::default()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Return the cached track, or create it with `create` and cache it.
    /// A failed creation leaves nothing cached.
    pub fn track_or_create<F>(&self, create: F) -> Result<MediaTrack, SenderError>
    where
        F: FnOnce() -> Result<MediaTrack, SenderError>,
    {
        let mut state = self.state.lock();
        if let Some(track) = &state.track {
            return Ok(track.clone());
        }

        let track = create()?;
        state.track = Some(track.clone());
        Ok(track)
    }

    pub fn cached_track(&self) -> Option<MediaTrack> {
        self.state.lock().track.clone()
    }

    pub fn set_target(&self, connection: &ConnectionId, sender: Option<SharedRtpSender>) {
        let mut state = self.state.lock();
        match sender {
            Some(sender) => {
                state.senders.insert(connection.clone(), sender);
                state.started = Some(connection.clone());
                info!("Sender {}: streaming started for {}", self.label, connection);
            }
            None => {
                if state.senders.remove(connection).is_some() {
                    info!("Sender {}: detached from {}", self.label, connection);
                } else {
                    debug!("Sender {}: {} was not attached", self.label, connection);
                }
                if state.started.as_ref() == Some(connection) {
                    state.started = None;
                }
            }
        }
    }

    /// The connection that most recently started streaming, if it is still
    /// attached.
    pub fn started_connection(&self) -> Option<ConnectionId> {
        self.state.lock().started.clone()
    }

    pub fn sender_for(&self, connection: &ConnectionId) -> Option<SharedRtpSender> {
        self.state.lock().senders.get(connection).cloned()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<_> = self.state.lock().senders.keys().cloned().collect();
        connections.sort();
        connections
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// An audio source streamed as its own track.
///
/// Audio capture happens elsewhere; this only tracks where the audio goes.
pub struct AudioStreamSender {
    core: SenderCore,
}

impl AudioStreamSender {
    pub fn new(label: &str) -> AudioStreamSender {
        AudioStreamSender {
            core: SenderCore::new(MediaKind::Audio, label),
        }
    }

    pub fn core(&self) -> &SenderCore {
        &self.core
    }
}

impl MediaSender for AudioStreamSender {
    fn kind(&self) -> MediaKind {
        self.core.kind()
    }

    fn label(&self) -> &str {
        self.core.label()
    }

    fn track(&self) -> Result<MediaTrack, SenderError> {
        self.core
            .track_or_create(|| Ok(MediaTrack::new(MediaKind::Audio, self.core.label())))
    }

    fn set_target(&self, connection: &ConnectionId, sender: Option<SharedRtpSender>) {
        self.core.set_target(connection, sender)
    }

    fn set_active(&self, active: bool) {
        self.core.set_active(active)
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }
}
