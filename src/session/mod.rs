//! Per-client media session
//!
//! A [`ClientSession`] is the bundle of media a single remote viewer
//! receives: a stereo pair of [`MultiViewSender`]s, zero or more audio
//! senders, and one reliable data channel. The bundle is registered with a
//! [`Broker`] as a unit on [`bind`](ClientSession::bind) and withdrawn as a
//! unit on [`unbind`](ClientSession::unbind).
//!
//! All mutation happens through `&mut self`; hosts that serve clients from
//! several threads share sessions as a [`SessionHandle`], whose mutex is the
//! only synchronisation a session needs.

pub mod events;
pub mod priority;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Registration};
use crate::error::{BrokerError, SessionError};
use crate::media::channel::{ChannelLink, DataChannelSlot};
use crate::media::MediaSender;
use crate::model::connection::ConnectionId;
use crate::model::envelope::EventEnvelope;
use crate::model::view::{Eye, StreamingSize};
use crate::multiview::MultiViewSender;
use crate::session::priority::PriorityBuffers;

pub type SessionHandle = Arc<Mutex<ClientSession>>;

const DEFAULT_CHANNEL_LABEL: &str = "input";

pub struct ClientSession {
    connection: Option<ConnectionId>,
    left: Arc<MultiViewSender>,
    right: Arc<MultiViewSender>,
    audio: Vec<Arc<dyn MediaSender>>,
    channel: Arc<DataChannelSlot>,
    dimensions: StreamingSize,
    object_level_streaming: bool,
    priority: Option<PriorityBuffers>,
    active: bool,
    registrations: Vec<Registration>,
}

#[derive(Default)]
pub struct ClientSessionBuilder {
    left: Option<Arc<MultiViewSender>>,
    right: Option<Arc<MultiViewSender>>,
    audio: Vec<Arc<dyn MediaSender>>,
    channel: Option<Arc<DataChannelSlot>>,
    object_level_streaming: bool,
}

impl ClientSessionBuilder {
    pub fn left(mut self, sender: Arc<MultiViewSender>) -> Self {
        self.left = Some(sender);
        self
    }

    pub fn right(mut self, sender: Arc<MultiViewSender>) -> Self {
        self.right = Some(sender);
        self
    }

    /// Append an audio sender. Registration follows the order of these calls.
    pub fn audio(mut self, sender: Arc<dyn MediaSender>) -> Self {
        self.audio.push(sender);
        self
    }

    pub fn channel(mut self, channel: Arc<DataChannelSlot>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn object_level_streaming(mut self, enabled: bool) -> Self {
        self.object_level_streaming = enabled;
        self
    }

    pub fn build(self) -> Result<ClientSession, SessionError> {
        let left = self.left.ok_or(SessionError::MissingVideoSender(Eye::Left))?;
        let right = self.right.ok_or(SessionError::MissingVideoSender(Eye::Right))?;
        let channel = self
            .channel
            .unwrap_or_else(|| Arc::new(DataChannelSlot::new(DEFAULT_CHANNEL_LABEL)));

        let dimensions = left.streaming_size();
        let priority = self
            .object_level_streaming
            .then(|| PriorityBuffers::new(dimensions));

        Ok(ClientSession {
            connection: None,
            left,
            right,
            audio: self.audio,
            channel,
            dimensions,
            object_level_streaming: self.object_level_streaming,
            priority,
            active: false,
            registrations: vec![],
        })
    }
}

impl ClientSession {
    pub fn builder() -> ClientSessionBuilder {
        ClientSessionBuilder::default()
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    pub fn stream_dimensions(&self) -> StreamingSize {
        self.dimensions
    }

    pub fn left(&self) -> &Arc<MultiViewSender> {
        &self.left
    }

    pub fn right(&self) -> &Arc<MultiViewSender> {
        &self.right
    }

    pub fn audio(&self) -> &[Arc<dyn MediaSender>] {
        &self.audio
    }

    pub fn channel(&self) -> &Arc<DataChannelSlot> {
        &self.channel
    }

    pub fn object_level_streaming(&self) -> bool {
        self.object_level_streaming
    }

    pub fn priority_buffers(&self) -> Option<&PriorityBuffers> {
        self.priority.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns whether the flag changed.
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        std::mem::replace(&mut self.active, active) != active
    }

    /// Register the whole bundle with `broker` under `connection`.
    ///
    /// Registration order is right eye, left eye, audio senders in order, then
    /// the data channel. If the broker refuses any of them, everything this
    /// call registered is withdrawn again and the session stays unbound.
    /// Binding an already bound session replaces the old binding.
    pub fn bind(
        &mut self,
        connection: &ConnectionId,
        broker: &mut dyn Broker,
    ) -> Result<(), SessionError> {
        let left_size = self.left.streaming_size();
        let right_size = self.right.streaming_size();
        if left_size.is_empty() {
            return Err(SessionError::MissingStreamingSize(Eye::Left));
        }
        if right_size.is_empty() {
            return Err(SessionError::MissingStreamingSize(Eye::Right));
        }

        if let Some(previous) = self.connection.clone() {
            warn!(
                "Session bound to {} is being rebound to {}; releasing the old binding",
                previous, connection
            );
            self.unbind(&previous);
        }

        if left_size.width != right_size.width {
            error!(
                "Different camera streaming width detected: left {} right {}",
                left_size.width, right_size.width
            );
        }
        if left_size.height != right_size.height {
            error!(
                "Different camera streaming height detected: left {} right {}",
                left_size.height, right_size.height
            );
        }

        let senders: Vec<Arc<dyn MediaSender>> = [
            Arc::clone(&self.right) as Arc<dyn MediaSender>,
            Arc::clone(&self.left) as Arc<dyn MediaSender>,
        ]
        .into_iter()
        .chain(self.audio.iter().cloned())
        .collect();

        let mut receipts = Vec::with_capacity(senders.len() + 1);
        for (registered, sender) in senders.iter().enumerate() {
            match broker.add_sender(connection, Arc::clone(sender)) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    let what = format!("{} sender", sender.label());
                    return Err(Self::roll_back(
                        connection,
                        &senders[..registered],
                        &receipts,
                        what,
                        e,
                    ));
                }
            }
        }

        match broker.add_channel(connection, Arc::clone(&self.channel)) {
            Ok(receipt) => receipts.push(receipt),
            Err(e) => {
                let what = format!("channel {}", self.channel.label());
                return Err(Self::roll_back(connection, &senders, &receipts, what, e));
            }
        }

        if self.dimensions != left_size {
            self.dimensions = left_size;
            if self.object_level_streaming {
                self.priority = Some(PriorityBuffers::new(left_size));
            }
        }

        self.registrations = receipts;
        self.connection = Some(connection.clone());
        info!(
            "Session bound to {}: {} senders and channel at {}",
            connection,
            senders.len(),
            self.dimensions
        );
        Ok(())
    }

    fn roll_back(
        connection: &ConnectionId,
        registered: &[Arc<dyn MediaSender>],
        receipts: &[Registration],
        what: String,
        source: BrokerError,
    ) -> SessionError {
        warn!(
            "Registering {} for {} failed ({}); withdrawing {} earlier registrations",
            what,
            connection,
            source,
            receipts.len()
        );
        for receipt in receipts {
            receipt.withdraw();
        }
        for sender in registered {
            sender.set_target(connection, None);
        }

        SessionError::Registration {
            connection: connection.clone(),
            what,
            source,
        }
    }

    /// Show or hide every sender without touching registrations.
    pub fn set_visibility(&mut self, visible: bool) {
        self.left.set_active(visible);
        self.right.set_active(visible);
        for sender in &self.audio {
            sender.set_active(visible);
        }
        debug!("Session visibility set to {}", visible);
    }

    /// Send `{"event": .., "payload": ..}` over the data channel.
    pub fn send_event(&self, event: &str, payload: &str) -> Result<(), SessionError> {
        let text = EventEnvelope::new(event, payload).to_text()?;
        self.channel.send(&text)?;
        Ok(())
    }

    /// Swap the transport behind the data channel. Media senders are untouched.
    pub fn rebind_data_channel(
        &mut self,
        connection: &ConnectionId,
        link: Option<Arc<dyn ChannelLink>>,
    ) {
        self.channel.set_channel(connection, link);
    }

    /// Withdraw every registration made for `connection`.
    ///
    /// Does nothing and returns `false` if the session is not bound to
    /// `connection`, which makes duplicate or late disconnect notices harmless.
    pub fn unbind(&mut self, connection: &ConnectionId) -> bool {
        if self.connection.as_ref() != Some(connection) {
            debug!(
                "Ignoring unbind for {}, session is bound to {:?}",
                connection, self.connection
            );
            return false;
        }

        for receipt in self.registrations.drain(..) {
            receipt.withdraw();
        }
        self.right.set_target(connection, None);
        self.left.set_target(connection, None);
        for sender in &self.audio {
            sender.set_target(connection, None);
        }
        self.channel.set_channel(connection, None);

        self.connection = None;
        info!("Session unbound from {}", connection);
        true
    }

    /// Per-frame hook. Copies the latest macroblock priorities into each eye's
    /// buffer and hands them to the eye senders.
    ///
    /// Returns `false` when object-level streaming is off, no source is
    /// available, or the source is too short for the bound dimensions.
    pub fn on_tick(&mut self, source: Option<&[u32]>) -> bool {
        if !self.object_level_streaming {
            return false;
        }
        let (Some(buffers), Some(source)) = (self.priority.as_mut(), source) else {
            return false;
        };
        if !buffers.refresh(source) {
            return false;
        }

        self.left.apply_priority_map(buffers.left());
        self.right.apply_priority_map(buffers.right());
        true
    }
}
