use std::collections::VecDeque;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use str0m::bwe::Bitrate;
use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::channel::{ChannelData, ChannelId};
use str0m::media::Direction;
use str0m::{Event, IceConnectionState, Input, Output, Rtc};
use tracing::{debug, info, warn};

use crate::broker::{Broker, Registration};
use crate::error::{BrokerError, ChannelError};
use crate::media::channel::{ChannelLink, DataChannelSlot};
use crate::media::{MediaSender, RtpSender};
use crate::model::connection::ConnectionId;
use crate::rtc::tracks::{PeerRtpSender, TrackOut, TrackOutState};
use crate::rtc::PeerOutput;

type Outbox = Arc<Mutex<VecDeque<String>>>;

/// One remote peer connection driven by str0m.
///
/// The peer is the [`Broker`] for its own connection id: senders registered
/// with it are offered to the remote side over the data channel, and a
/// registered [`DataChannelSlot`] is bound once the channel opens.
pub struct Peer {
    pub id: ConnectionId,
    pub rtc: Rtc,
    pending: Option<SdpPendingOffer>,
    cid: Option<ChannelId>,
    tracks_out: Vec<TrackOut>,
    channel: Option<(Arc<DataChannelSlot>, Registration)>,
    outbox: Outbox,
    open: Arc<AtomicBool>,
    applied_bitrate: Option<u64>,
}

/// [`ChannelLink`] that queues text for the peer to write on its next poll.
pub struct PeerChannel {
    connection: ConnectionId,
    outbox: Outbox,
    open: Arc<AtomicBool>,
}

impl ChannelLink for PeerChannel {
    fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed(self.connection.clone()));
        }
        self.outbox.lock().push_back(text.to_string());
        Ok(())
    }
}

impl Peer {
    pub fn new(id: ConnectionId, rtc: Rtc) -> Peer {
        Peer {
            id,
            rtc,
            pending: None,
            cid: None,
            tracks_out: vec![],
            channel: None,
            outbox: Arc::default(),
            open: Arc::new(AtomicBool::new(true)),
            applied_bitrate: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.rtc.is_alive()
    }

    pub fn accepts(&self, input: &Input) -> bool {
        self.rtc.accepts(input)
    }

    /// Number of registered senders whose media line is open.
    pub fn open_tracks(&self) -> usize {
        self.tracks_out
            .iter()
            .filter(|t| matches!(t.state, TrackOutState::Open(_)))
            .count()
    }

    /// Number of senders registered and not withdrawn.
    pub fn registered_tracks(&self) -> usize {
        self.tracks_out
            .iter()
            .filter(|t| !t.registration.is_withdrawn())
            .count()
    }

    /// Forget registrations their owner has withdrawn.
    fn drop_withdrawn(&mut self) {
        let before = self.tracks_out.len();
        self.tracks_out.retain(|t| !t.registration.is_withdrawn());
        let dropped = before - self.tracks_out.len();
        if dropped > 0 {
            debug!("Peer ({}): dropped {} withdrawn senders", self.id, dropped);
        }

        if self
            .channel
            .as_ref()
            .is_some_and(|(_, registration)| registration.is_withdrawn())
        {
            debug!("Peer ({}): channel registration withdrawn", self.id);
            self.channel = None;
        }
    }

    pub fn disconnect(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.rtc.disconnect();
    }

    pub fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Peer ({}) disconnected: {:?}", self.id, e);
            self.disconnect();
        }
    }

    pub fn poll_output(&mut self, socket: &UdpSocket) -> PeerOutput {
        if !self.rtc.is_alive() {
            return PeerOutput::Noop;
        }

        self.drop_withdrawn();
        self.flush_outbox();
        self.apply_desired_bitrate();

        // Registered senders need SDP negotiation with the remote peer.
        if self.negotiate_if_needed() {
            return PeerOutput::Noop;
        }

        match self.rtc.poll_output() {
            Ok(output) => self.handle_output(output, socket),
            Err(e) => {
                warn!("Peer ({}) poll_output failed: {:?}", self.id, e);
                self.disconnect();
                PeerOutput::Noop
            }
        }
    }

    fn handle_output(&mut self, output: Output, socket: &UdpSocket) -> PeerOutput {
        match output {
            Output::Transmit(transmit) => {
                if let Err(e) = socket.send_to(&transmit.contents, transmit.destination) {
                    warn!("Peer ({}) failed to send UDP data: {:?}", self.id, e);
                }
                PeerOutput::Noop
            }
            Output::Timeout(t) => PeerOutput::Timeout(t),
            Output::Event(e) => match e {
                Event::IceConnectionStateChange(state) => {
                    info!("Peer ({}): ICE state = {:?}", self.id, state);
                    if state == IceConnectionState::Disconnected {
                        // No ICE restart; a disconnected peer is gone.
                        self.disconnect();
                    }
                    PeerOutput::Noop
                }
                Event::ChannelOpen(cid, name) => self.handle_channel_open(cid, name),
                Event::ChannelData(data) => self.handle_channel_data(data),
                Event::ChannelClose(cid) => {
                    if self.cid == Some(cid) {
                        info!("Peer ({}): data channel closed", self.id);
                        self.cid = None;
                        self.open.store(false, Ordering::SeqCst);
                    }
                    PeerOutput::Noop
                }
                Event::MediaEgressStats(stats) => {
                    debug!("Peer ({}): {:?}", self.id, stats);
                    PeerOutput::Noop
                }
                other => {
                    debug!("Peer ({}): event {:?}", self.id, other);
                    PeerOutput::Noop
                }
            },
        }
    }

    fn handle_channel_open(&mut self, cid: ChannelId, name: String) -> PeerOutput {
        info!(
            "Peer ({}): data channel opened - Name: '{}', ID: {:?}",
            self.id, name, cid
        );
        if self.cid.is_some() {
            warn!("Peer ({}) already had a channel ID: {:?}", self.id, self.cid);
        }
        self.cid = Some(cid);
        self.open.store(true, Ordering::SeqCst);
        self.bind_channel();

        PeerOutput::ChannelOpen(self.id.clone())
    }

    fn bind_channel(&self) {
        let (Some((slot, registration)), Some(_)) = (&self.channel, self.cid) else {
            return;
        };
        if registration.is_withdrawn() {
            return;
        }

        let link = PeerChannel {
            connection: self.id.clone(),
            outbox: Arc::clone(&self.outbox),
            open: Arc::clone(&self.open),
        };
        slot.set_channel(&self.id, Some(Arc::new(link)));
    }

    fn flush_outbox(&mut self) {
        let Some(cid) = self.cid else {
            return;
        };

        let queued: Vec<String> = self.outbox.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }

        let Some(mut channel) = self.rtc.channel(cid) else {
            warn!(
                "Peer ({}): dropping {} messages, channel {:?} is gone",
                self.id,
                queued.len(),
                cid
            );
            return;
        };

        for text in queued {
            if let Err(e) = channel.write(false, text.as_bytes()) {
                warn!("Peer ({}): channel write failed: {:?}", self.id, e);
            }
        }
    }

    /// Sum of the maximum bitrates of open, visible senders.
    fn desired_bitrate(&self) -> u64 {
        self.tracks_out
            .iter()
            .filter(|t| t.sender.is_active() && !t.registration.is_withdrawn())
            .filter_map(|t| t.rtp.as_ref())
            .map(|rtp| rtp.parameters().total_max_bitrate())
            .sum()
    }

    /// Steer the bandwidth estimator towards [`Peer::desired_bitrate`].
    fn apply_desired_bitrate(&mut self) {
        let total = self.desired_bitrate();

        if total == 0 || self.applied_bitrate == Some(total) {
            return;
        }

        self.rtc.bwe().set_desired_bitrate(Bitrate::bps(total));
        self.applied_bitrate = Some(total);
        info!("Peer ({}): desired bitrate {} bps", self.id, total);
    }

    fn negotiate_if_needed(&mut self) -> bool {
        if self.cid.is_none() || self.pending.is_some() {
            // Don't negotiate if there is no data channel, or if we have pending changes already.
            return false;
        }

        let mut change = self.rtc.sdp_api();

        for track in &mut self.tracks_out {
            if let TrackOutState::ToOpen = track.state {
                let mid = change.add_media(
                    track.sender.kind(),
                    Direction::SendOnly,
                    Some(self.id.to_string()),
                    Some(track.track.id().to_string()),
                    None,
                );
                track.state = TrackOutState::Negotiating(mid);
            }
        }

        if !change.has_changes() {
            return false;
        }

        let Some((offer, pending)) = change.apply() else {
            return false;
        };

        let Some(mut channel) = self.cid.and_then(|id| self.rtc.channel(id)) else {
            return false;
        };

        let json = match serde_json::to_string(&offer) {
            Ok(json) => json,
            Err(e) => {
                warn!("Peer ({}): failed to serialise offer: {:?}", self.id, e);
                return false;
            }
        };
        if let Err(e) = channel.write(false, json.as_bytes()) {
            warn!("Peer ({}): failed to send offer: {:?}", self.id, e);
            return false;
        }

        self.pending = Some(pending);

        true
    }

    fn handle_channel_data(&mut self, d: ChannelData) -> PeerOutput {
        if let Ok(offer) = serde_json::from_slice::<'_, SdpOffer>(&d.data) {
            info!("Peer ({}): received SDP offer via data channel", self.id);
            self.handle_offer(offer);
            return PeerOutput::Noop;
        }

        if let Ok(answer) = serde_json::from_slice::<'_, SdpAnswer>(&d.data) {
            info!("Peer ({}): received SDP answer via data channel", self.id);
            self.handle_answer(answer);
            return PeerOutput::Noop;
        }

        debug!(
            "Peer ({}): {} bytes of client input on channel {:?}",
            self.id,
            d.data.len(),
            d.id
        );
        PeerOutput::Noop
    }

    fn handle_offer(&mut self, offer: SdpOffer) {
        let answer = match self.rtc.sdp_api().accept_offer(offer) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Peer ({}): offer rejected: {:?}", self.id, e);
                return;
            }
        };

        // Keep local track state in sync, cancelling any pending negotiation
        // so we can redo it after this offer is handled.
        self.pending = None;
        for track in &mut self.tracks_out {
            if let TrackOutState::Negotiating(_) = track.state {
                track.state = TrackOutState::ToOpen;
            }
        }

        let Some(mut channel) = self.cid.and_then(|id| self.rtc.channel(id)) else {
            warn!("Peer ({}): no channel to answer on", self.id);
            return;
        };

        match serde_json::to_string(&answer) {
            Ok(json) => {
                if let Err(e) = channel.write(false, json.as_bytes()) {
                    warn!("Peer ({}): failed to send answer: {:?}", self.id, e);
                }
            }
            Err(e) => warn!("Peer ({}): failed to serialise answer: {:?}", self.id, e),
        }
    }

    fn handle_answer(&mut self, answer: SdpAnswer) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        if let Err(e) = self.rtc.sdp_api().accept_answer(pending, answer) {
            warn!("Peer ({}): answer rejected: {:?}", self.id, e);
            return;
        }

        self.open_negotiated();
    }

    /// Open every line that was part of the accepted negotiation and hand its
    /// sender an RTP handle, unless the registration was withdrawn meanwhile.
    fn open_negotiated(&mut self) {
        for track in &mut self.tracks_out {
            if let TrackOutState::Negotiating(mid) = track.state {
                track.state = TrackOutState::Open(mid);
                if track.registration.is_withdrawn() {
                    continue;
                }

                let rtp = Arc::new(PeerRtpSender::new(mid));
                track.rtp = Some(Arc::clone(&rtp));
                track.sender.set_target(&self.id, Some(rtp));
            }
        }
    }

    fn check_connection(&self, connection: &ConnectionId) -> Result<(), BrokerError> {
        if connection != &self.id {
            return Err(BrokerError::UnknownConnection(connection.clone()));
        }
        if !self.rtc.is_alive() {
            return Err(BrokerError::Closed(connection.clone()));
        }
        Ok(())
    }
}

impl Broker for Peer {
    fn add_sender(
        &mut self,
        connection: &ConnectionId,
        sender: Arc<dyn MediaSender>,
    ) -> Result<Registration, BrokerError> {
        self.check_connection(connection)?;
        self.drop_withdrawn();

        if let Some(existing) = self
            .tracks_out
            .iter()
            .find(|t| Arc::ptr_eq(&t.sender, &sender))
        {
            debug!("Peer ({}): {} already registered", self.id, sender.label());
            return Ok(existing.registration.clone());
        }

        let track = sender
            .track()
            .map_err(|e| BrokerError::Rejected(format!("{}: {}", sender.label(), e)))?;

        info!(
            "Peer ({}): registered {:?} sender {}",
            self.id,
            sender.kind(),
            sender.label()
        );
        let registration = Registration::new();
        self.tracks_out
            .push(TrackOut::new(sender, track, registration.clone()));
        Ok(registration)
    }

    fn add_channel(
        &mut self,
        connection: &ConnectionId,
        channel: Arc<DataChannelSlot>,
    ) -> Result<Registration, BrokerError> {
        self.check_connection(connection)?;

        let registration = Registration::new();
        self.channel = Some((channel, registration.clone()));
        // The str0m channel may already be open if the offer carried it.
        self.bind_channel();
        Ok(registration)
    }
}
