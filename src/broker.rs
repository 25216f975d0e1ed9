use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BrokerError;
use crate::media::channel::DataChannelSlot;
use crate::media::MediaSender;
use crate::model::connection::ConnectionId;

/// Registry that maps connection ids to the producers streaming to them.
///
/// A broker owns negotiation with the remote peer. Once it has a transport for
/// a registered sender it attaches it with
/// [`MediaSender::set_target`]; for a registered channel it calls
/// [`DataChannelSlot::set_channel`]. Every accepted registration hands back a
/// [`Registration`]. The owner withdraws through it, and the broker must not
/// attach anything for a withdrawn registration afterwards.
pub trait Broker {
    fn add_sender(
        &mut self,
        connection: &ConnectionId,
        sender: Arc<dyn MediaSender>,
    ) -> Result<Registration, BrokerError>;

    fn add_channel(
        &mut self,
        connection: &ConnectionId,
        channel: Arc<DataChannelSlot>,
    ) -> Result<Registration, BrokerError>;
}

/// Receipt for one accepted registration. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    withdrawn: Arc<AtomicBool>,
}

impl Registration {
    pub fn new() -> Registration {
        Registration::default()
    }

    pub fn withdraw(&self) {
        self.withdrawn.store(true, Ordering::SeqCst);
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn.load(Ordering::SeqCst)
    }
}
