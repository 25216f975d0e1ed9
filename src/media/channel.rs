//! Rebindable data channel
//!
//! A session keeps one [`DataChannelSlot`] for its whole life. The transport
//! behind it, a [`ChannelLink`], arrives asynchronously once the peer's data
//! channel opens, and is swapped out on every new connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::ChannelError;
use crate::model::connection::ConnectionId;

/// Transport for text messages on an open data channel.
pub trait ChannelLink: Send + Sync {
    fn send_text(&self, text: &str) -> Result<(), ChannelError>;
}

struct BoundChannel {
    connection: ConnectionId,
    link: Arc<dyn ChannelLink>,
}

pub struct DataChannelSlot {
    label: String,
    bound: Mutex<Option<BoundChannel>>,
}

impl DataChannelSlot {
    pub fn new(label: &str) -> DataChannelSlot {
        DataChannelSlot {
            label: label.to_string(),
            bound: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind the slot to `link` for `connection`, or unbind it with `None`.
    ///
    /// Unbinding only acts when `connection` is the one currently bound, so a
    /// late teardown of an old connection cannot cut off a newer one.
    pub fn set_channel(&self, connection: &ConnectionId, link: Option<Arc<dyn ChannelLink>>) {
        let mut bound = self.bound.lock();
        match link {
            Some(link) => {
                info!("Channel {}: bound to {}", self.label, connection);
                *bound = Some(BoundChannel {
                    connection: connection.clone(),
                    link,
                });
            }
            None => match bound.as_ref() {
                Some(current) if &current.connection == connection => {
                    info!("Channel {}: unbound from {}", self.label, connection);
                    *bound = None;
                }
                _ => debug!(
                    "Channel {}: ignoring unbind for {}, not the bound connection",
                    self.label, connection
                ),
            },
        }
    }

    pub fn send(&self, text: &str) -> Result<(), ChannelError> {
        // Clone the link out so a slow transport doesn't hold the slot lock.
        let link = match self.bound.lock().as_ref() {
            Some(bound) => Arc::clone(&bound.link),
            None => return Err(ChannelError::NotBound),
        };

        link.send_text(text)
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.bound.lock().as_ref().map(|b| b.connection.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    impl ChannelLink for Outbox {
        fn send_text(&self, text: &str) -> Result<(), ChannelError> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn send_without_link_is_reported() {
        let slot = DataChannelSlot::new("input");
        assert!(matches!(slot.send("hi"), Err(ChannelError::NotBound)));
    }

    #[test]
    fn sends_through_bound_link() {
        let slot = DataChannelSlot::new("input");
        let outbox = Arc::new(Outbox::default());
        slot.set_channel(&"a".into(), Some(outbox.clone()));

        slot.send("hello").unwrap();
        assert_eq!(*outbox.0.lock(), vec!["hello".to_string()]);
        assert_eq!(slot.connection(), Some("a".into()));
    }

    #[test]
    fn stale_unbind_keeps_newer_link() {
        let slot = DataChannelSlot::new("input");
        slot.set_channel(&"old".into(), Some(Arc::new(Outbox::default())));
        slot.set_channel(&"new".into(), Some(Arc::new(Outbox::default())));

        slot.set_channel(&"old".into(), None);
        assert_eq!(slot.connection(), Some("new".into()));

        slot.set_channel(&"new".into(), None);
        assert!(!slot.is_bound());
    }
}
