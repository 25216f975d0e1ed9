//! Per-client stereo media sessions on top of WebRTC.
//!
//! A [`ClientSession`] owns the outbound media of one remote viewer: a left
//! and right eye [`MultiViewSender`], any number of audio senders and one
//! reliable data channel. Sessions register that bundle with a [`Broker`]
//! under a connection id when the peer connection comes up, and withdraw it
//! again when the peer leaves.

pub mod broker;
pub mod config;
pub mod error;
pub mod headless;
pub mod media;
pub mod model;
pub mod multiview;
pub mod rtc;
pub mod session;

pub use broker::{Broker, Registration};
pub use error::{BrokerError, ChannelError, ConfigError, SenderError, SessionError};
pub use media::{channel::DataChannelSlot, AudioStreamSender, MediaSender, RtpSender};
pub use model::connection::ConnectionId;
pub use model::view::{Eye, StreamingSize, Viewport};
pub use multiview::{MultiViewSender, RenderConfig};
pub use session::{events::ClientEvents, ClientSession, SessionHandle};
