//! Data models shared by sessions, senders and the rtc backend
//!
//! This module contains the plain value types passed between the session
//! layer and its collaborators: connection identity, stream geometry, encoder
//! parameters and the data channel envelope.

pub mod connection;
pub mod envelope;
pub mod params;
pub mod view;
