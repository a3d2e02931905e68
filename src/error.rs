use std::io;

use thiserror::Error;

use crate::protocol::rtp::RtpDecodeError;
use crate::protocol::sdp::raop::SdpRejection;

/// Errors that can occur in the media-transport core
#[derive(Debug, Error)]
pub enum StreamError {
    /// IO error on one of the UDP sockets
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid RTP packet
    #[error("invalid RTP packet: {0}")]
    InvalidPacket(#[from] RtpDecodeError),

    /// An RTP datagram arrived before the session's stream config was
    /// resolved. This indicates a handshake ordering bug upstream and is
    /// fatal for the session.
    #[error("RTP datagram received before stream configuration was set")]
    MissingStreamConfig,

    /// Session-description rejection (surfaced to the handshake server
    /// as an RTSP status code)
    #[error("session description rejected: {0}")]
    Rejected(#[from] SdpRejection),

    /// A component channel closed, the session is shutting down
    #[error("channel closed")]
    ChannelClosed,

    /// Session not found in the registry
    #[error("session not found: {0}")]
    SessionNotFound(String),
}
