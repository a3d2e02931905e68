//! # raop-stream
//!
//! Media-transport core for RAOP (`AirPlay` audio) receivers.
//!
//! The crate accepts encrypted, UDP-delivered, out-of-order RTP audio
//! packets and turns them into a gapless, strictly ordered byte stream
//! for a decode pipeline:
//!
//! - **Packet pool**: recycles packet buffers so steady-state reception
//!   does not allocate per datagram
//! - **Reorder engine**: buffers by sequence number, emits contiguous
//!   runs in order, detects gaps and bounds how long a single lost
//!   packet may stall playback
//! - **Retransmission scheduler**: rate-limited, deduplicated resend
//!   requests over the RTP control channel
//! - **Session**: per-connection composition root wiring crypto/codec
//!   negotiation, reordering, loss recovery and the decode pipeline
//!
//! The RTSP handshake server, the actual codecs and the audio output
//! device are external collaborators; they interact with this crate
//! through [`protocol::sdp::SessionDescription`], the
//! [`receiver::pipeline`] traits and the session lifecycle signals.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error types
pub mod error;

/// Receiver configuration
pub mod config;

/// Wire formats (RTP and SDP)
pub mod protocol;

/// Receiver-side transport: pool, reordering, retransmission, sessions
pub mod receiver;

// Re-exports
pub use config::ReceiverConfig;
pub use error::StreamError;
pub use protocol::sdp::raop::{Codec, StreamConfig};
pub use receiver::session::{Session, SessionDriver, SessionEvent, SetSdpStatus};
pub use receiver::session_manager::SessionManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
