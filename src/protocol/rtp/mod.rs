//! RTP packet framing for RAOP audio
//!
//! RAOP carries audio in standard 12-byte RTP headers over UDP. The
//! control channel reuses the same framing with vendor payload types.

pub mod control;


use thiserror::Error;

/// RTP payload types used by RAOP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    /// Timing sync announcement on the control channel
    Sync = 0x54,
    /// Retransmit request (sent by us)
    RetransmitRequest = 0x55,
    /// Retransmit response (carries the re-sent audio packet)
    RetransmitResponse = 0x56,
    /// Realtime audio data
    AudioRealtime = 0x60,
}

impl PayloadType {
    /// Parse from the second header byte (marker bit masked off)
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x7F {
            0x54 => Some(Self::Sync),
            0x55 => Some(Self::RetransmitRequest),
            0x56 => Some(Self::RetransmitResponse),
            0x60 => Some(Self::AudioRealtime),
            _ => None,
        }
    }
}

/// Fixed 12-byte RTP header
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    /// Marker bit
    pub marker: bool,
    /// Payload type byte (7 bits, unvalidated — RAOP senders are sloppy
    /// about the audio payload type, so the receiver does not reject on it)
    pub payload_type: u8,
    /// Sequence number (big-endian u16 at offset 2)
    pub sequence: u16,
    /// Timestamp (big-endian u32 at offset 4)
    pub timestamp: u32,
    /// Synchronization source (big-endian u32 at offset 8)
    pub ssrc: u32,
}

impl RtpHeader {
    /// Standard RTP header size
    pub const SIZE: usize = 12;

    /// Decode a header from the start of a datagram
    ///
    /// # Errors
    /// Returns `RtpDecodeError::BufferTooSmall` if fewer than 12 bytes
    /// are available.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            marker: (buf[1] >> 7) & 0x01 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Encode to the 12-byte wire form (version 2, no padding/extension)
    #[must_use]
    pub fn encode(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];

        buf[0] = 0x80;
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        buf
    }
}

/// Distance from `a` forward to `b` in 16-bit sequence space
#[must_use]
pub fn seq_distance(a: u16, b: u16) -> u16 {
    b.wrapping_sub(a)
}

/// Is `b` ahead of (or equal to) `a`, modulo wraparound?
///
/// The smaller of the two wraparound directions decides: a distance
/// below 0x8000 counts as ahead.
#[must_use]
pub fn seq_ahead(a: u16, b: u16) -> bool {
    seq_distance(a, b) < 0x8000
}

/// RTP decode errors
#[derive(Debug, Error)]
pub enum RtpDecodeError {
    /// Datagram shorter than the fixed header
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },
}
