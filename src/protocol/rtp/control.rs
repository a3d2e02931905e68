//! Control-channel packets: retransmit requests and responses

use super::{PayloadType, RtpDecodeError, RtpHeader};

/// Apple vendor "retransmit" query, serialized as a fixed 8-byte packet:
///
/// ```text
/// byte 0    0x80            marker/version bits
/// byte 1    0x80 | 0x55     marker + retransmit opcode
/// bytes 2-3 0x0001          fixed
/// bytes 4-5 sequence        big-endian, first sequence wanted
/// bytes 6-7 0x0001          count of sequences wanted, always one
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Sequence number to re-request
    pub sequence: u16,
}

impl RetransmitRequest {
    /// Wire size of a retransmit request
    pub const SIZE: usize = 8;

    /// Encode to the fixed 8-byte wire form
    #[must_use]
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];

        buf[0] = 0x80;
        buf[1] = 0x80 | PayloadType::RetransmitRequest as u8;
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..6].copy_from_slice(&self.sequence.to_be_bytes());
        buf[6..8].copy_from_slice(&1u16.to_be_bytes());

        buf
    }
}

/// A retransmit response from the sender
///
/// The reply wraps the original RTP audio packet behind a 4-byte control
/// header, so the embedded header's sequence number identifies which
/// request this answers.
#[derive(Debug, Clone)]
pub struct RetransmitResponse {
    /// Sequence number of the re-sent packet
    pub sequence: u16,
    /// RTP timestamp of the re-sent packet
    pub timestamp: u32,
    /// Audio payload, still in its on-the-wire (possibly encrypted) form
    pub body: Vec<u8>,
}

/// Control header size preceding the embedded audio packet
const RESPONSE_HEADER: usize = 4;

impl RetransmitResponse {
    /// Parse a control datagram as a retransmit response
    ///
    /// Returns `Ok(None)` for control packets of other types (sync
    /// announcements and the like), which the transport core ignores.
    ///
    /// # Errors
    /// Returns `RtpDecodeError` if the datagram claims to be a response
    /// but is too short to hold the embedded packet.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, RtpDecodeError> {
        if data.len() < RESPONSE_HEADER {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: RESPONSE_HEADER,
                have: data.len(),
            });
        }

        if PayloadType::from_byte(data[1]) != Some(PayloadType::RetransmitResponse) {
            return Ok(None);
        }

        let inner = &data[RESPONSE_HEADER..];
        let header = RtpHeader::decode(inner)?;

        Ok(Some(Self {
            sequence: header.sequence,
            timestamp: header.timestamp,
            body: inner[RtpHeader::SIZE..].to_vec(),
        }))
    }
}
