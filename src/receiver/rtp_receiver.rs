//! RTP audio receiver
//!
//! Owns the UDP socket media data arrives on, parses the fixed header,
//! decrypts the payload and forwards `(sequence, payload)` to the
//! session. Binds to an ephemeral port: RAOP clients like VLC hardcode
//! the default recipient port, so a fixed bind would collide the moment
//! two sessions exist.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::protocol::rtp::RtpHeader;
use crate::protocol::sdp::raop::StreamConfig;

/// Maximum UDP datagram size we accept
const MAX_PACKET_SIZE: usize = 2048;

/// One received, decrypted audio packet
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// RTP sequence number
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Decrypted (or cleartext) audio payload
    pub payload: Vec<u8>,
    /// Reception time
    pub received_at: Instant,
}

/// AES-128-CBC payload decryptor
///
/// RAOP restarts CBC from the session IV on every packet and only
/// encrypts whole 16-byte blocks; a trailing partial block passes
/// through in the clear.
pub struct PayloadCipher {
    cipher: Aes128,
    iv: [u8; 16],
}

impl PayloadCipher {
    /// Create a decryptor from the session key and IV
    #[must_use]
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key)),
            iv,
        }
    }

    /// Build from a stream config, if it carries encryption parameters
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Option<Self> {
        match (config.aes_key, config.aes_iv) {
            (Some(key), Some(iv)) => Some(Self::new(key, iv)),
            _ => None,
        }
    }

    /// Decrypt one packet's payload
    #[must_use]
    pub fn decrypt(&self, encrypted: &[u8]) -> Vec<u8> {
        let block_size = 16;
        let encrypted_len = (encrypted.len() / block_size) * block_size;

        let mut decrypted = Vec::with_capacity(encrypted.len());
        let mut prev_block = self.iv;

        for chunk in encrypted[..encrypted_len].chunks_exact(block_size) {
            let mut block = GenericArray::clone_from_slice(chunk);
            self.cipher.decrypt_block(&mut block);

            // CBC: XOR with the previous ciphertext block (IV first)
            for (b, p) in block.iter_mut().zip(prev_block.iter()) {
                *b ^= *p;
            }

            decrypted.extend_from_slice(&block);
            prev_block.copy_from_slice(chunk);
        }

        decrypted.extend_from_slice(&encrypted[encrypted_len..]);
        decrypted
    }
}

/// RTP audio receiver bound to an ephemeral port
pub struct RtpReceiver {
    socket: Arc<UdpSocket>,
    cipher: Option<PayloadCipher>,
    configured: bool,
    packet_tx: mpsc::Sender<AudioPacket>,
    /// Pinned after the first datagram; RTP is connectionless but this
    /// implementation assumes one peer per session
    peer: Option<SocketAddr>,
}

impl RtpReceiver {
    /// Bind the audio socket and report the OS-assigned port
    ///
    /// The returned port is the "ready" signal the handshake server
    /// echoes back to the client in the SETUP transport header.
    ///
    /// # Errors
    /// Returns `io::Error` if binding fails.
    pub async fn bind(
        stream: Option<&StreamConfig>,
        packet_tx: mpsc::Sender<AudioPacket>,
    ) -> std::io::Result<(Self, u16)> {
        let ipv6 = stream.is_some_and(|s| s.is_ipv6);
        let bind_addr = if ipv6 { "[::]:0" } else { "0.0.0.0:0" };

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let port = socket.local_addr()?.port();
        tracing::debug!(port, "RTP receiver listening");

        Ok((
            Self {
                socket,
                cipher: stream.and_then(PayloadCipher::from_config),
                configured: stream.is_some(),
                packet_tx,
                peer: None,
            },
            port,
        ))
    }

    /// Build a receiver around an existing socket (tests)
    #[must_use]
    pub fn from_socket(
        socket: Arc<UdpSocket>,
        stream: Option<&StreamConfig>,
        packet_tx: mpsc::Sender<AudioPacket>,
    ) -> Self {
        Self {
            socket,
            cipher: stream.and_then(PayloadCipher::from_config),
            configured: stream.is_some(),
            packet_tx,
            peer: None,
        }
    }

    /// The pinned remote peer, once the first datagram arrived
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Run the receive loop until the session closes or a fatal error
    ///
    /// # Errors
    /// Returns `StreamError::MissingStreamConfig` if a datagram arrives
    /// before the session resolved its crypto/codec configuration: that
    /// is a handshake ordering bug upstream and must not be swallowed.
    pub async fn run(mut self) -> Result<(), StreamError> {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;

            if self.peer.is_none() {
                self.peer = Some(src);
            }

            if !self.configured {
                tracing::error!("RTP datagram arrived before stream configuration");
                return Err(StreamError::MissingStreamConfig);
            }

            match self.process_datagram(&buf[..len]) {
                Ok(Some(packet)) => {
                    if self.packet_tx.send(packet).await.is_err() {
                        tracing::debug!("audio channel closed, stopping receiver");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("RTP packet error: {e}");
                }
            }
        }
    }

    fn process_datagram(&self, data: &[u8]) -> Result<Option<AudioPacket>, StreamError> {
        if data.len() < RtpHeader::SIZE {
            // Runt datagram, not even a header
            return Ok(None);
        }

        let header = RtpHeader::decode(data)?;
        let body = &data[RtpHeader::SIZE..];

        let payload = match self.cipher {
            Some(ref cipher) => cipher.decrypt(body),
            None => body.to_vec(),
        };

        Ok(Some(AudioPacket {
            sequence: header.sequence,
            timestamp: header.timestamp,
            payload,
            received_at: Instant::now(),
        }))
    }
}
