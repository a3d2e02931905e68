//! Crypto/codec configuration derived from the session description
//!
//! Runs once per ANNOUNCE: picks the codec, parses ALAC framing
//! parameters, unwraps the RSA-protected AES session key and records the
//! IV. Everything the RTP receive path needs is fixed here, before the
//! first datagram arrives.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use thiserror::Error;

use super::SessionDescription;

/// Reasons a session description is rejected
///
/// These map to RTSP status codes and are reported back to the handshake
/// server; the session stays usable for a retried handshake.
#[derive(Debug, Error)]
pub enum SdpRejection {
    /// Codec descriptor names neither L16 nor AppleLossless
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Description carries no media section
    #[error("no media section in session description")]
    MissingMedia,

    /// ALAC fmtp config is not the expected 11-integer block
    #[error("malformed fmtp config: {0}")]
    MalformedFmtp(String),

    /// Key or IV present but undecodable or the wrong size
    #[error("invalid encryption parameters: {0}")]
    InvalidKey(String),

    /// An RSA-wrapped key was sent but no private key is available
    #[error("rsaaeskey present but no RSA private key configured")]
    NoPrivateKey,
}

impl SdpRejection {
    /// RTSP status code reported to the handshake server
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            SdpRejection::UnsupportedCodec(_) => 415,
            _ => 400,
        }
    }
}

/// Audio codec for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// 16-bit linear PCM
    #[default]
    Pcm,
    /// Apple Lossless
    Alac,
}

/// ALAC magic-cookie parameters from the fmtp config string
///
/// Field order is fixed by the ALAC cookie layout; see
/// `ALACMagicCookieDescription.txt` in the Apple sources.
#[derive(Debug, Clone)]
pub struct AlacParameters {
    /// Samples per frame
    pub frame_length: u32,
    /// Compatible version
    pub compatible_version: u8,
    /// Bits per sample
    pub bit_depth: u8,
    /// Rice history mult
    pub pb: u8,
    /// Rice initial history
    pub mb: u8,
    /// Rice limit
    pub kb: u8,
    /// Channel count
    pub channels: u8,
    /// Max run
    pub max_run: u16,
    /// Max frame size in bytes
    pub max_frame_bytes: u32,
    /// Average bit rate
    pub avg_bit_rate: u32,
    /// Sample rate
    pub sample_rate: u32,
}

impl AlacParameters {
    /// Parse the 11 integers of an fmtp config string, e.g.
    /// `352 0 16 40 10 14 2 255 0 0 44100`
    ///
    /// # Errors
    /// Returns `SdpRejection::MalformedFmtp` unless exactly 11 integer
    /// fields are present.
    pub fn parse(config: &str) -> Result<Self, SdpRejection> {
        let fields: Vec<u32> = config
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| SdpRejection::MalformedFmtp(config.to_string()))?;

        if fields.len() != 11 {
            return Err(SdpRejection::MalformedFmtp(config.to_string()));
        }

        #[allow(clippy::cast_possible_truncation, reason = "cookie fields are narrow by layout")]
        Ok(Self {
            frame_length: fields[0],
            compatible_version: fields[1] as u8,
            bit_depth: fields[2] as u8,
            pb: fields[3] as u8,
            mb: fields[4] as u8,
            kb: fields[5] as u8,
            channels: fields[6] as u8,
            max_run: fields[7] as u16,
            max_frame_bytes: fields[8],
            avg_bit_rate: fields[9],
            sample_rate: fields[10],
        })
    }

    /// Serialize the 24-byte ALAC magic cookie handed to a decoder
    #[must_use]
    pub fn magic_cookie(&self) -> Vec<u8> {
        let mut cookie = Vec::with_capacity(24);
        cookie.extend_from_slice(&self.frame_length.to_be_bytes());
        cookie.push(self.compatible_version);
        cookie.push(self.bit_depth);
        cookie.push(self.pb);
        cookie.push(self.mb);
        cookie.push(self.kb);
        cookie.push(self.channels);
        cookie.extend_from_slice(&self.max_run.to_be_bytes());
        cookie.extend_from_slice(&self.max_frame_bytes.to_be_bytes());
        cookie.extend_from_slice(&self.avg_bit_rate.to_be_bytes());
        cookie.extend_from_slice(&self.sample_rate.to_be_bytes());
        cookie
    }
}

/// Per-session stream configuration, fixed at ANNOUNCE time
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Active codec
    pub codec: Codec,
    /// ALAC framing parameters, present when `codec` is ALAC
    pub alac: Option<AlacParameters>,
    /// The advertised rtpmap codec string, when one was sent
    pub audio_codec: Option<String>,
    /// Unwrapped AES session key; absent means a cleartext session
    pub aes_key: Option<[u8; 16]>,
    /// AES IV matching `aes_key`
    pub aes_iv: Option<[u8; 16]>,
    /// Client connected over IPv6
    pub is_ipv6: bool,
}

impl StreamConfig {
    /// Samples per packet, used to back-derive the initial timestamp
    /// from the first datagram
    #[must_use]
    pub fn frame_length(&self) -> u32 {
        self.alac.as_ref().map_or(352, |a| a.frame_length)
    }

    /// Is payload decryption required?
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.aes_key.is_some()
    }
}

/// Supported codec markers in rtpmap descriptors
const CODEC_MARKERS: [&str; 2] = ["L16", "AppleLossless"];

fn validate_codec(descriptor: &str) -> Result<(), SdpRejection> {
    if CODEC_MARKERS.iter().any(|m| descriptor.contains(m)) {
        Ok(())
    } else {
        Err(SdpRejection::UnsupportedCodec(descriptor.to_string()))
    }
}

fn decode_fixed<const N: usize>(b64: &str, what: &str) -> Result<[u8; N], SdpRejection> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|_| SdpRejection::InvalidKey(format!("{what} is not valid base64")))?;

    bytes.as_slice().try_into().map_err(|_| {
        SdpRejection::InvalidKey(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

/// Derive the session's stream configuration from a parsed description
///
/// Absence of both `rsaaeskey` and `aesiv` is a valid cleartext session,
/// not an error; non-airtunes senders do not encrypt.
///
/// # Errors
/// Returns `SdpRejection` (to be mapped onto an RTSP status code) when
/// the codec is unsupported or the description is malformed.
pub fn derive_stream_config(
    sdp: &SessionDescription,
    rsa_key: Option<&RsaPrivateKey>,
) -> Result<StreamConfig, SdpRejection> {
    let media = sdp.first_media().ok_or(SdpRejection::MissingMedia)?;

    let mut config = StreamConfig {
        is_ipv6: sdp.is_ipv6(),
        ..StreamConfig::default()
    };

    if let Some(fmtp) = media.fmtp.first() {
        config.alac = Some(AlacParameters::parse(&fmtp.config)?);
        config.codec = Codec::Alac;
    } else {
        config.codec = Codec::Pcm;
    }

    let mut wrapped_key: Option<&str> = None;
    let mut iv: Option<&str> = None;

    if media.vendor.is_empty() {
        // No vendor attributes; fall back to the plain rtpmap descriptor
        if let Some(rtp) = media.rtp.first() {
            validate_codec(&rtp.codec)?;
            config.audio_codec = Some(rtp.codec.clone());
        }
    } else {
        for attr in &media.vendor {
            match attr.key.as_str() {
                "rsaaeskey" => wrapped_key = Some(&attr.value),
                "aesiv" => iv = Some(&attr.value),
                "rtpmap" => {
                    validate_codec(&attr.value)?;
                    config.audio_codec = Some(attr.value.clone());
                }
                _ => {}
            }
        }
    }

    if let Some(wrapped) = wrapped_key {
        let key = rsa_key.ok_or(SdpRejection::NoPrivateKey)?;
        let iv = iv.ok_or_else(|| SdpRejection::InvalidKey("rsaaeskey without aesiv".into()))?;

        config.aes_key = Some(unwrap_aes_key(wrapped, key)?);
        config.aes_iv = Some(decode_fixed::<16>(iv, "aesiv")?);
    }

    Ok(config)
}

/// Unwrap the RSA-OAEP protected AES session key
fn unwrap_aes_key(b64: &str, key: &RsaPrivateKey) -> Result<[u8; 16], SdpRejection> {
    let wrapped = BASE64
        .decode(b64.trim())
        .map_err(|_| SdpRejection::InvalidKey("rsaaeskey is not valid base64".into()))?;

    let raw = key
        .decrypt(Oaep::<Sha1>::new(), &wrapped)
        .map_err(|e| SdpRejection::InvalidKey(format!("RSA-OAEP unwrap failed: {e}")))?;

    raw.as_slice().try_into().map_err(|_| {
        SdpRejection::InvalidKey(format!("AES key must be 16 bytes, got {}", raw.len()))
    })
}
