//! Typed session-description model
//!
//! The RTSP handshake server parses the ANNOUNCE body and hands the
//! transport core this structured form. Keeping the shape explicit here
//! (instead of probing a loosely-typed attribute bag at each use site)
//! means the crypto/codec derivation in [`raop`] either validates the
//! whole description once or rejects it with a status code.

pub mod raop;

/// A parsed session description for one client connection
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    /// Connection data (`c=` line)
    pub connection: Option<SdpConnection>,
    /// Media sections (`m=` blocks); RAOP senders produce exactly one
    pub media: Vec<MediaDescription>,
}

/// Connection data from the `c=` line
#[derive(Debug, Clone)]
pub struct SdpConnection {
    /// IP version of the address type (4 or 6)
    pub version: u8,
}

/// One media section of the description
#[derive(Debug, Clone, Default)]
pub struct MediaDescription {
    /// `a=rtpmap:` entries
    pub rtp: Vec<RtpMap>,
    /// `a=fmtp:` entries
    pub fmtp: Vec<FormatParameters>,
    /// Vendor attribute lines the SDP grammar does not know
    /// (`rsaaeskey:…`, `aesiv:…`, `rtpmap:…` as emitted by iTunes)
    pub vendor: Vec<VendorAttribute>,
}

/// An `rtpmap` payload mapping
#[derive(Debug, Clone)]
pub struct RtpMap {
    /// RTP payload type number
    pub payload: u8,
    /// Codec descriptor, e.g. `AppleLossless` or `L16/44100/2`
    pub codec: String,
}

/// Codec format parameters (`fmtp`)
#[derive(Debug, Clone)]
pub struct FormatParameters {
    /// RTP payload type number
    pub payload: u8,
    /// Space-separated parameter string, e.g. the ALAC magic cookie
    /// `352 0 16 40 10 14 2 255 0 0 44100`
    pub config: String,
}

/// A vendor attribute line split at the first colon
#[derive(Debug, Clone)]
pub struct VendorAttribute {
    /// Attribute key, e.g. `rsaaeskey`
    pub key: String,
    /// Raw attribute value
    pub value: String,
}

impl SessionDescription {
    /// The first (and for RAOP, only) media section
    #[must_use]
    pub fn first_media(&self) -> Option<&MediaDescription> {
        self.media.first()
    }

    /// Is this an IPv6 connection?
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.version == 6)
    }
}

impl MediaDescription {
    /// Look up a vendor attribute by key
    #[must_use]
    pub fn vendor_value(&self, key: &str) -> Option<&str> {
        self.vendor
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

impl VendorAttribute {
    /// Build from a raw `key:value` line
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        match line.split_once(':') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: value.to_string(),
            },
            None => Self {
                key: line.to_string(),
                value: String::new(),
            },
        }
    }
}
