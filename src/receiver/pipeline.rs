//! Decode pipeline
//!
//! Ordered packets flow through a fixed sequence of stages: codec
//! decode, optional software volume, optional sink. Stages the session
//! was not configured with are simply skipped; the stage order itself
//! never changes.

use std::io;

use crate::protocol::sdp::raop::{Codec, StreamConfig};

/// Decodes one packet's payload into PCM
pub trait AudioDecoder: Send {
    /// Decode a single payload
    ///
    /// # Errors
    /// Returns `io::Error` if the payload is not a valid frame.
    fn decode(&mut self, payload: &[u8]) -> io::Result<Vec<u8>>;
}

/// Consumes decoded PCM (a speaker, a file, a test capture)
pub trait AudioSink: Send {
    /// Write one chunk of PCM
    ///
    /// # Errors
    /// Returns `io::Error` if the device rejects the write.
    fn write(&mut self, pcm: &[u8]) -> io::Result<()>;
}

/// Identity decoder for uncompressed L16 streams
pub struct PcmPassthrough;

impl AudioDecoder for PcmPassthrough {
    fn decode(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

/// Software gain applied to interleaved signed 16-bit little-endian PCM
pub struct VolumeStage {
    gain: f32,
}

impl VolumeStage {
    /// Create a volume stage at unity gain
    #[must_use]
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    /// Set the linear gain factor
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    /// Current linear gain
    #[must_use]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Scale every sample in place
    pub fn apply(&self, pcm: &mut [u8]) {
        if (self.gain - 1.0).abs() < f32::EPSILON {
            return;
        }

        for sample in pcm.chunks_exact_mut(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            #[allow(clippy::cast_possible_truncation)]
            let scaled = (f32::from(value) * self.gain) as i16;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}

impl Default for VolumeStage {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled per-session pipeline
pub struct Pipeline {
    decoder: Box<dyn AudioDecoder>,
    volume: Option<VolumeStage>,
    sink: Option<Box<dyn AudioSink>>,
}

impl Pipeline {
    /// Assemble a pipeline for the negotiated stream
    ///
    /// The codec picks the decoder; `software_volume` and the sink are
    /// the host's choice. ALAC payloads are passed through here as
    /// well: the magic-cookie handoff in
    /// [`AlacParameters::magic_cookie`](crate::protocol::sdp::raop::AlacParameters::magic_cookie)
    /// lets an external decoder own the actual decompression.
    #[must_use]
    pub fn new(
        stream: &StreamConfig,
        software_volume: bool,
        sink: Option<Box<dyn AudioSink>>,
    ) -> Self {
        let decoder: Box<dyn AudioDecoder> = match stream.codec {
            Codec::Pcm | Codec::Alac => Box::new(PcmPassthrough),
        };

        Self {
            decoder,
            volume: software_volume.then(VolumeStage::new),
            sink,
        }
    }

    /// Build directly from parts (tests)
    #[must_use]
    pub fn from_parts(
        decoder: Box<dyn AudioDecoder>,
        volume: Option<VolumeStage>,
        sink: Option<Box<dyn AudioSink>>,
    ) -> Self {
        Self {
            decoder,
            volume,
            sink,
        }
    }

    /// Adjust the software volume, if the stage exists
    pub fn set_volume(&mut self, gain: f32) {
        if let Some(volume) = self.volume.as_mut() {
            volume.set_gain(gain);
        }
    }

    /// Push one ordered payload through decode, volume and sink
    ///
    /// # Errors
    /// Returns `io::Error` from the decoder or the sink.
    pub fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut pcm = self.decoder.decode(payload)?;

        if let Some(volume) = &self.volume {
            volume.apply(&mut pcm);
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.write(&pcm)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>);

    impl AudioSink for Capture {
        fn write(&mut self, pcm: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().push(pcm.to_vec());
            Ok(())
        }
    }

    #[test]
    fn passthrough_reaches_sink_unchanged() {
        let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::from_parts(
            Box::new(PcmPassthrough),
            None,
            Some(Box::new(Capture(captured.clone()))),
        );

        pipeline.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn volume_halves_samples() {
        let mut volume = VolumeStage::new();
        volume.set_gain(0.5);

        let mut pcm = 1000i16.to_le_bytes().to_vec();
        volume.apply(&mut pcm);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 500);
    }

    #[test]
    fn unity_gain_leaves_samples_untouched() {
        let volume = VolumeStage::new();
        let original = vec![0x34, 0x12, 0xCD, 0xAB];
        let mut pcm = original.clone();
        volume.apply(&mut pcm);
        assert_eq!(pcm, original);
    }

    #[test]
    fn missing_sink_is_a_no_op() {
        let mut pipeline = Pipeline::from_parts(Box::new(PcmPassthrough), None, None);
        assert!(pipeline.write(&[0; 32]).is_ok());
    }
}
