//! Per-connection session
//!
//! The session is the composition root of the transport core: it owns
//! the packet pool, the reorder engine, the retransmission scheduler and
//! the decode pipeline, and wires the crypto/codec configuration from
//! the handshake into all of them. The session itself is synchronous;
//! [`SessionDriver`] is the single async task that feeds it packets,
//! control events and time.

use std::time::Instant;

use rand::Rng;
use rsa::RsaPrivateKey;
use tokio::sync::{broadcast, mpsc};

use crate::config::ReceiverConfig;
use crate::error::StreamError;
use crate::protocol::rtp::control::RetransmitRequest;
use crate::protocol::sdp::SessionDescription;
use crate::protocol::sdp::raop::{Codec, StreamConfig, derive_stream_config};
use crate::receiver::control::{ControlEvent, ControlTransport};
use crate::receiver::packet_pool::PacketPool;
use crate::receiver::pipeline::{AudioSink, Pipeline};
use crate::receiver::reorder::{AddResult, ReorderEngine, ReorderEvent};
use crate::receiver::retransmit::RetransmitScheduler;
use crate::receiver::rtp_receiver::{AudioPacket, PayloadCipher};

/// Outcome of applying a session description, as an RTSP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSdpStatus {
    /// Description accepted, stream configured
    Ok,
    /// Description malformed or missing required parameters
    BadRequest,
    /// Codec not supported
    UnsupportedMediaType,
}

impl SetSdpStatus {
    /// The RTSP status code to send back
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            SetSdpStatus::Ok => 200,
            SetSdpStatus::BadRequest => 400,
            SetSdpStatus::UnsupportedMediaType => 415,
        }
    }
}

/// Lifecycle signals broadcast to interested observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Crypto/codec configuration resolved from the handshake
    Configured {
        /// Negotiated codec
        codec: Codec,
    },
    /// The first audio datagram arrived and fixed the stream origin
    StreamStarted {
        /// First sequence number seen
        sequence: u16,
        /// First RTP timestamp seen
        timestamp: u32,
    },
    /// A gap was abandoned; one packet of audio is lost
    GapSkipped {
        /// The skipped sequence
        sequence: u16,
    },
    /// The session returned to its pre-streaming state
    Reset,
}

/// Parsed `RTP-Info` header values from a RECORD request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpInfo {
    /// `seq=` value
    pub sequence: Option<u16>,
    /// `rtptime=` value
    pub rtptime: Option<u32>,
}

impl RtpInfo {
    /// Parse a header like `seq=4242;rtptime=88000`
    ///
    /// Unknown fields and unparseable values are ignored; senders vary.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut info = Self::default();
        for field in header.split(';') {
            match field.trim().split_once('=') {
                Some(("seq", v)) => info.sequence = v.trim().parse().ok(),
                Some(("rtptime", v)) => info.rtptime = v.trim().parse().ok(),
                _ => {}
            }
        }
        info
    }
}

fn generate_session_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One receiver connection's transport state
pub struct Session {
    id: String,
    config: ReceiverConfig,
    stream: Option<StreamConfig>,
    pool: PacketPool,
    engine: ReorderEngine,
    scheduler: RetransmitScheduler,
    pipeline: Option<Pipeline>,
    sink: Option<Box<dyn AudioSink>>,
    /// Retransmitted payloads arrive in wire form over the control
    /// channel and are decrypted here, not in the RTP receiver
    cipher: Option<PayloadCipher>,
    /// Timestamp of the notional packet before the first one; zero
    /// means "not yet established"
    initial_rtp_timestamp: u32,
    initial_sequence: u16,
    rtp_info: Option<RtpInfo>,
    /// Control packets dispatched over the session's lifetime
    control_packets_sent: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session with a fresh random identifier
    #[must_use]
    pub fn new(config: ReceiverConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        let engine = ReorderEngine::new(config.retransmit_timeout, config.gap_max_wait);
        let scheduler = RetransmitScheduler::new(config.retransmit_limit, config.retransmit_throttle);

        Self {
            id: generate_session_id(),
            config,
            stream: None,
            pool: PacketPool::new(),
            engine,
            scheduler,
            pipeline: None,
            sink: None,
            cipher: None,
            initial_rtp_timestamp: 0,
            initial_sequence: 0,
            rtp_info: None,
            control_packets_sent: 0,
            events,
        }
    }

    /// Session identifier (16 hex chars)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to lifecycle signals
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The negotiated stream configuration, once set
    #[must_use]
    pub fn stream(&self) -> Option<&StreamConfig> {
        self.stream.as_ref()
    }

    /// Install the audio sink the pipeline will feed
    ///
    /// Must happen before [`Session::set_sdp`]; ignored when
    /// `output_to_speaker` is disabled.
    pub fn set_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.sink = Some(sink);
    }

    /// Apply the handshake's session description
    ///
    /// On success the stream configuration is fixed and the decode
    /// pipeline assembled. On rejection the session keeps its previous
    /// state so a corrected handshake can retry.
    pub fn set_sdp(
        &mut self,
        sdp: &SessionDescription,
        rsa_key: Option<&RsaPrivateKey>,
    ) -> SetSdpStatus {
        match derive_stream_config(sdp, rsa_key) {
            Ok(stream) => {
                tracing::info!(
                    session = %self.id,
                    codec = ?stream.codec,
                    encrypted = stream.is_encrypted(),
                    "stream configured"
                );
                let sink = if self.config.output_to_speaker {
                    self.sink.take()
                } else {
                    None
                };
                self.pipeline = Some(Pipeline::new(&stream, self.config.software_volume, sink));
                self.cipher = PayloadCipher::from_config(&stream);
                let _ = self.events.send(SessionEvent::Configured {
                    codec: stream.codec,
                });
                self.stream = Some(stream);
                SetSdpStatus::Ok
            }
            Err(rejection) => {
                tracing::warn!(session = %self.id, "session description rejected: {rejection}");
                match rejection.status_code() {
                    415 => SetSdpStatus::UnsupportedMediaType,
                    _ => SetSdpStatus::BadRequest,
                }
            }
        }
    }

    /// Record the RECORD request's `RTP-Info` header
    ///
    /// The header names the first packet of the stream, so its values
    /// seed the origin as-is (the back-derivation from timestamp and
    /// frame length is only for streams that start without a header).
    /// An origin that is already established wins.
    pub fn set_rtp_info(&mut self, header: &str) {
        let info = RtpInfo::parse(header);
        self.rtp_info = Some(info);

        if self.initial_rtp_timestamp == 0 {
            if let (Some(seq), Some(rtptime)) = (info.sequence, info.rtptime) {
                self.initial_rtp_timestamp = rtptime;
                self.initial_sequence = seq;
            }
        }
    }

    /// Seed the timestamp origin directly
    ///
    /// An already-established origin is never overwritten; only
    /// [`Session::reset`] clears it.
    pub fn set_initial_timestamp(&mut self, timestamp: u32) {
        if self.initial_rtp_timestamp == 0 {
            self.initial_rtp_timestamp = timestamp;
        }
    }

    /// Timestamp origin of the stream; zero until established
    #[must_use]
    pub fn initial_rtp_timestamp(&self) -> u32 {
        self.initial_rtp_timestamp
    }

    /// Sequence origin of the stream
    #[must_use]
    pub fn initial_sequence(&self) -> u16 {
        self.initial_sequence
    }

    /// The last `RTP-Info` header applied, if any
    #[must_use]
    pub fn rtp_info(&self) -> Option<RtpInfo> {
        self.rtp_info
    }

    /// Adjust the software volume stage, if configured
    pub fn set_volume(&mut self, gain: f32) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_volume(gain);
        }
    }

    /// Feed one received audio packet into the transport core
    ///
    /// # Errors
    /// Returns `StreamError` when the decode pipeline fails.
    pub fn handle_audio_packet(&mut self, packet: &AudioPacket) -> Result<(), StreamError> {
        if self.initial_rtp_timestamp == 0 {
            let frame_length = self.stream.as_ref().map_or(352, StreamConfig::frame_length);
            self.initial_rtp_timestamp = packet.timestamp.wrapping_sub(frame_length);
            self.initial_sequence = packet.sequence.wrapping_sub(1);
            let _ = self.events.send(SessionEvent::StreamStarted {
                sequence: packet.sequence,
                timestamp: packet.timestamp,
            });
        }

        self.add_sequence(packet.sequence, &packet.payload, packet.received_at)
    }

    /// Insert one sequence's payload, emitting any unblocked run
    ///
    /// # Errors
    /// Returns `StreamError` when the decode pipeline fails.
    pub fn add_sequence(
        &mut self,
        seq: u16,
        chunk: &[u8],
        now: Instant,
    ) -> Result<(), StreamError> {
        match self.engine.add(seq, now) {
            AddResult::Accepted(events) if events.is_empty() => {
                // Buffered behind a gap; park the payload in the pool
                let mut packet = self.pool.acquire();
                packet.fill(seq, chunk);
                self.pool.retain(packet);
                Ok(())
            }
            AddResult::Accepted(events) => self.emit_events(&events, Some((seq, chunk))),
            AddResult::Duplicate => {
                tracing::debug!(seq, "duplicate packet dropped");
                Ok(())
            }
            AddResult::Stale => {
                tracing::debug!(seq, "stale packet dropped");
                Ok(())
            }
            AddResult::Resync(events) => {
                // The buffered window belongs to the abandoned sequence
                // space, as do any in-flight retransmit requests
                self.pool.release_retained();
                self.scheduler.reset();
                self.emit_events(&events, Some((seq, chunk)))
            }
        }
    }

    /// Advance gap timers; expired gaps become retransmit requests or
    /// skips
    ///
    /// # Errors
    /// Returns `StreamError` when the decode pipeline fails.
    pub fn poll(&mut self, now: Instant) -> Result<(), StreamError> {
        let events = self.engine.poll(now);
        for event in &events {
            if let ReorderEvent::Missing(seq) = event {
                self.scheduler.request(*seq);
            }
        }
        self.emit_events(&events, None)
    }

    /// Take the next retransmit request due for dispatch, encoded for
    /// the wire
    pub fn poll_dispatch(&mut self, now: Instant) -> Option<(u16, [u8; RetransmitRequest::SIZE])> {
        let seq = self.scheduler.poll_dispatch(now)?;
        tracing::debug!(session = %self.id, seq, "requesting retransmission");
        Some((seq, RetransmitRequest { sequence: seq }.encode()))
    }

    /// When the driver should next attempt a dispatch
    #[must_use]
    pub fn next_dispatch_at(&self, now: Instant) -> Option<Instant> {
        self.scheduler.next_dispatch_at(now)
    }

    /// The dispatch for `seq` reached the transport
    pub fn dispatch_sent(&mut self, seq: u16) {
        self.control_packets_sent += 1;
        self.scheduler.mark_sent(seq);
    }

    /// The dispatch for `seq` failed to send
    pub fn dispatch_failed(&mut self, seq: u16) {
        tracing::warn!(session = %self.id, seq, "retransmit request send failed");
        self.scheduler.fail(seq);
    }

    /// Handle a retransmit response from the control channel
    ///
    /// Responses that match no outstanding request (unsolicited, or from
    /// before a reset) are ignored.
    ///
    /// # Errors
    /// Returns `StreamError` when the decode pipeline fails.
    pub fn handle_retransmit_response(
        &mut self,
        seq: u16,
        chunk: &[u8],
        now: Instant,
    ) -> Result<(), StreamError> {
        if self.scheduler.complete(seq) {
            match self.cipher.as_ref() {
                Some(cipher) => {
                    let payload = cipher.decrypt(chunk);
                    self.add_sequence(seq, &payload, now)
                }
                None => self.add_sequence(seq, chunk, now),
            }
        } else {
            tracing::debug!(seq, "unmatched retransmit response ignored");
            Ok(())
        }
    }

    /// Drop all transport state back to pre-streaming
    ///
    /// Identity and the negotiated stream configuration survive; origin,
    /// buffers, gap timers and in-flight retransmits do not. Responses
    /// to pre-reset requests will be ignored.
    pub fn reset(&mut self) {
        tracing::info!(session = %self.id, "session reset");
        self.engine.reset();
        self.scheduler.reset();
        self.pool.release_retained();
        self.initial_rtp_timestamp = 0;
        self.initial_sequence = 0;
        self.rtp_info = None;
        let _ = self.events.send(SessionEvent::Reset);
    }

    /// Control packets dispatched so far
    #[must_use]
    pub fn control_packets_sent(&self) -> u64 {
        self.control_packets_sent
    }

    fn emit_events(
        &mut self,
        events: &[ReorderEvent],
        direct: Option<(u16, &[u8])>,
    ) -> Result<(), StreamError> {
        for event in events {
            match event {
                ReorderEvent::Emit(seq) => match direct {
                    // The arriving packet itself: its payload never
                    // entered the pool
                    Some((direct_seq, chunk)) if direct_seq == *seq => {
                        self.write_chunk(chunk)?;
                    }
                    _ => {
                        if let Some(packet) = self.pool.take_retained(*seq) {
                            self.write_chunk(packet.payload())?;
                            self.pool.release(packet);
                        }
                    }
                },
                ReorderEvent::Missing(_) => {}
                ReorderEvent::Skipped(seq) => {
                    let _ = self.events.send(SessionEvent::GapSkipped { sequence: *seq });
                }
            }
        }
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.write(chunk)?;
        }
        Ok(())
    }
}

/// Interval at which the driver advances gap and throttle timers
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(5);

/// The session's single async task
///
/// Everything that touches the session funnels through this loop, so the
/// session itself needs no locking: audio packets from the RTP receiver,
/// retransmit responses from the control channel and the periodic timer
/// tick are serialized by `select!`.
pub struct SessionDriver<T: ControlTransport> {
    session: Session,
    audio_rx: mpsc::Receiver<AudioPacket>,
    control_rx: mpsc::Receiver<ControlEvent>,
    transport: T,
}

impl<T: ControlTransport> SessionDriver<T> {
    /// Assemble a driver around a session and its channels
    #[must_use]
    pub fn new(
        session: Session,
        audio_rx: mpsc::Receiver<AudioPacket>,
        control_rx: mpsc::Receiver<ControlEvent>,
        transport: T,
    ) -> Self {
        Self {
            session,
            audio_rx,
            control_rx,
            transport,
        }
    }

    /// Run until both input channels close or the pipeline fails
    ///
    /// # Errors
    /// Returns `StreamError` from the decode pipeline.
    pub async fn run(mut self) -> Result<Session, StreamError> {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                packet = self.audio_rx.recv() => match packet {
                    Some(packet) => self.session.handle_audio_packet(&packet)?,
                    None => break,
                },
                event = self.control_rx.recv() => match event {
                    Some(ControlEvent::RetransmitResponse(response)) => {
                        self.session.handle_retransmit_response(
                            response.sequence,
                            &response.body,
                            Instant::now(),
                        )?;
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    self.session.poll(Instant::now())?;
                }
            }

            self.dispatch_pending().await;
        }

        Ok(self.session)
    }

    async fn dispatch_pending(&mut self) {
        while let Some((seq, buf)) = self.session.poll_dispatch(Instant::now()) {
            match self.transport.send(&buf).await {
                Ok(()) => self.session.dispatch_sent(seq),
                Err(e) => {
                    tracing::warn!(seq, "control send failed: {e}");
                    self.session.dispatch_failed(seq);
                }
            }
        }
    }
}
