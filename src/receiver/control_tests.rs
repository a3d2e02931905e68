use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use super::control::{ControlChannel, ControlEvent, ControlTransport};
use super::pipeline::AudioSink;
use super::rtp_receiver::AudioPacket;
use super::session::{Session, SessionDriver, SetSdpStatus};
use crate::config::ReceiverConfig;
use crate::protocol::rtp::RtpHeader;
use crate::protocol::sdp::{
    FormatParameters, MediaDescription, SdpConnection, SessionDescription, VendorAttribute,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("raop_stream=debug")
        .with_test_writer()
        .try_init();
}

type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

struct CaptureSink(Captured);

impl AudioSink for CaptureSink {
    fn write(&mut self, pcm: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }
}

fn alac_sdp() -> SessionDescription {
    SessionDescription {
        connection: Some(SdpConnection { version: 4 }),
        media: vec![MediaDescription {
            rtp: vec![],
            fmtp: vec![FormatParameters {
                payload: 96,
                config: "352 0 16 40 10 14 2 255 0 0 44100".to_string(),
            }],
            vendor: vec![VendorAttribute::from_line("rtpmap:96 AppleLossless")],
        }],
    }
}

fn audio_packet(seq: u16, timestamp: u32, payload: &[u8]) -> AudioPacket {
    AudioPacket {
        sequence: seq,
        timestamp,
        payload: payload.to_vec(),
        received_at: Instant::now(),
    }
}

/// A retransmit response datagram wrapping one audio packet
fn response_datagram(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0x80, 0x80 | 0x56, 0x00, 0x01];
    data.extend_from_slice(
        &RtpHeader {
            marker: false,
            payload_type: 0x60,
            sequence: seq,
            timestamp: u32::from(seq) * 352,
            ssrc: 0,
        }
        .encode(),
    );
    data.extend_from_slice(payload);
    data
}

#[tokio::test]
async fn requests_and_responses_share_one_socket() {
    init_tracing();

    let socket = Arc::new(assert_ok!(UdpSocket::bind("127.0.0.1:0").await));
    let local = assert_ok!(socket.local_addr());

    let sender = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
    let sender_addr = assert_ok!(sender.local_addr());

    let channel = ControlChannel::from_socket(socket, sender_addr);
    assert_eq!(assert_ok!(channel.local_port()), local.port());

    let (events_tx, mut events_rx) = mpsc::channel(8);
    let listener = channel.clone();
    tokio::spawn(async move { listener.run(events_tx).await });

    assert_ok!(channel.send(&[0x80, 0xD5, 0x00, 0x01, 0x01, 0xF4, 0x00, 0x01]).await);

    let mut buf = [0u8; 64];
    let (len, src) = tokio::time::timeout(Duration::from_secs(1), sender.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], &[0x80, 0xD5, 0x00, 0x01, 0x01, 0xF4, 0x00, 0x01]);
    // The request left the same socket the receive loop listens on, so
    // a client replying to the query's source port reaches us
    assert_eq!(src, local);

    assert_ok!(sender.send_to(&response_datagram(500, &[1, 2, 3]), src).await);

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let ControlEvent::RetransmitResponse(response) = event;
    assert_eq!(response.sequence, 500);
    assert_eq!(response.body, vec![1, 2, 3]);
}

#[tokio::test]
async fn driver_recovers_a_lost_packet_end_to_end() {
    init_tracing();

    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let config = ReceiverConfig::default().retransmit_timeout(Duration::from_millis(20));
    let mut session = Session::new(config);
    session.set_sink(Box::new(CaptureSink(captured.clone())));
    assert_eq!(session.set_sdp(&alac_sdp(), None), SetSdpStatus::Ok);

    let socket = Arc::new(assert_ok!(UdpSocket::bind("127.0.0.1:0").await));
    let sender = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
    let sender_addr = assert_ok!(sender.local_addr());

    let channel = ControlChannel::from_socket(socket, sender_addr);
    let (control_tx, control_rx) = mpsc::channel(8);
    let listener = channel.clone();
    tokio::spawn(async move { listener.run(control_tx).await });

    let (audio_tx, audio_rx) = mpsc::channel(8);
    let driver = SessionDriver::new(session, audio_rx, control_rx, channel);
    let driver_handle = tokio::spawn(driver.run());

    // Deliver 10 and 12; 11 is lost
    assert_ok!(audio_tx.send(audio_packet(10, 3520, &[10])).await);
    assert_ok!(audio_tx.send(audio_packet(12, 4224, &[12])).await);

    // The gap timer expires and the driver dispatches a request for 11
    let mut buf = [0u8; 64];
    let (len, src) = tokio::time::timeout(Duration::from_secs(2), sender.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], &[0x80, 0xD5, 0x00, 0x01, 0x00, 0x0B, 0x00, 0x01]);

    assert_ok!(sender.send_to(&response_datagram(11, &[11]), src).await);

    // The response flows through the control loop into the session and
    // unblocks ordered emission
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if captured.lock().unwrap().len() == 3 {
            break;
        }
        assert!(Instant::now() < deadline, "retransmitted packet never emitted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*captured.lock().unwrap(), vec![vec![10], vec![11], vec![12]]);

    // Closing the audio channel shuts the driver down cleanly
    drop(audio_tx);
    let session = tokio::time::timeout(Duration::from_secs(1), driver_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(session.control_packets_sent(), 1);
}
