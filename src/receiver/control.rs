//! RTP control channel
//!
//! One UDP socket serves both directions: retransmit requests go out on
//! it and the matching responses come back on it. That sharing is
//! mandatory, not convenience — iTunes and friends ignore the control
//! port negotiated at SETUP and reply to whatever source port the query
//! came from.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::protocol::rtp::control::RetransmitResponse;

/// Datagram send capability used by the session driver to dispatch
/// retransmit requests
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Send one control packet to the peer
    async fn send(&self, buf: &[u8]) -> io::Result<()>;
}

/// Events surfaced from the control channel
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// A retransmit response arrived
    RetransmitResponse(RetransmitResponse),
}

/// The session's control channel endpoint
///
/// Cloning shares the underlying socket, so one clone can sit in the
/// receive loop while another serves as the session's send transport.
#[derive(Clone)]
pub struct ControlChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl ControlChannel {
    /// Bind a control channel on an ephemeral port, aimed at the
    /// client's control address
    ///
    /// # Errors
    /// Returns `io::Error` if binding fails.
    pub async fn bind(peer: SocketAddr, ipv6: bool) -> io::Result<Self> {
        let bind_addr = if ipv6 { "[::]:0" } else { "0.0.0.0:0" };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);

        Ok(Self { socket, peer })
    }

    /// Build from an existing socket (tests, pre-allocated ports)
    #[must_use]
    pub fn from_socket(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    /// The locally bound port
    ///
    /// # Errors
    /// Returns `io::Error` if the socket has no local address.
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Spawn-ready receive loop: parses inbound control datagrams and
    /// forwards retransmit responses to the session driver
    ///
    /// Sync announcements and unknown packets are ignored here; timing
    /// is the timing sub-server's concern.
    ///
    /// # Errors
    /// Returns `io::Error` if the socket fails.
    pub async fn run(&self, events: mpsc::Sender<ControlEvent>) -> io::Result<()> {
        let mut buf = [0u8; 2048];

        loop {
            let (len, _src) = self.socket.recv_from(&mut buf).await?;

            match RetransmitResponse::parse(&buf[..len]) {
                Ok(Some(response)) => {
                    if events
                        .send(ControlEvent::RetransmitResponse(response))
                        .await
                        .is_err()
                    {
                        // Session gone, stop listening
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("unparseable control packet: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl ControlTransport for ControlChannel {
    async fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send_to(buf, self.peer).await?;
        Ok(())
    }
}
