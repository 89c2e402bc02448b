//! Socket-backed link: TCP for reliable delivery, UDP for fast delivery.
//!
//! The reliable channel is a TCP stream carrying length-prefixed
//! messages (`[len:4 LE][encoded message]`). The fast channel is one
//! UDP datagram per message. Construction pairs the two with a tiny
//! handshake on the fresh TCP stream: each side sends the port of its
//! UDP socket as a little-endian u16, so the peers learn where to aim
//! fast datagrams. After the handshake both sockets are nonblocking and
//! all receiving is polled.
//!
//! Fast datagrams that fail to parse are dropped with a warning — a
//! corrupt best-effort datagram is indistinguishable from a lost one.
//! Corruption on the TCP stream is fatal.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use minstant::Instant;

use crate::message::Message;
use crate::net::{Endpoint, UdpSocket};
use crate::trace::warn;
use crate::transport::{Delivery, Link, LinkError, Timeout};

/// Maximum UDP datagram we'll receive.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Receive buffer requested for the fast socket; state replication can
/// burst several large datagrams per frame.
const FAST_RECV_BUFFER: usize = 1 << 20;

/// Sleep granularity while a nonblocking operation waits.
const SPIN_WAIT: Duration = Duration::from_millis(1);

/// A TCP + UDP link to one peer.
pub struct SocketLink {
    tcp: TcpStream,
    udp: UdpSocket,
    peer_fast: Endpoint,
    /// Accumulated TCP bytes; a frame may arrive in pieces.
    stream_buf: Vec<u8>,
    /// Reusable buffer for receiving datagrams.
    datagram_buf: Vec<u8>,
    /// Reusable buffer for encoding outbound messages.
    encode_buf: Vec<u8>,
}

impl SocketLink {
    /// Connects to a peer listening at `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or the UDP-port handshake
    /// fails.
    pub fn connect(remote: Endpoint) -> std::io::Result<Self> {
        let tcp = TcpStream::connect(remote.as_socket_addr())?;
        Self::establish(tcp)
    }

    /// Accepts one inbound connection from `listener`.
    ///
    /// Blocks until a peer connects.
    ///
    /// # Errors
    ///
    /// Returns an error if accept or the UDP-port handshake fails.
    pub fn accept(listener: &TcpListener) -> std::io::Result<Self> {
        let (tcp, _peer) = listener.accept()?;
        Self::establish(tcp)
    }

    /// Completes link setup on a fresh TCP stream.
    fn establish(tcp: TcpStream) -> std::io::Result<Self> {
        tcp.set_nodelay(true)?;

        // Bind the fast socket on the same interface as the stream and
        // swap ports so each side knows where to aim datagrams.
        let local_ip = tcp.local_addr()?.ip();
        let udp = UdpSocket::bind(Endpoint::new(local_ip, 0))?;
        if let Err(e) = udp.set_recv_buffer_size(FAST_RECV_BUFFER) {
            warn!(error = %e, "could not grow fast-path receive buffer");
        }

        let local_fast_port = udp.local_addr()?.port();
        (&tcp).write_all(&local_fast_port.to_le_bytes())?;
        let mut port_bytes = [0u8; 2];
        (&tcp).read_exact(&mut port_bytes)?;
        let peer_fast = Endpoint::new(tcp.peer_addr()?.ip(), u16::from_le_bytes(port_bytes));

        tcp.set_nonblocking(true)?;

        Ok(Self {
            tcp,
            udp,
            peer_fast,
            stream_buf: Vec::new(),
            datagram_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            encode_buf: Vec::new(),
        })
    }

    /// Endpoint the peer's fast datagrams arrive from.
    #[must_use]
    pub fn peer_fast_endpoint(&self) -> Endpoint {
        self.peer_fast
    }

    /// Writes all of `buf` to the nonblocking stream, spinning on
    /// `WouldBlock`. Control traffic is rare and small, so a brief wait
    /// under kernel backpressure is acceptable.
    fn write_all_reliable(&mut self, mut buf: &[u8]) -> Result<(), LinkError> {
        while !buf.is_empty() {
            match (&self.tcp).write(buf) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(SPIN_WAIT),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
        Ok(())
    }

    /// Drains whatever the TCP stream has ready into `stream_buf`.
    fn fill_stream_buf(&mut self) -> Result<(), LinkError> {
        let mut chunk = [0u8; 4096];
        loop {
            match (&self.tcp).read(&mut chunk) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => self.stream_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    /// Pops one complete length-prefixed message, if buffered.
    fn pop_stream_message(&mut self) -> Result<Option<Message>, LinkError> {
        if self.stream_buf.len() < 4 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.stream_buf[..4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if self.stream_buf.len() < 4 + len {
            return Ok(None);
        }
        let msg = Message::decode(&self.stream_buf[4..4 + len])?;
        self.stream_buf.drain(..4 + len);
        Ok(Some(msg))
    }

    /// Receives one fast datagram, if any is queued.
    fn recv_fast(&mut self) -> Result<Option<Message>, LinkError> {
        loop {
            let Some((n, from)) = self.udp.try_recv_from(&mut self.datagram_buf)? else {
                return Ok(None);
            };
            match Message::decode(&self.datagram_buf[..n]) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    // Best-effort channel: a corrupt datagram is a lost one.
                    warn!(from = %from, error = %e, "dropping malformed fast datagram");
                }
            }
        }
    }
}

impl Link for SocketLink {
    fn send(&mut self, delivery: Delivery, msg: &Message) -> Result<(), LinkError> {
        let mut encoded = std::mem::take(&mut self.encode_buf);
        msg.encode(&mut encoded)?;

        let result = match delivery {
            Delivery::Reliable => {
                let len = (encoded.len() as u32).to_le_bytes();
                self.write_all_reliable(&len)
                    .and_then(|()| self.write_all_reliable(&encoded))
            }
            Delivery::Fast => {
                // WouldBlock on a full socket queue is silent loss.
                match self.udp.try_send_to(&encoded, self.peer_fast) {
                    Ok(_) => Ok(()),
                    Err(e) => Err(LinkError::Io(e)),
                }
            }
        };

        self.encode_buf = encoded;
        result
    }

    fn try_recv(&mut self) -> Result<Option<Message>, LinkError> {
        // Fast path first: per-frame handshake traffic dominates.
        if let Some(msg) = self.recv_fast()? {
            return Ok(Some(msg));
        }
        self.fill_stream_buf()?;
        self.pop_stream_message()
    }

    fn recv(&mut self, timeout: Timeout) -> Result<Option<Message>, LinkError> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if let Some(msg) = self.try_recv()? {
                return Ok(Some(msg));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            thread::sleep(SPIN_WAIT);
        }
    }
}
