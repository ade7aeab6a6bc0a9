use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use sip_core::{Inbound, Transport, TransportError};

const MAX_DATAGRAM: usize = 4096;
const SEND_RETRIES: u32 = 3;

/// Local address the OS would use to reach `server`.
///
/// Connecting a UDP socket sends nothing, it only picks a route.
pub fn local_ip_toward(server: SocketAddr) -> io::Result<IpAddr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(server)?;
    Ok(probe.local_addr()?.ip())
}

/// Blocking UDP transport on one socket bound to the client port.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    server: SocketAddr,
    read_timeout: Duration,
    rx_buf: [u8; MAX_DATAGRAM],

    // Requests that arrived while waiting for a reply.
    pending: VecDeque<Inbound>,
    last_peer: Option<SocketAddr>,
    last_datagram: Vec<u8>,
    repeats: u32,
}

impl UdpTransport {
    pub fn bind(client_port: u16, server: SocketAddr, read_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, client_port))?;
        socket.set_read_timeout(Some(read_timeout))?;
        info!(
            "SIP socket on {} toward {}",
            socket.local_addr()?,
            server
        );

        Ok(Self {
            socket: Some(socket),
            server,
            read_timeout,
            rx_buf: [0u8; MAX_DATAGRAM],
            pending: VecDeque::new(),
            last_peer: None,
            last_datagram: Vec::new(),
            repeats: 0,
        })
    }

    fn send_to(&self, message: &[u8], target: SocketAddr) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let mut last_err = None;
        for attempt in 1..=SEND_RETRIES {
            match socket.send_to(message, target) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!("send to {} failed ({}/{}): {}", target, attempt, SEND_RETRIES, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or(TransportError::Closed, TransportError::Io))
    }

    fn recv(&mut self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let (len, peer) = socket.recv_from(&mut self.rx_buf).map_err(io_error)?;
        Ok((self.rx_buf[..len].to_vec(), peer))
    }

    fn note_repeat(&mut self, message: &[u8], peer: SocketAddr) {
        if self.last_datagram == message {
            self.repeats += 1;
            if self.repeats == 1 {
                info!("{} keeps repeating its last message", peer);
            }
        } else {
            self.repeats = 0;
            self.last_datagram = message.to_vec();
        }
    }
}

fn io_error(e: io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(e),
    }
}

fn is_response(message: &[u8]) -> bool {
    message.starts_with(b"SIP/2.0 ")
}

impl Transport for UdpTransport {
    fn send_request(&mut self, message: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.send_to(message, self.server)?;

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let (datagram, peer) = self.recv()?;
            if peer.ip() == self.server.ip() && is_response(&datagram) {
                return Ok(datagram);
            }
            if is_response(&datagram) {
                debug!("dropping stray response from {}", peer);
            } else {
                debug!("queueing request from {} while waiting for a reply", peer);
                self.pending.push_back(Inbound {
                    message: datagram,
                    peer,
                });
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
        }
    }

    fn receive_request(&mut self) -> Result<Inbound, TransportError> {
        let inbound = match self.pending.pop_front() {
            Some(inbound) => inbound,
            None => {
                let (message, peer) = self.recv()?;
                Inbound { message, peer }
            }
        };
        self.note_repeat(&inbound.message, inbound.peer);
        self.last_peer = Some(inbound.peer);
        Ok(inbound)
    }

    fn send_response(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let peer = self.last_peer.ok_or(TransportError::NoPeer)?;
        self.send_to(message, peer)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("SIP socket closed");
        }
        self.pending.clear();
        self.last_peer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (UdpTransport, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let transport = UdpTransport::bind(
            0,
            server.local_addr().unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        (transport, server)
    }

    #[test]
    fn request_waits_for_server_reply() {
        let (mut transport, server) = loopback_pair();
        let server_addr = server.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 512];
            let (len, from) = server.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], b"REGISTER");
            server.send_to(b"INVITE sip:x SIP/2.0\r\n\r\n", from).unwrap();
            server.send_to(b"SIP/2.0 200 OK\r\n\r\n", from).unwrap();
        });

        let reply = transport.send_request(b"REGISTER").unwrap();
        handle.join().unwrap();
        assert_eq!(reply, b"SIP/2.0 200 OK\r\n\r\n");

        // The request that raced the reply is not lost.
        let inbound = transport.receive_request().unwrap();
        assert!(inbound.message.starts_with(b"INVITE"));
        assert_eq!(inbound.peer, server_addr);
    }

    #[test]
    fn silence_is_a_timeout() {
        let (mut transport, _server) = loopback_pair();
        assert!(matches!(transport.receive_request(), Err(TransportError::Timeout)));
    }

    #[test]
    fn responses_need_a_peer() {
        let (mut transport, _server) = loopback_pair();
        assert!(matches!(transport.send_response(b"x"), Err(TransportError::NoPeer)));
    }

    #[test]
    fn closed_transport_refuses_io() {
        let (mut transport, _server) = loopback_pair();
        transport.close();
        assert!(matches!(transport.send_request(b"x"), Err(TransportError::Closed)));
        assert!(matches!(transport.receive_request(), Err(TransportError::Closed)));
    }

    #[test]
    fn finds_loopback_route() {
        let ip = local_ip_toward(SocketAddr::from(([127, 0, 0, 1], 5060))).unwrap();
        assert!(ip.is_loopback());
    }
}
