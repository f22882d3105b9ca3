//! TCP peers, UDP datagrams and the live-data stream.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::net::SocketAddrV4;

use log::{debug, info, warn};

use super::{EthernetPhy, LineBuffer, NetError, PeerId, Transport};
use crate::config::{LINE_BUFFER_CAPACITY, MAX_TCP_PEERS};
use crate::scheduler::Periodic;

pub const STREAM_MIN_INTERVAL_MS: u64 = 50;
pub const STREAM_MAX_INTERVAL_MS: u64 = 5000;

struct Peer {
    id: PeerId,
    lines: LineBuffer<LINE_BUFFER_CAPACITY>,
}

/// Where live data goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Serial,
    /// Every connected TCP peer.
    Tcp,
    Udp(SocketAddrV4),
}

#[derive(Debug, Clone, Copy)]
pub struct Stream {
    pub target: StreamTarget,
    timer: Periodic,
}

impl Stream {
    pub fn interval_ms(&self) -> u64 {
        self.timer.period_ms()
    }
}

/// Connection table plus stream subscription.
pub struct CommandServer {
    peers: heapless::Vec<Peer, MAX_TCP_PEERS>,
    stream: Option<Stream>,
    stream_interval_ms: u64,
}

impl Default for CommandServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandServer {
    pub const fn new() -> Self {
        Self {
            peers: heapless::Vec::new(),
            stream: None,
            stream_interval_ms: 1000,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// Last requested interval, reported even when no stream is active.
    pub fn stream_interval_ms(&self) -> u64 {
        self.stream_interval_ms
    }

    /// Accept pending connections; each new peer gets the `welcome` line.
    pub fn accept<P, W>(&mut self, phy: &mut P, mut welcome: W)
    where
        P: EthernetPhy + ?Sized,
        W: FnMut() -> String,
    {
        while let Some(id) = phy.accept() {
            if self.peers.is_full() {
                warn!("TCP peer table full, refusing connection");
                phy.tcp_close(id);
                continue;
            }
            info!("New TCP client connected: {:?}", id);
            let _ = self.peers.push(Peer {
                id,
                lines: LineBuffer::new(),
            });
            if phy.tcp_write(id, welcome().as_bytes()).is_err() {
                self.drop_peer(phy, id);
            }
        }
    }

    fn drop_peer<P: EthernetPhy + ?Sized>(&mut self, phy: &mut P, id: PeerId) {
        if let Some(pos) = self.peers.iter().position(|p| p.id == id) {
            self.peers.swap_remove(pos);
            phy.tcp_close(id);
            info!("TCP client {:?} disconnected", id);
        }
    }

    /// Drain every peer and the UDP socket, returning complete lines in
    /// arrival order per source.
    pub fn poll_lines<P: EthernetPhy + ?Sized>(&mut self, phy: &mut P) -> Vec<(Transport, String)> {
        let mut lines = Vec::new();
        let mut buf = [0u8; 128];
        let mut gone = Vec::new();

        for peer in self.peers.iter_mut() {
            let id = peer.id;
            loop {
                match phy.tcp_read(id, &mut buf) {
                    Ok(0) | Err(NetError::WouldBlock) => break,
                    Ok(n) => peer
                        .lines
                        .feed(&buf[..n], |l| lines.push((Transport::Tcp(id), l.to_string()))),
                    Err(_) => {
                        gone.push(id);
                        break;
                    }
                }
            }
        }
        for id in gone {
            self.drop_peer(phy, id);
        }

        let mut datagram = [0u8; LINE_BUFFER_CAPACITY];
        while let Some((n, from)) = phy.udp_recv(&mut datagram) {
            // One datagram is one command; no framing state carries over
            let mut framing = LineBuffer::<LINE_BUFFER_CAPACITY>::new();
            framing.feed(&datagram[..n], |l| lines.push((Transport::Udp(from), l.to_string())));
            framing.feed(b"\n", |l| lines.push((Transport::Udp(from), l.to_string())));
        }
        lines
    }

    /// Send to a network transport. Serial is handled by the caller.
    pub fn send<P: EthernetPhy + ?Sized>(&mut self, phy: &mut P, to: Transport, line: &str) {
        match to {
            Transport::Tcp(id) => {
                if phy.tcp_write(id, line.as_bytes()).is_err() {
                    self.drop_peer(phy, id);
                }
            }
            Transport::Udp(addr) => {
                if let Err(e) = phy.udp_send(addr, line.as_bytes()) {
                    debug!("UDP send to {} failed: {}", addr, e);
                }
            }
            Transport::Serial => {}
        }
    }

    pub fn broadcast_tcp<P: EthernetPhy + ?Sized>(&mut self, phy: &mut P, line: &str) {
        let ids: Vec<PeerId> = self.peers.iter().map(|p| p.id).collect();
        for id in ids {
            self.send(phy, Transport::Tcp(id), line);
        }
    }

    /// Drop every peer, e.g. after the link went down.
    pub fn disconnect_all<P: EthernetPhy + ?Sized>(&mut self, phy: &mut P) {
        for peer in self.peers.iter() {
            phy.tcp_close(peer.id);
        }
        self.peers.clear();
        if matches!(
            self.stream.map(|s| s.target),
            Some(StreamTarget::Tcp | StreamTarget::Udp(_))
        ) {
            self.stream = None;
        }
    }

    /// Subscribe `target` with the interval clamped to 50..=5000 ms.
    pub fn start_stream(&mut self, target: StreamTarget, interval_ms: u64, now_ms: u64) -> u64 {
        let interval = interval_ms.clamp(STREAM_MIN_INTERVAL_MS, STREAM_MAX_INTERVAL_MS);
        self.stream_interval_ms = interval;
        self.stream = Some(Stream {
            target,
            timer: Periodic::new(interval, now_ms),
        });
        info!("Streaming live data every {} ms to {:?}", interval, target);
        interval
    }

    pub fn stop_stream(&mut self) {
        self.stream = None;
    }

    /// Target of a stream record due at `now_ms`.
    pub fn stream_due(&mut self, now_ms: u64) -> Option<StreamTarget> {
        let stream = self.stream.as_mut()?;
        stream.timer.poll(now_ms).then_some(stream.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEthernet;
    use core::net::Ipv4Addr;

    #[test]
    fn test_peers_get_welcome_and_lines() {
        let mut phy = SimEthernet::new();
        let mut server = CommandServer::new();
        let a = phy.connect_peer();
        server.accept(&mut phy, || "hello\n".into());
        assert_eq!(phy.peer_output(a), "hello\n");

        phy.peer_send(a, b"{\"cmd\":\"get_status\"}\nlo");
        phy.peer_send(a, b"ck\n");
        let lines = server.poll_lines(&mut phy);
        let texts: Vec<&str> = lines.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(texts, ["{\"cmd\":\"get_status\"}", "lock"]);
        assert_eq!(lines[0].0, Transport::Tcp(a));
    }

    #[test]
    fn test_sixth_peer_refused() {
        let mut phy = SimEthernet::new();
        let mut server = CommandServer::new();
        for _ in 0..6 {
            phy.connect_peer();
        }
        server.accept(&mut phy, || "hi\n".into());
        assert_eq!(server.peer_count(), MAX_TCP_PEERS);
        assert_eq!(phy.closed_peers(), 1);
    }

    #[test]
    fn test_udp_datagram_is_one_command() {
        let mut phy = SimEthernet::new();
        let mut server = CommandServer::new();
        let from = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 5000);
        phy.udp_inject(from, b"status");
        let lines = server.poll_lines(&mut phy);
        assert_eq!(lines, [(Transport::Udp(from), String::from("status"))]);
    }

    #[test]
    fn test_stream_interval_clamped_and_paced() {
        let mut server = CommandServer::new();
        assert_eq!(server.start_stream(StreamTarget::Serial, 10, 0), 50);
        assert_eq!(server.stream_due(20), None);
        assert_eq!(server.stream_due(50), Some(StreamTarget::Serial));
        assert_eq!(server.start_stream(StreamTarget::Tcp, 60_000, 0), 5000);
        server.stop_stream();
        assert_eq!(server.stream_due(100_000), None);
        assert_eq!(server.stream_interval_ms(), 5000);
    }
}
