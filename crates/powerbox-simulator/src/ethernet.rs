//! Host sockets standing in for the Ethernet controller.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};

use log::{debug, info, warn};

use powerbox_core::net::{EthernetPhy, NetError, NetworkConfig, PeerId};

/// TCP listener and UDP socket bound to one host address.
///
/// The link is always up and DHCP "leases" the bind address, so the app's
/// bring-up sequence runs unchanged.
pub struct HostEthernet {
    bind: Ipv4Addr,
    address: Option<Ipv4Addr>,
    listener: Option<TcpListener>,
    udp: Option<UdpSocket>,
    peers: BTreeMap<u32, TcpStream>,
    next_peer: u32,
}

impl HostEthernet {
    pub fn new(bind: Ipv4Addr) -> Self {
        Self {
            bind,
            address: None,
            listener: None,
            udp: None,
            peers: BTreeMap::new(),
            next_peer: 1,
        }
    }
}

fn hardware(context: &str, e: io::Error) -> NetError {
    warn!("{}: {}", context, e);
    NetError::Hardware
}

impl EthernetPhy for HostEthernet {
    fn link_up(&mut self) -> bool {
        true
    }

    fn begin_dhcp(&mut self) -> Result<(), NetError> {
        Ok(())
    }

    fn poll_dhcp(&mut self) -> Option<Ipv4Addr> {
        self.address = Some(self.bind);
        self.address
    }

    fn configure_static(&mut self, config: &NetworkConfig) -> Result<(), NetError> {
        if config.static_addr() != self.bind {
            info!(
                "Static address {} requested; serving on {} instead",
                config.static_addr(),
                self.bind
            );
        }
        self.address = Some(self.bind);
        Ok(())
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.address
    }

    fn start_servers(&mut self, tcp_port: u16, udp_port: u16) -> Result<(), NetError> {
        let listener = TcpListener::bind((self.bind, tcp_port)).map_err(|e| hardware("TCP bind", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| hardware("TCP listener", e))?;
        let udp = UdpSocket::bind((self.bind, udp_port)).map_err(|e| hardware("UDP bind", e))?;
        udp.set_nonblocking(true)
            .map_err(|e| hardware("UDP socket", e))?;
        info!("Listening on {}:{} (TCP) and {}:{} (UDP)", self.bind, tcp_port, self.bind, udp_port);
        self.listener = Some(listener);
        self.udp = Some(udp);
        Ok(())
    }

    fn accept(&mut self) -> Option<PeerId> {
        let listener = self.listener.as_ref()?;
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("Dropping {}: {}", addr, e);
                    return None;
                }
                let _ = stream.set_nodelay(true);
                let id = self.next_peer;
                self.next_peer += 1;
                debug!("Peer {} is {}", id, addr);
                self.peers.insert(id, stream);
                Some(PeerId(id))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("accept: {}", e);
                None
            }
        }
    }

    fn tcp_read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, NetError> {
        let stream = self.peers.get_mut(&peer.0).ok_or(NetError::Closed)?;
        match stream.read(buf) {
            Ok(0) => Err(NetError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(NetError::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(NetError::WouldBlock),
            Err(_) => Err(NetError::Closed),
        }
    }

    fn tcp_write(&mut self, peer: PeerId, data: &[u8]) -> Result<(), NetError> {
        let stream = self.peers.get_mut(&peer.0).ok_or(NetError::Closed)?;
        stream.write_all(data).map_err(|e| {
            debug!("Peer {} write failed: {}", peer.0, e);
            NetError::Closed
        })
    }

    fn tcp_close(&mut self, peer: PeerId) {
        if let Some(stream) = self.peers.remove(&peer.0) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn udp_recv(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        let udp = self.udp.as_ref()?;
        loop {
            match udp.recv_from(buf) {
                Ok((n, SocketAddr::V4(from))) => return Some((n, from)),
                Ok((_, from)) => debug!("Ignoring IPv6 datagram from {}", from),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!("UDP receive: {}", e);
                    return None;
                }
            }
        }
    }

    fn udp_send(&mut self, to: SocketAddrV4, data: &[u8]) -> Result<(), NetError> {
        let udp = self.udp.as_ref().ok_or(NetError::Hardware)?;
        udp.send_to(data, to).map(|_| ()).map_err(|e| {
            debug!("UDP send to {}: {}", to, e);
            NetError::Closed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn read_line(stream: &mut TcpStream) -> String {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while stream.read(&mut byte).unwrap() == 1 && byte[0] != b'\n' {
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_tcp_round_trip_on_loopback() {
        let mut phy = HostEthernet::new(Ipv4Addr::LOCALHOST);
        phy.start_servers(0, 0).unwrap();
        let port = phy.listener.as_ref().unwrap().local_addr().unwrap().port();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        let peer = loop {
            if let Some(peer) = phy.accept() {
                break peer;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        phy.tcp_write(peer, b"hello\n").unwrap();
        assert_eq!(read_line(&mut client), "hello");

        client.write_all(b"lock\n").unwrap();
        let mut buf = [0u8; 16];
        let n = loop {
            match phy.tcp_read(peer, &mut buf) {
                Ok(n) => break n,
                Err(NetError::WouldBlock) => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("read failed: {}", e),
            }
        };
        assert_eq!(&buf[..n], b"lock\n");

        drop(client);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(phy.tcp_read(peer, &mut buf), Err(NetError::Closed));
    }

    #[test]
    fn test_dhcp_leases_bind_address() {
        let mut phy = HostEthernet::new(Ipv4Addr::LOCALHOST);
        assert_eq!(phy.local_ip(), None);
        phy.begin_dhcp().unwrap();
        assert_eq!(phy.poll_dhcp(), Some(Ipv4Addr::LOCALHOST));
    }
}
