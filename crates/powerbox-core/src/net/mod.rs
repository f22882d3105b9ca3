//! Command transports and the Ethernet link
//!
//! Commands arrive as newline-terminated lines on three transports: the USB
//! serial port, up to five TCP peers and UDP datagrams. Each line is either a
//! JSON object tagged by `cmd` ([`Command`]) or a human text command
//! ([`TextCommand`]). Dispatching lives in the app; this module owns the wire
//! side: the [`EthernetPhy`] seam, the non-blocking [`NetInit`] link state
//! machine, per-peer line buffering and the response encoders.

mod command;
mod config;
mod init;
mod line;
pub mod response;
mod server;

pub use command::{Command, Parsed, TextCommand, parse_line};
pub use config::{DHCP_TIMEOUT_RANGE_MS, MIN_PORT, NETWORK_TIMEOUT_RANGE_MS, NetworkConfig};
pub use init::{InitState, NetInit};
pub use line::LineBuffer;
pub use server::{CommandServer, Stream, StreamTarget};

use core::net::{Ipv4Addr, SocketAddrV4};

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    #[error("Ethernet hardware not responding")]
    Hardware,
    #[error("peer disconnected")]
    Closed,
    #[error("socket would block")]
    WouldBlock,
}

/// Errors reported back to a command's sender.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command")]
    Unknown,
    #[error("Unknown device")]
    UnknownDevice,
    #[error("Invalid IP address")]
    BadAddress,
}

/// Connected TCP peer, as numbered by the PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u32);

/// Where a command came from and where its reply goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Serial,
    Tcp(PeerId),
    Udp(SocketAddrV4),
}

/// Ethernet controller with a TCP server socket and one UDP socket.
///
/// Every call is non-blocking.
pub trait EthernetPhy {
    fn link_up(&mut self) -> bool;

    /// Start a DHCP exchange; completion is reported by [`poll_dhcp`].
    ///
    /// [`poll_dhcp`]: EthernetPhy::poll_dhcp
    fn begin_dhcp(&mut self) -> Result<(), NetError>;

    /// Leased address once DHCP has completed.
    fn poll_dhcp(&mut self) -> Option<Ipv4Addr>;

    fn configure_static(&mut self, config: &NetworkConfig) -> Result<(), NetError>;

    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// Open the TCP listener and bind UDP.
    fn start_servers(&mut self, tcp_port: u16, udp_port: u16) -> Result<(), NetError>;

    fn accept(&mut self) -> Option<PeerId>;

    /// Bytes available from `peer`. `Err(Closed)` once it has gone away.
    fn tcp_read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, NetError>;

    fn tcp_write(&mut self, peer: PeerId, data: &[u8]) -> Result<(), NetError>;

    fn tcp_close(&mut self, peer: PeerId);

    fn udp_recv(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)>;

    fn udp_send(&mut self, to: SocketAddrV4, data: &[u8]) -> Result<(), NetError>;
}
