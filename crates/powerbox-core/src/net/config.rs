//! Ethernet and server configuration stored in the settings block.

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub const NETWORK_TIMEOUT_RANGE_MS: (u32, u32) = (1000, 30_000);
pub const DHCP_TIMEOUT_RANGE_MS: (u32, u32) = (1000, 20_000);
pub const MIN_PORT: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub enable_ethernet: bool,
    pub use_dhcp: bool,
    pub static_ip: [u8; 4],
    pub subnet: [u8; 4],
    pub gateway: [u8; 4],
    pub dns: [u8; 4],
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Default destination for UDP live data.
    pub udp_target_ip: [u8; 4],
    pub udp_target_port: u16,
    pub network_timeout_ms: u32,
    pub dhcp_timeout_ms: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_ethernet: true,
            use_dhcp: true,
            static_ip: [192, 168, 1, 100],
            subnet: [255, 255, 255, 0],
            gateway: [192, 168, 1, 1],
            dns: [8, 8, 8, 8],
            tcp_port: 8080,
            udp_port: 8081,
            udp_target_ip: [255, 255, 255, 255],
            udp_target_port: 8082,
            network_timeout_ms: 10_000,
            dhcp_timeout_ms: 8_000,
        }
    }
}

impl NetworkConfig {
    pub fn is_valid(&self) -> bool {
        let ports_ok = [self.tcp_port, self.udp_port, self.udp_target_port]
            .iter()
            .all(|&p| p >= MIN_PORT);
        let (net_lo, net_hi) = NETWORK_TIMEOUT_RANGE_MS;
        let (dhcp_lo, dhcp_hi) = DHCP_TIMEOUT_RANGE_MS;
        ports_ok
            && self.tcp_port != self.udp_port
            && (net_lo..=net_hi).contains(&self.network_timeout_ms)
            && (dhcp_lo..=dhcp_hi).contains(&self.dhcp_timeout_ms)
    }

    pub fn static_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.static_ip)
    }

    pub fn udp_target(&self) -> (Ipv4Addr, u16) {
        (Ipv4Addr::from(self.udp_target_ip), self.udp_target_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = NetworkConfig::default();
        assert!(config.is_valid());
        assert_eq!(config.static_addr(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(config.udp_target(), (Ipv4Addr::BROADCAST, 8082));
    }

    #[test]
    fn test_rejects_privileged_port_and_bad_timeouts() {
        let mut config = NetworkConfig::default();
        config.tcp_port = 80;
        assert!(!config.is_valid(), "ports below 1024 are rejected");

        let mut config = NetworkConfig::default();
        config.dhcp_timeout_ms = 25_000;
        assert!(!config.is_valid(), "DHCP timeout above 20 s is rejected");
    }
}
