//! Non-blocking Ethernet bring-up.

use log::{info, warn};

use super::{EthernetPhy, NetworkConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    #[default]
    Idle,
    CheckingLink,
    Initializing,
    DhcpWait,
    Initialized,
    Failed,
}

/// Link bring-up state machine, advanced once per loop iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetInit {
    state: InitState,
    started_ms: u64,
    connected: bool,
}

impl NetInit {
    pub const fn new() -> Self {
        Self {
            state: InitState::Idle,
            started_ms: 0,
            connected: false,
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    /// Link is initialized and servers are listening.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Start (or restart) bring-up.
    pub fn begin(&mut self, config: &NetworkConfig, now_ms: u64) {
        self.connected = false;
        self.started_ms = now_ms;
        if config.enable_ethernet {
            info!("Initializing Ethernet...");
            self.state = InitState::CheckingLink;
        } else {
            info!("Ethernet disabled in settings");
            self.state = InitState::Failed;
        }
    }

    /// Advance one step. Returns the new state when it changed.
    pub fn poll<P: EthernetPhy + ?Sized>(
        &mut self,
        phy: &mut P,
        config: &NetworkConfig,
        now_ms: u64,
    ) -> Option<InitState> {
        let before = self.state;
        let pending = matches!(
            self.state,
            InitState::CheckingLink | InitState::Initializing | InitState::DhcpWait
        );
        if pending && now_ms.saturating_sub(self.started_ms) > config.network_timeout_ms as u64 {
            warn!("Network initialization timed out");
            self.state = InitState::Failed;
        }

        match self.state {
            InitState::CheckingLink => {
                self.state = if phy.link_up() {
                    InitState::Initializing
                } else {
                    warn!("No ethernet cable detected");
                    InitState::Failed
                };
            }
            InitState::Initializing => {
                if config.use_dhcp {
                    info!("Starting DHCP...");
                    self.state = match phy.begin_dhcp() {
                        Ok(()) => InitState::DhcpWait,
                        Err(e) => {
                            warn!("DHCP start failed: {}", e);
                            self.fall_back_to_static(phy, config)
                        }
                    };
                } else {
                    info!("Using static IP configuration...");
                    self.state = self.fall_back_to_static(phy, config);
                }
            }
            InitState::DhcpWait => {
                if phy.poll_dhcp().is_some() {
                    self.state = self.start_servers(phy, config);
                } else if now_ms.saturating_sub(self.started_ms) > config.dhcp_timeout_ms as u64 {
                    warn!("DHCP timeout, falling back to static IP");
                    self.state = self.fall_back_to_static(phy, config);
                }
            }
            InitState::Idle | InitState::Initialized | InitState::Failed => {}
        }

        if self.state == InitState::Initialized && before != InitState::Initialized {
            self.connected = true;
            match phy.local_ip() {
                Some(ip) => info!("Ethernet initialized. IP: {}", ip),
                None => info!("Ethernet initialized"),
            }
        }
        (self.state != before).then_some(self.state)
    }

    fn fall_back_to_static<P: EthernetPhy + ?Sized>(
        &mut self,
        phy: &mut P,
        config: &NetworkConfig,
    ) -> InitState {
        match phy.configure_static(config) {
            Ok(()) => self.start_servers(phy, config),
            Err(e) => {
                warn!("Static IP configuration failed: {}", e);
                InitState::Failed
            }
        }
    }

    fn start_servers<P: EthernetPhy + ?Sized>(
        &mut self,
        phy: &mut P,
        config: &NetworkConfig,
    ) -> InitState {
        match phy.start_servers(config.tcp_port, config.udp_port) {
            Ok(()) => InitState::Initialized,
            Err(e) => {
                warn!("Failed to open servers: {}", e);
                InitState::Failed
            }
        }
    }

    /// Periodic link supervision.
    ///
    /// A lost link drops the connection; a link that comes back after a
    /// failure restarts bring-up.
    pub fn check_health<P: EthernetPhy + ?Sized>(
        &mut self,
        phy: &mut P,
        config: &NetworkConfig,
        now_ms: u64,
    ) {
        let link = phy.link_up();
        match self.state {
            InitState::Initialized if !link => {
                warn!("Ethernet cable disconnected");
                self.connected = false;
                self.state = InitState::Failed;
            }
            InitState::Failed | InitState::Idle if link && config.enable_ethernet => {
                info!("Ethernet cable connected - reinitializing...");
                self.begin(config, now_ms);
            }
            _ => {}
        }
    }
}
