//! Live-data records and status reports.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::Write;

use super::App;
use crate::arbiter::ChannelId;
use crate::board::Board;
use crate::config::{BUS_SENSOR_INDEX, FIRMWARE_VERSION, SENSOR_NAMES};
use crate::net::EthernetPhy;
use crate::net::response::{DeviceReading, LiveData, StatusReport};
use crate::recorder::csv::ChannelSample;
use crate::script::RunState;
use crate::time::{WallClock, format_hms};

impl<B: Board> App<B> {
    /// One record of the live-data stream.
    pub(super) fn live_data(&self, now: u64) -> LiveData {
        let snapshot = self.sampler.snapshot();
        let states = self.arbiter.states();
        let mut devices: Vec<DeviceReading> = ChannelId::ALL
            .iter()
            .map(|&ch| {
                let sample = ChannelSample::capture(ch, &states, snapshot);
                DeviceReading {
                    name: ch.name(),
                    state: sample.on,
                    voltage: sample.volts,
                    current: sample.amps,
                    power: sample.watts,
                }
            })
            .collect();
        devices.push(DeviceReading {
            name: SENSOR_NAMES[BUS_SENSOR_INDEX],
            state: false,
            voltage: snapshot.volts[BUS_SENSOR_INDEX],
            current: snapshot.current_amps(BUS_SENSOR_INDEX),
            power: snapshot.power_w[BUS_SENSOR_INDEX],
        });

        LiveData {
            kind: "live_data",
            timestamp: format_hms(self.wall.epoch_secs()).to_string(),
            script_running: self.script.state() == RunState::Running,
            script_time: self.script.script_seconds(now).unwrap_or(0),
            recording: self.recorder.is_recording(),
            locked: self.arbiter.locked(),
            safety_stop: self.arbiter.safety_stop(),
            devices,
        }
    }

    /// Answer to `get_status`. Address and ports are only reported while
    /// the link is up.
    pub fn status_report(&self) -> StatusReport {
        let connected = self.net.is_connected();
        let network = &self.settings.network;
        let ip_address = self
            .ethernet
            .local_ip()
            .filter(|_| connected)
            .map(|ip| ip.to_string());

        StatusReport {
            kind: "status",
            timestamp: format_hms(self.wall.epoch_secs()).to_string(),
            version: FIRMWARE_VERSION,
            locked: self.arbiter.locked(),
            safety_stop: self.arbiter.safety_stop(),
            recording: self.recorder.is_recording(),
            script_running: self.script.state() == RunState::Running,
            script_paused: self.script.is_paused(),
            current_script: self
                .script
                .plan()
                .map(|p| p.name.to_string())
                .unwrap_or_default(),
            dark_mode: self.settings.system.dark_mode,
            external_sd: self.sd.external_present(),
            internal_sd: self.sd.internal_present(),
            ethernet_connected: connected,
            fan_speed: self.settings.system.fan_speed,
            update_rate: self.settings.system.update_rate_ms,
            stream_active: self.server.stream().is_some(),
            stream_interval: self.server.stream_interval_ms(),
            tcp_port: connected.then_some(network.tcp_port),
            udp_port: connected.then_some(network.udp_port),
            ip_address,
        }
    }

    /// Human-readable status for the `status` text command.
    pub(super) fn status_text(&self, now: u64) -> String {
        let mut out = String::new();
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let _ = writeln!(out, "{}", FIRMWARE_VERSION);
        let _ = writeln!(
            out,
            "Locked: {}  Safety stop: {}  Recording: {}",
            yes_no(self.arbiter.locked()),
            yes_no(self.arbiter.safety_stop()),
            yes_no(self.recorder.is_recording()),
        );
        match (self.script.plan(), self.script.script_seconds(now)) {
            (Some(plan), Some(t)) => {
                let _ = writeln!(out, "Script: {} ({:?}, T{:+})", plan.name, self.script.state(), t);
            }
            (Some(plan), None) => {
                let _ = writeln!(out, "Script: {} (loaded)", plan.name);
            }
            (None, _) => {
                let _ = writeln!(out, "Script: none");
            }
        }
        let snapshot = self.sampler.snapshot();
        let states = self.arbiter.states();
        for ch in ChannelId::ALL {
            let sample = ChannelSample::capture(ch, &states, snapshot);
            let _ = writeln!(
                out,
                "{:<5} {:<3} {:6.2} V {:6.3} A {:7.2} W",
                ch.name(),
                if sample.on { "ON" } else { "OFF" },
                sample.volts,
                sample.amps,
                sample.watts,
            );
        }
        let _ = writeln!(
            out,
            "Bus   {:6.2} V {:6.3} A",
            snapshot.volts[BUS_SENSOR_INDEX],
            snapshot.current_amps(BUS_SENSOR_INDEX),
        );
        let _ = writeln!(
            out,
            "SD: internal {}, external {}  Format: {}",
            yes_no(self.sd.internal_present()),
            yes_no(self.sd.external_present()),
            if self.settings.system.csv_output { "CSV" } else { "JSON" },
        );
        let _ = write!(out, "Network: {:?}", self.net.state());
        if let Some(ip) = self.ethernet.local_ip().filter(|_| self.net.is_connected()) {
            let _ = write!(
                out,
                " {} tcp {} udp {}",
                ip, self.settings.network.tcp_port, self.settings.network.udp_port
            );
        }
        out
    }
}
