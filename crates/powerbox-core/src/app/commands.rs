//! Command dispatch for every transport.

use alloc::format;
use alloc::string::{String, ToString};
use core::net::{Ipv4Addr, SocketAddrV4};

use log::info;
use serde_json::{Value, json};

use super::{App, AppError};
use crate::arbiter::{ArbiterError, ChannelId, DenyReason};
use crate::board::Board;
use crate::net::{
    Command, CommandError, Parsed, StreamTarget, TextCommand, Transport, parse_line, response,
};
use crate::recorder::RecorderError;
use crate::script::library;

const HELP: &str = "Commands: help, status, lock, unlock, start log, stop log, csv on, csv off, \
refresh sd, <device> on, <device> off (gse1 gse2 ter te1 te2 te3), graph apply default, \
main apply default, apply default";

fn denial_message(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::Locked => "System is locked",
        DenyReason::SafetyStop => "Safety stop engaged",
        DenyReason::ScriptRunning => "Cannot change outputs - script is running",
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

impl<B: Board> App<B> {
    /// Parse and run one input line, replying on the same transport.
    pub(super) fn handle_line(&mut self, from: Transport, line: &str, now: u64) {
        let reply = match parse_line(line) {
            Parsed::Json(cmd) => response::to_line(&self.run_command(cmd, from, now)),
            Parsed::UnknownJson => response::to_line(&response::unknown_command()),
            Parsed::BadParams(name) => response::to_line(&response::bad_params(name)),
            Parsed::Text(cmd) => {
                info!("Command received: {}", line.trim());
                let mut text = self.run_text(cmd, now);
                text.push('\n');
                text
            }
        };
        self.reply(from, &reply);
    }

    fn refusal(cmd: &str, err: ArbiterError) -> Value {
        match err {
            ArbiterError::Denied(reason) => response::denied(cmd, reason, denial_message(reason)),
            other => response::error(&other.to_string()),
        }
    }

    fn run_command(&mut self, cmd: Command, from: Transport, now: u64) -> Value {
        let name = cmd.name();
        match cmd {
            Command::SetOutput { device, state } => {
                let Some(ch) = ChannelId::from_name(&device) else {
                    return response::error(&CommandError::UnknownDevice.to_string());
                };
                match self.arbiter.set_output(ch, state) {
                    Ok(()) => response::ok_with(name, json!({ "device": ch.name(), "state": state })),
                    Err(e) => Self::refusal(name, e),
                }
            }
            Command::AllOutputs { state } => {
                if self.script.is_active() {
                    return response::error(denial_message(DenyReason::ScriptRunning));
                }
                let result = if state {
                    self.arbiter.all_on()
                } else {
                    self.arbiter.all_off()
                };
                match result {
                    Ok(()) => response::ok_with(name, json!({ "state": state })),
                    Err(e) => Self::refusal(name, e),
                }
            }
            Command::Lock { state } => match self.arbiter.set_lock(state) {
                Ok(()) => response::ok_with(name, json!({ "state": self.arbiter.locked() })),
                Err(e) => Self::refusal(name, e),
            },
            Command::SafetyStop { state } => {
                if state {
                    self.engage_safety_stop();
                } else {
                    self.release_safety_stop();
                }
                response::ok_with(name, json!({ "state": self.arbiter.safety_stop() }))
            }
            Command::StartRecording => match self.start_recording() {
                Ok(()) => response::ok_with(name, json!({ "filename": self.recorder.filename() })),
                Err(e) => response::error(&e.to_string()),
            },
            Command::StopRecording => match self.stop_recording() {
                Ok(summary) => response::ok_with(
                    name,
                    json!({
                        "filename": summary.filename,
                        "rows": summary.rows,
                        "duration_sec": summary.duration_sec,
                    }),
                ),
                Err(e) => response::error(&e.to_string()),
            },
            Command::LoadScript { name: script } => match self.load_script(&script) {
                Ok(()) => {
                    let loaded = self.script.plan().map(|p| p.name.as_str()).unwrap_or("");
                    response::ok_with(name, json!({ "script_name": loaded }))
                }
                Err(e) => response::error(&format!("Cannot load script: {}", e)),
            },
            Command::StartScript => match self.start_script() {
                Ok(()) => response::ok(name),
                Err(_) => response::error("Cannot start script"),
            },
            Command::PauseScript => match self.pause_script() {
                Ok(()) => response::ok(name),
                Err(_) => response::error("Cannot pause script"),
            },
            Command::ResumeScript => match self.resume_script() {
                Ok(()) => response::ok(name),
                Err(_) => response::error("Cannot resume script"),
            },
            Command::StopScript => match self.stop_script() {
                Ok(()) => response::ok(name),
                Err(_) => response::error("No script running"),
            },
            Command::SetFanSpeed { value } => {
                let speed = self.set_fan_speed(value);
                response::ok_with(name, json!({ "value": speed }))
            }
            Command::SetUpdateRate { value } => {
                let rate = self.set_update_rate(value);
                response::ok_with(name, json!({ "value": rate }))
            }
            Command::GetStatus => serde_json::to_value(self.status_report()).unwrap_or(Value::Null),
            Command::GetScripts => {
                let order = self.settings.system.sort_order;
                match library::list(self.sd.internal(), order) {
                    Ok(entries) => response::script_list(&entries),
                    Err(e) => response::error(&e.to_string()),
                }
            }
            Command::StartStream {
                interval,
                udp_target_ip,
                udp_target_port,
            } => match self.start_stream(from, interval, udp_target_ip, udp_target_port, now) {
                Ok(interval) => response::ok_with(name, json!({ "interval": interval })),
                Err(e) => response::error(&e.to_string()),
            },
            Command::StopStream => {
                self.server.stop_stream();
                response::ok(name)
            }
        }
    }

    /// Subscribe the requesting transport. UDP streams go to the configured
    /// target, which the request may update.
    fn start_stream(
        &mut self,
        from: Transport,
        interval: u64,
        udp_target_ip: Option<String>,
        udp_target_port: Option<u16>,
        now: u64,
    ) -> Result<u64, AppError> {
        if let Some(ip) = udp_target_ip {
            let ip: Ipv4Addr = ip.trim().parse().map_err(|_| CommandError::BadAddress)?;
            self.settings.network.udp_target_ip = ip.octets();
        }
        if let Some(port) = udp_target_port {
            self.settings.network.udp_target_port = port;
        }
        let target = match from {
            Transport::Serial => StreamTarget::Serial,
            Transport::Tcp(_) => StreamTarget::Tcp,
            Transport::Udp(_) => {
                let (ip, port) = self.settings.network.udp_target();
                StreamTarget::Udp(SocketAddrV4::new(ip, port))
            }
        };
        Ok(self.server.start_stream(target, interval, now))
    }

    fn run_text(&mut self, cmd: TextCommand, now: u64) -> String {
        match cmd {
            TextCommand::Help => HELP.into(),
            TextCommand::Status => self.status_text(now),
            TextCommand::Lock => match self.arbiter.set_lock(true) {
                Ok(()) => "System LOCKED".into(),
                Err(e) => format!("Cannot lock: {}", e),
            },
            TextCommand::Unlock => match self.arbiter.set_lock(false) {
                Ok(()) => "System UNLOCKED".into(),
                Err(e) => format!("Cannot unlock: {}", e),
            },
            TextCommand::StartLog => match self.start_recording() {
                Ok(()) => format!("Logging STARTED: {}", self.recorder.filename().unwrap_or("")),
                Err(AppError::Recorder(RecorderError::AlreadyRecording)) => "Already logging".into(),
                Err(e) => format!("Logging failed: {}", e),
            },
            TextCommand::StopLog => match self.stop_recording() {
                Ok(summary) => format!(
                    "Logging STOPPED: {} ({} rows, {} s)",
                    summary.filename, summary.rows, summary.duration_sec
                ),
                Err(_) => "Not currently logging".into(),
            },
            TextCommand::Csv(on) => {
                self.settings.system.csv_output = on;
                self.persist();
                if on {
                    "CSV recording format ENABLED".into()
                } else {
                    "JSON recording format ENABLED".into()
                }
            }
            TextCommand::RefreshSd => {
                self.sd.probe();
                format!(
                    "SD card status refreshed: internal {}, external {}",
                    if self.sd.internal_present() { "present" } else { "missing" },
                    if self.sd.external_present() { "present" } else { "missing" },
                )
            }
            TextCommand::Output { channel, on } => match self.arbiter.set_output(channel, on) {
                Ok(()) => format!("{} turned {}", channel, on_off(on)),
                Err(ArbiterError::Denied(reason)) => {
                    format!("Cannot change {}: {}", channel, denial_message(reason))
                }
                Err(e) => format!("Cannot change {}: {}", channel, e),
            },
            TextCommand::GraphDefaults => {
                self.reset_graph(now);
                "Graph settings reset to defaults".into()
            }
            TextCommand::MainDefaults => {
                self.reset_system();
                "Main system settings reset to defaults".into()
            }
            TextCommand::AllDefaults => {
                self.reset_graph(now);
                self.reset_system();
                "All settings reset to defaults".into()
            }
            TextCommand::Unknown => "Unknown command. Type 'help' for available commands.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use serde_json::Value;

    use super::*;
    use crate::sim::SimBoard;

    fn boot() -> (App<SimBoard>, SimBoard) {
        let board = SimBoard::new();
        let handles = board.clone();
        (App::new(board), handles)
    }

    /// Type `line` on the serial console and collect the reply.
    fn serial(app: &mut App<SimBoard>, board: &SimBoard, line: &str) -> String {
        board.serial.type_line(line);
        app.step();
        board.serial.take_output()
    }

    fn json(reply: &str) -> Value {
        let lines: Vec<&str> = reply.lines().collect();
        assert_eq!(lines.len(), 1, "exactly one response line: {:?}", reply);
        serde_json::from_str(lines[0]).unwrap()
    }

    #[test]
    fn test_set_output_and_denial_reason() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_output","device":"te1","state":true}"#));
        assert_eq!(r["success"], true);
        assert_eq!(r["device"], "TE-1");
        assert!(board.outputs[3].is_high());

        json(&serial(&mut app, &board, r#"{"cmd":"lock","state":true}"#));
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_output","device":"TE-1","state":false}"#));
        assert_eq!(r["success"], false);
        assert_eq!(r["reason"], "locked");
        assert!(board.outputs[3].is_high(), "denied command leaves the line alone");
    }

    #[test]
    fn test_unknown_device_and_command() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_output","device":"X","state":1}"#));
        assert_eq!(r["type"], "error");
        assert_eq!(r["message"], "Unknown device");

        let r = json(&serial(&mut app, &board, r#"{"cmd":"reboot"}"#));
        assert_eq!(r["message"], "Unknown command");
    }

    #[test]
    fn test_missing_field_is_not_unknown_command() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_output","device":"GSE-1"}"#));
        assert_eq!(r["type"], "error");
        assert_eq!(r["message"], "Invalid parameters for set_output");
        assert!(!board.outputs[0].is_high());
    }

    #[test]
    fn test_recording_error_texts() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"stop_recording"}"#));
        assert_eq!(r["message"], "Not currently recording");

        let r = json(&serial(&mut app, &board, r#"{"cmd":"start_recording"}"#));
        assert_eq!(r["success"], true);
        assert_eq!(r["filename"], "/power_data.csv");
        let r = json(&serial(&mut app, &board, r#"{"cmd":"start_recording"}"#));
        assert_eq!(r["message"], "Already recording");
    }

    #[test]
    fn test_script_errors_when_idle() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"start_script"}"#));
        assert_eq!(r["message"], "Cannot start script", "no plan loaded");
        let r = json(&serial(&mut app, &board, r#"{"cmd":"pause_script"}"#));
        assert_eq!(r["message"], "Cannot pause script");
        let r = json(&serial(&mut app, &board, r#"{"cmd":"stop_script"}"#));
        assert_eq!(r["message"], "No script running");
    }

    #[test]
    fn test_fan_and_update_rate_clamped() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_fan_speed","value":-4}"#));
        assert_eq!(r["value"], 0);
        let r = json(&serial(&mut app, &board, r#"{"cmd":"set_update_rate","value":1}"#));
        assert_eq!(r["value"], 10);
        assert_eq!(app.settings().system.update_rate_ms, 10);
    }

    #[test]
    fn test_serial_stream_paced() {
        let (mut app, board) = boot();
        let r = json(&serial(&mut app, &board, r#"{"cmd":"start_stream","interval":100}"#));
        assert_eq!(r["interval"], 100);

        let mut records = 0;
        for _ in 0..10 {
            board.clock.advance(50);
            app.step();
            records += board
                .serial
                .take_output()
                .lines()
                .filter(|l| l.contains("\"live_data\""))
                .count();
        }
        assert_eq!(records, 5, "one record per 100 ms over 500 ms");

        json(&serial(&mut app, &board, r#"{"cmd":"stop_stream"}"#));
        board.clock.advance(500);
        app.step();
        assert_eq!(board.serial.take_output(), "");
    }

    #[test]
    fn test_bad_stream_address() {
        let (mut app, board) = boot();
        let r = json(&serial(
            &mut app,
            &board,
            r#"{"cmd":"start_stream","interval":100,"udp_target_ip":"10.0.0.999"}"#,
        ));
        assert_eq!(r["message"], "Invalid IP address");
        assert!(app.server().stream().is_none());
    }

    #[test]
    fn test_text_commands_reply_one_line() {
        let (mut app, board) = boot();
        assert_eq!(serial(&mut app, &board, "LOCK"), "System LOCKED\n");
        assert_eq!(
            serial(&mut app, &board, "gse1 on"),
            "Cannot change GSE-1: System is locked\n"
        );
        assert_eq!(serial(&mut app, &board, "unlock"), "System UNLOCKED\n");
        assert_eq!(serial(&mut app, &board, "gse1 on"), "GSE-1 turned ON\n");
        assert_eq!(
            serial(&mut app, &board, "frobnicate"),
            "Unknown command. Type 'help' for available commands.\n"
        );
        assert_eq!(serial(&mut app, &board, "help").lines().count(), 1);
    }

    #[test]
    fn test_csv_toggle_persists() {
        let (mut app, board) = boot();
        assert_eq!(serial(&mut app, &board, "csv off"), "JSON recording format ENABLED\n");
        assert!(!app.settings().system.csv_output);
        let rebooted = App::new(board.clone());
        assert!(!rebooted.settings().system.csv_output);
    }

    #[test]
    fn test_main_defaults_keep_sort_order() {
        let (mut app, board) = boot();
        app.set_fan_speed(10);
        app.settings.system.sort_order = crate::script::SortOrder::LastUsed;
        serial(&mut app, &board, "main apply default");
        assert_eq!(app.settings().system.fan_speed, 255);
        assert_eq!(app.settings().system.sort_order, crate::script::SortOrder::LastUsed);
    }
}
