//! Outgoing JSON objects.

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;
use serde_json::{Value, json};

use crate::arbiter::DenyReason;
use crate::script::ScriptEntry;

/// Serialize one object as a newline-terminated line.
pub fn to_line<T: Serialize + ?Sized>(value: &T) -> String {
    let mut line = serde_json::to_string(value).unwrap_or_default();
    line.push('\n');
    line
}

/// `{"type":"command_response","cmd":…,"success":true}`
pub fn ok(cmd: &str) -> Value {
    json!({ "type": "command_response", "cmd": cmd, "success": true })
}

/// Success response with extra fields merged in.
pub fn ok_with(cmd: &str, fields: Value) -> Value {
    let mut response = ok(cmd);
    if let (Some(target), Value::Object(extra)) = (response.as_object_mut(), fields) {
        target.extend(extra);
    }
    response
}

pub fn error(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}

pub fn unknown_command() -> Value {
    error("Unknown command")
}

/// A known command whose fields could not be read.
pub fn bad_params(cmd: &str) -> Value {
    json!({
        "type": "error",
        "cmd": cmd,
        "message": alloc::format!("Invalid parameters for {}", cmd),
    })
}

/// An arbiter refusal.
pub fn denied(cmd: &str, reason: DenyReason, message: &str) -> Value {
    json!({
        "type": "command_response",
        "cmd": cmd,
        "success": false,
        "reason": reason.as_str(),
        "message": message,
    })
}

pub fn welcome(version: &str, timestamp: &str) -> Value {
    json!({
        "type": "connection",
        "status": "connected",
        "version": version,
        "timestamp": timestamp,
    })
}

pub fn heartbeat(timestamp: &str, uptime_ms: u64) -> Value {
    json!({ "type": "heartbeat", "timestamp": timestamp, "uptime": uptime_ms })
}

/// One device in a live-data record. Current is in amps.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReading {
    pub name: &'static str,
    pub state: bool,
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: String,
    pub script_running: bool,
    pub script_time: i32,
    pub recording: bool,
    pub locked: bool,
    pub safety_stop: bool,
    pub devices: Vec<DeviceReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub locked: bool,
    pub safety_stop: bool,
    pub recording: bool,
    pub script_running: bool,
    pub script_paused: bool,
    pub current_script: String,
    pub dark_mode: bool,
    pub external_sd: bool,
    pub internal_sd: bool,
    pub ethernet_connected: bool,
    pub fan_speed: u8,
    pub update_rate: u16,
    pub stream_active: bool,
    pub stream_interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize)]
struct ScriptListItem<'a> {
    name: &'a str,
    filename: &'a str,
    date_created: u64,
    last_used: u64,
}

pub fn script_list(entries: &[ScriptEntry]) -> Value {
    let scripts: Vec<ScriptListItem<'_>> = entries
        .iter()
        .map(|e| ScriptListItem {
            name: &e.name,
            filename: &e.filename,
            date_created: e.date_created,
            last_used: e.last_used,
        })
        .collect();
    json!({ "type": "script_list", "count": entries.len(), "scripts": scripts })
}
