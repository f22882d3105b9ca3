//! Command parsing for every transport.

use alloc::string::String;

use serde::de::{Deserializer, Error as _};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::arbiter::ChannelId;

/// A JSON command object, tagged by its `cmd` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    SetOutput {
        device: String,
        #[serde(deserialize_with = "on_off")]
        state: bool,
    },
    AllOutputs {
        #[serde(deserialize_with = "on_off")]
        state: bool,
    },
    Lock {
        #[serde(deserialize_with = "on_off")]
        state: bool,
    },
    SafetyStop {
        #[serde(deserialize_with = "on_off")]
        state: bool,
    },
    StartRecording,
    StopRecording,
    LoadScript {
        name: String,
    },
    StartScript,
    PauseScript,
    ResumeScript,
    StopScript,
    SetFanSpeed {
        value: i64,
    },
    SetUpdateRate {
        value: i64,
    },
    GetStatus,
    GetScripts,
    StartStream {
        #[serde(default)]
        interval: u64,
        #[serde(default)]
        udp_target_ip: Option<String>,
        #[serde(default)]
        udp_target_port: Option<u16>,
    },
    StopStream,
}

impl Command {
    /// Every wire name, in declaration order.
    pub const NAMES: [&'static str; 17] = [
        "set_output",
        "all_outputs",
        "lock",
        "safety_stop",
        "start_recording",
        "stop_recording",
        "load_script",
        "start_script",
        "pause_script",
        "resume_script",
        "stop_script",
        "set_fan_speed",
        "set_update_rate",
        "get_status",
        "get_scripts",
        "start_stream",
        "stop_stream",
    ];

    /// Wire name, echoed in the `cmd` field of the response.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetOutput { .. } => "set_output",
            Self::AllOutputs { .. } => "all_outputs",
            Self::Lock { .. } => "lock",
            Self::SafetyStop { .. } => "safety_stop",
            Self::StartRecording => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::LoadScript { .. } => "load_script",
            Self::StartScript => "start_script",
            Self::PauseScript => "pause_script",
            Self::ResumeScript => "resume_script",
            Self::StopScript => "stop_script",
            Self::SetFanSpeed { .. } => "set_fan_speed",
            Self::SetUpdateRate { .. } => "set_update_rate",
            Self::GetStatus => "get_status",
            Self::GetScripts => "get_scripts",
            Self::StartStream { .. } => "start_stream",
            Self::StopStream => "stop_stream",
        }
    }
}

/// Accepts `true`/`false`, numbers, and `"on"`/`"off"` strings.
fn on_off<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().map_or(true, |v| v != 0)),
        Value::String(s) => {
            let s = s.trim();
            if ["on", "true", "1"].iter().any(|t| s.eq_ignore_ascii_case(t)) {
                Ok(true)
            } else if ["off", "false", "0"].iter().any(|t| s.eq_ignore_ascii_case(t)) {
                Ok(false)
            } else {
                Err(D::Error::custom("expected on or off"))
            }
        }
        _ => Err(D::Error::custom("expected a boolean state")),
    }
}

/// Plain-text operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCommand {
    Help,
    Status,
    Lock,
    Unlock,
    StartLog,
    StopLog,
    Csv(bool),
    RefreshSd,
    Output { channel: ChannelId, on: bool },
    GraphDefaults,
    MainDefaults,
    AllDefaults,
    Unknown,
}

impl TextCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim().to_ascii_lowercase();
        match line.as_str() {
            "help" => Self::Help,
            "status" => Self::Status,
            "lock" => Self::Lock,
            "unlock" => Self::Unlock,
            "start log" => Self::StartLog,
            "stop log" => Self::StopLog,
            "csv on" => Self::Csv(true),
            "csv off" => Self::Csv(false),
            "refresh sd" => Self::RefreshSd,
            "graph apply default" => Self::GraphDefaults,
            "main apply default" => Self::MainDefaults,
            "apply default" => Self::AllDefaults,
            other => Self::parse_output(other).unwrap_or(Self::Unknown),
        }
    }

    /// `<device> on` / `<device> off`
    fn parse_output(line: &str) -> Option<Self> {
        let (device, state) = line.rsplit_once(' ')?;
        let on = match state {
            "on" => true,
            "off" => false,
            _ => return None,
        };
        let channel = ChannelId::from_name(device)?;
        Some(Self::Output { channel, on })
    }
}

/// One classified input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Json(Command),
    /// A JSON object without a recognised `cmd`.
    UnknownJson,
    /// A known `cmd` whose fields are missing or of the wrong type.
    BadParams(&'static str),
    Text(TextCommand),
}

pub fn parse_line(line: &str) -> Parsed {
    let line = line.trim();
    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            let known = value
                .get("cmd")
                .and_then(Value::as_str)
                .and_then(|tag| Command::NAMES.iter().copied().find(|&n| n == tag));
            return match (known, Command::deserialize(value)) {
                (_, Ok(cmd)) => Parsed::Json(cmd),
                (Some(name), Err(e)) => {
                    debug!("Bad parameters for {}: {}", name, e);
                    Parsed::BadParams(name)
                }
                (None, Err(_)) => Parsed::UnknownJson,
            };
        }
    }
    Parsed::Text(TextCommand::parse(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_commands() {
        assert_eq!(
            parse_line(r#"{"cmd":"set_output","device":"GSE-1","state":true}"#),
            Parsed::Json(Command::SetOutput {
                device: "GSE-1".into(),
                state: true
            })
        );
        assert_eq!(
            parse_line(r#"{"cmd":"lock","state":"off"}"#),
            Parsed::Json(Command::Lock { state: false })
        );
        assert_eq!(
            parse_line(r#"{"cmd":"get_status"}"#),
            Parsed::Json(Command::GetStatus)
        );
    }

    #[test]
    fn test_start_stream_optional_fields() {
        let Parsed::Json(cmd) = parse_line(r#"{"cmd":"start_stream","interval":10}"#) else {
            panic!("start_stream should parse");
        };
        assert_eq!(
            cmd,
            Command::StartStream {
                interval: 10,
                udp_target_ip: None,
                udp_target_port: None
            }
        );
        assert_eq!(cmd.name(), "start_stream");
    }

    #[test]
    fn test_known_command_with_bad_fields() {
        assert_eq!(
            parse_line(r#"{"cmd":"set_output","device":"GSE-1"}"#),
            Parsed::BadParams("set_output")
        );
        assert_eq!(
            parse_line(r#"{"cmd":"set_fan_speed","value":"fast"}"#),
            Parsed::BadParams("set_fan_speed")
        );
        assert_eq!(
            parse_line(r#"{"cmd":"lock","state":"maybe"}"#),
            Parsed::BadParams("lock")
        );
    }

    #[test]
    fn test_names_cover_every_command() {
        let cmd = Command::StopStream;
        assert_eq!(Command::NAMES.last(), Some(&cmd.name()));
        assert!(Command::NAMES.contains(&Command::GetStatus.name()));
        for name in Command::NAMES {
            assert_eq!(Command::NAMES.iter().filter(|&&n| n == name).count(), 1);
        }
    }

    #[test]
    fn test_unknown_json_command() {
        assert_eq!(parse_line(r#"{"cmd":"self_destruct"}"#), Parsed::UnknownJson);
        assert_eq!(parse_line(r#"{"device":"GSE-1"}"#), Parsed::UnknownJson);
    }

    #[test]
    fn test_text_commands() {
        assert_eq!(parse_line("  Start Log "), Parsed::Text(TextCommand::StartLog));
        assert_eq!(
            parse_line("te-r on"),
            Parsed::Text(TextCommand::Output {
                channel: ChannelId::from_name("TE-R").unwrap(),
                on: true
            })
        );
        assert_eq!(
            parse_line("gse2 off"),
            Parsed::Text(TextCommand::Output {
                channel: ChannelId::from_name("GSE-2").unwrap(),
                on: false
            })
        );
        assert_eq!(parse_line("widget on"), Parsed::Text(TextCommand::Unknown));
        assert_eq!(parse_line("{not json"), Parsed::Text(TextCommand::Unknown));
    }
}
