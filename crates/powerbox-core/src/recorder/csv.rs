//! CSV session rows.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use super::RecorderError;
use crate::arbiter::ChannelId;
use crate::config::CHANNEL_COUNT;
use crate::sensors::Snapshot;

const FIELDS_PER_CHANNEL: usize = 4;

/// `Time,GSE-1_State,GSE-1_Voltage,GSE-1_Current,GSE-1_Power,...`
pub fn write_header(out: &mut String) {
    out.push_str("Time");
    for ch in ChannelId::ALL {
        let name = ch.name();
        let _ = write!(
            out,
            ",{0}_State,{0}_Voltage,{0}_Current,{0}_Power",
            name
        );
    }
    out.push('\n');
}

/// One row: time in ms since session start, then state, volts, amps and
/// watts per channel with four decimals.
pub fn write_row(
    out: &mut String,
    time_ms: u64,
    states: &[bool; CHANNEL_COUNT],
    snapshot: &Snapshot,
) {
    let _ = write!(out, "{}", time_ms);
    for ch in ChannelId::ALL {
        let sample = ChannelSample::capture(ch, states, snapshot);
        let _ = write!(
            out,
            ",{},{:.4},{:.4},{:.4}",
            if sample.on { 1 } else { 0 },
            sample.volts,
            sample.amps,
            sample.watts
        );
    }
    out.push('\n');
}

/// Values recorded for one channel in one row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelSample {
    pub on: bool,
    pub volts: f32,
    pub amps: f32,
    pub watts: f32,
}

impl ChannelSample {
    /// The published values for a channel. Channels without a monitor read 0.
    pub fn capture(ch: ChannelId, states: &[bool; CHANNEL_COUNT], snapshot: &Snapshot) -> Self {
        let on = states[ch.index()];
        match ch.sensor_index() {
            Some(i) => Self {
                on,
                volts: snapshot.volts[i],
                amps: snapshot.current_amps(i),
                watts: snapshot.power_w[i],
            },
            None => Self {
                on,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub time_ms: u64,
    pub channels: [ChannelSample; CHANNEL_COUNT],
}

/// Parse a CSV session back into rows.
pub fn parse_session(text: &str) -> Result<Vec<CsvRow>, RecorderError> {
    let mut lines = text.lines();
    let header = lines.next().ok_or(RecorderError::Parse { line: 1 })?;
    let columns = header.split(',').count();
    if !header.starts_with("Time,") || columns != 1 + CHANNEL_COUNT * FIELDS_PER_CHANNEL {
        return Err(RecorderError::Parse { line: 1 });
    }

    let mut rows = Vec::new();
    for (n, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        let line_no = n + 2;
        let err = RecorderError::Parse { line: line_no };
        let mut fields = line.split(',');
        let time_ms = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or(err)?;

        let mut channels = [ChannelSample::default(); CHANNEL_COUNT];
        for sample in channels.iter_mut() {
            let mut next = || fields.next().ok_or(err);
            let on = match next()? {
                "1" => true,
                "0" => false,
                _ => return Err(err),
            };
            let mut number = || next().and_then(|f| f.parse::<f32>().map_err(|_| err));
            *sample = ChannelSample {
                on,
                volts: number()?,
                amps: number()?,
                watts: number()?,
            };
        }
        if fields.next().is_some() {
            return Err(err);
        }
        rows.push(CsvRow { time_ms, channels });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_every_channel() {
        let mut out = String::new();
        write_header(&mut out);
        assert!(out.starts_with("Time,GSE-1_State,GSE-1_Voltage,GSE-1_Current,GSE-1_Power,GSE-2_State"));
        assert!(out.ends_with("TE-3_Power\n"));
    }

    #[test]
    fn test_row_uses_amps_and_four_decimals() {
        let mut snap = Snapshot::default();
        snap.volts[0] = 28.0;
        snap.current_ma[0] = 1250.0;
        snap.power_w[0] = 35.0;
        let mut states = [false; CHANNEL_COUNT];
        states[0] = true;

        let mut out = String::new();
        write_row(&mut out, 150, &states, &snap);
        assert!(out.starts_with("150,1,28.0000,1.2500,35.0000,0,0.0000"), "{}", out);
    }

    #[test]
    fn test_session_replays_published_values() {
        let mut snap = Snapshot::default();
        let mut states = [false; CHANNEL_COUNT];
        let mut text = String::new();
        write_header(&mut text);
        for t in 0..4u64 {
            for i in 0..CHANNEL_COUNT {
                snap.volts[i] = 12.0 + i as f32;
                snap.current_ma[i] = 250.0 * t as f32;
                snap.power_w[i] = 0.5 * i as f32;
            }
            states[t as usize] = true;
            write_row(&mut text, t * 50, &states, &snap);
        }

        let rows = parse_session(&text).unwrap();
        assert_eq!(rows.len(), 4);
        let last = &rows[3];
        assert_eq!(last.time_ms, 150);
        assert_eq!(last.channels[3].volts, 15.0);
        assert_eq!(last.channels[3].amps, 0.75);
        assert_eq!(last.channels[5].watts, 2.5);
        assert!(last.channels[3].on);
        assert!(!last.channels[4].on);
    }

    #[test]
    fn test_parse_rejects_short_rows() {
        let mut text = String::new();
        write_header(&mut text);
        text.push_str("10,1,2.0\n");
        assert_eq!(parse_session(&text), Err(RecorderError::Parse { line: 2 }));
        assert_eq!(parse_session("Time,x\n"), Err(RecorderError::Parse { line: 1 }));
    }
}
