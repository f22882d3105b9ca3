//! Session recorder
//!
//! One session at a time is written to the external card, as CSV or as a
//! single JSON object. Rows are appended on the recording task's cadence and
//! flushed every [`RECORD_FLUSH_ROWS`] rows. Each write first probes the file;
//! a file that can no longer be sized (card pulled, FAT error) ends the
//! session.

pub mod csv;
pub mod json;

mod filename;

pub use filename::{next_available, sanitize};

use alloc::string::String;

use log::{error, info, warn};
use thiserror_no_std::Error;

use self::csv::ChannelSample;
use self::json::{ArrayWriter, ObjectWriter};
use crate::arbiter::ChannelId;
use crate::config::{CHANNEL_COUNT, RECORD_FLUSH_ROWS};
use crate::script::ScriptPlan;
use crate::sensors::Snapshot;
use crate::storage::{FileHandle, OpenMode, StorageError, Volume};
use crate::time::format_hms;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,
    #[error("Not currently recording")]
    NotRecording,
    #[error("external SD card not available")]
    NoCard,
    #[error("no free session filename")]
    NamesExhausted,
    #[error("session file became invalid")]
    FileInvalid,
    #[error("malformed session at line {line}")]
    Parse { line: usize },
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Csv,
    Json,
}

impl Format {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// What a finished session looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub filename: String,
    pub rows: u64,
    pub duration_sec: u64,
}

struct Session {
    file: FileHandle,
    filename: String,
    format: Format,
    script_owned: bool,
    start_ms: u64,
    first_row: bool,
    unflushed: u32,
    rows: u64,
}

/// Single-writer session recorder.
pub struct Recorder {
    session: Option<Session>,
    buf: String,
    /// Failure to show once on the UI, cleared by [`Recorder::take_notice`].
    notice: Option<RecorderError>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            session: None,
            buf: String::new(),
            notice: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_script_owned(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.script_owned)
    }

    pub fn filename(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.filename.as_str())
    }

    pub fn take_notice(&mut self) -> Option<RecorderError> {
        self.notice.take()
    }

    fn fail(&mut self, err: RecorderError) -> RecorderError {
        error!("Recording: {}", err);
        self.notice = Some(err);
        err
    }

    /// Open a new session file and write its head.
    ///
    /// `script` makes the session script-owned: the file is named after the
    /// plan and a JSON head carries the plan snapshot.
    pub fn start<V: Volume>(
        &mut self,
        volume: &mut V,
        format: Format,
        now_ms: u64,
        epoch_secs: u64,
        script: Option<&ScriptPlan>,
    ) -> Result<&str, RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        if !volume.is_present() {
            return Err(self.fail(RecorderError::NoCard));
        }

        let filename = match next_available(volume, script.map(|p| p.name.as_str()), format) {
            Ok(name) => name,
            Err(e) => return Err(self.fail(e)),
        };
        let file = match volume.open(&filename, OpenMode::Write) {
            Ok(file) => file,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.buf.clear();
        match format {
            Format::Csv => csv::write_header(&mut self.buf),
            Format::Json => write_json_head(&mut self.buf, script, epoch_secs),
        }
        if let Err(e) = volume
            .write(file, self.buf.as_bytes())
            .and_then(|()| volume.flush(file))
        {
            let _ = volume.close(file);
            return Err(self.fail(e.into()));
        }

        info!("Recording started: {}", filename);
        let session = self.session.insert(Session {
            file,
            filename,
            format,
            script_owned: script.is_some(),
            start_ms: now_ms,
            first_row: true,
            unflushed: 0,
            rows: 0,
        });
        Ok(session.filename.as_str())
    }

    /// Append one row of the currently published values.
    ///
    /// Does nothing when not recording. A failed probe or write ends the
    /// session and returns [`RecorderError::FileInvalid`].
    pub fn write_row<V: Volume>(
        &mut self,
        volume: &mut V,
        now_ms: u64,
        epoch_secs: u64,
        states: &[bool; CHANNEL_COUNT],
        snapshot: &Snapshot,
    ) -> Result<(), RecorderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let valid = matches!(volume.size(session.file), Ok(size) if size > 0);
        if !valid {
            warn!("Log file became invalid - stopping recording");
            self.stop(volume, now_ms, false);
            return Err(self.fail(RecorderError::FileInvalid));
        }

        let time_ms = now_ms.saturating_sub(session.start_ms);
        self.buf.clear();
        match session.format {
            Format::Csv => csv::write_row(&mut self.buf, time_ms, states, snapshot),
            Format::Json => {
                if !session.first_row {
                    self.buf.push_str(",\n");
                }
                write_json_row(&mut self.buf, time_ms, epoch_secs, states, snapshot);
            }
        }
        session.first_row = false;

        let mut result = volume.write(session.file, self.buf.as_bytes());
        session.rows += 1;
        session.unflushed += 1;
        if result.is_ok() && session.unflushed >= RECORD_FLUSH_ROWS {
            session.unflushed = 0;
            result = volume.flush(session.file);
        }

        if let Err(e) = result {
            warn!("Session write failed: {}", e);
            self.stop(volume, now_ms, false);
            return Err(self.fail(RecorderError::FileInvalid));
        }
        Ok(())
    }

    /// Close the session. JSON sessions get their closing fields;
    /// `script_ended_early` is only written for script-owned sessions.
    ///
    /// Returns `None` when nothing was recording.
    pub fn stop<V: Volume>(
        &mut self,
        volume: &mut V,
        now_ms: u64,
        script_ended_early: bool,
    ) -> Option<SessionSummary> {
        let session = self.session.take()?;
        let duration_sec = now_ms.saturating_sub(session.start_ms) / 1000;

        if session.format == Format::Json {
            self.buf.clear();
            self.buf.push_str("\n]");
            {
                let mut tail = ObjectWriter::continuation(&mut self.buf);
                tail.uint("duration_sec", duration_sec);
                if session.script_owned {
                    tail.bool("script_ended_early", script_ended_early);
                }
            }
            self.buf.push('\n');
            if let Err(e) = volume.write(session.file, self.buf.as_bytes()) {
                warn!("Could not write session tail: {}", e);
            }
        }
        if let Err(e) = volume.flush(session.file).and_then(|()| volume.close(session.file)) {
            warn!("Could not close {}: {}", session.filename, e);
        }

        info!(
            "Recording stopped: {} ({} rows, {} s)",
            session.filename, session.rows, duration_sec
        );
        Some(SessionSummary {
            filename: session.filename,
            rows: session.rows,
            duration_sec,
        })
    }
}

fn write_json_head(out: &mut String, script: Option<&ScriptPlan>, epoch_secs: u64) {
    {
        let mut head = ObjectWriter::unterminated(out);
        head.flag("using_script", script.is_some());
        match script {
            Some(plan) => write_script_config(&mut head.object("script_config"), plan),
            None => {
                head.null("script_config");
            }
        }
        head.str("timestamp", &format_hms(epoch_secs));
        head.key("data").push_str("[\n");
    }
}

fn write_script_config(config: &mut ObjectWriter<'_>, plan: &ScriptPlan) {
    config
        .str("name", &plan.name)
        .int("tstart", plan.t_start as i64)
        .int("tend", plan.t_end as i64)
        .bool("record", plan.use_record);
    {
        let mut devices: ArrayWriter<'_> = config.array("devices");
        for ch in ChannelId::ALL {
            let timing = plan.timing(ch);
            devices
                .object()
                .str("name", ch.name())
                .bool("enabled", timing.enabled)
                .int("onTime", timing.on_time as i64)
                .int("offTime", timing.off_time as i64);
        }
    }
    config.bool("script_ended_early", false);
}

fn write_json_row(
    out: &mut String,
    time_ms: u64,
    epoch_secs: u64,
    states: &[bool; CHANNEL_COUNT],
    snapshot: &Snapshot,
) {
    let mut row = ObjectWriter::new(out);
    row.uint("time", time_ms)
        .str("timestamp", &format_hms(epoch_secs));
    let mut key = String::new();
    for ch in ChannelId::ALL {
        let sample = ChannelSample::capture(ch, states, snapshot);
        for (suffix, value) in [
            ("volt", sample.volts),
            ("curr", sample.amps),
            ("pow", sample.watts),
        ] {
            key.clear();
            key.push_str(ch.name());
            key.push('_');
            key.push_str(suffix);
            row.float(&key, value);
        }
        key.clear();
        key.push_str(ch.name());
        key.push_str("_stat");
        row.flag(&key, sample.on);
    }
}
