//! Top-level application
//!
//! [`App`] owns every component and runs one cooperative loop iteration per
//! [`App::step`]. Effects that span components (a safety stop aborting the
//! script and its recording, a script start clearing the chart) are
//! sequenced here so that no component reaches into another.

mod commands;
mod report;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embedded_graphics::prelude::Point;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::arbiter::{Arbiter, ArbiterError};
use crate::board::{Board, BoardParts, Panel, PanelView, SerialLink, UiAction};
use crate::config::{FIRMWARE_VERSION, LINE_BUFFER_CAPACITY, TOUCH_DEBOUNCE_MS};
use crate::graph::{GraphEngine, GraphSettings, Refresh};
use crate::net::{
    CommandError, CommandServer, InitState, LineBuffer, NetInit, StreamTarget,
    Transport, response,
};
use crate::recorder::{Format, Recorder, RecorderError, SessionSummary};
use crate::scheduler::{Scheduler, Task};
use crate::script::{RunEnd, RunState, ScriptEngine, ScriptError, format_script_clock, library};
use crate::sensors::{Sampler, Snapshot};
use crate::settings::{LoadOutcome, Settings, SettingsError, SystemSettings};
use crate::status::{Fan, StatusLeds, StatusView};
use crate::storage::SdBus;
use crate::time::{
    Clock, ClockText, DebounceGate, FeedbackLook, PressFeedback, WallClock, format_hms,
    format_time_of_day,
};

/// Top-left corner of the strip chart on the panel.
pub const GRAPH_ORIGIN: Point = Point::new(130, 60);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("{0}")]
    Arbiter(#[from] ArbiterError),
    #[error("{0}")]
    Script(#[from] ScriptError),
    #[error("{0}")]
    Recorder(#[from] RecorderError),
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    Command(#[from] CommandError),
}

pub struct App<B: Board> {
    clock: B::Clock,
    wall: B::Wall,
    scheduler: Scheduler,
    settings: Settings,
    eeprom: B::Nv,

    arbiter: Arbiter<B::Output, B::Switch>,
    sampler: Sampler<B::Sensors>,
    script: ScriptEngine,
    recorder: Recorder,
    graph: GraphEngine,
    sd: SdBus<B::Internal, B::External>,
    leds: StatusLeds<B::Led>,
    fan: Fan<B::Fan>,

    ethernet: B::Ethernet,
    net: NetInit,
    server: CommandServer,
    serial: B::Serial,
    serial_lines: LineBuffer<LINE_BUFFER_CAPACITY>,

    panel: B::Panel,
    touch_gate: DebounceGate,
    feedback: PressFeedback,
    shown_look: Option<FeedbackLook>,
    graph_visible: bool,
    clock_text: ClockText,
    notice: Option<String>,
}

impl<B: Board> App<B> {
    /// Bring the box up: load settings, sync outputs to the rockers, mount
    /// the cards and start network bring-up.
    pub fn new(board: B) -> Self {
        let BoardParts {
            outputs,
            switches,
            power_led,
            lock_led,
            stop_led,
            fan,
            sensors,
            internal_sd,
            external_sd,
            mut eeprom,
            ethernet,
            clock,
            wall,
            serial,
            panel,
        } = board.into_parts();

        info!("{} starting", FIRMWARE_VERSION);
        let settings = match Settings::load(&mut eeprom) {
            Ok((settings, LoadOutcome::Loaded)) => settings,
            Ok((settings, outcome)) => {
                warn!("Settings {:?} on boot", outcome);
                settings
            }
            Err(e) => {
                error!("Settings unavailable, running on defaults: {}", e);
                Settings::default()
            }
        };

        let now = clock.now_ms();
        let mut scheduler = Scheduler::new(now);
        scheduler.set_graph_refresh_ms(settings.graph.refresh_ms as u64, now);

        let mut sd = SdBus::new(internal_sd, external_sd);
        sd.probe();

        let mut fan = Fan::new(fan);
        fan.apply(settings.system.fan_on, settings.system.fan_speed);

        let mut net = NetInit::new();
        net.begin(&settings.network, now);

        let clock_text = format_time_of_day(wall.epoch_secs(), settings.system.use_24h);

        Self {
            arbiter: Arbiter::new(outputs, switches),
            sampler: Sampler::new(sensors),
            script: ScriptEngine::new(),
            recorder: Recorder::new(),
            graph: GraphEngine::new(settings.graph, now),
            sd,
            leds: StatusLeds::new(power_led, lock_led, stop_led),
            fan,
            ethernet,
            net,
            server: CommandServer::new(),
            serial,
            serial_lines: LineBuffer::new(),
            panel,
            touch_gate: DebounceGate::new(TOUCH_DEBOUNCE_MS),
            feedback: PressFeedback::new(),
            shown_look: None,
            graph_visible: false,
            clock_text,
            notice: None,
            clock,
            wall,
            scheduler,
            settings,
            eeprom,
        }
    }

    pub fn arbiter(&self) -> &Arbiter<B::Output, B::Switch> {
        &self.arbiter
    }

    pub fn script(&self) -> &ScriptEngine {
        &self.script
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn graph(&self) -> &GraphEngine {
        &self.graph
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.sampler.snapshot()
    }

    pub fn network_state(&self) -> InitState {
        self.net.state()
    }

    pub fn server(&self) -> &CommandServer {
        &self.server
    }

    /// Presence of the internal and external cards as of the last probe.
    pub fn sd_present(&self) -> (bool, bool) {
        (self.sd.internal_present(), self.sd.external_present())
    }

    pub fn panel_mut(&mut self) -> &mut B::Panel {
        &mut self.panel
    }

    /// One pass of the main loop.
    pub fn step(&mut self) {
        let now = self.clock.now_ms();

        if let Some(state) = self.net.poll(&mut self.ethernet, &self.settings.network, now) {
            debug!("Network init -> {:?}", state);
        }
        self.drain_serial(now);
        self.service_network(now);
        self.push_stream(now);

        // The poll is skipped while recording so card detect never races a write
        if self.scheduler.due(Task::SdPoll, now) && !self.recorder.is_recording() && self.sd.probe()
        {
            info!(
                "SD status: internal {}, external {}",
                self.sd.internal_present(),
                self.sd.external_present()
            );
        }

        if let Some(action) = self.panel.poll_keypad() {
            self.handle_ui(action);
        }
        let view = self.status_view();
        self.leds.update(view, now);

        if self.scheduler.due(Task::SensorSample, now) {
            self.sampler.sample_all();
        }
        if self.scheduler.due(Task::GraphRefresh, now) {
            self.refresh_graph(now);
        }

        let look = self.feedback.poll(now);
        let redraw_due = self.scheduler.due(Task::DisplayRedraw, now);
        if redraw_due || look != self.shown_look {
            self.shown_look = look;
            self.redraw(now, look);
        }

        if self.scheduler.due(Task::RecordWrite, now) {
            self.write_record(now);
        }
        if let Some(end) = self.script.tick(now, &mut self.arbiter) {
            self.finish_run(end, now);
        }
        if self.scheduler.due(Task::ClockTick, now) {
            self.clock_text =
                format_time_of_day(self.wall.epoch_secs(), self.settings.system.use_24h);
        }

        self.arbiter.scan_switches(now);

        if let Some(action) = self.panel.poll_touch() {
            if self.touch_gate.accept(now) {
                self.feedback.press(now);
                self.handle_ui(action);
            } else {
                debug!("Touch ignored (debounce)");
            }
        }

        if let Some(e) = self.recorder.take_notice() {
            self.notice = Some(e.to_string());
        }
    }

    fn status_view(&self) -> StatusView {
        StatusView {
            recording: self.recorder.is_recording(),
            locked: self.arbiter.locked(),
            safety_stop: self.arbiter.safety_stop(),
            script_active: self.script.state() == RunState::Running,
        }
    }

    fn drain_serial(&mut self, now: u64) {
        let mut lines = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let mut n = 0;
            while n < chunk.len() {
                match self.serial.read_byte() {
                    Some(byte) => {
                        chunk[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            self.serial_lines
                .feed(&chunk[..n], |line| lines.push(line.to_string()));
            if n < chunk.len() {
                break;
            }
        }
        for line in lines {
            self.handle_line(Transport::Serial, &line, now);
        }
    }

    fn service_network(&mut self, now: u64) {
        if self.net.is_connected() {
            let wall = &self.wall;
            self.server.accept(&mut self.ethernet, || {
                let stamp = format_hms(wall.epoch_secs());
                response::to_line(&response::welcome(FIRMWARE_VERSION, &stamp))
            });
            for (from, line) in self.server.poll_lines(&mut self.ethernet) {
                self.handle_line(from, &line, now);
            }
        }

        if self.scheduler.due(Task::NetworkHealth, now) {
            let was_connected = self.net.is_connected();
            self.net
                .check_health(&mut self.ethernet, &self.settings.network, now);
            if was_connected && !self.net.is_connected() {
                self.server.disconnect_all(&mut self.ethernet);
            }
        }

        if self.scheduler.due(Task::Heartbeat, now)
            && self.net.is_connected()
            && self.server.peer_count() > 0
        {
            let stamp = format_hms(self.wall.epoch_secs());
            let line = response::to_line(&response::heartbeat(&stamp, now));
            self.server.broadcast_tcp(&mut self.ethernet, &line);
        }
    }

    fn push_stream(&mut self, now: u64) {
        let Some(target) = self.server.stream_due(now) else {
            return;
        };
        let line = response::to_line(&self.live_data(now));
        match target {
            StreamTarget::Serial => self.serial.write_str(&line),
            StreamTarget::Tcp => self.server.broadcast_tcp(&mut self.ethernet, &line),
            StreamTarget::Udp(addr) if self.net.is_connected() => {
                self.server
                    .send(&mut self.ethernet, Transport::Udp(addr), &line)
            }
            StreamTarget::Udp(_) => {}
        }
    }

    /// Send one response line back over the transport it answers.
    fn reply(&mut self, to: Transport, line: &str) {
        match to {
            Transport::Serial => self.serial.write_str(line),
            _ => self.server.send(&mut self.ethernet, to, line),
        }
    }

    fn refresh_graph(&mut self, now: u64) {
        let script_time = self.script.script_time(now);
        self.graph
            .record(now, script_time, self.sampler.snapshot());
        if !self.graph_visible {
            return;
        }
        if let Refresh::Full { points } = self.graph.refresh(now, script_time) {
            debug!("Graph regenerated with {} points", points);
        }
        if self
            .graph
            .buffer_mut()
            .flush(&mut self.panel, GRAPH_ORIGIN)
            .is_err()
        {
            warn!("Graph flush to panel failed");
        }
    }

    fn redraw(&mut self, now: u64, press: Option<FeedbackLook>) {
        let notice = self.notice.take();
        let script_clock = self.script.script_seconds(now).map(format_script_clock);
        let view = PanelView {
            outputs: self.arbiter.states(),
            readings: self.sampler.snapshot(),
            locked: self.arbiter.locked(),
            safety_stop: self.arbiter.safety_stop(),
            recording: self.recorder.is_recording(),
            external_sd: self.sd.external_present(),
            script_name: self.script.plan().map(|p| p.name.as_str()),
            script_clock: script_clock.as_ref().map(|c| c.as_str()),
            clock: self.clock_text.as_str(),
            notice: notice.as_deref(),
            press,
            graph_visible: self.graph_visible,
        };
        self.panel.redraw(&view);
    }

    fn write_record(&mut self, now: u64) {
        if !self.recorder.is_recording() {
            return;
        }
        let epoch = self.wall.epoch_secs();
        let states = self.arbiter.states();
        let result = self.recorder.write_row(
            self.sd.external(),
            now,
            epoch,
            &states,
            self.sampler.snapshot(),
        );
        if result == Err(RecorderError::FileInvalid) {
            self.sd.mark_external_lost();
        }
    }

    fn record_format(&self) -> Format {
        if self.settings.system.csv_output {
            Format::Csv
        } else {
            Format::Json
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.settings.save(&mut self.eeprom) {
            error!("Could not save settings: {}", e);
        }
    }

    /// Latch the safety stop, aborting the script and any recording.
    ///
    /// Returns `false` if it was already engaged.
    pub fn engage_safety_stop(&mut self) -> bool {
        if !self.arbiter.engage_safety_stop() {
            return false;
        }
        let now = self.clock.now_ms();
        if self.script.is_active() {
            if let Ok(end) = self.script.stop(true, &mut self.arbiter) {
                self.finish_run(end, now);
            }
        }
        self.recorder.stop(self.sd.external(), now, true);
        true
    }

    pub fn release_safety_stop(&mut self) -> bool {
        self.arbiter.release_safety_stop()
    }

    /// Start a manual recording on the external card.
    pub fn start_recording(&mut self) -> Result<(), AppError> {
        let now = self.clock.now_ms();
        let epoch = self.wall.epoch_secs();
        let format = self.record_format();
        self.recorder
            .start(self.sd.external(), format, now, epoch, None)?;
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<SessionSummary, AppError> {
        let now = self.clock.now_ms();
        let summary = self
            .recorder
            .stop(self.sd.external(), now, false)
            .ok_or(RecorderError::NotRecording)?;
        Ok(summary)
    }

    /// Load `/scripts/<name>.json`. On failure the current plan stays.
    pub fn load_script(&mut self, name: &str) -> Result<(), AppError> {
        if self.script.is_active() {
            return Err(ScriptError::NotIdle.into());
        }
        let plan = library::load(self.sd.internal(), name)
            .inspect_err(|e| warn!("Script '{}' not loaded: {}", name, e))?;
        self.script.load(plan)?;
        Ok(())
    }

    /// Run the loaded plan from its `t_start`.
    pub fn start_script(&mut self) -> Result<(), AppError> {
        let now = self.clock.now_ms();
        let use_record = self.script.start(now, &mut self.arbiter)?;
        self.graph.clear(now);

        let epoch = self.wall.epoch_secs();
        if use_record && !self.recorder.is_recording() {
            let format = self.record_format();
            // A failed open leaves the run going; the notice reports it
            if let Err(e) = self.recorder.start(
                self.sd.external(),
                format,
                now,
                epoch,
                self.script.plan(),
            ) {
                warn!("Script runs without a recording: {}", e);
            }
        }
        if let Some(plan) = self.script.plan_mut() {
            if let Err(e) = library::mark_used(self.sd.internal(), plan, epoch) {
                warn!("Could not stamp last use of '{}': {}", plan.name, e);
            }
        }
        Ok(())
    }

    pub fn pause_script(&mut self) -> Result<(), AppError> {
        self.script.pause(self.clock.now_ms())?;
        Ok(())
    }

    pub fn resume_script(&mut self) -> Result<(), AppError> {
        self.script.resume(self.clock.now_ms())?;
        Ok(())
    }

    /// Operator abort of the running script.
    pub fn stop_script(&mut self) -> Result<(), AppError> {
        let now = self.clock.now_ms();
        let end = self.script.stop(true, &mut self.arbiter)?;
        self.finish_run(end, now);
        Ok(())
    }

    fn finish_run(&mut self, end: RunEnd, now: u64) {
        if self.recorder.is_script_owned() {
            self.recorder
                .stop(self.sd.external(), now, end.ended_early);
        }
        self.graph.anchor_script_end(end.last_sec as f32, now);
    }

    /// Clamp, persist and apply a fan speed. Returns the applied speed.
    pub fn set_fan_speed(&mut self, speed: i64) -> u8 {
        let speed = self.settings.system.set_fan_speed(speed);
        self.persist();
        self.fan
            .apply(self.settings.system.fan_on, self.settings.system.fan_speed);
        speed
    }

    pub fn set_update_rate(&mut self, ms: i64) -> u16 {
        let rate = self.settings.system.set_update_rate(ms);
        self.persist();
        rate
    }

    fn reset_graph(&mut self, now: u64) {
        self.settings.graph = GraphSettings::default();
        self.graph = GraphEngine::new(self.settings.graph, now);
        self.scheduler
            .set_graph_refresh_ms(self.settings.graph.refresh_ms as u64, now);
        self.persist();
    }

    /// Reset the system block; the script sort order is kept.
    fn reset_system(&mut self) {
        self.settings.system = SystemSettings {
            sort_order: self.settings.system.sort_order,
            ..SystemSettings::default()
        };
        self.fan
            .apply(self.settings.system.fan_on, self.settings.system.fan_speed);
        self.persist();
    }

    fn persist_graph(&mut self) {
        self.settings.graph = *self.graph.settings();
        self.persist();
    }

    /// Apply an operator intent from the touch UI or keypad. Refusals are
    /// shown as a one-shot notice.
    pub fn handle_ui(&mut self, action: UiAction) {
        let now = self.clock.now_ms();
        if let Err(e) = self.apply_ui(action, now) {
            warn!("UI action refused: {}", e);
            self.notice = Some(e.to_string());
        }
    }

    fn apply_ui(&mut self, action: UiAction, now: u64) -> Result<(), AppError> {
        match action {
            UiAction::ToggleOutput(ch) => {
                let on = !self.arbiter.is_on(ch);
                self.arbiter.set_output(ch, on)?;
            }
            UiAction::AllOn => self.arbiter.all_on()?,
            UiAction::AllOff => self.arbiter.all_off()?,
            UiAction::ToggleLock => self.arbiter.toggle_lock()?,
            UiAction::SafetyStop => {
                if self.arbiter.safety_stop() {
                    self.release_safety_stop();
                } else {
                    self.engage_safety_stop();
                }
            }
            UiAction::ToggleRecording => {
                if self.recorder.is_recording() {
                    self.stop_recording()?;
                } else {
                    self.start_recording()?;
                }
            }
            UiAction::LoadScript(name) => self.load_script(&name)?,
            UiAction::SaveScript(plan) => {
                plan.validate()?;
                library::save(self.sd.internal(), &plan)?;
            }
            UiAction::DeleteScript(name) => library::delete(self.sd.internal(), &name)?,
            UiAction::StartScript => self.start_script()?,
            UiAction::PauseScript => self.pause_script()?,
            UiAction::ResumeScript => self.resume_script()?,
            UiAction::StopScript => self.stop_script()?,
            UiAction::ShowGraph(show) => {
                self.graph_visible = show;
                if show {
                    self.graph.invalidate();
                }
            }
            UiAction::GraphTab(tab) => self.graph.set_tab(tab),
            UiAction::GraphSeries(series) => {
                let tab = self.graph.tab();
                self.graph.set_series(tab, series);
                self.persist_graph();
            }
            UiAction::GraphTimeRange(seconds) => {
                self.graph.set_time_range(seconds);
                self.persist_graph();
            }
            UiAction::GraphPause(true) => {
                let script_time = self.script.script_time(now);
                self.graph.pause(now, script_time);
            }
            UiAction::GraphPause(false) => self.graph.resume(),
            UiAction::GraphClear => self.graph.clear(now),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::ChannelId;
    use crate::sim::SimBoard;

    fn boot() -> (App<SimBoard>, SimBoard) {
        let board = SimBoard::new();
        let handles = board.clone();
        (App::new(board), handles)
    }

    #[test]
    fn test_boot_mounts_cards_and_writes_default_settings() {
        let (app, _) = boot();
        assert_eq!(app.sd_present(), (true, true));
        assert_eq!(app.settings(), &Settings::default());
        assert_eq!(app.network_state(), InitState::CheckingLink);
    }

    #[test]
    fn test_fan_speed_persists_and_applies() {
        let (mut app, board) = boot();
        assert_eq!(board.fan.duty(), 255, "default fan is full speed");
        assert_eq!(app.set_fan_speed(300), 255);
        assert_eq!(app.set_fan_speed(0), 0);
        assert_eq!(board.fan.duty(), 0);
        assert!(!app.settings().system.fan_on);

        let app2 = App::new(board.clone());
        assert_eq!(app2.settings().system.fan_speed, 0, "speed survives reboot");
    }

    #[test]
    fn test_touch_is_debounced() {
        let (mut app, board) = boot();
        let gse1 = ChannelId::ALL[0];
        board.panel.touch(UiAction::ToggleOutput(gse1));
        app.step();
        board.clock.advance(50);
        board.panel.touch(UiAction::ToggleOutput(gse1));
        app.step();
        assert!(app.arbiter().is_on(gse1), "second tap inside 200 ms dropped");
        board.clock.advance(200);
        board.panel.touch(UiAction::ToggleOutput(gse1));
        app.step();
        assert!(!app.arbiter().is_on(gse1));
    }

    #[test]
    fn test_refusal_becomes_notice() {
        let (mut app, board) = boot();
        board.panel.key(UiAction::ToggleLock);
        board.panel.key(UiAction::ToggleOutput(ChannelId::ALL[2]));
        app.step();
        board.clock.advance(10);
        app.step();
        board.clock.advance(300);
        app.step();
        assert!(
            board.panel.notices().iter().any(|n| n.contains("locked")),
            "lock denial shown on the panel: {:?}",
            board.panel.notices()
        );
    }

    #[test]
    fn test_safety_stop_toggle_from_ui() {
        let (mut app, _) = boot();
        app.handle_ui(UiAction::SafetyStop);
        assert!(app.arbiter().safety_stop());
        app.handle_ui(UiAction::SafetyStop);
        assert!(!app.arbiter().safety_stop());
    }
}
