//! Real-time strip chart
//!
//! Every sensor sample is appended to a ring buffer per channel and series.
//! On each refresh the engine either scrolls the framebuffer by the columns
//! the elapsed time covers and draws the newest segment (partial shift), or
//! clears it and replots every sample inside the visible window (full
//! regenerate). Any change to the tab, series, window, capacity or pause
//! state sets `needs_regenerate`; the next refresh takes the slow path once
//! and clears it. Auto-fit Y bounds are sticky: they only change when the
//! data leaves them or shrinks well inside them.

mod framebuffer;
mod ring;
mod settings;

pub use framebuffer::GraphBuffer;
pub use ring::{Sample, SampleRing};
pub use settings::{AllTabGraph, Bounds, ChannelGraph, GraphSettings, Series, SeriesBounds, Tab};

use alloc::vec::Vec;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::prelude::*;
use log::debug;
use thiserror_no_std::Error;

use crate::arbiter::ChannelId;
use crate::config::{
    CHANNEL_COUNT, GRAPH_GRID_COLOR, GRAPH_HEIGHT, GRAPH_MAX_POINTS, GRAPH_MAX_TIME_RANGE_S,
    GRAPH_MIN_POINTS, GRAPH_MIN_TIME_RANGE_S, GRAPH_WIDTH,
};
use crate::scheduler::clamp_refresh_ms;
use crate::sensors::Snapshot;

/// Y bounds closer than this are treated as a flat trace.
const FLAT_SPAN: f32 = 0.001;
/// Auto-fit margin as a fraction of the data span.
const FIT_MARGIN: f32 = 0.1;
/// Shown auto-fit bounds are refitted once the data needs less than this
/// fraction of their span.
const REFIT_FILL: f32 = 0.25;

const BACKGROUND: Rgb565 = Rgb565::BLACK;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("capacity {0} outside 10..=900")]
    InvalidCapacity(u16),
    #[error("Y range must have max above min")]
    InvalidRange,
}

pub type GraphResult<T> = Result<T, GraphError>;

/// What a refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Cleared and replotted; `points` in-window samples were drawn.
    Full { points: usize },
    Partial,
    /// Paused with nothing to redraw.
    Idle,
}

/// Visible data window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub t_min: f32,
    pub t_max: f32,
    pub y: Bounds,
}

impl Window {
    pub fn contains_time(&self, t: f32) -> bool {
        t >= self.t_min && t <= self.t_max
    }

    /// Data to pixel coordinates, clamped to the plot area.
    pub fn to_pixel(&self, sample: Sample) -> Point {
        let w = (GRAPH_WIDTH - 1) as f32;
        let h = (GRAPH_HEIGHT - 1) as f32;
        let t_span = self.t_max - self.t_min;
        let t_norm = if t_span > 0.0 {
            ((sample.t - self.t_min) / t_span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let v_norm = ((sample.v - self.y.min) / (self.y.max - self.y.min)).clamp(0.0, 1.0);
        Point::new((t_norm * w) as i32, (h - v_norm * h) as i32)
    }
}

/// Where the time axis is anchored after a script ends.
#[derive(Debug, Clone, Copy)]
struct ScriptAnchor {
    script_time: f32,
    at_ms: u64,
}

pub struct GraphEngine {
    settings: GraphSettings,
    rings: Vec<[SampleRing; 3]>,
    buffer: GraphBuffer,
    tab: Tab,
    start_ms: u64,
    anchor: Option<ScriptAnchor>,
    paused_window: Option<(f32, f32)>,
    last_y: Option<Bounds>,
    /// Axis time at the right edge of the framebuffer.
    drawn_t: f32,
    needs_regenerate: bool,
}

fn color(raw: u16) -> Rgb565 {
    Rgb565::from(RawU16::new(raw))
}

fn finite(sample: &Sample) -> bool {
    sample.t.is_finite() && sample.v.is_finite()
}

fn fit_bounds(lo: f32, hi: f32) -> Bounds {
    let mut span = hi - lo;
    if span < FLAT_SPAN {
        span = 1.0;
    }
    Bounds::new(lo - FIT_MARGIN * span, hi + FIT_MARGIN * span)
}

/// Whether `shown` still frames data spanning `lo..=hi`.
fn still_fits(shown: Bounds, lo: f32, hi: f32) -> bool {
    let fitted = fit_bounds(lo, hi);
    lo >= shown.min
        && hi <= shown.max
        && fitted.max - fitted.min >= REFIT_FILL * (shown.max - shown.min)
}

impl GraphEngine {
    pub fn new(mut settings: GraphSettings, now_ms: u64) -> Self {
        if !settings.is_valid() {
            settings = GraphSettings::default();
        }
        let capacity = settings.capacity as usize;
        Self {
            settings,
            rings: Self::alloc_rings(capacity),
            buffer: GraphBuffer::new(),
            tab: Tab::All,
            start_ms: now_ms,
            anchor: None,
            paused_window: None,
            last_y: None,
            drawn_t: 0.0,
            needs_regenerate: true,
        }
    }

    fn alloc_rings(capacity: usize) -> Vec<[SampleRing; 3]> {
        (0..CHANNEL_COUNT)
            .map(|_| core::array::from_fn(|_| SampleRing::new(capacity)))
            .collect()
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn buffer(&self) -> &GraphBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut GraphBuffer {
        &mut self.buffer
    }

    pub fn ring(&self, ch: ChannelId, series: Series) -> &SampleRing {
        &self.rings[ch.index()][series.index()]
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn needs_regenerate(&self) -> bool {
        self.needs_regenerate
    }

    pub fn is_paused(&self) -> bool {
        self.paused_window.is_some()
    }

    /// Force the next refresh to replot, e.g. when the chart is shown again.
    pub fn invalidate(&mut self) {
        self.needs_regenerate = true;
    }

    /// Drop all history and restart the time axis at `now_ms`.
    pub fn clear(&mut self, now_ms: u64) {
        for series in self.rings.iter_mut() {
            for ring in series.iter_mut() {
                ring.clear();
            }
        }
        self.start_ms = now_ms;
        self.anchor = None;
        self.needs_regenerate = true;
    }

    /// Keep the axis continuous with the script clock after a run ends.
    pub fn anchor_script_end(&mut self, script_time: f32, now_ms: u64) {
        self.anchor = Some(ScriptAnchor {
            script_time,
            at_ms: now_ms,
        });
    }

    /// Current axis time in seconds.
    pub fn axis_time(&self, now_ms: u64, script_time: Option<f32>) -> f32 {
        if let Some(t) = script_time {
            return t;
        }
        match self.anchor {
            Some(a) => a.script_time + now_ms.saturating_sub(a.at_ms) as f32 / 1000.0,
            None => now_ms.saturating_sub(self.start_ms) as f32 / 1000.0,
        }
    }

    /// Append the published values at the current axis time.
    pub fn record(&mut self, now_ms: u64, script_time: Option<f32>, snapshot: &Snapshot) {
        let t = self.axis_time(now_ms, script_time);
        for ch in ChannelId::ALL {
            let Some(sensor) = ch.sensor_index() else {
                continue;
            };
            let values = [
                snapshot.current_amps(sensor),
                snapshot.volts[sensor],
                snapshot.power_w[sensor],
            ];
            for (ring, v) in self.rings[ch.index()].iter_mut().zip(values) {
                // Non-finite samples never reach the chart
                if v.is_finite() {
                    ring.push(Sample { t, v });
                }
            }
        }
    }

    pub fn set_tab(&mut self, tab: Tab) {
        if self.tab != tab {
            self.tab = tab;
            self.needs_regenerate = true;
        }
    }

    pub fn set_series(&mut self, tab: Tab, series: Series) {
        match tab {
            Tab::All => self.settings.all.series = series,
            Tab::Channel(ch) => self.settings.channels[ch.index()].series = series,
        }
        self.needs_regenerate = true;
    }

    pub fn set_visible(&mut self, ch: ChannelId, visible: bool) {
        self.settings.all.visible[ch.index()] = visible;
        self.needs_regenerate = true;
    }

    /// Window length, clamped to 1..=300 s.
    pub fn set_time_range(&mut self, seconds: f32) -> f32 {
        let seconds = if seconds.is_finite() {
            seconds.clamp(GRAPH_MIN_TIME_RANGE_S, GRAPH_MAX_TIME_RANGE_S)
        } else {
            GRAPH_MIN_TIME_RANGE_S
        };
        self.settings.time_range_s = seconds;
        self.needs_regenerate = true;
        seconds
    }

    pub fn set_y_range(&mut self, tab: Tab, series: Series, bounds: Bounds) -> GraphResult<()> {
        if !bounds.is_valid() {
            return Err(GraphError::InvalidRange);
        }
        let slot = match tab {
            Tab::All => &mut self.settings.all.bounds[series.index()],
            Tab::Channel(ch) => &mut self.settings.channels[ch.index()].bounds[series.index()],
        };
        *slot = bounds;
        self.needs_regenerate = true;
        Ok(())
    }

    pub fn set_auto_fit(&mut self, on: bool) {
        self.settings.auto_fit = on;
        self.needs_regenerate = true;
    }

    pub fn set_line_thickness(&mut self, px: u8) {
        self.settings.line_thickness = px.clamp(1, 3);
        self.needs_regenerate = true;
    }

    pub fn set_grid(&mut self, on: bool) {
        self.settings.show_grid = on;
        self.needs_regenerate = true;
    }

    /// Refresh interval, clamped to the scheduler bounds.
    pub fn set_refresh_ms(&mut self, ms: u64) -> u64 {
        let ms = clamp_refresh_ms(ms);
        self.settings.refresh_ms = ms as u16;
        ms
    }

    /// Resize every ring. History is cleared.
    pub fn set_capacity(&mut self, capacity: u16, now_ms: u64) -> GraphResult<()> {
        if !(GRAPH_MIN_POINTS..=GRAPH_MAX_POINTS).contains(&capacity) {
            return Err(GraphError::InvalidCapacity(capacity));
        }
        self.settings.capacity = capacity;
        self.rings = Self::alloc_rings(capacity as usize);
        self.clear(now_ms);
        Ok(())
    }

    /// Freeze the window at the current instant.
    pub fn pause(&mut self, now_ms: u64, script_time: Option<f32>) {
        if self.paused_window.is_none() {
            let t = self.axis_time(now_ms, script_time);
            self.paused_window = Some((t - self.settings.time_range_s, t));
            self.needs_regenerate = true;
        }
    }

    pub fn resume(&mut self) {
        if self.paused_window.take().is_some() {
            self.needs_regenerate = true;
        }
    }

    fn visible_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        ChannelId::ALL.into_iter().filter(move |ch| match self.tab {
            Tab::All => self.settings.all.visible[ch.index()],
            Tab::Channel(selected) => selected == *ch,
        })
    }

    /// Visible time and Y window.
    pub fn window(&self, now_ms: u64, script_time: Option<f32>) -> Window {
        let (t_min, t_max) = match self.paused_window {
            Some(frozen) => frozen,
            None => {
                let t = self.axis_time(now_ms, script_time);
                let range = self.settings.time_range_s.max(GRAPH_MIN_TIME_RANGE_S);
                (t - range, t)
            }
        };
        let series = self.settings.series_for(self.tab);
        let mut y = self.settings.bounds_for(self.tab, series);

        if self.settings.auto_fit {
            let mut lo = f32::MAX;
            let mut hi = f32::MIN;
            for ch in self.visible_channels() {
                for s in self.ring(ch, series).iter() {
                    if finite(&s) && s.t >= t_min && s.t <= t_max {
                        lo = lo.min(s.v);
                        hi = hi.max(s.v);
                    }
                }
            }
            if lo <= hi {
                y = match self.last_y {
                    Some(shown) if still_fits(shown, lo, hi) => shown,
                    _ => fit_bounds(lo, hi),
                };
            }
        }

        Window {
            t_min,
            t_max,
            y: y.normalized(),
        }
    }

    /// One graph refresh.
    pub fn refresh(&mut self, now_ms: u64, script_time: Option<f32>) -> Refresh {
        if self.needs_regenerate {
            self.last_y = None;
        }
        let window = self.window(now_ms, script_time);
        if self.last_y != Some(window.y) {
            self.last_y = Some(window.y);
            self.needs_regenerate = true;
        }

        if !self.needs_regenerate {
            if self.is_paused() {
                return Refresh::Idle;
            }
            let px_per_s = (GRAPH_WIDTH - 1) as f32 / (window.t_max - window.t_min);
            let behind = (window.t_max - self.drawn_t) * px_per_s;
            if (0.0..GRAPH_WIDTH as f32).contains(&behind) {
                let columns = behind as usize;
                self.drawn_t += columns as f32 / px_per_s;
                self.shift(&window, columns);
                return Refresh::Partial;
            }
            // The axis jumped back or ran past a whole screen
            self.needs_regenerate = true;
        }

        self.needs_regenerate = false;
        self.drawn_t = window.t_max;
        let points = self.regenerate(&window);
        Refresh::Full { points }
    }

    fn grid_rows() -> impl Iterator<Item = i32> {
        (1..5).map(|i| (GRAPH_HEIGHT * i / 5) as i32)
    }

    fn trace_color(&self, ch: ChannelId) -> Rgb565 {
        color(self.settings.channels[ch.index()].color)
    }

    fn regenerate(&mut self, window: &Window) -> usize {
        let _ = self.buffer.clear(BACKGROUND);
        if self.settings.show_grid {
            let grid = color(GRAPH_GRID_COLOR);
            for y in Self::grid_rows() {
                for x in 0..GRAPH_WIDTH as i32 {
                    self.buffer.plot(x, y, grid);
                }
            }
        }

        let series = self.settings.series_for(self.tab);
        let thickness = self.settings.line_thickness;
        let channels: Vec<ChannelId> = self.visible_channels().collect();
        let mut drawn = 0;
        for ch in channels {
            let trace = self.trace_color(ch);
            let mut prev: Option<Point> = None;
            let ring = &self.rings[ch.index()][series.index()];
            for s in ring.iter() {
                if !finite(&s) || !window.contains_time(s.t) {
                    prev = None;
                    continue;
                }
                let p = window.to_pixel(s);
                match prev {
                    Some(from) => self.buffer.line(from, p, trace, thickness),
                    None => self.buffer.plot(p.x, p.y, trace),
                }
                prev = Some(p);
                drawn += 1;
            }
        }
        debug!("Graph regenerated: {} points", drawn);
        drawn
    }

    /// Scroll by `columns` and draw the newest segment of each trace in the
    /// frame that now ends at `drawn_t`.
    fn shift(&mut self, window: &Window, columns: usize) {
        self.buffer.shift_left(columns, BACKGROUND);
        if self.settings.show_grid {
            let grid = color(GRAPH_GRID_COLOR);
            for x in (GRAPH_WIDTH - columns)..GRAPH_WIDTH {
                for y in Self::grid_rows() {
                    self.buffer.plot(x as i32, y, grid);
                }
            }
        }
        let frame = Window {
            t_min: self.drawn_t - (window.t_max - window.t_min),
            t_max: self.drawn_t,
            y: window.y,
        };

        let series = self.settings.series_for(self.tab);
        let thickness = self.settings.line_thickness;
        let channels: Vec<ChannelId> = self.visible_channels().collect();
        for ch in channels {
            let ring = &self.rings[ch.index()][series.index()];
            let (Some(prev), Some(latest)) = (ring.previous(), ring.latest()) else {
                continue;
            };
            if !finite(&prev) || !finite(&latest) {
                continue;
            }
            let from = frame.to_pixel(prev);
            let to = frame.to_pixel(latest);
            let trace = self.trace_color(ch);
            self.buffer.line(from, to, trace, thickness);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(a: f32, b: f32) -> bool {
        a - b < 1e-4 && b - a < 1e-4
    }

    fn snapshot_amps(amps: f32) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.current_ma = [amps * 1000.0; 7];
        snap.volts = [12.0; 7];
        snap
    }

    #[test]
    fn test_first_refresh_regenerates() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        assert!(matches!(graph.refresh(0, None), Refresh::Full { .. }));
        assert_eq!(graph.refresh(50, None), Refresh::Partial);
    }

    #[test]
    fn test_range_change_takes_slow_path_once() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.set_auto_fit(false);
        graph.refresh(0, None);
        graph.set_time_range(10.0);
        assert!(graph.needs_regenerate());
        assert!(matches!(graph.refresh(50, None), Refresh::Full { .. }));
        assert!(!graph.needs_regenerate());
        assert_eq!(graph.refresh(100, None), Refresh::Partial);
    }

    #[test]
    fn test_steady_auto_fit_stays_partial() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        assert!(graph.settings().auto_fit);
        graph.set_tab(Tab::Channel(ChannelId::ALL[0]));
        let mut partial = 0;
        for i in 0..200u64 {
            let amps = if i % 2 == 0 { 1.0 } else { 1.05 };
            graph.record(i * 50, None, &snapshot_amps(amps));
            if graph.refresh(i * 50, None) == Refresh::Partial {
                partial += 1;
            }
        }
        assert_eq!(partial, 199, "only the first refresh replots");
    }

    #[test]
    fn test_auto_fit_refits_when_data_escapes() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.set_tab(Tab::Channel(ChannelId::ALL[0]));
        graph.record(0, None, &snapshot_amps(1.0));
        graph.refresh(0, None);
        graph.record(50, None, &snapshot_amps(3.0));
        assert!(matches!(graph.refresh(50, None), Refresh::Full { .. }));
        let w = graph.window(50, None);
        assert!(w.y.max >= 3.0, "{:?}", w.y);
    }

    #[test]
    fn test_partial_scroll_matches_time_scale() {
        let mut settings = GraphSettings::default();
        settings.auto_fit = false;
        let mut graph = GraphEngine::new(settings, 0);
        graph.set_time_range(10.0);
        graph.set_tab(Tab::Channel(ChannelId::ALL[0]));

        // 1 A baseline with a single 2 A sample at t = 5 s, followed by 2 s
        // of partial refreshes
        let mut now = 0;
        while now <= 7000 {
            let amps = if now == 5000 { 2.0 } else { 1.0 };
            graph.record(now, None, &snapshot_amps(amps));
            let refresh = graph.refresh(now, None);
            if now > 0 {
                assert_eq!(refresh, Refresh::Partial, "at {} ms", now);
            }
            now += 50;
        }

        // t = 5 s sits 80% across a 10 s window ending at 7 s
        let red = color(0xF800);
        let top: Vec<usize> = (0..GRAPH_WIDTH)
            .filter(|&x| graph.buffer().pixel(x, 0) == Some(red))
            .collect();
        assert!(!top.is_empty(), "spike visible");
        assert!(
            top.iter().all(|&x| (264..=278).contains(&x)),
            "spike peak at {:?}",
            top
        );
    }

    #[test]
    fn test_window_only_draws_in_range_samples() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        // 120 s ramp at 2 samples per second
        for i in 0..=240u64 {
            graph.record(i * 500, None, &snapshot_amps(i as f32 / 100.0));
        }
        graph.set_time_range(30.0);
        graph.set_tab(Tab::Channel(ChannelId::ALL[0]));
        let Refresh::Full { points } = graph.refresh(120_000, None) else {
            panic!("expected a full regenerate");
        };
        assert_eq!(points, 61, "samples at 90.0..=120.0 s");
        assert_eq!(graph.ring(ChannelId::ALL[0], Series::Current).len(), 241);
    }

    #[test]
    fn test_auto_fit_pads_span() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.set_tab(Tab::Channel(ChannelId::ALL[0]));
        graph.record(0, None, &snapshot_amps(1.0));
        graph.record(1000, None, &snapshot_amps(2.0));
        let w = graph.window(1000, None);
        assert!(near(w.y.min, 0.9) && near(w.y.max, 2.1), "{:?}", w.y);
    }

    #[test]
    fn test_flat_trace_gets_unit_span() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.record(0, None, &snapshot_amps(1.0));
        graph.record(500, None, &snapshot_amps(1.0));
        let w = graph.window(500, None);
        assert!(near(w.y.min, 0.9) && near(w.y.max, 1.1), "flat trace padded by a unit span: {:?}", w.y);
    }

    #[test]
    fn test_non_finite_samples_skipped() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        let mut snap = snapshot_amps(1.0);
        snap.current_ma[0] = f32::NAN;
        graph.record(0, None, &snap);
        assert!(graph.ring(ChannelId::ALL[0], Series::Current).is_empty());
        assert_eq!(graph.ring(ChannelId::ALL[1], Series::Current).len(), 1);
    }

    #[test]
    fn test_capacity_change_clears() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.record(0, None, &snapshot_amps(1.0));
        assert_eq!(graph.set_capacity(5, 0), Err(GraphError::InvalidCapacity(5)));
        graph.set_capacity(100, 1000).unwrap();
        let ring = graph.ring(ChannelId::ALL[0], Series::Voltage);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 100);
    }

    #[test]
    fn test_axis_follows_script_then_anchor() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 1000);
        assert_eq!(graph.axis_time(3000, None), 2.0);
        assert_eq!(graph.axis_time(3000, Some(-4.0)), -4.0);
        graph.anchor_script_end(10.0, 5000);
        assert_eq!(graph.axis_time(7000, None), 12.0);
        graph.clear(8000);
        assert_eq!(graph.axis_time(9000, None), 1.0);
    }

    #[test]
    fn test_pause_freezes_window() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        graph.refresh(0, None);
        graph.pause(40_000, None);
        let frozen = graph.window(90_000, None);
        assert_eq!((frozen.t_min, frozen.t_max), (10.0, 40.0));
        assert!(matches!(graph.refresh(90_000, None), Refresh::Full { .. }));
        assert_eq!(graph.refresh(90_050, None), Refresh::Idle);
        graph.resume();
        assert!(matches!(graph.refresh(90_100, None), Refresh::Full { .. }));
    }

    #[test]
    fn test_refresh_interval_clamped() {
        let mut graph = GraphEngine::new(GraphSettings::default(), 0);
        assert_eq!(graph.set_refresh_ms(0), 20);
        assert_eq!(graph.set_refresh_ms(5000), 200);
        assert_eq!(graph.set_time_range(0.2), 1.0);
    }
}
