//! The front panel on an `embedded-graphics-simulator` display.
//!
//! The app draws the strip chart straight into the display; `redraw` paints
//! the rest of the screen: channel tiles on the left, mode indicators across
//! the top and a readings table when the chart is hidden. Mouse clicks are
//! hit-tested against the same layout and queued as touches.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::Write as _;
use std::path::Path;
use std::rc::Rc;

use embedded_graphics::mono_font::{MonoTextStyle, ascii::FONT_6X10};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::Text;
use embedded_graphics_simulator::{OutputSettings, OutputSettingsBuilder, SimulatorDisplay};

use powerbox_core::app::GRAPH_ORIGIN;
use powerbox_core::arbiter::ChannelId;
use powerbox_core::board::{Panel, PanelView, UiAction};
use powerbox_core::config::{BUS_SENSOR_INDEX, GRAPH_HEIGHT, GRAPH_WIDTH, SENSOR_NAMES};
use powerbox_core::time::FeedbackLook;

pub const PANEL_WIDTH: u32 = 480;
pub const PANEL_HEIGHT: u32 = 320;

const TILE_X: i32 = 5;
const TILE_TOP: i32 = 10;
const TILE_SIZE: Size = Size::new(115, 44);
const TILE_PITCH: i32 = 50;

const DARK_GRAY: Rgb565 = Rgb565::new(4, 8, 4);
const PRESSED: Rgb565 = Rgb565::new(10, 20, 10);

/// Mode indicators along the top bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indicator {
    Lock,
    Stop,
    Record,
}

impl Indicator {
    const ALL: [Indicator; 3] = [Indicator::Lock, Indicator::Stop, Indicator::Record];

    fn bounds(self) -> Rectangle {
        let slot = match self {
            Self::Lock => 0,
            Self::Stop => 1,
            Self::Record => 2,
        };
        Rectangle::new(Point::new(130 + slot * 60, 8), Size::new(54, 22))
    }

    fn label(self) -> &'static str {
        match self {
            Self::Lock => "LOCK",
            Self::Stop => "STOP",
            Self::Record => "REC",
        }
    }

    fn action(self) -> UiAction {
        match self {
            Self::Lock => UiAction::ToggleLock,
            Self::Stop => UiAction::SafetyStop,
            Self::Record => UiAction::ToggleRecording,
        }
    }

    fn active(self, view: &PanelView<'_>) -> Option<Rgb565> {
        let (on, color) = match self {
            Self::Lock => (view.locked, Rgb565::YELLOW),
            Self::Stop => (view.safety_stop, Rgb565::RED),
            Self::Record => (view.recording, Rgb565::MAGENTA),
        };
        on.then_some(color)
    }
}

fn tile_bounds(ch: ChannelId) -> Rectangle {
    let y = TILE_TOP + ch.index() as i32 * TILE_PITCH;
    Rectangle::new(Point::new(TILE_X, y), TILE_SIZE)
}

fn graph_bounds() -> Rectangle {
    Rectangle::new(GRAPH_ORIGIN, Size::new(GRAPH_WIDTH as u32, GRAPH_HEIGHT as u32))
}

/// Touch intent for a click at `point`.
pub fn hit(point: Point) -> Option<UiAction> {
    if let Some(ch) = ChannelId::ALL
        .into_iter()
        .find(|&ch| tile_bounds(ch).contains(point))
    {
        return Some(UiAction::ToggleOutput(ch));
    }
    Indicator::ALL
        .into_iter()
        .find(|i| i.bounds().contains(point))
        .map(Indicator::action)
}

struct PanelState {
    display: SimulatorDisplay<Rgb565>,
    touches: VecDeque<UiAction>,
    keys: VecDeque<UiAction>,
}

/// Shared handle: one copy goes to the app, the console keeps another.
#[derive(Clone)]
pub struct HostPanel {
    state: Rc<RefCell<PanelState>>,
}

impl HostPanel {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PanelState {
                display: SimulatorDisplay::new(Size::new(PANEL_WIDTH, PANEL_HEIGHT)),
                touches: VecDeque::new(),
                keys: VecDeque::new(),
            })),
        }
    }

    pub fn touch(&self, action: UiAction) {
        self.state.borrow_mut().touches.push_back(action);
    }

    pub fn key(&self, action: UiAction) {
        self.state.borrow_mut().keys.push_back(action);
    }

    /// Run `f` against the display, e.g. to push it to a window.
    pub fn with_display<R>(&self, f: impl FnOnce(&SimulatorDisplay<Rgb565>) -> R) -> R {
        f(&self.state.borrow().display)
    }

    /// Save the screen as a PNG at native resolution.
    pub fn save_png(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let settings: OutputSettings = OutputSettingsBuilder::new().build();
        self.with_display(|display| display.to_rgb_output_image(&settings).save_png(path))?;
        Ok(())
    }
}

impl OriginDimensions for HostPanel {
    fn size(&self) -> Size {
        Size::new(PANEL_WIDTH, PANEL_HEIGHT)
    }
}

impl DrawTarget for HostPanel {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.state.borrow_mut().display.draw_iter(pixels)
    }
}

fn draw_label<D>(display: &mut D, text: &str, at: Point, color: Rgb565)
where
    D: DrawTarget<Color = Rgb565>,
{
    let style = MonoTextStyle::new(&FONT_6X10, color);
    let _ = Text::new(text, at, style).draw(display);
}

fn fill<D: DrawTarget<Color = Rgb565>>(display: &mut D, area: Rectangle, color: Rgb565) {
    let _ = area.into_styled(PrimitiveStyle::with_fill(color)).draw(display);
}

fn draw_tiles<D: DrawTarget<Color = Rgb565>>(display: &mut D, view: &PanelView<'_>) {
    let border = match view.press {
        Some(FeedbackLook::Pressed) => PRESSED,
        _ => Rgb565::WHITE,
    };
    let mut line = String::new();
    for ch in ChannelId::ALL {
        let on = view.outputs[ch.index()];
        let area = tile_bounds(ch);
        fill(display, area, if on { Rgb565::GREEN } else { DARK_GRAY });
        let _ = area
            .into_styled(PrimitiveStyle::with_stroke(border, 1))
            .draw(display);

        let ink = if on { Rgb565::BLACK } else { Rgb565::WHITE };
        let origin = area.top_left;
        draw_label(display, ch.name(), origin + Point::new(6, 14), ink);
        draw_label(display, if on { "ON" } else { "OFF" }, origin + Point::new(80, 14), ink);
        if let Some(sensor) = ch.sensor_index() {
            line.clear();
            let _ = write!(
                line,
                "{:5.2}V {:5.2}A",
                view.readings.volts[sensor],
                view.readings.current_amps(sensor)
            );
            draw_label(display, &line, origin + Point::new(6, 32), ink);
        }
    }
}

fn draw_top_bar<D: DrawTarget<Color = Rgb565>>(display: &mut D, view: &PanelView<'_>) {
    fill(
        display,
        Rectangle::new(Point::new(125, 0), Size::new(PANEL_WIDTH - 125, 56)),
        Rgb565::BLACK,
    );
    for indicator in Indicator::ALL {
        let area = indicator.bounds();
        let (back, ink) = match indicator.active(view) {
            Some(color) => (color, Rgb565::BLACK),
            None => (DARK_GRAY, Rgb565::WHITE),
        };
        fill(display, area, back);
        draw_label(display, indicator.label(), area.top_left + Point::new(8, 15), ink);
    }

    draw_label(display, view.clock, Point::new(410, 22), Rgb565::WHITE);
    if let Some(name) = view.script_name {
        let clock = view.script_clock.unwrap_or("");
        draw_label(display, &format!("{} {}", name, clock), Point::new(130, 48), Rgb565::CYAN);
    }
    if !view.external_sd {
        draw_label(display, "NO SD", Point::new(330, 22), Rgb565::RED);
    }
}

fn draw_readings<D: DrawTarget<Color = Rgb565>>(display: &mut D, view: &PanelView<'_>) {
    let area = graph_bounds();
    fill(display, area, Rgb565::BLACK);
    let mut line = String::new();
    let mut at = area.top_left + Point::new(8, 16);
    for sensor in 0..=BUS_SENSOR_INDEX {
        let reading = view.readings.reading(sensor);
        line.clear();
        let name = SENSOR_NAMES[sensor];
        let _ = write!(
            line,
            "{:<6}{:7.2} V {:7.3} A {:7.2} W",
            name,
            reading.bus_volts,
            reading.current_ma / 1000.0,
            reading.power_w
        );
        draw_label(display, &line, at, Rgb565::WHITE);
        at.y += 16;
    }
}

fn draw_notice<D: DrawTarget<Color = Rgb565>>(display: &mut D, notice: Option<&str>) {
    let area = Rectangle::new(Point::new(125, 290), Size::new(PANEL_WIDTH - 125, 30));
    fill(display, area, Rgb565::BLACK);
    if let Some(text) = notice {
        draw_label(display, text, area.top_left + Point::new(5, 18), Rgb565::YELLOW);
    }
}

/// Everything but the strip chart, which is left alone while it is shown.
fn paint<D: DrawTarget<Color = Rgb565>>(display: &mut D, view: &PanelView<'_>) {
    draw_tiles(display, view);
    draw_top_bar(display, view);
    if !view.graph_visible {
        draw_readings(display, view);
    }
    draw_notice(display, view.notice);
}

impl Panel for HostPanel {
    fn poll_touch(&mut self) -> Option<UiAction> {
        self.state.borrow_mut().touches.pop_front()
    }

    fn poll_keypad(&mut self) -> Option<UiAction> {
        self.state.borrow_mut().keys.pop_front()
    }

    fn redraw(&mut self, view: &PanelView<'_>) {
        paint(&mut self.state.borrow_mut().display, view);
    }
}
