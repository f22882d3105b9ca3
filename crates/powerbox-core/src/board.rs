//! Hardware seam
//!
//! A [`Board`] hands the app every peripheral it needs as concrete types:
//! the panel firmware binds them to MCU pins, the simulator and the tests to
//! the models in `sim` (built with the `sim` feature).

use alloc::string::String;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::pwm::SetDutyCycle;

use crate::arbiter::ChannelId;
use crate::graph::{Series, Tab};
use crate::net::EthernetPhy;
use crate::script::ScriptPlan;
use crate::sensors::{PowerSensors, Snapshot};
use crate::settings::NvStore;
use crate::storage::Volume;
use crate::time::{Clock, FeedbackLook, WallClock};

/// USB serial console.
pub trait SerialLink {
    fn read_byte(&mut self) -> Option<u8>;

    fn write_str(&mut self, text: &str);
}

/// Operator intents produced by the touch UI and keypad layer.
///
/// Hit-testing and T9 entry happen in the panel driver; the app only sees
/// the resulting intent.
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    ToggleOutput(ChannelId),
    AllOn,
    AllOff,
    ToggleLock,
    /// The STOP control: engages, or releases when already engaged.
    SafetyStop,
    ToggleRecording,
    LoadScript(String),
    /// Editor save; replaces the file of the same name.
    SaveScript(ScriptPlan),
    DeleteScript(String),
    StartScript,
    PauseScript,
    ResumeScript,
    StopScript,
    ShowGraph(bool),
    GraphTab(Tab),
    GraphSeries(Series),
    GraphTimeRange(f32),
    GraphPause(bool),
    GraphClear,
}

/// What the panel shows on a redraw.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView<'a> {
    pub outputs: [bool; crate::config::CHANNEL_COUNT],
    pub readings: &'a Snapshot,
    pub locked: bool,
    pub safety_stop: bool,
    pub recording: bool,
    pub external_sd: bool,
    pub script_name: Option<&'a str>,
    pub script_clock: Option<&'a str>,
    pub clock: &'a str,
    /// One-shot message such as a recording failure.
    pub notice: Option<&'a str>,
    pub press: Option<FeedbackLook>,
    pub graph_visible: bool,
}

/// Display, touch and keypad.
///
/// Widget drawing is the panel's business; the strip chart is pushed
/// through [`DrawTarget`].
pub trait Panel: DrawTarget<Color = Rgb565> {
    fn poll_touch(&mut self) -> Option<UiAction>;

    fn poll_keypad(&mut self) -> Option<UiAction>;

    fn redraw(&mut self, view: &PanelView<'_>);
}

/// Peripheral set for one box.
pub trait Board: Sized {
    type Output: OutputPin;
    type Switch: InputPin;
    type Led: OutputPin;
    type Fan: SetDutyCycle;
    type Sensors: PowerSensors;
    type Internal: Volume;
    type External: Volume;
    type Nv: NvStore;
    type Ethernet: EthernetPhy;
    type Clock: Clock;
    type Wall: WallClock;
    type Serial: SerialLink;
    type Panel: Panel;

    fn into_parts(self) -> BoardParts<Self>;
}

pub struct BoardParts<B: Board> {
    pub outputs: [B::Output; crate::config::CHANNEL_COUNT],
    pub switches: [Option<B::Switch>; crate::config::CHANNEL_COUNT],
    pub power_led: B::Led,
    pub lock_led: B::Led,
    pub stop_led: B::Led,
    pub fan: B::Fan,
    pub sensors: B::Sensors,
    pub internal_sd: B::Internal,
    pub external_sd: B::External,
    pub eeprom: B::Nv,
    pub ethernet: B::Ethernet,
    pub clock: B::Clock,
    pub wall: B::Wall,
    pub serial: B::Serial,
    pub panel: B::Panel,
}
