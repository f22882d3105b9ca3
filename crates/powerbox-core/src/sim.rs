//! Software models of the box hardware
//!
//! Every model is a cheap handle over shared state: clone it, hand one copy
//! to the app and keep the other to poke inputs or inspect outputs. The
//! simulator binary builds its bench from these too, swapping in host-backed
//! storage, sockets and display where it needs them.
//!
//! Only built for tests and with the `sim` feature.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::net::{Ipv4Addr, SocketAddrV4};

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_hal::digital::{self, ErrorType, InputPin, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};

use crate::board::{Board, BoardParts, Panel, PanelView, SerialLink, UiAction};
use crate::config::{CHANNEL_COUNT, SENSOR_COUNT};
use crate::net::{EthernetPhy, NetError, NetworkConfig, PeerId};
use crate::sensors::{PowerSensors, Reading, SensorError};
use crate::settings::{NvStore, SettingsError};
use crate::storage::{FileHandle, OpenMode, StorageError, Volume};
use crate::time::{Clock, WallClock};

/// Fault injected into a simulated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault;

impl digital::Error for SimFault {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

impl pwm::Error for SimFault {
    fn kind(&self) -> pwm::ErrorKind {
        pwm::ErrorKind::Other
    }
}

/// Output line (channel driver or LED).
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    high: Rc<Cell<bool>>,
    stuck: Rc<Cell<bool>>,
    writes: Rc<Cell<u32>>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    /// A stuck line rejects every write.
    pub fn set_stuck(&self, stuck: bool) {
        self.stuck.set(stuck);
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    fn write(&self, high: bool) -> Result<(), SimFault> {
        if self.stuck.get() {
            return Err(SimFault);
        }
        self.high.set(high);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

impl ErrorType for SimPin {
    type Error = SimFault;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

/// Active-low rocker switch with pull-up.
#[derive(Debug, Clone, Default)]
pub struct SimSwitch {
    closed: Rc<Cell<bool>>,
}

impl SimSwitch {
    pub fn new(closed: bool) -> Self {
        Self {
            closed: Rc::new(Cell::new(closed)),
        }
    }

    pub fn set_closed(&self, closed: bool) {
        self.closed.set(closed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl ErrorType for SimSwitch {
    type Error = Infallible;
}

impl InputPin for SimSwitch {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.closed.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.closed.get())
    }
}

/// 8-bit fan PWM.
#[derive(Debug, Clone, Default)]
pub struct SimPwm {
    duty: Rc<Cell<u16>>,
}

impl SimPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duty(&self) -> u16 {
        self.duty.get()
    }

    pub fn max(&self) -> u16 {
        255
    }
}

impl pwm::ErrorType for SimPwm {
    type Error = SimFault;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty.set(duty.min(255));
        Ok(())
    }
}

/// Monotonic clock advanced by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms.max(self.now.get()));
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// RTC that ticks with a [`ManualClock`].
#[derive(Debug, Clone)]
pub struct SimWallClock {
    boot_epoch: u64,
    clock: ManualClock,
}

impl SimWallClock {
    pub fn new(boot_epoch: u64, clock: ManualClock) -> Self {
        Self { boot_epoch, clock }
    }
}

impl WallClock for SimWallClock {
    fn epoch_secs(&self) -> u64 {
        self.boot_epoch + self.clock.now_ms() / 1000
    }
}

#[derive(Debug, Default)]
struct SensorState {
    readings: [Reading; SENSOR_COUNT],
    failing: [bool; SENSOR_COUNT],
}

/// The seven power monitors.
#[derive(Debug, Clone, Default)]
pub struct SimSensors {
    state: Rc<RefCell<SensorState>>,
}

impl SimSensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `volts` and `current_ma` on sensor `index`; power follows.
    pub fn set(&self, index: usize, volts: f32, current_ma: f32) {
        if let Some(r) = self.state.borrow_mut().readings.get_mut(index) {
            *r = Reading {
                bus_volts: volts,
                current_ma,
                power_w: volts * current_ma / 1000.0,
            };
        }
    }

    pub fn set_failing(&self, index: usize, failing: bool) {
        if let Some(f) = self.state.borrow_mut().failing.get_mut(index) {
            *f = failing;
        }
    }
}

impl PowerSensors for SimSensors {
    fn read(&mut self, index: usize) -> Result<Reading, SensorError> {
        let state = self.state.borrow();
        match (state.readings.get(index), state.failing.get(index)) {
            (Some(_), Some(true)) => Err(SensorError::Bus {
                address: 0x40 + index as u8,
            }),
            (Some(r), _) => Ok(*r),
            _ => Err(SensorError::NoSuchSensor(index)),
        }
    }
}

/// EEPROM in RAM; blank cells read `0xFF`.
#[derive(Debug, Clone)]
pub struct RamEeprom {
    cells: Rc<RefCell<Vec<u8>>>,
}

impl RamEeprom {
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: Rc::new(RefCell::new(vec![0xFF; capacity])),
        }
    }

    pub fn erase(&self) {
        self.cells.borrow_mut().fill(0xFF);
    }
}

impl NvStore for RamEeprom {
    fn capacity(&self) -> usize {
        self.cells.borrow().len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), SettingsError> {
        let cells = self.cells.borrow();
        let src = cells
            .get(offset..offset + buf.len())
            .ok_or(SettingsError::OutOfRange(cells.len()))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), SettingsError> {
        let mut cells = self.cells.borrow_mut();
        let len = cells.len();
        let dst = cells
            .get_mut(offset..offset + data.len())
            .ok_or(SettingsError::OutOfRange(len))?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    pending: Vec<u8>,
}

#[derive(Debug)]
struct VolumeState {
    present: bool,
    mounted: bool,
    files: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<u32, OpenFile>,
    next_handle: u32,
    activations: u32,
    flushes: u32,
}

/// SD card in RAM. Writes are buffered per handle until flushed or closed.
#[derive(Debug, Clone)]
pub struct MemVolume {
    state: Rc<RefCell<VolumeState>>,
}

impl Default for MemVolume {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", path),
    }
}

impl MemVolume {
    /// A card that is inserted but not yet mounted.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(VolumeState {
                present: true,
                mounted: false,
                files: BTreeMap::new(),
                open: BTreeMap::new(),
                next_handle: 1,
                activations: 0,
                flushes: 0,
            })),
        }
    }

    /// Pull the card. Open handles and unflushed data are lost.
    pub fn eject(&self) {
        let mut s = self.state.borrow_mut();
        s.present = false;
        s.mounted = false;
        s.open.clear();
    }

    pub fn insert(&self) {
        self.state.borrow_mut().present = true;
    }

    pub fn activations(&self) -> u32 {
        self.state.borrow().activations
    }

    pub fn flushes(&self) -> u32 {
        self.state.borrow().flushes
    }

    /// Committed contents of `path`, bypassing mount state.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.borrow().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    fn ready(s: &VolumeState) -> Result<(), StorageError> {
        if !s.present {
            Err(StorageError::NotPresent)
        } else if !s.mounted {
            Err(StorageError::NotMounted)
        } else {
            Ok(())
        }
    }
}

impl Volume for MemVolume {
    fn is_present(&mut self) -> bool {
        self.state.borrow().present
    }

    fn mount(&mut self) -> Result<(), StorageError> {
        let mut s = self.state.borrow_mut();
        if !s.present {
            return Err(StorageError::NotPresent);
        }
        s.mounted = true;
        Ok(())
    }

    fn activate(&mut self) {
        self.state.borrow_mut().activations += 1;
    }

    fn exists(&mut self, path: &str) -> bool {
        let s = self.state.borrow();
        Self::ready(&s).is_ok() && s.files.contains_key(path)
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, StorageError> {
        let mut s = self.state.borrow_mut();
        Self::ready(&s)?;
        match mode {
            OpenMode::Read if !s.files.contains_key(path) => return Err(StorageError::NotFound),
            OpenMode::Read => {}
            OpenMode::Write => {
                s.files.insert(path.to_string(), Vec::new());
            }
            OpenMode::Append => {
                s.files.entry(path.to_string()).or_default();
            }
        }
        let id = s.next_handle;
        s.next_handle += 1;
        s.open.insert(
            id,
            OpenFile {
                path: path.to_string(),
                pending: Vec::new(),
            },
        );
        Ok(FileHandle(id))
    }

    fn write(&mut self, file: FileHandle, data: &[u8]) -> Result<(), StorageError> {
        let mut s = self.state.borrow_mut();
        Self::ready(&s)?;
        let open = s.open.get_mut(&file.0).ok_or(StorageError::BadHandle)?;
        open.pending.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self, file: FileHandle) -> Result<(), StorageError> {
        let mut s = self.state.borrow_mut();
        Self::ready(&s)?;
        let s = &mut *s;
        let open = s.open.get_mut(&file.0).ok_or(StorageError::BadHandle)?;
        let data = core::mem::take(&mut open.pending);
        s.files.entry(open.path.clone()).or_default().extend(data);
        s.flushes += 1;
        Ok(())
    }

    fn size(&mut self, file: FileHandle) -> Result<u64, StorageError> {
        let s = self.state.borrow();
        Self::ready(&s)?;
        let open = s.open.get(&file.0).ok_or(StorageError::BadHandle)?;
        let committed = s.files.get(&open.path).map_or(0, Vec::len);
        Ok((committed + open.pending.len()) as u64)
    }

    fn read_to_end(&mut self, file: FileHandle) -> Result<Vec<u8>, StorageError> {
        let s = self.state.borrow();
        Self::ready(&s)?;
        let open = s.open.get(&file.0).ok_or(StorageError::BadHandle)?;
        let mut data = s.files.get(&open.path).cloned().unwrap_or_default();
        data.extend_from_slice(&open.pending);
        Ok(data)
    }

    fn close(&mut self, file: FileHandle) -> Result<(), StorageError> {
        self.flush(file)?;
        self.state.borrow_mut().open.remove(&file.0);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        let mut s = self.state.borrow_mut();
        Self::ready(&s)?;
        s.files
            .remove(path)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>, StorageError> {
        let s = self.state.borrow();
        Self::ready(&s)?;
        let dir = match dir.trim_end_matches('/') {
            "" => "/",
            d => d,
        };
        Ok(s.files
            .keys()
            .map(|p| split_path(p))
            .filter(|(parent, _)| *parent == dir)
            .map(|(_, name)| name.to_string())
            .collect())
    }
}

#[derive(Debug, Default)]
struct SimPeer {
    inbox: VecDeque<u8>,
    outbox: String,
    open: bool,
}

#[derive(Debug)]
struct EthernetState {
    link: bool,
    dhcp_delay_polls: u32,
    dhcp_polls: Option<u32>,
    ip: Option<Ipv4Addr>,
    listening: Option<(u16, u16)>,
    pending: VecDeque<PeerId>,
    peers: BTreeMap<u32, SimPeer>,
    next_peer: u32,
    closed: usize,
    udp_in: VecDeque<(SocketAddrV4, Vec<u8>)>,
    udp_out: Vec<(SocketAddrV4, String)>,
}

/// Ethernet controller with scripted peers.
#[derive(Debug, Clone)]
pub struct SimEthernet {
    state: Rc<RefCell<EthernetState>>,
}

impl Default for SimEthernet {
    fn default() -> Self {
        Self::new()
    }
}

/// Address handed out by the simulated DHCP server.
pub const SIM_DHCP_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 50);

impl SimEthernet {
    /// Cable plugged in, DHCP answering on the first poll.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(EthernetState {
                link: true,
                dhcp_delay_polls: 0,
                dhcp_polls: None,
                ip: None,
                listening: None,
                pending: VecDeque::new(),
                peers: BTreeMap::new(),
                next_peer: 1,
                closed: 0,
                udp_in: VecDeque::new(),
                udp_out: Vec::new(),
            })),
        }
    }

    pub fn set_link(&self, up: bool) {
        self.state.borrow_mut().link = up;
    }

    /// Polls answered with "no lease yet" before DHCP completes.
    pub fn set_dhcp_delay_polls(&self, polls: u32) {
        self.state.borrow_mut().dhcp_delay_polls = polls;
    }

    pub fn listening(&self) -> Option<(u16, u16)> {
        self.state.borrow().listening
    }

    /// A client connects; it is handed out by the next `accept`.
    pub fn connect_peer(&self) -> PeerId {
        let mut s = self.state.borrow_mut();
        let id = PeerId(s.next_peer);
        s.next_peer += 1;
        s.peers.insert(
            id.0,
            SimPeer {
                open: true,
                ..SimPeer::default()
            },
        );
        s.pending.push_back(id);
        id
    }

    pub fn peer_send(&self, peer: PeerId, data: &[u8]) {
        if let Some(p) = self.state.borrow_mut().peers.get_mut(&peer.0) {
            p.inbox.extend(data.iter().copied());
        }
    }

    /// Client-side hang-up.
    pub fn hang_up(&self, peer: PeerId) {
        if let Some(p) = self.state.borrow_mut().peers.get_mut(&peer.0) {
            p.open = false;
        }
    }

    /// Everything the box has sent to `peer`.
    pub fn peer_output(&self, peer: PeerId) -> String {
        self.state
            .borrow()
            .peers
            .get(&peer.0)
            .map(|p| p.outbox.clone())
            .unwrap_or_default()
    }

    pub fn take_peer_output(&self, peer: PeerId) -> String {
        self.state
            .borrow_mut()
            .peers
            .get_mut(&peer.0)
            .map(|p| core::mem::take(&mut p.outbox))
            .unwrap_or_default()
    }

    pub fn closed_peers(&self) -> usize {
        self.state.borrow().closed
    }

    pub fn udp_inject(&self, from: SocketAddrV4, data: &[u8]) {
        self.state.borrow_mut().udp_in.push_back((from, data.to_vec()));
    }

    pub fn take_udp_sent(&self) -> Vec<(SocketAddrV4, String)> {
        core::mem::take(&mut self.state.borrow_mut().udp_out)
    }
}

impl EthernetPhy for SimEthernet {
    fn link_up(&mut self) -> bool {
        self.state.borrow().link
    }

    fn begin_dhcp(&mut self) -> Result<(), NetError> {
        let mut s = self.state.borrow_mut();
        if !s.link {
            return Err(NetError::Hardware);
        }
        s.dhcp_polls = Some(0);
        Ok(())
    }

    fn poll_dhcp(&mut self) -> Option<Ipv4Addr> {
        let mut s = self.state.borrow_mut();
        let polls = s.dhcp_polls?;
        if polls >= s.dhcp_delay_polls {
            s.ip = Some(SIM_DHCP_ADDR);
            return s.ip;
        }
        s.dhcp_polls = Some(polls + 1);
        None
    }

    fn configure_static(&mut self, config: &NetworkConfig) -> Result<(), NetError> {
        self.state.borrow_mut().ip = Some(config.static_addr());
        Ok(())
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.state.borrow().ip
    }

    fn start_servers(&mut self, tcp_port: u16, udp_port: u16) -> Result<(), NetError> {
        self.state.borrow_mut().listening = Some((tcp_port, udp_port));
        Ok(())
    }

    fn accept(&mut self) -> Option<PeerId> {
        let mut s = self.state.borrow_mut();
        s.listening?;
        s.pending.pop_front()
    }

    fn tcp_read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut s = self.state.borrow_mut();
        let p = s.peers.get_mut(&peer.0).ok_or(NetError::Closed)?;
        if p.inbox.is_empty() {
            return if p.open {
                Err(NetError::WouldBlock)
            } else {
                Err(NetError::Closed)
            };
        }
        let n = buf.len().min(p.inbox.len());
        for (dst, src) in buf.iter_mut().zip(p.inbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn tcp_write(&mut self, peer: PeerId, data: &[u8]) -> Result<(), NetError> {
        let mut s = self.state.borrow_mut();
        let p = s.peers.get_mut(&peer.0).ok_or(NetError::Closed)?;
        if !p.open {
            return Err(NetError::Closed);
        }
        p.outbox.push_str(&String::from_utf8_lossy(data));
        Ok(())
    }

    fn tcp_close(&mut self, peer: PeerId) {
        let mut s = self.state.borrow_mut();
        if let Some(p) = s.peers.get_mut(&peer.0) {
            p.open = false;
            s.closed += 1;
        }
    }

    fn udp_recv(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        let (from, data) = self.state.borrow_mut().udp_in.pop_front()?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Some((n, from))
    }

    fn udp_send(&mut self, to: SocketAddrV4, data: &[u8]) -> Result<(), NetError> {
        self.state
            .borrow_mut()
            .udp_out
            .push((to, String::from_utf8_lossy(data).into_owned()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SerialState {
    input: VecDeque<u8>,
    output: String,
}

/// USB serial console.
#[derive(Debug, Clone, Default)]
pub struct SimSerial {
    state: Rc<RefCell<SerialState>>,
}

impl SimSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type a line followed by newline.
    pub fn type_line(&self, line: &str) {
        let mut s = self.state.borrow_mut();
        s.input.extend(line.bytes());
        s.input.push_back(b'\n');
    }

    pub fn take_output(&self) -> String {
        core::mem::take(&mut self.state.borrow_mut().output)
    }
}

impl SerialLink for SimSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.state.borrow_mut().input.pop_front()
    }

    fn write_str(&mut self, text: &str) {
        self.state.borrow_mut().output.push_str(text);
    }
}

/// Panel resolution.
pub const PANEL_WIDTH: u32 = 480;
pub const PANEL_HEIGHT: u32 = 320;

/// What the last redraw showed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShownView {
    pub outputs: [bool; CHANNEL_COUNT],
    pub locked: bool,
    pub safety_stop: bool,
    pub recording: bool,
    pub script_clock: Option<String>,
    pub clock: String,
    pub notice: Option<String>,
}

#[derive(Debug)]
struct PanelState {
    touches: VecDeque<UiAction>,
    keys: VecDeque<UiAction>,
    redraws: u32,
    shown: ShownView,
    notices: Vec<String>,
    pixels: Vec<Rgb565>,
}

/// Display, touch controller and keypad.
#[derive(Debug, Clone)]
pub struct SimPanel {
    state: Rc<RefCell<PanelState>>,
}

impl Default for SimPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPanel {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PanelState {
                touches: VecDeque::new(),
                keys: VecDeque::new(),
                redraws: 0,
                shown: ShownView::default(),
                notices: Vec::new(),
                pixels: vec![Rgb565::BLACK; (PANEL_WIDTH * PANEL_HEIGHT) as usize],
            })),
        }
    }

    pub fn touch(&self, action: UiAction) {
        self.state.borrow_mut().touches.push_back(action);
    }

    pub fn key(&self, action: UiAction) {
        self.state.borrow_mut().keys.push_back(action);
    }

    pub fn redraws(&self) -> u32 {
        self.state.borrow().redraws
    }

    pub fn shown(&self) -> ShownView {
        self.state.borrow().shown.clone()
    }

    /// Every one-shot notice displayed so far.
    pub fn notices(&self) -> Vec<String> {
        self.state.borrow().notices.clone()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb565> {
        if x < PANEL_WIDTH && y < PANEL_HEIGHT {
            Some(self.state.borrow().pixels[(y * PANEL_WIDTH + x) as usize])
        } else {
            None
        }
    }
}

impl OriginDimensions for SimPanel {
    fn size(&self) -> Size {
        Size::new(PANEL_WIDTH, PANEL_HEIGHT)
    }
}

impl DrawTarget for SimPanel {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let mut s = self.state.borrow_mut();
        for Pixel(p, color) in pixels {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < PANEL_WIDTH && (p.y as u32) < PANEL_HEIGHT {
                s.pixels[(p.y as u32 * PANEL_WIDTH + p.x as u32) as usize] = color;
            }
        }
        Ok(())
    }
}

impl Panel for SimPanel {
    fn poll_touch(&mut self) -> Option<UiAction> {
        self.state.borrow_mut().touches.pop_front()
    }

    fn poll_keypad(&mut self) -> Option<UiAction> {
        self.state.borrow_mut().keys.pop_front()
    }

    fn redraw(&mut self, view: &PanelView<'_>) {
        let mut s = self.state.borrow_mut();
        s.redraws += 1;
        if let Some(notice) = view.notice {
            s.notices.push(notice.to_string());
        }
        s.shown = ShownView {
            outputs: view.outputs,
            locked: view.locked,
            safety_stop: view.safety_stop,
            recording: view.recording,
            script_clock: view.script_clock.map(str::to_string),
            clock: view.clock.to_string(),
            notice: view.notice.map(str::to_string),
        };
    }
}

/// A complete simulated box.
///
/// Fields are public handles; clone the ones a test needs before handing
/// the board to the app.
#[derive(Debug, Clone)]
pub struct SimBoard {
    pub outputs: [SimPin; CHANNEL_COUNT],
    pub switches: [SimSwitch; CHANNEL_COUNT],
    pub power_led: SimPin,
    pub lock_led: SimPin,
    pub stop_led: SimPin,
    pub fan: SimPwm,
    pub sensors: SimSensors,
    pub internal_sd: MemVolume,
    pub external_sd: MemVolume,
    pub eeprom: RamEeprom,
    pub ethernet: SimEthernet,
    pub clock: ManualClock,
    pub wall: SimWallClock,
    pub serial: SimSerial,
    pub panel: SimPanel,
}

/// 2024-01-01 00:00:00 UTC
pub const SIM_BOOT_EPOCH: u64 = 1_704_067_200;

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    /// All switches open, both cards inserted, blank EEPROM, cable plugged.
    pub fn new() -> Self {
        let clock = ManualClock::new(0);
        Self {
            outputs: core::array::from_fn(|_| SimPin::new()),
            switches: core::array::from_fn(|_| SimSwitch::new(false)),
            power_led: SimPin::new(),
            lock_led: SimPin::new(),
            stop_led: SimPin::new(),
            fan: SimPwm::new(),
            sensors: SimSensors::new(),
            internal_sd: MemVolume::new(),
            external_sd: MemVolume::new(),
            eeprom: RamEeprom::new(4096),
            ethernet: SimEthernet::new(),
            wall: SimWallClock::new(SIM_BOOT_EPOCH, clock.clone()),
            clock,
            serial: SimSerial::new(),
            panel: SimPanel::new(),
        }
    }
}

impl Board for SimBoard {
    type Output = SimPin;
    type Switch = SimSwitch;
    type Led = SimPin;
    type Fan = SimPwm;
    type Sensors = SimSensors;
    type Internal = MemVolume;
    type External = MemVolume;
    type Nv = RamEeprom;
    type Ethernet = SimEthernet;
    type Clock = ManualClock;
    type Wall = SimWallClock;
    type Serial = SimSerial;
    type Panel = SimPanel;

    fn into_parts(self) -> BoardParts<Self> {
        BoardParts {
            outputs: self.outputs,
            switches: self.switches.map(Some),
            power_led: self.power_led,
            lock_led: self.lock_led,
            stop_led: self.stop_led,
            fan: self.fan,
            sensors: self.sensors,
            internal_sd: self.internal_sd,
            external_sd: self.external_sd,
            eeprom: self.eeprom,
            ethernet: self.ethernet,
            clock: self.clock,
            wall: self.wall,
            serial: self.serial,
            panel: self.panel,
        }
    }
}
