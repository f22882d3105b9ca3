//! Desktop bench for the power distribution box.
//!
//! Runs the real control loop from `powerbox-core` against host-backed
//! hardware: stdin is the USB serial console, the configured TCP/UDP ports
//! are served on the bind address, a directory stands in for both SD cards
//! and the EEPROM, and the panel is an `embedded-graphics-simulator`
//! display.
//!
//! # Console
//!
//! Lines are passed to the box as serial commands, except these bench
//! commands:
//!
//! | Command             | Action                                  |
//! |---------------------|-----------------------------------------|
//! | `:switch <n> on/off`| Flip rocker switch `n` (1-6)            |
//! | `:eject` / `:insert`| Pull or reinsert the external card      |
//! | `:dump <file.png>`  | Save the panel as a PNG                 |
//! | `:graph on/off`     | Show or hide the strip chart            |
//! | `:quit`             | Exit                                    |
//!
//! # Window
//!
//! With `--window` the panel is shown in an SDL window. Clicks land as
//! touches; `1`-`6` toggle outputs, `L` lock, `S` safety stop, `R`
//! recording. `Q` or Escape quits.

mod board;
mod display;
mod ethernet;
mod host;

use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_graphics_simulator::{
    OutputSettingsBuilder, SimulatorEvent, Window, sdl2::Keycode,
};
use log::{error, info, warn};

use powerbox_core::App;
use powerbox_core::arbiter::ChannelId;
use powerbox_core::board::UiAction;
use powerbox_core::config::{CHANNEL_COUNT, FIRMWARE_VERSION};

use crate::board::{BenchHandles, HostBoard};
use crate::display::{HostPanel, hit};

/// Console lines waiting for the loop.
static CONSOLE: Channel<CriticalSectionRawMutex, Console, 16> = Channel::new();

enum Console {
    Line(String),
    Closed,
}

/// Bench harness for the power distribution box firmware.
#[derive(Debug, Parser)]
#[command(name = "powerbox-simulator", about, long_about = None)]
struct Cli {
    /// Directory holding `internal/`, `external/` and `eeprom.bin`.
    #[arg(short = 'd', long = "data-dir", default_value = "powerbox-data")]
    data_dir: PathBuf,

    /// Host address the TCP and UDP servers bind to.
    #[arg(short = 'b', long = "bind", default_value_t = Ipv4Addr::LOCALHOST)]
    bind: Ipv4Addr,

    /// Loop pacing in milliseconds.
    #[arg(long = "step-ms", default_value_t = 5)]
    step_ms: u64,

    /// Keep running after stdin closes.
    #[arg(long = "stay", default_value_t = false)]
    stay: bool,

    /// Show the panel in a window.
    #[arg(short = 'w', long = "window", default_value_t = false)]
    window: bool,
}

const WINDOW_SCALE: u32 = 2;

fn read_stdin() {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut message = Console::Line(line);
        // The loop drains every pass, so a full queue clears quickly
        while let Err(embassy_sync::channel::TrySendError::Full(back)) = CONSOLE.try_send(message) {
            message = back;
            thread::sleep(Duration::from_millis(2));
        }
    }
    while CONSOLE.try_send(Console::Closed).is_err() {
        thread::sleep(Duration::from_millis(2));
    }
}

/// Bench command outcome.
enum Bench {
    Continue,
    Quit,
}

fn bench_command(app: &mut App<HostBoard>, bench: &BenchHandles, line: &str) -> Bench {
    let mut words = line.trim_start_matches(':').split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("quit"), _, _) => return Bench::Quit,
        (Some("switch"), Some(n), Some(state)) => {
            let index = n.parse::<usize>().ok().filter(|n| (1..=CHANNEL_COUNT).contains(n));
            match (index, state) {
                (Some(n), "on") => bench.switches[n - 1].set_closed(true),
                (Some(n), "off") => bench.switches[n - 1].set_closed(false),
                _ => warn!("usage: :switch <1-{}> on|off", CHANNEL_COUNT),
            }
        }
        (Some("eject"), _, _) => {
            bench.external_card.set(false);
            info!("External card pulled");
        }
        (Some("insert"), _, _) => {
            bench.external_card.set(true);
            info!("External card inserted");
        }
        (Some("dump"), Some(path), _) => match bench.panel.save_png(Path::new(path)) {
            Ok(()) => info!("Panel written to {}", path),
            Err(e) => error!("Could not write {}: {}", path, e),
        },
        (Some("graph"), Some(state), _) => app.handle_ui(UiAction::ShowGraph(state == "on")),
        _ => warn!("Unknown bench command '{}'", line),
    }
    Bench::Continue
}

fn keycode_to_action(keycode: Keycode) -> Option<UiAction> {
    let channel = |n| ChannelId::new(n).map(UiAction::ToggleOutput);
    match keycode {
        Keycode::Num1 | Keycode::Kp1 => channel(0),
        Keycode::Num2 | Keycode::Kp2 => channel(1),
        Keycode::Num3 | Keycode::Kp3 => channel(2),
        Keycode::Num4 | Keycode::Kp4 => channel(3),
        Keycode::Num5 | Keycode::Kp5 => channel(4),
        Keycode::Num6 | Keycode::Kp6 => channel(5),
        Keycode::L => Some(UiAction::ToggleLock),
        Keycode::S => Some(UiAction::SafetyStop),
        Keycode::R => Some(UiAction::ToggleRecording),
        _ => None,
    }
}

/// Push the panel to the window and queue its input. `Bench::Quit` when
/// the window is closed.
fn pump_window(window: &mut Window, panel: &HostPanel) -> Bench {
    panel.with_display(|display| window.update(display));
    for event in window.events() {
        match event {
            SimulatorEvent::Quit => return Bench::Quit,
            SimulatorEvent::KeyDown { keycode, .. } => {
                if keycode == Keycode::Q || keycode == Keycode::Escape {
                    return Bench::Quit;
                }
                if let Some(action) = keycode_to_action(keycode) {
                    panel.key(action);
                }
            }
            SimulatorEvent::MouseButtonDown { point, .. } => {
                if let Some(action) = hit(point) {
                    panel.touch(action);
                }
            }
            _ => {}
        }
    }
    Bench::Continue
}

fn run(cli: Cli) -> io::Result<()> {
    let board = HostBoard::open(&cli.data_dir, cli.bind)?;
    let bench = board.handles();
    let mut app = App::new(board);
    info!("Bench data in {}", cli.data_dir.display());

    thread::spawn(read_stdin);

    // SDL is initialised on the first update, before any events are read
    let mut window = cli.window.then(|| {
        let settings = OutputSettingsBuilder::new().scale(WINDOW_SCALE).build();
        Window::new("Powerbox Simulator", &settings)
    });

    let step = Duration::from_millis(cli.step_ms.max(1));
    let mut stdout = io::stdout();
    let mut stdin_open = true;
    loop {
        while let Ok(message) = CONSOLE.try_receive() {
            match message {
                Console::Line(line) if line.starts_with(':') => {
                    if let Bench::Quit = bench_command(&mut app, &bench, &line) {
                        return Ok(());
                    }
                }
                Console::Line(line) => bench.serial.type_line(&line),
                Console::Closed => stdin_open = false,
            }
        }
        if !stdin_open && !cli.stay && window.is_none() {
            // Let the last commands run and their replies reach stdout
            app.step();
            write!(stdout, "{}", bench.serial.take_output())?;
            stdout.flush()?;
            return Ok(());
        }

        app.step();

        let output = bench.serial.take_output();
        if !output.is_empty() {
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
        }
        if let Some(window) = window.as_mut() {
            if let Bench::Quit = pump_window(window, &bench.panel) {
                return Ok(());
            }
        }
        thread::sleep(step);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    info!("Starting {} simulator", FIRMWARE_VERSION);

    if let Err(e) = run(cli) {
        error!("Simulator failed: {}", e);
        process::exit(1);
    }
    info!("Simulator exiting");
}
