//! Fixed hardware layout and timing constants.

/// Number of switched output channels.
pub const CHANNEL_COUNT: usize = 6;

/// Number of current/voltage sensors (one per channel plus the aggregate bus).
pub const SENSOR_COUNT: usize = 7;

/// Sensor index of the aggregate bus monitor.
pub const BUS_SENSOR_INDEX: usize = 6;

/// Channel names in switch order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = ["GSE-1", "GSE-2", "TE-R", "TE-1", "TE-2", "TE-3"];

/// Sensor names in I²C address order.
pub const SENSOR_NAMES: [&str; SENSOR_COUNT] =
    ["GSE-1", "GSE-2", "TE-R", "TE-1", "TE-2", "TE-3", "Bus"];

/// I²C addresses of the INA226 monitors, parallel to [`SENSOR_NAMES`].
pub const SENSOR_ADDRESSES: [u8; SENSOR_COUNT] = [0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46];

/// Output pin numbers on the panel MCU, parallel to [`CHANNEL_NAMES`].
pub const OUTPUT_PINS: [u8; CHANNEL_COUNT] = [0, 5, 1, 2, 3, 4];

/// Rocker switch pin numbers, parallel to [`CHANNEL_NAMES`].
pub const SWITCH_PINS: [u8; CHANNEL_COUNT] = [41, 15, 40, 39, 38, 24];

pub const POWER_LED_PIN: u8 = 22;
pub const LOCK_LED_PIN: u8 = 21;
pub const STOP_LED_PIN: u8 = 20;
pub const FAN_PWM_PIN: u8 = 33;

pub const FIRMWARE_VERSION: &str = "Power Box 5.2 - Network and Graphs";

// Scheduler periods (ms)
pub const SENSOR_SAMPLE_PERIOD_MS: u64 = 50;
pub const RECORD_WRITE_PERIOD_MS: u64 = 50;
pub const GRAPH_REFRESH_DEFAULT_MS: u64 = 50;
pub const GRAPH_REFRESH_MIN_MS: u64 = 20;
pub const GRAPH_REFRESH_MAX_MS: u64 = 200;
pub const DISPLAY_REDRAW_PERIOD_MS: u64 = 200;
pub const CLOCK_TICK_PERIOD_MS: u64 = 1000;
pub const SD_POLL_PERIOD_MS: u64 = 2000;
pub const NETWORK_HEALTH_PERIOD_MS: u64 = 5000;
pub const HEARTBEAT_PERIOD_MS: u64 = 10_000;

/// Switch debounce window.
pub const SWITCH_DEBOUNCE_MS: u64 = 10;
/// Touch debounce window.
pub const TOUCH_DEBOUNCE_MS: u64 = 200;
/// Duration a pressed button keeps its pressed look.
pub const PRESS_FEEDBACK_MS: u64 = 80;
/// Status LED blink half-period.
pub const LED_BLINK_MS: u64 = 500;

/// Rows written between forced flushes of a session file.
pub const RECORD_FLUSH_ROWS: u32 = 3;
/// Highest collision counter tried when picking a session filename.
pub const MAX_FILE_INDEX: u32 = 999;

/// Maximum script name length in characters.
pub const SCRIPT_NAME_MAX: usize = 31;
/// Maximum number of scripts kept in the library listing.
pub const MAX_SCRIPTS: usize = 50;
/// Directory on the internal store holding script files.
pub const SCRIPTS_DIR: &str = "/scripts";

/// Bytes buffered per command source before the partial line is dropped.
pub const LINE_BUFFER_CAPACITY: usize = 512;
/// Simultaneous TCP peers accepted by the command server.
pub const MAX_TCP_PEERS: usize = 5;

/// Strip-chart area in pixels.
pub const GRAPH_WIDTH: usize = 340;
pub const GRAPH_HEIGHT: usize = 210;
/// Ring buffer capacity bounds (samples per series).
pub const GRAPH_MIN_POINTS: u16 = 10;
pub const GRAPH_MAX_POINTS: u16 = 900;
/// Visible time window bounds in seconds.
pub const GRAPH_MIN_TIME_RANGE_S: f32 = 1.0;
pub const GRAPH_MAX_TIME_RANGE_S: f32 = 300.0;
pub const GRAPH_DEFAULT_TIME_RANGE_S: f32 = 30.0;
/// Horizontal gridline color (RGB565).
pub const GRAPH_GRID_COLOR: u16 = 0x2104;
/// Default trace colors per channel (RGB565).
pub const GRAPH_TRACE_COLORS: [u16; CHANNEL_COUNT] = [0xF800, 0x07E0, 0x001F, 0xFFE0, 0x07FF, 0xF81F];
