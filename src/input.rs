//! User input: joystick directions, the actions they map to, and the channel
//! the orchestrator polls.
//!
//! Blocking sources (the evdev joystick, the HTTP API) run on their own
//! threads and only *send* [`InputEvent`]s. The orchestrator drains at most
//! one event per loop iteration with `try_recv`, so all state stays on its
//! thread.
//!
//! The joystick has five inputs for seven actions: UP switches pages and
//! DOWN rotates clockwise, so `RotateBack` and `Quit` are only reachable
//! through the HTTP API.
//!
//! ## Rust concepts
//! - `std::sync::mpsc` channels between threads
//! - `try_recv()` for non-blocking reads
//! - Parsing fixed-layout binary records with `from_ne_bytes`

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

// ── Events ───────────────────────────────────────────────────────────

/// Something the user asked the display to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputEvent {
    /// Rotate the display 90° clockwise.
    Rotate,
    /// Rotate the display 90° counter-clockwise.
    RotateBack,
    /// Flip between the readout and progress pages.
    SwitchMode,
    NextMetric,
    PrevMetric,
    TogglePower,
    /// Stop the main loop.
    Quit,
}

/// Physical joystick directions on the Sense HAT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoystickDirection {
    Up,
    Down,
    Left,
    Right,
    Click,
}

impl JoystickDirection {
    pub fn action(self) -> InputEvent {
        match self {
            JoystickDirection::Up => InputEvent::SwitchMode,
            JoystickDirection::Down => InputEvent::Rotate,
            JoystickDirection::Left => InputEvent::PrevMetric,
            JoystickDirection::Right => InputEvent::NextMetric,
            JoystickDirection::Click => InputEvent::TogglePower,
        }
    }

    /// Map a Linux key code to a direction.
    pub fn from_key_code(code: u16) -> Option<Self> {
        match code {
            KEY_UP => Some(JoystickDirection::Up),
            KEY_DOWN => Some(JoystickDirection::Down),
            KEY_LEFT => Some(JoystickDirection::Left),
            KEY_RIGHT => Some(JoystickDirection::Right),
            KEY_ENTER => Some(JoystickDirection::Click),
            _ => None,
        }
    }
}

// ── Input sources ────────────────────────────────────────────────────

/// Anything the orchestrator can poll for input.
pub trait InputSource {
    /// Return at most one pending event without blocking.
    fn poll(&mut self) -> Option<InputEvent>;
}

/// Input delivered through an `mpsc` channel.
pub struct ChannelInput {
    rx: Receiver<InputEvent>,
    disconnected: bool,
}

impl ChannelInput {
    pub fn new(rx: Receiver<InputEvent>) -> Self {
        Self {
            rx,
            disconnected: false,
        }
    }
}

impl InputSource for ChannelInput {
    fn poll(&mut self) -> Option<InputEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.disconnected {
                    tracing::debug!("All input senders dropped; no more input");
                    self.disconnected = true;
                }
                None
            }
        }
    }
}

/// A source that never produces input.
pub struct NoInput;

impl InputSource for NoInput {
    fn poll(&mut self) -> Option<InputEvent> {
        None
    }
}

// ── Sense HAT joystick (evdev) ───────────────────────────────────────

/// Device name the Sense HAT joystick driver registers.
pub const SENSE_HAT_JOYSTICK_NAME: &str = "Raspberry Pi Sense HAT Joystick";

const EV_KEY: u16 = 0x01;
const KEY_ENTER: u16 = 28;
const KEY_UP: u16 = 103;
const KEY_LEFT: u16 = 105;
const KEY_RIGHT: u16 = 106;
const KEY_DOWN: u16 = 108;

const KEY_RELEASE: i32 = 0;

/// Size of a kernel `struct input_event`: a `timeval` of two native words,
/// then `u16 type`, `u16 code`, `i32 value`.
pub const INPUT_EVENT_SIZE: usize = 2 * std::mem::size_of::<usize>() + 8;

/// Decode one `input_event` record into a joystick direction.
///
/// Returns `None` for non-key events, unknown keys and key releases; press
/// and auto-repeat (hold) both count.
pub fn parse_input_event(record: &[u8]) -> Option<JoystickDirection> {
    if record.len() < INPUT_EVENT_SIZE {
        return None;
    }
    let base = 2 * std::mem::size_of::<usize>();
    let kind = u16::from_ne_bytes([record[base], record[base + 1]]);
    let code = u16::from_ne_bytes([record[base + 2], record[base + 3]]);
    let value = i32::from_ne_bytes([
        record[base + 4],
        record[base + 5],
        record[base + 6],
        record[base + 7],
    ]);

    if kind != EV_KEY || value == KEY_RELEASE {
        return None;
    }
    JoystickDirection::from_key_code(code)
}

/// Find the `/dev/input/eventN` node of the Sense HAT joystick by scanning
/// `<sysfs>/class/input/event*/device/name`.
pub fn find_joystick(sysfs: &Path, dev: &Path) -> Option<PathBuf> {
    let class_dir = sysfs.join("class").join("input");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&class_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .collect();
    candidates.sort();

    candidates.into_iter().find_map(|path| {
        let name = fs::read_to_string(path.join("device").join("name")).ok()?;
        if name.trim() == SENSE_HAT_JOYSTICK_NAME {
            let node = path.file_name()?;
            Some(dev.join("input").join(node))
        } else {
            None
        }
    })
}

/// Read joystick events from `reader` until it ends or `tx` is closed,
/// forwarding mapped actions.
pub fn forward_joystick_events<R: Read>(mut reader: R, tx: &Sender<InputEvent>) -> io::Result<()> {
    let mut record = [0u8; INPUT_EVENT_SIZE];
    loop {
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        if let Some(direction) = parse_input_event(&record) {
            tracing::debug!("Joystick {:?} -> {:?}", direction, direction.action());
            if tx.send(direction.action()).is_err() {
                return Ok(());
            }
        }
    }
}

/// Spawn a thread that reads the joystick device at `path` and sends the
/// mapped actions to `tx`.
pub fn spawn_joystick_reader(path: &Path, tx: Sender<InputEvent>) -> io::Result<JoinHandle<()>> {
    let file = File::open(path)?;
    let device = path.display().to_string();

    thread::Builder::new()
        .name("joystick".into())
        .spawn(move || {
            if let Err(e) = forward_joystick_events(file, &tx) {
                tracing::warn!("Joystick reader on {} stopped: {}", device, e);
            }
        })
}
