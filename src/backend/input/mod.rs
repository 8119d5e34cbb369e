//! Raw input acquisition.
//!
//! Event nodes under `/dev/input` are opened non-blocking, classified by
//! their capability bits and polled from a dedicated thread. Keybinds are
//! resolved before anything reaches a client; whatever remains is framed as
//! an `INPUT` packet and sent to the focused session's socket.

mod keyboard;
mod pointer;

pub use self::keyboard::{KeyboardState, KeyOutcome};
pub use self::pointer::{MouseState, TouchpadState};

use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use evdev::{Device, EventType, Key};
use tracing::{debug, info, info_span, trace, warn};

use crate::config::{ConfigStore, KeybindRegistry};
use crate::protocol::{InputEvent, Packet};
use crate::window::SessionManager;

const INPUT_DIR: &str = "/dev/input";

/// How often the device list is re-scanned for hotplugged hardware.
const RESCAN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Touchpad,
    Unknown,
}

/// Capability-based classification.
///
/// Touchpads are checked first: they expose buttons like a mouse but also a
/// touch key with absolute axes. Keyboards are anything with letter keys.
pub fn classify(device: &Device) -> DeviceKind {
    let keys = device.supported_keys();
    let has_key = |key: Key| keys.map(|set| set.contains(key)).unwrap_or(false);

    let abs = device.supported_absolute_axes();
    let has_abs = abs.map(|set| {
        set.contains(evdev::AbsoluteAxisType::ABS_X) && set.contains(evdev::AbsoluteAxisType::ABS_Y)
    });
    if has_key(Key::BTN_TOUCH) && has_abs.unwrap_or(false) {
        return DeviceKind::Touchpad;
    }

    let rel = device.supported_relative_axes();
    let has_rel = rel.map(|set| {
        set.contains(evdev::RelativeAxisType::REL_X) && set.contains(evdev::RelativeAxisType::REL_Y)
    });
    if (has_key(Key::BTN_LEFT) && has_key(Key::BTN_RIGHT)) || has_rel.unwrap_or(false) {
        return DeviceKind::Mouse;
    }

    if has_key(Key::KEY_A) && has_key(Key::KEY_Z) && has_key(Key::KEY_SPACE) {
        return DeviceKind::Keyboard;
    }

    DeviceKind::Unknown
}

struct InputDevice {
    path: PathBuf,
    device: Device,
    kind: DeviceKind,
    active: bool,
}

impl std::fmt::Debug for InputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDevice")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("active", &self.active)
            .finish()
    }
}

fn set_nonblocking(device: &Device) -> std::io::Result<()> {
    // evdev exposes the raw fd only; the borrow lives for this call.
    let fd = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
    let flags = rustix::fs::fcntl_getfl(fd)?;
    rustix::fs::fcntl_setfl(fd, flags | rustix::fs::OFlags::NONBLOCK)?;
    Ok(())
}

/// The input pipeline: device table plus per-type handler state.
pub struct InputPipeline {
    devices: Vec<InputDevice>,
    keyboard: KeyboardState,
    mouse: MouseState,
    touchpad: TouchpadState,
    manager: Arc<SessionManager>,
    registry: Arc<KeybindRegistry>,
    config: Arc<ConfigStore>,
}

impl InputPipeline {
    pub fn new(
        manager: Arc<SessionManager>,
        registry: Arc<KeybindRegistry>,
        config: Arc<ConfigStore>,
    ) -> Self {
        InputPipeline {
            devices: Vec::new(),
            keyboard: KeyboardState::new(),
            mouse: MouseState::new(),
            touchpad: TouchpadState::new(),
            manager,
            registry,
            config,
        }
    }

    /// Scans the input directory, adding nodes not yet tracked.
    pub fn scan_devices(&mut self) {
        let Ok(entries) = std::fs::read_dir(INPUT_DIR) else {
            debug!("input directory unavailable");
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_event_node = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false);
            if !is_event_node || self.devices.iter().any(|d| d.path == path) {
                continue;
            }
            self.add_device(&path);
        }
    }

    fn add_device(&mut self, path: &Path) {
        let device = match Device::open(path) {
            Ok(device) => device,
            Err(err) => {
                debug!(?path, ?err, "cannot open input device");
                return;
            }
        };
        let kind = classify(&device);
        if kind == DeviceKind::Unknown {
            trace!(?path, "ignoring unclassified device");
            return;
        }
        if let Err(err) = set_nonblocking(&device) {
            warn!(?path, ?err, "cannot make device non-blocking");
            return;
        }
        info!(?path, ?kind, name = device.name().unwrap_or("?"), "input device added");
        self.devices.push(InputDevice {
            path: path.to_owned(),
            device,
            kind,
            active: true,
        });
    }

    /// Number of usable devices.
    pub fn active_devices(&self) -> usize {
        self.devices.iter().filter(|d| d.active).count()
    }

    fn dispatch(&mut self, kind: DeviceKind, event: evdev::InputEvent) {
        let settings = self.config.settings();
        let forward: Option<InputEvent> = match kind {
            DeviceKind::Keyboard => {
                if event.event_type() != EventType::KEY {
                    return;
                }
                match self.keyboard.process(
                    event.code(),
                    event.value(),
                    &self.registry,
                    settings.enable_global_keybinds,
                ) {
                    KeyOutcome::Keybind(action) => {
                        debug!(?action, "keybind fired");
                        self.manager.apply_action(&action);
                        None
                    }
                    KeyOutcome::Forward(ev) => Some(ev),
                    KeyOutcome::Ignored => None,
                }
            }
            DeviceKind::Mouse => match event.event_type() {
                EventType::RELATIVE => self.mouse.motion(event.code(), event.value()),
                EventType::KEY => self.mouse.button(event.code(), event.value() != 0),
                _ => None,
            },
            DeviceKind::Touchpad => match event.event_type() {
                EventType::ABSOLUTE => self.touchpad.motion(event.code(), event.value()),
                EventType::KEY => self.touchpad.touch(event.code(), event.value() != 0),
                _ => None,
            },
            DeviceKind::Unknown => None,
        };

        if let Some(event) = forward {
            if settings.pass_unhandled_input {
                self.manager.send_to_focused(&Packet::Input(event));
            }
        }
    }

    /// Waits up to `timeout` for readiness, then drains every ready device.
    /// A device that fails to read is deactivated; a later rescan may
    /// re-add it.
    fn poll_once(&mut self, timeout: Duration) {
        let active: Vec<usize> = self
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.active)
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            std::thread::sleep(timeout);
            return;
        }

        let ready = {
            // Fds are borrowed only for the poll call itself.
            let mut fds: Vec<rustix::event::PollFd> = active
                .iter()
                .map(|&i| {
                    let fd = unsafe { BorrowedFd::borrow_raw(self.devices[i].device.as_raw_fd()) };
                    rustix::event::PollFd::from_borrowed_fd(fd, rustix::event::PollFlags::IN)
                })
                .collect();
            match rustix::event::poll(&mut fds, timeout.as_millis() as i32) {
                Ok(0) => return,
                Ok(_) => fds
                    .iter()
                    .zip(&active)
                    .filter(|(fd, _)| !fd.revents().is_empty())
                    .map(|(_, &i)| i)
                    .collect::<Vec<usize>>(),
                Err(err) => {
                    warn!(?err, "input poll failed");
                    return;
                }
            }
        };

        for index in ready {
            let path = self.devices[index].path.clone();
            let kind = self.devices[index].kind;
            let mut deactivate = false;
            let events: Vec<evdev::InputEvent> = match self.devices[index].device.fetch_events() {
                Ok(events) => events.collect(),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    warn!(?path, ?err, "device read failed, deactivating");
                    deactivate = true;
                    Vec::new()
                }
            };
            if deactivate {
                self.devices[index].active = false;
                continue;
            }
            for event in events {
                if event.event_type() == EventType::SYNCHRONIZATION {
                    continue;
                }
                self.dispatch(kind, event);
            }
        }
    }

    /// Runs the poll loop until shutdown.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        let span = info_span!("input");
        let _guard = span.enter();

        self.scan_devices();
        info!(devices = self.active_devices(), "input pipeline running");

        let mut last_scan = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            let rate = self.config.settings().input_poll_rate.max(1);
            let period = Duration::from_millis((1000 / rate).max(1) as u64);
            self.poll_once(period);

            if last_scan.elapsed() >= RESCAN_INTERVAL {
                self.devices.retain(|d| d.active);
                self.scan_devices();
                last_scan = Instant::now();
            }
        }
        debug!("input thread exiting");
    }

    /// Spawns the input thread.
    pub fn spawn(
        manager: Arc<SessionManager>,
        registry: Arc<KeybindRegistry>,
        config: Arc<ConfigStore>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let pipeline = InputPipeline::new(manager, registry, config);
        std::thread::Builder::new()
            .name("ggdirect-input".into())
            .spawn(move || pipeline.run(shutdown))
    }
}
