//! The session list, focus handling and the reception thread.
//!
//! Sessions live in a guarded vector; the focus slot holds a session
//! identity rather than an index or pointer, and is re-resolved under the
//! guard on every use, so a focused session is always either absent or
//! present in the list.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, info_span, warn};

use super::{Displays, Preset, Session, SessionId};
use crate::config::{Action, AssignmentStrategy, ConfigStore};
use crate::font::CellMetrics;
use crate::net::{self, Connection, Listener};
use crate::protocol::Packet;
use crate::utils::Guard;

/// Shared session state plus everything the handshake needs.
#[derive(Debug)]
pub struct SessionManager {
    sessions: Guard<Vec<Session>>,
    focused: Guard<Option<SessionId>>,
    next_id: AtomicU32,
    displays: Arc<Displays>,
    metrics: CellMetrics,
    config: Arc<ConfigStore>,
    gateway: PathBuf,
}

impl SessionManager {
    pub fn new(
        displays: Arc<Displays>,
        metrics: CellMetrics,
        config: Arc<ConfigStore>,
        gateway: PathBuf,
    ) -> Arc<Self> {
        Arc::new(SessionManager {
            sessions: Guard::new(Vec::new()),
            focused: Guard::new(None),
            next_id: AtomicU32::new(1),
            displays,
            metrics,
            config,
            gateway,
        })
    }

    pub fn metrics(&self) -> CellMetrics {
        self.metrics
    }

    pub fn displays(&self) -> &Displays {
        &self.displays
    }

    /// Runs `job` under the session-list guard.
    pub fn with_sessions<R>(&self, job: impl FnOnce(&mut Vec<Session>) -> R) -> R {
        self.sessions.with(job)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.with(|s| s.len())
    }

    pub fn focused_id(&self) -> Option<SessionId> {
        self.focused.with(|f| *f)
    }

    pub fn set_focused(&self, id: Option<SessionId>) {
        self.focused.with(|f| *f = id);
    }

    /// Appends a session created by the handshake; the first session gains
    /// focus.
    fn append(&self, connection: Connection) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let settings = self.config.settings();
        let display_id = if self.displays.contains(settings.primary_display_id) {
            settings.primary_display_id
        } else {
            self.displays.primary_id()
        };
        let session = Session::new(id, connection, display_id);
        let first = self.sessions.with(|sessions| {
            sessions.push(session);
            sessions.len() == 1
        });
        if first {
            self.set_focused(Some(id));
        }
        if settings.auto_distribute_windows {
            self.assign_displays(settings.assignment_strategy);
        }
        info!(session = id, display = display_id, "session created");
        id
    }

    /// Removes retired sessions and keeps the focus slot valid: focus
    /// either stays, moves to the next live session, or clears.
    pub fn cleanup_dead(&self) {
        let focused = self.focused_id();
        let (removed, next_focus) = self.sessions.with(|sessions| {
            let before = sessions.len();
            sessions.retain(|session| {
                if session.retired() {
                    debug!(session = session.id, "removing retired session");
                    false
                } else {
                    true
                }
            });
            let removed = before - sessions.len();
            let next = match focused {
                Some(id) if sessions.iter().any(|s| s.id == id) => Some(id),
                _ => sessions.first().map(|s| s.id),
            };
            (removed, next)
        });
        if removed > 0 {
            self.set_focused(next_focus);
        }
    }

    /// Moves focus to the next live session, wrapping; skips sessions
    /// already marked for removal. No-op with zero or one candidate.
    pub fn focus_next(&self) {
        self.cycle_focus(1);
    }

    pub fn focus_previous(&self) {
        self.cycle_focus(-1);
    }

    fn cycle_focus(&self, direction: i32) {
        let focused = self.focused_id();
        let next = self.sessions.with(|sessions| {
            let live: Vec<SessionId> = sessions
                .iter()
                .filter(|s| !s.retired())
                .map(|s| s.id)
                .collect();
            if live.is_empty() {
                return None;
            }
            let current = focused
                .and_then(|id| live.iter().position(|&l| l == id))
                .unwrap_or(0);
            let len = live.len() as i32;
            let next = (current as i32 + direction).rem_euclid(len) as usize;
            Some(live[next])
        });
        if let Some(next) = next {
            debug!(session = next, "focus moved");
            self.set_focused(Some(next));
        }
    }

    /// Sends one packet to the focused session. Returns whether a session
    /// consumed it.
    pub fn send_to_focused(&self, packet: &Packet) -> bool {
        let Some(id) = self.focused_id() else {
            return false;
        };
        let bytes = packet.encode();
        self.sessions.with(|sessions| {
            let Some(session) = sessions.iter_mut().find(|s| s.id == id && !s.retired()) else {
                return false;
            };
            match session.connection.send(&bytes) {
                Ok(()) => true,
                Err(err) => {
                    warn!(session = id, ?err, "failed to send input packet");
                    session.error_count += 1;
                    false
                }
            }
        })
    }

    /// Runs a mutation on the focused session.
    fn with_focused<R>(&self, job: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let id = self.focused_id()?;
        self.sessions.with(|sessions| {
            sessions
                .iter_mut()
                .find(|s| s.id == id && !s.retired())
                .map(job)
        })
    }

    fn move_focused(&self, preset: Preset) {
        let metrics = self.metrics;
        let displays = self.displays.clone();
        self.with_focused(|session| {
            if session.set_preset(preset) {
                let grid = session.desired_grid(&displays, metrics);
                session.send_resize(grid);
            }
        });
    }

    fn zoom_focused(&self, job: impl FnOnce(&mut Session)) {
        let metrics = self.metrics;
        let displays = self.displays.clone();
        self.with_focused(|session| {
            let before = session.zoom;
            job(session);
            if (session.zoom - before).abs() > f32::EPSILON {
                let grid = session.desired_grid(&displays, metrics);
                session.send_resize(grid);
            }
        });
    }

    /// Executes a keybind action. Called synchronously from the input
    /// thread.
    pub fn apply_action(&self, action: &Action) {
        match action {
            Action::SwitchFocusNext => self.focus_next(),
            Action::SwitchFocusPrevious => self.focus_previous(),
            Action::MoveWindowFullscreen => self.move_focused(Preset::Fullscreen),
            Action::MoveWindowLeft => self.move_focused(Preset::Left),
            Action::MoveWindowRight => self.move_focused(Preset::Right),
            Action::MoveWindowTop => self.move_focused(Preset::Top),
            Action::MoveWindowBottom => self.move_focused(Preset::Bottom),
            Action::CloseFocusedWindow => {
                self.with_focused(|session| session.close());
            }
            Action::ToggleZoom => self.zoom_focused(|s| s.toggle_zoom()),
            Action::IncreaseZoom => self.zoom_focused(|s| s.adjust_zoom(0.1)),
            Action::DecreaseZoom => self.zoom_focused(|s| s.adjust_zoom(-0.1)),
            Action::Custom(command) => {
                debug!(%command, "spawning custom command");
                if let Err(err) = Command::new("sh").arg("-c").arg(command).spawn() {
                    warn!(%command, ?err, "failed to spawn custom command");
                }
            }
        }
    }

    /// Re-assigns sessions to displays.
    pub fn assign_displays(&self, strategy: AssignmentStrategy) {
        let ids = self.displays.ids();
        if ids.is_empty() {
            return;
        }
        let primary = self.displays.primary_id();
        self.sessions.with(|sessions| {
            for (index, session) in sessions.iter_mut().enumerate() {
                let target = match strategy {
                    AssignmentStrategy::PrimaryOnly => primary,
                    // Fill-then-next degenerates to round robin until
                    // windows report per-display occupancy.
                    AssignmentStrategy::RoundRobin | AssignmentStrategy::FillThenNext => {
                        ids[index % ids.len()]
                    }
                };
                session.display_id = target;
            }
        });
    }

    /// One complete handshake on an accepted connection.
    ///
    /// Receive the client's port, dial back, echo the port, send the
    /// initial window size for a fullscreen window on the primary display,
    /// then register the session.
    fn handshake(&self, mut initial: std::net::TcpStream) -> std::io::Result<()> {
        let port = net::recv_u16(&mut initial)?;
        debug!(port, "client requested reverse connection");

        let mut connection = Connection::connect(port)?;
        net::send_u16(&mut connection, port)?;

        let res = self.displays.resolution(self.displays.primary_id());
        let cell = super::zoomed_cell_size(self.metrics, 1.0);
        let grid = Preset::Fullscreen.cell_rect(res, cell).size;
        connection.send(
            &Packet::Resize {
                width: grid.w as i16,
                height: grid.h as i16,
            }
            .encode(),
        )?;

        self.append(connection);
        Ok(())
        // `initial` drops here, closing the first connection.
    }

    /// Starts the reception thread: bind, publish the rendezvous file, then
    /// accept-and-handshake until shutdown.
    pub fn start_listener(
        self: &Arc<Self>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let listener = Listener::bind()?;
        listener.write_rendezvous(&self.gateway)?;
        info!(port = listener.port(), gateway = ?self.gateway, "listener ready");

        let manager = self.clone();
        let handle = std::thread::Builder::new()
            .name("ggdirect-listener".into())
            .spawn(move || {
                let span = info_span!("listener");
                let _guard = span.enter();
                while !shutdown.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok(Some(stream)) => {
                            if let Err(err) = manager.handshake(stream) {
                                warn!(?err, "handshake failed");
                            }
                            // Back-to-back connects are handled without the
                            // idle sleep.
                            continue;
                        }
                        Ok(None) => {}
                        Err(err) => warn!(?err, "accept failed"),
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
                debug!("reception thread exiting");
            })?;
        Ok(handle)
    }

    /// Closes every session and removes the rendezvous file.
    pub fn close(&self) {
        self.sessions.with(|sessions| {
            for session in sessions.iter_mut() {
                session.close();
            }
            sessions.clear();
        });
        self.set_focused(None);
        net::remove_rendezvous(&self.gateway);
    }
}
