//! Compositor entry point: bring the subsystems up in order, then wait for
//! a termination signal and tear them down cooperatively.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ggdirect::backend::drm::DrmDevice;
use ggdirect::backend::input::InputPipeline;
use ggdirect::config::{Config, ConfigStore, KeybindRegistry};
use ggdirect::font;
use ggdirect::net::RENDEZVOUS_PATH;
use ggdirect::render::Renderer;
use ggdirect::window::{DisplayInfo, Displays, SessionManager};

/// How long threads get to observe the shutdown flag before the process
/// exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let shutdown = Arc::new(AtomicBool::new(false));
    let wakeup = Arc::new((Mutex::new(false), Condvar::new()));
    {
        let shutdown = shutdown.clone();
        let wakeup = wakeup.clone();
        // Handlers only set the flag; no subsystem is touched from signal
        // context.
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            let (lock, condvar) = &*wakeup;
            if let Ok(mut fired) = lock.lock() {
                *fired = true;
            }
            condvar.notify_all();
        })
        .context("installing signal handlers")?;
    }

    let config_file = Config::load();
    let config = Arc::new(ConfigStore::new(&config_file));
    let registry = Arc::new(KeybindRegistry::from_config(&config_file));

    // Display adapter: enumerate, pick the primary output and its mode.
    // The mode itself is programmed on the render thread.
    let device = DrmDevice::open().context("initializing display adapter")?;
    if device.is_headless() {
        warn!("running headless: no display hardware found");
    }
    let settings = config.settings();
    let (connector_id, mode) = {
        let resources = device.resources();
        let connector = resources
            .connector(settings.primary_display_id)
            .filter(|c| c.is_usable())
            .or_else(|| resources.usable_connectors().next())
            .ok_or_else(|| anyhow!("no usable display connector"))?;
        (connector.id, connector.preferred_mode())
    };
    let displays = Arc::new(Displays::new(
        connector_id,
        device
            .resources()
            .usable_connectors()
            .map(|connector| DisplayInfo {
                id: connector.id,
                resolution: connector.preferred_mode().resolution(),
            }),
    ));
    info!(
        connector = connector_id,
        width = mode.width,
        height = mode.height,
        refresh = mode.refresh,
        "primary display selected"
    );

    // Glyph source; the compositor runs without one, rendering backgrounds
    // only.
    let engine = font::load_default(None, font::DEFAULT_FONT_SIZE);
    let metrics = font::metrics_or_fallback(engine.as_ref());

    // Sessions and the reception thread.
    let manager = SessionManager::new(
        displays,
        metrics,
        config.clone(),
        PathBuf::from(RENDEZVOUS_PATH),
    );
    let listener_thread = manager
        .start_listener(shutdown.clone())
        .context("starting client listener")?;

    // Render thread owns every further display and GPU call; wait for its
    // bring-up before declaring startup complete.
    let (render_thread, ready) = Renderer::spawn(
        device,
        connector_id,
        mode,
        engine,
        metrics,
        manager.clone(),
        config.clone(),
        shutdown.clone(),
    )
    .context("spawning render thread")?;
    ready
        .recv()
        .context("render thread died during startup")?
        .map_err(|message| anyhow!(message))?;

    let input_thread = InputPipeline::spawn(
        manager.clone(),
        registry.clone(),
        config.clone(),
        shutdown.clone(),
    )
    .context("spawning input thread")?;

    info!("compositor running; press Ctrl+C to exit");

    // Block until a signal fires.
    {
        let (lock, condvar) = &*wakeup;
        let mut fired = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*fired && !shutdown.load(Ordering::SeqCst) {
            fired = condvar
                .wait_timeout(fired, Duration::from_secs(1))
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    info!("shutting down");
    shutdown.store(true, Ordering::SeqCst);
    std::thread::sleep(SHUTDOWN_GRACE);

    // Sessions close first so clients observe the shutdown promptly; the
    // threads exit at their next suspension point.
    manager.close();
    for (name, handle) in [
        ("render", render_thread),
        ("input", input_thread),
        ("listener", listener_thread),
    ] {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            // Still inside a suspension; resources were released above, so
            // detaching is safe.
            warn!(thread = name, "did not exit within the grace period, detaching");
        }
    }

    info!("shutdown complete");
    Ok(())
}
