//! GGDirect is a direct-to-hardware compositor for cell-grid clients.
//!
//! It owns the Linux display pipeline through kernel mode-setting, accepts
//! text-oriented clients over loopback TCP, rasterizes their styled cell
//! grids with a scalable font engine, and routes raw keyboard, mouse and
//! touchpad input to the focused client. Windows snap to fixed presets
//! (fullscreen and the four screen halves) with zoom as the only
//! per-window transform.
//!
//! The crate is organized around three cores:
//!
//! - [`backend`]: the kernel display adapter ([`backend::drm`]), the
//!   scanout swapchain ([`backend::gpu`]) and raw input acquisition
//!   ([`backend::input`]);
//! - [`protocol`], [`net`] and [`window`]: the client wire protocol and
//!   the per-client sessions it feeds;
//! - [`render`]: the single-threaded frame loop that composites every
//!   session and presents via page flips.
//!
//! [`config`] and [`font`] supply the ambient pieces: JSON configuration
//! with a global keybinding table, and glyph rasterization with system
//! font discovery.

pub mod backend;
pub mod config;
pub mod font;
pub mod net;
pub mod protocol;
pub mod render;
pub mod utils;
pub mod window;
