//! Kernel mode-setting adapter.
//!
//! Owns the open device node and the enumerated display topology:
//! connectors, controllers, encoders and planes, each with its property
//! table. Performs mode-sets and page flips and drains completion events.
//! When no device node exists the adapter synthesizes a virtual output and
//! every operation becomes a success no-op, so the rest of the compositor
//! runs unchanged.
//!
//! All operations are issued from the render thread; nothing here is shared
//! across threads except the ref-counted device fd.

mod atomic;
mod device;
mod dumb;
mod error;
mod resources;

pub use self::atomic::AtomicRequest;
pub use self::device::{DrmDevice, DrmDeviceFd, FlipEvent};
pub(crate) use self::device::{fb_handle, raw_fb_id};
pub use self::dumb::DumbFrame;
pub use self::error::{AccessError, Error};
pub use self::resources::{
    Connector, ConnectorKind, ConnectorStatus, Crtc, Encoder, Mode, Plane, PlaneKind, Property,
    PropertyKind, Resources,
};
