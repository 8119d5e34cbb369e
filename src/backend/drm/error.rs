//! Errors of the kernel display adapter.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A kernel call failed on a specific device node.
#[derive(Debug, Error)]
#[error("{errmsg} on device {dev:?}: {source}")]
pub struct AccessError {
    /// Context of the failed call.
    pub errmsg: &'static str,
    /// Device path, when known.
    pub dev: Option<PathBuf>,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum Error {
    /// No mode-setting capable device node could be opened.
    #[error("no mode-setting capable device found")]
    NoDevice,
    /// A kernel call failed.
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The requested connector is unknown to the adapter.
    #[error("unknown connector {0}")]
    UnknownConnector(u32),
    /// The requested controller is unknown to the adapter.
    #[error("unknown controller {0}")]
    UnknownCrtc(u32),
    /// The connector is not connected; mode-setting requires a display.
    #[error("connector {0} is not connected")]
    NotConnected(u32),
    /// The kernel mode list has no entry matching the request.
    #[error("mode {width}x{height}@{refresh} not offered by connector {connector}")]
    ModeNotFound {
        connector: u32,
        width: u32,
        height: u32,
        refresh: u32,
    },
    /// No encoder can drive the connector.
    #[error("no encoder available for connector {0}")]
    NoEncoder(u32),
    /// No controller is free for the resolved encoder.
    #[error("no controller available for connector {0}")]
    NoCrtc(u32),
    /// A flip was requested while one is still in flight on the controller.
    #[error("page flip already pending on controller {0}")]
    FlipPending(u32),
    /// The device does not support atomic commits.
    #[error("atomic commits are not supported by this device")]
    AtomicUnsupported,
    /// An atomic property name did not resolve against the object's
    /// property table.
    #[error("object {object} has no property named {name:?}")]
    UnknownProperty { object: u32, name: String },
    /// A raw object id was zero or otherwise unrepresentable as a kernel
    /// handle.
    #[error("invalid object id {0}")]
    InvalidId(u32),
}
