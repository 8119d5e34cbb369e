//! Atomic commit requests.
//!
//! Property names are resolved against the tables loaded at enumeration
//! time, so a request can only carry properties the kernel actually exposes
//! on the target object. Submission converts the raw values through the
//! kernel's own value types.

use drm::control::atomic::AtomicModeReq;
use drm::control::{connector, crtc, plane, property, AtomicCommitFlags, Device as ControlDevice};

use super::device::{access_error, typed_handle, DrmDeviceFd};
use super::error::Error;
use super::resources::Resources;

/// One property change queued for an atomic commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PropertyChange {
    pub object_id: u32,
    pub property_id: u32,
    pub value: u64,
}

/// A pending atomic request: `begin → add_property* → commit`.
#[derive(Debug, Default)]
pub struct AtomicRequest {
    changes: Vec<PropertyChange>,
}

impl AtomicRequest {
    pub(super) fn new() -> Self {
        AtomicRequest::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub(super) fn push(&mut self, object_id: u32, property_id: u32, value: u64) {
        self.changes.push(PropertyChange {
            object_id,
            property_id,
            value,
        });
    }

    /// Builds the kernel request and submits it.
    pub(super) fn commit(
        self,
        fd: &DrmDeviceFd,
        resources: &Resources,
        test_only: bool,
    ) -> Result<(), Error> {
        let mut req = AtomicModeReq::new();
        for change in &self.changes {
            let prop: property::Handle = typed_handle(change.property_id)?;
            let info = fd
                .get_property(prop)
                .map_err(|source| access_error(fd, "Failed to get property info", source))?;
            let value_type = info.value_type();
            let value = value_type.convert_value(change.value);

            // The object kind decides the typed handle the request wants.
            if resources.connector(change.object_id).is_some() {
                let handle: connector::Handle = typed_handle(change.object_id)?;
                req.add_property(handle, prop, value);
            } else if resources.crtc(change.object_id).is_some() {
                let handle: crtc::Handle = typed_handle(change.object_id)?;
                req.add_property(handle, prop, value);
            } else if resources.plane(change.object_id).is_some() {
                let handle: plane::Handle = typed_handle(change.object_id)?;
                req.add_property(handle, prop, value);
            } else {
                return Err(Error::UnknownProperty {
                    object: change.object_id,
                    name: info.name().to_string_lossy().into_owned(),
                });
            }
        }

        let flags = if test_only {
            AtomicCommitFlags::TEST_ONLY | AtomicCommitFlags::ALLOW_MODESET
        } else {
            AtomicCommitFlags::ALLOW_MODESET
        };
        fd.atomic_commit(flags, req)
            .map_err(|source| access_error(fd, "Atomic commit failed", source))
    }
}
