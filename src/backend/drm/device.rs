//! The open mode-setting device and the operations the compositor issues
//! against it.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use drm::control::{
    connector, crtc, framebuffer, property, Device as ControlDevice, Event, ModeTypeFlags,
    PageFlipFlags, RawResourceHandle,
};
use drm::{ClientCapability, Device as BasicDevice};
use tracing::{debug, info, info_span, trace, warn};

use super::atomic::AtomicRequest;
use super::dumb::DumbFrame;
use super::error::{AccessError, Error};
use super::resources::{
    Connector, ConnectorKind, ConnectorStatus, Crtc, Encoder, Mode, Plane, PlaneKind, Property,
    PropertyKind, PropertyMap, Resources,
};

/// A page-flip completion drained by [`DrmDevice::handle_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    pub crtc_id: u32,
    pub sequence: u32,
    pub user_data: u64,
}

#[derive(Debug)]
struct InternalDeviceFd {
    file: File,
    path: PathBuf,
    privileged: bool,
}

impl AsFd for InternalDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for InternalDeviceFd {}
impl ControlDevice for InternalDeviceFd {}

impl Drop for InternalDeviceFd {
    fn drop(&mut self) {
        info!(path = ?self.path, "dropping drm device");
        if self.privileged {
            if let Err(err) = self.release_master_lock() {
                warn!(?err, "failed to release drm master");
            }
        }
    }
}

/// Ref-counted file descriptor of the open device.
///
/// Clones share the descriptor; the master lock is released when the last
/// clone drops.
#[derive(Debug, Clone)]
pub struct DrmDeviceFd(Arc<InternalDeviceFd>);

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

impl DrmDeviceFd {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)?;
        let mut dev = InternalDeviceFd {
            file,
            path,
            privileged: false,
        };

        // Mode-setting wants the master lock when running on a tty. Newer
        // kernels grant implicit master to the only open, so failure is
        // survivable.
        if dev.acquire_master_lock().is_err() {
            warn!(path = ?dev.path, "unable to become drm master, assuming unprivileged mode");
        } else {
            dev.privileged = true;
        }
        Ok(DrmDeviceFd(Arc::new(dev)))
    }

    pub fn dev_path(&self) -> Option<PathBuf> {
        Some(self.0.path.clone())
    }
}

pub(super) fn access_error(
    fd: &DrmDeviceFd,
    errmsg: &'static str,
    source: std::io::Error,
) -> Error {
    Error::Access(AccessError {
        errmsg,
        dev: fd.dev_path(),
        source,
    })
}

fn raw_id(handle: impl Into<RawResourceHandle>) -> u32 {
    handle.into().get()
}

pub(super) fn typed_handle<H: From<RawResourceHandle>>(id: u32) -> Result<H, Error> {
    NonZeroU32::new(id).map(H::from).ok_or(Error::InvalidId(id))
}

/// Reconstructs a framebuffer handle from its raw id.
pub(crate) fn fb_handle(id: u32) -> Result<framebuffer::Handle, Error> {
    typed_handle(id)
}

/// The raw id of a framebuffer handle.
pub(crate) fn raw_fb_id(handle: framebuffer::Handle) -> u32 {
    raw_id(handle)
}

#[derive(Debug)]
struct KmsState {
    fd: DrmDeviceFd,
    atomic: bool,
    universal_planes: bool,
    /// Kernel modes currently programmed, per controller; needed for the
    /// direct-update fallback.
    active_modes: HashMap<u32, drm::control::Mode>,
    /// Connectors currently driven, per controller.
    active_connectors: HashMap<u32, u32>,
    /// Scanout framebuffers backing the initial mode-set, kept alive while
    /// the mode is programmed.
    mode_set_frames: HashMap<u32, DumbFrame>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    /// Synthetic flip completions, delivered by the next event drain.
    completions: VecDeque<FlipEvent>,
    sequence: u32,
}

#[derive(Debug)]
enum DeviceBackend {
    Kms(KmsState),
    Headless(HeadlessState),
}

/// The kernel display adapter.
///
/// Owns the device node, the enumerated resource topology and the per-
/// controller flip state. All methods are called from the render thread
/// only.
#[derive(Debug)]
pub struct DrmDevice {
    backend: DeviceBackend,
    resources: Resources,
    /// User data of the flip in flight, per controller id.
    pending_flips: HashMap<u32, u64>,
    span: tracing::Span,
}

impl DrmDevice {
    /// Opens the first mode-setting capable primary node, or falls back to
    /// headless mode when none exists.
    pub fn open() -> Result<Self, Error> {
        let span = info_span!("drm");
        let _guard = span.enter();

        for index in 0..16 {
            let path = PathBuf::from(format!("/dev/dri/card{index}"));
            if !path.exists() {
                continue;
            }
            let fd = match DrmDeviceFd::open(path.clone()) {
                Ok(fd) => fd,
                Err(err) => {
                    debug!(?path, ?err, "skipping device node");
                    continue;
                }
            };
            // A node qualifies only when it exposes mode-setting resources.
            if fd.resource_handles().is_err() {
                debug!(?path, "node has no mode-setting resources");
                continue;
            }

            let atomic = fd.set_client_capability(ClientCapability::Atomic, true).is_ok();
            let universal_planes = fd
                .set_client_capability(ClientCapability::UniversalPlanes, true)
                .is_ok();
            info!(?path, atomic, universal_planes, "drm device initialized");

            let mut device = DrmDevice {
                backend: DeviceBackend::Kms(KmsState {
                    fd,
                    atomic,
                    universal_planes,
                    active_modes: HashMap::new(),
                    active_connectors: HashMap::new(),
                    mode_set_frames: HashMap::new(),
                }),
                resources: Resources::default(),
                pending_flips: HashMap::new(),
                span: span.clone(),
            };
            device.refresh_resources()?;
            return Ok(device);
        }

        info!("no graphics hardware detected, entering headless mode");
        drop(_guard);
        Ok(DrmDevice::open_headless())
    }

    /// Builds the virtual single-output adapter directly, without probing
    /// device nodes.
    pub fn open_headless() -> Self {
        DrmDevice {
            backend: DeviceBackend::Headless(HeadlessState::default()),
            resources: Resources::headless(),
            pending_flips: HashMap::new(),
            span: info_span!("drm", headless = true),
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.backend, DeviceBackend::Headless(_))
    }

    pub fn supports_atomic(&self) -> bool {
        match &self.backend {
            DeviceBackend::Kms(kms) => kms.atomic,
            DeviceBackend::Headless(_) => false,
        }
    }

    pub fn has_universal_planes(&self) -> bool {
        match &self.backend {
            DeviceBackend::Kms(kms) => kms.universal_planes,
            DeviceBackend::Headless(_) => false,
        }
    }

    /// The shared descriptor, absent in headless mode.
    pub fn device_fd(&self) -> Option<DrmDeviceFd> {
        match &self.backend {
            DeviceBackend::Kms(kms) => Some(kms.fd.clone()),
            DeviceBackend::Headless(_) => None,
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Re-enumerates the resource topology, e.g. after hotplug.
    pub fn refresh_resources(&mut self) -> Result<(), Error> {
        let _guard = self.span.enter();
        match &self.backend {
            DeviceBackend::Headless(_) => Ok(()),
            DeviceBackend::Kms(kms) => {
                let fd = kms.fd.clone();
                let universal = kms.universal_planes;
                self.resources = load_resources(&fd, universal)?;
                Ok(())
            }
        }
    }

    /// Re-queries a single connector's connection status and mode list.
    pub fn refresh_connector(&mut self, connector_id: u32) -> Result<(), Error> {
        let fd = match &self.backend {
            DeviceBackend::Headless(_) => return Ok(()),
            DeviceBackend::Kms(kms) => kms.fd.clone(),
        };
        let handle: connector::Handle = typed_handle(connector_id)?;
        let info = fd
            .get_connector(handle, true)
            .map_err(|source| access_error(&fd, "Failed to probe connector", source))?;
        let loaded = load_connector(&fd, handle, &info)?;
        if let Some(slot) = self.resources.connector_mut(connector_id) {
            *slot = loaded;
        }
        Ok(())
    }

    /// Programs `mode` on `connector_id`, allocating and clearing a scanout
    /// framebuffer for it. Returns the controller that now drives the
    /// connector.
    pub fn set_mode(&mut self, connector_id: u32, mode: &Mode) -> Result<u32, Error> {
        // Step 1: the connector must be connected; probe once if it is not.
        if !self
            .resources
            .connector(connector_id)
            .ok_or(Error::UnknownConnector(connector_id))?
            .is_connected()
        {
            self.refresh_connector(connector_id)?;
        }
        let _guard = self.span.enter();
        let conn = self
            .resources
            .connector(connector_id)
            .ok_or(Error::UnknownConnector(connector_id))?;
        if !conn.is_connected() {
            return Err(Error::NotConnected(connector_id));
        }

        // Steps 3 and 4: resolve an encoder, then a controller.
        let encoder_id = conn
            .current_encoder
            .filter(|id| self.resources.encoder(*id).is_some())
            .or_else(|| {
                conn.encoder_ids
                    .iter()
                    .copied()
                    .find(|id| self.resources.encoder(*id).is_some())
            })
            .ok_or(Error::NoEncoder(connector_id))?;
        let crtc_id = self
            .resources
            .encoder(encoder_id)
            .and_then(|enc| enc.current_crtc)
            .filter(|id| self.resources.crtc(*id).is_some())
            .or_else(|| self.resources.free_crtc().map(|crtc| crtc.id))
            .ok_or(Error::NoCrtc(connector_id))?;

        match &mut self.backend {
            DeviceBackend::Headless(_) => {}
            DeviceBackend::Kms(kms) => {
                let fd = kms.fd.clone();
                let conn_handle: connector::Handle = typed_handle(connector_id)?;
                let crtc_handle: crtc::Handle = typed_handle(crtc_id)?;

                // Step 2: locate the kernel-side mode.
                let info = fd
                    .get_connector(conn_handle, false)
                    .map_err(|source| access_error(&fd, "Failed to get connector", source))?;
                let kernel_mode = info
                    .modes()
                    .iter()
                    .find(|m| {
                        let (w, h) = m.size();
                        w as u32 == mode.width && h as u32 == mode.height && m.vrefresh() == mode.refresh
                    })
                    .copied()
                    .ok_or(Error::ModeNotFound {
                        connector: connector_id,
                        width: mode.width,
                        height: mode.height,
                        refresh: mode.refresh,
                    })?;

                // Step 5: scanout framebuffer for the mode, cleared to black.
                let mut frame = DumbFrame::new(&fd, mode.width, mode.height)?;
                frame.clear(0x0000_0000)?;

                // Step 6: program the pipe.
                fd.set_crtc(
                    crtc_handle,
                    Some(frame.fb()),
                    (0, 0),
                    &[conn_handle],
                    Some(kernel_mode),
                )
                .map_err(|source| access_error(&fd, "Failed to set mode", source))?;

                kms.active_modes.insert(crtc_id, kernel_mode);
                kms.active_connectors.insert(crtc_id, connector_id);
                kms.mode_set_frames.insert(crtc_id, frame);
            }
        }

        // Bookkeeping mirrors the kernel state.
        let fb_id = match &self.backend {
            DeviceBackend::Kms(kms) => kms.mode_set_frames.get(&crtc_id).map(|f| raw_id(f.fb())),
            DeviceBackend::Headless(_) => None,
        };
        if let Some(crtc) = self.resources.crtc_mut(crtc_id) {
            crtc.mode = Some(mode.clone());
            crtc.framebuffer = fb_id;
        }
        if let Some(enc) = self.resources.encoder_mut(encoder_id) {
            enc.current_crtc = Some(crtc_id);
        }
        if let Some(conn) = self.resources.connector_mut(connector_id) {
            conn.current_encoder = Some(encoder_id);
        }
        info!(
            connector = connector_id,
            crtc = crtc_id,
            "mode set to {}x{}@{}",
            mode.width,
            mode.height,
            mode.refresh
        );
        Ok(crtc_id)
    }

    /// Submits an asynchronous page flip. Exactly one flip may be in flight
    /// per controller.
    pub fn page_flip(&mut self, crtc_id: u32, fb_id: u32, user_data: u64) -> Result<(), Error> {
        if self.pending_flips.contains_key(&crtc_id) {
            return Err(Error::FlipPending(crtc_id));
        }
        match &mut self.backend {
            DeviceBackend::Headless(headless) => {
                headless.sequence = headless.sequence.wrapping_add(1);
                headless.completions.push_back(FlipEvent {
                    crtc_id,
                    sequence: headless.sequence,
                    user_data,
                });
            }
            DeviceBackend::Kms(kms) => {
                let fd = kms.fd.clone();
                let crtc_handle: crtc::Handle = typed_handle(crtc_id)?;
                let fb_handle: framebuffer::Handle = typed_handle(fb_id)?;
                ControlDevice::page_flip(&fd, crtc_handle, fb_handle, PageFlipFlags::EVENT, None)
                    .map_err(|source| access_error(&fd, "Failed to queue page flip", source))?;
            }
        }
        trace!(crtc = crtc_id, fb = fb_id, "page flip queued");
        self.pending_flips.insert(crtc_id, user_data);
        if let Some(crtc) = self.resources.crtc_mut(crtc_id) {
            crtc.framebuffer = Some(fb_id);
        }
        Ok(())
    }

    /// Whether a flip is still in flight on `crtc_id`.
    pub fn flip_pending(&self, crtc_id: u32) -> bool {
        self.pending_flips.contains_key(&crtc_id)
    }

    /// Binds `fb_id` with an immediate mode-set instead of a flip. Fallback
    /// path for controllers where flip submission failed.
    pub fn set_framebuffer(&mut self, crtc_id: u32, fb_id: u32) -> Result<(), Error> {
        match &mut self.backend {
            DeviceBackend::Headless(_) => {}
            DeviceBackend::Kms(kms) => {
                let fd = kms.fd.clone();
                let mode = kms
                    .active_modes
                    .get(&crtc_id)
                    .copied()
                    .ok_or(Error::UnknownCrtc(crtc_id))?;
                let connector_id = *kms
                    .active_connectors
                    .get(&crtc_id)
                    .ok_or(Error::UnknownCrtc(crtc_id))?;
                let crtc_handle: crtc::Handle = typed_handle(crtc_id)?;
                let conn_handle: connector::Handle = typed_handle(connector_id)?;
                let fb_handle: framebuffer::Handle = typed_handle(fb_id)?;
                fd.set_crtc(crtc_handle, Some(fb_handle), (0, 0), &[conn_handle], Some(mode))
                    .map_err(|source| access_error(&fd, "Failed to update framebuffer", source))?;
            }
        }
        if let Some(crtc) = self.resources.crtc_mut(crtc_id) {
            crtc.framebuffer = Some(fb_id);
        }
        Ok(())
    }

    /// Waits up to `timeout_ms` for device events and drains completed page
    /// flips. Negative waits indefinitely, zero polls.
    pub fn handle_events(&mut self, timeout_ms: i32) -> Result<Vec<FlipEvent>, Error> {
        let mut completed = Vec::new();
        match &mut self.backend {
            DeviceBackend::Headless(headless) => {
                completed.extend(headless.completions.drain(..));
            }
            DeviceBackend::Kms(kms) => {
                let fd = kms.fd.clone();
                let mut fds = [rustix::event::PollFd::new(
                    &fd,
                    rustix::event::PollFlags::IN,
                )];
                let ready = rustix::event::poll(&mut fds, timeout_ms)
                    .map_err(|err| access_error(&fd, "Failed to poll device", err.into()))?;
                if ready == 0 {
                    return Ok(completed);
                }
                let events = fd
                    .receive_events()
                    .map_err(|source| access_error(&fd, "Failed to receive events", source))?;
                for event in events {
                    match event {
                        Event::PageFlip(flip) => {
                            completed.push(FlipEvent {
                                crtc_id: raw_id(flip.crtc),
                                sequence: flip.frame,
                                user_data: 0,
                            });
                        }
                        _ => trace!("ignoring non-flip drm event"),
                    }
                }
            }
        }
        for event in &mut completed {
            if let Some(user_data) = self.pending_flips.remove(&event.crtc_id) {
                event.user_data = user_data;
            }
        }
        Ok(completed)
    }

    /// Starts an atomic request. Headless mode accepts and later ignores it.
    pub fn begin_atomic(&self) -> Result<AtomicRequest, Error> {
        match &self.backend {
            DeviceBackend::Headless(_) => Ok(AtomicRequest::new()),
            DeviceBackend::Kms(kms) if kms.atomic => Ok(AtomicRequest::new()),
            DeviceBackend::Kms(_) => Err(Error::AtomicUnsupported),
        }
    }

    /// Adds a property change, resolving `name` against the object's
    /// property table loaded at enumeration time. Unknown names are
    /// rejected here rather than at commit.
    pub fn add_atomic_property(
        &self,
        request: &mut AtomicRequest,
        object_id: u32,
        name: &str,
        value: u64,
    ) -> Result<(), Error> {
        let prop = self
            .resources
            .property_of(object_id, name)
            .ok_or_else(|| Error::UnknownProperty {
                object: object_id,
                name: name.to_owned(),
            })?;
        request.push(object_id, prop.id, value);
        Ok(())
    }

    /// Commits an atomic request; a test-only commit validates without
    /// applying.
    pub fn commit_atomic(&mut self, request: AtomicRequest, test_only: bool) -> Result<(), Error> {
        match &self.backend {
            DeviceBackend::Headless(_) => Ok(()),
            DeviceBackend::Kms(kms) if !kms.atomic => Err(Error::AtomicUnsupported),
            DeviceBackend::Kms(kms) => request.commit(&kms.fd, &self.resources, test_only),
        }
    }
}

fn map_connector_kind(interface: connector::Interface) -> ConnectorKind {
    use connector::Interface;
    match interface {
        Interface::VGA => ConnectorKind::Vga,
        Interface::DVII => ConnectorKind::DviI,
        Interface::DVID => ConnectorKind::DviD,
        Interface::DVIA => ConnectorKind::DviA,
        Interface::Composite => ConnectorKind::Composite,
        Interface::SVideo => ConnectorKind::SVideo,
        Interface::LVDS => ConnectorKind::Lvds,
        Interface::Component => ConnectorKind::Component,
        Interface::DisplayPort => ConnectorKind::DisplayPort,
        Interface::HDMIA => ConnectorKind::HdmiA,
        Interface::HDMIB => ConnectorKind::HdmiB,
        Interface::TV => ConnectorKind::Tv,
        Interface::EmbeddedDisplayPort => ConnectorKind::Edp,
        Interface::Virtual => ConnectorKind::Virtual,
        Interface::DSI => ConnectorKind::Dsi,
        Interface::DPI => ConnectorKind::Dpi,
        Interface::Writeback => ConnectorKind::Writeback,
        Interface::SPI => ConnectorKind::Spi,
        _ => ConnectorKind::Unknown,
    }
}

fn map_status(state: connector::State) -> ConnectorStatus {
    match state {
        connector::State::Connected => ConnectorStatus::Connected,
        connector::State::Disconnected => ConnectorStatus::Disconnected,
        connector::State::Unknown => ConnectorStatus::Unknown,
    }
}

fn map_mode(mode: &drm::control::Mode) -> Mode {
    let (width, height) = mode.size();
    Mode {
        width: width as u32,
        height: height as u32,
        refresh: mode.vrefresh(),
        flags: mode.flags().bits(),
        name: mode.name().to_string_lossy().into_owned(),
        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
    }
}

fn map_property_kind(value_type: &property::ValueType) -> PropertyKind {
    use property::ValueType;
    match value_type {
        ValueType::UnsignedRange(..) | ValueType::SignedRange(..) | ValueType::Boolean => {
            PropertyKind::Range
        }
        ValueType::Enum(_) => PropertyKind::Enum,
        ValueType::Bitmask => PropertyKind::Bitmask,
        ValueType::Blob => PropertyKind::Blob,
        _ => PropertyKind::Object,
    }
}

fn load_properties<H>(fd: &DrmDeviceFd, handle: H) -> Result<PropertyMap, Error>
where
    H: drm::control::ResourceHandle,
{
    let mut map = PropertyMap::new();
    let props = fd
        .get_properties(handle)
        .map_err(|source| access_error(fd, "Failed to get properties", source))?;
    let (handles, values) = props.as_props_and_values();
    for (&prop, &value) in handles.iter().zip(values.iter()) {
        let info = match fd.get_property(prop) {
            Ok(info) => info,
            Err(err) => {
                debug!(?err, "skipping unreadable property");
                continue;
            }
        };
        let name = info.name().to_string_lossy().into_owned();
        map.insert(
            name,
            Property {
                id: raw_id(prop),
                kind: map_property_kind(&info.value_type()),
                value,
            },
        );
    }
    Ok(map)
}

fn load_connector(
    fd: &DrmDeviceFd,
    handle: connector::Handle,
    info: &connector::Info,
) -> Result<Connector, Error> {
    let modes: Vec<Mode> = info.modes().iter().map(map_mode).collect();
    let preferred = modes.iter().position(|m| m.preferred);
    let kind = map_connector_kind(info.interface());
    Ok(Connector {
        id: raw_id(handle),
        kind,
        status: map_status(info.state()),
        name: format!("{:?}-{}", info.interface(), info.interface_id()),
        modes,
        preferred,
        encoder_ids: info.encoders().iter().map(|&enc| raw_id(enc)).collect(),
        current_encoder: info.current_encoder().map(raw_id),
        properties: load_properties(fd, handle)?,
    })
}

/// Enumerates the full topology: top-level handles first, then connectors,
/// controllers, encoders and planes.
fn load_resources(fd: &DrmDeviceFd, universal_planes: bool) -> Result<Resources, Error> {
    let handles = fd
        .resource_handles()
        .map_err(|source| access_error(fd, "Failed to load resource handles", source))?;

    let mut resources = Resources::default();

    for &conn in handles.connectors() {
        let info = fd
            .get_connector(conn, false)
            .map_err(|source| access_error(fd, "Failed to get connector", source))?;
        resources.connectors.push(load_connector(fd, conn, &info)?);
    }

    for &crtc in handles.crtcs() {
        let info = fd
            .get_crtc(crtc)
            .map_err(|source| access_error(fd, "Failed to get crtc", source))?;
        resources.crtcs.push(Crtc {
            id: raw_id(crtc),
            mode: info.mode().as_ref().map(map_mode),
            framebuffer: info.framebuffer().map(raw_id),
            plane_ids: Vec::new(),
            properties: load_properties(fd, crtc)?,
        });
    }

    for &enc in handles.encoders() {
        let info = fd
            .get_encoder(enc)
            .map_err(|source| access_error(fd, "Failed to get encoder", source))?;
        resources.encoders.push(Encoder {
            id: raw_id(enc),
            kind: format!("{:?}", info.kind()),
            possible_crtcs: handles
                .filter_crtcs(info.possible_crtcs())
                .iter()
                .filter_map(|crtc| handles.crtcs().iter().position(|c| c == crtc))
                .fold(0u32, |mask, idx| mask | (1 << idx)),
            current_crtc: info.crtc().map(raw_id),
        });
    }

    if universal_planes {
        let planes = fd
            .plane_handles()
            .map_err(|source| access_error(fd, "Failed to load plane handles", source))?;
        for plane in planes {
            let info = fd
                .get_plane(plane)
                .map_err(|source| access_error(fd, "Failed to get plane", source))?;
            let properties = load_properties(fd, plane)?;
            // The plane kind lives in the `type` property.
            let kind = match properties.get("type").map(|p| p.value) {
                Some(1) => PlaneKind::Primary,
                Some(2) => PlaneKind::Cursor,
                _ => PlaneKind::Overlay,
            };
            let crtc_id = info.crtc().map(raw_id);
            let plane_id = raw_id(plane);
            if let Some(crtc_id) = crtc_id {
                if let Some(crtc) = resources.crtc_mut(crtc_id) {
                    crtc.plane_ids.push(plane_id);
                }
            }
            resources.planes.push(Plane {
                id: plane_id,
                kind,
                crtc_id,
                position: crate::utils::Point::new(0, 0),
                size: crate::utils::Size::new(0, 0),
                formats: info.formats().to_vec(),
                framebuffer: info.framebuffer().map(raw_id),
                properties,
            });
        }
    }

    debug!(
        connectors = resources.connectors.len(),
        crtcs = resources.crtcs.len(),
        encoders = resources.encoders.len(),
        planes = resources.planes.len(),
        "resources loaded"
    );
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless() -> DrmDevice {
        DrmDevice::open_headless()
    }

    #[test]
    fn headless_mode_set_succeeds_without_hardware() {
        let mut device = headless();
        let mode = device.resources().connectors[0].preferred_mode();
        let crtc_id = device.set_mode(1, &mode).unwrap();
        assert_eq!(crtc_id, 1);
        let crtc = device.resources().crtc(1).unwrap();
        assert_eq!(crtc.mode.as_ref(), Some(&mode));
    }

    #[test]
    fn headless_flip_completes_via_event_drain() {
        let mut device = headless();
        device.page_flip(1, 42, 7).unwrap();
        assert!(device.flip_pending(1));
        // A second flip while one is in flight is rejected.
        assert!(matches!(
            device.page_flip(1, 43, 8),
            Err(Error::FlipPending(1))
        ));

        let events = device.handle_events(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].crtc_id, 1);
        assert_eq!(events[0].user_data, 7);
        assert!(!device.flip_pending(1));
    }

    #[test]
    fn atomic_names_resolve_against_loaded_properties() {
        let mut device = headless();
        device
            .resources
            .crtc_mut(1)
            .unwrap()
            .properties
            .insert(
                "ACTIVE".into(),
                Property {
                    id: 20,
                    kind: PropertyKind::Range,
                    value: 0,
                },
            );

        let mut request = device.begin_atomic().unwrap();
        device
            .add_atomic_property(&mut request, 1, "ACTIVE", 1)
            .unwrap();
        assert!(matches!(
            device.add_atomic_property(&mut request, 1, "NO_SUCH_PROP", 1),
            Err(Error::UnknownProperty { .. })
        ));
        device.commit_atomic(request, true).unwrap();
    }
}
