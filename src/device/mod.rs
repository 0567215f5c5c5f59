//! Device wrapper: owns the kernel fd, enumerates CRTCs and planes, and
//! implements [`KernelProbe`] against real ioctls.

pub mod probe;

use std::collections::HashSet;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use drm::control::{atomic::AtomicCommitFlags, crtc, plane, property, Device as ControlDevice};
use drm::{ClientCapability, Device as BasicDevice};
use drm_fourcc::{DrmFourcc, DrmModifier};
use indexmap::IndexMap;

use crate::allocator::{self, ApplyFlags};
use crate::atomic_request::AtomicRequest;
use crate::error::Error;
use crate::fb::FbInfo;
use crate::logging::log;
use crate::output::Output;
use crate::plane::{synthesize_zpos, InFormats, ModifierEntry, Plane, PlaneType};
use crate::property::{DriverMetadata, Property, PropertyIndex};
use probe::{retry_test_commit, KernelProbe, ProbeOutcome};
use tracing::Level;

/// `DRM_MODE_FB_MODIFIERS`, from `<drm/drm_mode.h>`: set on `GETFB2`'s
/// `flags` field when the kernel actually populated the per-plane modifier
/// array rather than leaving it implicit.
const DRM_MODE_FB_MODIFIERS: u32 = 1 << 1;

/// Real kernel-backed [`KernelProbe`]: owns the DRM file descriptor.
#[derive(Debug)]
pub struct RealKernel {
    fd: OwnedFd,
}

impl AsFd for RealKernel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for RealKernel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl BasicDevice for RealKernel {}
impl ControlDevice for RealKernel {}

impl KernelProbe for RealKernel {
    fn test_commit(&mut self, req: &AtomicRequest) -> Result<ProbeOutcome, Error> {
        let drm_req = req.to_drm_request();
        // `PAGE_FLIP_EVENT` is never meaningful on a `TEST_ONLY` commit.
        let flags = AtomicCommitFlags::TEST_ONLY | AtomicCommitFlags::ALLOW_MODESET;
        retry_test_commit(|| {
            ControlDevice::atomic_commit(self, flags, drm_req.clone()).map_err(std::io::Error::from)
        })
    }

    fn get_fb(&mut self, fb_id: u32) -> Result<Option<FbInfo>, Error> {
        match drm_ffi::mode::get_framebuffer2(self.as_fd(), fb_id) {
            Ok(raw) => {
                // Dedup handle values before closing: a multi-plane
                // framebuffer may reuse one GEM handle across planes.
                let mut closed = HashSet::new();
                for handle in raw.handles {
                    if handle != 0 && closed.insert(handle) {
                        let _ = drm_ffi::gem::close(self.as_fd(), handle);
                    }
                }
                let Ok(pixel_format) = DrmFourcc::try_from(raw.pixel_format) else {
                    return Ok(None);
                };
                let has_modifier = raw.flags & DRM_MODE_FB_MODIFIERS != 0;
                Ok(Some(FbInfo {
                    width: raw.width,
                    height: raw.height,
                    pixel_format,
                    modifier: DrmModifier::from(raw.modifier[0]),
                    has_modifier,
                }))
            }
            Err(io_err) => match io_err.raw_os_error() {
                Some(e)
                    if e == rustix::io::Errno::NOENT.raw_os_error()
                        || e == rustix::io::Errno::INVAL.raw_os_error() =>
                {
                    Ok(None)
                }
                _ => Err(Error::Device(io_err)),
            },
        }
    }
}

/// Owns the kernel fd, the device's ordered plane list, its outputs, and the
/// CRTC-id array that `possible_crtcs` bitmasks index into.
#[derive(Debug)]
pub struct Device {
    probe: RealKernel,
    planes: Vec<Plane>,
    outputs: Vec<Output>,
    crtc_ids: Vec<crtc::Handle>,
    /// Debug counter, incremented on every test commit.
    pub test_commit_count: u64,
    flip_count: u64,
}

impl Device {
    /// Duplicates `fd`, sets the `ATOMIC`/`UNIVERSAL_PLANES` client
    /// capabilities, and enumerates CRTCs into the internal CRTC-id array.
    /// Non-atomic drivers are rejected: this crate has no legacy
    /// fallback.
    pub fn new(fd: OwnedFd) -> Result<Self, Error> {
        let dup = rustix::fs::fcntl_dupfd_cloexec(&fd, 0).map_err(io_from_rustix)?;
        let probe = RealKernel { fd: dup };
        probe
            .set_client_capability(ClientCapability::Atomic, true)
            .map_err(|_| Error::Einval)?;
        probe
            .set_client_capability(ClientCapability::UniversalPlanes, true)
            .map_err(|_| Error::Einval)?;
        let resources = probe.resource_handles().map_err(drm_err_to_fatal)?;
        let crtc_ids = resources.crtcs().to_vec();
        Ok(Device {
            probe,
            planes: Vec::new(),
            outputs: Vec::new(),
            crtc_ids,
            test_commit_count: 0,
            flip_count: 0,
        })
    }

    /// Enumerates plane resources, parses each plane's object properties,
    /// synthesizes zpos where absent, and inserts every plane into the
    /// device's ordered plane list.
    pub fn register_planes(&mut self) -> Result<(), Error> {
        let plane_handles = self.probe.plane_handles().map_err(drm_err_to_fatal)?;
        let mut first_primary_id: Option<u32> = None;
        for handle in plane_handles.planes().to_vec() {
            self.register_one_plane(handle, &mut first_primary_id)?;
        }
        log!(Level::INFO, "registered {} plane(s)", self.planes.len());
        Ok(())
    }

    fn register_one_plane(&mut self, handle: plane::Handle, first_primary_id: &mut Option<u32>) -> Result<(), Error> {
        if self.planes.iter().any(|p| p.driver_id == handle) {
            return Err(Error::Eexist);
        }

        let info = self.probe.get_plane(handle).map_err(drm_err_to_fatal)?;
        let prop_values = self.probe.get_properties(handle).map_err(drm_err_to_fatal)?;
        let (ids, values) = prop_values.as_props_and_values();

        let mut properties = IndexMap::new();
        let mut plane_type = None;
        let mut zpos_value = None;
        let mut in_formats = None;

        for (&prop_id, &raw_value) in ids.iter().zip(values.iter()) {
            let prop_info = self.probe.get_property(prop_id).map_err(drm_err_to_fatal)?;
            let Some(index) = PropertyIndex::from_kernel_name(&prop_info.name().to_string_lossy()) else {
                continue;
            };
            if index == PropertyIndex::Type {
                plane_type = Some(decode_plane_type(raw_value)?);
            }
            if index == PropertyIndex::Zpos {
                zpos_value = Some(raw_value as i64);
            }
            if index == PropertyIndex::InFormats {
                in_formats = Some(self.parse_in_formats(raw_value)?);
            }
            let mut prop = Property::new(index, prop_id, metadata_from_info(&prop_info));
            prop.current_value = raw_value;
            prop.previous_value = raw_value;
            properties.insert(index, prop);
        }

        // Reject planes missing `type`.
        let plane_type = plane_type.ok_or_else(|| {
            log!(Level::WARN, "plane {:?} has no `type` property, rejecting", handle);
            Error::Einval
        })?;
        let raw_id: u32 = Into::<u32>::into(handle);
        if plane_type == PlaneType::Primary && first_primary_id.is_none() {
            *first_primary_id = Some(raw_id);
        }
        let zpos = zpos_value.unwrap_or_else(|| synthesize_zpos(plane_type, raw_id, *first_primary_id));
        let possible_crtcs = info.possible_crtcs();

        crate::plane::insert_ordered(
            &mut self.planes,
            Plane::new(handle, plane_type, possible_crtcs, zpos, in_formats, properties),
        );
        Ok(())
    }

    fn parse_in_formats(&self, blob_id: u64) -> Result<InFormats, Error> {
        let mut data = Vec::new();
        drm_ffi::mode::get_property_blob(self.probe.as_fd(), blob_id as u32, Some(&mut data))
            .map_err(|e| Error::Device(e))?;
        Ok(decode_in_formats_blob(&data))
    }

    /// Allocate a new output bound to `crtc_id`.
    pub fn create_output(&mut self, crtc_id: crtc::Handle) -> Result<usize, Error> {
        let crtc_index = self
            .crtc_ids
            .iter()
            .position(|c| *c == crtc_id)
            .ok_or(Error::Enoent)?;
        self.outputs.push(Output::new(crtc_id, crtc_index));
        Ok(self.outputs.len() - 1)
    }

    pub fn destroy_output(&mut self, index: usize) {
        self.outputs.remove(index);
    }

    pub fn output(&self, index: usize) -> Option<&Output> {
        self.outputs.get(index)
    }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// The allocator's entry point. Splits `self` into disjoint
    /// field borrows so the probe (fd) and the plane/output state can be
    /// borrowed mutably at once.
    pub fn apply(&mut self, output_idx: usize, request: &mut AtomicRequest, flags: ApplyFlags) -> Result<(), Error> {
        let Device {
            probe,
            planes,
            outputs,
            crtc_ids,
            test_commit_count,
            flip_count,
        } = self;
        let output = outputs.get_mut(output_idx).ok_or(Error::Enoent)?;
        allocator::apply(planes, output, crtc_ids, probe, request, flags, flip_count, test_commit_count)
    }
}

fn io_from_rustix(e: rustix::io::Errno) -> Error {
    Error::Device(e.into())
}

fn drm_err_to_fatal<E: Into<std::io::Error>>(e: E) -> Error {
    let io_err = e.into();
    log!(Level::ERROR, "fatal kernel ioctl failure: {io_err}");
    Error::Device(io_err)
}

/// `DRM_PLANE_TYPE_*` enum values (`<drm/drm_mode.h>`).
fn decode_plane_type(raw: u64) -> Result<PlaneType, Error> {
    match raw {
        0 => Ok(PlaneType::Overlay),
        1 => Ok(PlaneType::Primary),
        2 => Ok(PlaneType::Cursor),
        _ => Err(Error::Einval),
    }
}

/// Best-effort translation of the kernel's declared property kind into
/// [`DriverMetadata`]. Falls back to an unrestricted range for kinds
/// this crate has no use for (object/blob references), since the allocator
/// never writes those through [`Property::validate_and_write`].
fn metadata_from_info(info: &property::Info) -> DriverMetadata {
    if !info.mutable() {
        return DriverMetadata::Immutable;
    }
    match info.value_type() {
        property::ValueType::UnsignedRange(lo, hi) => DriverMetadata::Range { lo, hi },
        property::ValueType::SignedRange(lo, hi) => DriverMetadata::SignedRange { lo, hi },
        property::ValueType::Enum(entries) => DriverMetadata::Enum {
            values: entries.values().collect(),
        },
        property::ValueType::Bitmask(entries) => DriverMetadata::Bitmask { mask: entries.mask() },
        property::ValueType::Boolean => DriverMetadata::Range { lo: 0, hi: 1 },
        _ => DriverMetadata::Range { lo: u64::MIN, hi: u64::MAX },
    }
}

/// Decode a raw `IN_FORMATS` blob (`struct drm_format_modifier_blob`, see
/// `<drm/drm_mode.h>`) into [`InFormats`].
fn decode_in_formats_blob(data: &[u8]) -> InFormats {
    fn read_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap_or_default())
    }
    fn read_u64(data: &[u8], offset: usize) -> u64 {
        u64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap_or_default())
    }

    if data.len() < 16 {
        return InFormats::default();
    }
    let count_formats = read_u32(data, 0) as usize;
    let formats_offset = read_u32(data, 4) as usize;
    let count_modifiers = read_u32(data, 8) as usize;
    let modifiers_offset = read_u32(data, 12) as usize;

    let mut formats = Vec::with_capacity(count_formats);
    for i in 0..count_formats {
        let off = formats_offset + i * 4;
        if off + 4 > data.len() {
            break;
        }
        formats.push(DrmFourcc::try_from(read_u32(data, off)).ok());
    }

    // `struct drm_format_modifier { u64 formats; u32 offset; u32 pad; u64 modifier; }`
    let mut modifiers = Vec::with_capacity(count_modifiers);
    for i in 0..count_modifiers {
        let off = modifiers_offset + i * 24;
        if off + 24 > data.len() {
            break;
        }
        modifiers.push(ModifierEntry {
            formats: read_u64(data, off),
            offset: read_u32(data, off + 8) as usize,
            modifier: DrmModifier::from(read_u64(data, off + 16)),
        });
    }

    InFormats { formats, modifiers }
}
