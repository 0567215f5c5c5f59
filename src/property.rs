//! Uniform typed view over KMS plane/layer properties.
//!
//! Every property this crate cares about is drawn from a closed set of
//! recognized kernel names. Downstream code indexes by [`PropertyIndex`],
//! never by string — the string comparison happens exactly once, at
//! registration time, in [`PropertyIndex::from_kernel_name`].

use crate::atomic_request::AtomicRequest;
use crate::error::Error;
use drm::control::{property, RawResourceHandle};

/// The closed set of properties this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(non_camel_case_types)]
pub enum PropertyIndex {
    Type,
    FbId,
    CrtcId,
    CrtcX,
    CrtcY,
    CrtcW,
    CrtcH,
    SrcX,
    SrcY,
    SrcW,
    SrcH,
    Zpos,
    Alpha,
    Rotation,
    ScalingFilter,
    PixelBlendMode,
    FbDamageClips,
    InFenceFd,
    InFormats,
}

impl PropertyIndex {
    /// All recognized indices, in declaration order. Used when enumerating a
    /// freshly-registered object's properties.
    pub const ALL: &'static [PropertyIndex] = &[
        PropertyIndex::Type,
        PropertyIndex::FbId,
        PropertyIndex::CrtcId,
        PropertyIndex::CrtcX,
        PropertyIndex::CrtcY,
        PropertyIndex::CrtcW,
        PropertyIndex::CrtcH,
        PropertyIndex::SrcX,
        PropertyIndex::SrcY,
        PropertyIndex::SrcW,
        PropertyIndex::SrcH,
        PropertyIndex::Zpos,
        PropertyIndex::Alpha,
        PropertyIndex::Rotation,
        PropertyIndex::ScalingFilter,
        PropertyIndex::PixelBlendMode,
        PropertyIndex::FbDamageClips,
        PropertyIndex::InFenceFd,
        PropertyIndex::InFormats,
    ];

    /// Bit-exact match against the kernel's own property names. Unknown
    /// names return `None` and are silently ignored by the caller.
    pub fn from_kernel_name(name: &str) -> Option<PropertyIndex> {
        Some(match name {
            "type" => PropertyIndex::Type,
            "FB_ID" => PropertyIndex::FbId,
            "CRTC_ID" => PropertyIndex::CrtcId,
            "CRTC_X" => PropertyIndex::CrtcX,
            "CRTC_Y" => PropertyIndex::CrtcY,
            "CRTC_W" => PropertyIndex::CrtcW,
            "CRTC_H" => PropertyIndex::CrtcH,
            "SRC_X" => PropertyIndex::SrcX,
            "SRC_Y" => PropertyIndex::SrcY,
            "SRC_W" => PropertyIndex::SrcW,
            "SRC_H" => PropertyIndex::SrcH,
            "zpos" => PropertyIndex::Zpos,
            "alpha" => PropertyIndex::Alpha,
            "rotation" => PropertyIndex::Rotation,
            "SCALING FILTER" => PropertyIndex::ScalingFilter,
            "pixel blend mode" => PropertyIndex::PixelBlendMode,
            "FB_DAMAGE_CLIPS" => PropertyIndex::FbDamageClips,
            "IN_FENCE_FD" => PropertyIndex::InFenceFd,
            "IN_FORMATS" => PropertyIndex::InFormats,
            _ => return None,
        })
    }

    /// No-op default value for properties the layer may set but that a
    /// plane is free to silently lack. `None` if the property has no
    /// such default (its absence on a plane is always an error).
    pub fn noop_default(self) -> Option<u64> {
        match self {
            PropertyIndex::Alpha => Some(0xFFFF),
            PropertyIndex::Rotation => Some(1), // DRM_MODE_ROTATE_0
            PropertyIndex::ScalingFilter => Some(0),
            PropertyIndex::PixelBlendMode => Some(0),
            _ => None,
        }
    }
}

/// The kernel's declared kind for a property, used to reject invalid writes
/// before ever probing the driver.
#[derive(Debug, Clone)]
pub enum DriverMetadata {
    /// `lo <= v <= hi`, compared as unsigned.
    Range { lo: u64, hi: u64 },
    /// `lo <= v <= hi`, compared as signed.
    SignedRange { lo: i64, hi: i64 },
    /// `v` must equal one of these declared discrete values.
    Enum { values: Vec<u64> },
    /// `v & !mask == 0`.
    Bitmask { mask: u64 },
    /// Always rejected.
    Immutable,
}

impl DriverMetadata {
    /// Validate `value` against this metadata's kind.
    pub fn accepts(&self, value: u64) -> bool {
        match self {
            DriverMetadata::Range { lo, hi } => *lo <= value && value <= *hi,
            DriverMetadata::SignedRange { lo, hi } => {
                let v = value as i64;
                *lo <= v && v <= *hi
            }
            DriverMetadata::Enum { values } => values.contains(&value),
            DriverMetadata::Bitmask { mask } => value & !mask == 0,
            DriverMetadata::Immutable => false,
        }
    }
}

/// One property as observed on a plane or layer's bag.
#[derive(Debug, Clone)]
pub struct Property {
    pub index: PropertyIndex,
    pub driver_id: property::Handle,
    pub current_value: u64,
    pub previous_value: u64,
    pub metadata: DriverMetadata,
}

impl Property {
    pub fn new(index: PropertyIndex, driver_id: property::Handle, metadata: DriverMetadata) -> Self {
        Property {
            index,
            driver_id,
            current_value: 0,
            previous_value: 0,
            metadata,
        }
    }

    /// Validate `value` against [`DriverMetadata`] and, if acceptable,
    /// append the write to `request`. Invalid values are reported as
    /// [`Error::Einval`] — a pruning signal to the allocator, not fatal.
    pub fn validate_and_write(
        &self,
        request: &mut AtomicRequest,
        object: RawResourceHandle,
        value: u64,
    ) -> Result<(), Error> {
        if !self.metadata.accepts(value) {
            return Err(Error::Einval);
        }
        request.push(object, self.driver_id, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_accepts_inclusive_bounds() {
        let md = DriverMetadata::Range { lo: 1, hi: 10 };
        assert!(md.accepts(1));
        assert!(md.accepts(10));
        assert!(!md.accepts(0));
        assert!(!md.accepts(11));
    }

    #[test]
    fn signed_range_rejects_out_of_range() {
        let md = DriverMetadata::SignedRange { lo: -5, hi: 5 };
        assert!(md.accepts((-3i64) as u64));
        assert!(!md.accepts((-10i64) as u64));
    }

    #[test]
    fn bitmask_rejects_unknown_bits() {
        let md = DriverMetadata::Bitmask { mask: 0b0110 };
        assert!(md.accepts(0b0100));
        assert!(!md.accepts(0b1000));
    }

    #[test]
    fn immutable_always_rejects() {
        assert!(!DriverMetadata::Immutable.accepts(0));
    }

    #[test]
    fn name_mapping_is_bit_exact() {
        assert_eq!(PropertyIndex::from_kernel_name("zpos"), Some(PropertyIndex::Zpos));
        assert_eq!(PropertyIndex::from_kernel_name("ZPOS"), None);
        assert_eq!(
            PropertyIndex::from_kernel_name("SCALING FILTER"),
            Some(PropertyIndex::ScalingFilter)
        );
        assert_eq!(PropertyIndex::from_kernel_name("nonsense"), None);
    }
}
