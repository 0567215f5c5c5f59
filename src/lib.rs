//! Backtracking hardware-plane allocator for atomic-modesetting KMS
//! compositors.
//!
//! Given the layers a client wants shown on an output and the planes a
//! device actually exposes, [`device::Device::apply`] searches for an
//! assignment of layers to planes, probing the kernel with `TEST_ONLY`
//! atomic commits rather than trusting static driver metadata alone, and
//! stages the winning assignment into a caller-owned [`atomic_request::AtomicRequest`].
//! Layers that cannot be placed are left for the caller to composite on the
//! GPU.
//!
//! ```text
//! let mut device = Device::new(fd)?;
//! device.register_planes()?;
//! let output = device.create_output(crtc_id)?;
//! device.output_mut(output).unwrap().add_layer(layer);
//! let mut request = AtomicRequest::new();
//! device.apply(output, &mut request, ApplyFlags::empty())?;
//! // commit `request` for real, e.g. via `drm::control::Device::atomic_commit`.
//! ```

pub mod allocator;
pub mod atomic_request;
pub mod device;
pub mod error;
pub mod fb;
pub mod layer;
pub mod logging;
pub mod output;
pub mod plane;
pub mod property;

pub use allocator::ApplyFlags;
pub use atomic_request::AtomicRequest;
pub use device::Device;
pub use error::{Error, ErrorKind, Result};
pub use fb::FbInfo;
pub use layer::Layer;
pub use output::Output;
pub use plane::{Plane, PlaneType};
pub use property::PropertyIndex;
