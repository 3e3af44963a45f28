//! Buffers and images which live in sub-allocated device memory.
//!
//! Both resource types fall back to a host-visible staging buffer when they
//! ask for memory which is device-local and host-visible at the same time but
//! the device has no such memory type for them.

mod barrier_batch;
mod buffer;
mod error;
mod format;
mod image;
mod resource_device;
mod subresource_states;

pub use self::{
    barrier_batch::{BarrierBatch, ImageBarrier},
    buffer::Buffer,
    error::ResourceError,
    format::texel_size_in_bytes,
    image::{Image, ImageDescription},
    resource_device::ResourceDevice,
    subresource_states::{SubresourceState, SubresourceStates},
};
