//! A Vulkan device memory sub-allocator and the buffer and image resources
//! built on top of it.
//!
//! Resources are created from a shared `LockedSubAllocator`:
//!
//! - `memory` carves large device memory batches into small ranges
//! - `resources` binds buffers and images to those ranges and stages uploads
//!   when the device has no memory which is both device-local and
//!   host-visible
//! - `render_device` implements the device traits with ash

pub mod logging;
pub mod memory;
pub mod render_device;
pub mod resources;

#[cfg(test)]
mod test_device;
