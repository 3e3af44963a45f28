//! Device memory sub-allocation.
//!
//! Drivers cap the number of raw device memory allocations, so resources are
//! placed as ranges inside a small number of large batches. Batches are
//! allocated on demand and freed when their last range is returned.

mod batch;
mod batch_registry;
mod error;
mod locked_sub_allocator;
mod memory_device;
mod memory_requirement;
mod sub_allocation;
mod sub_allocator;

pub(crate) use self::batch::align_up;

pub use self::{
    batch::{AllocationRecord, Batch},
    batch_registry::BatchRegistry,
    error::AllocatorError,
    locked_sub_allocator::LockedSubAllocator,
    memory_device::{memory_heaps, memory_types, MemoryDevice},
    memory_requirement::{MemoryRequirement, TilingClass, UsageHint},
    sub_allocation::SubAllocation,
    sub_allocator::{SubAllocator, DEFAULT_BATCH_SIZE},
};
