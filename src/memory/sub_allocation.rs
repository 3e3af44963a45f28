use ash::vk;

/// A handle to a byte range inside one of the sub-allocator's batches.
///
/// The handle is a plain value. It does not point at the batch or its
/// bookkeeping, every operation finds them again through the device memory
/// handle and the offset. Copies are cheap but only one of them may be
/// handed back to the allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubAllocation {
    memory: vk::DeviceMemory,
    offset_in_bytes: vk::DeviceSize,
    size_in_bytes: vk::DeviceSize,
    memory_type_index: u32,
}

impl SubAllocation {
    pub(super) fn new(
        memory: vk::DeviceMemory,
        offset_in_bytes: vk::DeviceSize,
        size_in_bytes: vk::DeviceSize,
        memory_type_index: u32,
    ) -> Self {
        Self {
            memory,
            offset_in_bytes,
            size_in_bytes,
            memory_type_index,
        }
    }

    /// The raw device memory which backs this range.
    ///
    /// # Safety
    ///
    /// Unsafe because ownership is not transferred. The memory belongs to the
    /// allocator and is shared with other sub-allocations.
    pub unsafe fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// The offset of the range from the front of the device memory. This is
    /// the value to pass when binding a resource.
    pub fn offset_in_bytes(&self) -> vk::DeviceSize {
        self.offset_in_bytes
    }

    /// The number of bytes requested for this range.
    pub fn size_in_bytes(&self) -> vk::DeviceSize {
        self.size_in_bytes
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}
