use {ash::vk, thiserror::Error};

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error(
        "No memory type in mask {:#b} supports the property flags {:?}",
        .0,
        .1
    )]
    NoCompatibleHeap(u32, vk::MemoryPropertyFlags),

    #[error(
        "Heap {} cannot fit another {} byte batch: {} of {} bytes are reserved",
        .heap_index,
        .batch_size,
        .reserved,
        .capacity
    )]
    HeapExhausted {
        heap_index: u32,
        batch_size: u64,
        reserved: u64,
        capacity: u64,
    },

    #[error("The driver was unable to allocate {} bytes of device memory", .0)]
    DriverOutOfMemory(u64, #[source] vk::Result),

    #[error(
        "Alignment {} is not a power of two multiple of the {} byte minimum",
        .alignment,
        .required
    )]
    InvalidAlignment { alignment: u64, required: u64 },

    #[error("No batch of memory type {} owns {:?}", .1, .0)]
    UnknownBatch(vk::DeviceMemory, u32),

    #[error("No allocation exists at offset {} in {:?}", .1, .0)]
    UnknownAllocation(vk::DeviceMemory, u64),

    #[error("The allocation at offset {} in {:?} is already mapped", .1, .0)]
    AlreadyMapped(vk::DeviceMemory, u64),

    #[error("The allocation at offset {} in {:?} is not mapped", .1, .0)]
    NotMapped(vk::DeviceMemory, u64),

    #[error(
        "The allocation at offset {} in {:?} was freed while still mapped",
        .1,
        .0
    )]
    FreedWhileMapped(vk::DeviceMemory, u64),

    #[error(
        "{} bytes at offset {} do not fit in the {} byte allocation",
        .size,
        .offset,
        .allocation_size
    )]
    MapRangeOutOfBounds {
        offset: u64,
        size: u64,
        allocation_size: u64,
    },

    #[error("Memory type {} is not host visible and cannot be mapped", .0)]
    MemoryNotHostVisible(u32),

    #[error("Unable to map device memory")]
    UnableToMapDeviceMemory(#[source] vk::Result),

    #[error("Unable to flush mapped device memory")]
    UnableToFlushMappedMemoryRanges(#[source] vk::Result),
}
