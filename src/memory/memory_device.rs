use {ash::vk, std::ffi::c_void};

/// The raw device memory operations used by the sub-allocator.
///
/// `RenderDevice` implements this with a real Vulkan logical device. Every
/// call maps one-to-one onto a Vulkan entry point.
pub trait MemoryDevice {
    /// The memory types and heaps exposed by the physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// The physical device limits. Used for offset alignment and the
    /// non-coherent flush granularity.
    fn limits(&self) -> vk::PhysicalDeviceLimits;

    /// Allocate a raw block of device memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller is responsible for freeing the memory before
    /// the device is destroyed.
    unsafe fn allocate_memory(
        &self,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> Result<vk::DeviceMemory, vk::Result>;

    /// Free a raw block of device memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must ensure no resources bound to the memory
    /// are still in use.
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);

    /// Map the entire memory object into host address space.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - only host-visible memory can be mapped
    ///  - a memory object can only be mapped once at a time
    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        flags: vk::MemoryMapFlags,
    ) -> Result<*mut c_void, vk::Result>;

    /// # Safety
    ///
    /// Unsafe because the application must ensure the mapped pointer is not
    /// still being used.
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);

    /// Make host writes to non-coherent memory visible to the device.
    ///
    /// # Safety
    ///
    /// Unsafe because the ranges must be inside mapped memory and aligned to
    /// the non-coherent atom size.
    unsafe fn flush_mapped_memory_ranges(
        &self,
        ranges: &[vk::MappedMemoryRange],
    ) -> Result<(), vk::Result>;
}

/// The memory types actually populated in the device's properties.
pub fn memory_types(
    properties: &vk::PhysicalDeviceMemoryProperties,
) -> &[vk::MemoryType] {
    let count = (properties.memory_type_count as usize)
        .min(properties.memory_types.len());
    &properties.memory_types[..count]
}

/// The heaps actually populated in the device's properties.
pub fn memory_heaps(
    properties: &vk::PhysicalDeviceMemoryProperties,
) -> &[vk::MemoryHeap] {
    let count = (properties.memory_heap_count as usize)
        .min(properties.memory_heaps.len());
    &properties.memory_heaps[..count]
}
