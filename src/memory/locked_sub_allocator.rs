use {
    crate::memory::{
        AllocatorError, MemoryDevice, MemoryRequirement, SubAllocation,
        SubAllocator,
    },
    ash::vk,
    std::{
        ffi::c_void,
        sync::{Arc, Mutex, MutexGuard},
    },
};

/// A sub-allocator decorated with a mutex so resources can share it.
///
/// Resources keep an `Arc` of this type and call back into it when they map
/// or release memory. The device is kept outside of the lock so resource
/// creation calls don't serialize on the allocator.
pub struct LockedSubAllocator<D: MemoryDevice> {
    sub_allocator: Mutex<SubAllocator<D>>,
    device: Arc<D>,
}

impl<D: MemoryDevice> LockedSubAllocator<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self::from_sub_allocator(SubAllocator::new(device))
    }

    pub fn from_sub_allocator(sub_allocator: SubAllocator<D>) -> Self {
        Self {
            device: sub_allocator.device().clone(),
            sub_allocator: Mutex::new(sub_allocator),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Acquire exclusive access to the allocator for queries or for several
    /// operations in a row.
    pub fn lock(&self) -> MutexGuard<'_, SubAllocator<D>> {
        self.sub_allocator
            .lock()
            .expect("unable to acquire the sub-allocator lock")
    }

    /// Lock the allocator and find a memory type for the flags.
    pub fn get_memory_type_for_flags(
        &self,
        memory_type_bits: u32,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.lock()
            .get_memory_type_for_flags(memory_type_bits, property_flags)
    }

    /// Lock the allocator and dispatch the memory request.
    ///
    /// # Safety
    ///
    /// See `SubAllocator::allocate`.
    pub unsafe fn allocate(
        &self,
        requirement: &MemoryRequirement,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Result<SubAllocation, AllocatorError> {
        self.lock().allocate(requirement, property_flags)
    }

    /// Lock the allocator and return the range.
    ///
    /// # Safety
    ///
    /// See `SubAllocator::deallocate`.
    pub unsafe fn deallocate(
        &self,
        sub_allocation: &SubAllocation,
    ) -> Result<(), AllocatorError> {
        self.lock().deallocate(sub_allocation)
    }

    /// # Safety
    ///
    /// See `SubAllocator::map`.
    pub unsafe fn map(
        &self,
        sub_allocation: &SubAllocation,
        offset: u64,
        size: u64,
        flags: vk::MemoryMapFlags,
    ) -> Result<*mut c_void, AllocatorError> {
        self.lock().map(sub_allocation, offset, size, flags)
    }

    /// # Safety
    ///
    /// See `SubAllocator::unmap`.
    pub unsafe fn unmap(
        &self,
        sub_allocation: &SubAllocation,
    ) -> Result<(), AllocatorError> {
        self.lock().unmap(sub_allocation)
    }

    /// # Safety
    ///
    /// See `SubAllocator::flush`.
    pub unsafe fn flush(
        &self,
        sub_allocation: &SubAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), AllocatorError> {
        self.lock().flush(sub_allocation, offset, size)
    }
}
