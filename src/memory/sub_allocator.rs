use {
    crate::{
        logging::PrettyList,
        memory::{
            batch::{align_down, align_up},
            memory_device::{memory_heaps, memory_types},
            AllocatorError, Batch, BatchRegistry, MemoryDevice,
            MemoryRequirement, SubAllocation,
        },
    },
    ash::vk,
    std::{ffi::c_void, ptr::NonNull, sync::Arc},
};

/// The smallest batch the allocator will request from the driver.
pub const DEFAULT_BATCH_SIZE: u64 = 64 * 1024 * 1024;

/// A first-fit allocator which carves large device memory batches into many
/// small ranges.
///
/// The allocator performs no locking. Callers which share it between threads
/// must serialize access, see `LockedSubAllocator`.
pub struct SubAllocator<D: MemoryDevice> {
    device: Arc<D>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    batch_size: u64,
    registry: BatchRegistry,

    /// One bit per heap which reported a size of 0 and has been logged.
    unbounded_heaps_reported: u32,
}

impl<D: MemoryDevice> SubAllocator<D> {
    /// Create an allocator which requests batches of at least
    /// `DEFAULT_BATCH_SIZE` bytes.
    pub fn new(device: Arc<D>) -> Self {
        Self::with_batch_size(device, DEFAULT_BATCH_SIZE)
    }

    /// Create an allocator with a custom minimum batch size.
    pub fn with_batch_size(device: Arc<D>, batch_size: u64) -> Self {
        let memory_properties = device.memory_properties();
        let limits = device.limits();
        log::debug!(
            "Sub-allocator memory types: {:?}",
            PrettyList(memory_types(&memory_properties))
        );
        Self {
            registry: BatchRegistry::new(
                memory_types(&memory_properties).len(),
            ),
            device,
            memory_properties,
            limits,
            batch_size: batch_size.max(1),
            unbounded_heaps_reported: 0,
        }
    }

    /// The device used for raw memory operations.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The limits reported by the device when the allocator was created.
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    /// Find the lowest memory type in `memory_type_bits` whose properties
    /// include every flag in `property_flags`.
    pub fn get_memory_type_for_flags(
        &self,
        memory_type_bits: u32,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        memory_types(&self.memory_properties)
            .iter()
            .enumerate()
            .find(|(i, memory_type)| {
                let type_supported = memory_type_bits & (1 << i) != 0;
                let properties_supported =
                    memory_type.property_flags.contains(property_flags);
                type_supported & properties_supported
            })
            .map(|(i, _memory_type)| i as u32)
    }

    /// The property flags for a memory type, empty if the index is invalid.
    pub fn memory_type_flags(
        &self,
        memory_type_index: u32,
    ) -> vk::MemoryPropertyFlags {
        memory_types(&self.memory_properties)
            .get(memory_type_index as usize)
            .map(|memory_type| memory_type.property_flags)
            .unwrap_or_else(vk::MemoryPropertyFlags::empty)
    }

    /// Reserve a range which satisfies the requirement in a memory type with
    /// the requested properties.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller is responsible for returning the range with
    /// `deallocate` before the allocator is released.
    pub unsafe fn allocate(
        &mut self,
        requirement: &MemoryRequirement,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Result<SubAllocation, AllocatorError> {
        let required = requirement.usage_hint.minimum_alignment(&self.limits);
        let alignment = requirement.alignment;
        if !alignment.is_power_of_two() || alignment % required != 0 {
            return Err(AllocatorError::InvalidAlignment {
                alignment,
                required,
            });
        }

        let memory_type_index = self
            .get_memory_type_for_flags(
                requirement.compatible_memory_types,
                property_flags,
            )
            .ok_or(AllocatorError::NoCompatibleHeap(
                requirement.compatible_memory_types,
                property_flags,
            ))?;

        // zero-sized records would share an offset with their neighbour
        let size = requirement.size.max(1);

        for batch in self
            .registry
            .batches_for_tiling_mut(memory_type_index, requirement.tiling_class)
        {
            if let Some(offset) = batch.find_first_fit(size, alignment) {
                batch.insert(offset, size);
                log::trace!(
                    "Sub-allocated {} bytes at offset {} in {:?}",
                    size,
                    offset,
                    batch.memory()
                );
                return Ok(SubAllocation::new(
                    batch.memory(),
                    offset,
                    size,
                    memory_type_index,
                ));
            }
        }

        let batch_size = size.max(self.batch_size);
        self.check_heap_capacity(memory_type_index, batch_size)?;

        let allocate_info = vk::MemoryAllocateInfo {
            allocation_size: batch_size,
            memory_type_index,
            ..Default::default()
        };
        let memory = self
            .device
            .allocate_memory(&allocate_info)
            .map_err(|err| AllocatorError::DriverOutOfMemory(batch_size, err))?;

        let mut batch = Batch::new(
            memory,
            batch_size,
            memory_type_index,
            requirement.tiling_class,
        );
        batch.insert(0, size);
        self.registry.push(batch);

        log::debug!(
            "New {:?} batch {:?} with {} bytes in memory type {}",
            requirement.tiling_class,
            memory,
            batch_size,
            memory_type_index
        );

        Ok(SubAllocation::new(memory, 0, size, memory_type_index))
    }

    /// Return a range to its batch. The batch's device memory is freed when
    /// its last range is returned.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the caller must ensure no device operations still use the range
    ///  - the sub-allocation handle, and every copy of it, is invalid after
    ///    this call
    pub unsafe fn deallocate(
        &mut self,
        sub_allocation: &SubAllocation,
    ) -> Result<(), AllocatorError> {
        let memory_type_index = sub_allocation.memory_type_index();
        let memory = sub_allocation.memory();

        let batch = self.registry.find_mut(memory_type_index, memory)?;
        batch.remove(sub_allocation.offset_in_bytes())?;
        log::trace!(
            "Freed offset {} in {:?}",
            sub_allocation.offset_in_bytes(),
            memory
        );

        if batch.is_empty() {
            self.registry.remove(memory_type_index, memory);
            self.device.free_memory(memory);
            log::debug!(
                "Released empty batch {:?} in memory type {}",
                memory,
                memory_type_index
            );
        }
        Ok(())
    }

    /// Map `size` bytes starting `offset` bytes into the sub-allocation.
    ///
    /// The batch's device memory is mapped once, by the first mapping of any
    /// of its ranges, and stays mapped until the last one is unmapped.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the returned pointer is only valid until the matching `unmap`
    ///  - only the requested bytes may be accessed through the pointer
    ///  - the caller must synchronize host access with device access
    pub unsafe fn map(
        &mut self,
        sub_allocation: &SubAllocation,
        offset: u64,
        size: u64,
        flags: vk::MemoryMapFlags,
    ) -> Result<*mut c_void, AllocatorError> {
        let memory_type_index = sub_allocation.memory_type_index();
        if !self
            .memory_type_flags(memory_type_index)
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(AllocatorError::MemoryNotHostVisible(
                memory_type_index,
            ));
        }

        let memory = sub_allocation.memory();
        let record_offset = sub_allocation.offset_in_bytes();
        let batch = self.registry.find_mut(memory_type_index, memory)?;

        let record_size = batch.record(record_offset)?.size;
        if offset.checked_add(size).map_or(true, |end| end > record_size) {
            return Err(AllocatorError::MapRangeOutOfBounds {
                offset,
                size,
                allocation_size: record_size,
            });
        }

        if batch.begin_mapping(record_offset)? {
            let mapped = self
                .device
                .map_memory(memory, flags)
                .map_err(AllocatorError::UnableToMapDeviceMemory)
                .and_then(|ptr| {
                    NonNull::new(ptr).ok_or(
                        AllocatorError::UnableToMapDeviceMemory(
                            vk::Result::ERROR_MEMORY_MAP_FAILED,
                        ),
                    )
                });
            match mapped {
                Ok(ptr) => batch.set_mapped_ptr(ptr),
                Err(err) => {
                    batch.abort_mapping(record_offset);
                    return Err(err);
                }
            }
            log::trace!("Mapped batch {:?}", memory);
        }

        let base = batch
            .mapped_ptr()
            .ok_or(AllocatorError::NotMapped(memory, record_offset))?;
        Ok((base.as_ptr() as *mut u8).add((record_offset + offset) as usize)
            as *mut c_void)
    }

    /// Release a mapping made with `map`.
    ///
    /// # Safety
    ///
    /// Unsafe because the pointer returned by `map` must no longer be used.
    pub unsafe fn unmap(
        &mut self,
        sub_allocation: &SubAllocation,
    ) -> Result<(), AllocatorError> {
        let memory = sub_allocation.memory();
        let batch = self
            .registry
            .find_mut(sub_allocation.memory_type_index(), memory)?;
        if batch.end_mapping(sub_allocation.offset_in_bytes())? {
            self.device.unmap_memory(memory);
            log::trace!("Unmapped batch {:?}", memory);
        }
        Ok(())
    }

    /// Flush host writes to a mapped range so they are visible to the device.
    ///
    /// The range is widened to the device's non-coherent atom size and
    /// clamped to the end of the batch.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must synchronize the flush with device
    /// access to the range.
    pub unsafe fn flush(
        &mut self,
        sub_allocation: &SubAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), AllocatorError> {
        let memory = sub_allocation.memory();
        let record_offset = sub_allocation.offset_in_bytes();
        let batch = self
            .registry
            .find_mut(sub_allocation.memory_type_index(), memory)?;
        let record = batch.record(record_offset)?;
        if !record.mapped {
            return Err(AllocatorError::NotMapped(memory, record_offset));
        }
        if offset > record.size {
            return Err(AllocatorError::MapRangeOutOfBounds {
                offset,
                size,
                allocation_size: record.size,
            });
        }
        let size = size.min(record.size - offset);

        let atom_size = self.limits.non_coherent_atom_size;
        let start = align_down(record_offset + offset, atom_size);
        let end = align_up(record_offset + offset + size, atom_size)
            .min(batch.size_in_bytes());
        let range = vk::MappedMemoryRange {
            memory,
            offset: start,
            size: end - start,
            ..Default::default()
        };
        self.device
            .flush_mapped_memory_ranges(&[range])
            .map_err(AllocatorError::UnableToFlushMappedMemoryRanges)
    }

    /// All live batches for a memory type, in creation order.
    pub fn batches(&self, memory_type_index: u32) -> &[Batch] {
        self.registry.batches(memory_type_index)
    }

    /// The number of live batches for a memory type.
    pub fn batch_count(&self, memory_type_index: u32) -> usize {
        self.registry.batch_count(memory_type_index)
    }

    pub fn total_batch_count(&self) -> usize {
        self.registry.total_batch_count()
    }

    /// The number of live sub-allocations across every batch.
    pub fn allocation_count(&self) -> usize {
        self.registry.iter().map(Batch::allocation_count).sum()
    }

    /// Bytes held in the batches of one memory type.
    pub fn reserved_bytes(&self, memory_type_index: u32) -> u64 {
        self.registry
            .batches(memory_type_index)
            .iter()
            .map(Batch::size_in_bytes)
            .sum()
    }

    /// Write a usage report for every batch to the debug log.
    pub fn log_batches(&self) {
        let report: Vec<String> = self
            .registry
            .iter()
            .map(|batch| {
                format!(
                    "type {} {:?} {:?}: {} allocations, {}/{} bytes, {} maps",
                    batch.memory_type_index(),
                    batch.tiling_class(),
                    batch.memory(),
                    batch.allocation_count(),
                    batch.used_bytes(),
                    batch.size_in_bytes(),
                    batch.mapped_ref_count(),
                )
            })
            .collect();
        log::debug!("Sub-allocator batches: {}", PrettyList(&report));
    }

    /// Free every batch.
    ///
    /// # Safety
    ///
    /// Unsafe because any sub-allocations which are still live become
    /// dangling. Their memory is freed regardless.
    pub unsafe fn release(&mut self) {
        for batch in self.registry.drain() {
            if !batch.is_empty() {
                log::warn!(
                    "Releasing batch {:?} with {} live allocations",
                    batch.memory(),
                    batch.allocation_count()
                );
            }
            if batch.is_mapped() {
                self.device.unmap_memory(batch.memory());
            }
            self.device.free_memory(batch.memory());
        }
    }

    /// Fail when another batch would push the memory type's batches past the
    /// reported size of its heap.
    fn check_heap_capacity(
        &mut self,
        memory_type_index: u32,
        batch_size: u64,
    ) -> Result<(), AllocatorError> {
        let heap_index = memory_types(&self.memory_properties)
            [memory_type_index as usize]
            .heap_index;
        let capacity = memory_heaps(&self.memory_properties)
            .get(heap_index as usize)
            .map_or(0, |heap| heap.size);

        if capacity == 0 {
            // Some drivers report 0 for heaps of unknown size. No limit is
            // applied, so real exhaustion surfaces as a driver error.
            let bit = 1 << heap_index;
            if self.unbounded_heaps_reported & bit == 0 {
                self.unbounded_heaps_reported |= bit;
                log::warn!(
                    "Heap {} reports a size of 0, capacity is not checked",
                    heap_index
                );
            }
            return Ok(());
        }

        let reserved = self.reserved_bytes(memory_type_index);
        let exhausted = reserved
            .checked_add(batch_size)
            .map_or(true, |total| total > capacity);
        if exhausted {
            return Err(AllocatorError::HeapExhausted {
                heap_index,
                batch_size,
                reserved,
                capacity,
            });
        }
        Ok(())
    }
}

impl<D: MemoryDevice> Drop for SubAllocator<D> {
    fn drop(&mut self) {
        // safe because the allocator is being destroyed, live
        // sub-allocations are already a leak and are reported as such
        unsafe { self.release() }
    }
}

impl<D: MemoryDevice> std::fmt::Debug for SubAllocator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAllocator")
            .field("batch_size", &self.batch_size)
            .field("registry", &self.registry)
            .finish()
    }
}
