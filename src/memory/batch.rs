use {
    crate::memory::{AllocatorError, TilingClass},
    ash::vk,
    std::{collections::BTreeMap, ffi::c_void, ptr::NonNull},
};

/// One live range inside a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    pub offset: u64,
    pub size: u64,
    pub mapped: bool,
}

impl AllocationRecord {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// The host pointer for a mapped batch.
#[derive(Debug, Copy, Clone)]
struct MappedPtr(NonNull<c_void>);

// The pointer is only produced and consumed while the owning allocator is
// borrowed mutably, so moving it to another thread along with the allocator
// cannot create aliasing access.
unsafe impl Send for MappedPtr {}

/// A single raw device memory allocation which is carved into many ranges.
#[derive(Debug)]
pub struct Batch {
    memory: vk::DeviceMemory,
    size_in_bytes: u64,
    memory_type_index: u32,
    tiling_class: TilingClass,

    /// Live ranges keyed by their offset.
    allocations: BTreeMap<u64, AllocationRecord>,

    mapped_ref_count: u32,
    mapped_ptr: Option<MappedPtr>,
}

impl Batch {
    pub fn new(
        memory: vk::DeviceMemory,
        size_in_bytes: u64,
        memory_type_index: u32,
        tiling_class: TilingClass,
    ) -> Self {
        Self {
            memory,
            size_in_bytes,
            memory_type_index,
            tiling_class,
            allocations: BTreeMap::new(),
            mapped_ref_count: 0,
            mapped_ptr: None,
        }
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn tiling_class(&self) -> TilingClass {
        self.tiling_class
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Total bytes covered by live records, not counting alignment padding.
    pub fn used_bytes(&self) -> u64 {
        self.allocations.values().map(|record| record.size).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.allocations.values()
    }

    pub fn mapped_ref_count(&self) -> u32 {
        self.mapped_ref_count
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped_ptr.is_some()
    }

    /// Find the first gap, in offset order, which can hold `size` bytes at
    /// the given alignment. Returns the aligned offset of the gap.
    pub fn find_first_fit(&self, size: u64, alignment: u64) -> Option<u64> {
        let mut cursor = 0;
        for record in self.allocations.values() {
            let start = align_up(cursor, alignment);
            if start.checked_add(size)? <= record.offset {
                return Some(start);
            }
            cursor = record.end();
        }
        let start = align_up(cursor, alignment);
        if start.checked_add(size)? <= self.size_in_bytes {
            Some(start)
        } else {
            None
        }
    }

    /// Record a new live range. The caller must have found the offset with
    /// `find_first_fit`.
    pub fn insert(&mut self, offset: u64, size: u64) {
        debug_assert!(
            offset + size <= self.size_in_bytes,
            "a record must stay inside its batch"
        );
        debug_assert!(
            self.allocations
                .range(..offset)
                .next_back()
                .map_or(true, |(_, previous)| previous.end() <= offset),
            "a record must not overlap its predecessor"
        );
        debug_assert!(
            self.allocations
                .range(offset..)
                .next()
                .map_or(true, |(_, next)| offset + size <= next.offset),
            "a record must not overlap its successor"
        );
        self.allocations.insert(
            offset,
            AllocationRecord {
                offset,
                size,
                mapped: false,
            },
        );
    }

    /// Drop the record at `offset`.
    pub fn remove(&mut self, offset: u64) -> Result<(), AllocatorError> {
        let record = self.record(offset)?;
        if record.mapped {
            return Err(AllocatorError::FreedWhileMapped(self.memory, offset));
        }
        self.allocations.remove(&offset);
        Ok(())
    }

    pub fn record(
        &self,
        offset: u64,
    ) -> Result<&AllocationRecord, AllocatorError> {
        self.allocations
            .get(&offset)
            .ok_or(AllocatorError::UnknownAllocation(self.memory, offset))
    }

    /// Mark the record at `offset` as mapped and bump the batch's count.
    ///
    /// Returns true when this is the first mapping, meaning the caller must
    /// map the device memory and provide the pointer with `set_mapped_ptr`.
    pub fn begin_mapping(
        &mut self,
        offset: u64,
    ) -> Result<bool, AllocatorError> {
        let memory = self.memory;
        let record = self
            .allocations
            .get_mut(&offset)
            .ok_or(AllocatorError::UnknownAllocation(memory, offset))?;
        if record.mapped {
            return Err(AllocatorError::AlreadyMapped(memory, offset));
        }
        record.mapped = true;
        self.mapped_ref_count += 1;
        Ok(self.mapped_ref_count == 1)
    }

    /// Undo `begin_mapping` after the device failed to map the memory.
    pub fn abort_mapping(&mut self, offset: u64) {
        if let Some(record) = self.allocations.get_mut(&offset) {
            record.mapped = false;
            self.mapped_ref_count -= 1;
        }
    }

    /// Clear the record's mapped flag and drop the batch's count.
    ///
    /// Returns true when this was the last mapping, meaning the caller must
    /// unmap the device memory.
    pub fn end_mapping(&mut self, offset: u64) -> Result<bool, AllocatorError> {
        let memory = self.memory;
        let record = self
            .allocations
            .get_mut(&offset)
            .ok_or(AllocatorError::UnknownAllocation(memory, offset))?;
        if !record.mapped {
            return Err(AllocatorError::NotMapped(memory, offset));
        }
        record.mapped = false;
        self.mapped_ref_count -= 1;
        if self.mapped_ref_count == 0 {
            self.mapped_ptr = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn set_mapped_ptr(&mut self, ptr: NonNull<c_void>) {
        debug_assert!(self.mapped_ref_count > 0);
        self.mapped_ptr = Some(MappedPtr(ptr));
    }

    /// The host address of the first byte of the batch, when mapped.
    pub fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.mapped_ptr.map(|MappedPtr(ptr)| ptr)
    }
}

/// Round `value` up to the next multiple of `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    match value % alignment {
        0 => value,
        remainder => value + (alignment - remainder),
    }
}

/// Round `value` down to the previous multiple of `alignment`.
pub fn align_down(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value - (value % alignment)
}
