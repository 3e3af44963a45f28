use {
    crate::{
        memory::{
            align_up, LockedSubAllocator, MemoryRequirement, SubAllocation,
        },
        resources::{ResourceDevice, ResourceError},
    },
    ash::vk,
    scopeguard::ScopeGuard,
    std::{ffi::c_void, sync::Arc},
};

/// Host flags which cannot be honored by device-local memory once the shared
/// combination is unavailable.
pub(crate) const HOST_FLAGS: vk::MemoryPropertyFlags =
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw()
            | vk::MemoryPropertyFlags::HOST_CACHED.as_raw(),
    );

/// Memory which is both device-local and host-visible.
pub(crate) const SHARED_FLAGS: vk::MemoryPropertyFlags =
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw()
            | vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw(),
    );

/// A Vulkan buffer bound to a range of sub-allocated memory.
///
/// When the requested memory is both device-local and host-visible but the
/// device can't provide that combination for this buffer, the buffer lives in
/// device-local memory and carries a host-visible staging buffer. Mapping
/// then targets the staging buffer and `upload_to_vram` records the copy.
pub struct Buffer<D: ResourceDevice> {
    buffer: vk::Buffer,
    allocation: SubAllocation,
    size_in_bytes: u64,
    usage: vk::BufferUsageFlags,
    property_flags: vk::MemoryPropertyFlags,
    mapped_range: Option<(u64, u64)>,
    staging: Option<Box<Buffer<D>>>,
    allocator: Arc<LockedSubAllocator<D>>,
}

impl<D: ResourceDevice> Buffer<D> {
    /// Create a new buffer.
    ///
    /// The size is padded up to the device's non-coherent atom size so
    /// flushes never touch a neighbouring resource.
    pub fn new(
        allocator: Arc<LockedSubAllocator<D>>,
        usage: vk::BufferUsageFlags,
        size_in_bytes: u64,
        desired_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, ResourceError> {
        let device = allocator.device().clone();
        let limits = device.limits();
        let size_in_bytes =
            align_up(size_in_bytes.max(1), limits.non_coherent_atom_size);

        let buffer = scopeguard::guard(
            unsafe { create_raw_buffer(&*device, usage, size_in_bytes)? },
            |buffer| unsafe { device.destroy_buffer(buffer) },
        );
        let requirement = MemoryRequirement::for_buffer(
            unsafe { device.get_buffer_memory_requirements(*buffer) },
            usage,
            &limits,
        );

        // Compatibility depends on the buffer, not only on the flags, so the
        // shared combination can only be checked once the requirements are
        // known.
        if desired_flags.contains(SHARED_FLAGS)
            && allocator
                .get_memory_type_for_flags(
                    requirement.compatible_memory_types,
                    desired_flags,
                )
                .is_none()
        {
            drop(buffer);
            return Self::new_with_staging(
                allocator,
                usage,
                size_in_bytes,
                desired_flags,
            );
        }

        let allocation = unsafe {
            let allocation = scopeguard::guard(
                allocator.allocate(&requirement, desired_flags)?,
                |allocation| {
                    if let Err(err) = allocator.deallocate(&allocation) {
                        log::error!("Unable to release buffer memory {}", err);
                    }
                },
            );
            device
                .bind_buffer_memory(
                    *buffer,
                    allocation.memory(),
                    allocation.offset_in_bytes(),
                )
                .map_err(ResourceError::UnableToBindBufferMemory)?;
            ScopeGuard::into_inner(allocation)
        };
        let property_flags = allocator
            .lock()
            .memory_type_flags(allocation.memory_type_index());

        Ok(Self {
            buffer: ScopeGuard::into_inner(buffer),
            allocation,
            size_in_bytes,
            usage,
            property_flags,
            mapped_range: None,
            staging: None,
            allocator,
        })
    }

    /// Create the buffer in device-local memory with a host-visible staging
    /// buffer of the same size.
    fn new_with_staging(
        allocator: Arc<LockedSubAllocator<D>>,
        usage: vk::BufferUsageFlags,
        size_in_bytes: u64,
        desired_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, ResourceError> {
        log::debug!(
            "No memory type supports {:?} for {:?}, adding a staging buffer",
            desired_flags,
            usage
        );
        let staging = Self::new(
            allocator.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            size_in_bytes,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mut buffer = Self::new(
            allocator,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            size_in_bytes,
            desired_flags & !HOST_FLAGS,
        )?;
        buffer.staging = Some(Box::new(staging));
        Ok(buffer)
    }

    /// Map a range of the buffer's contents for host access.
    ///
    /// Buffers with a staging buffer map the staging memory instead.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the pointer is only valid until `unmap_contents` is called
    ///  - only `size` bytes may be accessed through the pointer
    ///  - the caller must synchronize host access with device access
    pub unsafe fn map_contents(
        &mut self,
        offset: u64,
        size: u64,
    ) -> Result<*mut c_void, ResourceError> {
        if let Some(staging) = self.staging.as_mut() {
            return staging.map_contents(offset, size);
        }
        if !self
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(ResourceError::NotHostVisible);
        }
        if self.mapped_range.is_some() {
            return Err(ResourceError::AlreadyMapped);
        }
        if offset.checked_add(size).map_or(true, |end| end > self.size_in_bytes)
        {
            return Err(ResourceError::OutOfBounds {
                offset,
                size,
                resource_size: self.size_in_bytes,
            });
        }
        let ptr = self.allocator.map(
            &self.allocation,
            offset,
            size,
            vk::MemoryMapFlags::empty(),
        )?;
        self.mapped_range = Some((offset, size));
        Ok(ptr)
    }

    /// Release the mapping made by `map_contents`. Writes are flushed first
    /// when the memory is not host-coherent.
    ///
    /// # Safety
    ///
    /// Unsafe because the pointer returned by `map_contents` must no longer
    /// be used.
    pub unsafe fn unmap_contents(&mut self) -> Result<(), ResourceError> {
        if let Some(staging) = self.staging.as_mut() {
            return staging.unmap_contents();
        }
        let (offset, size) =
            self.mapped_range.ok_or(ResourceError::NotMapped)?;
        if !self
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            self.allocator.flush(&self.allocation, offset, size)?;
        }
        self.allocator.unmap(&self.allocation)?;
        self.mapped_range = None;
        Ok(())
    }

    /// Copy data into the buffer, starting `offset` bytes in.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must ensure the device is not using the
    /// written range.
    pub unsafe fn write_data<T: Copy>(
        &mut self,
        offset: u64,
        data: &[T],
    ) -> Result<(), ResourceError> {
        let size = std::mem::size_of_val(data);
        let ptr = self.map_contents(offset, size as u64)?;
        std::ptr::copy_nonoverlapping(
            data.as_ptr() as *const u8,
            ptr as *mut u8,
            size,
        );
        self.unmap_contents()
    }

    /// Record a copy from the staging buffer into this buffer. Does nothing
    /// when there is no staging buffer.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the application must submit the command buffer and wait for the
    ///    copy to finish before deleting the staging buffer
    ///  - both buffers must live until the copy has executed
    pub unsafe fn upload_to_vram(&self, command_buffer: vk::CommandBuffer) {
        let Some(staging) = self.staging.as_ref() else {
            return;
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.size_in_bytes,
        };
        self.allocator.device().cmd_copy_buffer(
            command_buffer,
            staging.raw(),
            self.buffer,
            &[region],
        );
    }

    /// Destroy the staging buffer and release its memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the application must know that any recorded upload has
    /// finished executing on the device.
    pub unsafe fn delete_staging_buffer(&mut self) {
        self.staging = None;
    }

    /// The raw Vulkan buffer handle.
    ///
    /// The handle is owned by this object and is destroyed when it's
    /// dropped.
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    /// The size of the buffer in bytes, including padding.
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// The properties of the memory type the buffer was placed in.
    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }

    pub fn sub_allocation(&self) -> &SubAllocation {
        &self.allocation
    }

    pub fn has_staging_buffer(&self) -> bool {
        self.staging.is_some()
    }

    pub fn staging_buffer(&self) -> Option<&Buffer<D>> {
        self.staging.as_deref()
    }

    /// Set the name which shows up in Vulkan debug logs for this resource.
    pub fn set_debug_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.allocator.device().set_debug_name(
            vk::ObjectType::BUFFER,
            vk::Handle::as_raw(self.buffer),
            &name,
        );
        if let Some(staging) = &self.staging {
            staging.set_debug_name(format!("{} - staging", name));
        }
    }
}

impl<D: ResourceDevice> Drop for Buffer<D> {
    /// # Safety
    ///
    /// The application must ensure no Vulkan Device operations reference this
    /// buffer when it is dropped.
    fn drop(&mut self) {
        unsafe {
            if self.mapped_range.take().is_some() {
                if let Err(err) = self.allocator.unmap(&self.allocation) {
                    log::error!("Unable to unmap the buffer's memory {}", err);
                }
            }
            self.allocator.device().destroy_buffer(self.buffer);
            if let Err(err) = self.allocator.deallocate(&self.allocation) {
                log::error!("Unable to free the buffer's memory {}", err);
            }
        }
    }
}

impl<D: ResourceDevice> std::fmt::Debug for Buffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer", &self.buffer)
            .field("allocation", &self.allocation)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("property_flags", &self.property_flags)
            .field("staging", &self.staging)
            .finish()
    }
}

unsafe fn create_raw_buffer<D: ResourceDevice>(
    device: &D,
    usage: vk::BufferUsageFlags,
    size_in_bytes: u64,
) -> Result<vk::Buffer, ResourceError> {
    let create_info = vk::BufferCreateInfo {
        size: size_in_bytes,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    device.create_buffer(&create_info).map_err(|err| {
        ResourceError::UnableToCreateBuffer(size_in_bytes, usage, err)
    })
}
