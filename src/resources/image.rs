use {
    crate::{
        memory::{LockedSubAllocator, MemoryRequirement, SubAllocation},
        resources::{
            buffer::{HOST_FLAGS, SHARED_FLAGS},
            texel_size_in_bytes, BarrierBatch, Buffer, ResourceDevice,
            ResourceError, SubresourceState, SubresourceStates,
        },
    },
    ash::vk,
    scopeguard::ScopeGuard,
    std::{ffi::c_void, ops::Range, sync::Arc},
};

/// Everything needed to create a 2D image.
#[derive(Debug, Copy, Clone)]
pub struct ImageDescription {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,

    /// The number of mip levels. 0 means the full chain down to 1x1.
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
    pub aspect_mask: vk::ImageAspectFlags,
}

impl ImageDescription {
    /// A sampled color texture with a full mip chain which can be uploaded
    /// and have its mipmaps generated.
    pub fn texture_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            mip_levels: 0,
            array_layers: 1,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            tiling: vk::ImageTiling::OPTIMAL,
            aspect_mask: vk::ImageAspectFlags::COLOR,
        }
    }

    /// The number of mip levels the image will have.
    pub fn mip_level_count(&self) -> u32 {
        let largest = self.width.max(self.height).max(1);
        let full_chain = u32::BITS - largest.leading_zeros();
        if self.mip_levels == 0 {
            full_chain
        } else {
            self.mip_levels.min(full_chain)
        }
    }

    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }

    /// The size of the tightly packed base level for every array layer.
    pub fn staging_size_in_bytes(&self) -> Result<u64, ResourceError> {
        let texel_size = texel_size_in_bytes(self.format)
            .ok_or(ResourceError::UnsupportedFormat(self.format))?;
        [
            self.width as u64,
            self.height as u64,
            self.array_layers.max(1) as u64,
        ]
        .into_iter()
        .try_fold(texel_size, u64::checked_mul)
        .ok_or(ResourceError::ExtentTooLarge(self.width, self.height))
    }

    /// The far corner of the base level, as used by blit offsets.
    fn blit_corner(&self) -> Result<(i32, i32), ResourceError> {
        let too_large =
            |_| ResourceError::ExtentTooLarge(self.width, self.height);
        Ok((
            i32::try_from(self.width).map_err(too_large)?,
            i32::try_from(self.height).map_err(too_large)?,
        ))
    }
}

/// A Vulkan image bound to a range of sub-allocated memory.
///
/// The image tracks the layout and access of every (mip level, array layer)
/// so transitions are only queued when something actually changes. Like
/// `Buffer`, an image which asks for shared memory the device can't provide
/// gets a staging buffer which `upload_to_vram` copies from.
pub struct Image<D: ResourceDevice> {
    image: vk::Image,
    allocation: SubAllocation,
    description: ImageDescription,
    property_flags: vk::MemoryPropertyFlags,
    mapped_range: Option<(u64, u64)>,
    subresource_states: SubresourceStates,
    staging: Option<Buffer<D>>,
    allocator: Arc<LockedSubAllocator<D>>,
}

impl<D: ResourceDevice> Image<D> {
    pub fn new(
        allocator: Arc<LockedSubAllocator<D>>,
        description: &ImageDescription,
        desired_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, ResourceError> {
        let device = allocator.device().clone();
        let description = ImageDescription {
            mip_levels: description.mip_level_count(),
            array_layers: description.array_layers.max(1),
            ..*description
        };

        let image = scopeguard::guard(
            unsafe { create_raw_image(&*device, &description)? },
            |image| unsafe { device.destroy_image(image) },
        );
        let requirement = MemoryRequirement::for_image(
            unsafe { device.get_image_memory_requirements(*image) },
            description.tiling,
        );

        if desired_flags.contains(SHARED_FLAGS)
            && allocator
                .get_memory_type_for_flags(
                    requirement.compatible_memory_types,
                    desired_flags,
                )
                .is_none()
        {
            drop(image);
            return Self::new_with_staging(
                allocator,
                &description,
                desired_flags,
            );
        }

        let allocation = unsafe {
            let allocation = scopeguard::guard(
                allocator.allocate(&requirement, desired_flags)?,
                |allocation| {
                    if let Err(err) = allocator.deallocate(&allocation) {
                        log::error!("Unable to release image memory {}", err);
                    }
                },
            );
            device
                .bind_image_memory(
                    *image,
                    allocation.memory(),
                    allocation.offset_in_bytes(),
                )
                .map_err(ResourceError::UnableToBindImageMemory)?;
            ScopeGuard::into_inner(allocation)
        };
        let property_flags = allocator
            .lock()
            .memory_type_flags(allocation.memory_type_index());

        Ok(Self {
            image: ScopeGuard::into_inner(image),
            allocation,
            subresource_states: SubresourceStates::new(
                description.mip_levels,
                description.array_layers,
            ),
            description,
            property_flags,
            mapped_range: None,
            staging: None,
            allocator,
        })
    }

    fn new_with_staging(
        allocator: Arc<LockedSubAllocator<D>>,
        description: &ImageDescription,
        desired_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, ResourceError> {
        log::debug!(
            "No memory type supports {:?} for a {:?} image, adding staging",
            desired_flags,
            description.format
        );
        let staging = Buffer::new(
            allocator.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            description.staging_size_in_bytes()?,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let description = ImageDescription {
            usage: description.usage | vk::ImageUsageFlags::TRANSFER_DST,
            ..*description
        };
        let mut image =
            Self::new(allocator, &description, desired_flags & !HOST_FLAGS)?;
        image.staging = Some(staging);
        Ok(image)
    }

    /// Map a range of the image's memory for host access.
    ///
    /// Images with a staging buffer map the staging buffer, which holds
    /// tightly packed texels for the base level of every layer.
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
        let resource_size = self.allocation.size_in_bytes();
        if offset.checked_add(size).map_or(true, |end| end > resource_size) {
            return Err(ResourceError::OutOfBounds {
                offset,
                size,
                resource_size,
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

    /// Copy texel data into the image's host-visible memory.
    ///
    /// # Safety
    ///
    /// Unsafe because the caller must ensure the device is not using the
    /// written memory.
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

    /// Record the copy of every layer of the base level from the staging
    /// buffer. The base level is left in `TRANSFER_DST_OPTIMAL`. Does
    /// nothing when there is no staging buffer.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the application must submit the command buffer and wait for the
    ///    copy to finish before deleting the staging buffer
    ///  - the image and staging buffer must live until the copy has executed
    pub unsafe fn upload_to_vram(&mut self, command_buffer: vk::CommandBuffer) {
        let Some(staging_buffer) = self.staging.as_ref().map(Buffer::raw)
        else {
            return;
        };
        let device = self.allocator.device().clone();
        let array_layers = self.description.array_layers;

        let mut barriers = BarrierBatch::new();
        self.transition(
            &mut barriers,
            0..1,
            0..array_layers,
            SubresourceState::TRANSFER_DST,
        );
        barriers.record(&*device, command_buffer);

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: self.subresource_layers(0),
            image_offset: vk::Offset3D::default(),
            image_extent: self.description.extent(),
        };
        device.cmd_copy_buffer_to_image(
            command_buffer,
            staging_buffer,
            self.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    /// Record blits which fill every mip level from the one above it.
    ///
    /// Afterwards the last level is in `TRANSFER_DST_OPTIMAL` and every other
    /// level is in `TRANSFER_SRC_OPTIMAL`.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the base level must hold the image data when the command executes
    ///  - the image must live until the command buffer has executed
    pub unsafe fn generate_mipmaps(
        &mut self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), ResourceError> {
        let mip_levels = self.description.mip_levels;
        if mip_levels < 2 {
            return Ok(());
        }
        let (mut width, mut height) = self.description.blit_corner()?;
        let device = self.allocator.device().clone();
        let array_layers = self.description.array_layers;
        let filter = self.blit_filter();

        let mut barriers = BarrierBatch::new();
        for level in 1..mip_levels {
            self.transition(
                &mut barriers,
                level - 1..level,
                0..array_layers,
                SubresourceState::TRANSFER_SRC,
            );
            self.transition(
                &mut barriers,
                level..level + 1,
                0..array_layers,
                SubresourceState::TRANSFER_DST,
            );
            barriers.record(&*device, command_buffer);

            let next_width = (width / 2).max(1);
            let next_height = (height / 2).max(1);
            let blit = vk::ImageBlit {
                src_subresource: self.subresource_layers(level - 1),
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: width,
                        y: height,
                        z: 1,
                    },
                ],
                dst_subresource: self.subresource_layers(level),
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ],
            };
            device.cmd_blit_image(
                command_buffer,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                filter,
            );
            width = next_width;
            height = next_height;
        }
        Ok(())
    }

    /// Queue barriers which move the selected subresources to a new state.
    ///
    /// Subresources already in the new state are skipped, and neighbouring
    /// layers which share a state are covered by a single barrier. Ranges
    /// are clamped to the image. Tracked state is updated immediately, so
    /// the batch must be recorded before any command which relies on it.
    pub fn transition(
        &mut self,
        barriers: &mut BarrierBatch,
        mip_levels: Range<u32>,
        array_layers: Range<u32>,
        new_state: SubresourceState,
    ) {
        let mip_levels = self.subresource_states.clamp_levels(mip_levels);
        let array_layers = self.subresource_states.clamp_layers(array_layers);
        for level in mip_levels {
            let mut layer = array_layers.start;
            while layer < array_layers.end {
                let old_state = self.subresource_states.get(level, layer);
                let mut run_end = layer + 1;
                while run_end < array_layers.end
                    && self.subresource_states.get(level, run_end)
                        == old_state
                {
                    run_end += 1;
                }

                barriers.add_image_barrier(
                    self.image,
                    old_state,
                    new_state,
                    vk::ImageSubresourceRange {
                        aspect_mask: self.description.aspect_mask,
                        base_mip_level: level,
                        level_count: 1,
                        base_array_layer: layer,
                        layer_count: run_end - layer,
                    },
                );
                for updated in layer..run_end {
                    self.subresource_states.set(level, updated, new_state);
                }
                layer = run_end;
            }
        }
    }

    /// Queue barriers which move every subresource to a new state.
    pub fn transition_all(
        &mut self,
        barriers: &mut BarrierBatch,
        new_state: SubresourceState,
    ) {
        self.transition(barriers, 0..u32::MAX, 0..u32::MAX, new_state);
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

    /// The raw Vulkan image handle.
    ///
    /// The handle is owned by this object and is destroyed when it's
    /// dropped.
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    /// The description the image was created with, with the mip level count
    /// resolved and any usage added for staging.
    pub fn description(&self) -> &ImageDescription {
        &self.description
    }

    pub fn format(&self) -> vk::Format {
        self.description.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.description.extent()
    }

    pub fn mip_levels(&self) -> u32 {
        self.description.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.description.array_layers
    }

    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }

    pub fn sub_allocation(&self) -> &SubAllocation {
        &self.allocation
    }

    /// The last state recorded for a subresource.
    pub fn subresource_state(
        &self,
        mip_level: u32,
        array_layer: u32,
    ) -> SubresourceState {
        self.subresource_states.get(mip_level, array_layer)
    }

    pub fn has_staging_buffer(&self) -> bool {
        self.staging.is_some()
    }

    pub fn staging_buffer(&self) -> Option<&Buffer<D>> {
        self.staging.as_ref()
    }

    pub fn set_debug_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.allocator.device().set_debug_name(
            vk::ObjectType::IMAGE,
            vk::Handle::as_raw(self.image),
            &name,
        );
        if let Some(staging) = &self.staging {
            staging.set_debug_name(format!("{} - staging", name));
        }
    }

    fn subresource_layers(&self, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.description.aspect_mask,
            mip_level,
            base_array_layer: 0,
            layer_count: self.description.array_layers,
        }
    }

    /// Linear filtering when the format supports it with this tiling.
    fn blit_filter(&self) -> vk::Filter {
        let properties = self
            .allocator
            .device()
            .format_properties(self.description.format);
        let features = if self.description.tiling == vk::ImageTiling::LINEAR
        {
            properties.linear_tiling_features
        } else {
            properties.optimal_tiling_features
        };
        let linear = vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        if features.contains(linear) {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        }
    }
}

impl<D: ResourceDevice> Drop for Image<D> {
    /// # Safety
    ///
    /// The application must ensure no Vulkan Device operations reference this
    /// image when it is dropped.
    fn drop(&mut self) {
        unsafe {
            if self.mapped_range.take().is_some() {
                if let Err(err) = self.allocator.unmap(&self.allocation) {
                    log::error!("Unable to unmap the image's memory {}", err);
                }
            }
            self.allocator.device().destroy_image(self.image);
            if let Err(err) = self.allocator.deallocate(&self.allocation) {
                log::error!("Unable to free the image's memory {}", err);
            }
        }
    }
}

impl<D: ResourceDevice> std::fmt::Debug for Image<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("image", &self.image)
            .field("allocation", &self.allocation)
            .field("description", &self.description)
            .field("property_flags", &self.property_flags)
            .field("staging", &self.staging)
            .finish()
    }
}

unsafe fn create_raw_image<D: ResourceDevice>(
    device: &D,
    description: &ImageDescription,
) -> Result<vk::Image, ResourceError> {
    let create_info = vk::ImageCreateInfo {
        image_type: vk::ImageType::TYPE_2D,
        format: description.format,
        extent: description.extent(),
        mip_levels: description.mip_levels,
        array_layers: description.array_layers,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: description.tiling,
        usage: description.usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    device.create_image(&create_info).map_err(|err| {
        ResourceError::UnableToCreateImage(
            description.format,
            description.extent(),
            err,
        )
    })
}
