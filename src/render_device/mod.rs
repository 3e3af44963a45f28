//! The Vulkan-backed device used by the allocator and resources.

use {
    crate::{memory::MemoryDevice, resources::ResourceDevice},
    ash::{extensions::ext::DebugUtils, vk},
    std::ffi::{c_void, CString},
};

/// A Vulkan logical device and the physical device properties the allocator
/// needs.
///
/// Instance and device creation belong to the application. The render device
/// takes ownership of the logical device and destroys it when dropped, so it
/// is typically shared as `Arc<RenderDevice>` by a `LockedSubAllocator` and
/// every resource created from it.
pub struct RenderDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    physical_device: vk::PhysicalDevice,
    debug_utils: Option<DebugUtils>,
    logical_device: ash::Device,
    instance: ash::Instance,
}

impl RenderDevice {
    /// Wrap a logical device created by the application.
    ///
    /// `debug_utils` is optional. Without it, debug names are ignored.
    ///
    /// # Safety
    ///
    /// Unsafe because:
    ///  - the logical device must have been created from `physical_device`
    ///  - the instance must outlive the render device
    ///  - the render device destroys the logical device when dropped, so the
    ///    application must not destroy it
    pub unsafe fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        logical_device: ash::Device,
        debug_utils: Option<DebugUtils>,
    ) -> Self {
        let memory_properties =
            instance.get_physical_device_memory_properties(physical_device);
        let properties =
            instance.get_physical_device_properties(physical_device);
        log::debug!(
            "Created render device for {:?}",
            std::ffi::CStr::from_ptr(properties.device_name.as_ptr())
        );
        Self {
            memory_properties,
            properties,
            physical_device,
            debug_utils,
            logical_device,
            instance,
        }
    }

    /// The raw ash logical device.
    pub fn logical_device(&self) -> &ash::Device {
        &self.logical_device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }
}

impl MemoryDevice for RenderDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        self.properties.limits
    }

    unsafe fn allocate_memory(
        &self,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        self.logical_device.allocate_memory(allocate_info, None)
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        self.logical_device.free_memory(memory, None)
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        flags: vk::MemoryMapFlags,
    ) -> Result<*mut c_void, vk::Result> {
        self.logical_device
            .map_memory(memory, 0, vk::WHOLE_SIZE, flags)
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.logical_device.unmap_memory(memory)
    }

    unsafe fn flush_mapped_memory_ranges(
        &self,
        ranges: &[vk::MappedMemoryRange],
    ) -> Result<(), vk::Result> {
        self.logical_device.flush_mapped_memory_ranges(ranges)
    }
}

impl ResourceDevice for RenderDevice {
    unsafe fn create_buffer(
        &self,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<vk::Buffer, vk::Result> {
        self.logical_device.create_buffer(create_info, None)
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.logical_device.destroy_buffer(buffer, None)
    }

    unsafe fn get_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        self.logical_device.get_buffer_memory_requirements(buffer)
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        self.logical_device
            .bind_buffer_memory(buffer, memory, offset)
    }

    unsafe fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<vk::Image, vk::Result> {
        self.logical_device.create_image(create_info, None)
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        self.logical_device.destroy_image(image, None)
    }

    unsafe fn get_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        self.logical_device.get_image_memory_requirements(image)
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        self.logical_device.bind_image_memory(image, memory, offset)
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance.get_physical_device_format_properties(
                self.physical_device,
                format,
            )
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.logical_device.cmd_copy_buffer(
            command_buffer,
            src_buffer,
            dst_buffer,
            regions,
        )
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.logical_device.cmd_copy_buffer_to_image(
            command_buffer,
            src_buffer,
            dst_image,
            dst_image_layout,
            regions,
        )
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        image_memory_barriers: &[vk::ImageMemoryBarrier],
    ) {
        self.logical_device.cmd_pipeline_barrier(
            command_buffer,
            src_stage_mask,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            image_memory_barriers,
        )
    }

    unsafe fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        src_image_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        self.logical_device.cmd_blit_image(
            command_buffer,
            src_image,
            src_image_layout,
            dst_image,
            dst_image_layout,
            regions,
            filter,
        )
    }

    /// Give a debug name for a Vulkan object owned by this device. The name
    /// set here will be visible in the Vulkan validation layer logs.
    fn set_debug_name(
        &self,
        object_type: vk::ObjectType,
        raw_handle: u64,
        name: &str,
    ) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let cname = match CString::new(name) {
            Ok(cname) => cname,
            Err(err) => {
                log::warn!("Invalid debug name {:?}: {}", name, err);
                return;
            }
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: raw_handle,
            p_object_name: cname.as_ptr(),
            ..Default::default()
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                self.logical_device.handle(),
                &name_info,
            )
        };
        if let Err(err) = result {
            log::warn!("Unable to name {:?} {}: {}", object_type, name, err);
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical_device.device_wait_idle() {
                log::error!(
                    "Error while idling the device before destruction {}",
                    err
                );
            }
            self.logical_device.destroy_device(None);
        }
    }
}

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("physical_device", &self.physical_device)
            .field("logical_device", &self.logical_device.handle())
            .field("debug_names", &self.debug_utils.is_some())
            .finish()
    }
}
