use {crate::memory::MemoryDevice, ash::vk};

/// The native resource and command recording operations used by buffers and
/// images.
///
/// Command methods only record into the provided command buffer. Submission
/// and completion tracking belong to the application.
pub trait ResourceDevice: MemoryDevice {
    /// # Safety
    ///
    /// The caller must destroy the buffer before the device is destroyed.
    unsafe fn create_buffer(
        &self,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<vk::Buffer, vk::Result>;

    /// # Safety
    ///
    /// The caller must ensure no device operations still use the buffer.
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);

    /// # Safety
    ///
    /// The buffer must be a live buffer created by this device.
    unsafe fn get_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements;

    /// # Safety
    ///
    /// The memory must outlive the buffer's use and the offset must satisfy
    /// the buffer's memory requirements.
    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result>;

    /// # Safety
    ///
    /// The caller must destroy the image before the device is destroyed.
    unsafe fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<vk::Image, vk::Result>;

    /// # Safety
    ///
    /// The caller must ensure no device operations still use the image.
    unsafe fn destroy_image(&self, image: vk::Image);

    /// # Safety
    ///
    /// The image must be a live image created by this device.
    unsafe fn get_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements;

    /// # Safety
    ///
    /// The memory must outlive the image's use and the offset must satisfy
    /// the image's memory requirements.
    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result>;

    /// The features supported by a format on this device.
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    /// # Safety
    ///
    /// Both buffers must live until the command has finished executing.
    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    /// # Safety
    ///
    /// The buffer and image must live until the command has finished
    /// executing and the image must be in `dst_image_layout`.
    unsafe fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    /// # Safety
    ///
    /// Every image referenced by the barriers must live until the command has
    /// finished executing.
    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        image_memory_barriers: &[vk::ImageMemoryBarrier],
    );

    /// # Safety
    ///
    /// Both images must live until the command has finished executing and be
    /// in the provided layouts.
    #[allow(clippy::too_many_arguments)]
    unsafe fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        src_image_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    /// Give a debug name to a Vulkan object. The name shows up in validation
    /// layer logs. Devices without debug utils ignore the name.
    fn set_debug_name(
        &self,
        _object_type: vk::ObjectType,
        _raw_handle: u64,
        _name: &str,
    ) {
    }
}
