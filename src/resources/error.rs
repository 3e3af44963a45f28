use {crate::memory::AllocatorError, ash::vk, thiserror::Error};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    AllocatorError(#[from] AllocatorError),

    #[error(
        "Unable to create a new device buffer for {} bytes with usage {:?}",
        .0,
        .1
    )]
    UnableToCreateBuffer(u64, vk::BufferUsageFlags, #[source] vk::Result),

    #[error("Unable to bind device memory to buffer")]
    UnableToBindBufferMemory(#[source] vk::Result),

    #[error("Unable to create a {:?} image with extent {:?}", .0, .1)]
    UnableToCreateImage(vk::Format, vk::Extent3D, #[source] vk::Result),

    #[error("Unable to bind device memory to image")]
    UnableToBindImageMemory(#[source] vk::Result),

    #[error("The resource is not host visible and has no staging buffer")]
    NotHostVisible,

    #[error("The resource's memory is not mapped")]
    NotMapped,

    #[error("The resource's memory is already mapped")]
    AlreadyMapped,

    #[error("The texel size of {:?} is unknown, it cannot be staged", .0)]
    UnsupportedFormat(vk::Format),

    #[error("An image extent of {}x{} is too large", .0, .1)]
    ExtentTooLarge(u32, u32),

    #[error(
        "{} bytes at offset {} do not fit in the {} byte resource",
        .size,
        .offset,
        .resource_size
    )]
    OutOfBounds {
        offset: u64,
        size: u64,
        resource_size: u64,
    },
}
