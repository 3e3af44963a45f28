//! A simulated Vulkan device for tests.
//!
//! Memory objects are backed by host byte arrays, resources are plain
//! handles, and commands are recorded so tests can inspect them or "execute"
//! buffer copies.

use {
    crate::{memory::MemoryDevice, resources::ResourceDevice},
    ash::vk::{self, Handle},
    std::{
        collections::{HashMap, HashSet},
        ffi::c_void,
        sync::{Mutex, MutexGuard},
    },
};

const MIB: u64 = 1024 * 1024;

/// One recorded image memory barrier, without the Vulkan struct's pointers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct RecordedBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum Command {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: Vec<RecordedBarrier>,
    },
    BlitImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageBlit>,
        filter: vk::Filter,
    },
}

struct MemoryObject {
    size: u64,

    /// Created the first time the memory is touched. The boxed slice never
    /// moves, so mapped pointers stay valid while the object lives.
    bytes: Option<Box<[u8]>>,
}

impl MemoryObject {
    fn bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size as usize;
        self.bytes
            .get_or_insert_with(|| vec![0; size].into_boxed_slice())
    }
}

#[derive(Copy, Clone)]
struct Binding {
    memory: u64,
    offset: u64,
}

struct BufferObject {
    size: u64,
    usage: vk::BufferUsageFlags,
    binding: Option<Binding>,
}

struct ImageObject {
    size: u64,
    tiling: vk::ImageTiling,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    memory: HashMap<u64, MemoryObject>,
    mapped: HashSet<u64>,
    buffers: HashMap<u64, BufferObject>,
    images: HashMap<u64, ImageObject>,
    commands: HashMap<u64, Vec<Command>>,
    map_calls: usize,
    unmap_calls: usize,
    fail_allocations: bool,
    fail_binds: bool,
    flushed_ranges: Vec<(u64, u64)>,
    debug_names: Vec<String>,
}

impl State {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

pub(crate) struct TestDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    buffer_memory_type_bits: Vec<(vk::BufferUsageFlags, u32)>,
    format_features: HashMap<vk::Format, vk::FormatFeatureFlags>,
    state: Mutex<State>,
}

impl TestDevice {
    /// A device with the given memory types, as (flags, heap index) pairs,
    /// and heap sizes.
    pub fn new(
        memory_types: &[(vk::MemoryPropertyFlags, u32)],
        heap_sizes: &[u64],
    ) -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: memory_types.len() as u32,
            memory_heap_count: heap_sizes.len() as u32,
            ..Default::default()
        };
        for (i, (property_flags, heap_index)) in memory_types.iter().enumerate()
        {
            memory_properties.memory_types[i] = vk::MemoryType {
                property_flags: *property_flags,
                heap_index: *heap_index,
            };
        }
        for (i, size) in heap_sizes.iter().enumerate() {
            memory_properties.memory_heaps[i] = vk::MemoryHeap {
                size: *size,
                flags: vk::MemoryHeapFlags::empty(),
            };
        }
        let limits = vk::PhysicalDeviceLimits {
            non_coherent_atom_size: 64,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            min_texel_buffer_offset_alignment: 16,
            ..Default::default()
        };
        Self {
            memory_properties,
            limits,
            buffer_memory_type_bits: vec![],
            format_features: HashMap::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Separate device-local and host-visible heaps. No memory type is both.
    pub fn discrete() -> Self {
        Self::new(
            &[
                (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
                (
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                (
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
            ],
            &[256 * MIB, 256 * MIB],
        )
    }

    /// One heap with a memory type which is device-local and host-visible.
    pub fn unified() -> Self {
        Self::new(
            &[
                (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
                (
                    vk::MemoryPropertyFlags::DEVICE_LOCAL
                        | vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    0,
                ),
            ],
            &[256 * MIB],
        )
    }

    /// Buffers whose usage includes `usage` report `memory_type_bits`.
    pub fn with_buffer_memory_type_bits(
        mut self,
        usage: vk::BufferUsageFlags,
        memory_type_bits: u32,
    ) -> Self {
        self.buffer_memory_type_bits.push((usage, memory_type_bits));
        self
    }

    /// Override the features reported for a format. Formats default to
    /// supporting linear filtering.
    pub fn with_format_features(
        mut self,
        format: vk::Format,
        features: vk::FormatFeatureFlags,
    ) -> Self {
        self.format_features.insert(format, features);
        self
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.state().fail_allocations = fail;
    }

    pub fn fail_binds(&self, fail: bool) {
        self.state().fail_binds = fail;
    }

    pub fn live_memory_count(&self) -> usize {
        self.state().memory.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state().images.len()
    }

    pub fn map_calls(&self) -> usize {
        self.state().map_calls
    }

    pub fn unmap_calls(&self) -> usize {
        self.state().unmap_calls
    }

    pub fn is_mapped(&self, memory: vk::DeviceMemory) -> bool {
        self.state().mapped.contains(&memory.as_raw())
    }

    /// Every flushed range as (offset, size), in call order.
    pub fn flushed_ranges(&self) -> Vec<(u64, u64)> {
        self.state().flushed_ranges.clone()
    }

    pub fn debug_names(&self) -> Vec<String> {
        self.state().debug_names.clone()
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        let mut state = self.state();
        let handle = state.next_handle();
        state.commands.insert(handle, vec![]);
        vk::CommandBuffer::from_raw(handle)
    }

    pub fn commands(&self, command_buffer: vk::CommandBuffer) -> Vec<Command> {
        self.state()
            .commands
            .get(&command_buffer.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Every recorded pipeline barrier as (src stage, dst stage, barriers).
    pub fn recorded_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Vec<(
        vk::PipelineStageFlags,
        vk::PipelineStageFlags,
        Vec<RecordedBarrier>,
    )> {
        self.commands(command_buffer)
            .into_iter()
            .filter_map(|command| match command {
                Command::PipelineBarrier {
                    src_stage,
                    dst_stage,
                    barriers,
                } => Some((src_stage, dst_stage, barriers)),
                _ => None,
            })
            .collect()
    }

    /// Run the recorded buffer copies. Other commands are ignored.
    pub fn execute(&self, command_buffer: vk::CommandBuffer) {
        for command in self.commands(command_buffer) {
            let Command::CopyBuffer { src, dst, regions } = command else {
                continue;
            };
            for region in regions {
                let data = self.read_buffer(
                    src,
                    region.src_offset,
                    region.size as usize,
                );
                self.write_buffer(dst, region.dst_offset, &data);
            }
        }
    }

    /// Read bytes from the memory bound to a buffer.
    pub fn read_buffer(
        &self,
        buffer: vk::Buffer,
        offset: u64,
        len: usize,
    ) -> Vec<u8> {
        let mut state = self.state();
        let binding = bound_memory(&state, buffer);
        let start = (binding.offset + offset) as usize;
        let memory = state
            .memory
            .get_mut(&binding.memory)
            .expect("buffer memory was freed");
        memory.bytes_mut()[start..start + len].to_vec()
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) {
        let mut state = self.state();
        let binding = bound_memory(&state, buffer);
        let start = (binding.offset + offset) as usize;
        let memory = state
            .memory
            .get_mut(&binding.memory)
            .expect("buffer memory was freed");
        memory.bytes_mut()[start..start + data.len()].copy_from_slice(data);
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: Command) {
        self.state()
            .commands
            .entry(command_buffer.as_raw())
            .or_default()
            .push(command);
    }

    fn all_memory_types(&self) -> u32 {
        (1 << self.memory_properties.memory_type_count) - 1
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn bound_memory(state: &State, buffer: vk::Buffer) -> Binding {
    state
        .buffers
        .get(&buffer.as_raw())
        .and_then(|buffer| buffer.binding)
        .expect("buffer has no bound memory")
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

impl MemoryDevice for TestDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        self.limits
    }

    unsafe fn allocate_memory(
        &self,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        let mut state = self.state();
        if state.fail_allocations {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let handle = state.next_handle();
        state.memory.insert(
            handle,
            MemoryObject {
                size: allocate_info.allocation_size,
                bytes: None,
            },
        );
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        assert!(
            !state.mapped.contains(&memory.as_raw()),
            "freed mapped memory"
        );
        assert!(
            state.memory.remove(&memory.as_raw()).is_some(),
            "freed unknown memory"
        );
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        _flags: vk::MemoryMapFlags,
    ) -> Result<*mut c_void, vk::Result> {
        let mut state = self.state();
        assert!(
            state.mapped.insert(memory.as_raw()),
            "memory is already mapped"
        );
        state.map_calls += 1;
        let object = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        Ok(object.bytes_mut().as_mut_ptr() as *mut c_void)
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        assert!(state.mapped.remove(&memory.as_raw()), "memory is not mapped");
        state.unmap_calls += 1;
    }

    unsafe fn flush_mapped_memory_ranges(
        &self,
        ranges: &[vk::MappedMemoryRange],
    ) -> Result<(), vk::Result> {
        let mut state = self.state();
        for range in ranges {
            assert!(state.mapped.contains(&range.memory.as_raw()));
            assert_eq!(range.offset % self.limits.non_coherent_atom_size, 0);
            state.flushed_ranges.push((range.offset, range.size));
        }
        Ok(())
    }
}

impl ResourceDevice for TestDevice {
    unsafe fn create_buffer(
        &self,
        create_info: &vk::BufferCreateInfo,
    ) -> Result<vk::Buffer, vk::Result> {
        let mut state = self.state();
        let handle = state.next_handle();
        state.buffers.insert(
            handle,
            BufferObject {
                size: create_info.size,
                usage: create_info.usage,
                binding: None,
            },
        );
        Ok(vk::Buffer::from_raw(handle))
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        assert!(
            self.state().buffers.remove(&buffer.as_raw()).is_some(),
            "destroyed unknown buffer"
        );
    }

    unsafe fn get_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        let state = self.state();
        let buffer = &state.buffers[&buffer.as_raw()];
        let memory_type_bits = self
            .buffer_memory_type_bits
            .iter()
            .find(|(usage, _)| buffer.usage.contains(*usage))
            .map_or(self.all_memory_types(), |(_, bits)| *bits);
        vk::MemoryRequirements {
            size: align_up(buffer.size, 16),
            alignment: 16,
            memory_type_bits,
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        let mut state = self.state();
        if state.fail_binds {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let buffer = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        assert!(buffer.binding.is_none(), "buffer memory is already bound");
        buffer.binding = Some(Binding {
            memory: memory.as_raw(),
            offset,
        });
        Ok(())
    }

    unsafe fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<vk::Image, vk::Result> {
        let mut state = self.state();
        let handle = state.next_handle();

        // 4 bytes per texel, doubled to leave room for the mip chain
        let extent = create_info.extent;
        let size = 8
            * extent.width as u64
            * extent.height as u64
            * create_info.array_layers as u64;
        state.images.insert(
            handle,
            ImageObject {
                size,
                tiling: create_info.tiling,
            },
        );
        Ok(vk::Image::from_raw(handle))
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        assert!(
            self.state().images.remove(&image.as_raw()).is_some(),
            "destroyed unknown image"
        );
    }

    unsafe fn get_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        let state = self.state();
        let image = &state.images[&image.as_raw()];
        let alignment = if image.tiling == vk::ImageTiling::OPTIMAL {
            4096
        } else {
            16
        };
        vk::MemoryRequirements {
            size: align_up(image.size, alignment),
            alignment,
            memory_type_bits: self.all_memory_types(),
        }
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        let state = self.state();
        if state.fail_binds {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        assert!(state.images.contains_key(&image.as_raw()));
        assert!(state.memory.contains_key(&memory.as_raw()));
        Ok(())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let features = self.format_features.get(&format).copied().unwrap_or(
            vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
        );
        vk::FormatProperties {
            linear_tiling_features: features,
            optimal_tiling_features: features,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record(
            command_buffer,
            Command::CopyBuffer {
                src: src_buffer,
                dst: dst_buffer,
                regions: regions.to_vec(),
            },
        );
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record(
            command_buffer,
            Command::CopyBufferToImage {
                src: src_buffer,
                dst: dst_image,
                layout: dst_image_layout,
                regions: regions.to_vec(),
            },
        );
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        image_memory_barriers: &[vk::ImageMemoryBarrier],
    ) {
        let barriers = image_memory_barriers
            .iter()
            .map(|barrier| RecordedBarrier {
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_access_mask: barrier.src_access_mask,
                dst_access_mask: barrier.dst_access_mask,
                base_mip_level: barrier.subresource_range.base_mip_level,
                level_count: barrier.subresource_range.level_count,
                base_array_layer: barrier.subresource_range.base_array_layer,
                layer_count: barrier.subresource_range.layer_count,
            })
            .collect();
        self.record(
            command_buffer,
            Command::PipelineBarrier {
                src_stage: src_stage_mask,
                dst_stage: dst_stage_mask,
                barriers,
            },
        );
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
        self.record(
            command_buffer,
            Command::BlitImage {
                src: src_image,
                src_layout: src_image_layout,
                dst: dst_image,
                dst_layout: dst_image_layout,
                regions: regions.to_vec(),
                filter,
            },
        );
    }

    fn set_debug_name(
        &self,
        _object_type: vk::ObjectType,
        _raw_handle: u64,
        name: &str,
    ) {
        self.state().debug_names.push(name.to_owned());
    }
}
