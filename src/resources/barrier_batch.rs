use {
    crate::resources::{ResourceDevice, SubresourceState},
    ash::vk,
};

/// One queued image layout transition.
#[derive(Debug, Copy, Clone)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_state: SubresourceState,
    pub new_state: SubresourceState,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// A batch of image memory barriers to record together.
///
/// Nothing is applied when barriers are added. `record` writes every queued
/// barrier as a single pipeline barrier command and empties the batch.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    image_barriers: Vec<ImageBarrier>,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transition. Transitions between identical states are
    /// skipped.
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        old_state: SubresourceState,
        new_state: SubresourceState,
        subresource_range: vk::ImageSubresourceRange,
    ) {
        if old_state == new_state {
            return;
        }
        self.src_stage_mask |= old_state.stage_mask;
        self.dst_stage_mask |= new_state.stage_mask;
        self.image_barriers.push(ImageBarrier {
            image,
            old_state,
            new_state,
            subresource_range,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.image_barriers.len()
    }

    pub fn barriers(&self) -> &[ImageBarrier] {
        &self.image_barriers
    }

    /// Record every queued barrier into the command buffer and clear the
    /// batch. Does nothing if the batch is empty.
    ///
    /// # Safety
    ///
    /// Unsafe because every image in the batch must live until the command
    /// buffer has finished executing.
    pub unsafe fn record<D: ResourceDevice>(
        &mut self,
        device: &D,
        command_buffer: vk::CommandBuffer,
    ) {
        if self.is_empty() {
            return;
        }
        let barriers: Vec<vk::ImageMemoryBarrier> = self
            .image_barriers
            .iter()
            .map(|barrier| vk::ImageMemoryBarrier {
                src_access_mask: barrier.old_state.access_mask,
                dst_access_mask: barrier.new_state.access_mask,
                old_layout: barrier.old_state.layout,
                new_layout: barrier.new_state.layout,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image: barrier.image,
                subresource_range: barrier.subresource_range,
                ..Default::default()
            })
            .collect();
        device.cmd_pipeline_barrier(
            command_buffer,
            self.src_stage_mask,
            self.dst_stage_mask,
            &barriers,
        );
        self.clear();
    }

    pub fn clear(&mut self) {
        self.image_barriers.clear();
        self.src_stage_mask = vk::PipelineStageFlags::empty();
        self.dst_stage_mask = vk::PipelineStageFlags::empty();
    }
}
