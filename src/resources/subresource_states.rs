use {ash::vk, std::ops::Range};

/// The last known way a single (mip level, array layer) of an image was
/// accessed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubresourceState {
    pub layout: vk::ImageLayout,
    pub access_mask: vk::AccessFlags,
    pub stage_mask: vk::PipelineStageFlags,
}

impl SubresourceState {
    /// The state of a freshly created image.
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        access_mask: vk::AccessFlags::empty(),
        stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
    };

    /// Written by a copy or blit.
    pub const TRANSFER_DST: Self = Self {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        access_mask: vk::AccessFlags::TRANSFER_WRITE,
        stage_mask: vk::PipelineStageFlags::TRANSFER,
    };

    /// Read by a copy or blit.
    pub const TRANSFER_SRC: Self = Self {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        access_mask: vk::AccessFlags::TRANSFER_READ,
        stage_mask: vk::PipelineStageFlags::TRANSFER,
    };

    /// Sampled by fragment shaders.
    pub const SHADER_READ: Self = Self {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        access_mask: vk::AccessFlags::SHADER_READ,
        stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
    };

    pub fn new(
        layout: vk::ImageLayout,
        access_mask: vk::AccessFlags,
        stage_mask: vk::PipelineStageFlags,
    ) -> Self {
        Self {
            layout,
            access_mask,
            stage_mask,
        }
    }
}

/// Tracked state for every (mip level, array layer) of an image.
#[derive(Debug, Clone)]
pub struct SubresourceStates {
    mip_levels: u32,
    array_layers: u32,
    states: Vec<SubresourceState>,
}

impl SubresourceStates {
    /// Every subresource starts out undefined.
    pub fn new(mip_levels: u32, array_layers: u32) -> Self {
        Self {
            mip_levels,
            array_layers,
            states: vec![
                SubresourceState::UNDEFINED;
                (mip_levels * array_layers) as usize
            ],
        }
    }

    /// # Panics
    ///
    /// Panics if the level or layer is outside the image.
    pub fn get(&self, mip_level: u32, array_layer: u32) -> SubresourceState {
        self.states[self.index(mip_level, array_layer)]
    }

    pub fn set(
        &mut self,
        mip_level: u32,
        array_layer: u32,
        state: SubresourceState,
    ) {
        let index = self.index(mip_level, array_layer);
        self.states[index] = state;
    }

    /// Clamp a level range to the image.
    pub fn clamp_levels(&self, levels: Range<u32>) -> Range<u32> {
        levels.start.min(self.mip_levels)..levels.end.min(self.mip_levels)
    }

    /// Clamp a layer range to the image.
    pub fn clamp_layers(&self, layers: Range<u32>) -> Range<u32> {
        layers.start.min(self.array_layers)
            ..layers.end.min(self.array_layers)
    }

    fn index(&self, mip_level: u32, array_layer: u32) -> usize {
        assert!(
            mip_level < self.mip_levels && array_layer < self.array_layers,
            "subresource ({}, {}) is outside a {}x{} image",
            mip_level,
            array_layer,
            self.mip_levels,
            self.array_layers
        );
        (mip_level * self.array_layers + array_layer) as usize
    }
}
