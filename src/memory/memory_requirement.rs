use ash::vk;

/// The kind of buffer a linear allocation will back. Each kind has its own
/// driver-mandated minimum offset alignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsageHint {
    BufferTexel,
    BufferUniform,
    BufferStorage,
    BufferOther,
}

impl UsageHint {
    /// Pick the hint for a set of buffer usage flags.
    ///
    /// When several usages are present the precedence is texel, uniform,
    /// storage, then everything else.
    pub fn for_buffer_usage(usage: vk::BufferUsageFlags) -> Self {
        let texel = vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
            | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        if usage.intersects(texel) {
            UsageHint::BufferTexel
        } else if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            UsageHint::BufferUniform
        } else if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            UsageHint::BufferStorage
        } else {
            UsageHint::BufferOther
        }
    }

    /// The driver's minimum offset alignment for this kind of buffer.
    pub fn minimum_alignment(&self, limits: &vk::PhysicalDeviceLimits) -> u64 {
        match self {
            UsageHint::BufferTexel => limits.min_texel_buffer_offset_alignment,
            UsageHint::BufferUniform => {
                limits.min_uniform_buffer_offset_alignment
            }
            UsageHint::BufferStorage => {
                limits.min_storage_buffer_offset_alignment
            }
            UsageHint::BufferOther => 1,
        }
        .max(1)
    }
}

/// Whether an allocation backs linearly addressed data or tile-ordered image
/// data. The two never share a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TilingClass {
    Linear,
    Optimal,
}

impl From<vk::ImageTiling> for TilingClass {
    fn from(tiling: vk::ImageTiling) -> Self {
        if tiling == vk::ImageTiling::OPTIMAL {
            TilingClass::Optimal
        } else {
            TilingClass::Linear
        }
    }
}

/// Everything the sub-allocator needs to know about a resource's memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRequirement {
    pub size: u64,
    pub alignment: u64,
    pub compatible_memory_types: u32,
    pub usage_hint: UsageHint,
    pub tiling_class: TilingClass,
}

impl MemoryRequirement {
    /// Build the requirement for a buffer from the driver's answer.
    ///
    /// The alignment is raised to the largest usage-specific minimum of every
    /// usage bit present, so one buffer can be bound as any of its usages.
    pub fn for_buffer(
        requirements: vk::MemoryRequirements,
        usage: vk::BufferUsageFlags,
        limits: &vk::PhysicalDeviceLimits,
    ) -> Self {
        let usage_alignment = [
            (
                vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                    | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
                UsageHint::BufferTexel,
            ),
            (vk::BufferUsageFlags::UNIFORM_BUFFER, UsageHint::BufferUniform),
            (vk::BufferUsageFlags::STORAGE_BUFFER, UsageHint::BufferStorage),
        ]
        .iter()
        .filter(|(bits, _)| usage.intersects(*bits))
        .map(|(_, hint)| hint.minimum_alignment(limits))
        .max()
        .unwrap_or(1);

        Self {
            size: requirements.size,
            alignment: requirements.alignment.max(usage_alignment),
            compatible_memory_types: requirements.memory_type_bits,
            usage_hint: UsageHint::for_buffer_usage(usage),
            tiling_class: TilingClass::Linear,
        }
    }

    /// Build the requirement for an image from the driver's answer.
    pub fn for_image(
        requirements: vk::MemoryRequirements,
        tiling: vk::ImageTiling,
    ) -> Self {
        Self {
            size: requirements.size,
            alignment: requirements.alignment.max(1),
            compatible_memory_types: requirements.memory_type_bits,
            usage_hint: UsageHint::BufferOther,
            tiling_class: tiling.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn limits() -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            min_texel_buffer_offset_alignment: 16,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            ..Default::default()
        }
    }

    #[test]
    fn usage_hint_precedence() {
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        assert_eq!(UsageHint::for_buffer_usage(usage), UsageHint::BufferTexel);
        assert_eq!(
            UsageHint::for_buffer_usage(vk::BufferUsageFlags::VERTEX_BUFFER),
            UsageHint::BufferOther
        );
    }

    #[test]
    fn buffer_alignment_covers_every_usage() {
        let requirements = vk::MemoryRequirements {
            size: 1024,
            alignment: 4,
            memory_type_bits: 0b11,
        };
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::VERTEX_BUFFER;

        let requirement =
            MemoryRequirement::for_buffer(requirements, usage, &limits());

        assert_eq!(requirement.alignment, 256);
        assert_eq!(requirement.usage_hint, UsageHint::BufferUniform);
        assert_eq!(requirement.tiling_class, TilingClass::Linear);
    }

    #[test]
    fn image_tiling_selects_the_tiling_class() {
        let requirements = vk::MemoryRequirements {
            size: 4096,
            alignment: 1024,
            memory_type_bits: 1,
        };
        let optimal = MemoryRequirement::for_image(
            requirements,
            vk::ImageTiling::OPTIMAL,
        );
        let linear =
            MemoryRequirement::for_image(requirements, vk::ImageTiling::LINEAR);
        assert_eq!(optimal.tiling_class, TilingClass::Optimal);
        assert_eq!(linear.tiling_class, TilingClass::Linear);
    }
}
