use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}
impl GfxDescriptorSetLayoutBinding {
    #[inline]
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stages,
        }
    }

    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// descriptor set layout 的创建参数，由调用者提供（不做 shader 反射）
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxDescriptorSetLayoutCreateInfo {
    pub bindings: Vec<GfxDescriptorSetLayoutBinding>,
}
impl GfxDescriptorSetLayoutCreateInfo {
    pub fn new(bindings: impl Into<Vec<GfxDescriptorSetLayoutBinding>>) -> Self {
        Self {
            bindings: bindings.into(),
        }
    }

    pub fn binding(&self, binding: u32) -> Option<&GfxDescriptorSetLayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// 创建一个只容纳一个 set 的 pool 需要的 pool sizes
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += binding.count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: binding.count,
                }),
            }
        }
        sizes
    }
}

/// 写入 descriptor 的具体资源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorWrite {
    SampledImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    AccelerationStructure(vk::AccelerationStructureKHR),
}
impl GfxDescriptorWrite {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::SampledImage { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            Self::AccelerationStructure(_) => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// descriptor set 的内容，作为 descriptor set cache 的 key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorSetCreateInfo {
    pub layout: vk::DescriptorSetLayout,
    pub layout_info: GfxDescriptorSetLayoutCreateInfo,
    /// 按 binding 排序
    pub writes: Vec<(u32, GfxDescriptorWrite)>,
}
impl GfxDescriptorSetCreateInfo {
    pub fn new(
        layout: vk::DescriptorSetLayout,
        layout_info: GfxDescriptorSetLayoutCreateInfo,
        mut writes: Vec<(u32, GfxDescriptorWrite)>,
    ) -> Self {
        writes.sort_by_key(|(binding, _)| *binding);
        Self {
            layout,
            layout_info,
            writes,
        }
    }
}

/// 已分配的 descriptor set，每个 set 独占一个 pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorSet {
    pub set: vk::DescriptorSet,
    pub pool: vk::DescriptorPool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_types() {
        let info = GfxDescriptorSetLayoutCreateInfo::new(vec![
            GfxDescriptorSetLayoutBinding::new(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE),
            GfxDescriptorSetLayoutBinding::new(1, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::COMPUTE),
            GfxDescriptorSetLayoutBinding::new(2, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE),
        ]);
        let sizes = info.pool_sizes();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert!(info.binding(1).is_some() && info.binding(3).is_none());
    }

    #[test]
    fn writes_are_sorted_by_binding() {
        let storage = GfxDescriptorWrite::StorageImage {
            view: vk::ImageView::null(),
            layout: vk::ImageLayout::GENERAL,
        };
        let uniform = GfxDescriptorWrite::UniformBuffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let a = GfxDescriptorSetCreateInfo::new(
            vk::DescriptorSetLayout::null(),
            Default::default(),
            vec![(1, uniform), (0, storage)],
        );
        let b = GfxDescriptorSetCreateInfo::new(
            vk::DescriptorSetLayout::null(),
            Default::default(),
            vec![(0, storage), (1, uniform)],
        );
        assert_eq!(a, b);
    }
}
