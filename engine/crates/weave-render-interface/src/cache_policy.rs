use serde::Deserialize;

/// context 中的各类缓存
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GfxCacheKind {
    TransientImage,
    TransientBuffer,
    DescriptorSet,
    GraphicsPipeline,
    ComputePipeline,
    PipelineLayout,
    DescriptorSetLayout,
    ShaderModule,
    Sampler,
    PipelineBase,
}
impl GfxCacheKind {
    pub const ALL: [GfxCacheKind; 10] = [
        GfxCacheKind::TransientImage,
        GfxCacheKind::TransientBuffer,
        GfxCacheKind::DescriptorSet,
        GfxCacheKind::GraphicsPipeline,
        GfxCacheKind::ComputePipeline,
        GfxCacheKind::PipelineLayout,
        GfxCacheKind::DescriptorSetLayout,
        GfxCacheKind::ShaderModule,
        GfxCacheKind::Sampler,
        GfxCacheKind::PipelineBase,
    ];
}

/// 单个缓存的回收策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GfxCachePolicy {
    /// 在 `frame % period == phase` 的帧回收超过 `max_age` 帧未使用的项
    Periodic { period: u64, phase: u64, max_age: u64 },
    /// 从不回收，只在 context 销毁时释放
    Exempt,
}
impl GfxCachePolicy {
    #[inline]
    pub const fn periodic(period: u64, phase: u64, max_age: u64) -> Self {
        Self::Periodic { period, phase, max_age }
    }

    /// 当前帧是否需要回收
    pub fn is_due(&self, frame: u64) -> bool {
        match *self {
            Self::Periodic { period, phase, .. } => {
                let period = period.max(1);
                frame % period == phase % period
            }
            Self::Exempt => false,
        }
    }

    /// 实际使用的 max_age，至少覆盖所有 in-flight 的帧
    pub fn effective_max_age(&self, frames_in_flight: u64) -> Option<u64> {
        match *self {
            Self::Periodic { max_age, .. } => Some(max_age.max(frames_in_flight)),
            Self::Exempt => None,
        }
    }
}

/// 所有缓存的回收策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GfxCachePolicyTable {
    pub transient_images: GfxCachePolicy,
    pub transient_buffers: GfxCachePolicy,
    pub descriptor_sets: GfxCachePolicy,
    pub graphics_pipelines: GfxCachePolicy,
    pub compute_pipelines: GfxCachePolicy,
    pub pipeline_layouts: GfxCachePolicy,
    pub descriptor_set_layouts: GfxCachePolicy,
    pub shader_modules: GfxCachePolicy,
    pub samplers: GfxCachePolicy,
    pub pipeline_bases: GfxCachePolicy,
}
impl Default for GfxCachePolicyTable {
    fn default() -> Self {
        Self {
            transient_images: GfxCachePolicy::periodic(1, 0, 6),
            transient_buffers: GfxCachePolicy::periodic(1, 0, 6),
            // max_age 会被提升到 frames in flight
            descriptor_sets: GfxCachePolicy::periodic(1, 0, 0),
            graphics_pipelines: GfxCachePolicy::periodic(16, 0, 16),
            compute_pipelines: GfxCachePolicy::periodic(16, 1, 16),
            pipeline_layouts: GfxCachePolicy::periodic(16, 2, 16),
            descriptor_set_layouts: GfxCachePolicy::periodic(16, 3, 16),
            shader_modules: GfxCachePolicy::periodic(16, 4, 16),
            samplers: GfxCachePolicy::Exempt,
            pipeline_bases: GfxCachePolicy::Exempt,
        }
    }
}
impl GfxCachePolicyTable {
    pub fn policy(&self, kind: GfxCacheKind) -> GfxCachePolicy {
        match kind {
            GfxCacheKind::TransientImage => self.transient_images,
            GfxCacheKind::TransientBuffer => self.transient_buffers,
            GfxCacheKind::DescriptorSet => self.descriptor_sets,
            GfxCacheKind::GraphicsPipeline => self.graphics_pipelines,
            GfxCacheKind::ComputePipeline => self.compute_pipelines,
            GfxCacheKind::PipelineLayout => self.pipeline_layouts,
            GfxCacheKind::DescriptorSetLayout => self.descriptor_set_layouts,
            GfxCacheKind::ShaderModule => self.shader_modules,
            GfxCacheKind::Sampler => self.samplers,
            GfxCacheKind::PipelineBase => self.pipeline_bases,
        }
    }

    /// 当前帧需要回收的缓存，以及各自实际使用的 max_age
    pub fn due(&self, frame: u64, frames_in_flight: u64) -> Vec<(GfxCacheKind, u64)> {
        GfxCacheKind::ALL
            .iter()
            .filter_map(|&kind| {
                let policy = self.policy(kind);
                if !policy.is_due(frame) {
                    return None;
                }
                policy.effective_max_age(frames_in_flight).map(|max_age| (kind, max_age))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_age_is_clamped_to_frames_in_flight() {
        let policy = GfxCachePolicy::periodic(1, 0, 1);
        assert_eq!(policy.effective_max_age(3), Some(3));
        assert_eq!(GfxCachePolicy::periodic(1, 0, 6).effective_max_age(3), Some(6));

        let table = GfxCachePolicyTable::default();
        let due = table.due(0, 3);
        assert!(due.contains(&(GfxCacheKind::DescriptorSet, 3)));
        assert!(due.contains(&(GfxCacheKind::TransientImage, 6)));
    }

    #[test]
    fn exempt_caches_are_never_due() {
        let table = GfxCachePolicyTable::default();
        for frame in 0..64 {
            let due = table.due(frame, 3);
            assert!(due.iter().all(|(kind, _)| *kind != GfxCacheKind::Sampler && *kind != GfxCacheKind::PipelineBase));
        }
    }

    #[test]
    fn periodic_caches_take_turns() {
        let table = GfxCachePolicyTable::default();
        let kinds_at = |frame| table.due(frame, 3).into_iter().map(|(kind, _)| kind).collect::<Vec<_>>();

        assert!(kinds_at(16).contains(&GfxCacheKind::GraphicsPipeline));
        assert!(kinds_at(17).contains(&GfxCacheKind::ComputePipeline));
        assert!(kinds_at(20).contains(&GfxCacheKind::ShaderModule));
        assert!(!kinds_at(21).contains(&GfxCacheKind::GraphicsPipeline));
        // 每一帧都会回收 transient
        assert!(kinds_at(21).contains(&GfxCacheKind::TransientBuffer));
    }

    #[test]
    fn zero_period_does_not_panic() {
        let policy = GfxCachePolicy::periodic(0, 0, 4);
        assert!(policy.is_due(7));
    }
}
