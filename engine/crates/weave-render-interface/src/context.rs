use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use weave_crate_tools::name::Name;
use weave_gfx::commands::submit_info::{GfxSubmitTicket, latest_per_domain};
use weave_gfx::device::GfxDevice;
use weave_gfx::error::GfxError;
use weave_gfx::pipelines::descriptor::{GfxDescriptorSet, GfxDescriptorSetCreateInfo, GfxDescriptorSetLayoutCreateInfo};
use weave_gfx::pipelines::pipeline::{
    GfxComputePipelineCreateInfo, GfxGraphicsPipelineCreateInfo, GfxPipelineBase, GfxPipelineBaseCreateInfo,
    GfxPipelineLayoutCreateInfo,
};
use weave_gfx::pipelines::shader::GfxShaderModuleCreateInfo;
use weave_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};
use weave_gfx::resources::image::{GfxImage, GfxImageCreateInfo};
use weave_gfx::sampler::GfxSamplerCreateInfo;

use crate::cache::GfxCache;
use crate::cache_policy::GfxCacheKind;
use crate::config::RenderContextConfig;
use crate::error::CacheConstructionError;
use crate::frame_counter::FrameCounter;
use crate::handles::PipelineBaseHandle;

/// transient 资源的 key
///
/// 同样的创建参数在不同的 alias slot 或 frame slot 上对应不同的物理资源。
///
/// `lease` 区分同一帧内多次执行的图：第二张图拿到的是另一份资源。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxTransientKey<I> {
    pub info: I,
    pub alias_slot: u32,
    pub frame_slot: u64,
    pub lease: u32,
}

/// graphics pipeline 的 key
///
/// 同一个 pipeline base 在不同的附件格式下会得到不同的 pipeline。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxGraphicsPipelineKey {
    pub base: PipelineBaseHandle,
    pub layout: vk::PipelineLayout,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

/// 延迟到 GPU 不再使用时才销毁的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxDeferredDestroy {
    Image(GfxImage),
    Buffer(GfxBuffer),
}

/// 绑定 pipeline 所需的句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBoundPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub push_constant_stages: vk::ShaderStageFlags,
}

/// 显式传递的设备上下文
///
/// 持有设备、帧计数、所有的对象缓存和延迟销毁队列。
/// 编译和执行 RenderGraph 时以引用的形式传入，不存在全局状态。
///
/// 除了 `begin_frame` 以外的接口都只需要 `&self`，可以在多个线程上同时使用。
pub struct RenderContext {
    device: Arc<dyn GfxDevice>,
    config: RenderContextConfig,
    frame_counter: FrameCounter,

    transient_images: GfxCache<GfxTransientKey<GfxImageCreateInfo>, GfxImage>,
    transient_buffers: GfxCache<GfxTransientKey<GfxBufferCreateInfo>, GfxBuffer>,
    descriptor_sets: GfxCache<GfxDescriptorSetCreateInfo, GfxDescriptorSet>,
    graphics_pipelines: GfxCache<GfxGraphicsPipelineKey, vk::Pipeline>,
    compute_pipelines: GfxCache<GfxComputePipelineCreateInfo, vk::Pipeline>,
    pipeline_layouts: GfxCache<GfxPipelineLayoutCreateInfo, vk::PipelineLayout>,
    descriptor_set_layouts: GfxCache<GfxDescriptorSetLayoutCreateInfo, vk::DescriptorSetLayout>,
    shader_modules: GfxCache<GfxShaderModuleCreateInfo, vk::ShaderModule>,
    samplers: GfxCache<GfxSamplerCreateInfo, vk::Sampler>,
    pipeline_bases: GfxCache<GfxPipelineBaseCreateInfo, PipelineBaseHandle>,

    /// 当前帧内每个 transient key 已经借出的次数，`begin_frame` 时清空
    image_leases: Mutex<HashMap<GfxTransientKey<GfxImageCreateInfo>, u32>>,
    buffer_leases: Mutex<HashMap<GfxTransientKey<GfxBufferCreateInfo>, u32>>,

    /// pipeline base 的实际存储，cache 中只保存句柄
    pipeline_base_pool: RwLock<SlotMap<PipelineBaseHandle, GfxPipelineBase>>,
    named_pipelines: RwLock<HashMap<Name, PipelineBaseHandle>>,

    /// (frame_id, ticket)
    submissions: Mutex<Vec<(u64, GfxSubmitTicket)>>,
    /// (frame_id, resource)
    pending_destroy: Mutex<Vec<(u64, GfxDeferredDestroy)>>,

    destroyed: bool,
}
// new & init
impl RenderContext {
    pub fn new(device: Arc<dyn GfxDevice>, config: RenderContextConfig) -> Self {
        let frame_counter = FrameCounter::new(0, config.frames_in_flight);
        log::info!(
            "create render context: frames in flight = {}, dump plan = {}",
            frame_counter.fif_count(),
            config.dump_plan
        );
        Self {
            device,
            config,
            frame_counter,

            transient_images: GfxCache::new(),
            transient_buffers: GfxCache::new(),
            descriptor_sets: GfxCache::new(),
            graphics_pipelines: GfxCache::new(),
            compute_pipelines: GfxCache::new(),
            pipeline_layouts: GfxCache::new(),
            descriptor_set_layouts: GfxCache::new(),
            shader_modules: GfxCache::new(),
            samplers: GfxCache::new(),
            pipeline_bases: GfxCache::new(),

            image_leases: Mutex::new(HashMap::new()),
            buffer_leases: Mutex::new(HashMap::new()),

            pipeline_base_pool: RwLock::new(SlotMap::with_key()),
            named_pipelines: RwLock::new(HashMap::new()),

            submissions: Mutex::new(Vec::new()),
            pending_destroy: Mutex::new(Vec::new()),

            destroyed: false,
        }
    }
}
// destroy
impl RenderContext {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }

    /// 等待所有提交完成，然后释放所有缓存和延迟销毁的资源
    pub fn destroy_mut(&mut self) {
        if self.destroyed {
            return;
        }
        let _span = weave_crate_tools::profile_span!("RenderContext::destroy");

        let tickets = self.submissions.lock().drain(..).map(|(_, ticket)| ticket).collect_vec();
        if let Err(e) = self.device.wait(&latest_per_domain(&tickets)) {
            log::error!("failed to wait for outstanding submissions: {}", e);
        }

        for (_, item) in self.pending_destroy.lock().drain(..) {
            self.destroy_deferred(item);
        }

        let device = self.device.clone();
        let mut released = 0;
        released += self.descriptor_sets.drain(|set| device.destroy_descriptor_set(set));
        released += self.graphics_pipelines.drain(|pipeline| device.destroy_pipeline(pipeline));
        released += self.compute_pipelines.drain(|pipeline| device.destroy_pipeline(pipeline));
        released += self.pipeline_bases.drain(|_| ());
        self.pipeline_base_pool.write().clear();
        self.named_pipelines.write().clear();
        released += self.pipeline_layouts.drain(|layout| device.destroy_pipeline_layout(layout));
        released += self.descriptor_set_layouts.drain(|layout| device.destroy_descriptor_set_layout(layout));
        released += self.shader_modules.drain(|module| device.destroy_shader_module(module));
        released += self.samplers.drain(|sampler| device.destroy_sampler(sampler));
        released += self.transient_images.drain(|image| device.destroy_image(image));
        released += self.transient_buffers.drain(|buffer| device.destroy_buffer(buffer));
        log::info!("render context destroyed, {} cached objects released", released);

        self.destroyed = true;
    }
}
impl Drop for RenderContext {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("render context dropped without destroy()");
            self.destroy_mut();
        }
    }
}
// getters
impl RenderContext {
    #[inline]
    pub fn device(&self) -> &Arc<dyn GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &RenderContextConfig {
        &self.config
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }

    #[inline]
    pub fn frame_slot(&self) -> u64 {
        self.frame_counter.frame_slot()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> u64 {
        self.frame_counter.fif_count()
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        self.frame_counter.frame_name()
    }

    /// 某类缓存中的对象数量
    pub fn cache_len(&self, kind: GfxCacheKind) -> usize {
        match kind {
            GfxCacheKind::TransientImage => self.transient_images.len(),
            GfxCacheKind::TransientBuffer => self.transient_buffers.len(),
            GfxCacheKind::DescriptorSet => self.descriptor_sets.len(),
            GfxCacheKind::GraphicsPipeline => self.graphics_pipelines.len(),
            GfxCacheKind::ComputePipeline => self.compute_pipelines.len(),
            GfxCacheKind::PipelineLayout => self.pipeline_layouts.len(),
            GfxCacheKind::DescriptorSetLayout => self.descriptor_set_layouts.len(),
            GfxCacheKind::ShaderModule => self.shader_modules.len(),
            GfxCacheKind::Sampler => self.samplers.len(),
            GfxCacheKind::PipelineBase => self.pipeline_bases.len(),
        }
    }

    /// 还在等待销毁的资源数量
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.lock().len()
    }
}
// frame
impl RenderContext {
    /// 进入下一帧
    ///
    /// 1. 帧号加一
    /// 2. 等待与当前帧共用 frame slot 的那一帧（F - N）的提交完成，不会等待更近的帧
    /// 3. 销毁已经不再被 GPU 使用的延迟销毁资源
    /// 4. 按策略回收缓存
    pub fn begin_frame(&mut self) -> Result<(), GfxError> {
        let _span = weave_crate_tools::profile_span!("RenderContext::begin_frame");
        self.frame_counter.next_frame();
        let frame_id = self.frame_counter.frame_id();

        if let Some(retiring) = self.frame_counter.retiring_frame() {
            let tickets = {
                let mut submissions = self.submissions.lock();
                let retired = submissions.iter().filter(|(frame, _)| *frame <= retiring).map(|(_, t)| *t).collect_vec();
                submissions.retain(|(frame, _)| *frame > retiring);
                retired
            };
            if !tickets.is_empty() {
                self.device.wait(&latest_per_domain(&tickets))?;
            }
        }

        self.image_leases.lock().clear();
        self.buffer_leases.lock().clear();
        self.retire_deferred(frame_id);
        self.collect(frame_id);
        Ok(())
    }

    /// 记录当前帧的一次提交，`begin_frame` 会在 N 帧之后等待它
    pub fn record_submission(&self, ticket: GfxSubmitTicket) {
        self.submissions.lock().push((self.frame_id(), ticket));
    }

    /// 当前帧提交的所有 ticket
    pub fn frame_submissions(&self, frame_id: u64) -> Vec<GfxSubmitTicket> {
        self.submissions.lock().iter().filter(|(frame, _)| *frame == frame_id).map(|(_, t)| *t).collect()
    }

    /// 资源会在 N 帧之后销毁
    pub fn defer_destroy(&self, item: GfxDeferredDestroy) {
        self.pending_destroy.lock().push((self.frame_id(), item));
    }

    fn retire_deferred(&self, current_frame_id: u64) {
        let fif = self.frame_counter.fif_count();
        let mut retired = Vec::new();
        self.pending_destroy.lock().retain(|(frame_index, item)| {
            if *frame_index + fif <= current_frame_id {
                retired.push(*item);
                false
            } else {
                true
            }
        });
        for item in retired {
            self.destroy_deferred(item);
        }
    }

    fn destroy_deferred(&self, item: GfxDeferredDestroy) {
        match item {
            GfxDeferredDestroy::Image(image) => self.device.destroy_image(image),
            GfxDeferredDestroy::Buffer(buffer) => self.device.destroy_buffer(buffer),
        }
    }

    /// 按照各个缓存的策略回收 `frame` 时已经过期的对象
    ///
    /// 实际的 max_age 不会小于 frames in flight，因此不会回收仍可能被 GPU 使用的对象。
    pub fn collect(&self, frame: u64) {
        let _span = weave_crate_tools::profile_span!("RenderContext::collect");
        let device = self.device.clone();
        for (kind, max_age) in self.config.cache_policies.due(frame, self.frames_in_flight()) {
            let evicted = match kind {
                GfxCacheKind::TransientImage => {
                    self.transient_images.collect(frame, max_age, |image| device.destroy_image(image))
                }
                GfxCacheKind::TransientBuffer => {
                    self.transient_buffers.collect(frame, max_age, |buffer| device.destroy_buffer(buffer))
                }
                GfxCacheKind::DescriptorSet => {
                    self.descriptor_sets.collect(frame, max_age, |set| device.destroy_descriptor_set(set))
                }
                GfxCacheKind::GraphicsPipeline => {
                    self.graphics_pipelines.collect(frame, max_age, |pipeline| device.destroy_pipeline(pipeline))
                }
                GfxCacheKind::ComputePipeline => {
                    self.compute_pipelines.collect(frame, max_age, |pipeline| device.destroy_pipeline(pipeline))
                }
                GfxCacheKind::PipelineLayout => {
                    self.pipeline_layouts.collect(frame, max_age, |layout| device.destroy_pipeline_layout(layout))
                }
                GfxCacheKind::DescriptorSetLayout => self
                    .descriptor_set_layouts
                    .collect(frame, max_age, |layout| device.destroy_descriptor_set_layout(layout)),
                GfxCacheKind::ShaderModule => {
                    self.shader_modules.collect(frame, max_age, |module| device.destroy_shader_module(module))
                }
                GfxCacheKind::Sampler => {
                    self.samplers.collect(frame, max_age, |sampler| device.destroy_sampler(sampler))
                }
                GfxCacheKind::PipelineBase => self.pipeline_bases.collect(frame, max_age, |handle| {
                    self.pipeline_base_pool.write().remove(handle);
                    self.named_pipelines.write().retain(|_, named| *named != handle);
                }),
            };
            if evicted > 0 {
                log::debug!("[F{}] collect {:?}: {} evicted (max age {})", frame, kind, evicted, max_age);
            }
        }
    }
}
// resources
impl RenderContext {
    /// 从缓存中获取 transient image
    ///
    /// 每个 frame slot 有自己的一份，不会与仍在 GPU 上执行的帧冲突。
    /// 同一帧内对同一个 (info, alias_slot) 的每次调用都会拿到不同的资源。
    pub fn acquire_transient_image(
        &self,
        info: &GfxImageCreateInfo,
        alias_slot: u32,
        debug_name: &str,
    ) -> Result<GfxImage, CacheConstructionError> {
        let key = Self::lease(
            &self.image_leases,
            GfxTransientKey {
                info: *info,
                alias_slot,
                frame_slot: self.frame_slot(),
                lease: 0,
            },
        );
        self.transient_images
            .get_or_create(&key, self.frame_id(), |key| self.device.create_image(&key.info, debug_name))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::TransientImage, e))
    }

    pub fn acquire_transient_buffer(
        &self,
        info: &GfxBufferCreateInfo,
        alias_slot: u32,
        debug_name: &str,
    ) -> Result<GfxBuffer, CacheConstructionError> {
        let key = Self::lease(
            &self.buffer_leases,
            GfxTransientKey {
                info: *info,
                alias_slot,
                frame_slot: self.frame_slot(),
                lease: 0,
            },
        );
        self.transient_buffers
            .get_or_create(&key, self.frame_id(), |key| self.device.create_buffer(&key.info, debug_name))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::TransientBuffer, e))
    }

    fn lease<I: Copy + Eq + std::hash::Hash>(
        leases: &Mutex<HashMap<GfxTransientKey<I>, u32>>,
        key: GfxTransientKey<I>,
    ) -> GfxTransientKey<I> {
        let mut leases = leases.lock();
        let count = leases.entry(key).or_insert(0);
        let leased = GfxTransientKey { lease: *count, ..key };
        *count += 1;
        leased
    }

    /// 不经过缓存、需要在图执行结束后继续存活的 image，由调用者负责交给 `defer_destroy`
    pub fn create_dedicated_image(&self, info: &GfxImageCreateInfo, debug_name: &str) -> Result<GfxImage, GfxError> {
        self.device.create_image(info, debug_name)
    }

    pub fn create_dedicated_buffer(&self, info: &GfxBufferCreateInfo, debug_name: &str) -> Result<GfxBuffer, GfxError> {
        self.device.create_buffer(info, debug_name)
    }

    pub fn acquire_sampler(&self, info: &GfxSamplerCreateInfo) -> Result<vk::Sampler, CacheConstructionError> {
        self.samplers
            .get_or_create(info, self.frame_id(), |info| self.device.create_sampler(info))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::Sampler, e))
    }

    pub fn acquire_descriptor_set(
        &self,
        info: &GfxDescriptorSetCreateInfo,
    ) -> Result<GfxDescriptorSet, CacheConstructionError> {
        self.descriptor_sets
            .get_or_create(info, self.frame_id(), |info| self.device.create_descriptor_set(info))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::DescriptorSet, e))
    }
}
// pipelines
impl RenderContext {
    pub fn acquire_shader_module(
        &self,
        info: &GfxShaderModuleCreateInfo,
    ) -> Result<vk::ShaderModule, CacheConstructionError> {
        self.shader_modules
            .get_or_create(info, self.frame_id(), |info| self.device.create_shader_module(info))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::ShaderModule, e))
    }

    pub fn acquire_descriptor_set_layout(
        &self,
        info: &GfxDescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout, CacheConstructionError> {
        self.descriptor_set_layouts
            .get_or_create(info, self.frame_id(), |info| self.device.create_descriptor_set_layout(info))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::DescriptorSetLayout, e))
    }

    pub fn acquire_pipeline_layout(
        &self,
        info: &GfxPipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout, CacheConstructionError> {
        self.pipeline_layouts
            .get_or_create(info, self.frame_id(), |info| self.device.create_pipeline_layout(info))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::PipelineLayout, e))
    }

    /// 解析 pipeline base 依赖的 layout 和 shader module
    ///
    /// 每次都经过缓存，被回收过的对象会重新创建。
    fn build_pipeline_base(&self, info: &GfxPipelineBaseCreateInfo) -> Result<GfxPipelineBase, CacheConstructionError> {
        let set_layouts = info
            .set_layouts
            .iter()
            .map(|layout| self.acquire_descriptor_set_layout(layout))
            .collect::<Result<Vec<_>, _>>()?;
        let layout = self.acquire_pipeline_layout(&GfxPipelineLayoutCreateInfo {
            set_layouts: set_layouts.clone(),
            push_constant_ranges: info.push_constant_ranges.clone(),
        })?;
        let modules = info
            .stages
            .iter()
            .map(|stage| self.acquire_shader_module(&stage.module))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GfxPipelineBase {
            create_info: info.clone(),
            set_layouts,
            layout,
            modules,
        })
    }

    /// 同样的描述只会得到同一个句柄
    pub fn acquire_pipeline_base(
        &self,
        info: &GfxPipelineBaseCreateInfo,
    ) -> Result<PipelineBaseHandle, CacheConstructionError> {
        self.pipeline_bases.get_or_create(info, self.frame_id(), |info| {
            let base = self.build_pipeline_base(info)?;
            Ok(self.pipeline_base_pool.write().insert(base))
        })
    }

    /// 查询 pipeline base，并刷新它依赖的对象
    pub fn pipeline_base(&self, handle: PipelineBaseHandle) -> Result<GfxPipelineBase, CacheConstructionError> {
        let create_info = self
            .pipeline_base_pool
            .read()
            .get(handle)
            .map(|base| base.create_info.clone())
            .ok_or_else(|| {
                CacheConstructionError::new(
                    GfxCacheKind::PipelineBase,
                    GfxError::Unsupported(format!("unknown pipeline base {:?}", handle)),
                )
            })?;
        let base = self.build_pipeline_base(&create_info)?;
        if let Some(stored) = self.pipeline_base_pool.write().get_mut(handle) {
            if *stored != base {
                *stored = base.clone();
            }
        }
        Ok(base)
    }

    /// 注册一个具名的 pipeline，之后可以在 pass 中按名字绑定
    pub fn create_named_pipeline(
        &self,
        name: impl Into<Name>,
        info: &GfxPipelineBaseCreateInfo,
    ) -> Result<PipelineBaseHandle, CacheConstructionError> {
        let name = name.into();
        let handle = self.acquire_pipeline_base(info)?;
        if let Some(previous) = self.named_pipelines.write().insert(name, handle) {
            if previous != handle {
                log::debug!("named pipeline {} replaced", name);
            }
        }
        Ok(handle)
    }

    pub fn get_named_pipeline(&self, name: impl Into<Name>) -> Option<PipelineBaseHandle> {
        self.named_pipelines.read().get(&name.into()).copied()
    }

    /// base 在指定附件格式下的 graphics pipeline
    pub fn acquire_graphics_pipeline(
        &self,
        handle: PipelineBaseHandle,
        color_formats: &[vk::Format],
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<GfxBoundPipeline, CacheConstructionError> {
        let base = self.pipeline_base(handle)?;
        let key = GfxGraphicsPipelineKey {
            base: handle,
            layout: base.layout,
            color_formats: color_formats.to_vec(),
            depth_format,
            samples,
        };
        let pipeline = self
            .graphics_pipelines
            .get_or_create(&key, self.frame_id(), |key| {
                self.device.create_graphics_pipeline(&GfxGraphicsPipelineCreateInfo {
                    base: &base,
                    color_formats: &key.color_formats,
                    depth_format: key.depth_format,
                    samples: key.samples,
                })
            })
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::GraphicsPipeline, e))?;
        Ok(GfxBoundPipeline {
            pipeline,
            layout: base.layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            push_constant_stages: base.create_info.push_constant_stages(),
        })
    }

    pub fn acquire_compute_pipeline(
        &self,
        handle: PipelineBaseHandle,
    ) -> Result<GfxBoundPipeline, CacheConstructionError> {
        let base = self.pipeline_base(handle)?;
        let compute = base.create_info.is_compute();
        let (stage, module) = match (compute, base.create_info.stages.first(), base.modules.first()) {
            (true, Some(stage), Some(module)) => (stage, *module),
            _ => {
                return Err(CacheConstructionError::new(
                    GfxCacheKind::ComputePipeline,
                    GfxError::Unsupported("pipeline base is not a compute pipeline".to_string()),
                ));
            }
        };
        let key = GfxComputePipelineCreateInfo {
            module,
            entry_point: stage.entry_point.clone(),
            layout: base.layout,
        };
        let pipeline = self
            .compute_pipelines
            .get_or_create(&key, self.frame_id(), |key| self.device.create_compute_pipeline(key))
            .map_err(|e| CacheConstructionError::new(GfxCacheKind::ComputePipeline, e))?;
        Ok(GfxBoundPipeline {
            pipeline,
            layout: base.layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            push_constant_stages: base.create_info.push_constant_stages(),
        })
    }
}

#[cfg(test)]
mod tests {
    use weave_gfx::commands::encoder::GfxCommandEncoder;
    use weave_gfx::pipelines::pipeline::GfxPushConstantRange;
    use weave_gfx::pipelines::shader::GfxShaderStage;
    use weave_gfx::queue::QueueDomain;

    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessObjectKind};

    fn context() -> (Arc<HeadlessDevice>, RenderContext) {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = RenderContext::new(device.clone(), RenderContextConfig::default());
        (device, ctx)
    }

    fn image_info() -> GfxImageCreateInfo {
        GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D {
                width: 256,
                height: 256,
            },
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
    }

    fn compute_base() -> GfxPipelineBaseCreateInfo {
        GfxPipelineBaseCreateInfo::new()
            .stage(GfxShaderStage::new(
                vk::ShaderStageFlags::COMPUTE,
                GfxShaderModuleCreateInfo::new(vec![0x0723_0203u32, 1, 2], "tonemap.comp"),
            ))
            .push_constant_range(GfxPushConstantRange {
                stages: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: 8,
            })
    }

    #[test]
    fn transients_are_per_frame_slot() {
        let (device, mut ctx) = context();
        let a = ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap();
        // 同一帧的第二次借用拿到另一份
        let b = ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap();
        assert_ne!(a.handle(), b.handle());

        ctx.begin_frame().unwrap();
        let c = ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap();
        assert_ne!(a.handle(), c.handle());
        assert_eq!(device.construction_count(HeadlessObjectKind::Image), 3);

        // 回到同一个 frame slot 时复用
        ctx.begin_frame().unwrap();
        ctx.begin_frame().unwrap();
        let d = ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap();
        assert_eq!(a, d);
        assert_eq!(device.construction_count(HeadlessObjectKind::Image), 3);
        ctx.destroy();
        assert_eq!(device.live_count(HeadlessObjectKind::Image), 0);
    }

    #[test]
    fn construction_errors_name_the_cache() {
        let (device, ctx) = context();
        device.fail_next(HeadlessObjectKind::Image, "out of device memory");
        let err = ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap_err();
        assert_eq!(err.cache, GfxCacheKind::TransientImage);
        assert_eq!(err.source, GfxError::Injected("out of device memory"));

        // 下一次调用重新构造
        assert!(ctx.acquire_transient_image(&image_info(), 0, "hdr").is_ok());
    }

    #[test]
    fn unused_transients_are_collected_after_max_age() {
        let (device, mut ctx) = context();
        ctx.acquire_transient_image(&image_info(), 0, "hdr").unwrap();
        for _ in 0..6 {
            ctx.begin_frame().unwrap();
        }
        assert_eq!(ctx.cache_len(GfxCacheKind::TransientImage), 1);
        ctx.begin_frame().unwrap();
        assert_eq!(ctx.cache_len(GfxCacheKind::TransientImage), 0);
        assert_eq!(device.destruction_count(HeadlessObjectKind::Image), 1);
    }

    #[test]
    fn deferred_destroy_waits_for_frames_in_flight() {
        let (device, mut ctx) = context();
        let image = ctx.create_dedicated_image(&image_info(), "export").unwrap();
        ctx.defer_destroy(GfxDeferredDestroy::Image(image));

        ctx.begin_frame().unwrap();
        ctx.begin_frame().unwrap();
        assert_eq!(ctx.pending_destroy_count(), 1);
        ctx.begin_frame().unwrap();
        assert_eq!(ctx.pending_destroy_count(), 0);
        assert_eq!(device.destruction_count(HeadlessObjectKind::Image), 1);
    }

    #[test]
    fn begin_frame_waits_only_on_retiring_frame() {
        let (device, mut ctx) = context();
        let encoder = device.begin_encoder(QueueDomain::Graphics, "frame 0").unwrap();
        let ticket = device.submit(encoder.finish().unwrap(), &[]).unwrap();
        ctx.record_submission(ticket);

        ctx.begin_frame().unwrap();
        ctx.begin_frame().unwrap();
        assert_eq!(ctx.frame_submissions(0), vec![ticket]);
        ctx.begin_frame().unwrap();
        assert!(ctx.frame_submissions(0).is_empty());
    }

    #[test]
    fn named_pipelines_share_bases() {
        let (device, ctx) = context();
        let handle = ctx.create_named_pipeline("tonemap", &compute_base()).unwrap();
        assert_eq!(ctx.get_named_pipeline("tonemap"), Some(handle));
        assert_eq!(ctx.acquire_pipeline_base(&compute_base()).unwrap(), handle);
        assert_eq!(ctx.get_named_pipeline("missing"), None);

        let first = ctx.acquire_compute_pipeline(handle).unwrap();
        let second = ctx.acquire_compute_pipeline(handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.push_constant_stages, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(device.construction_count(HeadlessObjectKind::ComputePipeline), 1);
        assert_eq!(device.construction_count(HeadlessObjectKind::ShaderModule), 1);
        assert_eq!(device.construction_count(HeadlessObjectKind::PipelineLayout), 1);
    }

    #[test]
    fn graphics_pipelines_are_keyed_by_formats() {
        let (device, ctx) = context();
        let module = GfxShaderModuleCreateInfo::new(vec![0x0723_0203u32], "fullscreen");
        let base = GfxPipelineBaseCreateInfo::new()
            .stage(GfxShaderStage::new(vk::ShaderStageFlags::VERTEX, module.clone()))
            .stage(GfxShaderStage::new(vk::ShaderStageFlags::FRAGMENT, module));
        let handle = ctx.acquire_pipeline_base(&base).unwrap();

        let rgba8 = ctx
            .acquire_graphics_pipeline(
                handle,
                &[vk::Format::R8G8B8A8_UNORM],
                vk::Format::UNDEFINED,
                vk::SampleCountFlags::TYPE_1,
            )
            .unwrap();
        let hdr = ctx
            .acquire_graphics_pipeline(
                handle,
                &[vk::Format::R16G16B16A16_SFLOAT],
                vk::Format::UNDEFINED,
                vk::SampleCountFlags::TYPE_1,
            )
            .unwrap();
        assert_ne!(rgba8.pipeline, hdr.pipeline);
        assert!(ctx.acquire_compute_pipeline(handle).is_err());
        assert_eq!(device.construction_count(HeadlessObjectKind::GraphicsPipeline), 2);
        // 同样的 shader 内容只创建一个 module
        assert_eq!(device.construction_count(HeadlessObjectKind::ShaderModule), 1);
    }

    #[test]
    fn samplers_survive_collection() {
        let (_device, mut ctx) = context();
        ctx.acquire_sampler(&GfxSamplerCreateInfo::nearest_clamp()).unwrap();
        for _ in 0..40 {
            ctx.begin_frame().unwrap();
        }
        assert_eq!(ctx.cache_len(GfxCacheKind::Sampler), 1);
    }
}
