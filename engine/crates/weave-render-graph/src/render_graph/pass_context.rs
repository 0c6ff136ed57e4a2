//! Pass 录制命令的入口
//!
//! pass 只能通过自己声明过的名字访问资源，layout 由声明的访问决定。
//! 所有方法都可以链式调用：第一个错误会被记录下来，之后的调用不再录制命令，
//! pass 结束后由执行器把错误返回给调用者。

use std::collections::BTreeMap;

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::commands::encoder::{GfxCommandEncoder, GfxShaderBindingTable};
use weave_gfx::commands::rendering_info::GfxRenderingInfo;
use weave_gfx::pipelines::descriptor::{GfxDescriptorSetCreateInfo, GfxDescriptorWrite};
use weave_gfx::pipelines::pipeline::GfxPipelineBase;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::buffer::GfxBuffer;
use weave_gfx::resources::image::{GfxClearValue, GfxImage};
use weave_gfx::sampler::GfxSamplerCreateInfo;
use weave_render_interface::context::{GfxBoundPipeline, RenderContext};
use weave_render_interface::handles::PipelineBaseHandle;

use super::error::{RgCompileError, RgError};
use super::resolve::RgResolvedUse;
use super::resource::RgPhysicalResource;

/// 按名字或句柄引用 pipeline base
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgPipelineRef {
    /// 通过 `RenderContext::create_named_pipeline` 注册的名字
    Named(Name),
    Handle(PipelineBaseHandle),
}
impl From<&str> for RgPipelineRef {
    fn from(value: &str) -> Self {
        Self::Named(Name::new(value))
    }
}
impl From<Name> for RgPipelineRef {
    fn from(value: Name) -> Self {
        Self::Named(value)
    }
}
impl From<PipelineBaseHandle> for RgPipelineRef {
    fn from(value: PipelineBaseHandle) -> Self {
        Self::Handle(value)
    }
}

/// 传给 `RgPassExecutor::execute` 的上下文
pub struct RgPassContext<'a> {
    context: &'a RenderContext,
    cmd: &'a mut dyn GfxCommandEncoder,
    pass_name: Name,
    domain: QueueDomain,
    uses: &'a [RgResolvedUse],
    resources: &'a [Option<RgPhysicalResource>],
    /// pass 位于 rendering scope 内时才有
    rendering: Option<&'a GfxRenderingInfo>,

    bound: Option<(GfxBoundPipeline, GfxPipelineBase)>,
    /// set -> [(binding, write)]，在下一次 draw / dispatch 之前绑定
    pending_sets: BTreeMap<u32, Vec<(u32, GfxDescriptorWrite)>>,
    error: Option<RgError>,
}
// new & init
impl<'a> RgPassContext<'a> {
    pub(crate) fn new(
        context: &'a RenderContext,
        cmd: &'a mut dyn GfxCommandEncoder,
        pass_name: Name,
        uses: &'a [RgResolvedUse],
        resources: &'a [Option<RgPhysicalResource>],
        rendering: Option<&'a GfxRenderingInfo>,
    ) -> Self {
        let domain = cmd.domain();
        Self {
            context,
            cmd,
            pass_name,
            domain,
            uses,
            resources,
            rendering,
            bound: None,
            pending_sets: BTreeMap::new(),
            error: None,
        }
    }

    /// 返回录制过程中的第一个错误
    pub(crate) fn finish(self) -> Result<(), RgError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
// getters
impl<'a> RgPassContext<'a> {
    #[inline]
    pub fn name(&self) -> Name {
        self.pass_name
    }

    #[inline]
    pub fn domain(&self) -> QueueDomain {
        self.domain
    }

    #[inline]
    pub fn context(&self) -> &RenderContext {
        self.context
    }

    /// 直接访问命令编码器，用于上下文没有封装的命令
    #[inline]
    pub fn cmd(&mut self) -> &mut dyn GfxCommandEncoder {
        &mut *self.cmd
    }

    #[inline]
    pub fn rendering_info(&self) -> Option<&GfxRenderingInfo> {
        self.rendering
    }

    /// rendering scope 的尺寸
    #[inline]
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.rendering.map(|info| info.extent)
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn get_image(&self, name: impl Into<Name>) -> Option<GfxImage> {
        self.lookup(name.into()).ok().and_then(|(_, resource)| resource.image())
    }

    pub fn get_buffer(&self, name: impl Into<Name>) -> Option<GfxBuffer> {
        self.lookup(name.into()).ok().and_then(|(_, resource)| resource.buffer())
    }

    pub fn get_image_extent(&self, name: impl Into<Name>) -> Option<vk::Extent3D> {
        self.get_image(name).map(|image| image.extent())
    }

    /// pass 访问该 image 时所处的 layout
    pub fn layout(&self, name: impl Into<Name>) -> Option<vk::ImageLayout> {
        self.lookup(name.into()).ok().map(|(u, _)| u.access.image_layout())
    }
}
// tools
impl<'a> RgPassContext<'a> {
    fn lookup(&self, name: Name) -> Result<(&RgResolvedUse, RgPhysicalResource), RgError> {
        let base = name.base();
        let u = self.uses.iter().find(|u| u.declared == base).ok_or_else(|| {
            RgCompileError::unresolved(name, format!("pass \"{}\" did not declare it", self.pass_name))
        })?;
        let resource = self
            .resources
            .get(u.resource)
            .copied()
            .flatten()
            .ok_or_else(|| RgCompileError::unresolved(name, "no physical resource was created for it"))?;
        Ok((u, resource))
    }

    fn lookup_image(&self, name: Name) -> Result<(vk::ImageLayout, GfxImage), RgError> {
        let (u, resource) = self.lookup(name)?;
        let image = resource
            .image()
            .ok_or_else(|| {
                RgCompileError::conflicting(name, format!("pass \"{}\" uses a buffer as an image", self.pass_name))
            })?;
        Ok((u.access.image_layout(), image))
    }

    fn lookup_buffer(&self, name: Name) -> Result<GfxBuffer, RgError> {
        let (_, resource) = self.lookup(name)?;
        resource.buffer().ok_or_else(|| {
            RgCompileError::conflicting(name, format!("pass \"{}\" uses an image as a buffer", self.pass_name)).into()
        })
    }

    fn rendering(&self, what: &str) -> Result<&'a GfxRenderingInfo, RgError> {
        self.rendering.ok_or_else(|| {
            RgCompileError::conflicting(self.pass_name, format!("{} outside of a rendering scope", what)).into()
        })
    }

    fn bound(&self, what: &str) -> Result<&(GfxBoundPipeline, GfxPipelineBase), RgError> {
        self.bound
            .as_ref()
            .ok_or_else(|| {
                RgCompileError::conflicting(self.pass_name, format!("{} without a bound pipeline", what)).into()
            })
    }

    fn pipeline_handle(&self, pipeline: RgPipelineRef) -> Result<PipelineBaseHandle, RgError> {
        match pipeline {
            RgPipelineRef::Handle(handle) => Ok(handle),
            RgPipelineRef::Named(name) => self
                .context
                .get_named_pipeline(name)
                .ok_or_else(|| RgCompileError::unresolved(name, "no pipeline is registered under this name").into()),
        }
    }

    /// 执行 `f`，已经出错时跳过
    fn record(&mut self, f: impl FnOnce(&mut Self) -> Result<(), RgError>) -> &mut Self {
        if self.error.is_none() {
            if let Err(e) = f(self) {
                log::error!("pass {}: {}", self.pass_name, e);
                self.error = Some(e);
            }
        }
        self
    }

    fn write_descriptor(&mut self, set: u32, binding: u32, write: GfxDescriptorWrite) {
        let writes = self.pending_sets.entry(set).or_default();
        match writes.iter_mut().find(|(b, _)| *b == binding) {
            Some(existing) => existing.1 = write,
            None => writes.push((binding, write)),
        }
    }

    /// draw / dispatch 之前绑定修改过的 descriptor set
    fn flush_descriptor_sets(&mut self) -> Result<(), RgError> {
        if self.pending_sets.is_empty() {
            return Ok(());
        }
        let (bound, base) = self.bound("binding descriptors")?.clone();
        for (set, writes) in std::mem::take(&mut self.pending_sets) {
            let (Some(layout), Some(layout_info)) =
                (base.set_layouts.get(set as usize), base.create_info.set_layouts.get(set as usize))
            else {
                return Err(RgCompileError::conflicting(
                    self.pass_name,
                    format!("the bound pipeline has no descriptor set {}", set),
                )
                .into());
            };
            let info = GfxDescriptorSetCreateInfo::new(*layout, layout_info.clone(), writes);
            let descriptor_set = self.context.acquire_descriptor_set(&info)?;
            self.cmd.bind_descriptor_sets(bound.bind_point, bound.layout, set, &[descriptor_set.set]);
        }
        Ok(())
    }
}
// state
impl<'a> RgPassContext<'a> {
    /// 覆盖整个 rendering scope 的 viewport
    pub fn set_viewport_full(&mut self, index: u32) -> &mut Self {
        self.record(|ctx| {
            let extent = ctx.rendering("set_viewport_full")?.extent;
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            ctx.cmd.set_viewport(index, &[viewport]);
            Ok(())
        })
    }

    pub fn set_viewport(&mut self, index: u32, viewport: vk::Viewport) -> &mut Self {
        self.record(|ctx| {
            ctx.cmd.set_viewport(index, &[viewport]);
            Ok(())
        })
    }

    pub fn set_scissor_full(&mut self, index: u32) -> &mut Self {
        self.record(|ctx| {
            let area = ctx.rendering("set_scissor_full")?.render_area();
            ctx.cmd.set_scissor(index, &[area]);
            Ok(())
        })
    }

    pub fn set_scissor(&mut self, index: u32, scissor: vk::Rect2D) -> &mut Self {
        self.record(|ctx| {
            ctx.cmd.set_scissor(index, &[scissor]);
            Ok(())
        })
    }
}
// pipelines
impl<'a> RgPassContext<'a> {
    /// 以当前 rendering scope 的附件格式实例化并绑定 graphics pipeline
    pub fn bind_graphics_pipeline(&mut self, pipeline: impl Into<RgPipelineRef>) -> &mut Self {
        let pipeline = pipeline.into();
        self.record(|ctx| {
            let rendering = ctx.rendering("bind_graphics_pipeline")?;
            let handle = ctx.pipeline_handle(pipeline)?;
            let base = ctx.context.pipeline_base(handle)?;
            let bound = ctx.context.acquire_graphics_pipeline(
                handle,
                &rendering.color_formats(),
                rendering.depth_format(),
                rendering.samples,
            )?;
            ctx.cmd.bind_pipeline(bound.bind_point, bound.pipeline);
            ctx.bound = Some((bound, base));
            ctx.pending_sets.clear();
            Ok(())
        })
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: impl Into<RgPipelineRef>) -> &mut Self {
        let pipeline = pipeline.into();
        self.record(|ctx| {
            let handle = ctx.pipeline_handle(pipeline)?;
            let base = ctx.context.pipeline_base(handle)?;
            let bound = ctx.context.acquire_compute_pipeline(handle)?;
            ctx.cmd.bind_pipeline(bound.bind_point, bound.pipeline);
            ctx.bound = Some((bound, base));
            ctx.pending_sets.clear();
            Ok(())
        })
    }

    /// 绑定调用者自己创建的 pipeline，`base` 提供 descriptor set layout
    pub fn bind_raw_pipeline(&mut self, bound: GfxBoundPipeline, base: GfxPipelineBase) -> &mut Self {
        self.record(|ctx| {
            ctx.cmd.bind_pipeline(bound.bind_point, bound.pipeline);
            ctx.bound = Some((bound, base));
            ctx.pending_sets.clear();
            Ok(())
        })
    }

    pub fn push_constants<T: bytemuck::Pod>(&mut self, offset: u32, value: &T) -> &mut Self {
        self.record(|ctx| {
            let (bound, _) = ctx.bound("push_constants")?;
            let (layout, stages) = (bound.layout, bound.push_constant_stages);
            ctx.cmd.push_constants(layout, stages, offset, bytemuck::bytes_of(value));
            Ok(())
        })
    }
}
// descriptors
impl<'a> RgPassContext<'a> {
    pub fn bind_sampled_image(
        &mut self,
        set: u32,
        binding: u32,
        name: impl Into<Name>,
        sampler: GfxSamplerCreateInfo,
    ) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let (layout, image) = ctx.lookup_image(name)?;
            let sampler = ctx.context.acquire_sampler(&sampler)?;
            ctx.write_descriptor(
                set,
                binding,
                GfxDescriptorWrite::SampledImage {
                    view: image.view(),
                    layout,
                    sampler,
                },
            );
            Ok(())
        })
    }

    pub fn bind_storage_image(&mut self, set: u32, binding: u32, name: impl Into<Name>) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let (layout, image) = ctx.lookup_image(name)?;
            ctx.write_descriptor(
                set,
                binding,
                GfxDescriptorWrite::StorageImage {
                    view: image.view(),
                    layout,
                },
            );
            Ok(())
        })
    }

    pub fn bind_uniform_buffer(&mut self, set: u32, binding: u32, name: impl Into<Name>) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let buffer = ctx.lookup_buffer(name)?;
            ctx.write_descriptor(
                set,
                binding,
                GfxDescriptorWrite::UniformBuffer {
                    buffer: buffer.vk_buffer(),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            );
            Ok(())
        })
    }

    pub fn bind_storage_buffer(&mut self, set: u32, binding: u32, name: impl Into<Name>) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let buffer = ctx.lookup_buffer(name)?;
            ctx.write_descriptor(
                set,
                binding,
                GfxDescriptorWrite::StorageBuffer {
                    buffer: buffer.vk_buffer(),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            );
            Ok(())
        })
    }

    pub fn bind_acceleration_structure(
        &mut self,
        set: u32,
        binding: u32,
        acceleration_structure: vk::AccelerationStructureKHR,
    ) -> &mut Self {
        self.record(|ctx| {
            ctx.write_descriptor(set, binding, GfxDescriptorWrite::AccelerationStructure(acceleration_structure));
            Ok(())
        })
    }

    pub fn bind_vertex_buffer(&mut self, binding: u32, name: impl Into<Name>, offset: vk::DeviceSize) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let buffer = ctx.lookup_buffer(name)?;
            ctx.cmd.bind_vertex_buffers(binding, &[buffer.vk_buffer()], &[offset]);
            Ok(())
        })
    }

    pub fn bind_index_buffer(
        &mut self,
        name: impl Into<Name>,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let buffer = ctx.lookup_buffer(name)?;
            ctx.cmd.bind_index_buffer(buffer.vk_buffer(), offset, index_type);
            Ok(())
        })
    }
}
// draw & dispatch
impl<'a> RgPassContext<'a> {
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &mut Self {
        self.record(|ctx| {
            ctx.rendering("draw")?;
            ctx.flush_descriptor_sets()?;
            ctx.cmd.draw(vertex_count, instance_count, first_vertex, first_instance);
            Ok(())
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> &mut Self {
        self.record(|ctx| {
            ctx.rendering("draw_indexed")?;
            ctx.flush_descriptor_sets()?;
            ctx.cmd.draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
            Ok(())
        })
    }

    pub fn dispatch(&mut self, group_count: glam::UVec3) -> &mut Self {
        self.record(|ctx| {
            ctx.flush_descriptor_sets()?;
            ctx.cmd.dispatch(group_count);
            Ok(())
        })
    }

    pub fn trace_rays(&mut self, sbt: &GfxShaderBindingTable, extent: glam::UVec3) -> &mut Self {
        self.record(|ctx| {
            ctx.flush_descriptor_sets()?;
            ctx.cmd.trace_rays(sbt, extent);
            Ok(())
        })
    }

    /// 按调用总数 dispatch，group 数向上取整
    pub fn dispatch_invocations(&mut self, invocations: glam::UVec3, local_size: glam::UVec3) -> &mut Self {
        let local_size = local_size.max(glam::UVec3::ONE);
        let group_count = (invocations + local_size - glam::UVec3::ONE) / local_size;
        self.dispatch(group_count)
    }
}
// transfer
impl<'a> RgPassContext<'a> {
    /// 清除整个 image，需要以 `TRANSFER_WRITE` 声明
    pub fn clear_image(&mut self, name: impl Into<Name>, value: GfxClearValue) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let (layout, image) = ctx.lookup_image(name)?;
            ctx.cmd.clear_image(image.handle(), layout, &value, image.full_range());
            Ok(())
        })
    }

    pub fn fill_buffer(
        &mut self,
        name: impl Into<Name>,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) -> &mut Self {
        let name = name.into();
        self.record(|ctx| {
            let buffer = ctx.lookup_buffer(name)?;
            ctx.cmd.fill_buffer(buffer.vk_buffer(), offset, size, data);
            Ok(())
        })
    }

    /// `regions` 为空时复制两者中较小的大小
    pub fn copy_buffer(
        &mut self,
        src: impl Into<Name>,
        dst: impl Into<Name>,
        regions: &[vk::BufferCopy],
    ) -> &mut Self {
        let (src, dst) = (src.into(), dst.into());
        self.record(|ctx| {
            let src = ctx.lookup_buffer(src)?;
            let dst = ctx.lookup_buffer(dst)?;
            if regions.is_empty() {
                let whole = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: src.size().min(dst.size()),
                };
                ctx.cmd.copy_buffer(src.vk_buffer(), dst.vk_buffer(), &[whole]);
            } else {
                ctx.cmd.copy_buffer(src.vk_buffer(), dst.vk_buffer(), regions);
            }
            Ok(())
        })
    }

    /// 把 `src` 的 mip 0 缩放到 `dst` 的 mip 0
    pub fn blit_image(&mut self, src: impl Into<Name>, dst: impl Into<Name>, filter: vk::Filter) -> &mut Self {
        let (src, dst) = (src.into(), dst.into());
        self.record(|ctx| {
            let (src_layout, src) = ctx.lookup_image(src)?;
            let (dst_layout, dst) = ctx.lookup_image(dst)?;
            let region = vk::ImageBlit {
                src_subresource: mip0_layers(&src),
                src_offsets: [vk::Offset3D::default(), far_corner(src.extent())],
                dst_subresource: mip0_layers(&dst),
                dst_offsets: [vk::Offset3D::default(), far_corner(dst.extent())],
            };
            ctx.cmd.blit_image(src.handle(), src_layout, dst.handle(), dst_layout, &[region], filter);
            Ok(())
        })
    }
}

// acceleration structure
impl<'a> RgPassContext<'a> {
    pub fn build_acceleration_structures(
        &mut self,
        infos: &[vk::AccelerationStructureBuildGeometryInfoKHR<'_>],
        ranges: &[&[vk::AccelerationStructureBuildRangeInfoKHR]],
    ) -> &mut Self {
        self.record(|ctx| {
            ctx.cmd.build_acceleration_structures(infos, ranges);
            Ok(())
        })
    }
}

fn mip0_layers(image: &GfxImage) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: image.info().aspect(),
        mip_level: 0,
        base_array_layer: 0,
        layer_count: image.info().array_layers,
    }
}

fn far_corner(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}
