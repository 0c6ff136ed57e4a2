use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::ash_backend::AshDeviceFns;
use crate::ash_backend::encoder::AshCommandEncoder;
use crate::commands::encoder::{GfxCommandEncoder, GfxCommandList};
use crate::commands::submit_info::{GfxSubmitTicket, latest_per_domain};
use crate::error::{GfxError, GfxResult};
use crate::pipelines::descriptor::{
    GfxDescriptorSet, GfxDescriptorSetCreateInfo, GfxDescriptorSetLayoutCreateInfo, GfxDescriptorWrite,
};
use crate::pipelines::pipeline::{
    GfxComputePipelineCreateInfo, GfxGraphicsPipelineCreateInfo, GfxPipelineLayoutCreateInfo,
};
use crate::pipelines::shader::GfxShaderModuleCreateInfo;
use crate::queue::QueueDomain;
use crate::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};
use crate::resources::image::{GfxImage, GfxImageCreateInfo};
use crate::sampler::GfxSamplerCreateInfo;
use crate::device::GfxDevice;

/// 调用者提供的队列
#[derive(Clone, Copy, Debug)]
pub struct AshQueueInfo {
    pub family_index: u32,
    pub queue: vk::Queue,
}

/// 每个 domain 一条 timeline semaphore，以及回收中的 command pool
struct AshQueueSlot {
    info: AshQueueInfo,
    timeline: vk::Semaphore,
    last_signaled: AtomicU64,
    free_pools: Mutex<Vec<vk::CommandPool>>,
    /// (signal value, pool)
    in_flight_pools: Mutex<Vec<(u64, vk::CommandPool)>>,
}

pub struct AshDevice {
    fns: Arc<AshDeviceFns>,
    allocator: vk_mem::Allocator,

    /// 按 `QueueDomain::index()` 排列
    queues: Vec<AshQueueSlot>,
    /// 多个 domain 可能共用一个 vk::Queue，提交统一加锁
    submit_lock: Mutex<()>,

    image_allocations: Mutex<HashMap<vk::Image, vk_mem::Allocation>>,
    buffer_allocations: Mutex<HashMap<vk::Buffer, vk_mem::Allocation>>,
}
// new & init
impl AshDevice {
    /// `queues` 按 graphics / compute / transfer 的顺序给出
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queues: [AshQueueInfo; 3],
    ) -> GfxResult<Self> {
        let _span = weave_crate_tools::profile_span!("AshDevice::new");

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        let fns = Arc::new(AshDeviceFns {
            dynamic_rendering: ash::khr::dynamic_rendering::Device::new(instance, &device),
            acceleration_structure: ash::khr::acceleration_structure::Device::new(instance, &device),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device::new(instance, &device),
            debug_utils: ash::ext::debug_utils::Device::new(instance, &device),
            device,
        });

        let mut slots = Vec::with_capacity(queues.len());
        for (domain, info) in QueueDomain::ALL.iter().zip(queues) {
            let mut type_info =
                vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE).initial_value(0);
            let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
            let timeline = unsafe { fns.device.create_semaphore(&semaphore_info, None)? };
            log::info!("queue domain {} -> family {}", domain, info.family_index);
            slots.push(AshQueueSlot {
                info,
                timeline,
                last_signaled: AtomicU64::new(0),
                free_pools: Mutex::new(Vec::new()),
                in_flight_pools: Mutex::new(Vec::new()),
            });
        }

        Ok(Self {
            fns,
            allocator,
            queues: slots,
            submit_lock: Mutex::new(()),
            image_allocations: Mutex::new(HashMap::new()),
            buffer_allocations: Mutex::new(HashMap::new()),
        })
    }
}
// tools
impl AshDevice {
    #[inline]
    fn slot(&self, domain: QueueDomain) -> &AshQueueSlot {
        &self.queues[domain.index()]
    }

    #[inline]
    pub fn vk_device(&self) -> &ash::Device {
        &self.fns.device
    }

    fn set_debug_name(&self, handle: impl vk::Handle, name: &str) {
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(&name);
        if let Err(e) = unsafe { self.fns.debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("set debug name failed: {:?}", e);
        }
    }

    fn completed_value(&self, domain: QueueDomain) -> GfxResult<u64> {
        Ok(unsafe { self.fns.device.get_semaphore_counter_value(self.slot(domain).timeline)? })
    }

    /// 把已经执行完的 command pool 重置后放回空闲列表
    fn recycle_pools(&self, domain: QueueDomain) -> GfxResult<()> {
        let completed = self.completed_value(domain)?;
        let slot = self.slot(domain);
        let finished = {
            let mut in_flight = slot.in_flight_pools.lock();
            let (finished, pending): (Vec<_>, Vec<_>) =
                in_flight.drain(..).partition(|(value, _)| *value <= completed);
            *in_flight = pending;
            finished
        };
        let mut free_pools = slot.free_pools.lock();
        for (_, pool) in finished {
            unsafe { self.fns.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty())? };
            free_pools.push(pool);
        }
        Ok(())
    }
}
impl GfxDevice for AshDevice {
    #[inline]
    fn queue_family_index(&self, domain: QueueDomain) -> u32 {
        self.slot(domain).info.family_index
    }

    fn create_image(&self, info: &GfxImageCreateInfo, debug_name: &str) -> GfxResult<GfxImage> {
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = unsafe { self.allocator.create_image(&info.as_info(), &alloc_info)? };
        let view = match unsafe { self.fns.device.create_image_view(&info.view_info(image), None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(e.into());
            }
        };
        self.set_debug_name(image, debug_name);
        self.image_allocations.lock().insert(image, allocation);
        Ok(GfxImage::new(image, view, *info))
    }

    fn destroy_image(&self, image: GfxImage) {
        unsafe { self.fns.device.destroy_image_view(image.view(), None) };
        match self.image_allocations.lock().remove(&image.handle()) {
            Some(mut allocation) => unsafe { self.allocator.destroy_image(image.handle(), &mut allocation) },
            None => log::warn!("destroy_image: image {:?} is not owned by this device", image.handle()),
        }
    }

    fn create_buffer(&self, info: &GfxBufferCreateInfo, debug_name: &str) -> GfxResult<GfxBuffer> {
        let allocation_info = info.memory.allocation_info();
        let (buffer, allocation) =
            unsafe { self.allocator.create_buffer_with_alignment(&info.as_info(), &allocation_info, info.alignment)? };
        let device_addr = info.has_device_address().then(|| unsafe {
            self.fns.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });
        self.set_debug_name(buffer, debug_name);
        self.buffer_allocations.lock().insert(buffer, allocation);
        Ok(GfxBuffer::new(buffer, *info, device_addr))
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        match self.buffer_allocations.lock().remove(&buffer.vk_buffer()) {
            Some(mut allocation) => unsafe { self.allocator.destroy_buffer(buffer.vk_buffer(), &mut allocation) },
            None => log::warn!("destroy_buffer: buffer {:?} is not owned by this device", buffer.vk_buffer()),
        }
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        if !buffer.info().memory.is_host_visible() {
            return Err(GfxError::Unsupported("write_buffer on a device local buffer".to_string()));
        }
        if offset + data.len() as vk::DeviceSize > buffer.size() {
            return Err(GfxError::Unsupported(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                buffer.size()
            )));
        }

        let mut allocations = self.buffer_allocations.lock();
        let allocation = allocations
            .get_mut(&buffer.vk_buffer())
            .ok_or_else(|| GfxError::Unsupported("buffer is not owned by this device".to_string()))?;
        unsafe {
            let ptr = self.allocator.map_memory(allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
            self.allocator.flush_allocation(allocation, offset, data.len() as vk::DeviceSize)?;
            self.allocator.unmap_memory(allocation);
        }
        Ok(())
    }

    fn create_sampler(&self, info: &GfxSamplerCreateInfo) -> GfxResult<vk::Sampler> {
        Ok(unsafe { self.fns.device.create_sampler(&info.as_info(), None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.fns.device.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, info: &GfxShaderModuleCreateInfo) -> GfxResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&info.code);
        let module = unsafe { self.fns.device.create_shader_module(&create_info, None)? };
        self.set_debug_name(module, &info.name);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.fns.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &GfxDescriptorSetLayoutCreateInfo,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        let bindings = info.bindings.iter().map(|b| b.to_vk()).collect_vec();
        Ok(unsafe {
            self.fns
                .device
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), None)?
        })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.fns.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(&self, info: &GfxPipelineLayoutCreateInfo) -> GfxResult<vk::PipelineLayout> {
        let ranges = info.push_constant_ranges.iter().map(|r| r.to_vk()).collect_vec();
        let create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&info.set_layouts).push_constant_ranges(&ranges);
        Ok(unsafe { self.fns.device.create_pipeline_layout(&create_info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.fns.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, info: &GfxGraphicsPipelineCreateInfo<'_>) -> GfxResult<vk::Pipeline> {
        let base = info.base;
        let create_info = &base.create_info;

        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(info.color_formats)
            .depth_attachment_format(info.depth_format);

        let entry_names: Vec<CString> = create_info
            .stages
            .iter()
            .map(|stage| CString::new(stage.entry_point.as_str()).unwrap_or_default())
            .collect();
        let shader_stages_info = create_info
            .stages
            .iter()
            .zip(&base.modules)
            .zip(&entry_names)
            .map(|((stage, module), entry)| {
                vk::PipelineShaderStageCreateInfo::default().stage(stage.stage).module(*module).name(entry.as_c_str())
            })
            .collect_vec();

        // 顶点和 index
        let vertex_bindings = create_info
            .vertex_bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate,
            })
            .collect_vec();
        let vertex_attributes = create_info
            .vertex_attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect_vec();
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let raster = &create_info.raster;
        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(raster.topology)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let rasterize_state_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(raster.polygon_mode)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .line_width(1.0);

        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(info.samples);

        // 混合设置：需要为每个 color attachment 分别指定
        let color_blend_states = info.color_formats.iter().map(|_| raster.blend.attachment_state()).collect_vec();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_states);

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(raster.depth_test)
            .depth_write_enable(raster.depth_write)
            .depth_compare_op(raster.depth_compare_op);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(base.layout)
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let pipelines = unsafe {
            self.fns
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .map_err(|(_, e)| GfxError::from(e))?
        };
        pipelines.into_iter().next().ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))
    }

    fn create_compute_pipeline(&self, info: &GfxComputePipelineCreateInfo) -> GfxResult<vk::Pipeline> {
        let entry = CString::new(info.entry_point.as_str()).unwrap_or_default();
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(info.module)
            .name(entry.as_c_str());
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(info.layout);
        let pipelines = unsafe {
            self.fns
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .map_err(|(_, e)| GfxError::from(e))?
        };
        pipelines.into_iter().next().ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.fns.device.destroy_pipeline(pipeline, None) }
    }

    fn create_descriptor_set(&self, info: &GfxDescriptorSetCreateInfo) -> GfxResult<GfxDescriptorSet> {
        let pool_sizes = info.layout_info.pool_sizes();
        let pool = unsafe {
            self.fns.device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes),
                None,
            )?
        };
        let layouts = [info.layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        let set = match unsafe { self.fns.device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => sets.into_iter().next().ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN)),
            Err(e) => Err(e.into()),
        };
        let set = match set {
            Ok(set) => set,
            Err(e) => {
                unsafe { self.fns.device.destroy_descriptor_pool(pool, None) };
                return Err(e);
            }
        };

        for (binding, write) in &info.writes {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(*binding)
                .descriptor_type(write.descriptor_type());
            match *write {
                GfxDescriptorWrite::SampledImage { view, layout, sampler } => {
                    let image_info = [vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: layout,
                    }];
                    unsafe { self.fns.device.update_descriptor_sets(&[base.image_info(&image_info)], &[]) };
                }
                GfxDescriptorWrite::StorageImage { view, layout } => {
                    let image_info = [vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: layout,
                    }];
                    unsafe { self.fns.device.update_descriptor_sets(&[base.image_info(&image_info)], &[]) };
                }
                GfxDescriptorWrite::UniformBuffer { buffer, offset, range }
                | GfxDescriptorWrite::StorageBuffer { buffer, offset, range } => {
                    let buffer_info = [vk::DescriptorBufferInfo { buffer, offset, range }];
                    unsafe { self.fns.device.update_descriptor_sets(&[base.buffer_info(&buffer_info)], &[]) };
                }
                GfxDescriptorWrite::AccelerationStructure(accel) => {
                    let handles = [accel];
                    let mut accel_info =
                        vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&handles);
                    let mut write = base.push_next(&mut accel_info);
                    write.descriptor_count = 1;
                    unsafe { self.fns.device.update_descriptor_sets(&[write], &[]) };
                }
            }
        }

        Ok(GfxDescriptorSet { set, pool })
    }

    fn destroy_descriptor_set(&self, set: GfxDescriptorSet) {
        // 销毁 pool 会一并释放 set
        unsafe { self.fns.device.destroy_descriptor_pool(set.pool, None) }
    }

    fn begin_encoder(&self, domain: QueueDomain, debug_name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>> {
        self.recycle_pools(domain)?;
        let slot = self.slot(domain);
        let pool = match slot.free_pools.lock().pop() {
            Some(pool) => pool,
            None => unsafe {
                self.fns.device.create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .queue_family_index(slot.info.family_index)
                        .flags(vk::CommandPoolCreateFlags::TRANSIENT),
                    None,
                )?
            },
        };
        let encoder = AshCommandEncoder::new(self.fns.clone(), domain, pool, debug_name)?;
        Ok(Box::new(encoder))
    }

    fn submit(&self, list: GfxCommandList, waits: &[GfxSubmitTicket]) -> GfxResult<GfxSubmitTicket> {
        let slot = self.slot(list.domain);

        let wait_infos = latest_per_domain(waits)
            .into_iter()
            .filter(|ticket| ticket.domain != list.domain)
            .map(|ticket| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.slot(ticket.domain).timeline)
                    .value(ticket.value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect_vec();
        let command_buffer_info = vk::CommandBufferSubmitInfo::default().command_buffer(list.handle);

        let _guard = self.submit_lock.lock();
        let value = slot.last_signaled.load(Ordering::Acquire) + 1;
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.timeline)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));

        unsafe {
            self.fns.device.queue_submit2(slot.info.queue, std::slice::from_ref(&submit_info), vk::Fence::null())?;
        }
        slot.last_signaled.store(value, Ordering::Release);
        slot.in_flight_pools.lock().push((value, list.pool));

        Ok(GfxSubmitTicket::new(list.domain, value))
    }

    fn discard(&self, list: GfxCommandList) {
        match unsafe { self.fns.device.reset_command_pool(list.pool, vk::CommandPoolResetFlags::empty()) } {
            Ok(()) => self.slot(list.domain).free_pools.lock().push(list.pool),
            Err(e) => {
                log::error!("failed to reset discarded command pool: {:?}", e);
                unsafe { self.fns.device.destroy_command_pool(list.pool, None) };
            }
        }
    }

    fn wait(&self, tickets: &[GfxSubmitTicket]) -> GfxResult<()> {
        let tickets = latest_per_domain(tickets);
        if tickets.is_empty() {
            return Ok(());
        }
        let semaphores = tickets.iter().map(|t| self.slot(t.domain).timeline).collect_vec();
        let values = tickets.iter().map(|t| t.value).collect_vec();
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        unsafe { self.fns.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }

    fn is_complete(&self, ticket: GfxSubmitTicket) -> GfxResult<bool> {
        Ok(self.completed_value(ticket.domain)? >= ticket.value)
    }
}
impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.fns.device.device_wait_idle() {
                log::error!("device_wait_idle failed: {:?}", e);
            }
            for slot in &self.queues {
                for pool in slot.free_pools.lock().drain(..) {
                    self.fns.device.destroy_command_pool(pool, None);
                }
                for (_, pool) in slot.in_flight_pools.lock().drain(..) {
                    self.fns.device.destroy_command_pool(pool, None);
                }
                self.fns.device.destroy_semaphore(slot.timeline, None);
            }
        }
        let leaked_images = self.image_allocations.lock().len();
        let leaked_buffers = self.buffer_allocations.lock().len();
        if leaked_images + leaked_buffers > 0 {
            log::warn!("AshDevice dropped with {} images and {} buffers alive", leaked_images, leaked_buffers);
        }
    }
}
