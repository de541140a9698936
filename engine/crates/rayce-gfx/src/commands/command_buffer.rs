use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{barrier::GfxImageBarrier, command_pool::GfxCommandPool},
    error::{GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
    query::query_pool::GfxQueryPool,
    resources::buffer::GfxBuffer,
};

/// debug label 使用的颜色
pub struct LabelColor;

impl LabelColor {
    pub const COLOR_CMD: glam::Vec4 = glam::Vec4::new(0.5, 0.5, 0.5, 1.0);
    pub const COLOR_STAGE: glam::Vec4 = glam::Vec4::new(0.2, 0.6, 0.9, 1.0);
    pub const COLOR_TRACE: glam::Vec4 = glam::Vec4::new(0.9, 0.4, 0.1, 1.0);
}

/// 命令缓冲封装
///
/// 借用 `GfxDevice` 录制命令，生命周期不会超过 device。
///
/// # 使用示例
/// ```ignore
/// let cmd = GfxCommandBuffer::allocate(device, &pool, "trace")?;
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "trace")?;
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR, pipeline);
/// cmd.end()?;
/// ```
pub struct GfxCommandBuffer<'d> {
    device: &'d GfxDevice,
    vk_handle: vk::CommandBuffer,
    command_pool_handle: vk::CommandPool,
}

// new & free
impl<'d> GfxCommandBuffer<'d> {
    pub fn allocate(device: &'d GfxDevice, command_pool: &GfxCommandPool, debug_name: &str) -> GpuResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer =
            unsafe { device.allocate_command_buffers(&info) }.vk_context("vkAllocateCommandBuffers")?[0];
        let cmd_buffer = Self {
            device,
            vk_handle: command_buffer,
            command_pool_handle: command_pool.handle(),
        };
        device.set_debug_name(&cmd_buffer, debug_name);
        Ok(cmd_buffer)
    }

    /// 包装一个由外部（例如 presentation 层）管理的 command buffer
    pub fn from_raw(device: &'d GfxDevice, vk_handle: vk::CommandBuffer, command_pool: vk::CommandPool) -> Self {
        Self {
            device,
            vk_handle,
            command_pool_handle: command_pool,
        }
    }

    pub fn free(self) {
        unsafe {
            self.device.free_command_buffers(self.command_pool_handle, std::slice::from_ref(&self.vk_handle));
        }
    }
}

// Basic 命令
impl GfxCommandBuffer<'_> {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) -> GpuResult<()> {
        unsafe {
            self.device
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))
                .vk_context("vkBeginCommandBuffer")?;
        }
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制 command
    #[inline]
    pub fn end(&self) -> GpuResult<()> {
        self.end_label();
        unsafe { self.device.end_command_buffer(self.vk_handle) }.vk_context("vkEndCommandBuffer")
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn device(&self) -> &GfxDevice {
        self.device
    }
}

// 数据传输类型
impl GfxCommandBuffer<'_> {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: &GfxBuffer, dst: &GfxBuffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.cmd_copy_buffer(self.vk_handle, src.vk_handle(), dst.vk_handle(), regions);
        }
    }

    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer_to_image(&self, copy_info: &vk::CopyBufferToImageInfo2) {
        unsafe { self.device.cmd_copy_buffer_to_image2(self.vk_handle, copy_info) }
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn reset_query_pool(&self, query_pool: &GfxQueryPool, first_query: u32, query_count: u32) {
        unsafe {
            self.device.cmd_reset_query_pool(self.vk_handle, query_pool.handle(), first_query, query_count);
        }
    }
}

// 光追相关
impl GfxCommandBuffer<'_> {
    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn cmd_copy_acceleration_structure(&self, copy_info: &vk::CopyAccelerationStructureInfoKHR) {
        unsafe {
            self.device.acceleration_structure.cmd_copy_acceleration_structure(self.vk_handle, copy_info);
        }
    }

    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn build_acceleration_structure(
        &self,
        geometry: &vk::AccelerationStructureBuildGeometryInfoKHR,
        ranges: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        unsafe {
            // 该函数可以一次构建多个 AccelerationStructure，这里只构建了 1 个
            self.device.acceleration_structure.cmd_build_acceleration_structures(
                self.vk_handle,
                std::slice::from_ref(geometry),
                &[ranges],
            )
        }
    }

    /// 这里涉及到对加速结构的 read，需要同步
    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn write_acceleration_structure_properties(
        &self,
        query_pool: &GfxQueryPool,
        first_query: u32,
        acceleration_structures: &[vk::AccelerationStructureKHR],
    ) {
        unsafe {
            self.device.acceleration_structure.cmd_write_acceleration_structures_properties(
                self.vk_handle,
                acceleration_structures,
                query_pool.query_type(),
                query_pool.handle(),
                first_query,
            )
        }
    }

    /// 光追的入口
    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn trace_rays(
        &self,
        raygen_table: &vk::StridedDeviceAddressRegionKHR,
        miss_table: &vk::StridedDeviceAddressRegionKHR,
        hit_table: &vk::StridedDeviceAddressRegionKHR,
        callable_table: &vk::StridedDeviceAddressRegionKHR,
        thread_size: [u32; 3],
    ) {
        unsafe {
            self.device.ray_tracing_pipeline.cmd_trace_rays(
                self.vk_handle,
                raygen_table,
                miss_table,
                hit_table,
                callable_table,
                thread_size[0],
                thread_size[1],
                thread_size[2],
            );
        }
    }
}

// 同步相关命令
impl GfxCommandBuffer<'_> {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn memory_barrier(&self, barriers: &[vk::MemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::default().memory_barriers(barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn image_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}

// debug 相关命令，debug utils 不可用时为空操作
impl GfxCommandBuffer<'_> {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = self.device.debug_utils() else {
            return;
        };
        // begin / end 必须成对出现，因此名字非法时也要压入 label
        let name = CString::new(label_name.replace('\0', " ")).unwrap_or_default();
        unsafe {
            debug_utils
                .cmd_begin_debug_utils_label(self.vk_handle, &GfxDevice::debug_label(name.as_c_str(), label_color));
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        if let Some(debug_utils) = self.device.debug_utils() {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.vk_handle);
            }
        }
    }
}

impl DebugType for GfxCommandBuffer<'_> {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
