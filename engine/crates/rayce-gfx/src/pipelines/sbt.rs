use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    pipelines::rt_pipeline::GfxRtPipeline,
    resources::buffer::GfxBuffer,
    utils::align_up,
};

const SBT_STAGE: &str = "shader binding table";

/// SBT 布局需要的设备属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtPipelineProps {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
}

impl RtPipelineProps {
    pub fn from_vk(props: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR) -> Self {
        Self {
            handle_size: props.shader_group_handle_size,
            handle_alignment: props.shader_group_handle_alignment,
            base_alignment: props.shader_group_base_alignment,
        }
    }

    /// 不需要 user data，所以 record 的大小就是对齐后的 handle size
    #[inline]
    pub const fn aligned_handle_size(&self) -> vk::DeviceSize {
        align_up(self.handle_size as vk::DeviceSize, self.handle_alignment as vk::DeviceSize)
    }

    fn validate(&self) -> GpuResult<()> {
        let valid = self.handle_size > 0
            && self.handle_alignment.is_power_of_two()
            && self.base_alignment.is_power_of_two()
            && self.base_alignment >= self.handle_alignment;
        if valid {
            Ok(())
        } else {
            Err(GpuError::PipelineCreation {
                stage: SBT_STAGE,
                reason: format!("invalid device properties {self:?}"),
            })
        }
    }
}

/// SBT 中的一段区域，`offset` 相对于 SBT buffer 起始位置
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SbtRegion {
    pub offset: vk::DeviceSize,
    pub stride: vk::DeviceSize,
    pub size: vk::DeviceSize,
    /// 依次写入该区域的 shader group 下标
    pub groups: Vec<u32>,
}

impl SbtRegion {
    /// 空的区域使用全 0 的 region
    pub fn to_vk(&self, sbt_address: vk::DeviceAddress) -> vk::StridedDeviceAddressRegionKHR {
        if self.size == 0 {
            return vk::StridedDeviceAddressRegionKHR::default();
        }
        vk::StridedDeviceAddressRegionKHR::default()
            .device_address(sbt_address + self.offset)
            .stride(self.stride)
            .size(self.size)
    }
}

/// SBT 的内存布局，依次为 raygen、hit、miss
///
/// 每个区域的起始位置按 base alignment 对齐；区域内每个 record 按 handle alignment 对齐。
/// 区域大小由实际分配到该区域的 group 数量决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbtLayout {
    pub raygen: SbtRegion,
    pub hit: SbtRegion,
    pub miss: SbtRegion,
    pub total_size: vk::DeviceSize,
    props: RtPipelineProps,
}

impl SbtLayout {
    pub fn new(props: RtPipelineProps, raygen_groups: &[u32], hit_groups: &[u32], miss_groups: &[u32]) -> GpuResult<Self> {
        props.validate()?;
        if raygen_groups.len() != 1 {
            return Err(GpuError::PipelineCreation {
                stage: SBT_STAGE,
                reason: format!("expected exactly one raygen group, got {}", raygen_groups.len()),
            });
        }

        let base_alignment = props.base_alignment as vk::DeviceSize;
        let aligned_handle_size = props.aligned_handle_size();

        // raygen 的 stride 需要和 size 一样
        let raygen_size = align_up(aligned_handle_size, base_alignment);
        let raygen = SbtRegion {
            offset: 0,
            stride: raygen_size,
            size: raygen_size,
            groups: raygen_groups.to_vec(),
        };

        let region_after = |prev: &SbtRegion, groups: &[u32]| SbtRegion {
            offset: prev.offset + prev.size,
            stride: aligned_handle_size,
            size: align_up(groups.len() as vk::DeviceSize * aligned_handle_size, base_alignment),
            groups: groups.to_vec(),
        };
        let hit = region_after(&raygen, hit_groups);
        let miss = region_after(&hit, miss_groups);
        let total_size = miss.offset + miss.size;

        Ok(Self {
            raygen,
            hit,
            miss,
            total_size,
            props,
        })
    }

    pub fn regions(&self) -> [&SbtRegion; 3] {
        [&self.raygen, &self.hit, &self.miss]
    }

    /// 布局中引用的 group 数量最少应该是多少
    pub fn required_group_count(&self) -> u32 {
        self.regions().iter().flat_map(|r| r.groups.iter()).map(|g| g + 1).max().unwrap_or(0)
    }

    /// 把 `get_ray_tracing_shader_group_handles` 得到的数据按布局拷贝到 `dst`
    ///
    /// - `handle_data`: 所有 group 的 handle，紧密排列，每个 `handle_size` 字节
    /// - `dst`: SBT buffer 的 host 映射，长度至少为 `total_size`
    pub fn write_handles(&self, handle_data: &[u8], dst: &mut [u8]) -> GpuResult<()> {
        let handle_size = self.props.handle_size as usize;
        if dst.len() < self.total_size as usize {
            return Err(GpuError::PipelineCreation {
                stage: SBT_STAGE,
                reason: format!("destination holds {} bytes, layout needs {}", dst.len(), self.total_size),
            });
        }

        for region in self.regions() {
            for (record_idx, group_idx) in region.groups.iter().enumerate() {
                let src_start = *group_idx as usize * handle_size;
                let Some(src) = handle_data.get(src_start..src_start + handle_size) else {
                    return Err(GpuError::PipelineCreation {
                        stage: SBT_STAGE,
                        reason: format!("no handle for shader group {group_idx}"),
                    });
                };
                let dst_start = (region.offset + record_idx as vk::DeviceSize * region.stride) as usize;
                dst[dst_start..dst_start + handle_size].copy_from_slice(src);
            }
        }
        Ok(())
    }
}

/// 填充好的 SBT，以及 trace rays 时使用的 4 个区域
pub struct ShaderBindingTable {
    buffer: GfxBuffer,
    layout: SbtLayout,

    raygen_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    /// 从 pipeline 中取出所有 group 的 handle，按照 `layout` 写入新建的 SBT buffer
    ///
    /// 创建之后内容不再改变
    pub fn new(ctx: &GpuContext, pipeline: &GfxRtPipeline, layout: SbtLayout, name: impl AsRef<str>) -> GpuResult<Self> {
        let name = name.as_ref();
        let group_count = pipeline.group_count();
        if layout.required_group_count() > group_count {
            return Err(GpuError::PipelineCreation {
                stage: SBT_STAGE,
                reason: format!(
                    "layout references group {} but pipeline `{}` has {} groups",
                    layout.required_group_count() - 1,
                    pipeline.debug_name(),
                    group_count
                ),
            });
        }

        let handle_size = layout.props.handle_size as usize;
        let handle_data = unsafe {
            ctx.device().ray_tracing_pipeline().get_ray_tracing_shader_group_handles(
                pipeline.handle(),
                0,
                group_count,
                group_count as usize * handle_size,
            )
        }
        .vk_context("vkGetRayTracingShaderGroupHandlesKHR")
        .map_err(|e| e.into_pipeline(SBT_STAGE))?;

        let mut buffer =
            GfxBuffer::new_sbt_buffer(ctx, layout.total_size, layout.props.base_alignment as vk::DeviceSize, name)
                .map_err(|e| e.into_pipeline(SBT_STAGE))?;

        let mut bytes = vec![0u8; layout.total_size as usize];
        let written = layout
            .write_handles(&handle_data, &mut bytes)
            .and_then(|_| buffer.write_bytes(ctx, 0, &bytes).map_err(|e| e.into_pipeline(SBT_STAGE)));
        if let Err(e) = written {
            buffer.destroy(ctx);
            return Err(e);
        }

        let sbt_address = buffer.device_address();
        log::info!(
            "shader binding table `{}`: raygen {:?}, hit {:?}, miss {:?}, total {} bytes",
            name,
            (layout.raygen.offset, layout.raygen.stride, layout.raygen.size),
            (layout.hit.offset, layout.hit.stride, layout.hit.size),
            (layout.miss.offset, layout.miss.stride, layout.miss.size),
            layout.total_size
        );

        Ok(Self {
            raygen_region: layout.raygen.to_vk(sbt_address),
            hit_region: layout.hit.to_vk(sbt_address),
            miss_region: layout.miss.to_vk(sbt_address),
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
            buffer,
            layout,
        })
    }

    #[inline]
    pub fn raygen_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen_region
    }

    #[inline]
    pub fn hit_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.hit_region
    }

    #[inline]
    pub fn miss_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.miss_region
    }

    #[inline]
    pub fn callable_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.callable_region
    }

    #[inline]
    pub fn layout(&self) -> &SbtLayout {
        &self.layout
    }

    pub fn destroy(self, ctx: &GpuContext) {
        self.buffer.destroy(ctx);
    }
}
