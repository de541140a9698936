use ash::vk;
use itertools::Itertools;

use crate::{
    commands::barrier::GfxMemoryBarrier,
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    query::query_pool::GfxQueryPool,
    raytracing::geometry::{AabbGeometryRecord, GeometryRecord, InstanceRecord, tlas_build_range},
    resources::buffer::GfxBuffer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationKind {
    BottomLevel,
    TopLevel,
}

impl AccelerationKind {
    #[inline]
    pub fn vk_type(self) -> vk::AccelerationStructureTypeKHR {
        match self {
            AccelerationKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            AccelerationKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }
}

/// BLAS 构建参数
#[derive(Debug, Clone, Copy, Default)]
pub struct BlasBuildOptions {
    /// 构建完成后查询压缩尺寸，并拷贝到一个更小的加速结构中
    pub compact: bool,
}

/// 加速结构以及承载它的 storage buffer
///
/// device address 在创建时获取并缓存，之后不会改变。
pub struct AccelerationStructure {
    handle: vk::AccelerationStructureKHR,
    storage: Option<GfxBuffer>,
    kind: AccelerationKind,
    device_address: vk::DeviceAddress,
    /// 构建时写入的压缩尺寸查询结果，0 表示没有查询
    pending_compact_size: vk::DeviceSize,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// 构建
impl AccelerationStructure {
    /// 同步构建 BLAS：每个 BLAS 只包含一个三角形网格
    ///
    /// 返回时 scratch buffer 已经销毁，加速结构可以直接被 TLAS 引用
    pub fn build_blas_sync(
        ctx: &GpuContext,
        geometry: &GeometryRecord,
        options: BlasBuildOptions,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        Self::build_blas_from(ctx, &geometry.vk_geometry(), geometry.build_range(), options, name.as_ref())
    }

    /// 同步构建由包围盒组成的 BLAS，用于程序化几何体
    pub fn build_aabb_blas_sync(
        ctx: &GpuContext,
        geometry: &AabbGeometryRecord,
        options: BlasBuildOptions,
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        Self::build_blas_from(ctx, &geometry.vk_geometry(), geometry.build_range(), options, name.as_ref())
    }

    fn build_blas_from(
        ctx: &GpuContext,
        vk_geometry: &vk::AccelerationStructureGeometryKHR,
        range: vk::AccelerationStructureBuildRangeInfoKHR,
        options: BlasBuildOptions,
        name: &str,
    ) -> GpuResult<Self> {
        let mut flags = vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
        if options.compact {
            flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION;
        }

        let uncompact =
            Self::build_sync(ctx, AccelerationKind::BottomLevel, vk_geometry, flags, range, options.compact, name)?;

        if options.compact { uncompact.compact_sync(ctx) } else { Ok(uncompact) }
    }

    /// 同步构建 TLAS，instance 数组会先上传到一个临时的 device buffer
    ///
    /// instance 为空时依然会构建一个合法的空 TLAS
    pub fn build_tlas_sync(ctx: &GpuContext, instances: &[InstanceRecord], name: impl AsRef<str>) -> GpuResult<Self> {
        let name = name.as_ref();
        let vk_instances = instances.iter().map(InstanceRecord::to_vk_instance).collect_vec();

        // buffer 的尺寸不能为 0，空 TLAS 也分配一个 instance 的空间
        let instance_stride = size_of::<vk::AccelerationStructureInstanceKHR>() as vk::DeviceSize;
        let instance_buffer_size = instance_stride * (vk_instances.len().max(1) as vk::DeviceSize);
        let instance_buffer =
            GfxBuffer::new_acceleration_instance_buffer(ctx, instance_buffer_size, format!("{name}-instance-buffer"))
                .map_err(|e| e.into_acceleration("instance buffer allocation"))?;

        let result = Self::upload_instances(ctx, &instance_buffer, &vk_instances).and_then(|_| {
            let instance_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: instance_buffer.device_address(),
                });
            let vk_geometry = vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    instances: instance_data,
                });

            Self::build_sync(
                ctx,
                AccelerationKind::TopLevel,
                &vk_geometry,
                vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
                tlas_build_range(vk_instances.len()),
                false,
                name,
            )
        });

        instance_buffer.destroy(ctx);
        result
    }

    fn upload_instances(
        ctx: &GpuContext,
        instance_buffer: &GfxBuffer,
        vk_instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> GpuResult<()> {
        if vk_instances.is_empty() {
            return Ok(());
        }
        // SAFETY: AccelerationStructureInstanceKHR 是 repr(C) 的 64 字节 POD 结构
        let bytes = unsafe {
            std::slice::from_raw_parts(vk_instances.as_ptr() as *const u8, size_of_val(vk_instances))
        };
        instance_buffer.transfer_data_sync(ctx, bytes).map_err(|e| e.into_acceleration("instance upload"))
    }

    /// 查询构建所需的加速结构尺寸与 scratch 尺寸
    pub fn query_build_sizes(
        ctx: &GpuContext,
        kind: AccelerationKind,
        geometry: &vk::AccelerationStructureGeometryKHR,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        primitive_count: u32,
    ) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(kind.vk_type())
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(geometry));

        let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            ctx.device().acceleration_structure().get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
                &mut size_info,
            );
        }
        size_info
    }

    /// 所有加速结构共用的构建流程：
    /// 1. 查询尺寸
    /// 2. 创建加速结构和 scratch buffer
    /// 3. 录制并同步提交 build 命令
    /// 4. 销毁 scratch buffer
    ///
    /// 如果 `query_compact_size` 为 true，会在同一个 command buffer 里写入压缩尺寸的 query，
    /// 结果由 `compact_sync` 读取。
    fn build_sync(
        ctx: &GpuContext,
        kind: AccelerationKind,
        geometry: &vk::AccelerationStructureGeometryKHR,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        range: vk::AccelerationStructureBuildRangeInfoKHR,
        query_compact_size: bool,
        name: &str,
    ) -> GpuResult<Self> {
        let size_info = Self::query_build_sizes(ctx, kind, geometry, flags, range.primitive_count);
        if size_info.acceleration_structure_size == 0 {
            return Err(GpuError::AccelerationBuild {
                stage: "size query",
                reason: format!("driver reported zero size for `{name}`"),
            });
        }

        let acceleration = Self::new(ctx, size_info.acceleration_structure_size, kind, name)?;

        let scratch_alignment =
            ctx.acc_struct_props().min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize;
        let scratch_buffer = match GfxBuffer::new_acceleration_scratch_buffer(
            ctx,
            size_info.build_scratch_size.max(1),
            scratch_alignment,
            format!("{name}-scratch-buffer"),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                acceleration.destroy(ctx);
                return Err(e.into_acceleration("scratch allocation"));
            }
        };

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(kind.vk_type())
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(geometry))
            .dst_acceleration_structure(acceleration.handle)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_buffer.device_address(),
            });

        let result = Self::with_compaction_query(ctx, query_compact_size, name, |query_pool| {
            ctx.one_time_exec(name, |cmd| {
                cmd.build_acceleration_structure(&build_info, std::slice::from_ref(&range));

                if let Some(query_pool) = query_pool {
                    // 写入 compact size 之前，需要等待 build 完成
                    cmd.memory_barrier(&[GfxMemoryBarrier::acceleration_build_to_read()]);
                    cmd.reset_query_pool(query_pool, 0, 1);
                    cmd.write_acceleration_structure_properties(query_pool, 0, &[acceleration.handle]);
                }
            })
            .map_err(|e| e.into_acceleration("build submit"))?;

            match query_pool {
                Some(query_pool) => query_pool
                    .get_results_u64(ctx.device(), 0, 1)
                    .map(|sizes| sizes.first().copied())
                    .map_err(|e| e.into_acceleration("compaction query")),
                None => Ok(None),
            }
        });
        scratch_buffer.destroy(ctx);

        match result {
            Ok(compact_size) => {
                log::debug!(
                    "built {:?} `{}`: {} bytes, scratch {} bytes, {} primitives",
                    kind,
                    name,
                    size_info.acceleration_structure_size,
                    size_info.build_scratch_size,
                    range.primitive_count
                );
                let mut acceleration = acceleration;
                if let Some(size) = compact_size {
                    acceleration.pending_compact_size = size;
                }
                Ok(acceleration)
            }
            Err(e) => {
                acceleration.destroy(ctx);
                Err(e)
            }
        }
    }

    fn with_compaction_query<R>(
        ctx: &GpuContext,
        enabled: bool,
        name: &str,
        f: impl FnOnce(Option<&GfxQueryPool>) -> GpuResult<R>,
    ) -> GpuResult<R> {
        if !enabled {
            return f(None);
        }
        let query_pool = GfxQueryPool::new(
            ctx.device(),
            vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR,
            1,
            &format!("{name}-compact-query"),
        )
        .map_err(|e| e.into_acceleration("compaction query"))?;
        let result = f(Some(&query_pool));
        query_pool.destroy(ctx.device());
        result
    }

    /// 把当前加速结构拷贝到一个按压缩尺寸分配的新加速结构中，并销毁自身
    fn compact_sync(self, ctx: &GpuContext) -> GpuResult<Self> {
        let compact_size = self.pending_compact_size;
        let original_size = self.storage_size();
        if compact_size == 0 || compact_size >= original_size {
            log::debug!("skip compaction of `{}`: compact size {}", self.debug_name, compact_size);
            return Ok(self);
        }

        let compacted = match Self::new(ctx, compact_size, self.kind, &self.debug_name) {
            Ok(compacted) => compacted,
            Err(e) => {
                self.destroy(ctx);
                return Err(e.into_acceleration("compaction allocation"));
            }
        };

        let copy_result = ctx.one_time_exec(&format!("{}-compact", self.debug_name), |cmd| {
            cmd.cmd_copy_acceleration_structure(
                &vk::CopyAccelerationStructureInfoKHR::default()
                    .src(self.handle)
                    .dst(compacted.handle)
                    .mode(vk::CopyAccelerationStructureModeKHR::COMPACT),
            );
        });

        log::debug!(
            "compacted `{}`: {} -> {} bytes",
            self.debug_name,
            original_size,
            compact_size
        );
        self.destroy(ctx);

        match copy_result {
            Ok(()) => Ok(compacted),
            Err(e) => {
                compacted.destroy(ctx);
                Err(e.into_acceleration("compaction copy"))
            }
        }
    }

    /// 创建加速结构的 storage buffer 以及 handle，不进行构建
    fn new(ctx: &GpuContext, size: vk::DeviceSize, kind: AccelerationKind, name: &str) -> GpuResult<Self> {
        let storage = GfxBuffer::new_acceleration_buffer(ctx, size, format!("{name}-storage"))
            .map_err(|e| e.into_acceleration("storage allocation"))?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .ty(kind.vk_type())
            .size(size)
            .buffer(storage.vk_handle());

        let handle = match unsafe {
            ctx.device().acceleration_structure().create_acceleration_structure(&create_info, None)
        }
        .vk_context("vkCreateAccelerationStructureKHR")
        {
            Ok(handle) => handle,
            Err(e) => {
                storage.destroy(ctx);
                return Err(e.into_acceleration("create"));
            }
        };

        let device_address = unsafe {
            ctx.device().acceleration_structure().get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle),
            )
        };

        let acceleration = Self {
            handle,
            storage: Some(storage),
            kind,
            device_address,
            pending_compact_size: 0,
            debug_name: name.to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&acceleration, name);
        Ok(acceleration)
    }

    /// 先销毁加速结构，再释放其 storage buffer
    pub fn destroy(mut self, ctx: &GpuContext) {
        unsafe {
            ctx.device().acceleration_structure().destroy_acceleration_structure(self.handle, None);
        }
        if let Some(storage) = self.storage.take() {
            storage.destroy(ctx);
        }
        self.handle = vk::AccelerationStructureKHR::null();

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

// getter
impl AccelerationStructure {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> AccelerationKind {
        self.kind
    }

    /// TLAS instance 引用 BLAS 时使用的地址，在整个生命周期内保持不变
    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn storage_size(&self) -> vk::DeviceSize {
        self.storage.as_ref().map_or(0, GfxBuffer::size)
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("AccelerationStructure `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for AccelerationStructure {
    fn debug_type_name() -> &'static str {
        "AccelerationStructure"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_to_vk_type() {
        assert_eq!(AccelerationKind::BottomLevel.vk_type(), vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL);
        assert_eq!(AccelerationKind::TopLevel.vk_type(), vk::AccelerationStructureTypeKHR::TOP_LEVEL);
    }

    #[test]
    fn test_default_options_do_not_compact() {
        assert!(!BlasBuildOptions::default().compact);
    }
}
