use ash::vk;
use rayce_gfx::{
    GpuContext, GpuError, GpuResult,
    raytracing::{
        acceleration::{AccelerationStructure, BlasBuildOptions},
        geometry::{AabbGeometryRecord, GeometryRecord, InstanceRecord},
    },
};

use crate::rt_shaders::RtShaderGroup;

/// BLAS 中几何体的类型，决定了 instance 使用 hit 区域中的哪条 record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlasGeometry {
    Triangles,
    /// 由 AABB 描述，求交在 intersection shader 中完成
    Procedural,
}

impl BlasGeometry {
    #[inline]
    pub fn sbt_record_offset(self) -> u32 {
        match self {
            BlasGeometry::Triangles => RtShaderGroup::TRIANGLE_HIT_RECORD,
            BlasGeometry::Procedural => RtShaderGroup::SPHERE_HIT_RECORD,
        }
    }
}

/// 场景中的一个实例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneInstance {
    /// `SceneAccel::add_mesh` / `add_aabbs` 返回的下标
    pub blas: usize,
    pub transform: glam::Mat4,
}

/// 场景的加速结构：每个 mesh 一个 BLAS，整个场景一个 TLAS
///
/// TLAS 不做增量更新，instance 或变换改变时整体重建
pub struct SceneAccel {
    blases: Vec<(AccelerationStructure, BlasGeometry)>,
    tlas: Option<AccelerationStructure>,
    /// 每次重建 TLAS 加一，用于判断 descriptor 是否需要重写
    tlas_version: u64,
    compact: bool,
}

impl SceneAccel {
    pub fn new(compact_blas: bool) -> Self {
        Self {
            blases: Vec::new(),
            tlas: None,
            tlas_version: 0,
            compact: compact_blas,
        }
    }

    fn blas_options(&self) -> BlasBuildOptions {
        BlasBuildOptions { compact: self.compact }
    }

    /// 为一个三角形网格构建 BLAS，返回它的下标
    pub fn add_mesh(&mut self, ctx: &GpuContext, geometry: &GeometryRecord, name: impl AsRef<str>) -> GpuResult<usize> {
        let blas = AccelerationStructure::build_blas_sync(ctx, geometry, self.blas_options(), name)?;
        self.blases.push((blas, BlasGeometry::Triangles));
        Ok(self.blases.len() - 1)
    }

    /// 为一组 AABB（程序化球体）构建 BLAS，返回它的下标
    pub fn add_aabbs(
        &mut self,
        ctx: &GpuContext,
        geometry: &AabbGeometryRecord,
        name: impl AsRef<str>,
    ) -> GpuResult<usize> {
        let blas = AccelerationStructure::build_aabb_blas_sync(ctx, geometry, self.blas_options(), name)?;
        self.blases.push((blas, BlasGeometry::Procedural));
        Ok(self.blases.len() - 1)
    }

    #[inline]
    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    #[inline]
    pub fn blas_address(&self, blas: usize) -> Option<vk::DeviceAddress> {
        self.blases.get(blas).map(|(b, _)| b.device_address())
    }

    #[inline]
    pub fn blas_geometry(&self, blas: usize) -> Option<BlasGeometry> {
        self.blases.get(blas).map(|(_, g)| *g)
    }

    /// 把场景实例转换为 TLAS 的 instance，`instance_index` 即在数组中的下标
    pub fn instance_records(&self, instances: &[SceneInstance]) -> GpuResult<Vec<InstanceRecord>> {
        instances
            .iter()
            .enumerate()
            .map(|(idx, inst)| {
                let (blas, geometry) = self.blases.get(inst.blas).ok_or_else(|| GpuError::AccelerationBuild {
                    stage: "tlas instances",
                    reason: format!("instance {idx} references BLAS {} of {}", inst.blas, self.blases.len()),
                })?;
                let mut record = InstanceRecord::new(blas.device_address(), inst.transform, idx as u32);
                record.sbt_record_offset = geometry.sbt_record_offset();
                Ok(record)
            })
            .collect()
    }

    /// 重建 TLAS，旧的 TLAS 会被销毁
    ///
    /// 调用方需要保证没有正在执行的帧引用旧的 TLAS
    pub fn build_tlas(&mut self, ctx: &GpuContext, instances: &[SceneInstance]) -> GpuResult<&AccelerationStructure> {
        let records = self.instance_records(instances)?;
        let tlas = AccelerationStructure::build_tlas_sync(ctx, &records, format!("scene-tlas-{}", self.tlas_version))?;
        if let Some(old) = self.tlas.take() {
            old.destroy(ctx);
        }
        self.tlas_version += 1;
        log::info!("scene tlas rebuilt: {} instances, version {}", records.len(), self.tlas_version);
        Ok(self.tlas.insert(tlas))
    }

    #[inline]
    pub fn tlas(&self) -> Option<&AccelerationStructure> {
        self.tlas.as_ref()
    }

    #[inline]
    pub fn tlas_version(&self) -> u64 {
        self.tlas_version
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        // TLAS 引用着 BLAS 的地址，先销毁
        if let Some(tlas) = self.tlas.take() {
            tlas.destroy(ctx);
        }
        for (blas, _) in self.blases.drain(..) {
            blas.destroy(ctx);
        }
    }
}
