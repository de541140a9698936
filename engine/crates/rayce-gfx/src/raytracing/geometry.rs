use ash::vk;

use crate::resources::{
    buffer::GfxBuffer,
    vertex::{INDEX_TYPE, Index, Vertex},
};

/// 构建一个 BLAS 所需的输入：一个三角形网格
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryRecord {
    pub vertex_address: vk::DeviceAddress,
    pub index_address: vk::DeviceAddress,
    /// 最大的顶点下标，通常是顶点数量 - 1
    pub max_vertex: u32,
    /// 三角形数量
    pub primitive_count: u32,
    pub vertex_stride: vk::DeviceSize,
}

impl GeometryRecord {
    /// 顶点和索引都使用默认布局：`Vertex` 与 u32 索引
    pub fn from_buffers(vertex_buffer: &GfxBuffer, vertex_count: u32, index_buffer: &GfxBuffer, index_count: u32) -> Self {
        debug_assert!(index_count % 3 == 0, "index count must be a multiple of 3");
        debug_assert!(vertex_buffer.size() >= vertex_count as vk::DeviceSize * Vertex::STRIDE);
        debug_assert!(index_buffer.size() >= index_count as vk::DeviceSize * size_of::<Index>() as vk::DeviceSize);

        Self {
            vertex_address: vertex_buffer.device_address() + Vertex::POSITION_OFFSET,
            index_address: index_buffer.device_address(),
            max_vertex: vertex_count.saturating_sub(1),
            primitive_count: index_count / 3,
            vertex_stride: Vertex::STRIDE,
        }
    }

    /// 三角形格式固定为 3×f32 位置 + u32 索引
    pub fn vk_geometry(&self) -> vk::AccelerationStructureGeometryKHR<'static> {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(Vertex::POSITION_FORMAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.vertex_address,
            })
            .vertex_stride(self.vertex_stride)
            .max_vertex(self.max_vertex)
            .index_type(INDEX_TYPE)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.index_address,
            });

        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
    }

    #[inline]
    pub fn build_range(&self) -> vk::AccelerationStructureBuildRangeInfoKHR {
        vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(self.primitive_count)
    }
}

/// 程序化几何体（例如球体）的包围盒，求交由 intersection shader 完成
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AabbGeometryRecord {
    /// `vk::AabbPositionsKHR` 数组的 device address
    pub aabb_address: vk::DeviceAddress,
    pub aabb_count: u32,
    pub stride: vk::DeviceSize,
}

impl AabbGeometryRecord {
    pub const AABB_STRIDE: vk::DeviceSize = size_of::<vk::AabbPositionsKHR>() as vk::DeviceSize;

    pub fn from_buffer(aabb_buffer: &GfxBuffer, aabb_count: u32) -> Self {
        debug_assert!(aabb_buffer.size() >= aabb_count as vk::DeviceSize * Self::AABB_STRIDE);
        Self {
            aabb_address: aabb_buffer.device_address(),
            aabb_count,
            stride: Self::AABB_STRIDE,
        }
    }

    pub fn vk_geometry(&self) -> vk::AccelerationStructureGeometryKHR<'static> {
        let aabbs = vk::AccelerationStructureGeometryAabbsDataKHR::default()
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.aabb_address,
            })
            .stride(self.stride);

        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::AABBS)
            .geometry(vk::AccelerationStructureGeometryDataKHR { aabbs })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
    }

    #[inline]
    pub fn build_range(&self) -> vk::AccelerationStructureBuildRangeInfoKHR {
        vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(self.aabb_count)
    }
}

/// 球心 + 半径对应的包围盒，内存布局与 `vk::AabbPositionsKHR` 一致：min xyz, max xyz
pub fn sphere_aabb(center: glam::Vec3, radius: f32) -> [f32; 6] {
    let min = center - glam::Vec3::splat(radius);
    let max = center + glam::Vec3::splat(radius);
    [min.x, min.y, min.z, max.x, max.y, max.z]
}

/// TLAS 中的一个实例
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceRecord {
    /// 引用的 BLAS 的 device address
    pub blas_address: vk::DeviceAddress,
    pub transform: glam::Mat4,
    /// shader 中的 `gl_InstanceCustomIndexEXT`，只有低 24 位有效
    pub instance_index: u32,
    pub mask: u8,
    /// 只有低 24 位有效
    pub sbt_record_offset: u32,
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl InstanceRecord {
    pub fn new(blas_address: vk::DeviceAddress, transform: glam::Mat4, instance_index: u32) -> Self {
        Self {
            blas_address,
            transform,
            instance_index,
            mask: 0xFF,
            sbt_record_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
        }
    }

    pub fn to_vk_instance(&self) -> vk::AccelerationStructureInstanceKHR {
        debug_assert!(self.instance_index < (1 << 24));
        debug_assert!(self.sbt_record_offset < (1 << 24));

        vk::AccelerationStructureInstanceKHR {
            transform: rt_transform(&self.transform),
            instance_custom_index_and_mask: vk::Packed24_8::new(self.instance_index, self.mask),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                self.sbt_record_offset,
                self.flags.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: self.blas_address,
            },
        }
    }
}

/// glam 的矩阵是列主序的 4×4，加速结构需要行主序的 3×4
pub fn rt_transform(m: &glam::Mat4) -> vk::TransformMatrixKHR {
    let c0 = m.col(0);
    let c1 = m.col(1);
    let c2 = m.col(2);
    let c3 = m.col(3);

    #[rustfmt::skip]
    let matrix = [
        c0.x, c1.x, c2.x, c3.x,
        c0.y, c1.y, c2.y, c3.y,
        c0.z, c1.z, c2.z, c3.z,
    ];
    vk::TransformMatrixKHR { matrix }
}

/// TLAS 的 build range：primitive 数量就是 instance 数量
#[inline]
pub fn tlas_build_range(instance_count: usize) -> vk::AccelerationStructureBuildRangeInfoKHR {
    vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(instance_count as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rt_transform_row_major() {
        let m = glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)) * glam::Mat4::from_scale(glam::vec3(4.0, 5.0, 6.0));
        let t = rt_transform(&m);
        assert_eq!(t.matrix, [4.0, 0.0, 0.0, 1.0, 0.0, 5.0, 0.0, 2.0, 0.0, 0.0, 6.0, 3.0]);
    }

    #[test]
    fn test_rt_transform_rotation_is_transposed() {
        let m = glam::Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let t = rt_transform(&m);
        // 行主序下第一行是 (cos, -sin, 0, 0)
        assert!((t.matrix[0] - 0.0).abs() < 1e-6);
        assert!((t.matrix[1] + 1.0).abs() < 1e-6);
        assert!((t.matrix[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_instance_packing() {
        let record = InstanceRecord {
            sbt_record_offset: 1,
            mask: 0x0F,
            ..InstanceRecord::new(0xdead_beef, glam::Mat4::IDENTITY, 42)
        };
        let vk_instance = record.to_vk_instance();
        assert_eq!(vk_instance.instance_custom_index_and_mask.low_24(), 42);
        assert_eq!(vk_instance.instance_custom_index_and_mask.high_8(), 0x0F);
        assert_eq!(vk_instance.instance_shader_binding_table_record_offset_and_flags.low_24(), 1);
        assert_eq!(
            vk_instance.instance_shader_binding_table_record_offset_and_flags.high_8() as u32,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(unsafe { vk_instance.acceleration_structure_reference.device_handle }, 0xdead_beef);
        assert_eq!(vk_instance.transform.matrix[0], 1.0);
        assert_eq!(vk_instance.transform.matrix[3], 0.0);
    }

    #[test]
    fn test_tlas_range_matches_instance_count() {
        for count in [0usize, 1, 7, 1024] {
            let range = tlas_build_range(count);
            assert_eq!(range.primitive_count as usize, count);
            assert_eq!(range.primitive_offset, 0);
        }
    }

    #[test]
    fn test_sphere_aabb() {
        let aabb = sphere_aabb(glam::vec3(1.0, 2.0, 3.0), 0.5);
        assert_eq!(aabb, [0.5, 1.5, 2.5, 1.5, 2.5, 3.5]);
        assert_eq!(AabbGeometryRecord::AABB_STRIDE, size_of_val(&aabb) as vk::DeviceSize);
    }

    #[test]
    fn test_instance_struct_size() {
        assert_eq!(size_of::<vk::AccelerationStructureInstanceKHR>(), 64);
    }
}
