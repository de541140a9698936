//! GPU 可见的场景数据布局
//!
//! 与 shader 侧的 std140 / std430 声明逐字节对应，修改时需要同步修改 shader。

use glam::{Mat4, Vec3};

/// 材质没有贴图时 `texture_index` 的取值
pub const NO_TEXTURE: i32 = -1;

/// set 2, binding 0 的 camera uniform
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraData {
    pub view_inverse: Mat4,
    pub proj_inverse: Mat4,
}

impl CameraData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view_inverse: view.inverse(),
            proj_inverse: proj.inverse(),
        }
    }
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view_inverse: Mat4::IDENTITY,
            proj_inverse: Mat4::IDENTITY,
        }
    }
}

/// 与 TLAS 中的 instance 一一对应，shader 中通过 `InstanceCustomIndex` 索引
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    pub model: Mat4,
    /// 法线变换使用 model 的逆矩阵转置
    pub inv_model: Mat4,
    pub material_index: u32,
    /// 对应 set 0 中顶点 / 索引 buffer 的下标
    pub geometry_index: u32,
    pub _padding: [u32; 2],
}

impl InstanceData {
    pub fn new(model: Mat4, material_index: u32, geometry_index: u32) -> Self {
        Self {
            model,
            inv_model: model.inverse(),
            material_index,
            geometry_index,
            _padding: [0; 2],
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialKind {
    Lambertian = 0,
    Metal = 1,
    Dielectric = 2,
    Emissive = 3,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    pub emission: [f32; 3],
    pub roughness: f32,
    pub metallic: f32,
    /// 折射率，只有 dielectric 使用
    pub ior: f32,
    /// set 3 binding 0 的下标，`NO_TEXTURE` 表示不使用贴图
    pub texture_index: i32,
    pub kind: u32,
}

impl MaterialData {
    pub fn lambertian(base_color: Vec3) -> Self {
        Self {
            base_color: base_color.extend(1.0).to_array(),
            emission: [0.0; 3],
            roughness: 1.0,
            metallic: 0.0,
            ior: 1.0,
            texture_index: NO_TEXTURE,
            kind: MaterialKind::Lambertian as u32,
        }
    }

    pub fn metal(base_color: Vec3, roughness: f32) -> Self {
        Self {
            roughness,
            metallic: 1.0,
            kind: MaterialKind::Metal as u32,
            ..Self::lambertian(base_color)
        }
    }

    pub fn dielectric(ior: f32) -> Self {
        Self {
            roughness: 0.0,
            ior,
            kind: MaterialKind::Dielectric as u32,
            ..Self::lambertian(Vec3::ONE)
        }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            emission: emission.to_array(),
            kind: MaterialKind::Emissive as u32,
            ..Self::lambertian(Vec3::ZERO)
        }
    }

    pub fn with_texture(mut self, texture_index: u32) -> Self {
        self.texture_index = texture_index as i32;
        self
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Point = 0,
    Directional = 1,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightData {
    /// 点光源是位置，平行光是方向
    pub position: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub kind: u32,
}

impl LightData {
    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: position.to_array(),
            intensity,
            color: color.to_array(),
            kind: LightKind::Point as u32,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: direction.normalize_or_zero().to_array(),
            intensity,
            color: color.to_array(),
            kind: LightKind::Directional as u32,
        }
    }
}

/// 程序化球体，BLAS 中对应一个 AABB，求交在 intersection shader 中完成
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SphereData {
    pub center: [f32; 3],
    pub radius: f32,
    pub material_index: u32,
    pub _padding: [u32; 3],
}

impl SphereData {
    pub fn new(center: Vec3, radius: f32, material_index: u32) -> Self {
        Self {
            center: center.to_array(),
            radius,
            material_index,
            _padding: [0; 3],
        }
    }

    /// 对应的 AABB，和 sphere 数组的顺序一致
    #[inline]
    pub fn aabb(&self) -> [f32; 6] {
        rayce_gfx::raytracing::geometry::sphere_aabb(Vec3::from_array(self.center), self.radius)
    }
}

/// raygen 使用的 push constants
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RtPushConstants {
    /// 累积的帧数，相机变化时重置为 0
    pub frame_index: i32,
    /// 非 0 时和 accum image 中的历史结果混合
    pub accumulate: i32,
    pub light_count: i32,
    pub sphere_count: i32,
    pub max_depth: u32,
}

impl RtPushConstants {
    pub const SIZE: u32 = size_of::<Self>() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layout_sizes() {
        assert_eq!(size_of::<CameraData>(), 128);
        assert_eq!(size_of::<InstanceData>(), 144);
        assert_eq!(size_of::<MaterialData>(), 48);
        assert_eq!(size_of::<LightData>(), 32);
        assert_eq!(size_of::<SphereData>(), 32);
        assert_eq!(RtPushConstants::SIZE, 20);
    }

    #[test]
    fn test_camera_inverse() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        let camera = CameraData::new(view, proj);
        assert!((camera.view_inverse * view).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((camera.proj_inverse * proj).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        // 相机位置在 view 逆矩阵的平移分量上
        assert!(camera.view_inverse.w_axis.truncate().abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), 1e-5));
    }

    #[test]
    fn test_material_presets() {
        let m = MaterialData::metal(Vec3::new(0.8, 0.6, 0.2), 0.3);
        assert_eq!(m.kind, MaterialKind::Metal as u32);
        assert_eq!(m.base_color, [0.8, 0.6, 0.2, 1.0]);
        assert_eq!(m.texture_index, NO_TEXTURE);
        assert_eq!(MaterialData::lambertian(Vec3::ONE).with_texture(7).texture_index, 7);
        assert_eq!(MaterialData::dielectric(1.5).ior, 1.5);
        assert_eq!(MaterialData::emissive(Vec3::splat(4.0)).emission, [4.0; 3]);
    }

    #[test]
    fn test_sphere_aabb() {
        let sphere = SphereData::new(Vec3::new(1.0, 2.0, 3.0), 0.5, 0);
        assert_eq!(sphere.aabb(), [0.5, 1.5, 2.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_push_constant_bytes() {
        let pc = RtPushConstants {
            frame_index: 3,
            accumulate: 1,
            light_count: 2,
            sphere_count: 4,
            max_depth: 5,
        };
        let bytes = bytemuck::bytes_of(&pc);
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[16..20], &5u32.to_ne_bytes());
    }

    #[test]
    fn test_instance_inverse() {
        let model = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let instance = InstanceData::new(model, 2, 1);
        assert!((instance.model * instance.inv_model).abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert_eq!((instance.material_index, instance.geometry_index), (2, 1));
    }
}
