//! 光追管线的 descriptor set 约定
//!
//! set / binding 编号必须和 shader 中的声明一致：
//!
//! | set | binding | 内容 |
//! |---|---|---|
//! | 0 | 0, 1 | bindless 顶点 / 索引 storage buffer |
//! | 1 | 0, 1, 2 | TLAS, accum image, output image |
//! | 2 | 0 | camera uniform |
//! | 3 | 0..=4 | bindless 贴图, instance / material / light / sphere buffer |

use ash::vk;
use rayce_gfx::descriptors::layout::DescriptorBindingItem;

use crate::config::RendererConfig;

/// 光追各个阶段都可以访问的 stage
pub const RT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::ANY_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::INTERSECTION_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw(),
);

pub const SET_COUNT: usize = 4;

/// 创建 layout 需要的参数：binding 列表与 variable count 容量
pub struct SetLayoutInfo {
    pub set: u32,
    pub name: &'static str,
    pub bindings: Vec<DescriptorBindingItem>,
    pub variable_count_capacity: u32,
}

/// set 0：逐帧输入的几何数据
///
/// 顶点数组是固定容量的 partially bound 数组，索引数组是真正的 variable count binding
pub struct GeometrySetBinding;

impl GeometrySetBinding {
    pub const SET: u32 = 0;

    pub const fn vertex_buffers(capacity: u32) -> DescriptorBindingItem {
        DescriptorBindingItem::new(0, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, capacity).partially_bound()
    }

    /// 数量由 layout 的 variable count 容量决定
    pub const fn index_buffers() -> DescriptorBindingItem {
        DescriptorBindingItem::new(1, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, 0)
    }

    pub fn layout_info(config: &RendererConfig) -> SetLayoutInfo {
        SetLayoutInfo {
            set: Self::SET,
            name: "rt-geometry-set-layout",
            bindings: vec![Self::vertex_buffers(config.max_geometries), Self::index_buffers()],
            variable_count_capacity: config.max_geometries,
        }
    }
}

/// set 1：所有帧共享的光追核心资源
pub struct RtCoreSetBinding;

impl RtCoreSetBinding {
    pub const SET: u32 = 1;

    pub const fn tlas() -> DescriptorBindingItem {
        DescriptorBindingItem::new(0, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, RT_STAGES, 1)
    }

    pub const fn accum_image() -> DescriptorBindingItem {
        DescriptorBindingItem::new(1, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::RAYGEN_KHR, 1)
    }

    pub const fn output_image() -> DescriptorBindingItem {
        DescriptorBindingItem::new(2, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::RAYGEN_KHR, 1)
    }

    pub fn layout_info() -> SetLayoutInfo {
        SetLayoutInfo {
            set: Self::SET,
            name: "rt-core-set-layout",
            bindings: vec![Self::tlas(), Self::accum_image(), Self::output_image()],
            variable_count_capacity: 0,
        }
    }
}

/// set 2：camera
pub struct CameraSetBinding;

impl CameraSetBinding {
    pub const SET: u32 = 2;

    pub const fn camera() -> DescriptorBindingItem {
        DescriptorBindingItem::new(0, vk::DescriptorType::UNIFORM_BUFFER, RT_STAGES, 1)
    }

    pub fn layout_info() -> SetLayoutInfo {
        SetLayoutInfo {
            set: Self::SET,
            name: "rt-camera-set-layout",
            bindings: vec![Self::camera()],
            variable_count_capacity: 0,
        }
    }
}

/// set 3：模型数据
///
/// 贴图位于 binding 0，不是序号最大的 binding，因此只能是固定容量的 partially bound 数组
pub struct ModelSetBinding;

impl ModelSetBinding {
    pub const SET: u32 = 3;

    pub const fn textures(capacity: u32) -> DescriptorBindingItem {
        DescriptorBindingItem::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, RT_STAGES, capacity)
            .partially_bound()
    }

    pub const fn instances() -> DescriptorBindingItem {
        DescriptorBindingItem::new(1, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, 1)
    }

    pub const fn materials() -> DescriptorBindingItem {
        DescriptorBindingItem::new(2, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, 1)
    }

    pub const fn lights() -> DescriptorBindingItem {
        DescriptorBindingItem::new(3, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, 1)
    }

    pub const fn spheres() -> DescriptorBindingItem {
        DescriptorBindingItem::new(4, vk::DescriptorType::STORAGE_BUFFER, RT_STAGES, 1)
    }

    pub fn layout_info(config: &RendererConfig) -> SetLayoutInfo {
        SetLayoutInfo {
            set: Self::SET,
            name: "rt-model-set-layout",
            bindings: vec![
                Self::textures(config.max_textures),
                Self::instances(),
                Self::materials(),
                Self::lights(),
                Self::spheres(),
            ],
            variable_count_capacity: 0,
        }
    }
}

/// 按 set 序号排列的 4 个 layout
pub fn rt_set_layout_infos(config: &RendererConfig) -> [SetLayoutInfo; SET_COUNT] {
    [
        GeometrySetBinding::layout_info(config),
        RtCoreSetBinding::layout_info(),
        CameraSetBinding::layout_info(),
        ModelSetBinding::layout_info(config),
    ]
}

/// raygen 可见的 push constant 范围
pub fn rt_push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
        .offset(0)
        .size(crate::scene_data::RtPushConstants::SIZE)
}

#[cfg(test)]
mod tests {
    use rayce_gfx::descriptors::layout::DescriptorLayoutDesc;

    use super::*;

    #[test]
    fn test_set_numbers_in_order() {
        let config = RendererConfig::default();
        let infos = rt_set_layout_infos(&config);
        for (idx, info) in infos.iter().enumerate() {
            assert_eq!(info.set as usize, idx);
        }
    }

    #[test]
    fn test_layouts_are_valid() {
        let config = RendererConfig::default();
        for info in rt_set_layout_infos(&config) {
            let name = info.name;
            assert!(DescriptorLayoutDesc::new(info.bindings, info.variable_count_capacity).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_geometry_set_variable_binding() {
        let config = RendererConfig {
            max_geometries: 64,
            ..Default::default()
        };
        let info = GeometrySetBinding::layout_info(&config);
        let desc = DescriptorLayoutDesc::new(info.bindings, info.variable_count_capacity).unwrap();
        let variable = desc.variable_binding().unwrap();
        assert_eq!(variable.binding, 1);
        assert_eq!(variable.count, 64);
        assert!(
            variable
                .flags
                .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
        );
        assert!(desc.check_variable_count(64).is_ok());
        assert!(desc.check_variable_count(65).is_err());
    }

    #[test]
    fn test_model_set_contract() {
        let config = RendererConfig {
            max_textures: 16,
            ..Default::default()
        };
        let info = ModelSetBinding::layout_info(&config);
        let bindings: Vec<u32> = info.bindings.iter().map(|b| b.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4]);
        assert_eq!(info.bindings[0].count, 16);
        assert!(info.bindings[0].flags.contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        assert!(!info.bindings[0].is_variable_count());
        assert_eq!(info.variable_count_capacity, 0);
    }

    #[test]
    fn test_core_set_contract() {
        assert_eq!(RtCoreSetBinding::tlas().binding, 0);
        assert_eq!(RtCoreSetBinding::tlas().descriptor_type, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(RtCoreSetBinding::accum_image().binding, 1);
        assert_eq!(RtCoreSetBinding::output_image().binding, 2);
        assert_eq!(CameraSetBinding::camera().descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_push_constant_range() {
        let range = rt_push_constant_range();
        assert_eq!(range.size, 20);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::RAYGEN_KHR);
    }
}
