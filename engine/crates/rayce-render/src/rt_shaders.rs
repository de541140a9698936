use std::ffi::CStr;

use ash::vk;
use rayce_crate_tools::enumed_map;
use rayce_gfx::pipelines::shader::{ShaderGroupInfo, ShaderStageInfo};

use crate::config::RendererConfig;

/// shader stage 的静态描述，spv 路径在创建 pipeline 时根据配置解析
#[derive(Debug, Clone, Copy)]
pub struct RtStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
    /// 相对于 shader 目录，不带 `.spv`
    pub file: &'static str,
}

enumed_map!(pub RtShaderStage<RtStageDesc>: {
    RayGen: RtStageDesc {
        stage: vk::ShaderStageFlags::RAYGEN_KHR,
        entry_point: c"main",
        file: "rt/raytrace.rgen",
    },
    ClosestHit: RtStageDesc {
        stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        entry_point: c"main",
        file: "rt/raytrace.rchit",
    },
    SphereClosestHit: RtStageDesc {
        stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        entry_point: c"main",
        file: "rt/sphere.rchit",
    },
    SphereIntersection: RtStageDesc {
        stage: vk::ShaderStageFlags::INTERSECTION_KHR,
        entry_point: c"main",
        file: "rt/sphere.rint",
    },
    Miss: RtStageDesc {
        stage: vk::ShaderStageFlags::MISS_KHR,
        entry_point: c"main",
        file: "rt/raytrace.rmiss",
    },
    ShadowMiss: RtStageDesc {
        stage: vk::ShaderStageFlags::MISS_KHR,
        entry_point: c"main",
        file: "rt/shadow.rmiss",
    },
});

enumed_map!(pub RtShaderGroup<ShaderGroupInfo>: {
    RayGen: ShaderGroupInfo::general(RtShaderStage::RayGen.index()),
    TriangleHit: ShaderGroupInfo::triangles_hit(RtShaderStage::ClosestHit.index()),
    SphereHit: ShaderGroupInfo::procedural_hit(
        RtShaderStage::SphereIntersection.index(),
        RtShaderStage::SphereClosestHit.index(),
    ),
    Miss: ShaderGroupInfo::general(RtShaderStage::Miss.index()),
    ShadowMiss: ShaderGroupInfo::general(RtShaderStage::ShadowMiss.index()),
});

impl RtShaderGroup {
    /// SBT 中各个区域依次包含的 group
    ///
    /// hit 区域的顺序决定了 instance 的 `sbt_record_offset`：三角形为 0，球体为 1
    pub const RAYGEN_REGION: &'static [u32] = &[RtShaderGroup::RayGen.index() as u32];
    pub const HIT_REGION: &'static [u32] =
        &[RtShaderGroup::TriangleHit.index() as u32, RtShaderGroup::SphereHit.index() as u32];
    pub const MISS_REGION: &'static [u32] = &[RtShaderGroup::Miss.index() as u32, RtShaderGroup::ShadowMiss.index() as u32];

    pub const TRIANGLE_HIT_RECORD: u32 = 0;
    pub const SPHERE_HIT_RECORD: u32 = 1;

    pub fn infos() -> Vec<ShaderGroupInfo> {
        RtShaderGroup::array().to_vec()
    }
}

/// 按 stage 顺序解析出 spv 路径
pub fn rt_stage_infos(config: &RendererConfig) -> Vec<ShaderStageInfo> {
    RtShaderStage::iter()
        .map(|stage| stage.value())
        .map(|desc| ShaderStageInfo {
            stage: desc.stage,
            entry_point: desc.entry_point,
            path: config.shader_path(desc.file),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rayce_gfx::pipelines::{
        rt_pipeline::validate_shader_groups,
        sbt::{RtPipelineProps, SbtLayout},
    };

    use super::*;

    #[test]
    fn test_stage_count() {
        assert_eq!(RtShaderStage::COUNT, 6);
        assert_eq!(RtShaderGroup::COUNT, 5);
    }

    #[test]
    fn test_groups_match_stages() {
        let config = RendererConfig::default();
        let stages = rt_stage_infos(&config);
        assert!(validate_shader_groups(&stages, &RtShaderGroup::infos()).is_ok());
    }

    #[test]
    fn test_stage_paths_follow_config() {
        let config = RendererConfig {
            shader_dir: Some("/shaders".into()),
            ..Default::default()
        };
        let stages = rt_stage_infos(&config);
        assert_eq!(stages[RtShaderStage::Miss.index()].path(), std::path::Path::new("/shaders/rt/raytrace.rmiss.spv"));
        assert_eq!(stages[RtShaderStage::SphereIntersection.index()].stage, vk::ShaderStageFlags::INTERSECTION_KHR);
    }

    #[test]
    fn test_regions_cover_every_group_once() {
        let mut all: Vec<u32> = [RtShaderGroup::RAYGEN_REGION, RtShaderGroup::HIT_REGION, RtShaderGroup::MISS_REGION]
            .concat();
        all.sort_unstable();
        assert_eq!(all, (0..RtShaderGroup::COUNT as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_sbt_layout_for_groups() {
        let props = RtPipelineProps {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
        };
        let layout = SbtLayout::new(
            props,
            RtShaderGroup::RAYGEN_REGION,
            RtShaderGroup::HIT_REGION,
            RtShaderGroup::MISS_REGION,
        )
        .unwrap();
        assert_eq!(layout.required_group_count(), RtShaderGroup::COUNT as u32);
        let [raygen, hit, miss] = layout.regions();
        assert_eq!(raygen.offset, 0);
        assert_eq!(hit.offset % 64, 0);
        assert!(miss.offset - hit.offset >= 2 * props.aligned_handle_size());
        assert_eq!(hit.groups, vec![1, 2]);
    }

    #[test]
    fn test_sphere_hit_is_procedural() {
        let group = RtShaderGroup::SphereHit.value();
        assert_eq!(group.ty, vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP);
        assert_eq!(group.intersection, RtShaderStage::SphereIntersection.index() as u32);
    }
}
