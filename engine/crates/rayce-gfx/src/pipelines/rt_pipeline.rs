use ash::vk;
use itertools::Itertools;

use crate::{
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    pipelines::shader::{ShaderGroupInfo, ShaderModuleCache, ShaderStageInfo},
};

pub struct GfxRtPipelineCreateInfo<'a> {
    pub stages: &'a [ShaderStageInfo],
    pub groups: &'a [ShaderGroupInfo],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    /// 这个仅仅是用来分配栈内存的，并不会在超过递归深度后让调用被丢弃，
    /// 需要在 shader 中手动跟踪递归深度
    pub max_recursion_depth: u32,
}

/// 检查 shader group 引用的 stage 是否存在，且类型和 group 的角色一致
pub fn validate_shader_groups(stages: &[ShaderStageInfo], groups: &[ShaderGroupInfo]) -> GpuResult<()> {
    let fail = |group_idx: usize, reason: String| GpuError::PipelineCreation {
        stage: "shader groups",
        reason: format!("group {group_idx}: {reason}"),
    };
    let check_slot = |group_idx: usize, slot: u32, allowed: vk::ShaderStageFlags, role: &str| {
        if slot == vk::SHADER_UNUSED_KHR {
            return Ok(());
        }
        let Some(stage) = stages.get(slot as usize) else {
            return Err(fail(group_idx, format!("{role} references missing stage {slot}")));
        };
        if !allowed.contains(stage.stage) {
            return Err(fail(group_idx, format!("{role} stage {slot} is {:?}", stage.stage)));
        }
        Ok(())
    };

    for (idx, group) in groups.iter().enumerate() {
        match group.ty {
            vk::RayTracingShaderGroupTypeKHR::GENERAL => {
                if group.general == vk::SHADER_UNUSED_KHR {
                    return Err(fail(idx, "general group without a general stage".to_string()));
                }
                check_slot(
                    idx,
                    group.general,
                    vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::MISS_KHR | vk::ShaderStageFlags::CALLABLE_KHR,
                    "general",
                )?;
                if group.closest_hit != vk::SHADER_UNUSED_KHR
                    || group.any_hit != vk::SHADER_UNUSED_KHR
                    || group.intersection != vk::SHADER_UNUSED_KHR
                {
                    return Err(fail(idx, "general group must not reference hit stages".to_string()));
                }
            }
            vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
            | vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP => {
                let procedural = group.ty == vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP;
                if group.general != vk::SHADER_UNUSED_KHR {
                    return Err(fail(idx, "hit group must not reference a general stage".to_string()));
                }
                if procedural == (group.intersection == vk::SHADER_UNUSED_KHR) {
                    return Err(fail(
                        idx,
                        "procedural hit groups need an intersection stage, triangle hit groups must not have one"
                            .to_string(),
                    ));
                }
                check_slot(idx, group.closest_hit, vk::ShaderStageFlags::CLOSEST_HIT_KHR, "closest hit")?;
                check_slot(idx, group.any_hit, vk::ShaderStageFlags::ANY_HIT_KHR, "any hit")?;
                check_slot(idx, group.intersection, vk::ShaderStageFlags::INTERSECTION_KHR, "intersection")?;
            }
            other => return Err(fail(idx, format!("unknown group type {other:?}"))),
        }
    }
    Ok(())
}

/// 光追管线以及它的 pipeline layout
pub struct GfxRtPipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    group_count: u32,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl GfxRtPipeline {
    pub fn new(ctx: &GpuContext, create_info: &GfxRtPipelineCreateInfo, name: impl AsRef<str>) -> GpuResult<Self> {
        let name = name.as_ref();
        validate_shader_groups(create_info.stages, create_info.groups)?;

        let max_depth = ctx.rt_pipeline_props().max_ray_recursion_depth;
        if create_info.max_recursion_depth > max_depth {
            return Err(GpuError::PipelineCreation {
                stage: "recursion depth",
                reason: format!("requested {}, device supports {}", create_info.max_recursion_depth, max_depth),
            });
        }

        // 同一个 spv 文件只加载一次，pipeline 创建完成后即可销毁
        let mut shader_module_cache = ShaderModuleCache::new();
        let result = Self::create_with_modules(ctx, create_info, &mut shader_module_cache, name);
        shader_module_cache.destroy(ctx);
        let (pipeline, pipeline_layout) = result?;

        log::info!(
            "create ray tracing pipeline `{}`: {} stages, {} groups, recursion depth {}",
            name,
            create_info.stages.len(),
            create_info.groups.len(),
            create_info.max_recursion_depth
        );
        Ok(Self {
            pipeline,
            pipeline_layout,
            group_count: create_info.groups.len() as u32,
            debug_name: name.to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }

    fn create_with_modules(
        ctx: &GpuContext,
        create_info: &GfxRtPipelineCreateInfo,
        shader_module_cache: &mut ShaderModuleCache,
        name: &str,
    ) -> GpuResult<(vk::Pipeline, vk::PipelineLayout)> {
        let mut modules = Vec::with_capacity(create_info.stages.len());
        for stage in create_info.stages {
            let module = shader_module_cache.get_or_load(ctx, stage.path()).map_err(|e| e.into_pipeline("shader modules"))?;
            modules.push(module.handle());
        }
        let stage_infos = create_info
            .stages
            .iter()
            .zip(modules)
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default().module(module).stage(stage.stage).name(stage.entry_point)
            })
            .collect_vec();
        let shader_groups = create_info.groups.iter().map(ShaderGroupInfo::to_vk).collect_vec();

        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(create_info.set_layouts)
            .push_constant_ranges(create_info.push_constant_ranges);
        let pipeline_layout = unsafe { ctx.device().create_pipeline_layout(&pipeline_layout_ci, None) }
            .vk_context("vkCreatePipelineLayout")
            .map_err(|e| e.into_pipeline("pipeline layout"))?;
        ctx.device().set_object_debug_name(pipeline_layout, format!("{name}-layout"));

        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&shader_groups)
            .layout(pipeline_layout)
            .max_pipeline_ray_recursion_depth(create_info.max_recursion_depth);

        let pipeline = unsafe {
            ctx.device().ray_tracing_pipeline().create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        }
        .map_err(|(_, result)| result)
        .vk_context("vkCreateRayTracingPipelinesKHR")
        .map_err(|e| e.into_pipeline("pipeline"))
        .and_then(|pipelines| {
            pipelines.into_iter().next().ok_or_else(|| GpuError::PipelineCreation {
                stage: "pipeline",
                reason: "driver returned no pipeline".to_string(),
            })
        });

        match pipeline {
            Ok(pipeline) => {
                ctx.device().set_object_debug_name(pipeline, name);
                Ok((pipeline, pipeline_layout))
            }
            Err(e) => {
                unsafe { ctx.device().destroy_pipeline_layout(pipeline_layout, None) };
                Err(e)
            }
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        unsafe {
            ctx.device().destroy_pipeline(self.pipeline, None);
            ctx.device().destroy_pipeline_layout(self.pipeline_layout, None);
        }

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for GfxRtPipeline {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxRtPipeline `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for GfxRtPipeline {
    fn debug_type_name() -> &'static str {
        "GfxRtPipeline"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn stage(stage: vk::ShaderStageFlags) -> ShaderStageInfo {
        ShaderStageInfo {
            stage,
            entry_point: c"main",
            path: PathBuf::from("rt.spv"),
        }
    }

    fn stages() -> Vec<ShaderStageInfo> {
        vec![
            stage(vk::ShaderStageFlags::RAYGEN_KHR),
            stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR),
            stage(vk::ShaderStageFlags::INTERSECTION_KHR),
            stage(vk::ShaderStageFlags::MISS_KHR),
        ]
    }

    #[test]
    fn test_valid_groups() {
        let groups = [
            ShaderGroupInfo::general(0),
            ShaderGroupInfo::triangles_hit(1),
            ShaderGroupInfo::procedural_hit(2, 1),
            ShaderGroupInfo::general(3),
        ];
        assert!(validate_shader_groups(&stages(), &groups).is_ok());
    }

    #[test]
    fn test_group_referencing_missing_stage() {
        let groups = [ShaderGroupInfo::general(9)];
        assert!(matches!(
            validate_shader_groups(&stages(), &groups),
            Err(GpuError::PipelineCreation { stage: "shader groups", .. })
        ));
    }

    #[test]
    fn test_group_role_mismatch() {
        // closest hit 当作 general 使用
        assert!(validate_shader_groups(&stages(), &[ShaderGroupInfo::general(1)]).is_err());
        // 三角形 hit group 带 intersection
        let tri_with_isect = ShaderGroupInfo {
            intersection: 2,
            ..ShaderGroupInfo::triangles_hit(1)
        };
        assert!(validate_shader_groups(&stages(), &[tri_with_isect]).is_err());
        // procedural 没有 intersection
        let proc_without_isect = ShaderGroupInfo {
            intersection: vk::SHADER_UNUSED_KHR,
            ..ShaderGroupInfo::procedural_hit(2, 1)
        };
        assert!(validate_shader_groups(&stages(), &[proc_without_isect]).is_err());
        // intersection 指向 miss stage
        assert!(validate_shader_groups(&stages(), &[ShaderGroupInfo::procedural_hit(3, 1)]).is_err());
    }
}
