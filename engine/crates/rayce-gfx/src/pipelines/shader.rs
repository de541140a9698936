use std::{
    collections::{HashMap, hash_map::Entry},
    ffi::CStr,
    path::{Path, PathBuf},
};

use ash::vk;

use crate::{
    context::GpuContext,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct ShaderModule {
    handle: vk::ShaderModule,
    path: PathBuf,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl ShaderModule {
    /// # param
    /// * path - spv shader 文件路径
    pub fn new(ctx: &GpuContext, path: &Path) -> GpuResult<Self> {
        let shader_code = std::fs::File::open(path).and_then(|mut file| ash::util::read_spv(&mut file)).map_err(
            |source| GpuError::ShaderLoad {
                path: path.to_path_buf(),
                source,
            },
        )?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let handle = unsafe { ctx.device().create_shader_module(&shader_module_info, None) }
            .vk_context("vkCreateShaderModule")?;

        let shader_module = Self {
            handle,
            path: path.to_path_buf(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&shader_module, path.to_string_lossy());
        log::debug!("load shader module {}", path.display());
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        unsafe { ctx.device().destroy_shader_module(self.handle, None) };

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("ShaderModule `{}` dropped without destroy()", self.path.display());
        }
    }
}

impl DebugType for ShaderModule {
    fn debug_type_name() -> &'static str {
        "ShaderModule"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// 可以存放多个 ShaderModule，使用路径进行索引
///
/// 同一个 spv 里通常有多个入口，多个 stage 共用一个 module
#[derive(Default)]
pub struct ShaderModuleCache {
    shader_modules: HashMap<PathBuf, ShaderModule>,
}

impl ShaderModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&mut self, ctx: &GpuContext, path: &Path) -> GpuResult<&ShaderModule> {
        match self.shader_modules.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(ShaderModule::new(ctx, path)?)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shader_modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shader_modules.is_empty()
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        self.shader_modules.drain().for_each(|(_, module)| module.destroy(ctx));
    }
}

#[derive(Clone, Debug)]
pub struct ShaderStageInfo {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
    pub path: PathBuf,
}

impl ShaderStageInfo {
    #[inline]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

/// 用于 RayTracing Pipeline 的创建
///
/// 各个字段是 shader stage 数组中的下标，不使用的填 `SHADER_UNUSED_KHR`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderGroupInfo {
    pub ty: vk::RayTracingShaderGroupTypeKHR,
    pub general: u32,
    pub closest_hit: u32,
    pub any_hit: u32,
    pub intersection: u32,
}

impl ShaderGroupInfo {
    pub const fn unused() -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::GENERAL,
            general: vk::SHADER_UNUSED_KHR,
            closest_hit: vk::SHADER_UNUSED_KHR,
            any_hit: vk::SHADER_UNUSED_KHR,
            intersection: vk::SHADER_UNUSED_KHR,
        }
    }

    /// raygen / miss / callable
    pub const fn general(stage: usize) -> Self {
        Self {
            general: stage as u32,
            ..Self::unused()
        }
    }

    pub const fn triangles_hit(closest_hit: usize) -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
            closest_hit: closest_hit as u32,
            ..Self::unused()
        }
    }

    pub const fn procedural_hit(intersection: usize, closest_hit: usize) -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP,
            closest_hit: closest_hit as u32,
            intersection: intersection as u32,
            ..Self::unused()
        }
    }

    pub const fn with_any_hit(mut self, any_hit: usize) -> Self {
        self.any_hit = any_hit as u32;
        self
    }

    /// 引用到的 stage 下标
    pub fn stage_indices(&self) -> impl Iterator<Item = u32> {
        [self.general, self.closest_hit, self.any_hit, self.intersection]
            .into_iter()
            .filter(|idx| *idx != vk::SHADER_UNUSED_KHR)
    }

    pub fn to_vk(&self) -> vk::RayTracingShaderGroupCreateInfoKHR<'static> {
        vk::RayTracingShaderGroupCreateInfoKHR {
            ty: self.ty,
            general_shader: self.general,
            any_hit_shader: self.any_hit,
            closest_hit_shader: self.closest_hit,
            intersection_shader: self.intersection,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_constructors() {
        let general = ShaderGroupInfo::general(0);
        assert_eq!(general.ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(general.stage_indices().collect::<Vec<_>>(), vec![0]);

        let tri = ShaderGroupInfo::triangles_hit(2).with_any_hit(3);
        assert_eq!(tri.ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(tri.stage_indices().collect::<Vec<_>>(), vec![2, 3]);

        let proc = ShaderGroupInfo::procedural_hit(4, 1);
        let vk_group = proc.to_vk();
        assert_eq!(vk_group.ty, vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP);
        assert_eq!(vk_group.intersection_shader, 4);
        assert_eq!(vk_group.closest_hit_shader, 1);
        assert_eq!(vk_group.general_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(vk_group.any_hit_shader, vk::SHADER_UNUSED_KHR);
    }
}
