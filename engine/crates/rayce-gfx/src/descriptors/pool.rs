use std::collections::BTreeMap;

use ash::vk;

use crate::{
    context::GpuContext,
    descriptors::layout::DescriptorLayoutDesc,
    error::{GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

/// 描述符池，从中分配的 descriptor set 随 pool 一起释放
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl GfxDescriptorPool {
    pub fn new(
        ctx: &GpuContext,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        name: impl AsRef<str>,
    ) -> GpuResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default().flags(flags).max_sets(max_sets).pool_sizes(pool_sizes);
        let handle =
            unsafe { ctx.device().create_descriptor_pool(&create_info, None) }.vk_context("vkCreateDescriptorPool")?;

        let pool = Self {
            handle,
            debug_name: name.as_ref().to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&pool, name);
        Ok(pool)
    }

    /// 根据若干 layout 计算 pool 需要的容量：每个 layout 分配 `sets_per_layout` 个 set
    pub fn pool_sizes_for(descs: &[&DescriptorLayoutDesc], sets_per_layout: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: BTreeMap<i32, u32> = BTreeMap::new();
        for binding in descs.iter().flat_map(|desc| desc.bindings()) {
            *sizes.entry(binding.descriptor_type.as_raw()).or_default() += binding.count * sets_per_layout;
        }
        sizes
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty: vk::DescriptorType::from_raw(ty),
                descriptor_count,
            })
            .collect()
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        log::debug!("destroy descriptor pool `{}`", self.debug_name);
        unsafe { ctx.device().destroy_descriptor_pool(self.handle, None) };

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for GfxDescriptorPool {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxDescriptorPool `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::layout::DescriptorBindingItem;

    #[test]
    fn test_pool_sizes_aggregate_by_type() {
        let stage = vk::ShaderStageFlags::RAYGEN_KHR;
        let a = DescriptorLayoutDesc::new(
            vec![
                DescriptorBindingItem::new(0, vk::DescriptorType::STORAGE_BUFFER, stage, 2),
                DescriptorBindingItem::new(1, vk::DescriptorType::UNIFORM_BUFFER, stage, 1),
            ],
            0,
        )
        .unwrap();
        let b = DescriptorLayoutDesc::new(
            vec![
                DescriptorBindingItem::new(0, vk::DescriptorType::UNIFORM_BUFFER, stage, 1),
                DescriptorBindingItem::new(1, vk::DescriptorType::STORAGE_BUFFER, stage, 1),
            ],
            10,
        )
        .unwrap();

        let sizes = GfxDescriptorPool::pool_sizes_for(&[&a, &b], 3);
        let find = |ty: vk::DescriptorType| sizes.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count);
        assert_eq!(sizes.len(), 2);
        // variable binding 按容量计入
        assert_eq!(find(vk::DescriptorType::STORAGE_BUFFER), Some((2 + 10) * 3));
        assert_eq!(find(vk::DescriptorType::UNIFORM_BUFFER), Some(2 * 3));
    }
}
