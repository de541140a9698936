use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    context::GpuContext,
    descriptors::{
        layout::{DescriptorBindingItem, DescriptorLayoutDesc, GfxDescriptorSetLayout},
        pool::GfxDescriptorPool,
        write::GfxWriteDescriptorSet,
    },
    error::{GpuError, GpuResult, VkResultExt},
};

slotmap::new_key_type! {
    pub struct DescriptorLayoutHandle;
}

/// 从 pool 中分配的 descriptor set
///
/// 随 pool 一起释放，不需要单独销毁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxDescriptorSet {
    handle: vk::DescriptorSet,
    layout: DescriptorLayoutHandle,
    /// variable binding 实际使用的数量
    variable_count: u32,
}

impl GfxDescriptorSet {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> DescriptorLayoutHandle {
        self.layout
    }

    #[inline]
    pub fn variable_count(&self) -> u32 {
        self.variable_count
    }
}

/// 所有 descriptor set layout 的注册表
///
/// layout 通过 handle 引用，handle 失效后访问会得到 `InvalidDescriptorLayout`
#[derive(Default)]
pub struct DescriptorLayoutRegistry {
    layouts: SlotMap<DescriptorLayoutHandle, GfxDescriptorSetLayout>,
}

impl DescriptorLayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建 layout
    ///
    /// - `variable_count_capacity`: 0 表示没有 bindless binding；否则最后一个 binding 为 variable count
    pub fn create_layout(
        &mut self,
        ctx: &GpuContext,
        bindings: Vec<DescriptorBindingItem>,
        variable_count_capacity: u32,
        name: impl AsRef<str>,
    ) -> GpuResult<DescriptorLayoutHandle> {
        let desc = DescriptorLayoutDesc::new(bindings, variable_count_capacity)?;
        log::debug!(
            "create descriptor layout `{}`: {} bindings, variable capacity {}",
            name.as_ref(),
            desc.bindings().len(),
            variable_count_capacity
        );
        let layout = GfxDescriptorSetLayout::new(ctx, desc, name)?;
        Ok(self.layouts.insert(layout))
    }

    #[inline]
    pub fn get(&self, handle: DescriptorLayoutHandle) -> Option<&GfxDescriptorSetLayout> {
        self.layouts.get(handle)
    }

    fn layout(&self, handle: DescriptorLayoutHandle) -> GpuResult<&GfxDescriptorSetLayout> {
        self.layouts
            .get(handle)
            .ok_or_else(|| GpuError::InvalidDescriptorLayout(format!("unknown layout handle {handle:?}")))
    }

    /// 按顺序取出 vk handle，用于创建 pipeline layout
    pub fn vk_layouts(&self, handles: &[DescriptorLayoutHandle]) -> GpuResult<Vec<vk::DescriptorSetLayout>> {
        handles.iter().map(|h| self.layout(*h).map(GfxDescriptorSetLayout::handle)).collect()
    }

    /// 从 pool 中分配 `count` 个 set
    ///
    /// - `variable_count`: 每个 set 的 variable binding 实际使用的数量，不能超过 layout 的容量；
    ///   layout 没有 variable binding 时必须为 0
    pub fn allocate_sets(
        &self,
        ctx: &GpuContext,
        pool: &GfxDescriptorPool,
        handle: DescriptorLayoutHandle,
        count: u32,
        variable_count: u32,
        name: impl AsRef<str>,
    ) -> GpuResult<Vec<GfxDescriptorSet>> {
        let layout = self.layout(handle)?;
        let desc = layout.desc();
        desc.check_variable_count(variable_count)?;

        let set_layouts = vec![layout.handle(); count as usize];
        let variable_counts = vec![variable_count; count as usize];
        let mut variable_ci =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&variable_counts);

        let mut alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool.handle()).set_layouts(&set_layouts);
        if desc.variable_binding().is_some() {
            alloc_info = alloc_info.push_next(&mut variable_ci);
        }

        let handles = unsafe { ctx.device().allocate_descriptor_sets(&alloc_info) }
            .vk_context("vkAllocateDescriptorSets")?;
        let name = name.as_ref();
        Ok(handles
            .into_iter()
            .enumerate()
            .map(|(idx, set)| {
                ctx.device().set_object_debug_name(set, format!("{name}-{idx}"));
                GfxDescriptorSet {
                    handle: set,
                    layout: handle,
                    variable_count,
                }
            })
            .collect_vec())
    }

    /// 批量写入一个 set
    ///
    /// 写入之前会先整体校验，任何一条不合法都不会写入
    pub fn update_set(
        &self,
        ctx: &GpuContext,
        set: &GfxDescriptorSet,
        writes: &[GfxWriteDescriptorSet],
    ) -> GpuResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let layout = self.layout(set.layout)?;
        if let Some(w) = writes.iter().find(|w| w.dst_set != set.handle) {
            return Err(GpuError::InvalidDescriptorLayout(format!(
                "write to binding {} targets a different descriptor set",
                w.dst_binding
            )));
        }
        layout.desc().validate_writes(writes, set.variable_count)?;

        GfxWriteDescriptorSet::with_writes(writes, |vk_writes| unsafe {
            ctx.device().update_descriptor_sets(vk_writes, &[]);
        });
        Ok(())
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        for (_, layout) in self.layouts.drain() {
            layout.destroy(ctx);
        }
    }
}
