use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    context::GpuContext,
    descriptors::write::GfxWriteDescriptorSet,
    error::{GpuError, GpuResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

/// descriptor set layout 中的一个 binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingItem {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
    pub count: u32,
    pub flags: vk::DescriptorBindingFlags,
}

impl DescriptorBindingItem {
    #[inline]
    pub const fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            stage_flags,
            count,
            flags: vk::DescriptorBindingFlags::empty(),
        }
    }

    /// 固定长度的数组，允许部分元素未写入
    #[inline]
    pub const fn partially_bound(mut self) -> Self {
        self.flags = vk::DescriptorBindingFlags::from_raw(
            self.flags.as_raw() | vk::DescriptorBindingFlags::PARTIALLY_BOUND.as_raw(),
        );
        self
    }

    #[inline]
    pub fn is_variable_count(&self) -> bool {
        self.flags.contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
    }

    fn vk_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding {
            binding: self.binding,
            descriptor_type: self.descriptor_type,
            descriptor_count: self.count,
            stage_flags: self.stage_flags,
            ..Default::default()
        }
    }
}

/// 经过校验的 layout 描述
///
/// 如果带有 variable count binding，那么它一定是 binding 序号最大的那个，
/// 且它的 `count` 就是分配时允许的最大数量。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLayoutDesc {
    bindings: Vec<DescriptorBindingItem>,
    variable_count_capacity: u32,
}

impl DescriptorLayoutDesc {
    /// - `variable_count_capacity`: 大于 0 时，最后一个 binding 会被声明为 variable count，
    ///   数量上限即该值
    pub fn new(mut bindings: Vec<DescriptorBindingItem>, variable_count_capacity: u32) -> GpuResult<Self> {
        if let Some(dup) = bindings.iter().map(|b| b.binding).duplicates().next() {
            return Err(GpuError::InvalidDescriptorLayout(format!("binding {dup} is declared more than once")));
        }
        if let Some(b) = bindings.iter().find(|b| b.is_variable_count()) {
            return Err(GpuError::InvalidDescriptorLayout(format!(
                "binding {} sets VARIABLE_DESCRIPTOR_COUNT directly, pass a capacity instead",
                b.binding
            )));
        }

        if variable_count_capacity > 0 {
            let max_binding = bindings.iter().map(|b| b.binding).max();
            let Some(last) = bindings.last_mut() else {
                return Err(GpuError::InvalidDescriptorLayout(
                    "variable count capacity given for a layout without bindings".to_string(),
                ));
            };
            // Vulkan 要求 variable count binding 的序号在 layout 中最大
            if Some(last.binding) != max_binding {
                return Err(GpuError::InvalidDescriptorLayout(format!(
                    "variable count binding {} is not the highest binding number",
                    last.binding
                )));
            }
            last.count = variable_count_capacity;
            last.flags |=
                vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
        }

        Ok(Self {
            bindings,
            variable_count_capacity,
        })
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBindingItem] {
        &self.bindings
    }

    #[inline]
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBindingItem> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// 0 表示没有 variable count binding
    #[inline]
    pub fn variable_count_capacity(&self) -> u32 {
        self.variable_count_capacity
    }

    #[inline]
    pub fn variable_binding(&self) -> Option<&DescriptorBindingItem> {
        if self.variable_count_capacity == 0 { None } else { self.bindings.last() }
    }

    /// 分配 descriptor set 时，检查 variable binding 的实际数量
    pub fn check_variable_count(&self, count: u32) -> GpuResult<()> {
        match self.variable_binding() {
            Some(b) if count > self.variable_count_capacity => Err(GpuError::DescriptorCapacityExceeded {
                binding: b.binding,
                requested: count,
                capacity: self.variable_count_capacity,
            }),
            None if count > 0 => Err(GpuError::InvalidDescriptorLayout(format!(
                "variable count {count} requested for a layout without a variable count binding"
            ))),
            _ => Ok(()),
        }
    }

    /// 检查一组写入是否落在 binding 的范围内
    ///
    /// - `variable_count`: set 分配时为 variable binding 声明的数量
    pub fn validate_writes(&self, writes: &[GfxWriteDescriptorSet], variable_count: u32) -> GpuResult<()> {
        for write in writes {
            let Some(item) = self.binding(write.dst_binding) else {
                return Err(GpuError::InvalidDescriptorLayout(format!(
                    "write targets binding {} which is not in the layout",
                    write.dst_binding
                )));
            };
            if item.descriptor_type != write.descriptor_type {
                return Err(GpuError::InvalidDescriptorLayout(format!(
                    "binding {} expects {:?}, write uses {:?}",
                    item.binding, item.descriptor_type, write.descriptor_type
                )));
            }

            let capacity = if item.is_variable_count() { variable_count } else { item.count };
            let requested = write.dst_array_element + write.descriptor_count();
            if requested > capacity {
                return Err(GpuError::DescriptorCapacityExceeded {
                    binding: item.binding,
                    requested,
                    capacity,
                });
            }
        }
        Ok(())
    }

    pub fn vk_bindings(&self) -> (Vec<vk::DescriptorSetLayoutBinding<'static>>, Vec<vk::DescriptorBindingFlags>) {
        let layout_bindings = self.bindings.iter().map(DescriptorBindingItem::vk_binding).collect();
        let binding_flags = self.bindings.iter().map(|item| item.flags).collect();
        (layout_bindings, binding_flags)
    }
}

/// descriptor set layout，记录着创建它的描述
pub struct GfxDescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    desc: Rc<DescriptorLayoutDesc>,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl GfxDescriptorSetLayout {
    pub fn new(ctx: &GpuContext, desc: DescriptorLayoutDesc, name: impl AsRef<str>) -> GpuResult<Self> {
        let (bindings, binding_flags) = desc.vk_bindings();
        let mut bind_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings).push_next(&mut bind_flags_ci);

        let handle = unsafe { ctx.device().create_descriptor_set_layout(&create_info, None) }
            .vk_context("vkCreateDescriptorSetLayout")?;
        let layout = Self {
            handle,
            desc: Rc::new(desc),
            debug_name: name.as_ref().to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        ctx.device().set_debug_name(&layout, name);
        Ok(layout)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &Rc<DescriptorLayoutDesc> {
        &self.desc
    }

    pub fn destroy(mut self, ctx: &GpuContext) {
        unsafe { ctx.device().destroy_descriptor_set_layout(self.handle, None) };

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for GfxDescriptorSetLayout {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxDescriptorSetLayout `{}` dropped without destroy()", self.debug_name);
        }
    }
}

impl DebugType for GfxDescriptorSetLayout {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSetLayout"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::write::GfxDescriptorCursor;

    const STAGE: vk::ShaderStageFlags = vk::ShaderStageFlags::CLOSEST_HIT_KHR;

    fn bindless_desc(capacity: u32) -> DescriptorLayoutDesc {
        DescriptorLayoutDesc::new(
            vec![
                DescriptorBindingItem::new(0, vk::DescriptorType::STORAGE_BUFFER, STAGE, 1),
                DescriptorBindingItem::new(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, STAGE, 1),
            ],
            capacity,
        )
        .unwrap()
    }

    fn image_write(binding: u32, start: u32, count: usize) -> GfxWriteDescriptorSet {
        DescriptorBindingItem::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, STAGE, 1).write_image(
            vk::DescriptorSet::null(),
            start,
            vec![vk::DescriptorImageInfo::default(); count],
        )
    }

    #[test]
    fn test_variable_binding_gets_capacity_and_flags() {
        let desc = bindless_desc(16);
        let last = desc.variable_binding().unwrap();
        assert_eq!(last.binding, 1);
        assert_eq!(last.count, 16);
        assert!(last.flags.contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        assert!(last.is_variable_count());
        assert!(!desc.bindings()[0].is_variable_count());

        let (bindings, flags) = desc.vk_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].descriptor_count, 16);
        assert_eq!(flags[0], vk::DescriptorBindingFlags::empty());
    }

    #[test]
    fn test_no_capacity_means_fixed_layout() {
        let desc = bindless_desc(0);
        assert!(desc.variable_binding().is_none());
        assert_eq!(desc.bindings()[1].count, 1);
        assert!(desc.check_variable_count(0).is_ok());
        assert!(matches!(desc.check_variable_count(1), Err(GpuError::InvalidDescriptorLayout(_))));
    }

    #[test]
    fn test_variable_binding_must_be_highest() {
        let result = DescriptorLayoutDesc::new(
            vec![
                DescriptorBindingItem::new(3, vk::DescriptorType::STORAGE_BUFFER, STAGE, 1),
                DescriptorBindingItem::new(1, vk::DescriptorType::STORAGE_BUFFER, STAGE, 1),
            ],
            8,
        );
        assert!(matches!(result, Err(GpuError::InvalidDescriptorLayout(_))));

        let empty = DescriptorLayoutDesc::new(vec![], 8);
        assert!(matches!(empty, Err(GpuError::InvalidDescriptorLayout(_))));
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let result = DescriptorLayoutDesc::new(
            vec![
                DescriptorBindingItem::new(0, vk::DescriptorType::STORAGE_BUFFER, STAGE, 1),
                DescriptorBindingItem::new(0, vk::DescriptorType::UNIFORM_BUFFER, STAGE, 1),
            ],
            0,
        );
        assert!(matches!(result, Err(GpuError::InvalidDescriptorLayout(_))));
    }

    #[test]
    fn test_check_variable_count_at_capacity() {
        let desc = bindless_desc(4);
        assert!(desc.check_variable_count(4).is_ok());
        match desc.check_variable_count(5) {
            Err(GpuError::DescriptorCapacityExceeded {
                binding,
                requested,
                capacity,
            }) => {
                assert_eq!((binding, requested, capacity), (1, 5, 4));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_writes_against_variable_count() {
        let desc = bindless_desc(8);
        // set 分配时只声明了 4 个
        assert!(desc.validate_writes(&[image_write(1, 0, 4)], 4).is_ok());
        assert!(desc.validate_writes(&[image_write(1, 3, 1)], 4).is_ok());
        assert!(matches!(
            desc.validate_writes(&[image_write(1, 0, 5)], 4),
            Err(GpuError::DescriptorCapacityExceeded { requested: 5, capacity: 4, .. })
        ));
        assert!(matches!(
            desc.validate_writes(&[image_write(1, 4, 1)], 4),
            Err(GpuError::DescriptorCapacityExceeded { requested: 5, .. })
        ));
    }

    #[test]
    fn test_validate_writes_fixed_binding() {
        let desc = bindless_desc(8);
        let buffer_item = desc.bindings()[0];
        let ok = buffer_item.write_buffer(vk::DescriptorSet::null(), 0, vec![vk::DescriptorBufferInfo::default()]);
        assert!(desc.validate_writes(&[ok], 0).is_ok());

        let too_many =
            buffer_item.write_buffer(vk::DescriptorSet::null(), 0, vec![vk::DescriptorBufferInfo::default(); 2]);
        assert!(matches!(
            desc.validate_writes(&[too_many], 0),
            Err(GpuError::DescriptorCapacityExceeded { binding: 0, .. })
        ));

        assert!(matches!(
            desc.validate_writes(&[image_write(7, 0, 1)], 0),
            Err(GpuError::InvalidDescriptorLayout(_))
        ));
        // 类型不匹配
        assert!(matches!(
            desc.validate_writes(&[image_write(0, 0, 1)], 0),
            Err(GpuError::InvalidDescriptorLayout(_))
        ));
    }

    #[test]
    fn test_partially_bound_builder() {
        let item = DescriptorBindingItem::new(0, vk::DescriptorType::STORAGE_BUFFER, STAGE, 64).partially_bound();
        assert_eq!(item.flags, vk::DescriptorBindingFlags::PARTIALLY_BOUND);
        assert!(!item.is_variable_count());
    }
}
