use ash::vk;
use itertools::Itertools;

use crate::descriptors::layout::DescriptorBindingItem;

/// 一次 descriptor 写入，buffer / image / 加速结构三者只能设置其一
pub struct GfxWriteDescriptorSet {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
    pub acceleration_structures: Vec<vk::AccelerationStructureKHR>,
}

impl GfxWriteDescriptorSet {
    /// 写入的 descriptor 数量
    pub fn descriptor_count(&self) -> u32 {
        let mut descriptor_count = 0;
        let mut valid_count = 0;
        if !self.buffer_infos.is_empty() {
            descriptor_count = self.buffer_infos.len();
            valid_count += 1;
        }
        if !self.image_infos.is_empty() {
            descriptor_count = self.image_infos.len();
            valid_count += 1;
        }
        if !self.acceleration_structures.is_empty() {
            descriptor_count = self.acceleration_structures.len();
            valid_count += 1;
        }

        assert_eq!(
            valid_count, 1,
            "exactly one of buffer_infos, image_infos or acceleration_structures must be set (binding {})",
            self.dst_binding
        );
        descriptor_count as u32
    }

    fn to_vk_type(&self) -> vk::WriteDescriptorSet<'_> {
        vk::WriteDescriptorSet {
            dst_set: self.dst_set,
            dst_binding: self.dst_binding,
            dst_array_element: self.dst_array_element,
            descriptor_count: self.descriptor_count(),
            descriptor_type: self.descriptor_type,
            // 选择 buffer ptr 还是 image ptr，是由 descriptor type 控制的
            p_buffer_info: self.buffer_infos.as_ptr(),
            p_image_info: self.image_infos.as_ptr(),
            ..Default::default()
        }
    }

    /// 转换为 vk 结构体，加速结构需要额外挂上 `WriteDescriptorSetAccelerationStructureKHR`
    pub fn with_writes<R>(writes: &[Self], cbk: impl FnOnce(&[vk::WriteDescriptorSet]) -> R) -> R {
        let mut write_accs = writes
            .iter()
            .map(|w| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(&w.acceleration_structures)
            })
            .collect_vec();
        let vk_writes = writes
            .iter()
            .zip(write_accs.iter_mut())
            .map(|(w, write_acc)| {
                let vk_write = w.to_vk_type();
                if write_acc.acceleration_structure_count > 0 { vk_write.push_next(write_acc) } else { vk_write }
            })
            .collect_vec();
        cbk(&vk_writes)
    }
}

/// 通过 binding 描述来生成对应 binding 的写入
pub trait GfxDescriptorCursor {
    fn get_binding(&self) -> &DescriptorBindingItem;

    fn write_buffer(
        &self,
        dst_set: vk::DescriptorSet,
        start_array: u32,
        buffers: Vec<vk::DescriptorBufferInfo>,
    ) -> GfxWriteDescriptorSet {
        let item = self.get_binding();
        GfxWriteDescriptorSet {
            dst_set,
            dst_binding: item.binding,
            dst_array_element: start_array,
            descriptor_type: item.descriptor_type,
            buffer_infos: buffers,
            image_infos: vec![],
            acceleration_structures: vec![],
        }
    }

    fn write_image(
        &self,
        dst_set: vk::DescriptorSet,
        start_array: u32,
        images: Vec<vk::DescriptorImageInfo>,
    ) -> GfxWriteDescriptorSet {
        let item = self.get_binding();
        GfxWriteDescriptorSet {
            dst_set,
            dst_binding: item.binding,
            dst_array_element: start_array,
            descriptor_type: item.descriptor_type,
            buffer_infos: vec![],
            image_infos: images,
            acceleration_structures: vec![],
        }
    }

    fn write_tlas(
        &self,
        dst_set: vk::DescriptorSet,
        start_array: u32,
        tlas: Vec<vk::AccelerationStructureKHR>,
    ) -> GfxWriteDescriptorSet {
        let item = self.get_binding();
        GfxWriteDescriptorSet {
            dst_set,
            dst_binding: item.binding,
            dst_array_element: start_array,
            descriptor_type: item.descriptor_type,
            buffer_infos: vec![],
            image_infos: vec![],
            acceleration_structures: tlas,
        }
    }
}

impl GfxDescriptorCursor for DescriptorBindingItem {
    fn get_binding(&self) -> &DescriptorBindingItem {
        self
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn item(descriptor_type: vk::DescriptorType) -> DescriptorBindingItem {
        DescriptorBindingItem::new(2, descriptor_type, vk::ShaderStageFlags::RAYGEN_KHR, 4)
    }

    #[test]
    fn test_tlas_write_chains_extension() {
        let write = item(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR).write_tlas(
            vk::DescriptorSet::from_raw(7),
            0,
            vec![vk::AccelerationStructureKHR::from_raw(1)],
        );
        let count = GfxWriteDescriptorSet::with_writes(std::slice::from_ref(&write), |writes| {
            assert_eq!(writes.len(), 1);
            assert!(!writes[0].p_next.is_null());
            assert_eq!(writes[0].dst_binding, 2);
            writes[0].descriptor_count
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_buffer_write_has_no_extension() {
        let write = item(vk::DescriptorType::STORAGE_BUFFER).write_buffer(
            vk::DescriptorSet::null(),
            1,
            vec![vk::DescriptorBufferInfo::default(); 3],
        );
        GfxWriteDescriptorSet::with_writes(&[write], |writes| {
            assert!(writes[0].p_next.is_null());
            assert_eq!(writes[0].descriptor_count, 3);
            assert_eq!(writes[0].dst_array_element, 1);
        });
    }

    #[test]
    #[should_panic]
    fn test_empty_write_panics() {
        let write = item(vk::DescriptorType::STORAGE_BUFFER).write_buffer(vk::DescriptorSet::null(), 0, vec![]);
        write.descriptor_count();
    }
}
