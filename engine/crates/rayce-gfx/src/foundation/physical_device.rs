use std::{ffi::CStr, ptr::null_mut};

use ash::vk;
use itertools::Itertools;

use crate::error::{GpuError, GpuResult, VkResultExt};

/// 光追需要的 device extensions
pub(crate) fn required_device_exts() -> [&'static CStr; 3] {
    [
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
        ash::khr::deferred_host_operations::NAME,
    ]
}

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 当前 gpu 的 ray tracing 属性
    pub(crate) rt_pipeline_props: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,

    /// 当前 gpu 的加速结构属性
    pub(crate) acc_struct_props: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,

    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,

    /// graphics + compute + transfer 全能队列
    pub(crate) gfx_queue_family_index: u32,

    supports_ray_tracing: bool,
}

impl GfxPhysicalDevice {
    /// 选择一张支持光追的显卡
    ///
    /// 优先选择独立显卡，如果没有则选择第一个支持光追的显卡
    pub fn pick(instance: &ash::Instance, candidates: &[vk::PhysicalDevice]) -> GpuResult<Self> {
        let pdevices: Vec<_> = candidates
            .iter()
            .map(|pdevice| Self::new(*pdevice, instance))
            .collect::<GpuResult<_>>()?;

        pdevices
            .into_iter()
            .filter(|pdevice| {
                if !pdevice.supports_ray_tracing {
                    log::info!("skipping gpu {:?}: ray tracing extensions unavailable", pdevice.name());
                }
                pdevice.supports_ray_tracing
            })
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .ok_or_else(|| GpuError::NoSuitableDevice("no gpu supports the ray tracing extensions".to_string()))
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> GpuResult<Self> {
        unsafe {
            let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut acc_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let basic_props = {
                let mut props2 = vk::PhysicalDeviceProperties2::default()
                    .push_next(&mut rt_props)
                    .push_next(&mut acc_props);
                instance.get_physical_device_properties2(pdevice, &mut props2);
                props2.properties
            };
            rt_props.p_next = null_mut();
            acc_props.p_next = null_mut();

            let device_extensions = instance
                .enumerate_device_extension_properties(pdevice)
                .vk_context("vkEnumerateDeviceExtensionProperties")?;
            let supports_ray_tracing = required_device_exts().iter().all(|required| {
                device_extensions.iter().any(|ext| ext.extension_name_as_c_str() == Ok(*required))
            });

            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            let gfx_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
            let gfx_queue_family_index = queue_family_props
                .iter()
                .position(|props| props.queue_flags.contains(gfx_flags))
                .ok_or_else(|| GpuError::NoSuitableDevice("no graphics+compute+transfer queue family".to_string()))?
                as u32;

            let pdevice = Self {
                vk_handle: pdevice,
                basic_props,
                rt_pipeline_props: rt_props,
                acc_struct_props: acc_props,
                mem_props: instance.get_physical_device_memory_properties(pdevice),
                gfx_queue_family_index,
                supports_ray_tracing,
            };
            log::info!(
                "found gpu: {:?} ({:?}), ray tracing: {}",
                pdevice.name(),
                pdevice.basic_props.device_type,
                supports_ray_tracing
            );
            Ok(pdevice)
        }
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn name(&self) -> String {
        self.basic_props.device_name_as_c_str().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        &self.rt_pipeline_props
    }

    #[inline]
    pub fn acc_struct_props(&self) -> &vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static> {
        &self.acc_struct_props
    }

    #[inline]
    pub fn mem_props(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }
}
