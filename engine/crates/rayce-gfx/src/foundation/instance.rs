use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GpuError, GpuResult, VkResultExt},
    foundation::debug_messenger::GfxDebugMsger,
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    pub(crate) ash_instance: ash::Instance,

    /// 是否开启了 debug utils 扩展，决定了 debug name 和 label 是否可用
    pub(crate) debug_utils_enabled: bool,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `enable_validation` 为 true 时会尝试开启 validation layer 和 debug utils；
    /// 如果系统中没有安装 validation layer，只打印警告。
    pub fn new(vk_entry: &ash::Entry, app_name: &str, enable_validation: bool) -> GpuResult<Self> {
        let app_name = CString::new(app_name).unwrap_or_else(|_| c"rayce".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"rayce")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let supported_exts = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .vk_context("vkEnumerateInstanceExtensionProperties")?;
        let debug_utils_enabled = enable_validation
            && supported_exts
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(vk::EXT_DEBUG_UTILS_NAME));

        let mut enabled_exts: Vec<*const c_char> = Vec::new();
        if debug_utils_enabled {
            enabled_exts.push(vk::EXT_DEBUG_UTILS_NAME.as_ptr());
        }

        let mut enabled_layers: Vec<*const c_char> = Vec::new();
        if enable_validation {
            let layers = unsafe { vk_entry.enumerate_instance_layer_properties() }
                .vk_context("vkEnumerateInstanceLayerProperties")?;
            if layers.iter().any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER)) {
                enabled_layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            }
        }

        log::info!(
            "instance extensions: [{}], layers: [{}]",
            enabled_exts.iter().map(|p| unsafe { CStr::from_ptr(*p) }.to_string_lossy()).join(", "),
            enabled_layers.iter().map(|p| unsafe { CStr::from_ptr(*p) }.to_string_lossy()).join(", "),
        );

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_exts)
            .enabled_layer_names(&enabled_layers);

        // 让 instance 的创建和销毁过程也能输出 validation 信息
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        if debug_utils_enabled {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.vk_context("vkCreateInstance")?;

        Ok(Self {
            ash_instance,
            debug_utils_enabled,
        })
    }

    pub fn destroy(self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }

    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn debug_utils_enabled(&self) -> bool {
        self.debug_utils_enabled
    }

    /// 枚举所有物理设备
    pub fn enumerate_physical_devices(&self) -> GpuResult<Vec<vk::PhysicalDevice>> {
        let pdevices =
            unsafe { self.ash_instance.enumerate_physical_devices() }.vk_context("vkEnumeratePhysicalDevices")?;
        if pdevices.is_empty() {
            return Err(GpuError::NoSuitableDevice("no Vulkan physical device found".to_string()));
        }
        Ok(pdevices)
    }
}
