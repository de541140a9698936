use ash::vk;

use crate::{
    error::{GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue_family_index: u32,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl GfxCommandPool {
    pub fn new(
        device: &GfxDevice,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> GpuResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index).flags(flags);
        let handle = unsafe { device.create_command_pool(&pool_ci, None) }.vk_context("vkCreateCommandPool")?;

        let pool = Self {
            handle,
            queue_family_index,

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        device.set_debug_name(&pool, debug_name);
        Ok(pool)
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// 销毁 pool 会同时释放从中分配的所有 command buffer
    pub fn destroy(mut self, device: &GfxDevice) {
        unsafe { device.destroy_command_pool(self.handle, None) };
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.destroyed {
            log::error!("GfxCommandPool {:?} dropped without destroy()", self.handle);
        }
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
