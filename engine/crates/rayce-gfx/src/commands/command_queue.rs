use ash::vk;

use crate::{
    commands::submit_info::GfxSubmitInfo,
    error::{GpuResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

pub struct GfxCommandQueue {
    handle: vk::Queue,
    queue_family_index: u32,
}

impl GfxCommandQueue {
    pub fn new(device: &GfxDevice, queue_family_index: u32, queue_index: u32, debug_name: &str) -> Self {
        let handle = unsafe { device.get_device_queue(queue_family_index, queue_index) };
        let queue = Self {
            handle,
            queue_family_index,
        };
        device.set_debug_name(&queue, debug_name);
        queue
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn submit(&self, device: &GfxDevice, batches: &[GfxSubmitInfo], fence: Option<vk::Fence>) -> GpuResult<()> {
        let batches = batches.iter().map(GfxSubmitInfo::submit_info).collect::<Vec<_>>();
        unsafe { device.queue_submit2(self.handle, &batches, fence.unwrap_or_default()) }.vk_context("vkQueueSubmit2")
    }

    pub fn wait_idle(&self, device: &GfxDevice) -> GpuResult<()> {
        unsafe { device.queue_wait_idle(self.handle) }.vk_context("vkQueueWaitIdle")
    }
}

impl DebugType for GfxCommandQueue {
    fn debug_type_name() -> &'static str {
        "GfxCommandQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
