use ash::vk;

use crate::commands::command_buffer::GfxCommandBuffer;

/// 一个 submit batch，持有 `vk::SubmitInfo2` 引用的数组
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[&GfxCommandBuffer]) -> Self {
        Self {
            command_buffers: commands
                .iter()
                .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd.vk_handle()))
                .collect(),
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default().command_buffer_infos(&self.command_buffers)
    }
}
