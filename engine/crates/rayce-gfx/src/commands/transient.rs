use ash::vk;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, command_queue::GfxCommandQueue,
        submit_info::GfxSubmitInfo,
    },
    error::GpuResult,
    foundation::device::GfxDevice,
};

/// 临时 GPU 工作（staging 上传、加速结构构建、布局转换）的提交策略
///
/// 约定：`submit_transient` 返回时，录制的命令已经在 GPU 上执行完毕，
/// 调用方可以立刻销毁 scratch / staging buffer。
/// 需要流水线化时可以实现一个基于 fence 或 timeline semaphore 的版本替换默认实现，
/// 构建器的外部接口保持不变。
pub trait TransientSubmitter {
    fn submit_transient(
        &self,
        device: &GfxDevice,
        queue: &GfxCommandQueue,
        pool: &GfxCommandPool,
        name: &str,
        record: &mut dyn FnMut(&GfxCommandBuffer<'_>),
    ) -> GpuResult<()>;
}

/// 默认策略：录制 → 提交 → 等待队列空闲 → 释放 command buffer
#[derive(Default)]
pub struct ImmediateSubmitter;

impl TransientSubmitter for ImmediateSubmitter {
    fn submit_transient(
        &self,
        device: &GfxDevice,
        queue: &GfxCommandQueue,
        pool: &GfxCommandPool,
        name: &str,
        record: &mut dyn FnMut(&GfxCommandBuffer<'_>),
    ) -> GpuResult<()> {
        let cmd = GfxCommandBuffer::allocate(device, pool, name)?;

        let result = (|| {
            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
            record(&cmd);
            cmd.end()?;
            queue.submit(device, &[GfxSubmitInfo::new(&[&cmd])], None)?;
            queue.wait_idle(device)
        })();

        cmd.free();
        if let Err(e) = &result {
            log::error!("transient submit `{}` failed: {}", name, e);
        }
        result
    }
}
