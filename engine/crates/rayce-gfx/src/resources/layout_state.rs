use ash::vk;

use crate::error::{GpuError, GpuResult};

/// 一次布局转换需要的同步参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 支持的布局转换
///
/// 只覆盖渲染器实际用到的几种，不是通用的 barrier 矩阵
pub fn supported_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<LayoutTransition> {
    use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};

    let (src_stage, src_access, dst_stage, dst_access) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (S::TOP_OF_PIPE, A::NONE, S::TRANSFER, A::TRANSFER_WRITE),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_WRITE,
            S::FRAGMENT_SHADER | S::RAY_TRACING_SHADER_KHR,
            A::SHADER_READ,
        ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::NONE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            S::TOP_OF_PIPE,
            A::NONE,
            S::RAY_TRACING_SHADER_KHR | S::TRANSFER,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE | A::TRANSFER_READ,
        ),
        _ => return None,
    };

    Some(LayoutTransition {
        old_layout: old,
        new_layout: new,
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    })
}

/// image 当前所处布局的状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayoutState {
    current: vk::ImageLayout,
}

impl Default for ImageLayoutState {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLayoutState {
    /// 新创建的 image 总是 UNDEFINED
    pub fn new() -> Self {
        Self {
            current: vk::ImageLayout::UNDEFINED,
        }
    }

    #[inline]
    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    /// 转换到 `new_layout`，返回需要录制的 barrier 参数
    ///
    /// 不支持的转换返回 `UnsupportedLayoutTransition`，当前布局保持不变
    pub fn transition(&mut self, new_layout: vk::ImageLayout) -> GpuResult<LayoutTransition> {
        let transition =
            supported_transition(self.current, new_layout).ok_or(GpuError::UnsupportedLayoutTransition {
                old: self.current,
                new: new_layout,
            })?;
        self.current = new_layout;
        Ok(transition)
    }
}
