use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// GFX 层的所有可恢复错误
///
/// 这些错误在渲染器里都被视为致命错误：调用方唯一合理的处理方式是记录日志后退出，
/// 或者重建整个渲染器。
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no memory type matches filter {type_filter:#b} with properties {properties:?}")]
    OutOfMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition { old: vk::ImageLayout, new: vk::ImageLayout },

    #[error("acceleration structure build failed at {stage}: {reason}")]
    AccelerationBuild { stage: &'static str, reason: String },

    #[error("ray tracing pipeline creation failed at {stage}: {reason}")]
    PipelineCreation { stage: &'static str, reason: String },

    #[error("descriptor binding {binding} requested {requested} descriptors, capacity is {capacity}")]
    DescriptorCapacityExceeded { binding: u32, requested: u32, capacity: u32 },

    #[error("invalid descriptor layout: {0}")]
    InvalidDescriptorLayout(String),

    #[error("write of {requested} bytes exceeds buffer `{name}` of {capacity} bytes")]
    BufferOverflow {
        name: String,
        requested: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error("format {0:?} is not supported for host uploads")]
    UnsupportedFormat(vk::Format),

    #[error("failed to load shader `{path}`: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(String),

    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{call} failed: {result:?} ({result})")]
    Vulkan { call: &'static str, result: vk::Result },
}

pub type GpuResult<T> = Result<T, GpuError>;

/// 给裸的 `VkResult` 附上失败的调用名
pub trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> GpuResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn vk_context(self, call: &'static str) -> GpuResult<T> {
        self.map_err(|result| GpuError::Vulkan { call, result })
    }
}

impl GpuError {
    /// 把普通的 Vulkan 错误归类到加速结构构建阶段
    pub fn into_acceleration(self, stage: &'static str) -> Self {
        match self {
            e @ GpuError::AccelerationBuild { .. } => e,
            other => GpuError::AccelerationBuild {
                stage,
                reason: other.to_string(),
            },
        }
    }

    /// 把普通的 Vulkan 错误归类到管线创建阶段
    pub fn into_pipeline(self, stage: &'static str) -> Self {
        match self {
            e @ GpuError::PipelineCreation { .. } => e,
            other => GpuError::PipelineCreation {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_context_names_call() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.vk_context("vkAllocateMemory").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("vkAllocateMemory failed: ERROR_OUT_OF_DEVICE_MEMORY"));
        assert!(msg.contains(&vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string()));
    }

    #[test]
    fn test_into_acceleration_wraps_once() {
        let err = GpuError::Vulkan {
            call: "vkCreateBuffer",
            result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        }
        .into_acceleration("scratch allocation");
        match &err {
            GpuError::AccelerationBuild { stage, reason } => {
                assert_eq!(*stage, "scratch allocation");
                assert!(reason.contains("vkCreateBuffer"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // 已经是加速结构错误的不会被二次包装
        match err.into_acceleration("build") {
            GpuError::AccelerationBuild { stage, .. } => assert_eq!(stage, "scratch allocation"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_capacity_message() {
        let err = GpuError::DescriptorCapacityExceeded {
            binding: 0,
            requested: 1025,
            capacity: 1024,
        };
        assert_eq!(err.to_string(), "descriptor binding 0 requested 1025 descriptors, capacity is 1024");
    }
}
