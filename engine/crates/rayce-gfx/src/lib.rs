//! Rayce 的 GFX 层
//!
//! 对 Vulkan 光追相关资源的封装：
//! - 内存分配（基于 vk-mem）、Buffer、Image 与布局状态机
//! - BLAS / TLAS 构建
//! - 描述符布局（包含 bindless 可变数量绑定）
//! - Shader Binding Table 与光追管线对象
//!
//! 所有组件都通过 `&GpuContext` 访问设备，不持有 context 的所有权。

pub mod commands;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod pipelines;
pub mod query;
pub mod raytracing;
pub mod resources;
pub mod utils;

pub use context::{GpuContext, GpuContextCreateInfo};
pub use error::{GpuError, GpuResult};
