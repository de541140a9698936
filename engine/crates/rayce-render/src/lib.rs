//! Rayce 光追渲染核心
//!
//! 在 `rayce-gfx` 之上组装光追管线：描述符布局约定、shader 表、SBT、
//! 逐帧（frames in flight）资源，以及场景加速结构的管理。

pub mod config;
pub mod fatal;
pub mod frame_slots;
pub mod rt_bindings;
pub mod rt_pipeline;
pub mod rt_shaders;
pub mod scene_accel;
pub mod scene_data;
