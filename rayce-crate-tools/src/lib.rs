//! Rayce 工具集
//!
//! 日志初始化、工作区路径解析、命名常量表宏。

pub mod init_log;
pub mod named_array;
pub mod resource;
