use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// ```ignore
/// let spv = RaycePath::shader_build_path("rt/raygen.rgen"); // engine/shader/.build/rt/raygen.rgen.spv
/// ```
pub struct RaycePath;

impl RaycePath {
    /// 工作区根目录：`rayce-crate-tools` 的上一级
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }

    pub fn shader_root_path() -> PathBuf {
        Self::engine_path().join("shader")
    }

    /// `engine/shader/.build/` 下编译好的 SPIR-V，自动追加 `.spv` 后缀
    pub fn shader_build_path(filename: &str) -> PathBuf {
        Self::shader_root_path().join(".build").join(format!("{filename}.spv"))
    }

    /// 配置文件默认位置：`<workspace>/rayce.toml`
    pub fn default_config_path() -> PathBuf {
        Self::workspace_path().join("rayce.toml")
    }
}
