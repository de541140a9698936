use std::path::{Path, PathBuf};

use anyhow::Context;
use rayce_crate_tools::resource::RaycePath;
use serde::{Deserialize, Serialize};

/// 渲染器配置，所有字段都有默认值，TOML 中可以只写需要覆盖的部分
///
/// ```toml
/// frames_in_flight = 2
/// compact_blas = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub app_name: String,
    pub enable_validation: bool,

    pub frames_in_flight: usize,
    /// bindless 贴图数组的容量
    pub max_textures: u32,
    /// 顶点 / 索引 buffer 数组的容量
    pub max_geometries: u32,
    pub max_instances: u32,
    pub max_materials: u32,
    pub max_lights: u32,
    pub max_spheres: u32,

    pub max_ray_recursion_depth: u32,
    pub compact_blas: bool,

    /// 编译好的 spv 所在目录，不填则使用 `engine/shader/.build`
    pub shader_dir: Option<PathBuf>,
    /// 离屏渲染的分辨率
    pub render_extent: [u32; 2],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "rayce".to_string(),
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 3,
            max_textures: 1024,
            max_geometries: 1024,
            max_instances: 1024,
            max_materials: 1024,
            max_lights: 512,
            max_spheres: 1024,
            max_ray_recursion_depth: 2,
            compact_blas: false,
            shader_dir: None,
            render_extent: [800, 600],
        }
    }
}

impl RendererConfig {
    /// 从 TOML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read config {path:?}"))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config {path:?}"))
    }

    /// 文件存在则加载，否则使用默认配置
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("config {path:?} not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.frames_in_flight >= 1, "frames_in_flight must be at least 1");
        anyhow::ensure!(self.max_ray_recursion_depth >= 1, "max_ray_recursion_depth must be at least 1");
        for (name, value) in [
            ("max_textures", self.max_textures),
            ("max_geometries", self.max_geometries),
            ("max_instances", self.max_instances),
            ("max_materials", self.max_materials),
            ("max_lights", self.max_lights),
            ("max_spheres", self.max_spheres),
        ] {
            anyhow::ensure!(value > 0, "{name} must be greater than 0");
        }
        anyhow::ensure!(
            self.render_extent[0] > 0 && self.render_extent[1] > 0,
            "render_extent must be non-zero, got {:?}",
            self.render_extent
        );
        Ok(())
    }

    /// spv 文件路径，`name` 不带 `.spv` 后缀
    pub fn shader_path(&self, name: &str) -> PathBuf {
        match &self.shader_dir {
            Some(dir) => dir.join(format!("{name}.spv")),
            None => RaycePath::shader_build_path(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.max_textures, 1024);
        assert_eq!(config.max_lights, 512);
        assert_eq!(config.max_ray_recursion_depth, 2);
        assert!(!config.compact_blas);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 2
            compact_blas = true
            render_extent = [64, 32]
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.compact_blas);
        assert_eq!(config.render_extent, [64, 32]);
        assert_eq!(config.max_materials, 1024);
        assert_eq!(config.app_name, "rayce");
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(RendererConfig::from_toml_str("").unwrap(), RendererConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RendererConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(RendererConfig::from_toml_str("max_textures = 0").is_err());
        assert!(RendererConfig::from_toml_str("render_extent = [0, 10]").is_err());
        assert!(RendererConfig::from_toml_str("frames_in_flight = \"three\"").is_err());
    }

    #[test]
    fn test_shader_path() {
        let mut config = RendererConfig::default();
        assert!(config.shader_path("rt/miss.rmiss").ends_with("engine/shader/.build/rt/miss.rmiss.spv"));

        config.shader_dir = Some(PathBuf::from("/opt/shaders"));
        assert_eq!(config.shader_path("rt/miss.rmiss"), PathBuf::from("/opt/shaders/rt/miss.rmiss.spv"));
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = RendererConfig::load_or_default("/definitely/not/a/rayce.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert!(RendererConfig::load("/definitely/not/a/rayce.toml").is_err());
    }
}
