use std::fs;
use std::path::Path;

use anyhow::Context;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use kiln_pipeline::pipeline::PipelineConfig;
use kiln_render_graph::config::RenderGraphConfig;
use kiln_render_interface::frame_counter::FrameCounter;
use kiln_render_interface::frame_settings::{Extent2D, FrameLabel, FrameSettings};

/// 单个相机的配置，每个相机拥有独立的渲染图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub name: String,
    pub position: Vec3,
    pub target: Vec3,
    /// 垂直方向的视角（角度）
    pub fov_deg: f32,
    /// 固定输出分辨率，不设置时跟随窗口
    pub output_size: Option<Extent2D>,
    /// 每秒绕 target 旋转的角度
    pub orbit_deg_per_sec: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            position: Vec3::new(0.0, 2.0, 6.0),
            target: Vec3::ZERO,
            fov_deg: 60.0,
            output_size: None,
            orbit_deg_per_sec: 0.0,
        }
    }
}

/// 引擎配置
///
/// 所有字段都有默认值，配置文件中只需要写需要修改的部分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub frames_in_flight: usize,
    /// Phase 管线的工作线程数量
    pub worker_threads: usize,
    pub frame_settings: FrameSettings,
    pub cameras: Vec<CameraConfig>,
    /// build 成功后打印执行计划
    pub print_execution_plan: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: FrameCounter::DEFAULT_FIF_COUNT,
            worker_threads: 2,
            frame_settings: FrameSettings::default(),
            cameras: vec![CameraConfig::default()],
            print_execution_plan: true,
        }
    }
}

impl EngineConfig {
    /// 从 TOML 文件加载配置，文件不存在时返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("config file {:?} not found, use default config", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).with_context(|| format!("读取配置文件失败: {:?}", path))?;
        let config = Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path))?;
        log::info!("load config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=FrameLabel::MAX_COUNT).contains(&self.frames_in_flight),
            "frames_in_flight must be in 1..={}, got {}",
            FrameLabel::MAX_COUNT,
            self.frames_in_flight
        );
        anyhow::ensure!(!self.cameras.is_empty(), "at least one camera is required");
        for (idx, camera) in self.cameras.iter().enumerate() {
            anyhow::ensure!(
                self.cameras[..idx].iter().all(|other| other.name != camera.name),
                "camera '{}' is declared twice",
                camera.name
            );
        }
        Ok(())
    }

    pub fn render_graph_config(&self) -> RenderGraphConfig {
        RenderGraphConfig {
            frames_in_flight: self.frames_in_flight,
            frame_settings: self.frame_settings,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_latency: self.frames_in_flight as u32,
            worker_threads: self.worker_threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_default() {
        let config = EngineConfig::load("not-exist/kiln.toml").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            frames_in_flight = 2

            [frame_settings]
            color_format = "Bgra8Srgb"
            depth_format = "D32Float"
            frame_extent = { width = 800, height = 600 }

            [[cameras]]
            name = "main"

            [[cameras]]
            name = "minimap"
            output_size = { width = 256, height = 256 }
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.frame_settings.frame_extent, Extent2D::new(800, 600));
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[1].output_size, Some(Extent2D::new(256, 256)));
        assert_eq!(config.cameras[1].fov_deg, 60.0);
        assert_eq!(config.render_graph_config().frames_in_flight, 2);
        assert_eq!(config.pipeline_config().frame_latency, 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EngineConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(EngineConfig::from_toml_str("cameras = []").is_err());
        assert!(EngineConfig::from_toml_str("[[cameras]]\nname = \"a\"\n[[cameras]]\nname = \"a\"").is_err());
        assert!(EngineConfig::from_toml_str("frames_in_flight = \"three\"").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("kiln-config-{}.toml", std::process::id()));
        let mut config = EngineConfig::default();
        config.worker_threads = 4;
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
