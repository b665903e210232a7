use std::path::PathBuf;

use clap::Parser;

/// 使用 headless 后端运行若干帧，并在中途模拟一次窗口尺寸变化
#[derive(Parser, Debug)]
#[command(name = "kiln-headless-app", version)]
pub struct HeadlessArgs {
    /// TOML 配置文件，不存在时使用默认配置
    pub config: Option<PathBuf>,

    /// 运行的帧数
    #[arg(long, default_value_t = HeadlessArgs::DEFAULT_FRAME_COUNT)]
    pub frames: u64,
}

impl HeadlessArgs {
    pub const DEFAULT_CONFIG_PATH: &'static str = "kiln.toml";
    pub const DEFAULT_FRAME_COUNT: u64 = 120;

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_PATH))
    }
}
