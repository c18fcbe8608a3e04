use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV_VAR: &str = "PLANMARK_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
    #[serde(default)]
    pub snapping: SnappingConfig,
    /// 追加或覆盖内置设备目录的条目。
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `PLANMARK_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let snapping = &self.snapping;
        for (name, value) in [
            ("snapping.corner_tolerance_px", snapping.corner_tolerance_px),
            ("snapping.edge_tolerance_px", snapping.edge_tolerance_px),
            ("snapping.close_tolerance_px", snapping.close_tolerance_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} 必须为非负数，实际为 {value}")));
            }
        }
        for entry in &self.catalog {
            if entry.equipment_type.trim().is_empty() {
                return Err(ConfigError::Invalid("设备目录条目缺少 equipment_type".to_string()));
            }
            if !(entry.width_m > 0.0 && entry.height_m > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "设备 {} 的尺寸必须为正数",
                    entry.equipment_type
                )));
            }
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontendMode {
    #[default]
    Demo,
    Replay,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrontendConfig {
    #[serde(default)]
    pub default_mode: FrontendMode,
    /// `replay` 模式下默认回放的命令脚本。
    #[serde(default)]
    pub replay_script: Option<PathBuf>,
}

/// 对齐吸附与闭合判定的容差，单位为文档像素。
#[derive(Debug, Clone, Deserialize)]
pub struct SnappingConfig {
    #[serde(default = "SnappingConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "SnappingConfig::default_tolerance")]
    pub corner_tolerance_px: f64,
    #[serde(default = "SnappingConfig::default_tolerance")]
    pub edge_tolerance_px: f64,
    #[serde(default = "SnappingConfig::default_tolerance")]
    pub close_tolerance_px: f64,
}

impl SnappingConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_tolerance() -> f64 {
        10.0
    }
}

impl Default for SnappingConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            corner_tolerance_px: Self::default_tolerance(),
            edge_tolerance_px: Self::default_tolerance(),
            close_tolerance_px: Self::default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogEntry {
    pub equipment_type: String,
    pub width_m: f64,
    pub height_m: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置无效: {0}")]
    Invalid(String),
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
