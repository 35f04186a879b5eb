//! 内核配置
//!
//! 配置从 JSON 文件或默认值加载，缺失字段逐项回退到默认值。

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::module::version::parse_version;
use crate::utils::logger::{LoggerConfig, RotationStrategy};
use crate::utils::{CoreError, Result};

// ==================== 默认值 ====================

fn default_host_version() -> String {
    "1.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_console_output() -> bool {
    true
}

fn default_rotation() -> String {
    "daily".to_string()
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别（trace/debug/info/warn/error）
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 是否输出到控制台
    #[serde(default = "default_console_output")]
    pub console_output: bool,

    /// 日志文件目录（空字符串关闭文件输出）
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// 滚动策略（never/hourly/daily）
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            console_output: default_console_output(),
            dir: default_log_dir(),
            rotation: default_rotation(),
        }
    }
}

impl LogConfig {
    /// 转换为日志系统配置
    pub fn to_logger_config(&self) -> Result<LoggerConfig> {
        let rotation = match self.rotation.as_str() {
            "never" => RotationStrategy::Never,
            "hourly" => RotationStrategy::Hourly,
            "daily" => RotationStrategy::Daily,
            other => {
                return Err(CoreError::InvalidConfigValue {
                    key: "log.rotation".to_string(),
                    reason: format!("未知滚动策略 '{}'", other),
                })
            }
        };

        let mut builder = LoggerConfig::builder()
            .level(&self.level)
            .json_format(self.json_format)
            .console_output(self.console_output)
            .rotation(rotation);
        if !self.dir.is_empty() {
            builder = builder.file_output(&self.dir);
        }
        Ok(builder.build())
    }
}

/// 内核配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// 宿主自身的版本（模块的宿主约束对其求值）
    #[serde(default = "default_host_version")]
    pub host_version: String,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            host_version: default_host_version(),
            log: LogConfig::default(),
        }
    }
}

impl KernelConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigLoadFailed(format!("读取 {:?} 失败: {}", path, e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::ConfigLoadFailed(format!("解析 {:?} 失败: {}", path, e)))?;
        config.validate()?;
        info!(path = ?path, "配置已加载");
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        parse_version(&self.host_version).map_err(|e| CoreError::InvalidConfigValue {
            key: "host_version".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// 解析后的宿主版本
    pub fn parsed_host_version(&self) -> Result<semver::Version> {
        parse_version(&self.host_version)
    }
}
