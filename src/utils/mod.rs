//! 工具模块
//!
//! 包含错误类型、ID 工具和日志系统。

pub mod error;
pub mod id;
pub mod logger;

pub use error::{error_code, CoreError, Result};
pub use id::{generate_id, generate_uuid, is_valid_descriptor_id};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
