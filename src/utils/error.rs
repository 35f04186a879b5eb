//! 芋头模块内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。
//!
//! 注意区分两类"错误"：
//! - 本模块中的 [`CoreError`]：调用方必须处理的失败（解析失败、事务失败等）
//! - 描述符上的运行时状态位集：解析过程的常规产物，是数据而非错误

use thiserror::Error;

/// 芋头内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 解析错误 ====================

    /// 版本号解析失败
    #[error("版本号格式无效: '{text}' - {reason}")]
    VersionParse {
        text: String,
        reason: String,
    },

    /// 版本约束解析失败
    #[error("版本约束格式无效: '{text}' - {reason}")]
    ConstraintParse {
        text: String,
        reason: String,
    },

    /// 描述符校验失败
    #[error("描述符无效: {0:?}")]
    InvalidDescriptor(Vec<String>),

    // ==================== 注册表错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 特性未找到
    #[error("特性未找到: '{0}'")]
    FeatureNotFound(String),

    /// 模块已注册
    #[error("模块已注册: '{0}'")]
    ModuleAlreadyRegistered(String),

    /// 特性 ID 冲突
    #[error("特性 ID 冲突: '{feature_id}' 已由模块 '{owner}' 声明")]
    DuplicateFeature {
        feature_id: String,
        owner: String,
    },

    // ==================== 生命周期错误 ====================

    /// 模块有依赖者，无法卸载
    #[error("模块 '{module}' 被以下模块依赖，无法卸载: {dependents:?}")]
    ModuleHasDependents {
        module: String,
        dependents: Vec<String>,
    },

    /// 特性不满足启用条件
    #[error("特性 '{feature_id}' 当前不可启用: {reason}")]
    FeatureNotEligible {
        feature_id: String,
        reason: String,
    },

    /// 生命周期状态不允许该操作
    #[error("模块 '{module_id}' 状态不允许操作 '{operation}': {reason}")]
    InvalidTransition {
        module_id: String,
        operation: String,
        reason: String,
    },

    // ==================== 事务错误 ====================

    /// 外部持久化调用失败（触发整个工作单元回滚）
    #[error("持久化调用失败: {operation} - {reason}")]
    StoreFailed {
        operation: String,
        reason: String,
    },

    /// 回滚过程中再次失败（双重故障）
    ///
    /// 与原始错误区分开，便于运维区分"干净回滚"与"部分回滚"。
    #[error("回滚失败（双重故障）: 原始错误 [{original}]，补偿错误 [{compensation}]")]
    RollbackFailed {
        original: String,
        compensation: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 版本库底层错误
    #[error("版本解析错误: {0}")]
    Semver(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 版本错误 (VERSION-xxx)
    pub const VERSION_PARSE_FAILED: &str = "VERSION-001";
    pub const CONSTRAINT_PARSE_FAILED: &str = "VERSION-002";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_ALREADY_REGISTERED: &str = "MODULE-002";
    pub const MODULE_HAS_DEPENDENTS: &str = "MODULE-003";
    pub const MODULE_INVALID_DESCRIPTOR: &str = "MODULE-004";

    // 特性错误 (FEATURE-xxx)
    pub const FEATURE_NOT_FOUND: &str = "FEATURE-001";
    pub const FEATURE_DUPLICATE: &str = "FEATURE-002";
    pub const FEATURE_NOT_ELIGIBLE: &str = "FEATURE-003";

    // 事务错误 (TX-xxx)
    pub const TX_STORE_FAILED: &str = "TX-001";
    pub const TX_ROLLBACK_FAILED: &str = "TX-002";
    pub const TX_INVALID_TRANSITION: &str = "TX-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::VersionParse { .. } => error_code::VERSION_PARSE_FAILED,
            CoreError::ConstraintParse { .. } => error_code::CONSTRAINT_PARSE_FAILED,
            CoreError::InvalidDescriptor(_) => error_code::MODULE_INVALID_DESCRIPTOR,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleAlreadyRegistered(_) => error_code::MODULE_ALREADY_REGISTERED,
            CoreError::ModuleHasDependents { .. } => error_code::MODULE_HAS_DEPENDENTS,
            CoreError::FeatureNotFound(_) => error_code::FEATURE_NOT_FOUND,
            CoreError::DuplicateFeature { .. } => error_code::FEATURE_DUPLICATE,
            CoreError::FeatureNotEligible { .. } => error_code::FEATURE_NOT_ELIGIBLE,
            CoreError::StoreFailed { .. } => error_code::TX_STORE_FAILED,
            CoreError::RollbackFailed { .. } => error_code::TX_ROLLBACK_FAILED,
            CoreError::InvalidTransition { .. } => error_code::TX_INVALID_TRANSITION,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否为双重故障（回滚本身失败）
    pub fn is_double_fault(&self) -> bool {
        matches!(self, CoreError::RollbackFailed { .. })
    }
}
