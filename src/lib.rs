//! 芋头模块内核
//!
//! 一个插件/模块激活内核：负责把"磁盘上发现了哪些模块"转化为
//! "哪些特性此刻可以安全启用"，并以可回滚的工作单元驱动安装、
//! 卸载、启用、禁用等生命周期操作。
//!
//! # 核心概念
//!
//! - **模块**：可发现、带版本的部署单位，独占一组特性
//! - **特性**：依赖与启用/禁用的粒度单位，依赖以特性 ID + 版本约束声明
//! - **运行时状态**：解析器整体重算的错误条件位集，是数据而非异常
//! - **工作单元**：一次生命周期操作的事务边界，失败即补偿回滚
//!
//! # 快速上手
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taro_core::module::{MemoryStateStore, ModuleDescriptor, ModuleManager};
//! use taro_core::module::version::parse_version;
//!
//! # async fn demo() -> taro_core::utils::Result<()> {
//! let manager = ModuleManager::new(
//!     parse_version("3.0.0")?,
//!     Arc::new(MemoryStateStore::new()),
//! );
//!
//! let blog = ModuleDescriptor::new("blog", parse_version("1.2.0")?);
//! manager.register_modules(vec![blog]).await?;
//! manager.install_module("blog").await?;
//! manager.enable_feature("blog").await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod module;
pub mod utils;

pub use crate::core::config::KernelConfig;
pub use crate::module::manager::ModuleManager;
pub use crate::module::store::{MemoryStateStore, StateStore};
pub use crate::utils::error::{CoreError, Result};

/// 内核版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
