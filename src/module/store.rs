//! 持久状态存储
//!
//! 安装/启用等管理状态的真实来源在内核之外（数据库、配置中心等），
//! 内核通过 [`StateStore`] 协作方接口读写。写操作可能失败，失败会
//! 触发工作单元的补偿回滚。
//!
//! 自带的 [`MemoryStateStore`] 是进程内实现，供测试与单机部署使用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::Result;

/// 持久状态存储协作方
///
/// 实现方负责把模块安装记录与特性启用记录落到外部存储。所有写操作
/// 要求各自原子；跨多次写的原子性由生命周期协调器的补偿机制保证。
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 写入模块安装记录
    async fn install_module(&self, module_id: &str, version: &Version) -> Result<()>;

    /// 删除模块安装记录
    async fn uninstall_module(&self, module_id: &str) -> Result<()>;

    /// 写入特性启用记录
    async fn enable_feature(&self, feature_id: &str) -> Result<()>;

    /// 删除特性启用记录
    async fn disable_feature(&self, feature_id: &str) -> Result<()>;

    /// 查询模块的安装记录，未安装返回 None
    async fn module_installed(&self, module_id: &str) -> Result<Option<Version>>;

    /// 查询特性是否已启用
    async fn feature_enabled(&self, feature_id: &str) -> Result<bool>;
}

/// 进程内状态存储
///
/// 以两张内存表实现 [`StateStore`]，进程退出即丢失。
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    installed: Mutex<HashMap<String, Version>>,
    enabled: Mutex<HashMap<String, bool>>,
}

impl MemoryStateStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 包装为共享句柄
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn install_module(&self, module_id: &str, version: &Version) -> Result<()> {
        self.installed
            .lock()
            .await
            .insert(module_id.to_string(), version.clone());
        debug!(module_id = %module_id, version = %version, "安装记录已写入");
        Ok(())
    }

    async fn uninstall_module(&self, module_id: &str) -> Result<()> {
        self.installed.lock().await.remove(module_id);
        debug!(module_id = %module_id, "安装记录已删除");
        Ok(())
    }

    async fn enable_feature(&self, feature_id: &str) -> Result<()> {
        self.enabled
            .lock()
            .await
            .insert(feature_id.to_string(), true);
        debug!(feature_id = %feature_id, "启用记录已写入");
        Ok(())
    }

    async fn disable_feature(&self, feature_id: &str) -> Result<()> {
        self.enabled
            .lock()
            .await
            .insert(feature_id.to_string(), false);
        debug!(feature_id = %feature_id, "启用记录已删除");
        Ok(())
    }

    async fn module_installed(&self, module_id: &str) -> Result<Option<Version>> {
        Ok(self.installed.lock().await.get(module_id).cloned())
    }

    async fn feature_enabled(&self, feature_id: &str) -> Result<bool> {
        Ok(self
            .enabled
            .lock()
            .await
            .get(feature_id)
            .copied()
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_module_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(store.module_installed("blog").await.unwrap().is_none());

        store
            .install_module("blog", &Version::new(1, 2, 0))
            .await
            .unwrap();
        assert_eq!(
            store.module_installed("blog").await.unwrap(),
            Some(Version::new(1, 2, 0))
        );

        store.uninstall_module("blog").await.unwrap();
        assert!(store.module_installed("blog").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_feature_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(!store.feature_enabled("blog").await.unwrap());

        store.enable_feature("blog").await.unwrap();
        assert!(store.feature_enabled("blog").await.unwrap());

        store.disable_feature("blog").await.unwrap();
        assert!(!store.feature_enabled("blog").await.unwrap());
    }
}
