//! 事务回滚测试
//!
//! 用可注入故障的存储验证：操作中途失败时整个工作单元回滚，失败的
//! 操作不留半截状态；补偿自身失败升级为双重故障。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;

use taro_core::module::{
    FeatureManageState, MemoryStateStore, ModuleDescriptor, ModuleManager, ModuleManageState,
    StateStore,
};
use taro_core::{CoreError, Result};

/// 包装内存存储，按开关注入故障
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStateStore,
    fail_install: AtomicBool,
    fail_uninstall: AtomicBool,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    disable_calls: AtomicUsize,
}

impl FaultyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail(operation: &str) -> CoreError {
        CoreError::StoreFailed {
            operation: operation.to_string(),
            reason: "注入的故障".to_string(),
        }
    }
}

#[async_trait]
impl StateStore for FaultyStore {
    async fn install_module(&self, module_id: &str, version: &Version) -> Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(Self::fail("install_module"));
        }
        self.inner.install_module(module_id, version).await
    }

    async fn uninstall_module(&self, module_id: &str) -> Result<()> {
        if self.fail_uninstall.load(Ordering::SeqCst) {
            return Err(Self::fail("uninstall_module"));
        }
        self.inner.uninstall_module(module_id).await
    }

    async fn enable_feature(&self, feature_id: &str) -> Result<()> {
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(Self::fail("enable_feature"));
        }
        self.inner.enable_feature(feature_id).await
    }

    async fn disable_feature(&self, feature_id: &str) -> Result<()> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(Self::fail("disable_feature"));
        }
        self.inner.disable_feature(feature_id).await
    }

    async fn module_installed(&self, module_id: &str) -> Result<Option<Version>> {
        self.inner.module_installed(module_id).await
    }

    async fn feature_enabled(&self, feature_id: &str) -> Result<bool> {
        self.inner.feature_enabled(feature_id).await
    }
}

async fn registered_manager(store: Arc<FaultyStore>) -> ModuleManager {
    let manager = ModuleManager::new(Version::new(3, 0, 0), store);
    manager
        .register_modules(vec![ModuleDescriptor::new("blog", Version::new(1, 0, 0))])
        .await
        .unwrap();
    manager
}

#[tokio::test]
async fn test_install_failure_leaves_no_trace() {
    let store = FaultyStore::new();
    let manager = registered_manager(store.clone()).await;

    store.fail_install.store(true, Ordering::SeqCst);
    let err = manager.install_module("blog").await.unwrap_err();
    assert!(matches!(err, CoreError::StoreFailed { .. }));

    // 管理状态保持未安装，存储无残留
    let blog = manager.module_snapshot("blog").await.unwrap();
    assert_eq!(blog.manage_state, ModuleManageState::RequiresInstall);
    assert!(blog.installed_at.is_none());
    assert!(store.module_installed("blog").await.unwrap().is_none());

    // 故障解除后同一操作可重试成功
    store.fail_install.store(false, Ordering::SeqCst);
    manager.install_module("blog").await.unwrap();
    assert!(manager.module_snapshot("blog").await.unwrap().is_installed());
}

#[tokio::test]
async fn test_enable_failure_leaves_no_trace() {
    let store = FaultyStore::new();
    let manager = registered_manager(store.clone()).await;
    manager.install_module("blog").await.unwrap();

    store.fail_enable.store(true, Ordering::SeqCst);
    let err = manager.enable_feature("blog").await.unwrap_err();
    assert!(matches!(err, CoreError::StoreFailed { .. }));

    let blog = manager.feature_snapshot("blog").await.unwrap();
    assert_eq!(blog.manage_state, FeatureManageState::RequiresEnable);
    assert!(!store.feature_enabled("blog").await.unwrap());
}

#[tokio::test]
async fn test_uninstall_failure_compensates_disabled_features() {
    let store = FaultyStore::new();
    let manager = registered_manager(store.clone()).await;
    manager.install_module("blog").await.unwrap();
    manager.enable_feature("blog").await.unwrap();

    // 特性禁用写入成功后，模块卸载写入失败
    store.fail_uninstall.store(true, Ordering::SeqCst);
    let err = manager.uninstall_module("blog").await.unwrap_err();
    assert!(matches!(err, CoreError::StoreFailed { .. }));

    // 禁用被补偿回启用，内存状态同样恢复
    assert!(store.feature_enabled("blog").await.unwrap());
    assert!(store.module_installed("blog").await.unwrap().is_some());
    let blog = manager.module_snapshot("blog").await.unwrap();
    assert!(blog.is_installed());
    assert!(blog.features[0].is_enabled());
    assert!(store.disable_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_double_fault_reported_distinctly() {
    let store = FaultyStore::new();
    let manager = registered_manager(store.clone()).await;
    manager.install_module("blog").await.unwrap();
    manager.enable_feature("blog").await.unwrap();

    // 卸载失败触发回滚，回滚中的补偿（重新启用特性）也失败
    store.fail_uninstall.store(true, Ordering::SeqCst);
    store.fail_enable.store(true, Ordering::SeqCst);
    let err = manager.uninstall_module("blog").await.unwrap_err();

    assert!(err.is_double_fault());
    assert!(matches!(err, CoreError::RollbackFailed { .. }));
}

#[tokio::test]
async fn test_batch_stops_at_first_failure() {
    let store = FaultyStore::new();
    let manager = ModuleManager::new(Version::new(3, 0, 0), store.clone());
    manager
        .register_modules(vec![
            ModuleDescriptor::new("base", Version::new(1, 0, 0)),
            ModuleDescriptor::new("app", Version::new(1, 0, 0)),
        ])
        .await
        .unwrap();

    // base 安装成功后注入故障
    manager.install_module("base").await.unwrap();
    store.fail_install.store(true, Ordering::SeqCst);

    let err = manager
        .install_modules(&["base".to_string(), "app".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StoreFailed { .. }));

    // 已完成的单元保持生效，失败的单元干净回滚
    assert!(manager.module_snapshot("base").await.unwrap().is_installed());
    assert!(!manager.module_snapshot("app").await.unwrap().is_installed());
}
