//! 内核端到端测试
//!
//! 覆盖发现注册、安装/卸载、启用/禁用、批量操作与事件投递的完整流程。

use std::sync::Arc;

use semver::Version;
use tokio::sync::Mutex;

use taro_core::module::{
    BinaryIdentity, DependencyDescriptor, FeatureDescriptor, FeatureRuntimeState, KernelEvent,
    KernelEventKind, MemoryStateStore, ModuleDescriptor, ModuleManager, ModuleManageState,
    StateStore, TableRedirectRule, VersionConstraint,
};
use taro_core::CoreError;

fn manager() -> ModuleManager {
    ModuleManager::new(Version::new(3, 0, 0), Arc::new(MemoryStateStore::new()))
}

fn manager_with_store(store: Arc<MemoryStateStore>) -> ModuleManager {
    ModuleManager::new(Version::new(3, 0, 0), store)
}

fn module(id: &str, version: &str) -> ModuleDescriptor {
    ModuleDescriptor::new(id, Version::parse(version).unwrap())
}

/// blog 依赖 search 特性
fn dependent_pair() -> (ModuleDescriptor, ModuleDescriptor) {
    let search = module("search", "2.1.0");
    let blog = module("blog", "1.0.0").with_feature(
        FeatureDescriptor::new("blog", "blog").with_dependency(
            DependencyDescriptor::new("search")
                .with_constraint(VersionConstraint::parse(">=2.0.0").unwrap()),
        ),
    );
    (search, blog)
}

#[tokio::test]
async fn test_register_install_enable_flow() {
    let manager = manager();
    let (search, blog) = dependent_pair();

    let registered = manager.register_modules(vec![search, blog]).await.unwrap();
    assert_eq!(registered, vec!["search", "blog"]);

    // 依赖方在目标启用前不可启用
    manager.install_module("search").await.unwrap();
    manager.install_module("blog").await.unwrap();
    let err = manager.enable_feature("blog").await.unwrap_err();
    assert!(matches!(err, CoreError::FeatureNotEligible { .. }));

    manager.enable_feature("search").await.unwrap();
    manager.enable_feature("blog").await.unwrap();

    let blog = manager.feature_snapshot("blog").await.unwrap();
    assert!(blog.is_enabled());
    assert!(blog.runtime_state.is_none());
}

#[tokio::test]
async fn test_auto_install_without_installer() {
    let manager = manager();
    manager
        .register_modules(vec![module("theme", "1.0.0").without_installer()])
        .await
        .unwrap();

    let theme = manager.module_snapshot("theme").await.unwrap();
    assert_eq!(theme.manage_state, ModuleManageState::AutoInstall);
    assert!(theme.is_installed());

    // 发现即安装的模块可直接启用
    manager.enable_feature("theme").await.unwrap();
}

#[tokio::test]
async fn test_manage_state_synced_from_store() {
    let store = Arc::new(MemoryStateStore::new());
    store
        .install_module("blog", &Version::new(1, 0, 0))
        .await
        .unwrap();
    store.enable_feature("blog").await.unwrap();

    let manager = manager_with_store(store);
    manager
        .register_modules(vec![module("blog", "1.0.0")])
        .await
        .unwrap();

    let blog = manager.module_snapshot("blog").await.unwrap();
    assert!(blog.is_installed());
    assert!(blog.features[0].is_enabled());
}

#[tokio::test]
async fn test_register_batch_rolls_back_on_failure() {
    let manager = manager();
    let err = manager
        .register_modules(vec![
            module("a", "1.0.0"),
            // 重复 ID，整批失败
            module("a", "1.0.0"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ModuleAlreadyRegistered(_)));
    assert_eq!(manager.module_count().await, 0);
}

#[tokio::test]
async fn test_uninstall_guarded_by_dependents() {
    let manager = manager();
    let (search, blog) = dependent_pair();
    manager.register_modules(vec![search, blog]).await.unwrap();
    manager
        .install_modules(&["blog".to_string(), "search".to_string()])
        .await
        .unwrap();

    let err = manager.uninstall_module("search").await.unwrap_err();
    match err {
        CoreError::ModuleHasDependents { dependents, .. } => {
            assert_eq!(dependents, vec!["blog"]);
        }
        other => panic!("意外错误: {other}"),
    }

    // 依赖方先卸载后即可卸载
    manager.uninstall_module("blog").await.unwrap();
    manager.uninstall_module("search").await.unwrap();
}

#[tokio::test]
async fn test_uninstall_disables_features_in_store() {
    let store = Arc::new(MemoryStateStore::new());
    let manager = manager_with_store(store.clone());
    manager
        .register_modules(vec![module("blog", "1.0.0")])
        .await
        .unwrap();
    manager.install_module("blog").await.unwrap();
    manager.enable_feature("blog").await.unwrap();

    manager.uninstall_module("blog").await.unwrap();

    assert!(store.module_installed("blog").await.unwrap().is_none());
    assert!(!store.feature_enabled("blog").await.unwrap());
    let blog = manager.module_snapshot("blog").await.unwrap();
    assert!(!blog.is_installed());
    assert!(!blog.features[0].is_enabled());
}

#[tokio::test]
async fn test_batch_install_orders_by_dependency() {
    let manager = manager();
    // a -> b -> c，声明顺序故意打乱
    let c = module("c", "1.0.0");
    let b = module("b", "1.0.0").with_feature(
        FeatureDescriptor::new("b", "b").with_dependency(DependencyDescriptor::new("c")),
    );
    let a = module("a", "1.0.0").with_feature(
        FeatureDescriptor::new("a", "a").with_dependency(DependencyDescriptor::new("b")),
    );
    manager.register_modules(vec![a, b, c]).await.unwrap();

    let installed = manager
        .install_modules(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .unwrap();
    assert_eq!(installed, vec!["c", "b", "a"]);

    // 卸载按依赖方优先的逆序
    let uninstalled = manager
        .uninstall_modules(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .unwrap();
    assert_eq!(uninstalled, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_batch_enable_orders_features() {
    let manager = manager();
    let (search, blog) = dependent_pair();
    manager.register_modules(vec![search, blog]).await.unwrap();
    manager
        .install_modules(&["blog".to_string(), "search".to_string()])
        .await
        .unwrap();

    // 单独启用 blog 会因 search 未启用而被拒；批量启用按依赖顺序成功
    let enabled = manager
        .enable_features(&["blog".to_string(), "search".to_string()])
        .await
        .unwrap();
    assert_eq!(enabled, vec!["search", "blog"]);

    // 禁用按逆序
    let disabled = manager
        .disable_features(&["search".to_string(), "blog".to_string()])
        .await
        .unwrap();
    assert_eq!(disabled, vec!["blog", "search"]);
}

#[tokio::test]
async fn test_install_by_prefix() {
    let manager = manager();
    manager
        .register_modules(vec![
            module("shop.cart", "1.0.0"),
            module("shop.pay", "1.0.0"),
            module("wiki", "1.0.0"),
        ])
        .await
        .unwrap();

    let installed = manager.install_by_prefix("shop.").await.unwrap();
    assert_eq!(installed.len(), 2);
    assert!(!manager.module_snapshot("wiki").await.unwrap().is_installed());

    let uninstalled = manager.uninstall_by_prefix("shop.").await.unwrap();
    assert_eq!(uninstalled.len(), 2);
}

#[tokio::test]
async fn test_forbidden_toggle_propagates() {
    let manager = manager();
    let (search, blog) = dependent_pair();
    manager.register_modules(vec![search, blog]).await.unwrap();
    manager
        .install_modules(&["search".to_string(), "blog".to_string()])
        .await
        .unwrap();
    manager.enable_feature("search").await.unwrap();
    manager.enable_feature("blog").await.unwrap();

    manager.set_module_forbidden("search", true).await.unwrap();

    let search = manager.feature_snapshot("search").await.unwrap();
    assert!(search
        .runtime_state
        .contains(FeatureRuntimeState::FORBIDDEN_MODULE));
    let blog = manager.feature_snapshot("blog").await.unwrap();
    assert!(blog
        .runtime_state
        .contains(FeatureRuntimeState::FORBIDDEN_DEPENDENCY));

    // 解禁后一轮重算恢复干净
    manager.set_module_forbidden("search", false).await.unwrap();
    let blog = manager.feature_snapshot("blog").await.unwrap();
    assert!(blog.runtime_state.is_none());
}

#[tokio::test]
async fn test_binary_identity_materialization() {
    let manager = manager();
    manager
        .add_redirect_rule(Box::new(TableRedirectRule::new(
            BinaryIdentity::named("shapes").with_version(Version::new(1, 4, 0)),
        )))
        .await;

    let ok = module("viewer", "1.0.0").with_binary(BinaryIdentity::named("shapes"));
    let broken = module("editor", "1.0.0").with_binary(BinaryIdentity::named("missing-lib"));
    manager.register_modules(vec![ok, broken]).await.unwrap();

    let viewer = manager.module_snapshot("viewer").await.unwrap();
    assert!(!viewer.binary_failed);
    assert_eq!(
        viewer.resolved_binaries[0].version,
        Some(Version::new(1, 4, 0))
    );

    let editor = manager.module_snapshot("editor").await.unwrap();
    assert!(editor.binary_failed);
    // 物化失败阻止安装
    let err = manager.install_module("editor").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_load_order_and_cycle_query() {
    let manager = manager();
    let c = module("c", "1.0.0");
    let b = module("b", "1.0.0").with_feature(
        FeatureDescriptor::new("b", "b").with_dependency(DependencyDescriptor::new("c")),
    );
    manager.register_modules(vec![b, c]).await.unwrap();

    assert_eq!(manager.load_order().await, vec!["c", "b"]);
    assert!(manager.find_cycle().await.is_none());

    // 引入循环
    let x = module("x", "1.0.0").with_feature(
        FeatureDescriptor::new("x", "x").with_dependency(DependencyDescriptor::new("y")),
    );
    let y = module("y", "1.0.0").with_feature(
        FeatureDescriptor::new("y", "y").with_dependency(DependencyDescriptor::new("x")),
    );
    manager.register_modules(vec![x, y]).await.unwrap();

    let cycle = manager.find_cycle().await.expect("应检测到循环");
    assert_eq!(cycle.first(), cycle.last());
    // 循环之外的特性仍在装载顺序中
    let order = manager.load_order().await;
    assert!(order.contains(&"c".to_string()));
    assert!(order.contains(&"b".to_string()));
}

#[tokio::test]
async fn test_events_delivered_after_operations() {
    let manager = manager();
    let received: Arc<Mutex<Vec<KernelEvent>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        manager
            .subscribe(Arc::new(move |event| {
                let received = received.clone();
                let fut: futures::future::BoxFuture<'static, ()> = Box::pin(async move {
                    received.lock().await.push(event);
                });
                fut
            }))
            .await;
    }

    manager
        .register_modules(vec![module("blog", "1.0.0")])
        .await
        .unwrap();
    manager.install_module("blog").await.unwrap();
    manager.enable_feature("blog").await.unwrap();
    manager.disable_feature("blog").await.unwrap();
    manager.uninstall_module("blog").await.unwrap();

    let events = received.lock().await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match &e.kind {
            KernelEventKind::ModuleRegistered { .. } => "registered",
            KernelEventKind::ModuleInstalled { .. } => "installed",
            KernelEventKind::ModuleUninstalled { .. } => "uninstalled",
            KernelEventKind::FeatureEnabled { .. } => "enabled",
            KernelEventKind::FeatureDisabled { .. } => "disabled",
            KernelEventKind::ModuleForbiddenChanged { .. } => "forbidden",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["registered", "installed", "enabled", "disabled", "uninstalled"]
    );
    // 事件携带快照
    assert!(events.iter().all(|e| e.module_id() == "blog"));
}

#[tokio::test]
async fn test_remove_module() {
    let manager = manager();
    manager
        .register_modules(vec![module("blog", "1.0.0")])
        .await
        .unwrap();
    manager.install_module("blog").await.unwrap();

    // 已安装的模块不能直接移除
    assert!(matches!(
        manager.remove_module("blog").await.unwrap_err(),
        CoreError::InvalidTransition { .. }
    ));

    manager.uninstall_module("blog").await.unwrap();
    let removed = manager.remove_module("blog").await.unwrap();
    assert_eq!(removed.module_id, "blog");
    assert_eq!(manager.module_count().await, 0);
}

#[tokio::test]
async fn test_invalid_transitions() {
    let manager = manager();
    manager
        .register_modules(vec![module("blog", "1.0.0")])
        .await
        .unwrap();

    // 未安装不能卸载
    assert!(matches!(
        manager.uninstall_module("blog").await.unwrap_err(),
        CoreError::InvalidTransition { .. }
    ));

    manager.install_module("blog").await.unwrap();
    // 重复安装被拒绝
    assert!(matches!(
        manager.install_module("blog").await.unwrap_err(),
        CoreError::InvalidTransition { .. }
    ));

    manager.enable_feature("blog").await.unwrap();
    // 重复启用被拒绝
    assert!(matches!(
        manager.enable_feature("blog").await.unwrap_err(),
        CoreError::InvalidTransition { .. }
    ));

    // 不存在的目标
    assert!(matches!(
        manager.install_module("ghost").await.unwrap_err(),
        CoreError::ModuleNotFound(_)
    ));
    assert!(matches!(
        manager.enable_feature("ghost").await.unwrap_err(),
        CoreError::FeatureNotFound(_)
    ));
}
