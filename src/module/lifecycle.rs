//! 生命周期工作单元
//!
//! 一次安装/卸载/启用/禁用操作 = 一个工作单元：内存里的注册表变更
//! 即做即记，外部存储的每次成功写入登记一条反向补偿。操作中途失败时
//! 整个单元回滚——已应用的注册表变更按逆序撤销，已落盘的存储写入按
//! 逆序补偿——失败的操作不留半截状态。
//!
//! 回滚过程中补偿自身再失败是**双重故障**，以 [`CoreError::RollbackFailed`]
//! 区别于原始错误上报，便于运维区分"干净回滚"与"部分回滚"。
//!
//! 工作单元必须被显式了结（[`UnitOfWork::commit`] 或
//! [`UnitOfWork::abort`]）；Drop 只做兜底告警，不做异步补偿。

use chrono::{DateTime, Utc};
use semver::Version;
use tracing::{debug, error, info, warn};

use crate::module::descriptor::{FeatureManageState, ModuleDescriptor, ModuleManageState};
use crate::module::registry::ModuleRegistry;
use crate::module::store::StateStore;
use crate::utils::{generate_id, CoreError, Result};

/// 已应用的注册表变更，按逆序撤销
#[derive(Debug)]
enum AppliedChange {
    /// 模块管理状态变更
    ModuleManage {
        module_id: String,
        prev: ModuleManageState,
    },
    /// 特性管理状态变更
    FeatureManage {
        feature_id: String,
        prev: FeatureManageState,
    },
    /// 安装时间戳变更
    InstalledAt {
        module_id: String,
        prev: Option<DateTime<Utc>>,
    },
    /// 模块被摘除（撤销 = 回插快照）
    Evicted { snapshot: Box<ModuleDescriptor> },
    /// 模块被注册（撤销 = 摘除）
    Registered { module_id: String },
}

/// 外部存储写入的反向补偿
#[derive(Debug, Clone)]
pub enum StoreCompensation {
    /// 补偿安装记录写入：删除之
    UninstallModule(String),
    /// 补偿安装记录删除：按快照重写
    InstallModule(String, Version),
    /// 补偿启用记录写入：删除之
    DisableFeature(String),
    /// 补偿启用记录删除：重写之
    EnableFeature(String),
}

impl StoreCompensation {
    /// 执行补偿
    async fn run(&self, store: &dyn StateStore) -> Result<()> {
        match self {
            StoreCompensation::UninstallModule(id) => store.uninstall_module(id).await,
            StoreCompensation::InstallModule(id, version) => {
                store.install_module(id, version).await
            }
            StoreCompensation::DisableFeature(id) => store.disable_feature(id).await,
            StoreCompensation::EnableFeature(id) => store.enable_feature(id).await,
        }
    }
}

/// 生命周期工作单元
///
/// 协调一次生命周期操作的全部注册表变更与存储写入，保证整体成功或
/// 整体回滚。由模块管理器在写锁内创建并驱动。
pub struct UnitOfWork {
    /// 单元标识（日志关联用）
    uow_id: String,
    /// 操作名（install / uninstall / enable / disable）
    operation: String,
    /// 目标模块或特性 ID
    target_id: String,
    /// 已应用的注册表变更（应用顺序）
    applied: Vec<AppliedChange>,
    /// 已登记的存储补偿（登记顺序）
    compensations: Vec<StoreCompensation>,
    /// 是否已显式了结
    settled: bool,
    /// 单元的日志 span（同步段内进入，不跨越 await）
    span: tracing::Span,
}

impl UnitOfWork {
    /// 创建工作单元
    pub fn new(operation: impl Into<String>, target_id: impl Into<String>) -> Self {
        let uow_id = generate_id();
        let operation = operation.into();
        let target_id = target_id.into();
        let span = crate::uow_span!(uow_id, operation, target_id);
        let uow = Self {
            uow_id,
            operation,
            target_id,
            applied: Vec::new(),
            compensations: Vec::new(),
            settled: false,
            span,
        };
        uow.span.in_scope(|| debug!("工作单元已创建"));
        uow
    }

    /// 单元标识
    pub fn uow_id(&self) -> &str {
        &self.uow_id
    }

    /// 操作名
    pub fn operation(&self) -> &str {
        &self.operation
    }

    // ==================== 注册表变更（即做即记） ====================

    /// 变更模块管理状态
    pub fn set_module_manage(
        &mut self,
        registry: &mut ModuleRegistry,
        module_id: &str,
        state: ModuleManageState,
    ) -> Result<()> {
        let prev = registry.set_module_manage(module_id, state)?;
        self.applied.push(AppliedChange::ModuleManage {
            module_id: module_id.to_string(),
            prev,
        });
        Ok(())
    }

    /// 变更特性管理状态
    pub fn set_feature_manage(
        &mut self,
        registry: &mut ModuleRegistry,
        feature_id: &str,
        state: FeatureManageState,
    ) -> Result<()> {
        let prev = registry.set_feature_manage(feature_id, state)?;
        self.applied.push(AppliedChange::FeatureManage {
            feature_id: feature_id.to_string(),
            prev,
        });
        Ok(())
    }

    /// 变更安装时间戳
    pub fn set_installed_at(
        &mut self,
        registry: &mut ModuleRegistry,
        module_id: &str,
        value: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let module = registry
            .module_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        let prev = module.installed_at;
        module.installed_at = value;
        self.applied.push(AppliedChange::InstalledAt {
            module_id: module_id.to_string(),
            prev,
        });
        Ok(())
    }

    /// 摘除模块（保留快照供撤销）
    pub fn evict_module(
        &mut self,
        registry: &mut ModuleRegistry,
        module_id: &str,
    ) -> Result<ModuleDescriptor> {
        let snapshot = registry.evict(module_id)?;
        self.applied.push(AppliedChange::Evicted {
            snapshot: Box::new(snapshot.clone()),
        });
        Ok(snapshot)
    }

    /// 注册模块（撤销时摘除）
    pub fn register_module(
        &mut self,
        registry: &mut ModuleRegistry,
        descriptor: ModuleDescriptor,
    ) -> Result<String> {
        let module_id = registry.register(descriptor)?;
        self.applied.push(AppliedChange::Registered {
            module_id: module_id.clone(),
        });
        Ok(module_id)
    }

    // ==================== 存储补偿登记 ====================

    /// 登记一条存储补偿（在对应的存储写入成功之后调用）
    pub fn add_compensation(&mut self, compensation: StoreCompensation) {
        self.compensations.push(compensation);
    }

    // ==================== 了结 ====================

    /// 提交：全部变更生效，补偿作废
    pub fn commit(mut self) {
        self.settled = true;
        self.span
            .in_scope(|| info!(changes = self.applied.len(), "工作单元已提交"));
    }

    /// 中止：按逆序撤销注册表变更并执行存储补偿，返回最终上报的错误
    ///
    /// 补偿全部成功时返回原始错误（干净回滚）；任一补偿失败则升级为
    /// [`CoreError::RollbackFailed`]（双重故障，部分回滚）。
    pub async fn abort(
        mut self,
        registry: &mut ModuleRegistry,
        store: &dyn StateStore,
        original: CoreError,
    ) -> CoreError {
        self.settled = true;
        self.span
            .in_scope(|| warn!(error = %original, "工作单元中止，开始回滚"));

        let applied: Vec<AppliedChange> = self.applied.drain(..).collect();
        self.span.in_scope(|| Self::undo_changes(registry, applied));

        for compensation in self.compensations.iter().rev() {
            if let Err(comp_err) = compensation.run(store).await {
                self.span.in_scope(|| {
                    error!(
                        compensation = ?compensation,
                        error = %comp_err,
                        "补偿执行失败，回滚不完整"
                    )
                });
                return CoreError::RollbackFailed {
                    original: original.to_string(),
                    compensation: comp_err.to_string(),
                };
            }
        }

        self.span.in_scope(|| info!("回滚完成"));
        original
    }

    /// 按逆序撤销已应用的注册表变更
    fn undo_changes(registry: &mut ModuleRegistry, applied: Vec<AppliedChange>) {
        for change in applied.into_iter().rev() {
            match change {
                AppliedChange::ModuleManage { module_id, prev } => {
                    if registry.set_module_manage(&module_id, prev).is_err() {
                        warn!(module_id = %module_id, "撤销模块管理状态失败，模块已不存在");
                    }
                }
                AppliedChange::FeatureManage { feature_id, prev } => {
                    if registry.set_feature_manage(&feature_id, prev).is_err() {
                        warn!(feature_id = %feature_id, "撤销特性管理状态失败，特性已不存在");
                    }
                }
                AppliedChange::InstalledAt { module_id, prev } => {
                    if let Some(module) = registry.module_mut(&module_id) {
                        module.installed_at = prev;
                    }
                }
                AppliedChange::Evicted { snapshot } => {
                    registry.reinsert(*snapshot);
                }
                AppliedChange::Registered { module_id } => {
                    if registry.evict(&module_id).is_err() {
                        warn!(module_id = %module_id, "撤销注册失败，模块已不存在");
                    }
                }
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        // 兜底：协调器必须显式 commit/abort，走到这里说明有缺陷
        if !self.settled && (!self.applied.is_empty() || !self.compensations.is_empty()) {
            error!(
                uow_id = %self.uow_id,
                operation = %self.operation,
                target_id = %self.target_id,
                pending_changes = self.applied.len(),
                pending_compensations = self.compensations.len(),
                "工作单元未了结即被丢弃，存在未回滚的变更"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::store::MemoryStateStore;

    fn registry_with(id: &str) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDescriptor::new(id, Version::new(1, 0, 0)))
            .unwrap();
        registry
    }

    #[test]
    fn test_commit_keeps_changes() {
        let mut registry = registry_with("blog");
        let mut uow = UnitOfWork::new("install", "blog");

        uow.set_module_manage(&mut registry, "blog", ModuleManageState::Installed)
            .unwrap();
        uow.commit();

        assert!(registry.module("blog").unwrap().is_installed());
    }

    #[tokio::test]
    async fn test_abort_undoes_registry_changes_in_reverse() {
        let mut registry = registry_with("blog");
        let store = MemoryStateStore::new();
        let mut uow = UnitOfWork::new("install", "blog");

        uow.set_module_manage(&mut registry, "blog", ModuleManageState::Installed)
            .unwrap();
        uow.set_feature_manage(&mut registry, "blog", FeatureManageState::Enabled)
            .unwrap();
        uow.set_installed_at(&mut registry, "blog", Some(Utc::now()))
            .unwrap();

        let original = CoreError::StoreFailed {
            operation: "enable_feature".to_string(),
            reason: "连接中断".to_string(),
        };
        let reported = uow.abort(&mut registry, &store, original).await;

        // 干净回滚返回原始错误
        assert!(matches!(reported, CoreError::StoreFailed { .. }));
        let module = registry.module("blog").unwrap();
        assert_eq!(module.manage_state, ModuleManageState::RequiresInstall);
        assert!(module.installed_at.is_none());
        assert_eq!(
            registry.feature("blog").unwrap().manage_state,
            FeatureManageState::RequiresEnable
        );
    }

    #[tokio::test]
    async fn test_abort_runs_compensations() {
        let mut registry = registry_with("blog");
        let store = MemoryStateStore::new();

        // 模拟已成功的存储写入
        store
            .install_module("blog", &Version::new(1, 0, 0))
            .await
            .unwrap();

        let mut uow = UnitOfWork::new("install", "blog");
        uow.add_compensation(StoreCompensation::UninstallModule("blog".to_string()));

        let reported = uow
            .abort(
                &mut registry,
                &store,
                CoreError::Internal("后续步骤失败".to_string()),
            )
            .await;

        assert!(matches!(reported, CoreError::Internal(_)));
        // 补偿删除了安装记录
        use crate::module::store::StateStore;
        assert!(store.module_installed("blog").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_restores_evicted_module() {
        let mut registry = registry_with("blog");
        let store = MemoryStateStore::new();
        let mut uow = UnitOfWork::new("uninstall", "blog");

        uow.evict_module(&mut registry, "blog").unwrap();
        assert!(!registry.contains_module("blog"));

        uow.abort(
            &mut registry,
            &store,
            CoreError::Internal("失败".to_string()),
        )
        .await;

        assert!(registry.contains_module("blog"));
        assert!(registry.contains_feature("blog"));
    }

    #[tokio::test]
    async fn test_double_fault_reported_as_rollback_failed() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl StateStore for FailingStore {
            async fn install_module(&self, _: &str, _: &Version) -> Result<()> {
                Err(CoreError::StoreFailed {
                    operation: "install_module".to_string(),
                    reason: "存储不可用".to_string(),
                })
            }
            async fn uninstall_module(&self, _: &str) -> Result<()> {
                Err(CoreError::StoreFailed {
                    operation: "uninstall_module".to_string(),
                    reason: "存储不可用".to_string(),
                })
            }
            async fn enable_feature(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn disable_feature(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn module_installed(&self, _: &str) -> Result<Option<Version>> {
                Ok(None)
            }
            async fn feature_enabled(&self, _: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let mut registry = registry_with("blog");
        let mut uow = UnitOfWork::new("install", "blog");
        uow.add_compensation(StoreCompensation::UninstallModule("blog".to_string()));

        let reported = uow
            .abort(
                &mut registry,
                &FailingStore,
                CoreError::Internal("原始失败".to_string()),
            )
            .await;

        assert!(reported.is_double_fault());
    }
}
