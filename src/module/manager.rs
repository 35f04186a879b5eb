//! 模块管理器
//!
//! 内核的对外门面：发现注册、安装/卸载、启用/禁用、禁止开关与各类
//! 快照查询都从这里进出。
//!
//! 并发纪律：内部状态由单把 [`tokio::sync::RwLock`] 保护，所有变更
//! 操作持写锁执行——先落外部存储、再改注册表、最后整体重算运行时
//! 状态，三步都在同一把写锁内完成，读取端看不到中间态。事件在写锁
//! 释放之后投递。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::module::descriptor::{
    FeatureDescriptor, FeatureManageState, ModuleDescriptor, ModuleManageState,
    ModuleRuntimeState,
};
use crate::module::events::{EventPublisher, KernelEvent, KernelEventKind};
use crate::module::graph::topo_sort;
use crate::module::identity::{IdentityResolver, RedirectRule};
use crate::module::lifecycle::{StoreCompensation, UnitOfWork};
use crate::module::registry::ModuleRegistry;
use crate::module::resolver::{Resolution, RuntimeResolver};
use crate::module::store::StateStore;
use crate::core::config::KernelConfig;
use crate::utils::{CoreError, Result};

/// 写锁保护的内核状态
struct KernelState {
    registry: ModuleRegistry,
    identity: IdentityResolver,
    resolution: Resolution,
}

/// 模块管理器
pub struct ModuleManager {
    state: Arc<RwLock<KernelState>>,
    store: Arc<dyn StateStore>,
    resolver: RuntimeResolver,
    publishers: Arc<RwLock<Vec<EventPublisher>>>,
}

impl ModuleManager {
    /// 以宿主版本与状态存储创建管理器
    pub fn new(host_version: semver::Version, store: Arc<dyn StateStore>) -> Self {
        info!(host_version = %host_version, "模块管理器已创建");
        Self {
            state: Arc::new(RwLock::new(KernelState {
                registry: ModuleRegistry::new(),
                identity: IdentityResolver::new(),
                resolution: Resolution::default(),
            })),
            store,
            resolver: RuntimeResolver::new(host_version),
            publishers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 从内核配置创建管理器
    pub fn from_config(config: &KernelConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        Ok(Self::new(config.parsed_host_version()?, store))
    }

    /// 宿主版本
    pub fn host_version(&self) -> &semver::Version {
        self.resolver.host_version()
    }

    // ==================== 订阅与重定向规则 ====================

    /// 订阅内核事件
    pub async fn subscribe(&self, publisher: EventPublisher) {
        self.publishers.write().await.push(publisher);
    }

    /// 追加二进制重定向规则
    pub async fn add_redirect_rule(&self, rule: Box<dyn RedirectRule>) {
        self.state.write().await.identity.add_rule(rule);
    }

    /// 投递事件（写锁外）
    async fn publish(&self, events: Vec<KernelEvent>) {
        if events.is_empty() {
            return;
        }
        let publishers = self.publishers.read().await.clone();
        for event in events {
            debug!(event_id = %event.event_id, module_id = %event.module_id(), "投递事件");
            for publisher in &publishers {
                publisher(event.clone()).await;
            }
        }
    }

    // ==================== 发现注册 ====================

    /// 注册一批发现的模块描述符
    ///
    /// 逐个物化二进制身份、从存储同步管理状态并登记到注册表；任一
    /// 描述符失败时本次调用已登记的模块全部回退。未声明安装器的模块
    /// 发现即视为已安装。
    #[instrument(skip_all, fields(count = descriptors.len()))]
    pub async fn register_modules(
        &self,
        descriptors: Vec<ModuleDescriptor>,
    ) -> Result<Vec<String>> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write().await;
            let mut registered: Vec<String> = Vec::new();

            for descriptor in descriptors {
                let prepared = match self.prepare_descriptor(&state.identity, descriptor).await {
                    Ok(d) => d,
                    Err(e) => {
                        for id in registered.iter().rev() {
                            let _ = state.registry.evict(id);
                        }
                        return Err(e);
                    }
                };
                match state.registry.register(prepared) {
                    Ok(id) => registered.push(id),
                    Err(e) => {
                        for id in registered.iter().rev() {
                            let _ = state.registry.evict(id);
                        }
                        return Err(e);
                    }
                }
            }

            state.resolution = self.resolver.resolve(&mut state.registry);

            for id in &registered {
                if let Some(module) = state.registry.module(id) {
                    events.push(KernelEvent::new(KernelEventKind::ModuleRegistered {
                        module: module.clone(),
                    }));
                }
            }
            info!(registered = registered.len(), "模块批次注册完成");
            Ok(registered)
        };

        self.publish(events).await;
        result
    }

    /// 物化二进制身份并从存储同步管理状态
    async fn prepare_descriptor(
        &self,
        identity: &IdentityResolver,
        mut descriptor: ModuleDescriptor,
    ) -> Result<ModuleDescriptor> {
        // 先补齐隐式特性，保证无显式特性的模块也参与状态同步
        descriptor.ensure_implicit_feature();

        // 二进制物化：任一请求未解析即标记失败
        descriptor.resolved_binaries.clear();
        descriptor.binary_failed = false;
        for requested in &descriptor.binaries {
            match identity.resolve(requested) {
                Some(resolved) => descriptor.resolved_binaries.push(resolved),
                None => {
                    warn!(
                        module_id = %descriptor.module_id,
                        requested = %requested,
                        "二进制身份未解析"
                    );
                    descriptor.binary_failed = true;
                }
            }
        }

        // 管理状态以外部存储为准
        if !descriptor.has_installer {
            descriptor.manage_state = ModuleManageState::AutoInstall;
        } else if self
            .store
            .module_installed(&descriptor.module_id)
            .await?
            .is_some()
        {
            descriptor.manage_state = ModuleManageState::Installed;
        }

        for feature in &mut descriptor.features {
            if self.store.feature_enabled(&feature.feature_id).await? {
                feature.manage_state = FeatureManageState::Enabled;
            }
        }

        Ok(descriptor)
    }

    // ==================== 安装 / 卸载 ====================

    /// 安装模块
    #[instrument(skip(self))]
    pub async fn install_module(&self, module_id: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let module = state
                .registry
                .module(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            if !module.manage_state.can_install() {
                return Err(CoreError::InvalidTransition {
                    module_id: module_id.to_string(),
                    operation: "install".to_string(),
                    reason: format!("当前管理状态为 {:?}", module.manage_state),
                });
            }
            if module.runtime_state.intersects(
                ModuleRuntimeState::FORBIDDEN
                    | ModuleRuntimeState::INCOMPATIBLE_HOST
                    | ModuleRuntimeState::REFLECTION_FAILED,
            ) {
                return Err(CoreError::InvalidTransition {
                    module_id: module_id.to_string(),
                    operation: "install".to_string(),
                    reason: format!("运行时条件阻止安装: {:?}", module.runtime_state),
                });
            }
            let version = module.version.clone();

            let mut uow = UnitOfWork::new("install", module_id);

            if let Err(e) = self.store.install_module(module_id, &version).await {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            uow.add_compensation(StoreCompensation::UninstallModule(module_id.to_string()));

            if let Err(e) =
                uow.set_module_manage(&mut state.registry, module_id, ModuleManageState::Installed)
            {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            if let Err(e) = uow.set_installed_at(&mut state.registry, module_id, Some(Utc::now())) {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }

            uow.commit();
            state.resolution = self.resolver.resolve(&mut state.registry);

            if let Some(module) = state.registry.module(module_id) {
                events.push(KernelEvent::new(KernelEventKind::ModuleInstalled {
                    module: module.clone(),
                }));
            }
            info!(module_id = %module_id, "模块安装完成");
        }

        self.publish(events).await;
        Ok(())
    }

    /// 卸载模块
    ///
    /// 被其他已安装模块依赖的模块拒绝卸载；已启用的特性随卸载一并
    /// 禁用，全部写入同一个工作单元。
    #[instrument(skip(self))]
    pub async fn uninstall_module(&self, module_id: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let module = state
                .registry
                .module(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            if !module.manage_state.can_uninstall() {
                return Err(CoreError::InvalidTransition {
                    module_id: module_id.to_string(),
                    operation: "uninstall".to_string(),
                    reason: format!("当前管理状态为 {:?}", module.manage_state),
                });
            }

            let dependents = state.registry.installed_dependents(module_id);
            if !dependents.is_empty() {
                return Err(CoreError::ModuleHasDependents {
                    module: module_id.to_string(),
                    dependents,
                });
            }

            let version = module.version.clone();
            let enabled_features: Vec<String> = module
                .features
                .iter()
                .filter(|f| f.is_enabled())
                .map(|f| f.feature_id.clone())
                .collect();
            let snapshot = module.clone();

            let mut uow = UnitOfWork::new("uninstall", module_id);

            // 先禁用存活的启用记录
            for feature_id in &enabled_features {
                if let Err(e) = self.store.disable_feature(feature_id).await {
                    return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
                }
                uow.add_compensation(StoreCompensation::EnableFeature(feature_id.clone()));
                if let Err(e) = uow.set_feature_manage(
                    &mut state.registry,
                    feature_id,
                    FeatureManageState::RequiresEnable,
                ) {
                    return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
                }
            }

            if let Err(e) = self.store.uninstall_module(module_id).await {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            uow.add_compensation(StoreCompensation::InstallModule(
                module_id.to_string(),
                version,
            ));

            if let Err(e) = uow.set_module_manage(
                &mut state.registry,
                module_id,
                ModuleManageState::RequiresInstall,
            ) {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            if let Err(e) = uow.set_installed_at(&mut state.registry, module_id, None) {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }

            uow.commit();
            state.resolution = self.resolver.resolve(&mut state.registry);

            events.push(KernelEvent::new(KernelEventKind::ModuleUninstalled {
                module: snapshot,
            }));
            info!(module_id = %module_id, "模块卸载完成");
        }

        self.publish(events).await;
        Ok(())
    }

    /// 从注册表移除未安装的模块（级联移除其特性）
    #[instrument(skip(self))]
    pub async fn remove_module(&self, module_id: &str) -> Result<ModuleDescriptor> {
        let mut state = self.state.write().await;
        let module = state
            .registry
            .module(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        if module.is_installed() {
            return Err(CoreError::InvalidTransition {
                module_id: module_id.to_string(),
                operation: "remove".to_string(),
                reason: "模块仍处于已安装状态".to_string(),
            });
        }

        let removed = state.registry.evict(module_id)?;
        state.resolution = self.resolver.resolve(&mut state.registry);
        info!(module_id = %module_id, "模块已移除");
        Ok(removed)
    }

    // ==================== 启用 / 禁用 ====================

    /// 启用特性
    ///
    /// 仅在特性无任何运行时错误条件时允许。
    #[instrument(skip(self))]
    pub async fn enable_feature(&self, feature_id: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let feature = state
                .registry
                .feature(feature_id)
                .ok_or_else(|| CoreError::FeatureNotFound(feature_id.to_string()))?;

            if !feature.manage_state.can_enable() {
                return Err(CoreError::InvalidTransition {
                    module_id: feature.module_id.clone(),
                    operation: "enable".to_string(),
                    reason: format!("特性 '{}' 当前管理状态为 {:?}", feature_id, feature.manage_state),
                });
            }
            if !feature.is_eligible() {
                return Err(CoreError::FeatureNotEligible {
                    feature_id: feature_id.to_string(),
                    reason: format!("{:?}", feature.runtime_state),
                });
            }

            let mut uow = UnitOfWork::new("enable", feature_id);

            if let Err(e) = self.store.enable_feature(feature_id).await {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            uow.add_compensation(StoreCompensation::DisableFeature(feature_id.to_string()));

            if let Err(e) = uow.set_feature_manage(
                &mut state.registry,
                feature_id,
                FeatureManageState::Enabled,
            ) {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }

            uow.commit();
            state.resolution = self.resolver.resolve(&mut state.registry);

            if let Some(feature) = state.registry.feature(feature_id) {
                events.push(KernelEvent::new(KernelEventKind::FeatureEnabled {
                    feature: feature.clone(),
                }));
            }
            info!(feature_id = %feature_id, "特性启用完成");
        }

        self.publish(events).await;
        Ok(())
    }

    /// 禁用特性
    ///
    /// 允许禁用被依赖的特性，依赖方在下一轮解析中得到
    /// DISABLED_DEPENDENCY 条件。
    #[instrument(skip(self))]
    pub async fn disable_feature(&self, feature_id: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let feature = state
                .registry
                .feature(feature_id)
                .ok_or_else(|| CoreError::FeatureNotFound(feature_id.to_string()))?;

            if !feature.manage_state.can_disable() {
                return Err(CoreError::InvalidTransition {
                    module_id: feature.module_id.clone(),
                    operation: "disable".to_string(),
                    reason: format!("特性 '{}' 当前管理状态为 {:?}", feature_id, feature.manage_state),
                });
            }

            let mut uow = UnitOfWork::new("disable", feature_id);

            if let Err(e) = self.store.disable_feature(feature_id).await {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }
            uow.add_compensation(StoreCompensation::EnableFeature(feature_id.to_string()));

            if let Err(e) = uow.set_feature_manage(
                &mut state.registry,
                feature_id,
                FeatureManageState::Disabled,
            ) {
                return Err(uow.abort(&mut state.registry, self.store.as_ref(), e).await);
            }

            uow.commit();
            state.resolution = self.resolver.resolve(&mut state.registry);

            if let Some(feature) = state.registry.feature(feature_id) {
                events.push(KernelEvent::new(KernelEventKind::FeatureDisabled {
                    feature: feature.clone(),
                }));
            }
            info!(feature_id = %feature_id, "特性禁用完成");
        }

        self.publish(events).await;
        Ok(())
    }

    // ==================== 批量操作 ====================

    /// 按依赖优先顺序安装一批模块
    ///
    /// 批次按模块级依赖图排序后逐个安装，每个模块一个独立的工作单元；
    /// 首个失败即停止并返回该错误，已完成的安装保持生效。已处于安装
    /// 状态的模块跳过。返回实际安装的模块 ID（安装顺序）。
    #[instrument(skip(self))]
    pub async fn install_modules(&self, module_ids: &[String]) -> Result<Vec<String>> {
        let ordered = self.order_modules(module_ids, false).await?;
        let mut installed = Vec::new();

        for module_id in ordered {
            let skip = {
                let state = self.state.read().await;
                state
                    .registry
                    .module(&module_id)
                    .map(|m| m.is_installed())
                    .unwrap_or(false)
            };
            if skip {
                debug!(module_id = %module_id, "模块已安装，跳过");
                continue;
            }
            self.install_module(&module_id).await?;
            installed.push(module_id);
        }

        Ok(installed)
    }

    /// 按依赖方优先（安装顺序的逆序）卸载一批模块
    #[instrument(skip(self))]
    pub async fn uninstall_modules(&self, module_ids: &[String]) -> Result<Vec<String>> {
        let ordered = self.order_modules(module_ids, true).await?;
        let mut uninstalled = Vec::new();

        for module_id in ordered {
            let skip = {
                let state = self.state.read().await;
                state
                    .registry
                    .module(&module_id)
                    .map(|m| !m.is_installed())
                    .unwrap_or(true)
            };
            if skip {
                debug!(module_id = %module_id, "模块未安装，跳过");
                continue;
            }
            self.uninstall_module(&module_id).await?;
            uninstalled.push(module_id);
        }

        Ok(uninstalled)
    }

    /// 按模块 ID 前缀批量安装（同一子系统的模块常共享前缀）
    #[instrument(skip(self))]
    pub async fn install_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let matched = self.modules_with_prefix(prefix).await;
        self.install_modules(&matched).await
    }

    /// 按模块 ID 前缀批量卸载
    #[instrument(skip(self))]
    pub async fn uninstall_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let matched = self.modules_with_prefix(prefix).await;
        self.uninstall_modules(&matched).await
    }

    async fn modules_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .registry
            .module_ids()
            .into_iter()
            .filter(|id| id.starts_with(prefix))
            .collect()
    }

    /// 按依赖优先顺序启用一批特性
    ///
    /// 与模块批次同样的语义：逐个独立的工作单元，首个失败即停止，
    /// 已启用的保持生效；已处于启用状态的特性跳过。
    #[instrument(skip(self))]
    pub async fn enable_features(&self, feature_ids: &[String]) -> Result<Vec<String>> {
        let ordered = self.order_features(feature_ids, false).await?;
        let mut enabled = Vec::new();

        for feature_id in ordered {
            let skip = {
                let state = self.state.read().await;
                state
                    .registry
                    .feature(&feature_id)
                    .map(|f| f.is_enabled())
                    .unwrap_or(false)
            };
            if skip {
                debug!(feature_id = %feature_id, "特性已启用，跳过");
                continue;
            }
            self.enable_feature(&feature_id).await?;
            enabled.push(feature_id);
        }

        Ok(enabled)
    }

    /// 按依赖方优先（启用顺序的逆序）禁用一批特性
    #[instrument(skip(self))]
    pub async fn disable_features(&self, feature_ids: &[String]) -> Result<Vec<String>> {
        let ordered = self.order_features(feature_ids, true).await?;
        let mut disabled = Vec::new();

        for feature_id in ordered {
            let skip = {
                let state = self.state.read().await;
                state
                    .registry
                    .feature(&feature_id)
                    .map(|f| !f.is_enabled())
                    .unwrap_or(true)
            };
            if skip {
                debug!(feature_id = %feature_id, "特性未启用，跳过");
                continue;
            }
            self.disable_feature(&feature_id).await?;
            disabled.push(feature_id);
        }

        Ok(disabled)
    }

    /// 对批次内的特性做依赖优先排序（reverse = 依赖方优先）
    async fn order_features(&self, feature_ids: &[String], reverse: bool) -> Result<Vec<String>> {
        let state = self.state.read().await;

        for feature_id in feature_ids {
            if !state.registry.contains_feature(feature_id) {
                return Err(CoreError::FeatureNotFound(feature_id.clone()));
            }
        }

        let members: Vec<String> = feature_ids.to_vec();
        let outcome = topo_sort(members.clone(), |feature_id| {
            state
                .registry
                .feature_dependency_ids(feature_id)
                .into_iter()
                .filter(|dep| members.contains(dep))
                .collect()
        });

        if let Some(cycle) = outcome.cycle {
            return Err(CoreError::Internal(format!(
                "批次内存在特性循环依赖: {}",
                cycle.join(" -> ")
            )));
        }

        let mut ordered = outcome.sorted;
        if reverse {
            ordered.reverse();
        }
        Ok(ordered)
    }

    /// 对批次内的模块做依赖优先排序（reverse = 依赖方优先）
    async fn order_modules(&self, module_ids: &[String], reverse: bool) -> Result<Vec<String>> {
        let state = self.state.read().await;

        for module_id in module_ids {
            if !state.registry.contains_module(module_id) {
                return Err(CoreError::ModuleNotFound(module_id.clone()));
            }
        }

        let members: Vec<String> = module_ids.to_vec();
        let outcome = topo_sort(members.clone(), |module_id| {
            // 依赖边限制在批次内部，批次外的依赖由安装前置检查兜底
            state
                .registry
                .module_dependency_ids(module_id)
                .into_iter()
                .filter(|dep| members.contains(dep))
                .collect()
        });

        if let Some(cycle) = outcome.cycle {
            return Err(CoreError::Internal(format!(
                "批次内存在模块循环依赖: {}",
                cycle.join(" -> ")
            )));
        }

        let mut ordered = outcome.sorted;
        if reverse {
            ordered.reverse();
        }
        Ok(ordered)
    }

    // ==================== 禁止开关 ====================

    /// 设置模块的管理员禁止开关
    #[instrument(skip(self))]
    pub async fn set_module_forbidden(&self, module_id: &str, forbidden: bool) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let module = state
                .registry
                .module_mut(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            if module.forbidden == forbidden {
                return Ok(());
            }
            module.forbidden = forbidden;
            state.resolution = self.resolver.resolve(&mut state.registry);

            events.push(KernelEvent::new(KernelEventKind::ModuleForbiddenChanged {
                module_id: module_id.to_string(),
                forbidden,
            }));
            info!(module_id = %module_id, forbidden = forbidden, "模块禁止开关已更新");
        }

        self.publish(events).await;
        Ok(())
    }

    // ==================== 查询 ====================

    /// 模块描述符快照
    pub async fn module_snapshot(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.state.read().await.registry.module(module_id).cloned()
    }

    /// 特性描述符快照
    pub async fn feature_snapshot(&self, feature_id: &str) -> Option<FeatureDescriptor> {
        self.state.read().await.registry.feature(feature_id).cloned()
    }

    /// 全部模块快照（注册顺序）
    pub async fn list_modules(&self) -> Vec<ModuleDescriptor> {
        self.state
            .read()
            .await
            .registry
            .modules_in_order()
            .cloned()
            .collect()
    }

    /// 模块数量
    pub async fn module_count(&self) -> usize {
        self.state.read().await.registry.module_count()
    }

    /// 特性的依赖优先装载顺序（最近一轮解析的结论）
    pub async fn load_order(&self) -> Vec<String> {
        self.state.read().await.resolution.feature_order.clone()
    }

    /// 最近一轮解析检测到的循环路径
    pub async fn find_cycle(&self) -> Option<Vec<String>> {
        self.state.read().await.resolution.cycle.clone()
    }
}
