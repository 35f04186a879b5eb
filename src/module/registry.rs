//! 模块注册表
//!
//! 以稳定 ID 为地址的描述符竞技场：模块描述符独占其特性集合，所有
//! 交叉引用（依赖目标、反向边、归属模块）都以字符串 ID 存储，读取时
//! 经本表查表解析，不存在反向指针和引用循环。
//!
//! 注册表本身不加锁，并发纪律由持有它的管理器的单一写锁保证。

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::module::descriptor::{
    FeatureDescriptor, FeatureManageState, ModuleDescriptor, ModuleManageState,
};
use crate::utils::{CoreError, Result};

/// 模块注册表
///
/// 维护全部已发现模块及其特性的描述符，并保证：
/// - 模块 ID 全局唯一
/// - 特性 ID 在整个已加载集合内全局唯一
/// - 迭代顺序与注册顺序一致（排序与解析的确定性依赖于此）
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    /// 已注册模块：module_id -> 描述符（特性内嵌，级联摘除）
    modules: HashMap<String, ModuleDescriptor>,

    /// 注册顺序
    module_order: Vec<String>,

    /// 特性归属表：feature_id -> module_id
    feature_owner: HashMap<String, String>,
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 注册 / 摘除 ====================

    /// 注册模块描述符
    ///
    /// 校验描述符、补齐隐式特性，并强制模块 ID 与特性 ID 的唯一性。
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidDescriptor`] - 描述符校验失败
    /// - [`CoreError::ModuleAlreadyRegistered`] - 模块 ID 冲突
    /// - [`CoreError::DuplicateFeature`] - 特性 ID 冲突
    pub fn register(&mut self, mut descriptor: ModuleDescriptor) -> Result<String> {
        descriptor.ensure_implicit_feature();
        descriptor.validate().map_err(CoreError::InvalidDescriptor)?;

        let module_id = descriptor.module_id.clone();
        if self.modules.contains_key(&module_id) {
            return Err(CoreError::ModuleAlreadyRegistered(module_id));
        }

        // 特性 ID 全局唯一（包括同一模块内的重复声明）
        let mut seen: Vec<&str> = Vec::new();
        for feature in &descriptor.features {
            if let Some(owner) = self.feature_owner.get(&feature.feature_id) {
                return Err(CoreError::DuplicateFeature {
                    feature_id: feature.feature_id.clone(),
                    owner: owner.clone(),
                });
            }
            if seen.contains(&feature.feature_id.as_str()) {
                return Err(CoreError::DuplicateFeature {
                    feature_id: feature.feature_id.clone(),
                    owner: module_id.clone(),
                });
            }
            seen.push(&feature.feature_id);
        }

        for feature in &descriptor.features {
            self.feature_owner
                .insert(feature.feature_id.clone(), module_id.clone());
        }
        self.module_order.push(module_id.clone());
        self.modules.insert(module_id.clone(), descriptor);

        debug!(module_id = %module_id, "模块已注册");
        Ok(module_id)
    }

    /// 摘除模块描述符（级联摘除其特性）
    ///
    /// 返回被摘除的描述符，供事件通知和回滚快照使用。
    pub fn evict(&mut self, module_id: &str) -> Result<ModuleDescriptor> {
        let descriptor = self
            .modules
            .remove(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        self.module_order.retain(|id| id != module_id);
        for feature in &descriptor.features {
            self.feature_owner.remove(&feature.feature_id);
        }

        debug!(module_id = %module_id, "模块已摘除");
        Ok(descriptor)
    }

    /// 回插模块描述符（回滚路径）
    ///
    /// 仅供工作单元撤销摘除使用，跳过常规校验。
    pub fn reinsert(&mut self, descriptor: ModuleDescriptor) {
        let module_id = descriptor.module_id.clone();
        if self.modules.contains_key(&module_id) {
            warn!(module_id = %module_id, "回插时模块已存在，忽略");
            return;
        }
        for feature in &descriptor.features {
            self.feature_owner
                .insert(feature.feature_id.clone(), module_id.clone());
        }
        self.module_order.push(module_id.clone());
        self.modules.insert(module_id, descriptor);
    }

    // ==================== 查询 ====================

    /// 获取模块描述符
    pub fn module(&self, module_id: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(module_id)
    }

    /// 获取可变模块描述符
    pub fn module_mut(&mut self, module_id: &str) -> Option<&mut ModuleDescriptor> {
        self.modules.get_mut(module_id)
    }

    /// 获取特性描述符
    pub fn feature(&self, feature_id: &str) -> Option<&FeatureDescriptor> {
        let owner = self.feature_owner.get(feature_id)?;
        self.modules
            .get(owner)?
            .features
            .iter()
            .find(|f| f.feature_id == feature_id)
    }

    /// 获取可变特性描述符
    pub fn feature_mut(&mut self, feature_id: &str) -> Option<&mut FeatureDescriptor> {
        let owner = self.feature_owner.get(feature_id)?.clone();
        self.modules
            .get_mut(&owner)?
            .features
            .iter_mut()
            .find(|f| f.feature_id == feature_id)
    }

    /// 特性归属的模块 ID
    pub fn owner_of(&self, feature_id: &str) -> Option<&str> {
        self.feature_owner.get(feature_id).map(|s| s.as_str())
    }

    /// 是否包含指定模块
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    /// 是否包含指定特性
    pub fn contains_feature(&self, feature_id: &str) -> bool {
        self.feature_owner.contains_key(feature_id)
    }

    /// 模块数量
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 全部模块 ID（注册顺序）
    pub fn module_ids(&self) -> Vec<String> {
        self.module_order.clone()
    }

    /// 全部特性 ID（模块注册顺序 × 特性声明顺序）
    pub fn feature_ids(&self) -> Vec<String> {
        self.module_order
            .iter()
            .filter_map(|id| self.modules.get(id))
            .flat_map(|m| m.features.iter().map(|f| f.feature_id.clone()))
            .collect()
    }

    /// 按注册顺序迭代模块
    pub fn modules_in_order(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.module_order
            .iter()
            .filter_map(|id| self.modules.get(id))
    }

    // ==================== 派生查询 ====================

    /// 特性的依赖目标特性 ID（声明顺序，含未解析目标）
    pub fn feature_dependency_ids(&self, feature_id: &str) -> Vec<String> {
        self.feature(feature_id)
            .map(|f| {
                f.dependencies
                    .iter()
                    .map(|d| d.feature_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 模块级依赖：由其各特性的依赖声明派生的模块 ID 集合
    ///
    /// 仅包含解析到存活特性且不等于自身的目标，保持首次出现顺序。
    pub fn module_dependency_ids(&self, module_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let Some(module) = self.modules.get(module_id) else {
            return result;
        };

        for feature in &module.features {
            for dep in &feature.dependencies {
                if let Some(owner) = self.feature_owner.get(&dep.feature_id) {
                    if owner != module_id && !result.contains(owner) {
                        result.push(owner.clone());
                    }
                }
            }
        }
        result
    }

    /// 依赖指定模块且当前已安装的模块 ID（卸载前置检查）
    pub fn installed_dependents(&self, module_id: &str) -> Vec<String> {
        self.module_order
            .iter()
            .filter(|id| id.as_str() != module_id)
            .filter(|id| {
                self.modules
                    .get(id.as_str())
                    .map(|m| m.is_installed())
                    .unwrap_or(false)
            })
            .filter(|id| {
                self.module_dependency_ids(id)
                    .iter()
                    .any(|dep| dep == module_id)
            })
            .cloned()
            .collect()
    }

    // ==================== 状态修改 ====================

    /// 设置模块管理状态，返回先前值
    pub fn set_module_manage(
        &mut self,
        module_id: &str,
        state: ModuleManageState,
    ) -> Result<ModuleManageState> {
        let module = self
            .modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        let previous = module.manage_state;
        module.manage_state = state;
        debug!(module_id = %module_id, state = ?state, "模块管理状态已更新");
        Ok(previous)
    }

    /// 设置特性管理状态，返回先前值
    pub fn set_feature_manage(
        &mut self,
        feature_id: &str,
        state: FeatureManageState,
    ) -> Result<FeatureManageState> {
        let feature = self
            .feature_mut(feature_id)
            .ok_or_else(|| CoreError::FeatureNotFound(feature_id.to_string()))?;
        let previous = feature.manage_state;
        feature.manage_state = state;
        debug!(feature_id = %feature_id, state = ?state, "特性管理状态已更新");
        Ok(previous)
    }
}
