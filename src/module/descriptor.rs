//! 描述符模型
//!
//! 定义模块、特性与依赖声明的描述符，以及两类状态：
//!
//! - **管理状态**（ManageState）：由调用方驱动的生命周期标志
//!   （已安装/已启用等），只被生命周期协调器修改
//! - **运行时状态**（RuntimeState）：由运行时状态解析器整体重算的
//!   错误条件位集，是数据而非异常
//!
//! 描述符之间的交叉引用全部用稳定的字符串 ID 表达，读取时经注册表
//! 查表解析，不持有反向指针。

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::module::identity::BinaryIdentity;
use crate::module::version::VersionConstraint;
use crate::utils::is_valid_descriptor_id;

// ============================================================================
// 运行时状态位集
// ============================================================================

bitflags::bitflags! {
    /// 特性的运行时错误条件位集
    ///
    /// 解析器每轮整体重算；多个依赖各自贡献的标志按位或累积，互不短路。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FeatureRuntimeState: u16 {
        /// 所属模块被禁止（宿主不兼容或管理员禁止）
        const FORBIDDEN_MODULE = 1 << 0;
        /// 所属模块未安装
        const UNINSTALL_MODULE = 1 << 1;
        /// 声明的依赖未解析到存活特性
        const MISSING_DEPENDENCY = 1 << 2;
        /// 依赖目标版本不满足约束
        const INCOMPATIBLE_DEPENDENCY = 1 << 3;
        /// 依赖目标自身被禁止
        const FORBIDDEN_DEPENDENCY = 1 << 4;
        /// 依赖目标尚未启用
        const DISABLED_DEPENDENCY = 1 << 5;
    }
}

bitflags::bitflags! {
    /// 模块的运行时错误条件位集
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ModuleRuntimeState: u16 {
        /// 宿主版本约束不满足当前宿主版本
        const INCOMPATIBLE_HOST = 1 << 0;
        /// 二进制身份无法物化
        const REFLECTION_FAILED = 1 << 1;
        /// 全部特性均带有错误条件
        const FORBIDDEN_FEATURES = 1 << 2;
        /// 管理员禁止
        const FORBIDDEN = 1 << 3;
        /// 等待安装
        const REQUIRE_INSTALL = 1 << 4;
    }
}

impl FeatureRuntimeState {
    /// 无任何错误条件
    pub fn is_none(&self) -> bool {
        self.is_empty()
    }
}

impl ModuleRuntimeState {
    /// 无任何错误条件
    pub fn is_none(&self) -> bool {
        self.is_empty()
    }
}

// ============================================================================
// 管理状态
// ============================================================================

/// 特性管理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureManageState {
    /// 等待启用（默认）
    RequiresEnable,
    /// 已启用
    Enabled,
    /// 已禁用
    Disabled,
}

impl Default for FeatureManageState {
    fn default() -> Self {
        FeatureManageState::RequiresEnable
    }
}

impl FeatureManageState {
    /// 是否可以启用
    pub fn can_enable(&self) -> bool {
        matches!(
            self,
            FeatureManageState::RequiresEnable | FeatureManageState::Disabled
        )
    }

    /// 是否可以禁用
    pub fn can_disable(&self) -> bool {
        matches!(self, FeatureManageState::Enabled)
    }
}

/// 模块管理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleManageState {
    /// 等待安装（默认）
    RequiresInstall,
    /// 已安装
    Installed,
    /// 无需安装器，发现即视为已安装
    AutoInstall,
}

impl Default for ModuleManageState {
    fn default() -> Self {
        ModuleManageState::RequiresInstall
    }
}

impl ModuleManageState {
    /// 是否处于已安装（含自动安装）状态
    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            ModuleManageState::Installed | ModuleManageState::AutoInstall
        )
    }

    /// 是否可以安装
    pub fn can_install(&self) -> bool {
        matches!(self, ModuleManageState::RequiresInstall)
    }

    /// 是否可以卸载
    pub fn can_uninstall(&self) -> bool {
        self.is_installed()
    }
}

// ============================================================================
// 依赖声明
// ============================================================================

/// 依赖声明
///
/// 指向目标特性的 ID，外加可选的版本约束（空缺匹配任何版本）。
/// 运行时由解析器解析到存活特性，解析失败以 MISSING_DEPENDENCY 标记。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// 目标特性 ID（非空）
    pub feature_id: String,

    /// 版本约束（对目标特性所属模块的版本求值）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<VersionConstraint>,
}

impl DependencyDescriptor {
    /// 创建依赖声明
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            constraint: None,
        }
    }

    /// 附加版本约束
    pub fn with_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

// ============================================================================
// 特性描述符
// ============================================================================

/// 特性描述符
///
/// 特性是依赖与启用/禁用的粒度单位。`dependings` 是派生的反向边
/// （谁依赖我），与 `runtime_state` 一样只由解析器重建。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// 特性唯一标识（在整个已加载集合内唯一）
    pub feature_id: String,

    /// 特性显示名称
    #[serde(default)]
    pub feature_name: String,

    /// 分类
    #[serde(default)]
    pub category: String,

    /// 所属模块 ID（构造后不再变化）
    pub module_id: String,

    /// 声明的依赖（有序）
    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,

    /// 派生的反向边：依赖本特性的特性 ID（由解析器重建）
    #[serde(default)]
    pub dependings: Vec<String>,

    /// 运行时错误条件位集（由解析器重算）
    #[serde(default)]
    pub runtime_state: FeatureRuntimeState,

    /// 管理状态（由生命周期协调器修改）
    #[serde(default)]
    pub manage_state: FeatureManageState,
}

impl FeatureDescriptor {
    /// 创建特性描述符
    pub fn new(feature_id: impl Into<String>, module_id: impl Into<String>) -> Self {
        let feature_id = feature_id.into();
        Self {
            feature_name: feature_id.clone(),
            feature_id,
            category: String::new(),
            module_id: module_id.into(),
            dependencies: Vec::new(),
            dependings: Vec::new(),
            runtime_state: FeatureRuntimeState::empty(),
            manage_state: FeatureManageState::default(),
        }
    }

    /// 设置显示名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.feature_name = name.into();
        self
    }

    /// 设置分类
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// 追加依赖声明
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 是否已启用
    pub fn is_enabled(&self) -> bool {
        self.manage_state == FeatureManageState::Enabled
    }

    /// 是否满足启用条件（无错误条件）
    pub fn is_eligible(&self) -> bool {
        self.runtime_state.is_none()
    }
}

// ============================================================================
// 模块描述符
// ============================================================================

/// 模块描述符
///
/// 模块是可发现、带版本的部署单位，独占其特性集合（级联销毁）。
/// 未显式声明特性的模块拥有恰好一个隐式特性，其 ID 等于模块 ID。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub module_id: String,

    /// 模块显示名称
    #[serde(default)]
    pub module_name: String,

    /// 模块版本
    pub version: Version,

    /// 对宿主自身版本的约束（空缺匹配任何宿主）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_constraint: Option<VersionConstraint>,

    /// 特性集合（非空，注册时补齐隐式特性）
    #[serde(default)]
    pub features: Vec<FeatureDescriptor>,

    /// 可加载代码单元的身份引用
    #[serde(default)]
    pub binaries: Vec<BinaryIdentity>,

    /// 物化后的具体身份（身份解析器填充）
    #[serde(default)]
    pub resolved_binaries: Vec<BinaryIdentity>,

    /// 二进制物化是否失败（解析为 REFLECTION_FAILED）
    #[serde(default)]
    pub binary_failed: bool,

    /// 是否被管理员禁止
    #[serde(default)]
    pub forbidden: bool,

    /// 是否声明了安装器（未声明的模块发现即自动安装）
    #[serde(default)]
    pub has_installer: bool,

    /// 运行时错误条件位集（由解析器重算）
    #[serde(default)]
    pub runtime_state: ModuleRuntimeState,

    /// 管理状态（由生命周期协调器修改）
    #[serde(default)]
    pub manage_state: ModuleManageState,

    /// 发现时间
    pub discovered_at: DateTime<Utc>,

    /// 安装时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

impl ModuleDescriptor {
    /// 创建模块描述符
    pub fn new(module_id: impl Into<String>, version: Version) -> Self {
        let module_id = module_id.into();
        Self {
            module_name: module_id.clone(),
            module_id,
            version,
            host_constraint: None,
            features: Vec::new(),
            binaries: Vec::new(),
            resolved_binaries: Vec::new(),
            binary_failed: false,
            forbidden: false,
            has_installer: true,
            runtime_state: ModuleRuntimeState::empty(),
            manage_state: ModuleManageState::default(),
            discovered_at: Utc::now(),
            installed_at: None,
        }
    }

    /// 设置显示名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// 设置宿主版本约束
    pub fn with_host_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.host_constraint = Some(constraint);
        self
    }

    /// 追加特性
    pub fn with_feature(mut self, feature: FeatureDescriptor) -> Self {
        self.features.push(feature);
        self
    }

    /// 追加二进制身份引用
    pub fn with_binary(mut self, identity: BinaryIdentity) -> Self {
        self.binaries.push(identity);
        self
    }

    /// 标记为未声明安装器（发现即自动安装）
    pub fn without_installer(mut self) -> Self {
        self.has_installer = false;
        self
    }

    /// 补齐隐式特性
    ///
    /// 未显式声明特性的模块获得恰好一个隐式特性，其 ID 等于模块 ID。
    pub fn ensure_implicit_feature(&mut self) {
        if self.features.is_empty() {
            self.features
                .push(FeatureDescriptor::new(self.module_id.clone(), self.module_id.clone()));
        }
    }

    /// 是否已安装（含自动安装）
    pub fn is_installed(&self) -> bool {
        self.manage_state.is_installed()
    }

    /// 校验描述符有效性
    ///
    /// 返回所有发现的问题；空列表表示有效。
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_valid_descriptor_id(&self.module_id) {
            errors.push(format!("模块 ID 格式无效: '{}'", self.module_id));
        }

        for feature in &self.features {
            if !is_valid_descriptor_id(&feature.feature_id) {
                errors.push(format!("特性 ID 格式无效: '{}'", feature.feature_id));
            }
            if feature.module_id != self.module_id {
                errors.push(format!(
                    "特性 '{}' 声明的所属模块 '{}' 与 '{}' 不一致",
                    feature.feature_id, feature.module_id, self.module_id
                ));
            }
            for dep in &feature.dependencies {
                if dep.feature_id.is_empty() {
                    errors.push(format!(
                        "特性 '{}' 存在空的依赖目标 ID",
                        feature.feature_id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
