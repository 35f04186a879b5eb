//! 运行时状态解析器
//!
//! 注册表的任何结构性变更（注册、摘除、管理状态变化、禁止开关）之后，
//! 解析器对全量描述符整体重算一轮运行时状态：
//!
//! 1. **模块遍**：逐模块求值宿主兼容性、二进制物化结果、管理员禁止
//!    与安装状态
//! 2. **特性遍**：按依赖优先的拓扑顺序逐特性求值，每条依赖声明各自
//!    贡献的错误标志按位或累积，互不短路；同时重建反向边
//! 3. **收尾**：全部特性均带错误条件的模块补记 FORBIDDEN_FEATURES
//!
//! 错误条件是数据而非异常：解析从不失败，结论写回描述符位集。按拓扑
//! 顺序处理保证不可用性沿依赖方向单调传播，一轮即收敛。

use std::collections::{HashMap, HashSet};

use semver::Version;
use tracing::{debug, instrument, trace};

use crate::module::descriptor::{FeatureRuntimeState, ModuleRuntimeState};
use crate::module::graph::{topo_sort, SortOutcome};
use crate::module::registry::ModuleRegistry;
use crate::module::version::constraint_matches;

/// 一轮解析的结论
///
/// 特性的依赖优先顺序与检测到的循环路径，供读取端查询装载顺序使用。
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 特性 ID 的依赖优先顺序（循环成员不在其中）
    pub feature_order: Vec<String>,
    /// 检测到的循环路径（首尾为同一特性 ID）；无循环时为 None
    pub cycle: Option<Vec<String>>,
}

/// 模块遍的中间结论，特性遍按归属模块查表
#[derive(Debug, Clone, Copy)]
struct ModuleFacts {
    /// 模块被禁止（管理员禁止、宿主不兼容或二进制物化失败）
    forbidden: bool,
    /// 模块已安装
    installed: bool,
}

/// 运行时状态解析器
///
/// 持有宿主自身的版本，对注册表执行整体重算。解析器无内部状态，
/// 同一注册表内容重复解析产生相同结论（幂等）。
#[derive(Debug, Clone)]
pub struct RuntimeResolver {
    host_version: Version,
}

impl RuntimeResolver {
    /// 以宿主版本创建解析器
    pub fn new(host_version: Version) -> Self {
        Self { host_version }
    }

    /// 宿主版本
    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// 对注册表整体重算一轮运行时状态
    #[instrument(skip_all, fields(modules = registry.module_count()))]
    pub fn resolve(&self, registry: &mut ModuleRegistry) -> Resolution {
        let module_facts = self.resolve_modules(registry);
        let outcome = self.sort_features(registry);
        self.resolve_features(registry, &module_facts, &outcome);
        self.finalize_modules(registry);

        debug!(
            sorted = outcome.sorted.len(),
            cycle = outcome.cycle.is_some(),
            "运行时状态解析完成"
        );

        Resolution {
            feature_order: outcome.sorted,
            cycle: outcome.cycle,
        }
    }

    // ==================== 模块遍 ====================

    /// 逐模块求值宿主兼容性、物化结果、禁止与安装状态
    fn resolve_modules(&self, registry: &mut ModuleRegistry) -> HashMap<String, ModuleFacts> {
        let mut facts = HashMap::new();

        for module_id in registry.module_ids() {
            let Some(module) = registry.module_mut(&module_id) else {
                continue;
            };

            let mut state = ModuleRuntimeState::empty();
            if !constraint_matches(module.host_constraint.as_ref(), &self.host_version) {
                state |= ModuleRuntimeState::INCOMPATIBLE_HOST;
            }
            if module.binary_failed {
                state |= ModuleRuntimeState::REFLECTION_FAILED;
            }
            if module.forbidden {
                state |= ModuleRuntimeState::FORBIDDEN;
            }
            if !module.is_installed() {
                state |= ModuleRuntimeState::REQUIRE_INSTALL;
            }
            module.runtime_state = state;

            trace!(module_id = %module_id, state = ?state, "模块状态已重算");
            facts.insert(
                module_id,
                ModuleFacts {
                    forbidden: state.intersects(
                        ModuleRuntimeState::FORBIDDEN | ModuleRuntimeState::INCOMPATIBLE_HOST,
                    ),
                    installed: module.is_installed(),
                },
            );
        }

        facts
    }

    // ==================== 特性遍 ====================

    /// 对全量特性做依赖优先排序
    fn sort_features(&self, registry: &ModuleRegistry) -> SortOutcome<String> {
        topo_sort(registry.feature_ids(), |feature_id| {
            registry.feature_dependency_ids(feature_id)
        })
    }

    /// 按拓扑顺序逐特性求值错误条件位集，并重建反向边
    fn resolve_features(
        &self,
        registry: &mut ModuleRegistry,
        module_facts: &HashMap<String, ModuleFacts>,
        outcome: &SortOutcome<String>,
    ) {
        // 先全量清零：循环成员相互引用时读到的是干净的基线，结论确定
        for feature_id in registry.feature_ids() {
            if let Some(feature) = registry.feature_mut(&feature_id) {
                feature.runtime_state = FeatureRuntimeState::empty();
                feature.dependings.clear();
            }
        }

        // 依赖优先顺序；循环成员排在末尾按声明顺序处理
        let sorted_set: HashSet<&String> = outcome.sorted.iter().collect();
        let mut order = outcome.sorted.clone();
        order.extend(
            registry
                .feature_ids()
                .into_iter()
                .filter(|id| !sorted_set.contains(id)),
        );

        for feature_id in order {
            // 拓扑排序可能引入注册表之外的目标 ID，跳过
            if !registry.contains_feature(&feature_id) {
                continue;
            }
            let state = self.feature_state(registry, module_facts, &feature_id);
            if let Some(feature) = registry.feature_mut(&feature_id) {
                feature.runtime_state = state;
            }
            trace!(feature_id = %feature_id, state = ?state, "特性状态已重算");

            // 重建反向边：声明方登记到每个已解析目标上
            for dep_id in registry.feature_dependency_ids(&feature_id) {
                if let Some(target) = registry.feature_mut(&dep_id) {
                    if !target.dependings.contains(&feature_id) {
                        target.dependings.push(feature_id.clone());
                    }
                }
            }
        }
    }

    /// 求值单个特性的错误条件位集
    ///
    /// 归属模块的条件与每条依赖声明的条件按位或累积，互不短路。
    /// 每条依赖的四类条件各自独立求值，同一目标可同时贡献多个标志
    /// （例如版本不匹配且归属模块被禁止时，INCOMPATIBLE_DEPENDENCY
    /// 与 FORBIDDEN_DEPENDENCY 并存）。
    fn feature_state(
        &self,
        registry: &ModuleRegistry,
        module_facts: &HashMap<String, ModuleFacts>,
        feature_id: &str,
    ) -> FeatureRuntimeState {
        let Some(feature) = registry.feature(feature_id) else {
            return FeatureRuntimeState::empty();
        };

        let mut state = FeatureRuntimeState::empty();

        if let Some(facts) = module_facts.get(&feature.module_id) {
            if facts.forbidden {
                state |= FeatureRuntimeState::FORBIDDEN_MODULE;
            }
            if !facts.installed {
                state |= FeatureRuntimeState::UNINSTALL_MODULE;
            }
        }

        for dep in &feature.dependencies {
            // 自依赖在图构建时被忽略，这里同样不贡献标志
            if dep.feature_id == feature.feature_id {
                continue;
            }

            let Some(target) = registry.feature(&dep.feature_id) else {
                state |= FeatureRuntimeState::MISSING_DEPENDENCY;
                continue;
            };

            // 约束对目标归属模块的版本求值
            if let Some(owner) = registry.module(&target.module_id) {
                if !constraint_matches(dep.constraint.as_ref(), &owner.version) {
                    state |= FeatureRuntimeState::INCOMPATIBLE_DEPENDENCY;
                }
            }

            // 目标归属模块被禁止或未安装，目标自身无法成立
            if let Some(facts) = module_facts.get(&target.module_id) {
                if facts.forbidden || !facts.installed {
                    state |= FeatureRuntimeState::FORBIDDEN_DEPENDENCY;
                }
            }

            // 目标未启用，或目标自身带错误条件（拓扑顺序保证已重算），
            // 不可用性沿依赖方向传播
            if !target.is_enabled() || !target.runtime_state.is_none() {
                state |= FeatureRuntimeState::DISABLED_DEPENDENCY;
            }
        }

        state
    }

    // ==================== 收尾 ====================

    /// 全部特性均带错误条件的模块补记 FORBIDDEN_FEATURES
    fn finalize_modules(&self, registry: &mut ModuleRegistry) {
        for module_id in registry.module_ids() {
            let all_flagged = registry
                .module(&module_id)
                .map(|m| m.features.iter().all(|f| !f.runtime_state.is_none()))
                .unwrap_or(false);

            if let Some(module) = registry.module_mut(&module_id) {
                if all_flagged {
                    module.runtime_state |= ModuleRuntimeState::FORBIDDEN_FEATURES;
                } else {
                    module.runtime_state -= ModuleRuntimeState::FORBIDDEN_FEATURES;
                }
            }
        }
    }
}
