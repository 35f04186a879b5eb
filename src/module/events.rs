//! 内核事件
//!
//! 生命周期操作成功提交后对外广播事件。事件携带描述符在提交时刻的
//! 快照，订阅方拿到的是值拷贝，不持有注册表内部的引用。
//!
//! 事件在操作的写锁释放之后投递，订阅方的异步回调不会阻塞注册表。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::module::descriptor::{FeatureDescriptor, ModuleDescriptor};
use crate::utils::generate_uuid;

/// 事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEventKind {
    /// 模块已注册（发现阶段完成）
    ModuleRegistered { module: ModuleDescriptor },
    /// 模块已安装
    ModuleInstalled { module: ModuleDescriptor },
    /// 模块已卸载（快照为卸载前的描述符）
    ModuleUninstalled { module: ModuleDescriptor },
    /// 特性已启用
    FeatureEnabled { feature: FeatureDescriptor },
    /// 特性已禁用
    FeatureDisabled { feature: FeatureDescriptor },
    /// 模块禁止开关变化
    ModuleForbiddenChanged { module_id: String, forbidden: bool },
}

/// 内核事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelEvent {
    /// 事件唯一标识
    pub event_id: String,

    /// 事件产生时间
    pub timestamp: DateTime<Utc>,

    /// 载荷
    #[serde(flatten)]
    pub kind: KernelEventKind,
}

impl KernelEvent {
    /// 创建事件
    pub fn new(kind: KernelEventKind) -> Self {
        Self {
            event_id: generate_uuid(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// 事件涉及的模块 ID（特性事件返回其归属模块）
    pub fn module_id(&self) -> &str {
        match &self.kind {
            KernelEventKind::ModuleRegistered { module }
            | KernelEventKind::ModuleInstalled { module }
            | KernelEventKind::ModuleUninstalled { module } => &module.module_id,
            KernelEventKind::FeatureEnabled { feature }
            | KernelEventKind::FeatureDisabled { feature } => &feature.module_id,
            KernelEventKind::ModuleForbiddenChanged { module_id, .. } => module_id,
        }
    }
}

/// 事件订阅回调
///
/// 回调返回异步任务，由管理器在锁外逐个等待。
pub type EventPublisher = Arc<dyn Fn(KernelEvent) -> BoxFuture<'static, ()> + Send + Sync>;
