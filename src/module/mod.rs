//! 模块内核
//!
//! 围绕描述符展开的激活内核：发现的模块与特性以描述符登记到注册表，
//! 运行时状态解析器整体重算错误条件位集，生命周期工作单元以补偿机制
//! 保证安装/启用操作的整体成功或整体回滚。

pub mod descriptor;
pub mod events;
pub mod graph;
pub mod identity;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod version;

pub use descriptor::{
    DependencyDescriptor, FeatureDescriptor, FeatureManageState, FeatureRuntimeState,
    ModuleDescriptor, ModuleManageState, ModuleRuntimeState,
};
pub use events::{EventPublisher, KernelEvent, KernelEventKind};
pub use graph::{topo_sort, Graph, SortOutcome};
pub use identity::{BinaryIdentity, IdentityResolver, RedirectRule, TableRedirectRule};
pub use lifecycle::{StoreCompensation, UnitOfWork};
pub use manager::ModuleManager;
pub use registry::ModuleRegistry;
pub use resolver::{Resolution, RuntimeResolver};
pub use store::{MemoryStateStore, StateStore};
pub use version::{constraint_matches, parse_version, VersionConstraint};
