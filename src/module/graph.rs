//! 依赖图引擎
//!
//! 提供一个通用的有向依赖图构建器和两个算法：叶子优先的拓扑排序，以及
//! 循环提取。引擎对模块/特性一无所知：节点是任意值类型 `T`，边由调用方
//! 提供的"依赖查询"函数给出。
//!
//! 图是纯瞬态结构：每次解析都重新构建，从不持久化，也不会在构建它的
//! 调用之外共享。
//!
//! # 示例
//!
//! ```rust
//! use taro_core::module::graph::topo_sort;
//!
//! let values = vec!["app", "service", "database"];
//! let outcome = topo_sort(values, |v| match *v {
//!     "app" => vec!["service"],
//!     "service" => vec!["database"],
//!     _ => vec![],
//! });
//!
//! assert!(outcome.cycle.is_none());
//! // 被依赖方排在依赖方之前
//! assert_eq!(outcome.sorted, vec!["database", "service", "app"]);
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// 图节点
///
/// 边用节点下标表示；`outgoings` 指向该节点依赖的节点，`incomings`
/// 指向依赖该节点的节点。
#[derive(Debug, Clone)]
struct GraphNode<T> {
    /// 节点值
    value: T,
    /// 正向边：该节点依赖的节点下标
    outgoings: Vec<usize>,
    /// 反向边：依赖该节点的节点下标
    incomings: Vec<usize>,
}

/// 依赖图
///
/// 按值相等去重，并保持首次出现的顺序（排序的确定性依赖于此）。
#[derive(Debug, Clone)]
pub struct Graph<T> {
    nodes: Vec<GraphNode<T>>,
    index: HashMap<T, usize>,
}

impl<T: Eq + Hash + Clone> Graph<T> {
    /// 从值序列和依赖查询函数构建依赖图
    ///
    /// 对每个值创建或复用节点（按值相等去重，保持首次出现顺序）；对每个
    /// 声明的依赖创建/查找其节点，并连接 所有者→依赖 的正向边与对应的
    /// 反向边。自依赖被忽略（不算错误）。依赖查询返回的值即使不在输入
    /// 序列中也会获得节点。
    pub fn build<I, F>(values: I, dependencies_of: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> Vec<T>,
    {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };

        let roots: Vec<usize> = values.into_iter().map(|v| graph.intern(v)).collect();

        for owner_idx in roots {
            let owner_value = graph.nodes[owner_idx].value.clone();
            for dep_value in dependencies_of(&owner_value) {
                // 自依赖忽略
                if dep_value == owner_value {
                    continue;
                }
                let dep_idx = graph.intern(dep_value);
                graph.link(owner_idx, dep_idx);
            }
        }

        graph
    }

    /// 创建或复用节点，返回下标
    fn intern(&mut self, value: T) -> usize {
        if let Some(&idx) = self.index.get(&value) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(value.clone(), idx);
        self.nodes.push(GraphNode {
            value,
            outgoings: Vec::new(),
            incomings: Vec::new(),
        });
        idx
    }

    /// 连接 owner → dep 边（避免重复）
    fn link(&mut self, owner: usize, dep: usize) {
        if !self.nodes[owner].outgoings.contains(&dep) {
            self.nodes[owner].outgoings.push(dep);
        }
        if !self.nodes[dep].incomings.contains(&owner) {
            self.nodes[dep].incomings.push(owner);
        }
    }

    /// 节点数量
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 图是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 是否包含指定值
    pub fn contains(&self, value: &T) -> bool {
        self.index.contains_key(value)
    }

    /// 获取某个值的直接依赖（按声明顺序）
    pub fn dependencies_of(&self, value: &T) -> Vec<T> {
        self.index
            .get(value)
            .map(|&idx| {
                self.nodes[idx]
                    .outgoings
                    .iter()
                    .map(|&dep| self.nodes[dep].value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 获取依赖某个值的值列表（反向边，按首次出现顺序）
    pub fn dependents_of(&self, value: &T) -> Vec<T> {
        self.index
            .get(value)
            .map(|&idx| {
                self.nodes[idx]
                    .incomings
                    .iter()
                    .map(|&dep| self.nodes[dep].value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 所有节点值（首次出现顺序）
    pub fn values(&self) -> Vec<T> {
        self.nodes.iter().map(|n| n.value.clone()).collect()
    }
}

/// 拓扑排序结果
///
/// `sorted` 为依赖优先顺序：一个值只会出现在它（传递）依赖的所有值
/// 之后。存在循环时 `cycle` 给出一条真实的循环路径（收尾相接），循环
/// 内及其下游的值不会出现在 `sorted` 中。循环是数据而非错误，是否
/// 阻断启动由调用方决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOutcome<T> {
    /// 依赖优先的已排序值
    pub sorted: Vec<T>,
    /// 检测到的循环路径（首尾为同一值）；无循环时为 None
    pub cycle: Option<Vec<T>>,
}

/// 带循环检测的拓扑排序
///
/// Kahn 风格的叶子优先删除：反复取出出度为 0 的节点（其全部依赖均已
/// 解析完成），追加到 `sorted`，然后将完成节点从各依赖方的未解析集中
/// 移除。多个节点同时就绪时按首次出现顺序输出，保证结果可复现。
///
/// 队列耗尽后若仍有剩余节点，剩余部分至少包含一个循环：从剩余节点中
/// 首次出现最早的一个出发，沿未解析的正向边行走并记录路径，遇到重复
/// 节点即提取循环。
pub fn topo_sort<T, I, F>(values: I, dependencies_of: F) -> SortOutcome<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> Vec<T>,
{
    let graph = Graph::build(values, dependencies_of);
    sort_graph(&graph)
}

/// 对已构建的图执行拓扑排序
pub fn sort_graph<T: Eq + Hash + Clone>(graph: &Graph<T>) -> SortOutcome<T> {
    let node_count = graph.nodes.len();

    // 出度 = 尚未解析完成的依赖数
    let mut out_degree: Vec<usize> = graph.nodes.iter().map(|n| n.outgoings.len()).collect();

    // 最小堆按节点下标（即首次出现顺序）打破平局
    let mut ready: BinaryHeap<Reverse<usize>> = (0..node_count)
        .filter(|&i| out_degree[i] == 0)
        .map(Reverse)
        .collect();

    let mut sorted = Vec::with_capacity(node_count);
    let mut resolved = vec![false; node_count];

    while let Some(Reverse(idx)) = ready.pop() {
        resolved[idx] = true;
        sorted.push(graph.nodes[idx].value.clone());

        for &dependent in &graph.nodes[idx].incomings {
            out_degree[dependent] -= 1;
            if out_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if sorted.len() == node_count {
        return SortOutcome {
            sorted,
            cycle: None,
        };
    }

    // 剩余节点中必然存在循环：从首个剩余节点沿未解析边行走直到重复
    let start = (0..node_count)
        .find(|&i| !resolved[i])
        .expect("剩余节点必然存在");

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    let cycle = loop {
        if let Some(&pos) = position.get(&current) {
            // 找到重复，提取循环并收尾相接
            let mut cycle: Vec<T> = path[pos..]
                .iter()
                .map(|&i| graph.nodes[i].value.clone())
                .collect();
            cycle.push(graph.nodes[current].value.clone());
            break cycle;
        }

        position.insert(current, path.len());
        path.push(current);

        // 每个剩余节点至少有一条指向剩余节点的未解析边
        current = *graph.nodes[current]
            .outgoings
            .iter()
            .find(|&&dep| !resolved[dep])
            .expect("剩余节点必有未解析依赖");
    };

    SortOutcome {
        sorted,
        cycle: Some(cycle),
    }
}
