//! 依赖图构建和拓扑排序
//!
//! 节点存放在数组中，边使用索引表示。Phase 图和 RenderGraph 都基于这一份实现：
//! - 加边之前做前向可达性检查，拒绝会形成环的边
//! - Kahn 拓扑排序，就绪集合按节点索引从小到大出队，保证无依赖关系的节点维持插入顺序
//! - 依赖层级（到根节点的最长路径），同一层级内的节点可以并行

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use itertools::Itertools;

/// 节点索引
pub type NodeIndex = usize;

/// 检测到循环依赖
///
/// `involved` 为参与循环的节点索引。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleError {
    pub involved: Vec<NodeIndex>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cyclic dependency between nodes [{}]", self.involved.iter().join(", "))
    }
}

impl std::error::Error for CycleError {}

/// 依赖图
///
/// 边的方向为 `dependency -> dependent`：前者先执行。
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    /// 邻接表（出边）：node -> [dependents]
    dependents: Vec<Vec<NodeIndex>>,
    /// 入度表：node 尚未满足的前驱数量
    dependency_counts: Vec<usize>,
}

// new & init
impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含 `node_count` 个孤立节点的图
    pub fn with_nodes(node_count: usize) -> Self {
        Self {
            dependents: vec![Vec::new(); node_count],
            dependency_counts: vec![0; node_count],
        }
    }

    pub fn add_node(&mut self) -> NodeIndex {
        self.dependents.push(Vec::new());
        self.dependency_counts.push(0);
        self.dependents.len() - 1
    }
}
// 边
impl DependencyGraph {
    /// 从 `node` 的后继出发，沿出边遍历，判断能否到达 `target`
    pub fn reaches(&self, node: NodeIndex, target: NodeIndex) -> bool {
        let mut visited = vec![false; self.dependents.len()];
        let mut pending = self.dependents[node].clone();
        while let Some(check) = pending.pop() {
            if check == target {
                return true;
            }
            if !std::mem::replace(&mut visited[check], true) {
                pending.extend_from_slice(&self.dependents[check]);
            }
        }
        false
    }

    /// 记录 `node` 依赖 `on`，即 `on` 必须先于 `node` 执行
    ///
    /// 提交前检查 `on` 是否已经（传递地）依赖 `node`，是则返回 [`CycleError`]，图保持不变。
    /// 重复的边会被忽略。
    pub fn add_dependency(&mut self, node: NodeIndex, on: NodeIndex) -> Result<(), CycleError> {
        if node == on || self.reaches(node, on) {
            return Err(CycleError { involved: vec![node, on] });
        }

        if !self.dependents[on].contains(&node) {
            self.dependents[on].push(node);
            self.dependency_counts[node] += 1;
        }
        Ok(())
    }
}
// getters
impl DependencyGraph {
    #[inline]
    pub fn node_count(&self) -> usize {
        self.dependents.len()
    }

    /// 直接后继
    #[inline]
    pub fn dependents(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.dependents[node]
    }

    /// 直接前驱数量
    #[inline]
    pub fn dependency_count(&self, node: NodeIndex) -> usize {
        self.dependency_counts[node]
    }

    /// 直接前驱
    pub fn dependencies(&self, node: NodeIndex) -> Vec<NodeIndex> {
        (0..self.node_count()).filter(|&i| self.dependents[i].contains(&node)).collect()
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.iter().map(Vec::len).sum()
    }
}
// 排序
impl DependencyGraph {
    /// 执行拓扑排序
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑序，无依赖关系的节点按索引升序
    /// - `Err(cycle)`: 存在循环，返回无法排入的节点
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, CycleError> {
        let mut in_degrees = self.dependency_counts.clone();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> =
            (0..self.node_count()).filter(|&i| in_degrees[i] == 0).map(Reverse).collect();
        let mut result = Vec::with_capacity(self.node_count());

        while let Some(Reverse(node)) = ready.pop() {
            result.push(node);
            for &dependent in &self.dependents[node] {
                in_degrees[dependent] -= 1;
                if in_degrees[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if result.len() != self.node_count() {
            let remaining = (0..self.node_count()).filter(|&i| in_degrees[i] > 0).collect();
            return Err(CycleError { involved: remaining });
        }
        Ok(result)
    }

    /// 每个节点的依赖层级：到任意根节点的最长路径长度
    pub fn level_of_nodes(&self) -> Result<Vec<usize>, CycleError> {
        let order = self.topological_order()?;
        let mut distances = vec![0; self.node_count()];
        for node in order {
            for &dependent in &self.dependents[node] {
                distances[dependent] = distances[dependent].max(distances[node] + 1);
            }
        }
        Ok(distances)
    }

    /// 按依赖层级分组，层内节点按索引升序
    pub fn levels(&self) -> Result<Vec<Vec<NodeIndex>>, CycleError> {
        let distances = self.level_of_nodes()?;
        let level_count = distances.iter().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); level_count];
        for (node, level) in distances.into_iter().enumerate() {
            levels[level].push(node);
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let mut graph = DependencyGraph::with_nodes(3);
        graph.add_dependency(1, 0).unwrap();
        graph.add_dependency(2, 1).unwrap();

        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.dependency_count(2), 1);
        assert_eq!(graph.dependencies(2), vec![1]);
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let mut graph = DependencyGraph::with_nodes(3);
        assert!(graph.add_dependency(1, 0).is_ok());
        assert!(graph.add_dependency(2, 1).is_ok());

        let err = graph.add_dependency(0, 2).unwrap_err();
        assert_eq!(err.involved, vec![0, 2]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.dependency_count(0), 0);
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut graph = DependencyGraph::with_nodes(1);
        assert!(graph.add_dependency(0, 0).is_err());
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut graph = DependencyGraph::with_nodes(2);
        graph.add_dependency(1, 0).unwrap();
        graph.add_dependency(1, 0).unwrap();
        assert_eq!(graph.dependency_count(1), 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_stable_order_keeps_insertion_order() {
        // 3 依赖 0，其余无关系：1、2 仍按插入顺序出现在 3 之前
        let mut graph = DependencyGraph::with_nodes(5);
        graph.add_dependency(3, 0).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2, 3, 4]);

        // 0 依赖 4：4 被提前，其余保持相对顺序
        graph.add_dependency(0, 4).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![1, 2, 4, 0, 3]);
    }

    #[test]
    fn test_levels_use_longest_path() {
        // 0 -> 1 -> 3, 0 -> 3, 2 独立
        let mut graph = DependencyGraph::with_nodes(4);
        graph.add_dependency(1, 0).unwrap();
        graph.add_dependency(3, 1).unwrap();
        graph.add_dependency(3, 0).unwrap();

        assert_eq!(graph.levels().unwrap(), vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.topological_order().unwrap().is_empty());
        assert!(graph.levels().unwrap().is_empty());
    }
}
