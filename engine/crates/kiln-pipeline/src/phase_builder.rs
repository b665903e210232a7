use indexmap::IndexMap;
use kiln_utils::dependency_graph::{CycleError, DependencyGraph};

/// Phase 在 builder 中的索引，同时也是依赖图中的节点索引
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseId(pub(crate) usize);

impl PhaseId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// 可以解析为 [`PhaseId`] 的类型：直接的 id 或 Phase 名称
pub trait IntoPhaseId {
    fn into_phase_id(self, builder: &PipelineBuilder) -> PhaseId;
}

impl IntoPhaseId for PhaseId {
    #[inline]
    fn into_phase_id(self, _builder: &PipelineBuilder) -> PhaseId {
        self
    }
}

impl IntoPhaseId for &str {
    fn into_phase_id(self, builder: &PipelineBuilder) -> PhaseId {
        builder.phase_id(self).unwrap_or_else(|| panic!("Pipeline phase '{self}' does not exist"))
    }
}

impl IntoPhaseId for &String {
    fn into_phase_id(self, builder: &PipelineBuilder) -> PhaseId {
        self.as_str().into_phase_id(builder)
    }
}

/// Phase 图构建器
///
/// Phase 以名称唯一标识，拓扑由 [`DependencyGraph`] 保存。
/// 任何会形成环的依赖都会在 `depends_on` 时被拒绝，因此编译出的 [`crate::Pipeline`] 一定无环。
#[derive(Default)]
pub struct PipelineBuilder {
    phases: IndexMap<String, PhaseId>,
    graph: DependencyGraph,
}
// new & init
impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}
// Phase API
impl PipelineBuilder {
    /// 创建新的 Phase
    ///
    /// # Panics
    /// 同名 Phase 已经存在
    pub fn new_phase(&mut self, name: impl Into<String>) -> PhaseRef<'_> {
        let name = name.into();
        assert!(!self.phases.contains_key(&name), "Pipeline phase '{name}' already exists");

        let id = PhaseId(self.graph.add_node());
        self.phases.insert(name, id);
        PhaseRef { builder: self, id }
    }

    /// 获取已存在的 Phase
    ///
    /// # Panics
    /// Phase 不存在
    pub fn get_phase(&mut self, name: &str) -> PhaseRef<'_> {
        let id = name.into_phase_id(self);
        PhaseRef { builder: self, id }
    }

    pub fn phase_id(&self, name: &str) -> Option<PhaseId> {
        self.phases.get(name).copied()
    }

    #[inline]
    pub fn contains_phase(&self, name: &str) -> bool {
        self.phases.contains_key(name)
    }

    /// Phase 名称，按注册顺序排列
    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    #[inline]
    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn phase_name(&self, id: PhaseId) -> &str {
        self.phases.get_index(id.0).map(|(name, _)| name.as_str()).unwrap_or("<unknown>")
    }

    /// 直接依赖 `id` 的 Phase（必须在 `id` 之后执行）
    pub fn dependents(&self, id: PhaseId) -> impl Iterator<Item = PhaseId> + '_ {
        self.graph.dependents(id.0).iter().map(|&i| PhaseId(i))
    }

    /// `id` 尚未满足的前驱数量
    #[inline]
    pub fn dependency_count(&self, id: PhaseId) -> usize {
        self.graph.dependency_count(id.0)
    }

    pub(crate) fn into_parts(self) -> (IndexMap<String, PhaseId>, DependencyGraph) {
        (self.phases, self.graph)
    }
}

/// 指向 builder 中某个 Phase 的句柄，用于链式声明依赖
pub struct PhaseRef<'a> {
    builder: &'a mut PipelineBuilder,
    id: PhaseId,
}

impl<'a> PhaseRef<'a> {
    #[inline]
    pub fn id(&self) -> PhaseId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.builder.phase_name(self.id)
    }

    /// 声明当前 Phase 必须在 `other` 之后执行
    ///
    /// 会形成环时返回 [`CycleError`]，拓扑保持不变。
    pub fn try_depends_on(&mut self, other: impl IntoPhaseId) -> Result<(), CycleError> {
        let other = other.into_phase_id(self.builder);
        self.builder.graph.add_dependency(self.id.0, other.0)
    }

    /// 声明当前 Phase 必须在 `other` 之后执行
    ///
    /// # Panics
    /// 依赖会形成环。这是调用方的编程错误，报错信息包含两个 Phase 的名称。
    pub fn depends_on(mut self, other: impl IntoPhaseId) -> Self {
        let other = other.into_phase_id(self.builder);
        if self.try_depends_on(other).is_err() {
            panic!(
                "Circular dependency detected between phases '{}' and '{}'",
                self.name(),
                self.builder.phase_name(other)
            );
        }
        self
    }

    /// 创建一个依赖当前 Phase 的新 Phase
    pub fn then(self, name: impl Into<String>) -> PhaseRef<'a> {
        let PhaseRef { builder, id } = self;
        builder.new_phase(name).depends_on(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_get_phase() {
        let mut builder = PipelineBuilder::new();
        let update = builder.new_phase("Update").id();
        assert_eq!(builder.get_phase("Update").id(), update);
        assert!(builder.contains_phase("Update"));
        assert!(!builder.contains_phase("Render"));
    }

    #[test]
    #[should_panic(expected = "Pipeline phase 'Update' already exists")]
    fn test_duplicate_phase_panics() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("Update");
        builder.new_phase("Update");
    }

    #[test]
    #[should_panic(expected = "Pipeline phase 'Render' does not exist")]
    fn test_missing_phase_panics() {
        let mut builder = PipelineBuilder::new();
        builder.get_phase("Render");
    }

    #[test]
    fn test_depends_on_records_dependents() {
        let mut builder = PipelineBuilder::new();
        let update = builder.new_phase("Update").id();
        let render = builder.new_phase("Render").depends_on(update).id();

        assert_eq!(builder.dependents(update).collect::<Vec<_>>(), vec![render]);
        assert_eq!(builder.dependency_count(render), 1);
        assert_eq!(builder.dependency_count(update), 0);
    }

    #[test]
    fn test_three_phase_cycle_rejected_once() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("A");
        builder.new_phase("B");
        builder.new_phase("C");

        assert!(builder.get_phase("A").try_depends_on("B").is_ok());
        assert!(builder.get_phase("B").try_depends_on("C").is_ok());
        assert!(builder.get_phase("C").try_depends_on("A").is_err());

        // 被拒绝的边没有留下任何痕迹，重试结果一致
        assert_eq!(builder.dependency_count(builder.phase_id("C").unwrap()), 0);
        assert!(builder.get_phase("C").try_depends_on("A").is_err());
    }

    #[test]
    #[should_panic(expected = "Circular dependency detected between phases 'A' and 'C'")]
    fn test_cycle_panics_with_phase_names() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("A").then("B").then("C");
        builder.get_phase("A").depends_on("C");
    }

    #[test]
    #[should_panic(expected = "Circular dependency detected")]
    fn test_self_dependency_panics() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("A").depends_on("A");
    }

    #[test]
    fn test_then_chain() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("Update").then("PostUpdate").then("Render");

        assert_eq!(builder.phase_names().collect::<Vec<_>>(), vec!["Update", "PostUpdate", "Render"]);
        let post_update = builder.phase_id("PostUpdate").unwrap();
        assert_eq!(builder.dependency_count(post_update), 1);
    }
}
