//! RenderGraph 构建器
//!
//! 由 [`RenderGraph::reset`] 得到。添加 Pass 时立即调用 `resolve` 声明资源，
//! 所有 Pass 添加完成后调用 [`RenderGraphBuilder::build`]。
//!
//! # 使用流程
//!
//! 1. `graph.reset()` 得到 builder
//! 2. `builder.add_pass(pass)` 按顺序添加 Pass
//! 3. `builder.build(backend)` 编译并分配资源
//! 4. 每帧 `graph.run(backend)`

use kiln_render_interface::gfx_backend::GfxBackend;

use crate::error::RenderGraphError;
use crate::graph::RenderGraph;
use crate::pass::{PassNode, RenderPass};
use crate::resolver::ResourceResolver;
use crate::storage::GraphStorage;

pub struct RenderGraphBuilder<'g> {
    graph: &'g mut RenderGraph,
}

impl<'g> RenderGraphBuilder<'g> {
    pub(crate) fn new(graph: &'g mut RenderGraph) -> Self {
        Self { graph }
    }

    /// 添加 Pass
    ///
    /// # Panics
    /// 同名的 Pass 已经存在，或者 resolve 中重复声明了资源
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> &mut Self {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, mut pass: Box<dyn RenderPass>) -> &mut Self {
        let _span = tracy_client::span!("RenderGraphBuilder::add_pass");

        let name = pass.name().to_string();
        assert!(
            self.graph.passes.iter().all(|node| node.name != name),
            "Pass '{name}' is added twice"
        );

        let mut resolver = ResourceResolver::new(&mut self.graph.storage, &name);
        pass.resolve(&mut resolver);
        let resources = resolver.finish();

        self.graph.passes.push(PassNode {
            queue: pass.queue_class(),
            flags: pass.flags(),
            name,
            pass,
            resources,
        });
        self
    }

    /// 在添加 Pass 之前设置 storage，例如固定输出分辨率
    #[inline]
    pub fn storage_mut(&mut self) -> &mut GraphStorage {
        &mut self.graph.storage
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.graph.passes.len()
    }

    pub fn build(self, backend: &mut dyn GfxBackend) -> Result<(), RenderGraphError> {
        self.graph.build(backend)
    }
}
