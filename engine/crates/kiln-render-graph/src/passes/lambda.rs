use kiln_render_interface::gfx_backend::{GfxCommandList, QueueClass};

use crate::pass::{PassContext, PassFlags, RenderPass};
use crate::resolver::ResourceResolver;

type ResolveFn = Box<dyn FnMut(&mut ResourceResolver) + Send + Sync>;
type DispatchFn = Box<dyn Fn(&PassContext<'_>, &mut dyn GfxCommandList) + Send + Sync>;

/// 由闭包构成的 Pass，用于简单的一次性逻辑
pub struct LambdaPass {
    name: String,
    queue: QueueClass,
    flags: PassFlags,
    resolve_fn: ResolveFn,
    dispatch_fn: DispatchFn,
}

impl LambdaPass {
    pub fn new(
        name: impl Into<String>,
        resolve_fn: impl FnMut(&mut ResourceResolver) + Send + Sync + 'static,
        dispatch_fn: impl Fn(&PassContext<'_>, &mut dyn GfxCommandList) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            queue: QueueClass::Graphics,
            flags: PassFlags::empty(),
            resolve_fn: Box::new(resolve_fn),
            dispatch_fn: Box::new(dispatch_fn),
        }
    }

    #[inline]
    pub fn with_queue(mut self, queue: QueueClass) -> Self {
        self.queue = queue;
        self
    }

    #[inline]
    pub fn with_flags(mut self, flags: PassFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl RenderPass for LambdaPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_class(&self) -> QueueClass {
        self.queue
    }

    fn flags(&self) -> PassFlags {
        self.flags
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        (self.resolve_fn)(resolver);
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        (self.dispatch_fn)(ctx, cmd);
    }
}
