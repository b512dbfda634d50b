use std::{any::Any, sync::Arc};

use super::Shared;
use crate::{
    Framebuffer, FramebufferDesc, InteropHandle, PipelineKind, PipelineState, RenderPassLayout,
    RenderPassLayoutDesc, Result, ShaderProgram, ShaderProgramDesc,
};

pub struct EmulatedProgram {
    desc: ShaderProgramDesc,
}

impl EmulatedProgram {
    pub(super) fn new(desc: ShaderProgramDesc) -> Self {
        Self { desc }
    }
}

impl ShaderProgram for EmulatedProgram {
    fn desc(&self) -> &ShaderProgramDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct EmulatedPipeline {
    id: u64,
    kind: PipelineKind,
    exports: Vec<String>,
    shared: Arc<Shared>,
}

impl EmulatedPipeline {
    pub(super) fn new(shared: &Arc<Shared>, kind: PipelineKind, exports: Vec<String>) -> Self {
        Self {
            id: shared.next_id(),
            kind,
            exports,
            shared: shared.clone(),
        }
    }

    /// Shader table export names. Empty for non-ray tracing pipelines.
    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }
}

impl PipelineState for EmulatedPipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct EmulatedRenderPassLayout {
    desc: RenderPassLayoutDesc,
}

impl EmulatedRenderPassLayout {
    pub(super) fn new(desc: RenderPassLayoutDesc) -> Self {
        Self { desc }
    }
}

impl RenderPassLayout for EmulatedRenderPassLayout {
    fn desc(&self) -> &RenderPassLayoutDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct EmulatedFramebuffer {
    desc: FramebufferDesc,
}

impl EmulatedFramebuffer {
    pub(super) fn new(desc: FramebufferDesc) -> Self {
        Self { desc }
    }
}

impl Framebuffer for EmulatedFramebuffer {
    fn desc(&self) -> &FramebufferDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
