use std::{any::Any, sync::Arc};

use smallvec::SmallVec;

use crate::{Buffer, InteropHandle, ResourceView, Result, ShaderStage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryPointGroupKind {
    Compute,
    Rasterization,
    RtSingleShader,
    RtHitGroup,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointDesc {
    pub stage: ShaderStage,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointGroupDesc {
    pub kind: EntryPointGroupKind,
    /// Name the group is exported under in ray tracing shader tables. Empty
    /// for compute and rasterization groups.
    pub export_name: String,
    pub entry_points: SmallVec<[EntryPointDesc; 3]>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderProgramDesc {
    pub label: String,
    pub groups: Vec<EntryPointGroupDesc>,
}

impl ShaderProgramDesc {
    #[must_use]
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.groups
            .iter()
            .flat_map(|group| group.entry_points.iter())
            .any(|entry| entry.stage == stage)
    }
}

pub trait ShaderProgram: Send + Sync {
    fn desc(&self) -> &ShaderProgramDesc;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Compute,
    Graphics,
    RayTracing,
}

pub trait PipelineState: Send + Sync {
    fn kind(&self) -> PipelineKind;

    fn native_handle(&self) -> Result<InteropHandle>;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub struct RayTracingPipelineDesc {
    pub program: Arc<dyn ShaderProgram>,
    pub max_recursion: u32,
    pub max_payload_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPassLayoutDesc {
    pub color_target_count: u32,
    pub has_depth_stencil: bool,
}

pub trait RenderPassLayout: Send + Sync {
    fn desc(&self) -> &RenderPassLayoutDesc;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub color_target_count: u32,
    pub has_depth_stencil: bool,
}

pub trait Framebuffer: Send + Sync {
    fn desc(&self) -> &FramebufferDesc;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub enum BindingResource {
    Buffer {
        buffer: Arc<dyn Buffer>,
        offset: u64,
        size: u64,
    },
    View(Arc<dyn ResourceView>),
}

#[derive(Clone)]
pub struct Binding {
    pub group: u32,
    pub binding: u32,
    pub resource: BindingResource,
}

/// The full set of shader parameters bound alongside a pipeline.
#[derive(Clone, Default)]
pub struct RootObject {
    pub bindings: Vec<Binding>,
}
