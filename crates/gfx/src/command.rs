use std::{any::Any, sync::Arc};

use crate::{
    Buffer, ClearFlags, ClearValue, Fence, Framebuffer, InteropHandle, PipelineState, QueryPool,
    RenderPassLayout, ResourceState, ResourceView, Result, RootObject,
};

pub trait CommandQueue: Send + Sync {
    /// Submits `command_buffers` for execution, in order. If `signal` is set,
    /// the fence is set to the given value once every command buffer has
    /// finished executing.
    ///
    /// An empty submission with a signal is valid and signals the fence after
    /// all previously submitted work.
    fn execute(
        &self,
        command_buffers: Vec<Box<dyn CommandBuffer>>,
        signal: Option<(&Arc<dyn Fence>, u64)>,
    ) -> Result<()>;

    /// Makes the queue wait on the device until `fence` reaches `value`
    /// before executing later submissions.
    fn wait_on_device(&self, fence: &Arc<dyn Fence>, value: u64) -> Result<()>;

    /// Blocks the calling thread until all submitted work has finished.
    fn wait_for_idle(&self) -> Result<()>;

    fn native_handle(&self) -> Result<InteropHandle>;
}

/// A recording of GPU commands. Commands are recorded through encoders, at
/// most one of which should be open at any time.
pub trait CommandBuffer: Send {
    fn encode_resource_commands(&mut self) -> Result<Box<dyn ResourceEncoder>>;

    fn encode_compute_commands(&mut self) -> Result<Box<dyn ComputeEncoder>>;

    fn encode_render_commands(
        &mut self,
        layout: &Arc<dyn RenderPassLayout>,
        framebuffer: &Arc<dyn Framebuffer>,
    ) -> Result<Box<dyn RenderEncoder>>;

    fn encode_ray_tracing_commands(&mut self) -> Result<Box<dyn RayTracingEncoder>>;

    /// Finishes recording. A closed command buffer can only be submitted.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn native_handle(&self) -> Result<InteropHandle>;

    fn as_any(&self) -> &dyn Any;
}

pub trait ResourceEncoder: Send {
    fn copy_buffer(
        &mut self,
        dst: &Arc<dyn Buffer>,
        dst_offset: u64,
        src: &Arc<dyn Buffer>,
        src_offset: u64,
        size: u64,
    ) -> Result<()>;

    fn clear_resource_view(
        &mut self,
        view: &Arc<dyn ResourceView>,
        value: ClearValue,
        flags: ClearFlags,
    ) -> Result<()>;

    fn buffer_barrier(
        &mut self,
        buffer: &Arc<dyn Buffer>,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()>;

    /// Orders unordered-access writes to `buffer` against later accesses.
    fn uav_barrier(&mut self, buffer: &Arc<dyn Buffer>) -> Result<()>;

    fn write_timestamp(&mut self, pool: &Arc<dyn QueryPool>, index: u32) -> Result<()>;

    /// Writes `count` 64-bit query results starting at `index` into `dst`.
    fn resolve_query(
        &mut self,
        pool: &Arc<dyn QueryPool>,
        index: u32,
        count: u32,
        dst: &Arc<dyn Buffer>,
        dst_offset: u64,
    ) -> Result<()>;

    fn begin_debug_event(&mut self, name: &str, color: [f32; 3]);

    fn end_debug_event(&mut self);

    fn end_encoding(&mut self);
}

pub trait ComputeEncoder: ResourceEncoder {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()>;

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<()>;

    /// Reads the three thread-group counts from `args` at `offset`.
    fn dispatch_compute_indirect(&mut self, args: &Arc<dyn Buffer>, offset: u64) -> Result<()>;

    fn as_resource_encoder(&mut self) -> &mut dyn ResourceEncoder;
}

pub trait RenderEncoder: Send {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()>;

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> Result<()>;

    fn end_encoding(&mut self);
}

pub trait RayTracingEncoder: ResourceEncoder {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()>;

    /// Launches `width * height * depth` rays starting at the ray generation
    /// shader exported as `ray_gen_export`.
    fn dispatch_rays(&mut self, ray_gen_export: &str, width: u32, height: u32, depth: u32)
        -> Result<()>;

    fn as_resource_encoder(&mut self) -> &mut dyn ResourceEncoder;
}
