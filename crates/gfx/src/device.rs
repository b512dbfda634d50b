use std::sync::Arc;

use crate::{
    BindFlags, Buffer, BufferDesc, BufferViewDesc, CommandBuffer, CommandQueue, CommandQueueDesc,
    DeviceInfo, Fence, FenceDesc, Framebuffer, FramebufferDesc, InteropHandle, PipelineState,
    QueryPool, QueryPoolDesc, RayTracingPipelineDesc, RenderPassLayout, RenderPassLayoutDesc,
    ResourceView, Result, ShaderProgram, ShaderProgramDesc,
};

pub trait Device: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Required placement alignment for buffer data bound with `flags`.
    fn buffer_data_alignment(&self, flags: BindFlags) -> u64 {
        if flags.contains(BindFlags::CONSTANT) {
            self.info().constant_buffer_alignment
        } else {
            self.info().buffer_alignment
        }
    }

    fn create_fence(&self, desc: &FenceDesc) -> Result<Arc<dyn Fence>>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    fn create_buffer_view(
        &self,
        buffer: &Arc<dyn Buffer>,
        desc: &BufferViewDesc,
    ) -> Result<Arc<dyn ResourceView>>;

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<Arc<dyn QueryPool>>;

    fn create_command_queue(&self, desc: &CommandQueueDesc) -> Result<Arc<dyn CommandQueue>>;

    fn create_command_buffer(&self) -> Result<Box<dyn CommandBuffer>>;

    fn create_render_pass_layout(
        &self,
        desc: &RenderPassLayoutDesc,
    ) -> Result<Arc<dyn RenderPassLayout>>;

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    fn create_shader_program(&self, desc: &ShaderProgramDesc) -> Result<Arc<dyn ShaderProgram>>;

    fn create_compute_pipeline(
        &self,
        program: &Arc<dyn ShaderProgram>,
    ) -> Result<Arc<dyn PipelineState>>;

    fn create_graphics_pipeline(
        &self,
        program: &Arc<dyn ShaderProgram>,
        layout: &Arc<dyn RenderPassLayout>,
    ) -> Result<Arc<dyn PipelineState>>;

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<Arc<dyn PipelineState>>;

    fn native_handle(&self) -> Result<InteropHandle>;
}
