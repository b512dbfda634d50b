use std::{
    cell::RefCell,
    ops::{Deref, DerefMut},
    rc::Rc,
    sync::Arc,
};

use kiln_gfx as gfx;

use super::ComputeContext;
use crate::{
    error::{Error, GfxResultExt, Result},
    gpu_memory_heap::GpuMemoryHeap,
    program::{BoundVars, ProgramVars},
    state::{GraphicsState, RtState},
};

/// A compute context that also draws and traces rays.
pub struct RenderContext {
    compute: ComputeContext,
    last_bound_graphics: Option<BoundVars>,
    last_bound_rt: Option<BoundVars>,
}

impl RenderContext {
    pub(crate) fn new(
        device: Arc<dyn gfx::Device>,
        queue: Arc<dyn gfx::CommandQueue>,
        upload_heap: Rc<RefCell<GpuMemoryHeap>>,
    ) -> Result<Self> {
        Ok(Self {
            compute: ComputeContext::new(device, queue, upload_heap)?,
            last_bound_graphics: None,
            last_bound_rt: None,
        })
    }

    pub fn draw(
        &mut self,
        state: &mut GraphicsState,
        vars: &ProgramVars,
        vertex_count: u32,
        start_vertex: u32,
    ) -> Result<()> {
        self.draw_instanced(state, vars, vertex_count, 1, start_vertex, 0)
    }

    pub fn draw_instanced(
        &mut self,
        state: &mut GraphicsState,
        vars: &ProgramVars,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> Result<()> {
        let gso = state.gso(vars)?;
        let fbo = state
            .fbo()
            .cloned()
            .ok_or_else(|| Error::InvalidUsage("graphics state has no fbo".to_owned()))?;
        let root = vars.prepare(&mut self.compute, &mut self.last_bound_graphics)?;

        let (encoder, _) = self
            .compute
            .low_level_data_mut()
            .render_encoder(fbo.layout(), fbo.framebuffer())?;
        encoder
            .bind_pipeline(gso.gfx_pipeline(), &root)
            .gfx_call("IRenderCommandEncoder::bindPipelineWithRootObject")?;
        encoder
            .draw(vertex_count, instance_count, start_vertex, start_instance)
            .gfx_call("IRenderCommandEncoder::draw")?;

        self.compute.set_pending_commands();
        Ok(())
    }

    /// Launches `width * height * depth` rays from the ray generation shader
    /// of `state`'s program.
    pub fn raytrace(
        &mut self,
        state: &mut RtState,
        vars: &ProgramVars,
        [width, height, depth]: [u32; 3],
    ) -> Result<()> {
        let rtso = state.rtso(vars)?;
        let root = vars.prepare(&mut self.compute, &mut self.last_bound_rt)?;

        let encoder = self.compute.low_level_data_mut().ray_tracing_encoder()?;
        encoder
            .bind_pipeline(rtso.gfx_pipeline(), &root)
            .gfx_call("IRayTracingCommandEncoder::bindPipelineWithRootObject")?;
        encoder
            .dispatch_rays(rtso.ray_gen_export(), width, height, depth)
            .gfx_call("IRayTracingCommandEncoder::dispatchRays")?;

        self.compute.set_pending_commands();
        Ok(())
    }
}

impl Deref for RenderContext {
    type Target = ComputeContext;

    fn deref(&self) -> &Self::Target {
        &self.compute
    }
}

impl DerefMut for RenderContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.compute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{DefineList, ProgramDesc},
        test_support::device,
    };

    const RASTER: &str = "
        @vertex
        fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
            return vec4<f32>(f32(index), 0.0, 0.0, 1.0);
        }

        @fragment
        fn ps_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    ";

    #[test]
    fn draws_reuse_the_render_encoder() {
        let (device, gfx_device) = device();
        let program = device.create_program(
            ProgramDesc::new("raster")
                .add_shader_string("raster.wgsl", RASTER)
                .vs_entry("vs_main")
                .ps_entry("ps_main"),
            DefineList::new(),
        );

        let mut state = device.create_graphics_state();
        state
            .set_program(program)
            .set_fbo(device.create_fbo(64, 64, 1, false).unwrap());

        let vars = ProgramVars::new();
        let mut context = device.render_context();
        context.draw(&mut state, &vars, 3, 0).unwrap();
        context.draw_instanced(&mut state, &vars, 3, 4, 0, 0).unwrap();
        context.submit(true).unwrap();

        let counters = gfx_device.counters();
        assert_eq!(counters.draws, 2);
        assert_eq!(counters.encoders_opened, 1);
    }

    #[test]
    fn raytrace_dispatches_the_ray_gen_export() {
        let (device, gfx_device) = device();
        let program = device.create_program(
            ProgramDesc::new("rt")
                .add_shader_string("rt.wgsl", "fn ray_gen() {} fn miss() {}")
                .ray_gen("ray_gen")
                .miss("miss"),
            DefineList::new(),
        );

        let mut state = device.create_rt_state();
        state.set_program(program);

        let mut context = device.render_context();
        context
            .raytrace(&mut state, &ProgramVars::new(), [8, 8, 1])
            .unwrap();
        context.submit(true).unwrap();

        assert_eq!(gfx_device.counters().ray_dispatches, 1);
    }

    #[test]
    fn drawing_needs_an_fbo() {
        let (device, _) = device();
        let program = device.create_program(
            ProgramDesc::new("raster")
                .add_shader_string("raster.wgsl", RASTER)
                .vs_entry("vs_main"),
            DefineList::new(),
        );

        let mut state = device.create_graphics_state();
        state.set_program(program);

        let mut context = device.render_context();
        assert!(matches!(
            context.draw(&mut state, &ProgramVars::new(), 3, 0),
            Err(Error::InvalidUsage(_))
        ));
    }
}
