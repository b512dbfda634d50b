use std::{collections::HashMap, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

use crate::{
    error::{Error, GfxResultExt, Result},
    fbo::Fbo,
    native_handle::NativeHandle,
    program::{Program, ProgramKernels, ProgramVars},
};

pub struct GraphicsStateObject {
    kernels: Rc<ProgramKernels>,
    layout: Arc<dyn gfx::RenderPassLayout>,
    pipeline: Arc<dyn gfx::PipelineState>,
}

impl GraphicsStateObject {
    #[must_use]
    pub fn kernels(&self) -> &Rc<ProgramKernels> {
        &self.kernels
    }

    #[must_use]
    pub fn render_pass_layout(&self) -> &Arc<dyn gfx::RenderPassLayout> {
        &self.layout
    }

    #[must_use]
    pub fn gfx_pipeline(&self) -> &Arc<dyn gfx::PipelineState> {
        &self.pipeline
    }

    pub fn native_handle(&self) -> Result<NativeHandle> {
        super::pipeline_native_handle(&self.pipeline)
    }
}

type GraphicsKey = (*const ProgramKernels, *const ());

/// Rasterization state: a program and the framebuffer it draws into.
pub struct GraphicsState {
    device: Arc<dyn gfx::Device>,
    program: Option<Rc<Program>>,
    fbo: Option<Rc<Fbo>>,
    cache: HashMap<GraphicsKey, Rc<GraphicsStateObject>>,
}

impl GraphicsState {
    pub(crate) fn new(device: Arc<dyn gfx::Device>) -> Self {
        Self {
            device,
            program: None,
            fbo: None,
            cache: HashMap::new(),
        }
    }

    pub fn set_program(&mut self, program: Rc<Program>) -> &mut Self {
        self.program = Some(program);
        self.cache.clear();
        self
    }

    #[must_use]
    pub fn program(&self) -> Option<&Rc<Program>> {
        self.program.as_ref()
    }

    pub fn set_fbo(&mut self, fbo: Rc<Fbo>) -> &mut Self {
        self.fbo = Some(fbo);
        self
    }

    #[must_use]
    pub fn fbo(&self) -> Option<&Rc<Fbo>> {
        self.fbo.as_ref()
    }

    #[must_use]
    pub fn cached_state_object_count(&self) -> usize {
        self.cache.len()
    }

    pub fn gso(&mut self, vars: &ProgramVars) -> Result<Rc<GraphicsStateObject>> {
        let (Some(program), Some(fbo)) = (&self.program, &self.fbo) else {
            return Err(Error::InvalidUsage(
                "graphics state needs a program and an fbo".to_owned(),
            ));
        };

        let kernels = program.active_version()?.kernels(vars)?;
        let layout = fbo.layout().clone();
        let key = (Rc::as_ptr(&kernels), Arc::as_ptr(&layout).cast::<()>());

        if let Some(gso) = self.cache.get(&key) {
            return Ok(gso.clone());
        }

        super::evict_superseded(&mut self.cache, |gso| &gso.kernels);

        let pipeline = self
            .device
            .create_graphics_pipeline(kernels.gfx_program(), &layout)
            .gfx_call("IDevice::createGraphicsPipelineState")?;

        let gso = Rc::new(GraphicsStateObject {
            kernels,
            layout,
            pipeline,
        });
        self.cache.insert(key, gso.clone());
        Ok(gso)
    }
}
