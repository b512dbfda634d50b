use std::{collections::HashMap, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

use crate::{
    error::{Error, GfxResultExt, Result},
    native_handle::NativeHandle,
    program::{Program, ProgramKernels, ProgramVars},
};

pub struct ComputeStateObject {
    kernels: Rc<ProgramKernels>,
    pipeline: Arc<dyn gfx::PipelineState>,
}

impl ComputeStateObject {
    fn new(device: &dyn gfx::Device, kernels: Rc<ProgramKernels>) -> Result<Self> {
        let pipeline = device
            .create_compute_pipeline(kernels.gfx_program())
            .gfx_call("IDevice::createComputePipelineState")?;

        Ok(Self { kernels, pipeline })
    }

    #[must_use]
    pub fn kernels(&self) -> &Rc<ProgramKernels> {
        &self.kernels
    }

    #[must_use]
    pub fn gfx_pipeline(&self) -> &Arc<dyn gfx::PipelineState> {
        &self.pipeline
    }

    pub fn native_handle(&self) -> Result<NativeHandle> {
        super::pipeline_native_handle(&self.pipeline)
    }
}

pub struct ComputeState {
    device: Arc<dyn gfx::Device>,
    program: Option<Rc<Program>>,
    cache: HashMap<*const ProgramKernels, Rc<ComputeStateObject>>,
}

impl ComputeState {
    pub(crate) fn new(device: Arc<dyn gfx::Device>) -> Self {
        Self {
            device,
            program: None,
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

    #[must_use]
    pub fn cached_state_object_count(&self) -> usize {
        self.cache.len()
    }

    /// Returns the state object for the program's active version
    /// specialized for `vars`.
    pub fn cso(&mut self, vars: &ProgramVars) -> Result<Rc<ComputeStateObject>> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| Error::InvalidUsage("compute state has no program".to_owned()))?;
        let kernels = program.active_version()?.kernels(vars)?;

        if let Some(cso) = self.cache.get(&Rc::as_ptr(&kernels)) {
            return Ok(cso.clone());
        }

        super::evict_superseded(&mut self.cache, |cso| &cso.kernels);

        let key = Rc::as_ptr(&kernels);
        let cso = Rc::new(ComputeStateObject::new(self.device.as_ref(), kernels)?);
        self.cache.insert(key, cso.clone());
        Ok(cso)
    }
}
