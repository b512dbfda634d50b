use std::{collections::HashMap, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

use crate::{
    error::{Error, GfxResultExt, Result},
    native_handle::NativeHandle,
    program::{EntryPointGroupKind, Program, ProgramKernels, ProgramVars, ShaderStage},
};

pub struct RtStateObject {
    kernels: Rc<ProgramKernels>,
    pipeline: Arc<dyn gfx::PipelineState>,
    ray_gen_export: String,
    exports: Vec<String>,
}

impl RtStateObject {
    #[must_use]
    pub fn kernels(&self) -> &Rc<ProgramKernels> {
        &self.kernels
    }

    #[must_use]
    pub fn gfx_pipeline(&self) -> &Arc<dyn gfx::PipelineState> {
        &self.pipeline
    }

    /// Export name of the ray generation shader that starts a dispatch.
    #[must_use]
    pub fn ray_gen_export(&self) -> &str {
        &self.ray_gen_export
    }

    /// Shader table export names, one per entry point group.
    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn native_handle(&self) -> Result<NativeHandle> {
        super::pipeline_native_handle(&self.pipeline)
    }
}

pub struct RtState {
    device: Arc<dyn gfx::Device>,
    program: Option<Rc<Program>>,
    max_recursion: u32,
    max_payload_size: u32,
    cache: HashMap<*const ProgramKernels, Rc<RtStateObject>>,
}

impl RtState {
    pub(crate) fn new(device: Arc<dyn gfx::Device>) -> Self {
        Self {
            device,
            program: None,
            max_recursion: 1,
            max_payload_size: 16,
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

    pub fn set_max_trace_recursion_depth(&mut self, depth: u32) -> &mut Self {
        if depth != self.max_recursion {
            self.max_recursion = depth;
            self.cache.clear();
        }
        self
    }

    #[must_use]
    pub fn max_trace_recursion_depth(&self) -> u32 {
        self.max_recursion
    }

    pub fn set_max_payload_size(&mut self, size: u32) -> &mut Self {
        if size != self.max_payload_size {
            self.max_payload_size = size;
            self.cache.clear();
        }
        self
    }

    #[must_use]
    pub fn cached_state_object_count(&self) -> usize {
        self.cache.len()
    }

    pub fn rtso(&mut self, vars: &ProgramVars) -> Result<Rc<RtStateObject>> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| Error::InvalidUsage("ray tracing state has no program".to_owned()))?;
        let kernels = program.active_version()?.kernels(vars)?;

        if let Some(rtso) = self.cache.get(&Rc::as_ptr(&kernels)) {
            return Ok(rtso.clone());
        }

        super::evict_superseded(&mut self.cache, |rtso| &rtso.kernels);

        let ray_gen_export = kernels
            .entry_point_groups()
            .iter()
            .find(|group| {
                group.kind() == EntryPointGroupKind::RtSingleShader
                    && group.kernel(ShaderStage::RayGeneration).is_some()
            })
            .map(|group| group.export_name().to_owned())
            .ok_or_else(|| {
                Error::InvalidUsage(format!(
                    "program '{}' has no ray generation shader",
                    kernels.name()
                ))
            })?;

        let exports = kernels
            .entry_point_groups()
            .iter()
            .map(|group| group.export_name().to_owned())
            .collect();

        let pipeline = self
            .device
            .create_ray_tracing_pipeline(&gfx::RayTracingPipelineDesc {
                program: kernels.gfx_program().clone(),
                max_recursion: self.max_recursion,
                max_payload_size: self.max_payload_size,
            })
            .gfx_call("IDevice::createRayTracingPipelineState")?;

        let key = Rc::as_ptr(&kernels);
        let rtso = Rc::new(RtStateObject {
            kernels,
            pipeline,
            ray_gen_export,
            exports,
        });
        self.cache.insert(key, rtso.clone());
        Ok(rtso)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{DefineList, ProgramDesc, ProgramManager},
        test_support::gfx_device,
    };

    #[test]
    fn exports_come_from_the_entry_point_groups() {
        let device = gfx_device();
        let manager = ProgramManager::new(device.clone());
        let program = Program::new(
            &manager,
            ProgramDesc::new("rt")
                .add_shader_string("rt.wgsl", "fn ray_gen() {} fn miss() {} fn hit() {}")
                .ray_gen("ray_gen")
                .miss("miss")
                .hit_group(Some("hit"), None, None, None),
            DefineList::new(),
        );

        let mut state = RtState::new(device);
        state.set_program(program).set_max_trace_recursion_depth(2);

        let vars = ProgramVars::new();
        let rtso = state.rtso(&vars).unwrap();
        assert_eq!(rtso.ray_gen_export(), "ray_gen");
        assert_eq!(rtso.exports(), ["ray_gen", "miss", "HitGroup0"]);
        assert!(Rc::ptr_eq(&rtso, &state.rtso(&vars).unwrap()));

        state.set_max_trace_recursion_depth(4);
        assert!(!Rc::ptr_eq(&rtso, &state.rtso(&vars).unwrap()));
    }
}
