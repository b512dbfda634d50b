use std::{
    cell::RefCell,
    ops::{Deref, DerefMut},
    rc::Rc,
    sync::Arc,
};

use kiln_gfx as gfx;

use super::CopyContext;
use crate::{
    error::{Error, GfxResultExt, Result},
    gpu_memory_heap::GpuMemoryHeap,
    program::{BoundVars, ProgramVars},
    resource::{Buffer, ResourceState, UnorderedAccessView},
    state::ComputeState,
};

/// A copy context that also dispatches compute work.
pub struct ComputeContext {
    copy: CopyContext,
    last_bound_compute: Option<BoundVars>,
}

impl ComputeContext {
    pub(crate) fn new(
        device: Arc<dyn gfx::Device>,
        queue: Arc<dyn gfx::CommandQueue>,
        upload_heap: Rc<RefCell<GpuMemoryHeap>>,
    ) -> Result<Self> {
        Ok(Self {
            copy: CopyContext::new(device, queue, upload_heap)?,
            last_bound_compute: None,
        })
    }

    pub fn dispatch(
        &mut self,
        state: &mut ComputeState,
        vars: &ProgramVars,
        [x, y, z]: [u32; 3],
    ) -> Result<()> {
        let cso = state.cso(vars)?;
        let root = vars.prepare(&mut self.copy, &mut self.last_bound_compute)?;

        let encoder = self.copy.low_level_data_mut().compute_encoder()?;
        encoder
            .bind_pipeline(cso.gfx_pipeline(), &root)
            .gfx_call("IComputeCommandEncoder::bindPipelineWithRootObject")?;
        encoder
            .dispatch_compute(x, y, z)
            .gfx_call("IComputeCommandEncoder::dispatchCompute")?;

        self.copy.set_pending_commands();
        Ok(())
    }

    /// Dispatches with group counts read from `arg_buffer` at `arg_offset`.
    pub fn dispatch_indirect(
        &mut self,
        state: &mut ComputeState,
        vars: &ProgramVars,
        arg_buffer: &Buffer,
        arg_offset: u64,
    ) -> Result<()> {
        let cso = state.cso(vars)?;
        self.copy
            .resource_barrier(arg_buffer, ResourceState::IndirectArgument)?;
        let root = vars.prepare(&mut self.copy, &mut self.last_bound_compute)?;

        let encoder = self.copy.low_level_data_mut().compute_encoder()?;
        encoder
            .bind_pipeline(cso.gfx_pipeline(), &root)
            .gfx_call("IComputeCommandEncoder::bindPipelineWithRootObject")?;
        encoder
            .dispatch_compute_indirect(arg_buffer.gfx_buffer(), arg_offset)
            .gfx_call("IComputeCommandEncoder::dispatchComputeIndirect")?;

        self.copy.set_pending_commands();
        Ok(())
    }

    pub fn clear_uav_float(&mut self, uav: &UnorderedAccessView, value: [f32; 4]) -> Result<()> {
        self.clear_uav(
            uav,
            gfx::ClearValue::from_float(value),
            gfx::ClearFlags::FLOAT_CLEAR_VALUES,
        )
    }

    pub fn clear_uav_uint(&mut self, uav: &UnorderedAccessView, value: [u32; 4]) -> Result<()> {
        self.clear_uav(
            uav,
            gfx::ClearValue::from_uint(value),
            gfx::ClearFlags::UINT_CLEAR_VALUES,
        )
    }

    /// Sets the hidden counter of a structured buffer to `value`. Buffers
    /// without a counter are left alone.
    pub fn clear_uav_counter(&mut self, buffer: &Buffer, value: u32) -> Result<()> {
        let Some(counter) = buffer.uav_counter() else {
            return Ok(());
        };

        let uav = counter.uav().ok_or_else(|| {
            Error::InvalidUsage("UAV counter has no unordered access view".to_owned())
        })?;
        self.clear_uav_uint(&uav, [value; 4])
    }

    fn clear_uav(
        &mut self,
        uav: &UnorderedAccessView,
        value: gfx::ClearValue,
        flags: gfx::ClearFlags,
    ) -> Result<()> {
        self.copy
            .resource_barrier(uav.buffer(), ResourceState::UnorderedAccess)?;
        self.copy
            .low_level_data_mut()
            .resource_encoder()?
            .clear_resource_view(uav.gfx_view(), value, flags)
            .gfx_call("IResourceCommandEncoder::clearResourceView")?;

        self.copy.set_pending_commands();
        Ok(())
    }
}

impl Deref for ComputeContext {
    type Target = CopyContext;

    fn deref(&self) -> &Self::Target {
        &self.copy
    }
}

impl DerefMut for ComputeContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{BufferAccess, DefineList, ProgramDesc},
        resource::{BindFlags, MemoryType},
        test_support::device,
    };

    const SOURCE: &str = "
        @group(0) @binding(0) var<storage, read_write> data: array<u32>;

        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = id.x;
        }
    ";

    fn uav_buffer(device: &crate::Device, size: u64) -> Rc<Buffer> {
        device
            .create_buffer(&gfx::BufferDesc::new(
                size,
                MemoryType::DeviceLocal,
                BindFlags::UNORDERED_ACCESS | BindFlags::INDIRECT_ARG,
            ))
            .unwrap()
    }

    fn compute_state(device: &crate::Device) -> ComputeState {
        let program = device.create_program(
            ProgramDesc::new("fill")
                .add_shader_string("fill.wgsl", SOURCE)
                .cs_entry("main"),
            DefineList::new(),
        );
        let mut state = device.create_compute_state();
        state.set_program(program);
        state
    }

    #[test]
    fn dispatch_records_and_submits() {
        let (device, gfx_device) = device();
        let mut state = compute_state(&device);
        let output = uav_buffer(&device, 256);

        let mut vars = ProgramVars::new();
        vars.set_buffer(0, 0, output.clone(), BufferAccess::ReadWrite);

        let mut context = device.render_context();
        context.dispatch(&mut state, &vars, [4, 1, 1]).unwrap();
        context.dispatch(&mut state, &vars, [4, 1, 1]).unwrap();
        assert!(context.has_pending_commands());
        assert_eq!(output.state(), ResourceState::UnorderedAccess);

        context.submit(true).unwrap();
        assert_eq!(gfx_device.counters().dispatches, 2);
    }

    #[test]
    fn dispatch_indirect_transitions_the_arguments() {
        let (device, gfx_device) = device();
        let mut state = compute_state(&device);
        let output = uav_buffer(&device, 256);
        let args = uav_buffer(&device, 12);

        let mut vars = ProgramVars::new();
        vars.set_buffer(0, 0, output, BufferAccess::ReadWrite);

        let mut context = device.render_context();
        context
            .update_buffer(&args, 0, &[2, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0])
            .unwrap();
        context
            .dispatch_indirect(&mut state, &vars, &args, 0)
            .unwrap();
        assert_eq!(args.state(), ResourceState::IndirectArgument);

        context.submit(true).unwrap();
        assert_eq!(gfx_device.counters().dispatches, 1);
    }

    #[test]
    fn clear_uav_uint_fills_the_view() {
        let (device, _) = device();
        let buffer = uav_buffer(&device, 32);
        let uav = buffer.uav().unwrap();

        let mut context = device.render_context();
        context.clear_uav_uint(&uav, [1, 2, 3, 4]).unwrap();
        let data = context.read_buffer(&buffer, 0, 32).unwrap();

        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
            .collect();
        assert_eq!(words, [1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn clear_uav_counter() {
        let (device, gfx_device) = device();
        let mut context = device.render_context();

        let plain = uav_buffer(&device, 16);
        context.clear_uav_counter(&plain, 7).unwrap();
        assert!(!context.has_pending_commands(), "nothing to clear");

        let structured = device
            .create_structured_buffer(4, 16, BindFlags::UNORDERED_ACCESS, true)
            .unwrap();
        context.clear_uav_counter(&structured, 7).unwrap();

        let counter = structured.uav_counter().unwrap().clone();
        let data = context.read_buffer(&counter, 0, 4).unwrap();
        assert_eq!(data, 7u32.to_le_bytes());
        assert_eq!(gfx_device.counters().clears, 1);
    }

    #[test]
    fn submit_invalidates_bound_vars() {
        let (device, _) = device();
        let mut state = compute_state(&device);

        let mut vars = ProgramVars::new();
        vars.set_buffer(0, 0, uav_buffer(&device, 256), BufferAccess::ReadWrite);
        vars.set_uniform(1, 0, &[0; 16]);

        let mut context = device.render_context();
        let upload_heap = device.upload_heap();
        let pending = || upload_heap.borrow().pending_release_count();

        context.dispatch(&mut state, &vars, [1, 1, 1]).unwrap();
        let staged = pending();
        context.dispatch(&mut state, &vars, [1, 1, 1]).unwrap();
        assert_eq!(pending(), staged, "same vars, same root object");

        context.submit(false).unwrap();
        context.dispatch(&mut state, &vars, [1, 1, 1]).unwrap();
        assert_eq!(pending(), staged + 1, "uniforms are staged again");
    }

    #[test]
    fn read_back_between_dispatches_invalidates_bound_vars() {
        let (device, _) = device();
        let mut state = compute_state(&device);
        let output = uav_buffer(&device, 256);

        let mut vars = ProgramVars::new();
        vars.set_buffer(0, 0, output.clone(), BufferAccess::ReadWrite);
        vars.set_uniform(1, 0, &[0; 16]);

        let mut context = device.render_context();
        let upload_heap = device.upload_heap();
        let pending = || upload_heap.borrow().pending_release_count();

        context.dispatch(&mut state, &vars, [1, 1, 1]).unwrap();
        let staged = pending();

        let fence = context.low_level_data().fence().clone();
        let before = fence.signaled_value();
        context.read_buffer(&output, 0, 4).unwrap();
        assert!(fence.signaled_value() > before, "read_buffer submitted");

        context.dispatch(&mut state, &vars, [1, 1, 1]).unwrap();
        assert_eq!(pending(), staged + 1, "uniforms are staged again");
    }
}
