use std::{
    any::Any,
    cell::{RefCell, RefMut},
    collections::VecDeque,
    rc::Rc,
    sync::Arc,
};

use kiln_gfx as gfx;

use crate::{
    context::RenderContext,
    error::{GfxResultExt, Result},
    fbo::Fbo,
    fence::{Fence, FenceDesc},
    gpu_memory_heap::GpuMemoryHeap,
    gpu_timer::GpuTimer,
    native_handle::{NativeHandle, NativeHandleType},
    program::{DefineList, Program, ProgramDesc, ProgramManager},
    query_heap::{QueryHeap, QueryType},
    resource::{BindFlags, Buffer, BufferDesc, MemoryType},
    state::{ComputeState, GraphicsState, RtState},
    DeviceConfig,
};

/// The root of the core: owns the queue, the per-frame resources and the
/// objects every context shares.
///
/// Frames are delimited by [`Device::end_frame`]. Transient memory and
/// resources handed to [`Device::release_resource`] are reclaimed once the
/// frame fence shows that the frames using them have completed.
pub struct Device {
    gfx_device: Arc<dyn gfx::Device>,
    queue: Arc<dyn gfx::CommandQueue>,
    in_flight_frame_count: u64,

    frame_fence: Rc<Fence>,
    upload_heap: Rc<RefCell<GpuMemoryHeap>>,
    timestamp_query_heap: Rc<RefCell<QueryHeap>>,
    program_manager: Rc<ProgramManager>,
    render_context: RefCell<RenderContext>,
    deferred_releases: RefCell<VecDeque<(u64, Box<dyn Any>)>>,
}

impl Device {
    pub fn new(gfx_device: Arc<dyn gfx::Device>, config: &DeviceConfig) -> Result<Self> {
        let queue = gfx_device
            .create_command_queue(&gfx::CommandQueueDesc {
                label: Some("graphics"),
            })
            .gfx_call("IDevice::createCommandQueue")?;

        let frame_fence = Rc::new(Fence::new(gfx_device.as_ref(), FenceDesc::default())?);

        let upload_heap = Rc::new(RefCell::new(GpuMemoryHeap::new(
            gfx_device.clone(),
            MemoryType::Upload,
            config.upload_heap_page_size,
            frame_fence.clone(),
        )?));

        let timestamp_query_heap = Rc::new(RefCell::new(QueryHeap::new(
            gfx_device.as_ref(),
            QueryType::Timestamp,
            config.timestamp_query_count,
        )?));

        let program_manager = ProgramManager::new(gfx_device.clone());
        program_manager.set_generate_debug_info_enabled(config.generate_shader_debug_info);
        if !config.global_defines.is_empty() {
            program_manager.add_global_defines(&config.global_defines);
        }

        let render_context =
            RenderContext::new(gfx_device.clone(), queue.clone(), upload_heap.clone())?;

        tracing::info!(
            adapter = %gfx_device.info().adapter_name,
            api = ?gfx_device.info().device_type,
            "created device"
        );

        Ok(Self {
            gfx_device,
            queue,
            in_flight_frame_count: u64::from(config.in_flight_frame_count),
            frame_fence,
            upload_heap,
            timestamp_query_heap,
            program_manager,
            render_context: RefCell::new(render_context),
            deferred_releases: RefCell::new(VecDeque::new()),
        })
    }

    #[must_use]
    pub fn gfx_device(&self) -> &Arc<dyn gfx::Device> {
        &self.gfx_device
    }

    #[must_use]
    pub fn command_queue(&self) -> &Arc<dyn gfx::CommandQueue> {
        &self.queue
    }

    #[must_use]
    pub fn info(&self) -> &gfx::DeviceInfo {
        self.gfx_device.info()
    }

    pub fn create_fence(&self, desc: FenceDesc) -> Result<Rc<Fence>> {
        Ok(Rc::new(Fence::new(self.gfx_device.as_ref(), desc)?))
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Rc<Buffer>> {
        Ok(Rc::new(Buffer::new(self.gfx_device.as_ref(), desc, None)?))
    }

    /// Creates a buffer of `element_count` structs of `struct_size` bytes.
    /// With `create_counter`, the buffer also gets a hidden 4-byte counter
    /// for append/consume access.
    pub fn create_structured_buffer(
        &self,
        struct_size: u32,
        element_count: u32,
        bind_flags: BindFlags,
        create_counter: bool,
    ) -> Result<Rc<Buffer>> {
        let counter = if create_counter {
            let mut desc = BufferDesc::new(4, MemoryType::DeviceLocal, BindFlags::UNORDERED_ACCESS);
            desc.label = Some("uav counter".to_owned());
            Some(self.create_buffer(&desc)?)
        } else {
            None
        };

        let mut desc = BufferDesc::new(
            u64::from(struct_size) * u64::from(element_count),
            MemoryType::DeviceLocal,
            bind_flags,
        );
        desc.element_size = struct_size;

        Ok(Rc::new(Buffer::new(self.gfx_device.as_ref(), &desc, counter)?))
    }

    pub fn create_query_heap(&self, ty: QueryType, count: u32) -> Result<QueryHeap> {
        QueryHeap::new(self.gfx_device.as_ref(), ty, count)
    }

    /// Creates a heap of `memory_type` pages whose allocations are reclaimed
    /// on `fence`.
    pub fn create_gpu_memory_heap(
        &self,
        memory_type: MemoryType,
        page_size: u64,
        fence: Rc<Fence>,
    ) -> Result<GpuMemoryHeap> {
        GpuMemoryHeap::new(self.gfx_device.clone(), memory_type, page_size, fence)
    }

    /// Creates a program and registers it for reloading. Compilation happens
    /// on first use.
    #[must_use]
    pub fn create_program(&self, desc: ProgramDesc, defines: DefineList) -> Rc<Program> {
        Program::new(&self.program_manager, desc, defines)
    }

    #[must_use]
    pub fn create_compute_state(&self) -> ComputeState {
        ComputeState::new(self.gfx_device.clone())
    }

    #[must_use]
    pub fn create_graphics_state(&self) -> GraphicsState {
        GraphicsState::new(self.gfx_device.clone())
    }

    #[must_use]
    pub fn create_rt_state(&self) -> RtState {
        RtState::new(self.gfx_device.clone())
    }

    pub fn create_fbo(
        &self,
        width: u32,
        height: u32,
        color_target_count: u32,
        has_depth_stencil: bool,
    ) -> Result<Rc<Fbo>> {
        Ok(Rc::new(Fbo::new(
            self.gfx_device.as_ref(),
            width,
            height,
            color_target_count,
            has_depth_stencil,
        )?))
    }

    pub fn create_gpu_timer(&self) -> Result<GpuTimer> {
        GpuTimer::new(self)
    }

    /// The context all per-frame work is recorded into.
    ///
    /// # Panics
    ///
    /// Panics if the context is already borrowed.
    pub fn render_context(&self) -> RefMut<'_, RenderContext> {
        self.render_context.borrow_mut()
    }

    #[must_use]
    pub fn program_manager(&self) -> &Rc<ProgramManager> {
        &self.program_manager
    }

    #[must_use]
    pub fn upload_heap(&self) -> &Rc<RefCell<GpuMemoryHeap>> {
        &self.upload_heap
    }

    #[must_use]
    pub fn timestamp_query_heap(&self) -> &Rc<RefCell<QueryHeap>> {
        &self.timestamp_query_heap
    }

    /// Signaled once per frame by [`Device::end_frame`].
    #[must_use]
    pub fn frame_fence(&self) -> &Rc<Fence> {
        &self.frame_fence
    }

    #[must_use]
    pub fn buffer_data_alignment(&self, bind_flags: BindFlags) -> u64 {
        self.gfx_device.buffer_data_alignment(bind_flags)
    }

    /// Milliseconds per timestamp tick.
    #[must_use]
    pub fn gpu_timestamp_frequency(&self) -> f64 {
        self.gfx_device.info().timestamp_frequency
    }

    pub fn native_handle(&self) -> Result<NativeHandle> {
        let handle = self
            .gfx_device
            .native_handle()
            .gfx_call("IDevice::getNativeDeviceHandles")?;

        Ok(NativeHandle::from_interop(
            handle,
            NativeHandleType::D3d12Device,
            NativeHandleType::VkDevice,
        ))
    }

    /// Keeps `resource` alive until the work submitted so far has completed.
    pub fn release_resource<T: Any>(&self, resource: T) {
        let resource: Box<dyn Any> = Box::new(resource);
        self.deferred_releases
            .borrow_mut()
            .push_back((self.frame_fence.signaled_value(), resource));
    }

    #[must_use]
    pub fn pending_release_count(&self) -> usize {
        self.deferred_releases.borrow().len()
    }

    /// Submits the frame, throttles the host to the in-flight frame count
    /// and reclaims what completed frames were using.
    pub fn end_frame(&self) -> Result<()> {
        let mut context = self.render_context.borrow_mut();
        context.submit(false)?;

        let signaled = self.frame_fence.signaled_value();
        if signaled > self.in_flight_frame_count {
            self.frame_fence
                .wait(Some(signaled - self.in_flight_frame_count), None)?;
        }

        context.signal(&self.frame_fence, None)?;
        drop(context);

        self.execute_deferred_releases()
    }

    /// Submits all recorded work and blocks until the device is idle.
    pub fn wait_for_idle(&self) -> Result<()> {
        {
            let mut context = self.render_context.borrow_mut();
            context.submit(true)?;
            context.signal(&self.frame_fence, None)?;
        }

        self.frame_fence.wait(None, None)?;
        self.execute_deferred_releases()
    }

    fn execute_deferred_releases(&self) -> Result<()> {
        self.upload_heap.borrow_mut().execute_deferred_releases()?;

        let current_value = self.frame_fence.current_value()?;
        let mut releases = self.deferred_releases.borrow_mut();
        while releases
            .front()
            .is_some_and(|(fence_value, _)| *fence_value < current_value)
        {
            releases.pop_front();
        }

        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(error) = self.wait_for_idle() {
            tracing::error!(%error, "failed to wait for the device to become idle");
        }
    }
}
