//! Host-memory implementation of the interop traits.
//!
//! Buffers live in host memory, recorded command buffers are executed in
//! order by a worker thread per queue, and fences are signaled from that
//! thread once a submission finishes. The device keeps counters of the work
//! it has seen so callers can check what was actually recorded and executed.

mod command;
mod fence;
mod pipeline;
mod queue;
mod resource;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;

use crate::{
    Buffer, BufferDesc, BufferViewDesc, CommandBuffer, CommandQueue, CommandQueueDesc, Device,
    DeviceInfo, DeviceType, Error, Fence, FenceDesc, Framebuffer, FramebufferDesc, InteropHandle,
    PipelineKind, PipelineState, QueryPool, QueryPoolDesc, RayTracingPipelineDesc,
    RenderPassLayout, RenderPassLayoutDesc, ResourceView, Result, ShaderProgram,
    ShaderProgramDesc, ShaderStage,
};

pub use command::EmulatedCommandBuffer;
pub use fence::EmulatedFence;
pub use pipeline::{EmulatedFramebuffer, EmulatedPipeline, EmulatedProgram, EmulatedRenderPassLayout};
pub use queue::EmulatedQueue;
pub use resource::{EmulatedBuffer, EmulatedQueryPool, EmulatedView};

const DEFAULT_CONSTANT_BUFFER_ALIGNMENT: u64 = 256;
const DEFAULT_BUFFER_ALIGNMENT: u64 = 16;

/// Emulated timestamps tick in nanoseconds.
const TIMESTAMP_PERIOD_MS: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct EmulatedDeviceConfig {
    /// The name reported in [`DeviceInfo::adapter_name`].
    ///
    /// Defaults to "Emulated Adapter".
    pub adapter_name: String,

    /// The API native handles are tagged with.
    ///
    /// Defaults to [`DeviceType::Emulated`]. Reporting a native API is useful
    /// to exercise interop paths without the native driver.
    pub reported_api: DeviceType,

    /// Placement alignment of constant buffer data.
    ///
    /// Defaults to 256 bytes.
    pub constant_buffer_alignment: u64,
}

impl Default for EmulatedDeviceConfig {
    fn default() -> Self {
        Self {
            adapter_name: "Emulated Adapter".to_owned(),
            reported_api: DeviceType::Emulated,
            constant_buffer_alignment: DEFAULT_CONSTANT_BUFFER_ALIGNMENT,
        }
    }
}

/// A point-in-time copy of the device counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub command_buffers_created: u64,
    pub encoders_opened: u64,
    pub encoders_closed: u64,
    pub submissions: u64,
    pub barriers: u64,
    pub copies: u64,
    pub clears: u64,
    pub dispatches: u64,
    pub draws: u64,
    pub ray_dispatches: u64,
    pub timestamps: u64,
}

#[derive(Default)]
struct AtomicCounters {
    command_buffers_created: AtomicU64,
    encoders_opened: AtomicU64,
    encoders_closed: AtomicU64,
    submissions: AtomicU64,
    barriers: AtomicU64,
    copies: AtomicU64,
    clears: AtomicU64,
    dispatches: AtomicU64,
    draws: AtomicU64,
    ray_dispatches: AtomicU64,
    timestamps: AtomicU64,
}

impl AtomicCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Counters {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        Counters {
            command_buffers_created: load(&self.command_buffers_created),
            encoders_opened: load(&self.encoders_opened),
            encoders_closed: load(&self.encoders_closed),
            submissions: load(&self.submissions),
            barriers: load(&self.barriers),
            copies: load(&self.copies),
            clears: load(&self.clears),
            dispatches: load(&self.dispatches),
            draws: load(&self.draws),
            ray_dispatches: load(&self.ray_dispatches),
            timestamps: load(&self.timestamps),
        }
    }
}

/// A debug marker executed on a queue.
#[derive(Clone, Debug, PartialEq)]
pub struct DebugEvent {
    pub name: String,
    pub color: [f32; 3],
}

/// State shared by every object created from one device.
struct Shared {
    info: DeviceInfo,
    counters: AtomicCounters,
    debug_events: Mutex<Vec<DebugEvent>>,
    epoch: Instant,
    next_id: AtomicU64,
    next_address: AtomicU64,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn handle(&self, value: u64) -> InteropHandle {
        InteropHandle {
            api: self.info.device_type,
            value,
        }
    }

    fn timestamp(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

pub struct EmulatedDevice {
    shared: Arc<Shared>,
    id: u64,
}

impl EmulatedDevice {
    #[must_use]
    pub fn new(config: EmulatedDeviceConfig) -> Arc<Self> {
        let shared = Arc::new(Shared {
            info: DeviceInfo {
                device_type: config.reported_api,
                adapter_name: config.adapter_name,
                timestamp_frequency: TIMESTAMP_PERIOD_MS,
                constant_buffer_alignment: config.constant_buffer_alignment,
                buffer_alignment: DEFAULT_BUFFER_ALIGNMENT,
            },
            counters: AtomicCounters::default(),
            debug_events: Mutex::new(Vec::new()),
            epoch: Instant::now(),
            next_id: AtomicU64::new(1),
            next_address: AtomicU64::new(0x1_0000),
        });

        let id = shared.next_id();
        tracing::debug!(adapter = %shared.info.adapter_name, "created emulated device");

        Arc::new(Self { shared, id })
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.shared.counters.snapshot()
    }

    /// Every debug event begun by executed command buffers, in order.
    #[must_use]
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.shared.debug_events.lock().clone()
    }
}

impl Device for EmulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    fn create_fence(&self, desc: &FenceDesc) -> Result<Arc<dyn Fence>> {
        Ok(Arc::new(EmulatedFence::new(&self.shared, *desc)))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        if desc.size == 0 {
            return Err(Error::InvalidArgument("buffer size must not be zero".into()));
        }

        let size = usize::try_from(desc.size).map_err(|_| Error::OutOfMemory)?;
        let span = desc.size.next_multiple_of(0x1_0000);
        let address = self.shared.next_address.fetch_add(span, Ordering::Relaxed);

        Ok(Arc::new(EmulatedBuffer::new(
            &self.shared,
            desc.clone(),
            vec![0; size],
            address,
        )))
    }

    fn create_buffer_view(
        &self,
        buffer: &Arc<dyn Buffer>,
        desc: &BufferViewDesc,
    ) -> Result<Arc<dyn ResourceView>> {
        Ok(Arc::new(EmulatedView::new(buffer.clone(), *desc)?))
    }

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<Arc<dyn QueryPool>> {
        if desc.count == 0 {
            return Err(Error::InvalidArgument("query pool must not be empty".into()));
        }

        Ok(Arc::new(EmulatedQueryPool::new(&self.shared, *desc)))
    }

    fn create_command_queue(&self, desc: &CommandQueueDesc) -> Result<Arc<dyn CommandQueue>> {
        Ok(Arc::new(EmulatedQueue::new(&self.shared, desc)?))
    }

    fn create_command_buffer(&self) -> Result<Box<dyn CommandBuffer>> {
        AtomicCounters::bump(&self.shared.counters.command_buffers_created);
        Ok(Box::new(EmulatedCommandBuffer::new(&self.shared)))
    }

    fn create_render_pass_layout(
        &self,
        desc: &RenderPassLayoutDesc,
    ) -> Result<Arc<dyn RenderPassLayout>> {
        Ok(Arc::new(EmulatedRenderPassLayout::new(desc.clone())))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidArgument("framebuffer must not be empty".into()));
        }

        Ok(Arc::new(EmulatedFramebuffer::new(desc.clone())))
    }

    fn create_shader_program(&self, desc: &ShaderProgramDesc) -> Result<Arc<dyn ShaderProgram>> {
        if desc.groups.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "shader program '{}' has no entry points",
                desc.label
            )));
        }

        Ok(Arc::new(EmulatedProgram::new(desc.clone())))
    }

    fn create_compute_pipeline(
        &self,
        program: &Arc<dyn ShaderProgram>,
    ) -> Result<Arc<dyn PipelineState>> {
        if !program.desc().has_stage(ShaderStage::Compute) {
            return Err(Error::InvalidArgument(format!(
                "program '{}' has no compute entry point",
                program.desc().label
            )));
        }

        Ok(Arc::new(EmulatedPipeline::new(
            &self.shared,
            PipelineKind::Compute,
            Vec::new(),
        )))
    }

    fn create_graphics_pipeline(
        &self,
        program: &Arc<dyn ShaderProgram>,
        _layout: &Arc<dyn RenderPassLayout>,
    ) -> Result<Arc<dyn PipelineState>> {
        if !program.desc().has_stage(ShaderStage::Vertex) {
            return Err(Error::InvalidArgument(format!(
                "program '{}' has no vertex entry point",
                program.desc().label
            )));
        }

        Ok(Arc::new(EmulatedPipeline::new(
            &self.shared,
            PipelineKind::Graphics,
            Vec::new(),
        )))
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<Arc<dyn PipelineState>> {
        let program = desc.program.desc();
        if !program.has_stage(ShaderStage::RayGeneration) {
            return Err(Error::InvalidArgument(format!(
                "program '{}' has no ray generation entry point",
                program.label
            )));
        }

        let exports = program
            .groups
            .iter()
            .map(|group| group.export_name.clone())
            .collect();

        Ok(Arc::new(EmulatedPipeline::new(
            &self.shared,
            PipelineKind::RayTracing,
            exports,
        )))
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{BindFlags, MemoryType};

    #[test]
    fn buffer_alignment_follows_bind_flags() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());

        assert_eq!(device.buffer_data_alignment(BindFlags::CONSTANT), 256);
        assert_eq!(device.buffer_data_alignment(BindFlags::SHADER_RESOURCE), 16);
    }

    #[test]
    fn host_fence_signal_and_wait() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());
        let fence = device
            .create_fence(&FenceDesc {
                initial_value: 3,
                shared: false,
            })
            .unwrap();

        assert_eq!(fence.current_value().unwrap(), 3);
        assert!(
            !fence.wait(4, Some(Duration::from_millis(1))).unwrap(),
            "waiting for an unsignaled value must time out"
        );

        let signaler = fence.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            signaler.set_current_value(4).unwrap();
        });

        assert!(fence.wait(4, None).unwrap());
        thread.join().unwrap();
    }

    #[test]
    fn shared_handle_requires_shared_fence() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());

        let private = device.create_fence(&FenceDesc::default()).unwrap();
        assert!(matches!(private.shared_handle(), Err(Error::InvalidState(_))));

        let shared = device
            .create_fence(&FenceDesc {
                initial_value: 0,
                shared: true,
            })
            .unwrap();
        assert_eq!(shared.shared_handle().unwrap().api, DeviceType::Emulated);
    }

    #[test]
    fn copy_executes_on_the_queue() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = device.create_fence(&FenceDesc::default()).unwrap();

        let src = device
            .create_buffer(&BufferDesc::new(16, MemoryType::Upload, BindFlags::empty()))
            .unwrap();
        let dst = device
            .create_buffer(&BufferDesc::new(16, MemoryType::ReadBack, BindFlags::empty()))
            .unwrap();
        src.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut commands = device.create_command_buffer().unwrap();
        let mut encoder = commands.encode_resource_commands().unwrap();
        encoder.copy_buffer(&dst, 4, &src, 0, 8).unwrap();
        encoder.end_encoding();
        commands.close().unwrap();

        queue.execute(vec![commands], Some((&fence, 1))).unwrap();
        assert!(fence.wait(1, None).unwrap());

        let mut out = [0u8; 16];
        dst.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]);
        assert_eq!(device.counters().copies, 1);
        assert_eq!(device.counters().submissions, 1);
    }

    #[test]
    fn only_one_encoder_may_be_open() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());
        let mut commands = device.create_command_buffer().unwrap();

        let mut encoder = commands.encode_compute_commands().unwrap();
        assert!(commands.encode_resource_commands().is_err());
        assert!(
            commands.close().is_err(),
            "closing with an open encoder must fail"
        );

        encoder.end_encoding();
        assert!(commands.encode_resource_commands().is_ok());
    }

    #[test]
    fn device_side_wait_orders_submissions() {
        let device = EmulatedDevice::new(EmulatedDeviceConfig::default());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let gate = device.create_fence(&FenceDesc::default()).unwrap();
        let done = device.create_fence(&FenceDesc::default()).unwrap();

        queue.wait_on_device(&gate, 1).unwrap();
        queue.execute(Vec::new(), Some((&done, 1))).unwrap();

        assert!(
            !done.wait(1, Some(Duration::from_millis(10))).unwrap(),
            "the queue must not pass an unsignaled device wait"
        );

        gate.set_current_value(1).unwrap();
        assert!(done.wait(1, None).unwrap());
    }
}
