use std::{any::Any, sync::Arc};

use parking_lot::Mutex;

use super::{
    resource::{check_range, EmulatedBuffer, EmulatedQueryPool, EmulatedView, QueryValues, Storage},
    AtomicCounters, DebugEvent, EmulatedPipeline, Shared,
};
use crate::{
    Buffer, ClearFlags, ClearValue, CommandBuffer, ComputeEncoder, Error, Framebuffer,
    InteropHandle, PipelineKind, PipelineState, QueryPool, RayTracingEncoder, RenderEncoder,
    RenderPassLayout, ResourceEncoder, ResourceState, ResourceView, Result, RootObject,
};

pub(super) enum Command {
    Copy {
        dst: Storage,
        dst_offset: u64,
        src: Storage,
        src_offset: u64,
        size: u64,
    },
    Fill {
        dst: Storage,
        offset: u64,
        size: u64,
        pattern: [u32; 4],
    },
    Barrier,
    Timestamp {
        values: QueryValues,
        index: u32,
    },
    Resolve {
        values: QueryValues,
        index: u32,
        count: u32,
        dst: Storage,
        dst_offset: u64,
    },
    Dispatch {
        groups: [u32; 3],
    },
    DispatchIndirect {
        args: Storage,
        offset: u64,
    },
    Draw {
        vertices: u64,
    },
    DispatchRays {
        export: String,
        rays: u64,
    },
    BeginDebugEvent(DebugEvent),
    EndDebugEvent,
}

impl Command {
    pub(super) fn execute(&self, shared: &Shared) {
        let counters = &shared.counters;

        match self {
            Command::Copy {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let (dst_offset, src_offset, size) =
                    (*dst_offset as usize, *src_offset as usize, *size as usize);

                if Arc::ptr_eq(dst, src) {
                    dst.lock()
                        .copy_within(src_offset..src_offset + size, dst_offset);
                } else {
                    let src = src.lock();
                    dst.lock()[dst_offset..dst_offset + size]
                        .copy_from_slice(&src[src_offset..src_offset + size]);
                }

                AtomicCounters::bump(&counters.copies);
            }
            Command::Fill {
                dst,
                offset,
                size,
                pattern,
            } => {
                let mut dst = dst.lock();
                let range = &mut dst[*offset as usize..(*offset + *size) as usize];

                for (i, chunk) in range.chunks_mut(4).enumerate() {
                    let lane = pattern[i % 4].to_le_bytes();
                    chunk.copy_from_slice(&lane[..chunk.len()]);
                }

                AtomicCounters::bump(&counters.clears);
            }
            Command::Barrier => AtomicCounters::bump(&counters.barriers),
            Command::Timestamp { values, index } => {
                values.lock()[*index as usize] = shared.timestamp();
                AtomicCounters::bump(&counters.timestamps);
            }
            Command::Resolve {
                values,
                index,
                count,
                dst,
                dst_offset,
            } => {
                let values = values.lock();
                let mut dst = dst.lock();
                let first = *index as usize;

                for (i, value) in values[first..first + *count as usize].iter().enumerate() {
                    let at = *dst_offset as usize + i * 8;
                    dst[at..at + 8].copy_from_slice(&value.to_le_bytes());
                }
            }
            Command::Dispatch { groups } => {
                tracing::trace!(?groups, "dispatch");
                AtomicCounters::bump(&counters.dispatches);
            }
            Command::DispatchIndirect { args, offset } => {
                let args = args.lock();
                let at = *offset as usize;
                let mut groups = [0u32; 3];
                for (i, group) in groups.iter_mut().enumerate() {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&args[at + i * 4..at + i * 4 + 4]);
                    *group = u32::from_le_bytes(bytes);
                }

                tracing::trace!(?groups, "indirect dispatch");
                AtomicCounters::bump(&counters.dispatches);
            }
            Command::Draw { vertices } => {
                tracing::trace!(vertices, "draw");
                AtomicCounters::bump(&counters.draws);
            }
            Command::DispatchRays { export, rays } => {
                tracing::trace!(export = %export, rays, "dispatch rays");
                AtomicCounters::bump(&counters.ray_dispatches);
            }
            Command::BeginDebugEvent(event) => {
                tracing::trace!(name = %event.name, color = ?event.color, "begin debug event");
                shared.debug_events.lock().push(event.clone());
            }
            Command::EndDebugEvent => tracing::trace!("end debug event"),
        }
    }
}

#[derive(Default)]
struct Recording {
    commands: Vec<Command>,
    encoder_open: bool,
    closed: bool,
}

pub struct EmulatedCommandBuffer {
    id: u64,
    recording: Arc<Mutex<Recording>>,
    shared: Arc<Shared>,
}

impl EmulatedCommandBuffer {
    pub(super) fn new(shared: &Arc<Shared>) -> Self {
        Self {
            id: shared.next_id(),
            recording: Arc::new(Mutex::new(Recording::default())),
            shared: shared.clone(),
        }
    }

    /// Takes the recorded commands out of a closed command buffer.
    pub(super) fn take_commands(buffer: &dyn CommandBuffer) -> Result<Vec<Command>> {
        let buffer = buffer
            .as_any()
            .downcast_ref::<Self>()
            .ok_or_else(|| Error::InvalidArgument("command buffer belongs to another backend".into()))?;

        let mut recording = buffer.recording.lock();
        if !recording.closed {
            return Err(Error::InvalidState("command buffer must be closed before submission"));
        }

        Ok(std::mem::take(&mut recording.commands))
    }

    fn begin_encoder(&mut self) -> Result<Recorder> {
        let mut recording = self.recording.lock();

        if recording.closed {
            return Err(Error::InvalidState("command buffer is closed"));
        }

        if recording.encoder_open {
            return Err(Error::InvalidState("another encoder is still open"));
        }

        recording.encoder_open = true;
        AtomicCounters::bump(&self.shared.counters.encoders_opened);

        Ok(Recorder {
            recording: self.recording.clone(),
            shared: self.shared.clone(),
            ended: false,
        })
    }
}

impl CommandBuffer for EmulatedCommandBuffer {
    fn encode_resource_commands(&mut self) -> Result<Box<dyn ResourceEncoder>> {
        Ok(Box::new(EmulatedEncoder::new(self.begin_encoder()?, None)))
    }

    fn encode_compute_commands(&mut self) -> Result<Box<dyn ComputeEncoder>> {
        Ok(Box::new(EmulatedEncoder::new(
            self.begin_encoder()?,
            Some(PipelineKind::Compute),
        )))
    }

    fn encode_render_commands(
        &mut self,
        layout: &Arc<dyn RenderPassLayout>,
        framebuffer: &Arc<dyn Framebuffer>,
    ) -> Result<Box<dyn RenderEncoder>> {
        if layout.desc().color_target_count != framebuffer.desc().color_target_count
            || layout.desc().has_depth_stencil != framebuffer.desc().has_depth_stencil
        {
            return Err(Error::InvalidArgument(
                "framebuffer does not match the render pass layout".into(),
            ));
        }

        Ok(Box::new(EmulatedRenderEncoder {
            recorder: self.begin_encoder()?,
            pipeline_bound: false,
        }))
    }

    fn encode_ray_tracing_commands(&mut self) -> Result<Box<dyn RayTracingEncoder>> {
        Ok(Box::new(EmulatedEncoder::new(
            self.begin_encoder()?,
            Some(PipelineKind::RayTracing),
        )))
    }

    fn close(&mut self) -> Result<()> {
        let mut recording = self.recording.lock();

        if recording.encoder_open {
            return Err(Error::InvalidState(
                "cannot close a command buffer with an open encoder",
            ));
        }

        recording.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.recording.lock().closed
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Recorder {
    recording: Arc<Mutex<Recording>>,
    shared: Arc<Shared>,
    ended: bool,
}

impl Recorder {
    fn push(&mut self, command: Command) -> Result<()> {
        if self.ended {
            return Err(Error::InvalidState("encoder has already ended"));
        }

        self.recording.lock().commands.push(command);
        Ok(())
    }

    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.recording.lock().encoder_open = false;
            AtomicCounters::bump(&self.shared.counters.encoders_closed);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.end();
    }
}

/// Resource, compute and ray tracing encoder. The latter two record resource
/// commands as well, and only differ in the pipelines they accept.
struct EmulatedEncoder {
    recorder: Recorder,
    kind: Option<PipelineKind>,
    exports: Option<Vec<String>>,
}

impl EmulatedEncoder {
    fn new(recorder: Recorder, kind: Option<PipelineKind>) -> Self {
        Self {
            recorder,
            kind,
            exports: None,
        }
    }

    fn bind(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()> {
        if Some(pipeline.kind()) != self.kind {
            return Err(Error::InvalidArgument(format!(
                "cannot bind a {:?} pipeline to this encoder",
                pipeline.kind()
            )));
        }

        for binding in &root.bindings {
            match &binding.resource {
                crate::BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => check_range(buffer.desc().size as usize, *offset, *size)?,
                crate::BindingResource::View(view) => {
                    EmulatedView::range(view)?;
                }
            }
        }

        let exports = pipeline
            .as_any()
            .downcast_ref::<EmulatedPipeline>()
            .ok_or_else(|| Error::InvalidArgument("pipeline belongs to another backend".into()))?
            .exports()
            .to_vec();

        self.exports = Some(exports);
        Ok(())
    }

    fn check_bound(&self) -> Result<&[String]> {
        self.exports
            .as_deref()
            .ok_or(Error::InvalidState("no pipeline is bound"))
    }
}

impl ResourceEncoder for EmulatedEncoder {
    fn copy_buffer(
        &mut self,
        dst: &Arc<dyn Buffer>,
        dst_offset: u64,
        src: &Arc<dyn Buffer>,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        check_range(dst.desc().size as usize, dst_offset, size)?;
        check_range(src.desc().size as usize, src_offset, size)?;

        self.recorder.push(Command::Copy {
            dst: EmulatedBuffer::storage(dst)?,
            dst_offset,
            src: EmulatedBuffer::storage(src)?,
            src_offset,
            size,
        })
    }

    fn clear_resource_view(
        &mut self,
        view: &Arc<dyn ResourceView>,
        value: ClearValue,
        flags: ClearFlags,
    ) -> Result<()> {
        if flags.is_empty() {
            return Err(Error::InvalidArgument("clear flags must not be empty".into()));
        }

        let (dst, offset, size) = EmulatedView::range(view)?;
        self.recorder.push(Command::Fill {
            dst,
            offset,
            size,
            pattern: value.0,
        })
    }

    fn buffer_barrier(
        &mut self,
        _buffer: &Arc<dyn Buffer>,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        if before == after {
            return Err(Error::InvalidArgument(format!(
                "redundant barrier {before:?} -> {after:?}"
            )));
        }

        self.recorder.push(Command::Barrier)
    }

    fn uav_barrier(&mut self, _buffer: &Arc<dyn Buffer>) -> Result<()> {
        self.recorder.push(Command::Barrier)
    }

    fn write_timestamp(&mut self, pool: &Arc<dyn QueryPool>, index: u32) -> Result<()> {
        if index >= pool.desc().count {
            return Err(Error::InvalidArgument(format!("query index {index} out of range")));
        }

        self.recorder.push(Command::Timestamp {
            values: EmulatedQueryPool::values(pool)?,
            index,
        })
    }

    fn resolve_query(
        &mut self,
        pool: &Arc<dyn QueryPool>,
        index: u32,
        count: u32,
        dst: &Arc<dyn Buffer>,
        dst_offset: u64,
    ) -> Result<()> {
        if index.checked_add(count).map_or(true, |end| end > pool.desc().count) {
            return Err(Error::InvalidArgument(format!(
                "query range {index}+{count} out of range"
            )));
        }
        check_range(dst.desc().size as usize, dst_offset, u64::from(count) * 8)?;

        self.recorder.push(Command::Resolve {
            values: EmulatedQueryPool::values(pool)?,
            index,
            count,
            dst: EmulatedBuffer::storage(dst)?,
            dst_offset,
        })
    }

    fn begin_debug_event(&mut self, name: &str, color: [f32; 3]) {
        // Debug markers are advisory; an ended encoder just drops them.
        let _ = self.recorder.push(Command::BeginDebugEvent(DebugEvent {
            name: name.to_owned(),
            color,
        }));
    }

    fn end_debug_event(&mut self) {
        let _ = self.recorder.push(Command::EndDebugEvent);
    }

    fn end_encoding(&mut self) {
        self.recorder.end();
    }
}

impl ComputeEncoder for EmulatedEncoder {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()> {
        self.bind(pipeline, root)
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.check_bound()?;
        self.recorder.push(Command::Dispatch { groups: [x, y, z] })
    }

    fn dispatch_compute_indirect(&mut self, args: &Arc<dyn Buffer>, offset: u64) -> Result<()> {
        self.check_bound()?;
        check_range(args.desc().size as usize, offset, 12)?;

        self.recorder.push(Command::DispatchIndirect {
            args: EmulatedBuffer::storage(args)?,
            offset,
        })
    }

    fn as_resource_encoder(&mut self) -> &mut dyn ResourceEncoder {
        self
    }
}

impl RayTracingEncoder for EmulatedEncoder {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, root: &RootObject) -> Result<()> {
        self.bind(pipeline, root)
    }

    fn dispatch_rays(
        &mut self,
        ray_gen_export: &str,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<()> {
        if !self.check_bound()?.iter().any(|name| name == ray_gen_export) {
            return Err(Error::InvalidArgument(format!(
                "'{ray_gen_export}' is not exported by the bound pipeline"
            )));
        }

        self.recorder.push(Command::DispatchRays {
            export: ray_gen_export.to_owned(),
            rays: u64::from(width) * u64::from(height) * u64::from(depth),
        })
    }

    fn as_resource_encoder(&mut self) -> &mut dyn ResourceEncoder {
        self
    }
}

struct EmulatedRenderEncoder {
    recorder: Recorder,
    pipeline_bound: bool,
}

impl RenderEncoder for EmulatedRenderEncoder {
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn PipelineState>, _root: &RootObject) -> Result<()> {
        if pipeline.kind() != PipelineKind::Graphics {
            return Err(Error::InvalidArgument(format!(
                "cannot bind a {:?} pipeline to a render encoder",
                pipeline.kind()
            )));
        }

        self.pipeline_bound = true;
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _start_vertex: u32,
        _start_instance: u32,
    ) -> Result<()> {
        if !self.pipeline_bound {
            return Err(Error::InvalidState("no pipeline is bound"));
        }

        self.recorder.push(Command::Draw {
            vertices: u64::from(vertex_count) * u64::from(instance_count),
        })
    }

    fn end_encoding(&mut self) {
        self.recorder.end();
    }
}
