use std::{rc::Rc, sync::Arc};

use kiln_gfx as gfx;

use crate::{
    error::{Error, GfxResultExt, Result},
    fence::{Fence, FenceDesc},
    native_handle::{NativeHandle, NativeHandleType},
};

enum OpenEncoder {
    Resource(Box<dyn gfx::ResourceEncoder>),
    Compute(Box<dyn gfx::ComputeEncoder>),
    Render {
        encoder: Box<dyn gfx::RenderEncoder>,
        layout: Arc<dyn gfx::RenderPassLayout>,
        framebuffer: Arc<dyn gfx::Framebuffer>,
    },
    RayTracing(Box<dyn gfx::RayTracingEncoder>),
}

impl OpenEncoder {
    fn end_encoding(mut self) {
        match &mut self {
            OpenEncoder::Resource(encoder) => encoder.end_encoding(),
            OpenEncoder::Compute(encoder) => encoder.end_encoding(),
            OpenEncoder::Render { encoder, .. } => encoder.end_encoding(),
            OpenEncoder::RayTracing(encoder) => encoder.end_encoding(),
        }
    }
}

/// Debug markers are drawn black in capture tools.
const DEBUG_EVENT_COLOR: [f32; 3] = [0.0, 0.0, 0.0];

fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// The command buffer of a context, the single encoder currently recording
/// into it, and the fence that tracks its submissions.
///
/// The command buffer is open for the whole lifetime of the context except
/// while it is being submitted. Asking for an encoder of a different kind than
/// the open one ends the open encoder first.
pub struct LowLevelContextData {
    device: Arc<dyn gfx::Device>,
    queue: Arc<dyn gfx::CommandQueue>,
    command_buffer: Option<Box<dyn gfx::CommandBuffer>>,
    fence: Rc<Fence>,
    is_command_buffer_open: bool,
    encoder: Option<OpenEncoder>,
}

impl LowLevelContextData {
    pub(crate) fn new(
        device: Arc<dyn gfx::Device>,
        queue: Arc<dyn gfx::CommandQueue>,
    ) -> Result<Self> {
        let fence = Rc::new(Fence::new(device.as_ref(), FenceDesc::default())?);

        let mut data = Self {
            device,
            queue,
            command_buffer: None,
            fence,
            is_command_buffer_open: false,
            encoder: None,
        };

        data.open_command_buffer()?;
        Ok(data)
    }

    #[must_use]
    pub fn device(&self) -> &Arc<dyn gfx::Device> {
        &self.device
    }

    #[must_use]
    pub fn command_queue(&self) -> &Arc<dyn gfx::CommandQueue> {
        &self.queue
    }

    #[must_use]
    pub fn fence(&self) -> &Rc<Fence> {
        &self.fence
    }

    #[must_use]
    pub fn is_command_buffer_open(&self) -> bool {
        self.is_command_buffer_open
    }

    pub fn open_command_buffer(&mut self) -> Result<()> {
        self.is_command_buffer_open = true;
        self.command_buffer = Some(
            self.device
                .create_command_buffer()
                .gfx_call("ITransientResourceHeap::createCommandBuffer")?,
        );
        Ok(())
    }

    pub fn close_command_buffer(&mut self) -> Result<()> {
        self.is_command_buffer_open = false;
        self.close_encoders();

        if let Some(command_buffer) = self.command_buffer.as_mut() {
            command_buffer.close().gfx_call("ICommandBuffer::close")?;
        }

        Ok(())
    }

    /// Closes, submits and reopens the command buffer. The submission signals
    /// the context fence with its next value.
    pub fn submit_command_buffer(&mut self) -> Result<()> {
        self.close_command_buffer()?;

        let command_buffer = self
            .command_buffer
            .take()
            .ok_or_else(|| Error::InvalidUsage("no command buffer to submit".into()))?;

        let signal_value = self.fence.update_signaled_value(None);
        self.queue
            .execute(vec![command_buffer], Some((self.fence.gfx_fence(), signal_value)))
            .gfx_call("ICommandQueue::executeCommandBuffers")?;
        tracing::trace!(signal_value, "submitted command buffer");

        self.open_command_buffer()
    }

    fn command_buffer(&mut self) -> Result<&mut Box<dyn gfx::CommandBuffer>> {
        match self.command_buffer.as_mut() {
            Some(command_buffer) if self.is_command_buffer_open => Ok(command_buffer),
            _ => Err(Error::InvalidUsage(
                "the command buffer is not open for recording".into(),
            )),
        }
    }

    /// An encoder for copies, clears, barriers and queries.
    ///
    /// An open compute or ray tracing encoder records resource commands as
    /// well and is returned as-is.
    pub fn resource_encoder(&mut self) -> Result<&mut dyn gfx::ResourceEncoder> {
        let reusable = matches!(
            self.encoder,
            Some(
                OpenEncoder::Resource(_) | OpenEncoder::Compute(_) | OpenEncoder::RayTracing(_)
            )
        );

        if !reusable {
            self.close_encoders();
            let encoder = self
                .command_buffer()?
                .encode_resource_commands()
                .gfx_call("ICommandBuffer::encodeResourceCommands")?;
            self.encoder = Some(OpenEncoder::Resource(encoder));
        }

        match self.encoder.as_mut() {
            Some(OpenEncoder::Resource(encoder)) => Ok(encoder.as_mut()),
            Some(OpenEncoder::Compute(encoder)) => Ok(encoder.as_resource_encoder()),
            Some(OpenEncoder::RayTracing(encoder)) => Ok(encoder.as_resource_encoder()),
            _ => Err(Error::InvalidUsage("no resource encoder is open".into())),
        }
    }

    pub fn compute_encoder(&mut self) -> Result<&mut dyn gfx::ComputeEncoder> {
        if !matches!(self.encoder, Some(OpenEncoder::Compute(_))) {
            self.close_encoders();
            let encoder = self
                .command_buffer()?
                .encode_compute_commands()
                .gfx_call("ICommandBuffer::encodeComputeCommands")?;
            self.encoder = Some(OpenEncoder::Compute(encoder));
        }

        match self.encoder.as_mut() {
            Some(OpenEncoder::Compute(encoder)) => Ok(encoder.as_mut()),
            _ => Err(Error::InvalidUsage("no compute encoder is open".into())),
        }
    }

    /// A render encoder for `layout` and `framebuffer`. The open render
    /// encoder is reused only if it targets the same layout and framebuffer
    /// objects. The returned flag is `true` if a new encoder was opened.
    pub fn render_encoder(
        &mut self,
        layout: &Arc<dyn gfx::RenderPassLayout>,
        framebuffer: &Arc<dyn gfx::Framebuffer>,
    ) -> Result<(&mut dyn gfx::RenderEncoder, bool)> {
        let reusable = match &self.encoder {
            Some(OpenEncoder::Render {
                layout: open_layout,
                framebuffer: open_framebuffer,
                ..
            }) => same_object(open_layout, layout) && same_object(open_framebuffer, framebuffer),
            _ => false,
        };

        if !reusable {
            self.close_encoders();
            let encoder = self
                .command_buffer()?
                .encode_render_commands(layout, framebuffer)
                .gfx_call("ICommandBuffer::encodeRenderCommands")?;
            self.encoder = Some(OpenEncoder::Render {
                encoder,
                layout: layout.clone(),
                framebuffer: framebuffer.clone(),
            });
        }

        match self.encoder.as_mut() {
            Some(OpenEncoder::Render { encoder, .. }) => Ok((encoder.as_mut(), !reusable)),
            _ => Err(Error::InvalidUsage("no render encoder is open".into())),
        }
    }

    pub fn ray_tracing_encoder(&mut self) -> Result<&mut dyn gfx::RayTracingEncoder> {
        if !matches!(self.encoder, Some(OpenEncoder::RayTracing(_))) {
            self.close_encoders();
            let encoder = self
                .command_buffer()?
                .encode_ray_tracing_commands()
                .gfx_call("ICommandBuffer::encodeRayTracingCommands")?;
            self.encoder = Some(OpenEncoder::RayTracing(encoder));
        }

        match self.encoder.as_mut() {
            Some(OpenEncoder::RayTracing(encoder)) => Ok(encoder.as_mut()),
            _ => Err(Error::InvalidUsage("no ray tracing encoder is open".into())),
        }
    }

    /// Ends the open encoder, if any.
    pub fn close_encoders(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            encoder.end_encoding();
        }
    }

    pub fn begin_debug_event(&mut self, name: &str) -> Result<()> {
        self.resource_encoder()?
            .begin_debug_event(name, DEBUG_EVENT_COLOR);
        Ok(())
    }

    pub fn end_debug_event(&mut self) -> Result<()> {
        self.resource_encoder()?.end_debug_event();
        Ok(())
    }

    pub fn command_queue_native_handle(&self) -> Result<NativeHandle> {
        let handle = self
            .queue
            .native_handle()
            .gfx_call("ICommandQueue::getNativeHandle")?;

        Ok(NativeHandle::from_interop(
            handle,
            NativeHandleType::D3d12CommandQueue,
            NativeHandleType::VkQueue,
        ))
    }

    pub fn command_buffer_native_handle(&self) -> Result<NativeHandle> {
        let command_buffer = self
            .command_buffer
            .as_ref()
            .ok_or_else(|| Error::InvalidUsage("no command buffer is open".into()))?;
        let handle = command_buffer
            .native_handle()
            .gfx_call("ICommandBuffer::getNativeHandle")?;

        Ok(NativeHandle::from_interop(
            handle,
            NativeHandleType::D3d12GraphicsCommandList,
            NativeHandleType::VkCommandBuffer,
        ))
    }
}

impl Drop for LowLevelContextData {
    fn drop(&mut self) {
        if self.is_command_buffer_open {
            if let Err(error) = self.close_command_buffer() {
                tracing::error!(%error, "failed to close command buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kiln_gfx::Device as _;

    use super::*;
    use crate::test_support::gfx_device;

    fn context() -> (LowLevelContextData, Arc<gfx::emulated::EmulatedDevice>) {
        let device = gfx_device();
        let queue = device
            .create_command_queue(&gfx::CommandQueueDesc::default())
            .unwrap();
        (LowLevelContextData::new(device.clone(), queue).unwrap(), device)
    }

    fn encoder_address<T: ?Sized>(encoder: &mut T) -> *const () {
        (encoder as *const T).cast()
    }

    #[test]
    fn same_kind_reuses_the_open_encoder() {
        let (mut context, device) = context();

        let first = encoder_address(context.compute_encoder().unwrap());
        let second = encoder_address(context.compute_encoder().unwrap());

        assert_eq!(first, second);
        assert_eq!(device.counters().encoders_opened, 1);
        assert_eq!(device.counters().encoders_closed, 0);
    }

    #[test]
    fn switching_kinds_closes_the_open_encoder() {
        let (mut context, device) = context();

        context.compute_encoder().unwrap();
        context.ray_tracing_encoder().unwrap();

        let counters = device.counters();
        assert_eq!(counters.encoders_opened, 2);
        assert_eq!(
            counters.encoders_closed, 1,
            "the compute encoder must end before the ray tracing encoder opens"
        );
    }

    #[test]
    fn resource_commands_reuse_compute_encoder() {
        let (mut context, device) = context();

        context.compute_encoder().unwrap();
        context.resource_encoder().unwrap();
        assert_eq!(device.counters().encoders_opened, 1);

        // The reverse does not hold.
        context.close_encoders();
        context.resource_encoder().unwrap();
        context.compute_encoder().unwrap();
        assert_eq!(device.counters().encoders_opened, 3);
    }

    #[test]
    fn render_encoder_is_keyed_by_layout_and_framebuffer() {
        let (mut context, device) = context();

        let layout = device
            .create_render_pass_layout(&gfx::RenderPassLayoutDesc {
                color_target_count: 1,
                has_depth_stencil: false,
            })
            .unwrap();
        let framebuffer_desc = gfx::FramebufferDesc {
            width: 64,
            height: 64,
            color_target_count: 1,
            has_depth_stencil: false,
        };
        let a = device.create_framebuffer(&framebuffer_desc).unwrap();
        let b = device.create_framebuffer(&framebuffer_desc).unwrap();

        assert!(context.render_encoder(&layout, &a).unwrap().1);
        assert!(!context.render_encoder(&layout, &a).unwrap().1);
        assert!(
            context.render_encoder(&layout, &b).unwrap().1,
            "a different framebuffer needs a new encoder"
        );

        assert_eq!(device.counters().encoders_opened, 2);
        assert_eq!(device.counters().encoders_closed, 1);
    }

    #[test]
    fn submit_signals_the_context_fence() {
        let (mut context, device) = context();

        context.resource_encoder().unwrap();
        context.submit_command_buffer().unwrap();

        assert!(context.is_command_buffer_open());
        assert_eq!(context.fence().signaled_value(), 1);
        context
            .fence()
            .wait(None, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(context.fence().current_value().unwrap(), 1);

        let counters = device.counters();
        assert_eq!(counters.command_buffers_created, 2);
        assert_eq!(counters.encoders_closed, 1);
    }

    #[test]
    fn recording_requires_an_open_command_buffer() {
        let (mut context, _device) = context();

        context.close_command_buffer().unwrap();
        assert!(context.compute_encoder().is_err());

        context.open_command_buffer().unwrap();
        assert!(context.compute_encoder().is_ok());
    }

    #[test]
    fn debug_events_are_black() {
        let (mut context, device) = context();

        context.begin_debug_event("upload").unwrap();
        context.end_debug_event().unwrap();
        context.submit_command_buffer().unwrap();
        context.fence().wait(None, None).unwrap();

        assert_eq!(
            device.debug_events(),
            [gfx::emulated::DebugEvent {
                name: "upload".to_owned(),
                color: [0.0, 0.0, 0.0],
            }]
        );
    }
}
