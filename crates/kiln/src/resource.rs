use std::{cell::Cell, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

pub use gfx::{BindFlags, BufferDesc, MemoryType, ResourceState};

use crate::{
    error::{GfxResultExt, Result},
    native_handle::{NativeHandle, NativeHandleType},
};

/// A GPU buffer and the resource state it was last transitioned to.
pub struct Buffer {
    gfx_buffer: Arc<dyn gfx::Buffer>,
    state: Cell<ResourceState>,
    srv: Option<Arc<dyn gfx::ResourceView>>,
    uav: Option<Arc<dyn gfx::ResourceView>>,
    uav_counter: Option<Rc<Buffer>>,
}

impl Buffer {
    pub(crate) fn new(
        device: &dyn gfx::Device,
        desc: &BufferDesc,
        uav_counter: Option<Rc<Buffer>>,
    ) -> Result<Self> {
        let gfx_buffer = device
            .create_buffer(desc)
            .gfx_call("IDevice::createBufferResource")?;

        let view = |kind| {
            device
                .create_buffer_view(
                    &gfx_buffer,
                    &gfx::BufferViewDesc {
                        kind,
                        offset: 0,
                        size: None,
                    },
                )
                .gfx_call("IDevice::createBufferView")
        };

        let srv = if desc.bind_flags.contains(BindFlags::SHADER_RESOURCE) {
            Some(view(gfx::ViewKind::ShaderResource)?)
        } else {
            None
        };

        let uav = if desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
            Some(view(gfx::ViewKind::UnorderedAccess)?)
        } else {
            None
        };

        Ok(Self {
            state: Cell::new(desc.initial_state),
            gfx_buffer,
            srv,
            uav,
            uav_counter,
        })
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.gfx_buffer.desc().size
    }

    #[must_use]
    pub fn element_size(&self) -> u32 {
        self.gfx_buffer.desc().element_size
    }

    #[must_use]
    pub fn memory_type(&self) -> MemoryType {
        self.gfx_buffer.desc().memory_type
    }

    #[must_use]
    pub fn bind_flags(&self) -> BindFlags {
        self.gfx_buffer.desc().bind_flags
    }

    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.gfx_buffer.device_address()
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    #[must_use]
    pub fn gfx_buffer(&self) -> &Arc<dyn gfx::Buffer> {
        &self.gfx_buffer
    }

    /// The hidden counter attached to structured buffers created with one.
    #[must_use]
    pub fn uav_counter(&self) -> Option<&Rc<Buffer>> {
        self.uav_counter.as_ref()
    }

    /// Whole-buffer unordered-access view. Only exists for buffers bound with
    /// [`BindFlags::UNORDERED_ACCESS`].
    #[must_use]
    pub fn uav(self: &Rc<Self>) -> Option<UnorderedAccessView> {
        self.uav.as_ref().map(|view| UnorderedAccessView {
            buffer: self.clone(),
            view: view.clone(),
        })
    }

    #[must_use]
    pub fn srv(&self) -> Option<&Arc<dyn gfx::ResourceView>> {
        self.srv.as_ref()
    }

    /// Writes into a host-visible buffer.
    pub fn set_blob(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.gfx_buffer.write(offset, data).gfx_call("IBufferResource::map")
    }

    /// Reads from a host-visible buffer.
    pub fn get_blob(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.gfx_buffer.read(offset, out).gfx_call("IBufferResource::map")
    }

    pub fn native_handle(&self) -> Result<NativeHandle> {
        let handle = self
            .gfx_buffer
            .native_handle()
            .gfx_call("IResource::getNativeResourceHandle")?;

        Ok(NativeHandle::from_interop(
            handle,
            NativeHandleType::D3d12Resource,
            NativeHandleType::VkBuffer,
        ))
    }
}

/// An unordered-access view, keeping its buffer alive.
#[derive(Clone)]
pub struct UnorderedAccessView {
    buffer: Rc<Buffer>,
    view: Arc<dyn gfx::ResourceView>,
}

impl UnorderedAccessView {
    #[must_use]
    pub fn buffer(&self) -> &Rc<Buffer> {
        &self.buffer
    }

    #[must_use]
    pub fn gfx_view(&self) -> &Arc<dyn gfx::ResourceView> {
        &self.view
    }
}
