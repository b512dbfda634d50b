//! GPU resource lifetime and command submission.
//!
//! The [`Device`] owns the command queue and everything that must outlive a
//! frame: the frame fence, the transient upload heap, the timestamp query
//! heap and the program manager. Work is recorded into the device's
//! [`RenderContext`] and submitted to the queue; the fences tell when memory
//! the work used can be reused.
//!
//! Shaders are WGSL. Programs are compiled lazily: the front end runs once
//! per define set, kernels once per specialization, and per-entry-point code
//! only when someone asks for it.
//!
//! ## Goals
//!
//! - [x] Sub-allocated transient upload memory, reclaimed by fence value
//! - [x] Explicit resource state tracking with minimal barriers
//! - [x] Lazy, cached shader compilation with hot reload
//!
//! ## Non-goals
//!
//! - [ ] Render graphs, scenes, or any particular rendering technique
//! - [ ] Textures beyond framebuffer descriptions

pub mod context;
pub mod native_handle;
pub mod program;
pub mod state;

mod device;
mod error;
mod fbo;
mod fence;
mod gpu_memory_heap;
mod gpu_timer;
mod query_heap;
mod resource;

pub use context::{ComputeContext, CopyContext, LowLevelContextData, RenderContext};
pub use device::Device;
pub use error::{Error, Result};
pub use fbo::Fbo;
pub use fence::{Fence, FenceDesc};
pub use gpu_memory_heap::{Allocation, GpuMemoryHeap};
pub use gpu_timer::GpuTimer;
pub use native_handle::{NativeHandle, NativeHandleType};
pub use query_heap::{QueryHeap, QueryType};
pub use resource::{BindFlags, Buffer, BufferDesc, MemoryType, ResourceState, UnorderedAccessView};

use program::DefineList;

/// Options for creating a [`Device`]. Once set, these cannot be changed
/// without recreating the device.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// The size of one page of the transient upload heap. Larger requests get
    /// a dedicated buffer.
    ///
    /// Defaults to 2 MiB.
    pub upload_heap_page_size: u64,

    /// The number of timestamp queries available to GPU timers. Each timer
    /// takes two.
    ///
    /// Defaults to 4096.
    pub timestamp_query_count: u32,

    /// How many frames the host may run ahead of the device before
    /// [`Device::end_frame`] blocks.
    ///
    /// Defaults to 3.
    pub in_flight_frame_count: u32,

    /// Whether to annotate generated shader code with its origin.
    ///
    /// Defaults to `false`.
    pub generate_shader_debug_info: bool,

    /// Defines added to every program. Defaults to none.
    pub global_defines: DefineList,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            upload_heap_page_size: 2 * 1024 * 1024,
            timestamp_query_count: 4096,
            in_flight_frame_count: 3,
            generate_shader_debug_info: false,
            global_defines: DefineList::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{cell::RefCell, rc::Rc, sync::Arc};

    use kiln_gfx::{
        emulated::{EmulatedDevice, EmulatedDeviceConfig},
        CommandQueueDesc, Device as _, DeviceType,
    };

    use crate::{
        context::CopyContext, fence::Fence, gpu_memory_heap::GpuMemoryHeap, Device, DeviceConfig,
        FenceDesc, MemoryType,
    };

    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    pub fn gfx_device() -> Arc<EmulatedDevice> {
        init_tracing();
        EmulatedDevice::new(EmulatedDeviceConfig::default())
    }

    pub fn gfx_device_reporting(api: DeviceType) -> Arc<EmulatedDevice> {
        init_tracing();
        EmulatedDevice::new(EmulatedDeviceConfig {
            reported_api: api,
            ..EmulatedDeviceConfig::default()
        })
    }

    /// A standalone copy context with its own upload heap.
    pub fn copy_context() -> (CopyContext, Arc<EmulatedDevice>) {
        let device = gfx_device();
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Rc::new(Fence::new(device.as_ref(), FenceDesc::default()).unwrap());
        let upload_heap = Rc::new(RefCell::new(
            GpuMemoryHeap::new(device.clone(), MemoryType::Upload, 64 * 1024, fence).unwrap(),
        ));

        let context = CopyContext::new(device.clone(), queue, upload_heap).unwrap();
        (context, device)
    }

    pub fn device() -> (Device, Arc<EmulatedDevice>) {
        device_with(DeviceConfig::default())
    }

    pub fn device_with(config: DeviceConfig) -> (Device, Arc<EmulatedDevice>) {
        let gfx_device = gfx_device();
        let device = Device::new(gfx_device.clone(), &config).unwrap();
        (device, gfx_device)
    }
}
