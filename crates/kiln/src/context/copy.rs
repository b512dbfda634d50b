use std::{cell::RefCell, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

use super::LowLevelContextData;
use crate::{
    error::{Error, GfxResultExt, Result},
    fence::Fence,
    gpu_memory_heap::GpuMemoryHeap,
    resource::{BindFlags, Buffer, MemoryType, ResourceState},
};

/// Records copies, barriers and queries into a command buffer and submits
/// them.
pub struct CopyContext {
    low_level: LowLevelContextData,
    upload_heap: Rc<RefCell<GpuMemoryHeap>>,
    commands_pending: bool,
    submission: u64,
}

impl CopyContext {
    pub(crate) fn new(
        device: Arc<dyn gfx::Device>,
        queue: Arc<dyn gfx::CommandQueue>,
        upload_heap: Rc<RefCell<GpuMemoryHeap>>,
    ) -> Result<Self> {
        Ok(Self {
            low_level: LowLevelContextData::new(device, queue)?,
            upload_heap,
            commands_pending: false,
            submission: 0,
        })
    }

    #[must_use]
    pub fn low_level_data(&self) -> &LowLevelContextData {
        &self.low_level
    }

    pub fn low_level_data_mut(&mut self) -> &mut LowLevelContextData {
        &mut self.low_level
    }

    #[must_use]
    pub fn has_pending_commands(&self) -> bool {
        self.commands_pending
    }

    pub(crate) fn set_pending_commands(&mut self) {
        self.commands_pending = true;
    }

    /// Counts calls to [`CopyContext::submit`]. Root objects prepared in an
    /// earlier submission are stale.
    pub(crate) fn submission(&self) -> u64 {
        self.submission
    }

    pub(crate) fn upload_heap(&self) -> &Rc<RefCell<GpuMemoryHeap>> {
        &self.upload_heap
    }

    /// Submits recorded work. The context fence is signaled even when there
    /// is nothing to submit, so waiting on it always covers prior work.
    ///
    /// Vars bound before the submit are prepared again on their next use.
    pub fn submit(&mut self, wait: bool) -> Result<()> {
        self.submission += 1;
        if self.commands_pending {
            self.low_level.submit_command_buffer()?;
            self.commands_pending = false;
        } else {
            let fence = self.low_level.fence().clone();
            self.signal(&fence, None)?;
        }

        if wait {
            self.low_level.fence().wait(None, None)?;
        }

        Ok(())
    }

    /// Signals `fence` on the queue, after all previously submitted work.
    pub fn signal(&mut self, fence: &Fence, value: Option<u64>) -> Result<u64> {
        let signal_value = fence.update_signaled_value(value);
        self.low_level
            .command_queue()
            .execute(Vec::new(), Some((fence.gfx_fence(), signal_value)))
            .gfx_call("ICommandQueue::executeCommandBuffers")?;
        Ok(signal_value)
    }

    /// Makes the queue wait on the device until `fence` reaches `value`, or
    /// its last signaled value.
    pub fn wait(&mut self, fence: &Fence, value: Option<u64>) -> Result<()> {
        let wait_value = value.unwrap_or_else(|| fence.signaled_value());
        self.low_level
            .command_queue()
            .wait_on_device(fence.gfx_fence(), wait_value)
            .gfx_call("ICommandQueue::waitForFenceValuesOnDevice")
    }

    /// Transitions `buffer` to `new_state`. Returns `false` if no barrier was
    /// needed. Host-visible buffers keep their state for their whole life and
    /// never need one.
    pub fn resource_barrier(&mut self, buffer: &Buffer, new_state: ResourceState) -> Result<bool> {
        if buffer.memory_type() != MemoryType::DeviceLocal {
            return Ok(false);
        }

        let old_state = buffer.state();
        if old_state == new_state {
            return Ok(false);
        }

        self.low_level
            .resource_encoder()?
            .buffer_barrier(buffer.gfx_buffer(), old_state, new_state)
            .gfx_call("IResourceCommandEncoder::bufferBarrier")?;
        buffer.set_state(new_state);
        self.commands_pending = true;
        Ok(true)
    }

    pub fn uav_barrier(&mut self, buffer: &Buffer) -> Result<()> {
        self.low_level
            .resource_encoder()?
            .uav_barrier(buffer.gfx_buffer())
            .gfx_call("IResourceCommandEncoder::bufferBarrier")?;
        self.commands_pending = true;
        Ok(())
    }

    pub fn copy_resource(&mut self, dst: &Buffer, src: &Buffer) -> Result<()> {
        if dst.size() != src.size() {
            return Err(Error::InvalidUsage(format!(
                "cannot copy a {} byte buffer into a {} byte buffer",
                src.size(),
                dst.size()
            )));
        }

        self.copy_buffer_region(dst, 0, src, 0, src.size())
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: &Buffer,
        dst_offset: u64,
        src: &Buffer,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.resource_barrier(dst, ResourceState::CopyDest)?;
        self.resource_barrier(src, ResourceState::CopySource)?;

        self.low_level
            .resource_encoder()?
            .copy_buffer(dst.gfx_buffer(), dst_offset, src.gfx_buffer(), src_offset, size)
            .gfx_call("IResourceCommandEncoder::copyBuffer")?;
        self.commands_pending = true;
        Ok(())
    }

    /// Uploads `data` into `buffer` at `offset` through the upload heap.
    pub fn update_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
            return Err(Error::InvalidUsage(format!(
                "update of {size} bytes at offset {offset} exceeds the {} byte buffer",
                buffer.size()
            )));
        }

        if size == 0 {
            return Ok(());
        }

        let staging = self
            .upload_heap
            .borrow_mut()
            .allocate_for(size, BindFlags::empty())?;
        staging.write(data)?;

        self.resource_barrier(buffer, ResourceState::CopyDest)?;
        let copied = self
            .low_level
            .resource_encoder()
            .and_then(|encoder| {
                encoder
                    .copy_buffer(buffer.gfx_buffer(), offset, staging.buffer(), staging.offset(), size)
                    .gfx_call("IResourceCommandEncoder::copyBuffer")
            });

        self.upload_heap.borrow_mut().release(staging);
        copied?;

        self.commands_pending = true;
        Ok(())
    }

    /// Copies `size` bytes of `buffer` back to the host. Submits and waits.
    pub fn read_buffer(&mut self, buffer: &Buffer, offset: u64, size: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(size)
            .map_err(|_| Error::InvalidUsage(format!("cannot read {size} bytes")))?;

        let mut desc = gfx::BufferDesc::new(size, MemoryType::ReadBack, BindFlags::empty());
        desc.label = Some("readback".to_owned());
        let readback = Buffer::new(self.low_level.device().as_ref(), &desc, None)?;

        self.copy_buffer_region(&readback, 0, buffer, offset, size)?;
        self.submit(true)?;

        let mut data = vec![0; len];
        readback.get_blob(0, &mut data)?;
        Ok(data)
    }

    pub fn begin_debug_event(&mut self, name: &str) -> Result<()> {
        self.low_level.begin_debug_event(name)
    }

    pub fn end_debug_event(&mut self) -> Result<()> {
        self.low_level.end_debug_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::copy_context;

    #[test]
    fn update_then_read_back() {
        let (mut context, device) = copy_context();
        let buffer = Buffer::new(
            device.as_ref(),
            &gfx::BufferDesc::new(64, MemoryType::DeviceLocal, BindFlags::SHADER_RESOURCE),
            None,
        )
        .unwrap();

        context.update_buffer(&buffer, 8, b"kiln").unwrap();
        assert!(context.has_pending_commands());
        assert_eq!(buffer.state(), ResourceState::CopyDest);

        let data = context.read_buffer(&buffer, 8, 4).unwrap();
        assert_eq!(data, b"kiln");
        assert_eq!(buffer.state(), ResourceState::CopySource);
        assert!(!context.has_pending_commands(), "read_buffer submits");
    }

    #[test]
    fn out_of_bounds_update_is_rejected() {
        let (mut context, device) = copy_context();
        let buffer = Buffer::new(
            device.as_ref(),
            &gfx::BufferDesc::new(16, MemoryType::DeviceLocal, BindFlags::empty()),
            None,
        )
        .unwrap();

        assert!(context.update_buffer(&buffer, 12, &[0; 8]).is_err());
        assert!(!context.has_pending_commands());
    }

    #[test]
    fn redundant_barriers_are_skipped() {
        let (mut context, device) = copy_context();
        let buffer = Buffer::new(
            device.as_ref(),
            &gfx::BufferDesc::new(16, MemoryType::DeviceLocal, BindFlags::UNORDERED_ACCESS),
            None,
        )
        .unwrap();

        assert!(context
            .resource_barrier(&buffer, ResourceState::UnorderedAccess)
            .unwrap());
        assert!(!context
            .resource_barrier(&buffer, ResourceState::UnorderedAccess)
            .unwrap());

        let upload = Buffer::new(
            device.as_ref(),
            &gfx::BufferDesc::new(16, MemoryType::Upload, BindFlags::empty()),
            None,
        )
        .unwrap();
        assert!(
            !context
                .resource_barrier(&upload, ResourceState::CopySource)
                .unwrap(),
            "upload buffers are never transitioned"
        );

        context.submit(true).unwrap();
        assert_eq!(device.counters().barriers, 1);
    }

    #[test]
    fn empty_submit_still_signals() {
        let (mut context, device) = copy_context();

        context.submit(true).unwrap();
        context.submit(true).unwrap();

        let fence = context.low_level_data().fence();
        assert_eq!(fence.signaled_value(), 2);
        assert_eq!(fence.current_value().unwrap(), 2);
        assert_eq!(
            device.counters().command_buffers_created,
            1,
            "nothing was recorded, so no command buffer was submitted"
        );
    }

    #[test]
    fn queue_signal_and_device_wait() {
        let (mut context, device) = copy_context();
        let gate = Fence::new(device.as_ref(), Default::default()).unwrap();
        let done = Fence::new(device.as_ref(), Default::default()).unwrap();

        gate.update_signaled_value(None);
        context.wait(&gate, None).unwrap();
        assert_eq!(context.signal(&done, Some(9)).unwrap(), 9);

        gate.signal(Some(1)).unwrap();
        done.wait(None, None).unwrap();
        assert_eq!(done.current_value().unwrap(), 9);
    }
}
