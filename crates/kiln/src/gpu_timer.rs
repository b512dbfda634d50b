use std::{cell::RefCell, rc::Rc};

use kiln_gfx as gfx;

use crate::{
    context::CopyContext,
    device::Device,
    error::{Error, GfxResultExt, Result},
    query_heap::QueryHeap,
    resource::{BindFlags, Buffer, MemoryType, ResourceState},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Idle,
    Begin,
    End,
}

/// Measures GPU time between two timestamps recorded into a context.
///
/// A measurement goes `begin`, `end`, `resolve`. Once the resolving
/// submission has completed, [`GpuTimer::elapsed_ms`] reads the result.
/// The timer does not wait for the device itself.
pub struct GpuTimer {
    query_heap: Rc<RefCell<QueryHeap>>,
    timestamp_frequency: f64,
    resolve_buffer: Buffer,
    staging_buffer: Buffer,
    start: u32,
    end: u32,
    status: Status,
    data_pending: bool,
    elapsed_ms: f64,
}

impl GpuTimer {
    pub(crate) fn new(device: &Device) -> Result<Self> {
        let gfx_device = device.gfx_device().as_ref();

        let mut desc = gfx::BufferDesc::new(16, MemoryType::DeviceLocal, BindFlags::empty());
        desc.label = Some("GpuTimer::resolve".to_owned());
        let resolve_buffer = Buffer::new(gfx_device, &desc, None)?;

        let mut desc = gfx::BufferDesc::new(16, MemoryType::ReadBack, BindFlags::empty());
        desc.label = Some("GpuTimer::staging".to_owned());
        let staging_buffer = Buffer::new(gfx_device, &desc, None)?;

        let query_heap = device.timestamp_query_heap().clone();
        let (start, end) = {
            let mut heap = query_heap.borrow_mut();
            let Some(start) = heap.allocate() else {
                return Err(Error::QueryHeapExhausted);
            };
            let Some(end) = heap.allocate() else {
                heap.release(start);
                return Err(Error::QueryHeapExhausted);
            };
            (start, end)
        };

        Ok(Self {
            query_heap,
            timestamp_frequency: device.gpu_timestamp_frequency(),
            resolve_buffer,
            staging_buffer,
            start,
            end,
            status: Status::Idle,
            data_pending: false,
            elapsed_ms: 0.0,
        })
    }

    /// Records the start timestamp.
    pub fn begin(&mut self, context: &mut CopyContext) -> Result<()> {
        match self.status {
            Status::Begin => {
                tracing::warn!(
                    "GpuTimer::begin() called twice without an end() in-between, ignoring call"
                );
                return Ok(());
            }
            Status::End => {
                tracing::warn!(
                    "GpuTimer::begin() called after end() without resolving, the previous results are discarded"
                );
            }
            Status::Idle => {}
        }

        self.write_timestamp(context, self.start)?;
        self.status = Status::Begin;
        Ok(())
    }

    /// Records the end timestamp.
    pub fn end(&mut self, context: &mut CopyContext) -> Result<()> {
        if self.status != Status::Begin {
            tracing::warn!("GpuTimer::end() called without a preceding begin(), ignoring call");
            return Ok(());
        }

        self.write_timestamp(context, self.end)?;
        self.status = Status::End;
        Ok(())
    }

    /// Records the copy of both timestamps to host-readable memory. Does
    /// nothing if no measurement was taken.
    pub fn resolve(&mut self, context: &mut CopyContext) -> Result<()> {
        match self.status {
            Status::Idle => return Ok(()),
            Status::Begin => {
                return Err(Error::InvalidUsage(
                    "GpuTimer::resolve() called before end()".to_owned(),
                ))
            }
            Status::End => {}
        }

        context.resource_barrier(&self.resolve_buffer, ResourceState::CopyDest)?;
        {
            let heap = self.query_heap.borrow();
            let pool = heap.gfx_query_pool();
            let encoder = context.low_level_data_mut().resource_encoder()?;

            for (index, offset) in [(self.start, 0), (self.end, 8)] {
                encoder
                    .resolve_query(pool, index, 1, self.resolve_buffer.gfx_buffer(), offset)
                    .gfx_call("IResourceCommandEncoder::resolveQuery")?;
            }
        }
        context.copy_resource(&self.staging_buffer, &self.resolve_buffer)?;

        self.data_pending = true;
        self.status = Status::Idle;
        Ok(())
    }

    /// Milliseconds between the resolved timestamps. Returns 0 with a
    /// warning while a measurement is still open.
    pub fn elapsed_ms(&mut self) -> Result<f64> {
        match self.status {
            Status::Begin => {
                tracing::warn!("GpuTimer::elapsed_ms() called before end(), no data to fetch");
                return Ok(0.0);
            }
            Status::End => {
                tracing::warn!("GpuTimer::elapsed_ms() called before resolve(), no data to fetch");
                return Ok(0.0);
            }
            Status::Idle => {}
        }

        if self.data_pending {
            let mut bytes = [0; 16];
            self.staging_buffer.get_blob(0, &mut bytes)?;

            let [start, end] = [&bytes[..8], &bytes[8..]].map(|half| {
                let mut word = [0; 8];
                word.copy_from_slice(half);
                u64::from_le_bytes(word) as f64
            });

            self.elapsed_ms = (end - start) * self.timestamp_frequency;
            self.data_pending = false;
        }

        Ok(self.elapsed_ms)
    }

    fn write_timestamp(&self, context: &mut CopyContext, index: u32) -> Result<()> {
        let heap = self.query_heap.borrow();
        context
            .low_level_data_mut()
            .resource_encoder()?
            .write_timestamp(heap.gfx_query_pool(), index)
            .gfx_call("IResourceCommandEncoder::writeTimestamp")?;
        context.set_pending_commands();
        Ok(())
    }
}

impl Drop for GpuTimer {
    fn drop(&mut self) {
        let mut heap = self.query_heap.borrow_mut();
        heap.release(self.start);
        heap.release(self.end);
    }
}
