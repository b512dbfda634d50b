use std::{any::Any, sync::Arc};

use parking_lot::Mutex;

use super::Shared;
use crate::{
    Buffer, BufferDesc, BufferViewDesc, Error, InteropHandle, MemoryType, QueryPool,
    QueryPoolDesc, ResourceView, Result,
};

pub(super) type Storage = Arc<Mutex<Vec<u8>>>;
pub(super) type QueryValues = Arc<Mutex<Vec<u64>>>;

pub(super) fn check_range(len: usize, offset: u64, size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= len as u64 => Ok(()),
        _ => Err(Error::InvalidArgument(format!(
            "range {offset}..{} is out of bounds for a {len} byte buffer",
            offset.saturating_add(size)
        ))),
    }
}

pub struct EmulatedBuffer {
    id: u64,
    desc: BufferDesc,
    address: u64,
    storage: Storage,
    shared: Arc<Shared>,
}

impl EmulatedBuffer {
    pub(super) fn new(shared: &Arc<Shared>, desc: BufferDesc, data: Vec<u8>, address: u64) -> Self {
        Self {
            id: shared.next_id(),
            desc,
            address,
            storage: Arc::new(Mutex::new(data)),
            shared: shared.clone(),
        }
    }

    pub(super) fn storage(buffer: &Arc<dyn Buffer>) -> Result<Storage> {
        buffer
            .as_any()
            .downcast_ref::<Self>()
            .map(|buffer| buffer.storage.clone())
            .ok_or_else(|| Error::InvalidArgument("buffer belongs to another backend".into()))
    }

    fn check_host_visible(&self) -> Result<()> {
        match self.desc.memory_type {
            MemoryType::Upload | MemoryType::ReadBack => Ok(()),
            MemoryType::DeviceLocal => Err(Error::InvalidState("buffer is not host-visible")),
        }
    }
}

impl Buffer for EmulatedBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn device_address(&self) -> u64 {
        self.address
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_host_visible()?;

        let mut storage = self.storage.lock();
        check_range(storage.len(), offset, data.len() as u64)?;
        let start = offset as usize;
        storage[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_host_visible()?;

        let storage = self.storage.lock();
        check_range(storage.len(), offset, out.len() as u64)?;
        let start = offset as usize;
        out.copy_from_slice(&storage[start..start + out.len()]);
        Ok(())
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct EmulatedView {
    desc: BufferViewDesc,
    buffer: Arc<dyn Buffer>,
}

impl EmulatedView {
    pub(super) fn new(buffer: Arc<dyn Buffer>, desc: BufferViewDesc) -> Result<Self> {
        let size = desc
            .size
            .unwrap_or_else(|| buffer.desc().size.saturating_sub(desc.offset));
        check_range(buffer.desc().size as usize, desc.offset, size)?;

        Ok(Self {
            desc: BufferViewDesc {
                size: Some(size),
                ..desc
            },
            buffer,
        })
    }

    /// The byte range of the underlying buffer covered by `view`.
    pub(super) fn range(view: &Arc<dyn ResourceView>) -> Result<(Storage, u64, u64)> {
        let desc = view.desc();
        let storage = EmulatedBuffer::storage(view.buffer())?;
        let size = desc.size.unwrap_or(view.buffer().desc().size - desc.offset);
        Ok((storage, desc.offset, size))
    }
}

impl ResourceView for EmulatedView {
    fn desc(&self) -> &BufferViewDesc {
        &self.desc
    }

    fn buffer(&self) -> &Arc<dyn Buffer> {
        &self.buffer
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct EmulatedQueryPool {
    id: u64,
    desc: QueryPoolDesc,
    values: QueryValues,
    shared: Arc<Shared>,
}

impl EmulatedQueryPool {
    pub(super) fn new(shared: &Arc<Shared>, desc: QueryPoolDesc) -> Self {
        Self {
            id: shared.next_id(),
            desc,
            values: Arc::new(Mutex::new(vec![0; desc.count as usize])),
            shared: shared.clone(),
        }
    }

    pub(super) fn values(pool: &Arc<dyn QueryPool>) -> Result<QueryValues> {
        pool.as_any()
            .downcast_ref::<Self>()
            .map(|pool| pool.values.clone())
            .ok_or_else(|| Error::InvalidArgument("query pool belongs to another backend".into()))
    }
}

impl QueryPool for EmulatedQueryPool {
    fn desc(&self) -> &QueryPoolDesc {
        &self.desc
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
