use std::{any::Any, sync::Arc, time::Duration};

use crate::{BufferDesc, BufferViewDesc, FenceDesc, InteropHandle, QueryPoolDesc, Result};

/// A monotonically increasing 64-bit counter shared between host and device.
pub trait Fence: Send + Sync {
    fn desc(&self) -> &FenceDesc;

    /// The last value the device (or host) has written to the fence.
    fn current_value(&self) -> Result<u64>;

    /// Sets the fence value from the host.
    fn set_current_value(&self, value: u64) -> Result<()>;

    /// Blocks until the fence reaches `value` or `timeout` elapses.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first. A `None` timeout
    /// waits indefinitely.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<bool>;

    fn shared_handle(&self) -> Result<InteropHandle>;

    fn native_handle(&self) -> Result<InteropHandle>;

    fn as_any(&self) -> &dyn Any;
}

pub trait Buffer: Send + Sync {
    fn desc(&self) -> &BufferDesc;

    fn device_address(&self) -> u64;

    /// Writes `data` at `offset`. Only valid for host-visible memory.
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Reads `out.len()` bytes from `offset`. Only valid for host-visible
    /// memory.
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;

    fn native_handle(&self) -> Result<InteropHandle>;

    fn as_any(&self) -> &dyn Any;
}

pub trait ResourceView: Send + Sync {
    fn desc(&self) -> &BufferViewDesc;

    fn buffer(&self) -> &Arc<dyn Buffer>;

    fn as_any(&self) -> &dyn Any;
}

pub trait QueryPool: Send + Sync {
    fn desc(&self) -> &QueryPoolDesc;

    fn native_handle(&self) -> Result<InteropHandle>;

    fn as_any(&self) -> &dyn Any;
}
