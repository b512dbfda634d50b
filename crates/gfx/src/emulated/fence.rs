use std::{
    any::Any,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::Shared;
use crate::{Error, Fence, FenceDesc, InteropHandle, Result};

/// The part of a fence the queue worker signals.
pub(super) struct FenceState {
    value: Mutex<u64>,
    signaled: Condvar,
}

impl FenceState {
    pub(super) fn signal(&self, value: u64) {
        *self.value.lock() = value;
        self.signaled.notify_all();
    }

    pub(super) fn value(&self) -> u64 {
        *self.value.lock()
    }

    pub(super) fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut current = self.value.lock();

        while *current < value {
            match deadline {
                Some(deadline) => {
                    if self.signaled.wait_until(&mut current, deadline).timed_out() {
                        return *current >= value;
                    }
                }
                None => self.signaled.wait(&mut current),
            }
        }

        true
    }
}

pub struct EmulatedFence {
    id: u64,
    desc: FenceDesc,
    state: Arc<FenceState>,
    shared: Arc<Shared>,
}

impl EmulatedFence {
    pub(super) fn new(shared: &Arc<Shared>, desc: FenceDesc) -> Self {
        Self {
            id: shared.next_id(),
            desc,
            state: Arc::new(FenceState {
                value: Mutex::new(desc.initial_value),
                signaled: Condvar::new(),
            }),
            shared: shared.clone(),
        }
    }

    pub(super) fn state(fence: &Arc<dyn Fence>) -> Result<Arc<FenceState>> {
        fence
            .as_any()
            .downcast_ref::<Self>()
            .map(|fence| fence.state.clone())
            .ok_or_else(|| Error::InvalidArgument("fence belongs to another backend".into()))
    }
}

impl Fence for EmulatedFence {
    fn desc(&self) -> &FenceDesc {
        &self.desc
    }

    fn current_value(&self) -> Result<u64> {
        Ok(self.state.value())
    }

    fn set_current_value(&self, value: u64) -> Result<()> {
        self.state.signal(value);
        Ok(())
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.state.wait(value, timeout))
    }

    fn shared_handle(&self) -> Result<InteropHandle> {
        if self.desc.shared {
            Ok(self.shared.handle(self.id | 1 << 63))
        } else {
            Err(Error::InvalidState("fence was not created as shared"))
        }
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
