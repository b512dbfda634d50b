use std::{sync::Arc, thread::JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::{
    command::{Command, EmulatedCommandBuffer},
    fence::FenceState,
    AtomicCounters, EmulatedFence, Shared,
};
use crate::{
    CommandBuffer, CommandQueue, CommandQueueDesc, Error, Fence, InteropHandle, Result,
};

enum Job {
    Execute {
        commands: Vec<Command>,
        signal: Option<(Arc<FenceState>, u64)>,
    },
    Wait {
        fence: Arc<FenceState>,
        value: u64,
    },
    Flush(Sender<()>),
}

/// A queue backed by a worker thread that executes submissions in order.
pub struct EmulatedQueue {
    id: u64,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl EmulatedQueue {
    pub(super) fn new(shared: &Arc<Shared>, desc: &CommandQueueDesc) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let worker_shared = shared.clone();

        let worker = std::thread::Builder::new()
            .name(desc.label.unwrap_or("emulated queue").to_owned())
            .spawn(move || run(&worker_shared, &receiver))
            .map_err(|_| Error::OutOfMemory)?;

        Ok(Self {
            id: shared.next_id(),
            sender: Some(sender),
            worker: Some(worker),
            shared: shared.clone(),
        })
    }

    fn send(&self, job: Job) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(Error::DeviceLost)?
            .send(job)
            .map_err(|_| Error::DeviceLost)
    }
}

fn run(shared: &Shared, receiver: &Receiver<Job>) {
    for job in receiver {
        match job {
            Job::Execute { commands, signal } => {
                for command in &commands {
                    command.execute(shared);
                }

                AtomicCounters::bump(&shared.counters.submissions);

                if let Some((fence, value)) = signal {
                    tracing::trace!(value, "queue signaled fence");
                    fence.signal(value);
                }
            }
            Job::Wait { fence, value } => {
                fence.wait(value, None);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl CommandQueue for EmulatedQueue {
    fn execute(
        &self,
        command_buffers: Vec<Box<dyn CommandBuffer>>,
        signal: Option<(&Arc<dyn Fence>, u64)>,
    ) -> Result<()> {
        let mut commands = Vec::new();
        for buffer in &command_buffers {
            commands.extend(EmulatedCommandBuffer::take_commands(buffer.as_ref())?);
        }

        let signal = match signal {
            Some((fence, value)) => Some((EmulatedFence::state(fence)?, value)),
            None => None,
        };

        self.send(Job::Execute { commands, signal })
    }

    fn wait_on_device(&self, fence: &Arc<dyn Fence>, value: u64) -> Result<()> {
        self.send(Job::Wait {
            fence: EmulatedFence::state(fence)?,
            value,
        })
    }

    fn wait_for_idle(&self) -> Result<()> {
        let (done, finished) = channel::bounded(1);
        self.send(Job::Flush(done))?;
        finished.recv().map_err(|_| Error::DeviceLost)
    }

    fn native_handle(&self) -> Result<InteropHandle> {
        Ok(self.shared.handle(self.id))
    }
}

impl Drop for EmulatedQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender = None;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("emulated queue worker panicked");
            }
        }
    }
}
