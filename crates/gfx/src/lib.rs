//! Thin graphics interop layer.
//!
//! Everything above this crate talks to the GPU through the object-safe traits
//! defined here: devices, fences, buffers, query pools, command queues, command
//! buffers and their encoders, shader programs and pipelines. Native backends
//! implement the traits on top of D3D12 or Vulkan; the [`emulated`] backend
//! implements them in host memory and executes submitted work on a worker
//! thread, which makes it usable for headless runs and tests.
//!
//! ## Goals
//!
//! - Asynchronous host/device semantics: submission never blocks, completion
//!   is observed only through fences.
//! - No hidden state tracking. Barriers, encoders and lifetimes are the
//!   caller's problem.

pub mod emulated;

mod command;
mod device;
mod pipeline;
mod resource;
mod types;

pub use command::*;
pub use device::*;
pub use pipeline::*;
pub use resource::*;
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("the device was lost")]
    DeviceLost,
}

pub type Result<T> = std::result::Result<T, Error>;
