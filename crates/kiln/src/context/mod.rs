//! Command recording contexts.
//!
//! Each context level adds commands to the one below it:
//! [`CopyContext`] records copies, barriers and queries, [`ComputeContext`]
//! adds dispatches and clears, and [`RenderContext`] adds draws and ray
//! tracing. The higher levels dereference to the lower ones.

mod compute;
mod copy;
mod low_level;
mod render;

pub use compute::ComputeContext;
pub use copy::CopyContext;
pub use low_level::LowLevelContextData;
pub use render::RenderContext;
