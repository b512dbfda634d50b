//! Pipeline state, cached per compiled kernels.
//!
//! A state holds the program (and whatever else selects a pipeline) and
//! hands out state objects. Each state object wraps one device pipeline
//! created for one [`ProgramKernels`](crate::program::ProgramKernels)
//! instance, so a state keeps one object per specialization of its
//! program's active version.

mod compute;
mod graphics;
mod ray_tracing;

use std::{collections::HashMap, hash::Hash, rc::Rc, sync::Arc};

use kiln_gfx as gfx;

pub use compute::{ComputeState, ComputeStateObject};
pub use graphics::{GraphicsState, GraphicsStateObject};
pub use ray_tracing::{RtState, RtStateObject};

use crate::{
    error::{GfxResultExt, Result},
    native_handle::{NativeHandle, NativeHandleType},
    program::ProgramKernels,
};

/// Drops the state objects of program versions that have been discarded,
/// e.g. by a reload.
fn evict_superseded<K: Eq + Hash, V>(
    cache: &mut HashMap<K, Rc<V>>,
    kernels: impl Fn(&V) -> &Rc<ProgramKernels>,
) {
    cache.retain(|_, object| kernels(object).program_version().is_some());
}

fn pipeline_native_handle(pipeline: &Arc<dyn gfx::PipelineState>) -> Result<NativeHandle> {
    let handle = pipeline
        .native_handle()
        .gfx_call("IPipelineState::getNativeHandle")?;

    Ok(NativeHandle::from_interop(
        handle,
        NativeHandleType::D3d12PipelineState,
        NativeHandleType::VkPipeline,
    ))
}
