//! Shader programs.
//!
//! Programs are written in WGSL and compiled with naga in two stages. The
//! front end resolves defines, parses, validates and reflects the sources
//! into a [`ProgramVersion`], once per set of defines. The kernel stage
//! resolves `override` constants from a [`ProgramVars`] into
//! [`ProgramKernels`], once per set of constant values. Code for individual
//! entry points is only generated when asked for.

mod compiler;
mod define_list;
mod desc;
mod manager;
mod preprocess;
#[allow(clippy::module_inception)]
mod program;
mod reflection;
mod vars;
mod version;

pub use define_list::DefineList;
pub use desc::{
    CompilerFlags, EntryPointDesc, EntryPointGroupDesc, EntryPointGroupKind, ForcedCompilerFlags,
    ProgramDesc, ShaderSource, ShaderStage,
};
pub use manager::{CompilationStats, ProgramManager};
pub use program::Program;
pub use reflection::{
    EntryPointReflection, OverrideReflection, ProgramReflection, ResourceKind, ResourceReflection,
};
pub(crate) use vars::BoundVars;
pub use vars::{BufferAccess, ProgramVars};
pub use version::{EntryPointGroupKernels, EntryPointKernel, ProgramKernels, ProgramVersion};
