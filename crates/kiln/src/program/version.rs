use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    fmt::Write,
    rc::{Rc, Weak},
    sync::Arc,
};

use kiln_gfx as gfx;
use smallvec::SmallVec;

use super::{
    compiler::{CodeGenOptions, ShaderModule},
    CompilerFlags, DefineList, EntryPointGroupKind, ProgramManager, ProgramReflection,
    ProgramVars, ShaderStage,
};
use crate::error::{Error, Result};

/// A program compiled for one set of defines. Kernels are created from it
/// on demand, one per distinct set of specialization constants.
pub struct ProgramVersion {
    name: String,
    defines: DefineList,
    module: Rc<ShaderModule>,
    reflection: Rc<ProgramReflection>,
    groups: Vec<gfx::EntryPointGroupDesc>,
    options: CodeGenOptions,
    manager: Weak<ProgramManager>,
    kernels: RefCell<HashMap<String, Rc<ProgramKernels>>>,
}

impl ProgramVersion {
    pub(crate) fn new(
        name: String,
        defines: DefineList,
        module: ShaderModule,
        groups: Vec<gfx::EntryPointGroupDesc>,
        options: CodeGenOptions,
        manager: Weak<ProgramManager>,
    ) -> Self {
        let reflection = Rc::new(ProgramReflection::new(module.module()));
        Self {
            name,
            defines,
            module: Rc::new(module),
            reflection,
            groups,
            options,
            manager,
            kernels: RefCell::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn defines(&self) -> &DefineList {
        &self.defines
    }

    #[must_use]
    pub fn reflection(&self) -> &Rc<ProgramReflection> {
        &self.reflection
    }

    /// The entry point groups, with every hit group export name assigned.
    #[must_use]
    pub fn entry_point_groups(&self) -> &[gfx::EntryPointGroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn compiler_flags(&self) -> CompilerFlags {
        self.options.flags
    }

    pub(crate) fn module(&self) -> &Rc<ShaderModule> {
        &self.module
    }

    /// Returns the kernels specialized for `vars`, creating them on first
    /// use.
    pub fn kernels(self: &Rc<Self>, vars: &ProgramVars) -> Result<Rc<ProgramKernels>> {
        let key = if self.module.has_overrides() {
            vars.specialization_key()
        } else {
            String::new()
        };
        if let Some(kernels) = self.kernels.borrow().get(&key) {
            return Ok(kernels.clone());
        }

        let manager = self.manager.upgrade().ok_or(Error::DeviceDestroyed)?;
        let mut log = String::new();
        let kernels = manager
            .create_program_kernels(self, vars, &mut log)
            .ok_or_else(|| Error::ProgramCompilation {
                name: self.name.clone(),
                log,
            })?;

        self.kernels.borrow_mut().insert(key, kernels.clone());
        Ok(kernels)
    }

    #[must_use]
    pub fn cached_kernels_count(&self) -> usize {
        self.kernels.borrow().len()
    }
}

/// The kernels of a program version for one specialization.
pub struct ProgramKernels {
    name: String,
    specialization_key: String,
    reflection: Rc<ProgramReflection>,
    groups: Vec<Rc<EntryPointGroupKernels>>,
    gfx_program: Arc<dyn gfx::ShaderProgram>,
    version: Weak<ProgramVersion>,
}

impl ProgramKernels {
    pub(crate) fn new(
        version: &Rc<ProgramVersion>,
        specialization_key: String,
        groups: Vec<Rc<EntryPointGroupKernels>>,
        gfx_program: Arc<dyn gfx::ShaderProgram>,
    ) -> Self {
        Self {
            name: version.name.clone(),
            specialization_key,
            reflection: version.reflection.clone(),
            groups,
            gfx_program,
            version: Rc::downgrade(version),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn specialization_key(&self) -> &str {
        &self.specialization_key
    }

    #[must_use]
    pub fn reflection(&self) -> &Rc<ProgramReflection> {
        &self.reflection
    }

    #[must_use]
    pub fn gfx_program(&self) -> &Arc<dyn gfx::ShaderProgram> {
        &self.gfx_program
    }

    /// The version these kernels were created from, if it is still alive.
    #[must_use]
    pub fn program_version(&self) -> Option<Rc<ProgramVersion>> {
        self.version.upgrade()
    }

    #[must_use]
    pub fn entry_point_groups(&self) -> &[Rc<EntryPointGroupKernels>] {
        &self.groups
    }

    /// Returns the first kernel for `stage` across all groups.
    #[must_use]
    pub fn kernel(&self, stage: ShaderStage) -> Option<Rc<EntryPointKernel>> {
        self.groups.iter().find_map(|group| group.kernel(stage))
    }
}

/// The kernels of one entry point group.
pub struct EntryPointGroupKernels {
    kind: EntryPointGroupKind,
    export_name: String,
    kernels: SmallVec<[Rc<EntryPointKernel>; 3]>,
}

impl EntryPointGroupKernels {
    pub(crate) fn new(
        kind: EntryPointGroupKind,
        export_name: String,
        kernels: SmallVec<[Rc<EntryPointKernel>; 3]>,
    ) -> Self {
        Self {
            kind,
            export_name,
            kernels,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntryPointGroupKind {
        self.kind
    }

    #[must_use]
    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    #[must_use]
    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    #[must_use]
    pub fn kernel(&self, stage: ShaderStage) -> Option<Rc<EntryPointKernel>> {
        self.kernels
            .iter()
            .find(|kernel| kernel.stage == stage)
            .cloned()
    }

    #[must_use]
    pub fn kernel_by_index(&self, index: usize) -> Option<Rc<EntryPointKernel>> {
        self.kernels.get(index).cloned()
    }
}

/// A single entry point. Its code is generated on first request.
pub struct EntryPointKernel {
    name: String,
    stage: ShaderStage,
    program_name: String,
    defines: String,
    module: Rc<ShaderModule>,
    options: CodeGenOptions,
    blob: OnceCell<Rc<[u8]>>,
}

impl EntryPointKernel {
    pub(crate) fn new(
        version: &ProgramVersion,
        stage: ShaderStage,
        name: String,
        module: Rc<ShaderModule>,
    ) -> Self {
        let defines = version
            .defines
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            name,
            stage,
            program_name: version.name.clone(),
            defines,
            module,
            options: version.options.clone(),
            blob: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[must_use]
    pub fn is_blob_generated(&self) -> bool {
        self.blob.get().is_some()
    }

    /// Returns the generated code for this entry point. Generation runs once;
    /// failures are not cached and are retried on the next call.
    pub fn blob(&self) -> Result<Rc<[u8]>> {
        if let Some(blob) = self.blob.get() {
            return Ok(blob.clone());
        }

        let code = self.generate()?;
        Ok(self.blob.get_or_init(|| code.into_bytes().into()).clone())
    }

    fn generate(&self) -> Result<String> {
        let code = self
            .module
            .generate_glsl(self.stage, &self.name, &self.options)
            .map_err(|diagnostics| Error::ShaderCodeGeneration {
                entry_point: self.name.clone(),
                diagnostics,
            })?;

        let code = if self
            .options
            .flags
            .contains(CompilerFlags::GENERATE_DEBUG_INFO)
        {
            let mut annotated = String::with_capacity(code.len() + 128);
            let _ = writeln!(annotated, "// program: {}", self.program_name);
            let _ = writeln!(annotated, "// entry point: {} ({:?})", self.name, self.stage);
            let _ = writeln!(annotated, "// defines: {}", self.defines);
            annotated.push_str(&code);
            annotated
        } else {
            code
        };

        if self
            .options
            .flags
            .contains(CompilerFlags::DUMP_INTERMEDIATES)
        {
            tracing::debug!(
                program = %self.program_name,
                entry_point = %self.name,
                "generated code:\n{code}"
            );
        }

        Ok(code)
    }
}
