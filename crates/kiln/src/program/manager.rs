use std::{
    cell::{Cell, RefCell},
    fmt::Write,
    fs,
    rc::{Rc, Weak},
    sync::Arc,
    time::Instant,
};

use kiln_gfx as gfx;

use super::{
    compiler::{CodeGenOptions, ShaderModule},
    preprocess::{declare_defines, preprocess},
    CompilerFlags, DefineList, EntryPointGroupKernels, EntryPointGroupKind, EntryPointKernel,
    ForcedCompilerFlags, Program, ProgramDesc, ProgramKernels, ProgramVars, ProgramVersion,
    ShaderSource,
};

/// Compilation counters and timings, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CompilationStats {
    pub program_version_count: usize,
    pub program_kernels_count: usize,
    pub program_version_max_time: f64,
    pub program_kernels_max_time: f64,
    pub program_version_total_time: f64,
    pub program_kernels_total_time: f64,
}

/// Compiles programs and tracks the live ones for reloading.
pub struct ProgramManager {
    device: Arc<dyn gfx::Device>,
    this: Weak<ProgramManager>,
    programs: RefCell<Vec<Weak<Program>>>,
    global_defines: RefCell<DefineList>,
    global_compiler_arguments: RefCell<Vec<String>>,
    shader_prelude: RefCell<String>,
    generate_debug_info: Cell<bool>,
    forced_compiler_flags: Cell<ForcedCompilerFlags>,
    stats: Cell<CompilationStats>,
    hit_group_id: Cell<u32>,
}

impl ProgramManager {
    pub(crate) fn new(device: Arc<dyn gfx::Device>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            device,
            this: this.clone(),
            programs: RefCell::new(Vec::new()),
            global_defines: RefCell::new(DefineList::new()),
            global_compiler_arguments: RefCell::new(Vec::new()),
            shader_prelude: RefCell::new(String::new()),
            generate_debug_info: Cell::new(false),
            forced_compiler_flags: Cell::new(ForcedCompilerFlags::default()),
            stats: Cell::new(CompilationStats::default()),
            hit_group_id: Cell::new(0),
        })
    }

    /// Compiles the front end of `program` with its current defines.
    /// Diagnostics are appended to `log`; `None` means compilation failed.
    pub fn create_program_version(
        &self,
        program: &Program,
        log: &mut String,
    ) -> Option<Rc<ProgramVersion>> {
        let start = Instant::now();
        let log_start = log.len();
        let desc = program.desc();

        let mut defines = self.global_defines.borrow().clone();
        defines.add_list(&program.defines());

        let flags = self.apply_forced_compiler_flags(desc.clone()).compiler_flags;
        let options = {
            let global_arguments = self.global_compiler_arguments.borrow();
            let arguments = global_arguments
                .iter()
                .chain(&desc.compiler_arguments)
                .map(String::as_str);
            CodeGenOptions::new(flags, arguments, log)
        };

        if flags.contains(CompilerFlags::TREAT_WARNINGS_AS_ERRORS) && log.len() > log_start {
            log.push_str("error: warnings are treated as errors\n");
            return None;
        }

        let mut source = String::new();
        for shader in &desc.sources {
            let (name, code) = match shader {
                ShaderSource::File(path) => match fs::read_to_string(path) {
                    Ok(code) => (path.display().to_string(), code),
                    Err(error) => {
                        let _ = writeln!(log, "failed to read '{}': {error}", path.display());
                        return None;
                    }
                },
                ShaderSource::String { name, code } => (name.clone(), code.clone()),
            };

            match preprocess(&code, &defines) {
                Ok(code) => {
                    source.push_str(&code);
                    source.push('\n');
                }
                Err(error) => {
                    let _ = writeln!(log, "{name}: {error}");
                    return None;
                }
            }
        }

        source.push_str(&self.shader_prelude.borrow());
        source.push('\n');
        declare_defines(&defines, &mut source);

        let module = ShaderModule::parse(&source, log)?;

        let mut groups = desc.groups.clone();
        if groups.is_empty() {
            let _ = writeln!(log, "program '{}' has no entry points", desc.name);
            return None;
        }

        for group in &mut groups {
            for entry_point in &group.entry_points {
                if !module.has_entry_point(entry_point.stage, &entry_point.name) {
                    let _ = writeln!(
                        log,
                        "{:?} entry point '{}' not found in program '{}'",
                        entry_point.stage, entry_point.name, desc.name
                    );
                    return None;
                }
            }

            if group.kind == EntryPointGroupKind::RtHitGroup && group.export_name.is_empty() {
                let id = self.hit_group_id.get();
                self.hit_group_id.set(id + 1);
                group.export_name = format!("HitGroup{id}");
            }
        }

        let version = Rc::new(ProgramVersion::new(
            desc.name.clone(),
            defines,
            module,
            groups,
            options,
            self.this.clone(),
        ));

        let seconds = start.elapsed().as_secs_f64();
        let mut stats = self.stats.get();
        stats.program_version_count += 1;
        stats.program_version_total_time += seconds;
        stats.program_version_max_time = stats.program_version_max_time.max(seconds);
        self.stats.set(stats);

        tracing::debug!(program = %desc.name, seconds, "created program version");
        Some(version)
    }

    /// Specializes `version` for the constants in `vars` and creates the
    /// device program. Diagnostics are appended to `log`.
    pub fn create_program_kernels(
        &self,
        version: &Rc<ProgramVersion>,
        vars: &ProgramVars,
        log: &mut String,
    ) -> Option<Rc<ProgramKernels>> {
        let start = Instant::now();

        let (module, specialization_key) = if version.module().has_overrides() {
            let module = version
                .module()
                .specialize(vars.specialization_constants(), log)?;
            (Rc::new(module), vars.specialization_key())
        } else {
            (version.module().clone(), String::new())
        };

        let groups = version
            .entry_point_groups()
            .iter()
            .map(|group| {
                let kernels = group
                    .entry_points
                    .iter()
                    .map(|entry_point| {
                        Rc::new(EntryPointKernel::new(
                            version,
                            entry_point.stage,
                            entry_point.name.clone(),
                            module.clone(),
                        ))
                    })
                    .collect();

                Rc::new(EntryPointGroupKernels::new(
                    group.kind,
                    group.export_name.clone(),
                    kernels,
                ))
            })
            .collect();

        let program_desc = gfx::ShaderProgramDesc {
            label: version.name().to_owned(),
            groups: version.entry_point_groups().to_vec(),
        };

        let gfx_program = match self.device.create_shader_program(&program_desc) {
            Ok(program) => program,
            Err(error) => {
                let _ = writeln!(log, "IDevice::createProgram failed: {error}");
                return None;
            }
        };

        let kernels = Rc::new(ProgramKernels::new(
            version,
            specialization_key,
            groups,
            gfx_program,
        ));

        let seconds = start.elapsed().as_secs_f64();
        let mut stats = self.stats.get();
        stats.program_kernels_count += 1;
        stats.program_kernels_total_time += seconds;
        stats.program_kernels_max_time = stats.program_kernels_max_time.max(seconds);
        self.stats.set(stats);

        tracing::debug!(
            program = %version.name(),
            specialization = %kernels.specialization_key(),
            seconds,
            "created program kernels"
        );
        Some(kernels)
    }

    /// Applies the debug info toggle and the forced flags to `desc`.
    #[must_use]
    pub fn apply_forced_compiler_flags(&self, mut desc: ProgramDesc) -> ProgramDesc {
        let forced = self.forced_compiler_flags.get();

        if self.generate_debug_info.get() {
            desc.compiler_flags |= CompilerFlags::GENERATE_DEBUG_INFO;
        }

        desc.compiler_flags |= forced.enabled;
        desc.compiler_flags &= !(forced.disabled & !forced.enabled);
        desc
    }

    pub fn register_program_for_reload(&self, program: &Rc<Program>) {
        self.programs.borrow_mut().push(Rc::downgrade(program));
    }

    pub fn unregister_program_for_reload(&self, program: &Program) {
        let target: *const Program = program;
        self.programs
            .borrow_mut()
            .retain(|registered| registered.strong_count() > 0 && registered.as_ptr() != target);
    }

    #[must_use]
    pub fn registered_program_count(&self) -> usize {
        self.programs
            .borrow()
            .iter()
            .filter(|program| program.strong_count() > 0)
            .count()
    }

    /// Reloads every live program whose sources changed, or all of them if
    /// `force` is set, and eagerly recompiles the reloaded ones. Returns
    /// whether any program was reloaded.
    pub fn reload_all_programs(&self, force: bool) -> bool {
        let programs: Vec<Rc<Program>> = self
            .programs
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut reloaded = false;
        for program in &programs {
            if program.reload(force) {
                reloaded = true;
                if let Err(error) = program.active_version() {
                    tracing::warn!(program = %program.desc().name, %error, "program reload failed");
                }
            }
        }

        reloaded
    }

    /// Adds defines to every program. Live programs are reloaded.
    pub fn add_global_defines(&self, defines: &DefineList) {
        self.global_defines.borrow_mut().add_list(defines);
        self.reload_all_programs(true);
    }

    pub fn remove_global_defines(&self, defines: &DefineList) {
        self.global_defines.borrow_mut().remove_list(defines);
        self.reload_all_programs(true);
    }

    #[must_use]
    pub fn global_defines(&self) -> DefineList {
        self.global_defines.borrow().clone()
    }

    /// Arguments passed to the compiler for every program, before the
    /// program's own.
    pub fn set_global_compiler_arguments(&self, arguments: Vec<String>) {
        *self.global_compiler_arguments.borrow_mut() = arguments;
    }

    #[must_use]
    pub fn global_compiler_arguments(&self) -> Vec<String> {
        self.global_compiler_arguments.borrow().clone()
    }

    /// WGSL declarations made available to every program.
    pub fn set_shader_prelude(&self, prelude: &str) {
        *self.shader_prelude.borrow_mut() = prelude.to_owned();
    }

    #[must_use]
    pub fn shader_prelude(&self) -> String {
        self.shader_prelude.borrow().clone()
    }

    pub fn set_generate_debug_info_enabled(&self, enabled: bool) {
        self.generate_debug_info.set(enabled);
    }

    #[must_use]
    pub fn is_generate_debug_info_enabled(&self) -> bool {
        self.generate_debug_info.get()
    }

    pub fn set_forced_compiler_flags(&self, flags: ForcedCompilerFlags) {
        self.forced_compiler_flags.set(flags);
        self.reload_all_programs(true);
    }

    #[must_use]
    pub fn forced_compiler_flags(&self) -> ForcedCompilerFlags {
        self.forced_compiler_flags.get()
    }

    #[must_use]
    pub fn compilation_stats(&self) -> CompilationStats {
        self.stats.get()
    }

    pub fn reset_compilation_stats(&self) {
        self.stats.set(CompilationStats::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{program::ShaderStage, test_support::gfx_device, Error};

    const COMPUTE: &str = "
        override SCALE: f32 = 1.0;

        @group(0) @binding(0) var<storage, read_write> data: array<f32>;

        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * SCALE;
        }
    ";

    fn manager() -> Rc<ProgramManager> {
        ProgramManager::new(gfx_device())
    }

    fn compute_program(manager: &Rc<ProgramManager>) -> Rc<Program> {
        Program::new(
            manager,
            ProgramDesc::new("scale")
                .add_shader_string("scale.wgsl", COMPUTE)
                .cs_entry("main"),
            DefineList::new(),
        )
    }

    #[test]
    fn kernels_are_cached_per_specialization() {
        let manager = manager();
        let program = compute_program(&manager);
        let version = program.active_version().unwrap();

        let vars = ProgramVars::new();
        let first = version.kernels(&vars).unwrap();
        let second = version.kernels(&ProgramVars::new()).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(manager.compilation_stats().program_kernels_count, 1);

        let mut scaled = ProgramVars::new();
        scaled.set_specialization_constant("SCALE", 3.0);
        let third = version.kernels(&scaled).unwrap();
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(version.cached_kernels_count(), 2);
        assert_eq!(manager.compilation_stats().program_kernels_count, 2);

        assert_eq!(third.specialization_key(), "SCALE=3");
        assert!(third.kernel(ShaderStage::Compute).is_some());
        assert!(third.kernel(ShaderStage::Vertex).is_none());
    }

    #[test]
    fn compile_failure_returns_none_with_a_log() {
        let manager = manager();
        let program = Program::new(
            &manager,
            ProgramDesc::new("broken")
                .add_shader_string("broken.wgsl", "fn main( {")
                .cs_entry("main"),
            DefineList::new(),
        );

        let mut log = String::new();
        assert!(manager.create_program_version(&program, &mut log).is_none());
        assert!(!log.is_empty());
        assert_eq!(manager.compilation_stats(), CompilationStats::default());

        assert!(matches!(
            program.active_version(),
            Err(Error::ProgramCompilation { .. })
        ));
    }

    #[test]
    fn missing_entry_point_fails() {
        let manager = manager();
        let program = Program::new(
            &manager,
            ProgramDesc::new("scale")
                .add_shader_string("scale.wgsl", COMPUTE)
                .cs_entry("missing"),
            DefineList::new(),
        );

        let mut log = String::new();
        assert!(manager.create_program_version(&program, &mut log).is_none());
        assert!(log.contains("missing"));
    }

    #[test]
    fn forced_enabled_flags_win() {
        let manager = manager();
        manager.set_forced_compiler_flags(ForcedCompilerFlags {
            enabled: CompilerFlags::DUMP_INTERMEDIATES,
            disabled: CompilerFlags::DUMP_INTERMEDIATES | CompilerFlags::ROBUST_BUFFER_ACCESS,
        });

        let desc = manager.apply_forced_compiler_flags(
            ProgramDesc::new("flags").compiler_flags(CompilerFlags::ROBUST_BUFFER_ACCESS),
        );
        assert_eq!(desc.compiler_flags, CompilerFlags::DUMP_INTERMEDIATES);

        manager.set_generate_debug_info_enabled(true);
        let desc = manager.apply_forced_compiler_flags(ProgramDesc::new("flags"));
        assert!(desc.compiler_flags.contains(CompilerFlags::GENERATE_DEBUG_INFO));
    }

    #[test]
    fn reload_all_programs() {
        let manager = manager();
        assert!(!manager.reload_all_programs(true), "nothing to reload");

        let program = compute_program(&manager);
        program.active_version().unwrap();
        assert_eq!(manager.registered_program_count(), 1);

        assert!(!manager.reload_all_programs(false), "sources are unchanged");
        assert!(manager.reload_all_programs(true));
        assert_eq!(
            manager.compilation_stats().program_version_count,
            2,
            "reloaded programs are recompiled"
        );

        drop(program);
        assert_eq!(manager.registered_program_count(), 0);
        assert!(!manager.reload_all_programs(true));
    }

    #[test]
    fn global_defines_reach_every_program() {
        let manager = manager();
        let source = "
            @compute @workgroup_size(1)
            fn main() {
                let x: u32 = WIDTH;
            }
        ";
        let program = Program::new(
            &manager,
            ProgramDesc::new("defines")
                .add_shader_string("defines.wgsl", source)
                .cs_entry("main"),
            DefineList::new(),
        );
        assert!(program.active_version().is_err(), "WIDTH is undefined");

        let defines: DefineList = [("WIDTH", "8u")].into_iter().collect();
        manager.add_global_defines(&defines);
        let version = program.active_version().unwrap();
        assert_eq!(version.defines().get("WIDTH"), Some("8u"));
    }

    #[test]
    fn hit_groups_get_default_export_names() {
        let manager = manager();
        let source = "
            fn ray_gen() {}
            fn miss() {}
            fn closest_hit() {}
            fn any_hit() {}
        ";
        let program = Program::new(
            &manager,
            ProgramDesc::new("rt")
                .add_shader_string("rt.wgsl", source)
                .ray_gen("ray_gen")
                .miss("miss")
                .hit_group(Some("closest_hit"), None, None, None)
                .hit_group(Some("closest_hit"), Some("any_hit"), None, Some("Shadow"))
                .hit_group(None, Some("any_hit"), None, None),
            DefineList::new(),
        );

        let version = program.active_version().unwrap();
        let exports: Vec<_> = version
            .entry_point_groups()
            .iter()
            .map(|group| group.export_name.as_str())
            .collect();
        assert_eq!(exports, ["ray_gen", "miss", "HitGroup0", "Shadow", "HitGroup1"]);

        let kernels = version.kernels(&ProgramVars::new()).unwrap();
        let shadow = &kernels.entry_point_groups()[3];
        assert_eq!(shadow.export_name(), "Shadow");
        assert_eq!(shadow.kernel_count(), 2);
        assert_eq!(
            shadow.kernel_by_index(1).unwrap().stage(),
            ShaderStage::AnyHit
        );
        assert!(shadow.kernel(ShaderStage::Intersection).is_none());
    }

    #[test]
    fn kernel_code_is_generated_lazily() {
        let manager = manager();
        manager.set_generate_debug_info_enabled(true);
        let program = compute_program(&manager);

        let kernels = program
            .active_version()
            .unwrap()
            .kernels(&ProgramVars::new())
            .unwrap();
        let kernel = kernels.kernel(ShaderStage::Compute).unwrap();
        assert!(!kernel.is_blob_generated());

        let blob = kernel.blob().unwrap();
        assert!(kernel.is_blob_generated());
        let code = std::str::from_utf8(&blob).unwrap();
        assert!(code.starts_with("// program: scale"));
        assert!(code.contains("#version 460"));

        assert!(Rc::ptr_eq(&blob, &kernel.blob().unwrap()));
    }

    #[test]
    fn ray_tracing_kernels_have_no_code() {
        let manager = manager();
        let program = Program::new(
            &manager,
            ProgramDesc::new("rt")
                .add_shader_string("rt.wgsl", "fn ray_gen() {}")
                .ray_gen("ray_gen"),
            DefineList::new(),
        );

        let kernels = program
            .active_version()
            .unwrap()
            .kernels(&ProgramVars::new())
            .unwrap();
        let kernel = kernels.kernel(ShaderStage::RayGeneration).unwrap();

        assert!(matches!(
            kernel.blob(),
            Err(Error::ShaderCodeGeneration { ref entry_point, .. }) if entry_point == "ray_gen"
        ));
        assert!(!kernel.is_blob_generated());
    }
}
