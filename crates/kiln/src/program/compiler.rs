//! The naga front end and GLSL back end.

use std::fmt::Write;

use kiln_gfx as gfx;
use naga::{
    back::glsl,
    proc::{BoundsCheckPolicies, BoundsCheckPolicy},
    valid::{Capabilities, ModuleInfo, ValidationFlags, Validator},
};

use super::CompilerFlags;

pub(crate) const DEFAULT_GLSL_VERSION: u16 = 460;

/// Back-end settings shared by every kernel of a program version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CodeGenOptions {
    pub flags: CompilerFlags,
    pub glsl_version: u16,
}

impl CodeGenOptions {
    /// Applies the compiler arguments this back end understands. Unknown
    /// arguments are reported in `log` and otherwise ignored.
    pub(crate) fn new<'a>(
        flags: CompilerFlags,
        arguments: impl IntoIterator<Item = &'a str>,
        log: &mut String,
    ) -> Self {
        let mut options = Self {
            flags,
            glsl_version: DEFAULT_GLSL_VERSION,
        };

        for argument in arguments {
            let version = argument
                .strip_prefix("--glsl-version=")
                .and_then(|value| value.parse().ok());

            match version {
                Some(version) => options.glsl_version = version,
                None => {
                    let _ = writeln!(log, "warning: ignoring compiler argument '{argument}'");
                }
            }
        }

        options
    }
}

pub(crate) fn naga_stage(stage: gfx::ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        gfx::ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        gfx::ShaderStage::Pixel => Some(naga::ShaderStage::Fragment),
        gfx::ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        _ => None,
    }
}

/// A validated naga module.
pub(crate) struct ShaderModule {
    module: naga::Module,
    info: ModuleInfo,
}

impl ShaderModule {
    /// Parses and validates WGSL. Diagnostics go to `log`.
    pub(crate) fn parse(source: &str, log: &mut String) -> Option<Self> {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(error) => {
                log.push_str(&error.emit_to_string(source));
                return None;
            }
        };

        match Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module) {
            Ok(info) => Some(Self { module, info }),
            Err(error) => {
                let _ = writeln!(log, "validation error: {error}");
                None
            }
        }
    }

    #[must_use]
    pub(crate) fn module(&self) -> &naga::Module {
        &self.module
    }

    #[must_use]
    pub(crate) fn has_overrides(&self) -> bool {
        !self.module.overrides.is_empty()
    }

    /// Whether the module defines `name` for `stage`. Ray tracing stages
    /// have no naga entry point kind and are looked up as plain functions.
    #[must_use]
    pub(crate) fn has_entry_point(&self, stage: gfx::ShaderStage, name: &str) -> bool {
        match naga_stage(stage) {
            Some(stage) => self
                .module
                .entry_points
                .iter()
                .any(|entry_point| entry_point.stage == stage && entry_point.name == name),
            None => self
                .module
                .functions
                .iter()
                .any(|(_, function)| function.name.as_deref() == Some(name)),
        }
    }

    /// Resolves every `override` declaration, using `constants` where given
    /// and the declared default otherwise.
    pub(crate) fn specialize<'a>(
        &self,
        constants: impl IntoIterator<Item = (&'a str, f64)>,
        log: &mut String,
    ) -> Option<Self> {
        let constants: naga::back::PipelineConstants = constants
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect();

        match naga::back::pipeline_constants::process_overrides(&self.module, &self.info, &constants)
        {
            Ok((module, info)) => Some(Self {
                module: module.into_owned(),
                info: info.into_owned(),
            }),
            Err(error) => {
                let _ = writeln!(log, "failed to specialize pipeline constants: {error}");
                None
            }
        }
    }

    pub(crate) fn generate_glsl(
        &self,
        stage: gfx::ShaderStage,
        entry_point: &str,
        options: &CodeGenOptions,
    ) -> Result<String, String> {
        let shader_stage = naga_stage(stage)
            .ok_or_else(|| format!("{stage:?} entry points have no GLSL target"))?;

        let writer_options = glsl::Options {
            version: glsl::Version::Desktop(options.glsl_version),
            writer_flags: glsl::WriterFlags::empty(),
            binding_map: Default::default(),
            zero_initialize_workgroup_memory: true,
        };

        let pipeline_options = glsl::PipelineOptions {
            shader_stage,
            entry_point: entry_point.to_owned(),
            multiview: None,
        };

        let policies = if options.flags.contains(CompilerFlags::ROBUST_BUFFER_ACCESS) {
            BoundsCheckPolicies {
                index: BoundsCheckPolicy::Restrict,
                buffer: BoundsCheckPolicy::Restrict,
                ..Default::default()
            }
        } else {
            BoundsCheckPolicies::default()
        };

        let mut output = String::new();
        {
            let mut writer = glsl::Writer::new(
                &mut output,
                &self.module,
                &self.info,
                &writer_options,
                &pipeline_options,
                policies,
            )
            .map_err(|error| error.to_string())?;
            writer.write().map_err(|error| error.to_string())?;
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "
        override SCALE: f32 = 2.0;

        @group(0) @binding(0) var<storage, read_write> data: array<f32>;

        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * SCALE;
        }

        fn ray_gen() {}
    ";

    #[test]
    fn parse_errors_are_logged() {
        let mut log = String::new();
        assert!(ShaderModule::parse("fn broken( {", &mut log).is_none());
        assert!(!log.is_empty());
    }

    #[test]
    fn entry_point_lookup() {
        let module = ShaderModule::parse(SOURCE, &mut String::new()).unwrap();

        assert!(module.has_entry_point(gfx::ShaderStage::Compute, "main"));
        assert!(!module.has_entry_point(gfx::ShaderStage::Vertex, "main"));
        assert!(module.has_entry_point(gfx::ShaderStage::RayGeneration, "ray_gen"));
        assert!(!module.has_entry_point(gfx::ShaderStage::Miss, "miss"));
    }

    #[test]
    fn specialized_modules_generate_glsl() {
        let module = ShaderModule::parse(SOURCE, &mut String::new()).unwrap();
        assert!(module.has_overrides());

        let specialized = module
            .specialize([("SCALE", 4.0)], &mut String::new())
            .unwrap();

        let options = CodeGenOptions::new(CompilerFlags::empty(), [] as [&str; 0], &mut String::new());
        let glsl = specialized
            .generate_glsl(gfx::ShaderStage::Compute, "main", &options)
            .unwrap();
        assert!(glsl.starts_with("#version 460"));

        assert!(specialized
            .generate_glsl(gfx::ShaderStage::RayGeneration, "ray_gen", &options)
            .is_err());
    }

    #[test]
    fn compiler_arguments() {
        let mut log = String::new();
        let options = CodeGenOptions::new(
            CompilerFlags::empty(),
            ["--glsl-version=450", "-O3"],
            &mut log,
        );

        assert_eq!(options.glsl_version, 450);
        assert!(log.contains("-O3"));
    }
}
