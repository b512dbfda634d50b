use std::path::PathBuf;

use bitflags::bitflags;
use kiln_gfx as gfx;
use smallvec::{smallvec, SmallVec};

pub use gfx::{EntryPointDesc, EntryPointGroupDesc, EntryPointGroupKind, ShaderStage};

bitflags! {
    #[derive(Default)]
    pub struct CompilerFlags: u32 {
        /// Fail compilation when the compiler reports warnings.
        const TREAT_WARNINGS_AS_ERRORS = 0x1;
        /// Log generated kernel code at debug level.
        const DUMP_INTERMEDIATES = 0x2;
        /// Prefix generated code with the program, entry point and defines
        /// it was built from.
        const GENERATE_DEBUG_INFO = 0x4;
        /// Clamp out-of-bounds buffer and array accesses in generated code.
        const ROBUST_BUFFER_ACCESS = 0x8;
    }
}

/// Flags forced on or off for every program a manager compiles. Enabled
/// flags take precedence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForcedCompilerFlags {
    pub enabled: CompilerFlags,
    pub disabled: CompilerFlags,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    File(PathBuf),
    String { name: String, code: String },
}

/// Describes a program: its WGSL sources, entry point groups and compiler
/// settings.
#[derive(Clone, Debug, Default)]
pub struct ProgramDesc {
    pub name: String,
    pub sources: Vec<ShaderSource>,
    pub groups: Vec<EntryPointGroupDesc>,
    pub compiler_flags: CompilerFlags,
    pub compiler_arguments: Vec<String>,
}

impl ProgramDesc {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn add_shader_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(ShaderSource::File(path.into()));
        self
    }

    #[must_use]
    pub fn add_shader_string(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.sources.push(ShaderSource::String {
            name: name.into(),
            code: code.into(),
        });
        self
    }

    #[must_use]
    pub fn cs_entry(self, name: &str) -> Self {
        self.add_group(EntryPointGroupKind::Compute, "", &[(ShaderStage::Compute, name)])
    }

    #[must_use]
    pub fn vs_entry(self, name: &str) -> Self {
        self.add_raster_entry(ShaderStage::Vertex, name)
    }

    #[must_use]
    pub fn ps_entry(self, name: &str) -> Self {
        self.add_raster_entry(ShaderStage::Pixel, name)
    }

    #[must_use]
    pub fn ray_gen(self, name: &str) -> Self {
        self.add_group(
            EntryPointGroupKind::RtSingleShader,
            name,
            &[(ShaderStage::RayGeneration, name)],
        )
    }

    #[must_use]
    pub fn miss(self, name: &str) -> Self {
        self.add_group(
            EntryPointGroupKind::RtSingleShader,
            name,
            &[(ShaderStage::Miss, name)],
        )
    }

    /// Adds a hit group. Without an export name, one is assigned when the
    /// program is compiled.
    #[must_use]
    pub fn hit_group(
        self,
        closest_hit: Option<&str>,
        any_hit: Option<&str>,
        intersection: Option<&str>,
        export_name: Option<&str>,
    ) -> Self {
        let entry_points: Vec<_> = [
            (ShaderStage::ClosestHit, closest_hit),
            (ShaderStage::AnyHit, any_hit),
            (ShaderStage::Intersection, intersection),
        ]
        .into_iter()
        .filter_map(|(stage, name)| name.map(|name| (stage, name)))
        .collect();

        self.add_group(
            EntryPointGroupKind::RtHitGroup,
            export_name.unwrap_or_default(),
            &entry_points,
        )
    }

    #[must_use]
    pub fn compiler_flags(mut self, flags: CompilerFlags) -> Self {
        self.compiler_flags = flags;
        self
    }

    #[must_use]
    pub fn compiler_argument(mut self, argument: impl Into<String>) -> Self {
        self.compiler_arguments.push(argument.into());
        self
    }

    #[must_use]
    pub fn has_ray_tracing_entry_points(&self) -> bool {
        self.groups.iter().any(|group| {
            matches!(
                group.kind,
                EntryPointGroupKind::RtSingleShader | EntryPointGroupKind::RtHitGroup
            )
        })
    }

    fn add_group(
        mut self,
        kind: EntryPointGroupKind,
        export_name: &str,
        entry_points: &[(ShaderStage, &str)],
    ) -> Self {
        self.groups.push(EntryPointGroupDesc {
            kind,
            export_name: export_name.to_owned(),
            entry_points: entry_points
                .iter()
                .map(|&(stage, name)| EntryPointDesc {
                    stage,
                    name: name.to_owned(),
                })
                .collect(),
        });
        self
    }

    /// Vertex and pixel entry points share one rasterization group.
    fn add_raster_entry(mut self, stage: ShaderStage, name: &str) -> Self {
        let entry_point = EntryPointDesc {
            stage,
            name: name.to_owned(),
        };

        match self
            .groups
            .iter_mut()
            .find(|group| group.kind == EntryPointGroupKind::Rasterization)
        {
            Some(group) => {
                group.entry_points.retain(|existing| existing.stage != stage);
                group.entry_points.push(entry_point);
            }
            None => {
                let entry_points: SmallVec<[EntryPointDesc; 3]> = smallvec![entry_point];
                self.groups.push(EntryPointGroupDesc {
                    kind: EntryPointGroupKind::Rasterization,
                    export_name: String::new(),
                    entry_points,
                });
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_entries_share_a_group() {
        let desc = ProgramDesc::new("raster")
            .vs_entry("vs_main")
            .ps_entry("ps_main")
            .vs_entry("vs_other");

        assert_eq!(desc.groups.len(), 1);
        let names: Vec<_> = desc.groups[0]
            .entry_points
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        assert_eq!(names, ["ps_main", "vs_other"]);
    }

    #[test]
    fn ray_tracing_groups() {
        let desc = ProgramDesc::new("rt")
            .ray_gen("ray_gen")
            .miss("miss")
            .hit_group(Some("closest_hit"), None, None, None)
            .hit_group(Some("closest_hit"), Some("any_hit"), None, Some("Shadow"));

        assert!(desc.has_ray_tracing_entry_points());
        assert_eq!(desc.groups[0].export_name, "ray_gen");
        assert_eq!(desc.groups[2].export_name, "");
        assert_eq!(desc.groups[3].export_name, "Shadow");
        assert_eq!(desc.groups[3].entry_points.len(), 2);
    }
}
