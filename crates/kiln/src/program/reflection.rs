use kiln_gfx as gfx;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointReflection {
    pub name: String,
    pub stage: gfx::ShaderStage,
    /// Zero for stages without a workgroup.
    pub workgroup_size: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture,
    Sampler,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceReflection {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideReflection {
    pub name: String,
    pub id: Option<u16>,
    pub has_default: bool,
}

/// The shader interface of a compiled program version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramReflection {
    entry_points: Vec<EntryPointReflection>,
    resources: Vec<ResourceReflection>,
    overrides: Vec<OverrideReflection>,
}

impl ProgramReflection {
    pub(crate) fn new(module: &naga::Module) -> Self {
        let entry_points = module
            .entry_points
            .iter()
            .map(|entry_point| EntryPointReflection {
                name: entry_point.name.clone(),
                stage: match entry_point.stage {
                    naga::ShaderStage::Vertex => gfx::ShaderStage::Vertex,
                    naga::ShaderStage::Fragment => gfx::ShaderStage::Pixel,
                    naga::ShaderStage::Compute => gfx::ShaderStage::Compute,
                },
                workgroup_size: entry_point.workgroup_size,
            })
            .collect();

        let resources = module
            .global_variables
            .iter()
            .filter_map(|(_, variable)| {
                let binding = variable.binding.as_ref()?;
                let kind = match variable.space {
                    naga::AddressSpace::Uniform => ResourceKind::UniformBuffer,
                    naga::AddressSpace::Storage { access } => ResourceKind::StorageBuffer {
                        read_only: !access.contains(naga::StorageAccess::STORE),
                    },
                    naga::AddressSpace::Handle => match module.types[variable.ty].inner {
                        naga::TypeInner::Image { .. } => ResourceKind::Texture,
                        naga::TypeInner::Sampler { .. } => ResourceKind::Sampler,
                        _ => ResourceKind::Other,
                    },
                    _ => ResourceKind::Other,
                };

                Some(ResourceReflection {
                    name: variable.name.clone().unwrap_or_default(),
                    group: binding.group,
                    binding: binding.binding,
                    kind,
                })
            })
            .collect();

        let overrides = module
            .overrides
            .iter()
            .map(|(_, constant)| OverrideReflection {
                name: constant.name.clone().unwrap_or_default(),
                id: constant.id,
                has_default: constant.init.is_some(),
            })
            .collect();

        Self {
            entry_points,
            resources,
            overrides,
        }
    }

    #[must_use]
    pub fn entry_points(&self) -> &[EntryPointReflection] {
        &self.entry_points
    }

    #[must_use]
    pub fn entry_point(&self, name: &str) -> Option<&EntryPointReflection> {
        self.entry_points.iter().find(|entry| entry.name == name)
    }

    #[must_use]
    pub fn resources(&self) -> &[ResourceReflection] {
        &self.resources
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceReflection> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    #[must_use]
    pub fn overrides(&self) -> &[OverrideReflection] {
        &self.overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::compiler::ShaderModule;

    #[test]
    fn reflects_the_shader_interface() {
        let source = "
            struct Params { scale: f32 }

            override BIAS: f32;

            @group(0) @binding(0) var<uniform> params: Params;
            @group(0) @binding(1) var<storage, read> input: array<f32>;
            @group(1) @binding(0) var<storage, read_write> output: array<f32>;

            @compute @workgroup_size(8, 4, 1)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                output[id.x] = input[id.x] * params.scale + BIAS;
            }
        ";
        let module = ShaderModule::parse(source, &mut String::new()).unwrap();
        let reflection = ProgramReflection::new(module.module());

        let main = reflection.entry_point("main").unwrap();
        assert_eq!(main.stage, gfx::ShaderStage::Compute);
        assert_eq!(main.workgroup_size, [8, 4, 1]);

        assert_eq!(
            reflection.resource("params").unwrap().kind,
            ResourceKind::UniformBuffer
        );
        assert_eq!(
            reflection.resource("input").unwrap().kind,
            ResourceKind::StorageBuffer { read_only: true }
        );
        let output = reflection.resource("output").unwrap();
        assert_eq!((output.group, output.binding), (1, 0));
        assert_eq!(
            output.kind,
            ResourceKind::StorageBuffer { read_only: false }
        );

        assert_eq!(reflection.overrides().len(), 1);
        assert!(!reflection.overrides()[0].has_default);
    }
}
