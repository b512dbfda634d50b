use std::{
    collections::BTreeMap,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use kiln_gfx as gfx;

use crate::{
    context::CopyContext,
    error::Result,
    resource::{BindFlags, Buffer, ResourceState},
};

static NEXT_VARS_ID: AtomicU64 = AtomicU64::new(1);

/// How a shader accesses a bound buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    Uniform,
    ReadOnly,
    ReadWrite,
}

impl BufferAccess {
    fn state(self) -> ResourceState {
        match self {
            Self::Uniform => ResourceState::ConstantBuffer,
            Self::ReadOnly => ResourceState::ShaderResource,
            Self::ReadWrite => ResourceState::UnorderedAccess,
        }
    }
}

enum Slot {
    Buffer {
        buffer: Rc<Buffer>,
        access: BufferAccess,
    },
    /// Uniform data staged through the upload heap when bound.
    Uniform(Vec<u8>),
}

/// The root object most recently prepared for a set of vars.
pub(crate) struct BoundVars {
    id: u64,
    generation: u64,
    submission: u64,
    root: gfx::RootObject,
}

/// Shader parameters: resources and uniform data by `(group, binding)`,
/// plus values for `override` constants.
///
/// Every mutation bumps the generation, so contexts can tell whether vars
/// they bound earlier are still current.
pub struct ProgramVars {
    id: u64,
    generation: u64,
    slots: BTreeMap<(u32, u32), Slot>,
    specialization: BTreeMap<String, f64>,
}

impl Default for ProgramVars {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramVars {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_VARS_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            slots: BTreeMap::new(),
            specialization: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_buffer(&mut self, group: u32, binding: u32, buffer: Rc<Buffer>, access: BufferAccess) {
        self.slots
            .insert((group, binding), Slot::Buffer { buffer, access });
        self.generation += 1;
    }

    pub fn set_uniform(&mut self, group: u32, binding: u32, data: &[u8]) {
        self.slots
            .insert((group, binding), Slot::Uniform(data.to_vec()));
        self.generation += 1;
    }

    pub fn clear_binding(&mut self, group: u32, binding: u32) {
        if self.slots.remove(&(group, binding)).is_some() {
            self.generation += 1;
        }
    }

    #[must_use]
    pub fn buffer(&self, group: u32, binding: u32) -> Option<&Rc<Buffer>> {
        match self.slots.get(&(group, binding)) {
            Some(Slot::Buffer { buffer, .. }) => Some(buffer),
            _ => None,
        }
    }

    /// Sets the value of the `override` constant `name`.
    pub fn set_specialization_constant(&mut self, name: impl Into<String>, value: f64) {
        self.specialization.insert(name.into(), value);
        self.generation += 1;
    }

    #[must_use]
    pub fn specialization_constant(&self, name: &str) -> Option<f64> {
        self.specialization.get(name).copied()
    }

    /// Identifies the kernels these vars need. Vars with equal constants
    /// share kernels.
    #[must_use]
    pub fn specialization_key(&self) -> String {
        self.specialization
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub(crate) fn specialization_constants(&self) -> impl Iterator<Item = (&str, f64)> {
        self.specialization
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }

    /// Transitions bound resources and builds the root object. The root
    /// object in `last_bound` is reused when it was prepared from these vars
    /// in their current generation, since the context's last submit.
    pub(crate) fn prepare(
        &self,
        context: &mut CopyContext,
        last_bound: &mut Option<BoundVars>,
    ) -> Result<gfx::RootObject> {
        for slot in self.slots.values() {
            if let Slot::Buffer { buffer, access } = slot {
                context.resource_barrier(buffer, access.state())?;
            }
        }

        if let Some(bound) = last_bound
            .as_ref()
            .filter(|bound| {
                bound.id == self.id
                    && bound.generation == self.generation
                    && bound.submission == context.submission()
            })
        {
            return Ok(bound.root.clone());
        }

        let root = self.build_root(context)?;
        *last_bound = Some(BoundVars {
            id: self.id,
            generation: self.generation,
            submission: context.submission(),
            root: root.clone(),
        });
        Ok(root)
    }

    fn build_root(&self, context: &mut CopyContext) -> Result<gfx::RootObject> {
        let mut bindings = Vec::with_capacity(self.slots.len());

        for (&(group, binding), slot) in &self.slots {
            let resource = match slot {
                Slot::Buffer { buffer, access } => {
                    let view = match access {
                        BufferAccess::ReadOnly => buffer.srv().cloned(),
                        BufferAccess::ReadWrite => {
                            buffer.uav().map(|uav| uav.gfx_view().clone())
                        }
                        BufferAccess::Uniform => None,
                    };

                    match view {
                        Some(view) => gfx::BindingResource::View(view),
                        None => gfx::BindingResource::Buffer {
                            buffer: buffer.gfx_buffer().clone(),
                            offset: 0,
                            size: buffer.size(),
                        },
                    }
                }
                Slot::Uniform(data) => {
                    let mut heap = context.upload_heap().borrow_mut();
                    let allocation = heap.allocate_for(data.len() as u64, BindFlags::CONSTANT)?;
                    allocation.write(data)?;

                    let resource = gfx::BindingResource::Buffer {
                        buffer: allocation.buffer().clone(),
                        offset: allocation.offset(),
                        size: data.len() as u64,
                    };
                    heap.release(allocation);
                    resource
                }
            };

            bindings.push(gfx::Binding {
                group,
                binding,
                resource,
            });
        }

        Ok(gfx::RootObject { bindings })
    }
}
