use bitflags::bitflags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    D3D12,
    Vulkan,
    Emulated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// GPU-only memory, not mappable on the host.
    DeviceLocal,
    /// Host-writable memory the GPU reads from.
    Upload,
    /// GPU-writable memory the host reads back.
    ReadBack,
}

bitflags! {
    pub struct BindFlags: u32 {
        const VERTEX = 0x1;
        const INDEX = 0x2;
        const CONSTANT = 0x4;
        const STREAM_OUTPUT = 0x8;
        const SHADER_RESOURCE = 0x10;
        const UNORDERED_ACCESS = 0x20;
        const RENDER_TARGET = 0x40;
        const DEPTH_STENCIL = 0x80;
        const INDIRECT_ARG = 0x100;
        const SHARED = 0x200;
        const ACCELERATION_STRUCTURE = 0x8000_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    Common,
    VertexBuffer,
    ConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    ShaderResource,
    StreamOut,
    IndirectArgument,
    CopyDest,
    CopySource,
    GenericRead,
    AccelerationStructure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    Timestamp,
    Occlusion,
    PipelineStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
    RayGeneration,
    Miss,
    ClosestHit,
    AnyHit,
    Intersection,
    Callable,
}

impl ShaderStage {
    #[must_use]
    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            Self::RayGeneration
                | Self::Miss
                | Self::ClosestHit
                | Self::AnyHit
                | Self::Intersection
                | Self::Callable
        )
    }
}

/// An opaque native object handle, tagged with the API it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InteropHandle {
    pub api: DeviceType,
    pub value: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FenceDesc {
    pub initial_value: u64,
    /// Whether the fence can be shared with other APIs or processes.
    pub shared: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    /// Element stride for structured buffers, 0 for raw buffers.
    pub element_size: u32,
    pub memory_type: MemoryType,
    pub bind_flags: BindFlags,
    pub initial_state: ResourceState,
    pub label: Option<String>,
}

impl BufferDesc {
    #[must_use]
    pub fn new(size: u64, memory_type: MemoryType, bind_flags: BindFlags) -> Self {
        let initial_state = match memory_type {
            MemoryType::DeviceLocal => ResourceState::Common,
            MemoryType::Upload => ResourceState::GenericRead,
            MemoryType::ReadBack => ResourceState::CopyDest,
        };

        Self {
            size,
            element_size: 0,
            memory_type,
            bind_flags,
            initial_state,
            label: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    UnorderedAccess,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferViewDesc {
    pub kind: ViewKind,
    pub offset: u64,
    /// Size of the view in bytes. `None` covers the rest of the buffer.
    pub size: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryPoolDesc {
    pub ty: QueryType,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandQueueDesc {
    pub label: Option<&'static str>,
}

bitflags! {
    pub struct ClearFlags: u32 {
        const FLOAT_CLEAR_VALUES = 0x1;
        const UINT_CLEAR_VALUES = 0x2;
    }
}

/// Four 32-bit lanes, interpreted according to the accompanying
/// [`ClearFlags`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearValue(pub [u32; 4]);

impl ClearValue {
    #[must_use]
    pub fn from_float(value: [f32; 4]) -> Self {
        Self(value.map(f32::to_bits))
    }

    #[must_use]
    pub fn from_uint(value: [u32; 4]) -> Self {
        Self(value)
    }
}

/// Static properties of a device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub adapter_name: String,
    /// Milliseconds per GPU timestamp tick.
    pub timestamp_frequency: f64,
    pub constant_buffer_alignment: u64,
    pub buffer_alignment: u64,
}
