//! Type-tagged native API handles.
//!
//! A [`NativeHandle`] carries a raw 64-bit API object (a COM pointer on D3D12,
//! a dispatchable or non-dispatchable handle on Vulkan) together with a tag
//! naming what kind of object it is, so that interop code can recover the
//! typed handle without guessing.

use kiln_gfx::{DeviceType, InteropHandle};

/// Conversion between a typed native handle and its packed representation.
pub trait NativeHandleTrait: Copy {
    const TYPE: NativeHandleType;

    fn pack(self) -> u64;

    fn unpack(value: u64) -> Self;
}

macro_rules! native_handle_types {
    ($($name:ident,)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum NativeHandleType {
            Unknown,
            $($name,)*
        }

        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            #[repr(transparent)]
            pub struct $name(pub u64);

            impl NativeHandleTrait for $name {
                const TYPE: NativeHandleType = NativeHandleType::$name;

                fn pack(self) -> u64 {
                    self.0
                }

                fn unpack(value: u64) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

native_handle_types! {
    D3d12Device,
    D3d12Resource,
    D3d12PipelineState,
    D3d12Fence,
    D3d12CommandQueue,
    D3d12GraphicsCommandList,
    D3d12CpuDescriptorHandle,
    VkInstance,
    VkPhysicalDevice,
    VkDevice,
    VkImage,
    VkImageView,
    VkBuffer,
    VkBufferView,
    VkPipeline,
    VkFence,
    VkQueue,
    VkCommandBuffer,
    VkSampler,
    EmulatedObject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeHandle {
    ty: NativeHandleType,
    value: u64,
}

impl Default for NativeHandle {
    fn default() -> Self {
        Self {
            ty: NativeHandleType::Unknown,
            value: 0,
        }
    }
}

impl NativeHandle {
    #[must_use]
    pub fn new<T: NativeHandleTrait>(native: T) -> Self {
        Self {
            ty: T::TYPE,
            value: native.pack(),
        }
    }

    #[must_use]
    pub fn ty(&self) -> NativeHandleType {
        self.ty
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ty != NativeHandleType::Unknown
    }

    /// Recovers the typed handle, or `None` if the handle holds a different
    /// kind of object.
    #[must_use]
    pub fn as_<T: NativeHandleTrait>(&self) -> Option<T> {
        (self.ty == T::TYPE).then(|| T::unpack(self.value))
    }

    /// Wraps an interop handle, tagging it with `d3d12` or `vulkan` depending
    /// on the API it came from. `Unknown` marks a combination the API does
    /// not support and produces an invalid handle.
    pub(crate) fn from_interop(
        handle: InteropHandle,
        d3d12: NativeHandleType,
        vulkan: NativeHandleType,
    ) -> Self {
        let ty = match handle.api {
            DeviceType::D3D12 => d3d12,
            DeviceType::Vulkan => vulkan,
            DeviceType::Emulated => NativeHandleType::EmulatedObject,
        };

        if ty == NativeHandleType::Unknown {
            Self::default()
        } else {
            Self {
                ty,
                value: handle.value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let handle = NativeHandle::new(VkFence(0xdead_beef));

        assert!(handle.is_valid());
        assert_eq!(handle.ty(), NativeHandleType::VkFence);
        assert_eq!(handle.as_::<VkFence>(), Some(VkFence(0xdead_beef)));
        assert_eq!(
            handle.as_::<D3d12Fence>(),
            None,
            "unpacking as a different type must fail"
        );
    }

    #[test]
    fn default_is_invalid() {
        assert!(!NativeHandle::default().is_valid());
    }

    #[test]
    fn interop_mapping() {
        let d3d12 = InteropHandle {
            api: DeviceType::D3D12,
            value: 42,
        };
        let vulkan = InteropHandle {
            api: DeviceType::Vulkan,
            value: 42,
        };

        let fence = NativeHandle::from_interop(
            d3d12,
            NativeHandleType::D3d12Fence,
            NativeHandleType::Unknown,
        );
        assert_eq!(fence.as_::<D3d12Fence>(), Some(D3d12Fence(42)));

        let unsupported = NativeHandle::from_interop(
            vulkan,
            NativeHandleType::D3d12Fence,
            NativeHandleType::Unknown,
        );
        assert!(!unsupported.is_valid());
    }
}
