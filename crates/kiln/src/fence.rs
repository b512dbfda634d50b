use std::{cell::Cell, sync::Arc, time::Duration};

use kiln_gfx as gfx;

pub use gfx::FenceDesc;

use crate::{
    error::{GfxResultExt, Result},
    native_handle::{NativeHandle, NativeHandleType},
};

/// A GPU fence with host-side bookkeeping of the last value it was asked to
/// signal.
///
/// The signaled value is the host's view of what the device will eventually
/// reach; the current value is what the device has actually reached. Work
/// submitted with a signal of `v` is complete once `current_value() >= v`.
pub struct Fence {
    gfx_fence: Arc<dyn gfx::Fence>,
    desc: FenceDesc,
    signaled_value: Cell<u64>,
}

impl Fence {
    pub(crate) fn new(device: &dyn gfx::Device, desc: FenceDesc) -> Result<Self> {
        let gfx_fence = device.create_fence(&desc).gfx_call("IDevice::createFence")?;

        Ok(Self {
            gfx_fence,
            desc,
            signaled_value: Cell::new(desc.initial_value),
        })
    }

    #[must_use]
    pub fn desc(&self) -> &FenceDesc {
        &self.desc
    }

    /// Signals the fence from the host. `None` signals one past the last
    /// signaled value. Returns the signaled value.
    pub fn signal(&self, value: Option<u64>) -> Result<u64> {
        let signal_value = self.update_signaled_value(value);
        self.gfx_fence
            .set_current_value(signal_value)
            .gfx_call("IFence::setCurrentValue")?;
        Ok(signal_value)
    }

    /// Advances the signaled value without touching the device. Used when the
    /// device signal is issued elsewhere, e.g. by a queue submission.
    pub fn update_signaled_value(&self, value: Option<u64>) -> u64 {
        let value = value.unwrap_or(self.signaled_value.get() + 1);
        self.signaled_value.set(value);
        value
    }

    /// Blocks until the device reaches `value`, or the last signaled value if
    /// `value` is `None`. An elapsed timeout is not an error.
    pub fn wait(&self, value: Option<u64>, timeout: Option<Duration>) -> Result<()> {
        let wait_value = value.unwrap_or(self.signaled_value.get());

        if self.current_value()? >= wait_value {
            return Ok(());
        }

        let reached = self
            .gfx_fence
            .wait(wait_value, timeout)
            .gfx_call("IDevice::waitForFences")?;

        if !reached {
            tracing::debug!(wait_value, ?timeout, "fence wait timed out");
        }

        Ok(())
    }

    /// The value the device has reached.
    pub fn current_value(&self) -> Result<u64> {
        self.gfx_fence
            .current_value()
            .gfx_call("IFence::getCurrentValue")
    }

    #[must_use]
    pub fn signaled_value(&self) -> u64 {
        self.signaled_value.get()
    }

    #[must_use]
    pub fn gfx_fence(&self) -> &Arc<dyn gfx::Fence> {
        &self.gfx_fence
    }

    /// The native fence object. Only D3D12 exposes one.
    pub fn native_handle(&self) -> Result<NativeHandle> {
        let handle = self
            .gfx_fence
            .native_handle()
            .gfx_call("IFence::getNativeHandle")?;

        Ok(NativeHandle::from_interop(
            handle,
            NativeHandleType::D3d12Fence,
            NativeHandleType::Unknown,
        ))
    }

    /// The OS handle used to share the fence across APIs. The fence must have
    /// been created with [`FenceDesc::shared`] set.
    pub fn shared_api_handle(&self) -> Result<u64> {
        let handle = self
            .gfx_fence
            .shared_handle()
            .gfx_call("IFence::getSharedHandle")?;
        Ok(handle.value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        native_handle::D3d12Fence,
        test_support::{gfx_device, gfx_device_reporting},
    };

    #[test]
    fn signal_sequence() {
        let device = gfx_device();
        let fence = Fence::new(device.as_ref(), FenceDesc::default()).unwrap();

        assert_eq!(fence.signal(None).unwrap(), 1);
        assert_eq!(fence.signal(Some(5)).unwrap(), 5);
        assert_eq!(fence.signal(None).unwrap(), 6);

        assert_eq!(fence.signaled_value(), 6);
        assert_eq!(fence.current_value().unwrap(), 6);
    }

    #[test]
    fn bookkeeping_does_not_touch_the_device() {
        let device = gfx_device();
        let fence = Fence::new(device.as_ref(), FenceDesc::default()).unwrap();

        assert_eq!(fence.update_signaled_value(None), 1);
        assert_eq!(fence.update_signaled_value(Some(10)), 10);
        assert_eq!(fence.signaled_value(), 10);
        assert_eq!(
            fence.current_value().unwrap(),
            0,
            "update_signaled_value must not signal the device"
        );
    }

    #[test]
    fn initial_value() {
        let device = gfx_device();
        let fence = Fence::new(
            device.as_ref(),
            FenceDesc {
                initial_value: 7,
                shared: false,
            },
        )
        .unwrap();

        assert_eq!(fence.signaled_value(), 7);
        assert_eq!(fence.current_value().unwrap(), 7);
        assert_eq!(fence.signal(None).unwrap(), 8);
    }

    #[test]
    fn wait_on_reached_value_returns_immediately() {
        let device = gfx_device();
        let fence = Fence::new(device.as_ref(), FenceDesc::default()).unwrap();
        fence.signal(Some(3)).unwrap();

        fence.wait(None, None).unwrap();
        fence.wait(Some(2), None).unwrap();
    }

    #[test]
    fn wait_timeout_is_not_an_error() {
        let device = gfx_device();
        let fence = Fence::new(device.as_ref(), FenceDesc::default()).unwrap();
        fence.update_signaled_value(None);

        let start = Instant::now();
        fence
            .wait(None, Some(Duration::from_millis(5)))
            .expect("a timed out wait is not an error");
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn native_handle_per_api() {
        let emulated = gfx_device();
        let fence = Fence::new(emulated.as_ref(), FenceDesc::default()).unwrap();
        assert_eq!(
            fence.native_handle().unwrap().ty(),
            NativeHandleType::EmulatedObject
        );

        let d3d12 = gfx_device_reporting(gfx::DeviceType::D3D12);
        let fence = Fence::new(d3d12.as_ref(), FenceDesc::default()).unwrap();
        assert!(fence.native_handle().unwrap().as_::<D3d12Fence>().is_some());

        let vulkan = gfx_device_reporting(gfx::DeviceType::Vulkan);
        let fence = Fence::new(vulkan.as_ref(), FenceDesc::default()).unwrap();
        assert!(
            !fence.native_handle().unwrap().is_valid(),
            "Vulkan fences have no native handle"
        );
    }

    #[test]
    fn shared_handle() {
        let device = gfx_device();

        let private = Fence::new(device.as_ref(), FenceDesc::default()).unwrap();
        assert!(private.shared_api_handle().is_err());

        let shared = Fence::new(
            device.as_ref(),
            FenceDesc {
                initial_value: 0,
                shared: true,
            },
        )
        .unwrap();
        assert!(shared.shared_api_handle().is_ok());
    }
}
