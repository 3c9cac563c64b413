//! Execution context: one device, its context and command queue.

use crate::runtime::{DeviceInfo, DeviceRuntime, DeviceSelector};
use tilegemm_common::{GemmError, Result};
use tracing::{debug, info};

/// Device, context and queue for a single run.
///
/// Created once and borrowed by every stage. Dropping it releases the queue,
/// then the context, then the device, as the runtime's own field order
/// dictates.
pub struct ExecutionContext<R: DeviceRuntime> {
    runtime: R,
}

impl<R: DeviceRuntime> ExecutionContext<R> {
    /// Open the device described by `selector`.
    pub fn create(selector: &DeviceSelector) -> Result<Self> {
        debug!(
            platform_index = selector.platform_index,
            device_index = selector.device_index,
            device_type = %selector.device_type,
            "opening device"
        );
        let runtime = R::open(selector).map_err(|e| GemmError::Device(e.to_string()))?;
        Ok(Self::from_runtime(runtime))
    }

    /// Wrap an already opened runtime.
    pub fn from_runtime(runtime: R) -> Self {
        let info = runtime.info();
        info!(
            device = %info.name,
            vendor = %info.vendor,
            platform = %info.platform,
            max_work_group_size = info.max_work_group_size,
            "execution context ready"
        );
        Self { runtime }
    }

    pub fn device(&self) -> &DeviceInfo {
        self.runtime.info()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRuntime;
    use tilegemm_common::{DeviceType, ErrorKind};

    #[test]
    fn host_context_opens_with_defaults() {
        let ctx = ExecutionContext::<HostRuntime>::create(&DeviceSelector::default()).unwrap();
        assert_eq!(ctx.device().device_type, DeviceType::Cpu);
        assert!(ctx.device().max_work_group_size >= 256);
    }

    #[test]
    fn missing_device_is_device_error() {
        let selector = DeviceSelector { device_index: 3, ..Default::default() };
        let err = ExecutionContext::<HostRuntime>::create(&selector).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Device);
        assert!(err.to_string().contains("CL_DEVICE_NOT_FOUND"), "{err}");
    }
}
