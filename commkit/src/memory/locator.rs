use std::sync::Arc;

use crate::config::Capabilities;
use crate::device::{DeviceRuntime, MemorySpace};
use crate::memory::Buffer;

/// Classifies buffers as host- or device-resident.
///
/// Pure: never allocates or copies. Without a device runtime every buffer is
/// host memory.
#[derive(Clone, Default)]
pub struct MemoryLocator {
    runtime: Option<Arc<dyn DeviceRuntime>>,
}

impl MemoryLocator {
    /// Locator that reports every buffer as host memory.
    pub fn host_only() -> Self {
        Self { runtime: None }
    }

    /// Locator backed by a device runtime.
    pub fn with_runtime(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }

    /// Locator honouring the process capability flags: the runtime is only
    /// consulted when `caps.device_runtime` is set.
    pub fn from_capabilities(
        caps: &Capabilities,
        runtime: Option<Arc<dyn DeviceRuntime>>,
    ) -> Self {
        match runtime {
            Some(rt) if caps.device_runtime => Self::with_runtime(rt),
            Some(_) => {
                tracing::debug!("device runtime supplied but disabled by capabilities");
                Self::host_only()
            }
            None => {
                if caps.device_runtime {
                    tracing::warn!("device runtime flagged available but none supplied; host only");
                }
                Self::host_only()
            }
        }
    }

    pub fn locate<B: Buffer + ?Sized>(&self, buffer: &B) -> MemorySpace {
        self.locate_ptr(buffer.as_u64())
    }

    pub fn locate_ptr(&self, ptr: u64) -> MemorySpace {
        match &self.runtime {
            Some(rt) => rt.memory_space(ptr),
            None => MemorySpace::Host,
        }
    }

    pub fn runtime(&self) -> Option<&Arc<dyn DeviceRuntime>> {
        self.runtime.as_ref()
    }
}

impl std::fmt::Debug for MemoryLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLocator")
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
