mod emulated;

#[cfg(feature = "cuda")]
mod cuda;

pub use emulated::{DeviceAlloc, EmulatedDevice};

#[cfg(feature = "cuda")]
pub use cuda::CudaRuntime;

use crate::error::Result;

/// Where a buffer physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    Host,
    Device,
}

impl std::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySpace::Host => f.write_str("host"),
            MemorySpace::Device => f.write_str("device"),
        }
    }
}

/// Narrow view of a device runtime: pointer classification plus synchronous
/// copies across the host/device boundary.
///
/// The transport only ever reads host memory, so device-resident buffers
/// have to be copied out before a send and copied back after a receive,
/// unless the transport itself is device-aware.
pub trait DeviceRuntime: Send + Sync {
    /// Classify an address. Must not fail: anything the runtime does not
    /// recognize as device memory is host memory.
    fn memory_space(&self, ptr: u64) -> MemorySpace;

    /// Copy `dst.len()` bytes from device memory at `src_ptr` into `dst`.
    ///
    /// # Safety
    /// `src_ptr` must be a valid device pointer to at least `dst.len()` bytes.
    unsafe fn copy_to_host(&self, src_ptr: u64, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into device memory at `dst_ptr`.
    ///
    /// # Safety
    /// `dst_ptr` must be a valid device pointer to at least `src.len()` bytes.
    unsafe fn copy_to_device(&self, src: &[u8], dst_ptr: u64) -> Result<()>;

    /// Wait for outstanding device work so a following device→host copy
    /// observes it.
    ///
    /// Default: no-op, for runtimes whose copies already synchronize.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
