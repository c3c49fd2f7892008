//! CUDA device runtime.
//!
//! Uses cudarc's driver API to classify pointers and to copy between device
//! memory and host staging buffers. Copies are synchronous, so no separate
//! stream synchronization is needed after them.

use std::sync::Arc;

use cudarc::driver::sys::{CUdeviceptr, CUmemorytype, CUpointer_attribute, CUresult};

use super::{DeviceRuntime, MemorySpace};
use crate::error::{CommError, Result};

/// Device runtime for NVIDIA GPUs using cudarc.
pub struct CudaRuntime {
    ctx: Arc<cudarc::driver::CudaContext>,
}

impl CudaRuntime {
    /// Create a runtime bound to the given GPU ordinal.
    pub fn new(device_ordinal: usize) -> Result<Self> {
        let ctx = cudarc::driver::CudaContext::new(device_ordinal).map_err(|e| {
            CommError::device_with_source(
                format!("failed to create CUDA context for GPU {device_ordinal}"),
                e,
            )
        })?;
        Ok(Self { ctx })
    }

    fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| CommError::transfer_with_source("CUDA bind_to_thread failed", e))
    }
}

impl DeviceRuntime for CudaRuntime {
    fn memory_space(&self, ptr: u64) -> MemorySpace {
        if ptr == 0 || self.bind().is_err() {
            return MemorySpace::Host;
        }
        let mut mem_type: u32 = 0;
        // SAFETY: the attribute query only writes one `CUmemorytype` into `mem_type`.
        let status = unsafe {
            cudarc::driver::sys::cuPointerGetAttribute(
                &mut mem_type as *mut u32 as *mut std::ffi::c_void,
                CUpointer_attribute::CU_POINTER_ATTRIBUTE_MEMORY_TYPE,
                ptr as CUdeviceptr,
            )
        };
        // Unregistered host memory makes the query fail; that is host memory.
        if status == CUresult::CUDA_SUCCESS
            && mem_type == CUmemorytype::CU_MEMORYTYPE_DEVICE as u32
        {
            MemorySpace::Device
        } else {
            MemorySpace::Host
        }
    }

    unsafe fn copy_to_host(&self, src_ptr: u64, dst: &mut [u8]) -> Result<()> {
        self.bind()?;
        unsafe { cudarc::driver::result::memcpy_dtoh_sync(dst, src_ptr as CUdeviceptr) }
            .map_err(|e| CommError::transfer_with_source("cuMemcpyDtoH failed", e))
    }

    unsafe fn copy_to_device(&self, src: &[u8], dst_ptr: u64) -> Result<()> {
        self.bind()?;
        unsafe { cudarc::driver::result::memcpy_htod_sync(dst_ptr as CUdeviceptr, src) }
            .map_err(|e| CommError::transfer_with_source("cuMemcpyHtoD failed", e))
    }

    fn synchronize(&self) -> Result<()> {
        self.ctx
            .synchronize()
            .map_err(|e| CommError::transfer_with_source("CUDA context synchronize failed", e))
    }
}
