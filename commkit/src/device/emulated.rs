//! Heap-backed stand-in for a device runtime.
//!
//! Allocations made through [`EmulatedDevice::alloc`] live in ordinary process
//! memory but are registered as device memory, so the memory locator routes
//! them through staging exactly as it would real device pointers. Used for
//! serial development on machines without an accelerator, and by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{DeviceRuntime, MemorySpace};
use crate::error::{CommError, Result};
use crate::memory::{BufferMut, BufferRef, Element, Layout};
use crate::types::DataType;

/// Emulated device runtime. Cheap to clone; clones share allocations.
#[derive(Debug, Clone, Default)]
pub struct EmulatedDevice {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// base address -> length in bytes
    regions: Mutex<BTreeMap<u64, usize>>,
    to_host: AtomicU64,
    to_device: AtomicU64,
    fail_next: AtomicBool,
}

/// An allocation in emulated device memory, freed on drop.
///
/// Storage is `u64`-backed so every supported element type is aligned.
#[derive(Debug)]
pub struct DeviceAlloc {
    storage: Box<[u64]>,
    layout: Layout,
    device: EmulatedDevice,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate zeroed device memory with the given layout.
    pub fn alloc(&self, shape: impl Into<Vec<usize>>, dtype: DataType) -> DeviceAlloc {
        let layout = Layout::new(shape, dtype);
        let words = layout.len_bytes().div_ceil(8).max(1);
        let storage = vec![0u64; words].into_boxed_slice();
        let base = storage.as_ptr() as u64;
        self.lock_regions().insert(base, layout.len_bytes());
        DeviceAlloc {
            storage,
            layout,
            device: self.clone(),
        }
    }

    /// Allocate device memory initialised from a host slice.
    pub fn alloc_from<T: Element>(&self, data: &[T]) -> DeviceAlloc {
        let mut alloc = self.alloc([data.len()], T::DTYPE);
        alloc.bytes_mut().copy_from_slice(as_bytes(data));
        alloc
    }

    /// Number of device→host copies performed so far.
    pub fn copies_to_host(&self) -> u64 {
        self.inner.to_host.load(Ordering::Relaxed)
    }

    /// Number of host→device copies performed so far.
    pub fn copies_to_device(&self) -> u64 {
        self.inner.to_device.load(Ordering::Relaxed)
    }

    /// Make the next copy in either direction fail with a transfer error.
    pub fn fail_next_copy(&self) {
        self.inner.fail_next.store(true, Ordering::Relaxed);
    }

    fn lock_regions(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, usize>> {
        // Regions are plain data; a panic elsewhere cannot leave them torn.
        self.inner
            .regions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_range(&self, ptr: u64, len: usize, direction: &str) -> Result<()> {
        if self.inner.fail_next.swap(false, Ordering::Relaxed) {
            return Err(CommError::transfer(format!(
                "{direction} copy of {len} bytes at 0x{ptr:x} failed (injected)"
            )));
        }
        let regions = self.lock_regions();
        match regions.range(..=ptr).next_back() {
            Some((&base, &size)) if ptr + len as u64 <= base + size as u64 => Ok(()),
            _ => Err(CommError::transfer(format!(
                "{direction} copy: 0x{ptr:x}+{len} is not inside a device allocation"
            ))),
        }
    }
}

impl DeviceRuntime for EmulatedDevice {
    fn memory_space(&self, ptr: u64) -> MemorySpace {
        let regions = self.lock_regions();
        match regions.range(..=ptr).next_back() {
            // Zero-length allocations still own their base address.
            Some((&base, &size)) if ptr < base + size.max(1) as u64 => MemorySpace::Device,
            _ => MemorySpace::Host,
        }
    }

    unsafe fn copy_to_host(&self, src_ptr: u64, dst: &mut [u8]) -> Result<()> {
        self.check_range(src_ptr, dst.len(), "device to host")?;
        if !dst.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(src_ptr as *const u8, dst.as_mut_ptr(), dst.len());
            }
        }
        self.inner.to_host.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn copy_to_device(&self, src: &[u8], dst_ptr: u64) -> Result<()> {
        self.check_range(dst_ptr, src.len(), "host to device")?;
        if !src.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst_ptr as *mut u8, src.len());
            }
        }
        self.inner.to_device.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl DeviceAlloc {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Device pointer of the allocation.
    pub fn as_u64(&self) -> u64 {
        self.storage.as_ptr() as u64
    }

    /// Read-only buffer view for use as a communicator argument.
    pub fn as_buffer(&self) -> BufferRef<'_> {
        // SAFETY: the allocation covers `layout.len_bytes()` and outlives the view.
        unsafe { BufferRef::from_raw(self.as_u64(), self.layout.shape(), self.layout.dtype()) }
    }

    /// Writable buffer view for use as a communicator argument.
    pub fn as_buffer_mut(&mut self) -> BufferMut<'_> {
        // SAFETY: the allocation covers `layout.len_bytes()`; `&mut self` rules out aliasing.
        unsafe {
            BufferMut::from_raw(
                self.storage.as_mut_ptr() as u64,
                self.layout.shape(),
                self.layout.dtype(),
            )
        }
    }

    /// Copy the contents back to the host, bypassing the copy counters.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.layout.dtype() {
            return Err(CommError::shape_mismatch(
                "to_vec",
                format!("allocation is {}, requested {}", self.layout, T::DTYPE),
            ));
        }
        let n = self.layout.numel();
        // SAFETY: storage is u64-aligned and holds `n` elements of `T`.
        Ok(unsafe { std::slice::from_raw_parts(self.storage.as_ptr() as *const T, n) }.to_vec())
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.layout.len_bytes();
        // SAFETY: storage holds at least `len` bytes.
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_mut_ptr() as *mut u8, len) }
    }
}

impl Drop for DeviceAlloc {
    fn drop(&mut self) {
        let base = self.as_u64();
        self.device.lock_regions().remove(&base);
    }
}

fn as_bytes<T: Element>(data: &[T]) -> &[u8] {
    // SAFETY: `Element` types are plain scalars without padding.
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}
