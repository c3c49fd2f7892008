//! Host staging buffers for device-resident data.
//!
//! Every staging decision goes through [`StagingManager`]: it either validates
//! a caller-supplied host buffer or allocates a fresh one, and it performs the
//! copies across the host/device boundary. Staging buffers live for a single
//! call; nothing is pooled or cached between calls.

use crate::device::MemorySpace;
use crate::error::{CommError, Result};
use crate::memory::{Buffer, BufferMut, BufferRef, Layout, MemoryLocator};

// ── HostBuffer ───────────────────────────────────────────────────────

/// Owned, zero-initialised host allocation with a fixed layout.
///
/// Storage is `u64`-backed so every supported element type is aligned.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    storage: Vec<u64>,
    layout: Layout,
}

impl HostBuffer {
    pub fn zeroed(layout: Layout) -> Self {
        let words = layout.len_bytes().div_ceil(8);
        Self {
            storage: vec![0u64; words],
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.layout.len_bytes();
        // SAFETY: storage holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr() as *const u8, len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.layout.len_bytes();
        // SAFETY: storage holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_mut_ptr() as *mut u8, len) }
    }

    pub fn view(&self) -> BufferRef<'_> {
        // SAFETY: host memory covering the layout, borrowed for the view's lifetime.
        unsafe {
            BufferRef::from_raw(
                self.storage.as_ptr() as u64,
                self.layout.shape(),
                self.layout.dtype(),
            )
        }
    }

    pub fn view_mut(&mut self) -> BufferMut<'_> {
        // SAFETY: host memory covering the layout, exclusively borrowed.
        unsafe {
            BufferMut::from_raw(
                self.storage.as_mut_ptr() as u64,
                self.layout.shape(),
                self.layout.dtype(),
            )
        }
    }
}

// ── StagingBuffer ────────────────────────────────────────────────────

/// Host intermediary for one device-resident argument of one call.
#[derive(Debug)]
pub enum StagingBuffer<'s> {
    /// Allocated by the manager; dropped at the end of the call.
    Owned(HostBuffer),
    /// Supplied and still owned by the caller; validated host-resident.
    Supplied(BufferMut<'s>),
}

impl<'s> StagingBuffer<'s> {
    pub fn is_owned(&self) -> bool {
        matches!(self, StagingBuffer::Owned(_))
    }

    pub fn layout(&self) -> &Layout {
        match self {
            StagingBuffer::Owned(buf) => buf.layout(),
            StagingBuffer::Supplied(buf) => buf.layout(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StagingBuffer::Owned(buf) => buf.as_bytes(),
            // SAFETY: `StagingManager::acquire` only admits host-resident buffers.
            StagingBuffer::Supplied(buf) => unsafe { buf.host_bytes() },
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            StagingBuffer::Owned(buf) => buf.as_bytes_mut(),
            // SAFETY: `StagingManager::acquire` only admits host-resident buffers.
            StagingBuffer::Supplied(buf) => unsafe { buf.host_bytes_mut() },
        }
    }

    pub fn view(&self) -> BufferRef<'_> {
        match self {
            StagingBuffer::Owned(buf) => buf.view(),
            StagingBuffer::Supplied(buf) => buf.view(),
        }
    }

    pub fn view_mut(&mut self) -> BufferMut<'_> {
        match self {
            StagingBuffer::Owned(buf) => buf.view_mut(),
            StagingBuffer::Supplied(buf) => buf.reborrow(),
        }
    }
}

// ── StagingManager ───────────────────────────────────────────────────

/// Hands out host staging buffers and moves data across the host/device
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct StagingManager {
    locator: MemoryLocator,
}

impl StagingManager {
    pub fn new(locator: MemoryLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &MemoryLocator {
        &self.locator
    }

    /// Return a host buffer matching `layout`.
    ///
    /// A caller-supplied buffer is returned unchanged after checking that it
    /// is host-resident and has exactly `layout`. Without one, a zeroed host
    /// buffer is allocated.
    pub fn acquire<'s>(
        &self,
        layout: &Layout,
        caller_supplied: Option<BufferMut<'s>>,
    ) -> Result<StagingBuffer<'s>> {
        match caller_supplied {
            Some(buf) => {
                self.validate(layout, &buf)?;
                Ok(StagingBuffer::Supplied(buf))
            }
            None => Ok(StagingBuffer::Owned(HostBuffer::zeroed(layout.clone()))),
        }
    }

    /// Check a caller-supplied staging buffer without taking it.
    pub fn validate<B: Buffer + ?Sized>(&self, layout: &Layout, staging: &B) -> Result<()> {
        let space = self.locator.locate(staging);
        if space != MemorySpace::Host {
            return Err(CommError::invalid_staging(format!(
                "staging buffer at 0x{:x} is {space}-resident, must be host-resident",
                staging.as_u64()
            )));
        }
        if staging.layout() != layout {
            return Err(CommError::invalid_staging(format!(
                "staging buffer is {}, data is {layout}",
                staging.layout()
            )));
        }
        Ok(())
    }

    /// Device→host copy of `device` into `staging`.
    pub fn copy_to_host(
        &self,
        device: &BufferRef<'_>,
        staging: &mut StagingBuffer<'_>,
    ) -> Result<()> {
        check_pair(device.layout(), staging.layout())?;
        let rt = self
            .locator
            .runtime()
            .ok_or_else(|| CommError::transfer("device to host copy without a device runtime"))?;
        rt.synchronize()?;
        // SAFETY: the locator classified `device` as device memory of `len_bytes()` bytes,
        // and the staging buffer has the same layout.
        unsafe { rt.copy_to_host(device.as_u64(), staging.as_bytes_mut()) }
    }

    /// Host→device copy of `staging` into `device`.
    pub fn copy_to_device(
        &self,
        staging: &StagingBuffer<'_>,
        device: &mut BufferMut<'_>,
    ) -> Result<()> {
        check_pair(device.layout(), staging.layout())?;
        let rt = self
            .locator
            .runtime()
            .ok_or_else(|| CommError::transfer("host to device copy without a device runtime"))?;
        // SAFETY: as in `copy_to_host`; `device` is exclusively borrowed.
        unsafe { rt.copy_to_device(staging.as_bytes(), device.as_u64()) }
    }
}

fn check_pair(device: &Layout, staging: &Layout) -> Result<()> {
    if device != staging {
        return Err(CommError::invalid_staging(format!(
            "staging buffer is {staging}, data is {device}"
        )));
    }
    Ok(())
}
