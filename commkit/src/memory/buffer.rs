//! Borrowed views over caller-owned memory.
//!
//! A buffer is a base address plus a fixed [`Layout`]. The address may point
//! into host or device memory; which one is decided at run time by the
//! [`MemoryLocator`](super::MemoryLocator), never by the type.
//!
//! Host slices can be wrapped safely. Device memory is wrapped through the
//! `unsafe` raw constructors, which is also the FFI entry point.

use std::marker::PhantomData;

use crate::error::{CommError, Result};
use crate::types::DataType;

// ── Element ──────────────────────────────────────────────────────────

mod private {
    pub trait Sealed {}
}

/// Rust scalar types that map onto a [`DataType`].
pub trait Element: Copy + Send + Sync + 'static + private::Sealed {
    const DTYPE: DataType;
}

macro_rules! impl_element {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dt;
            }
        )*
    };
}

impl_element!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64,
);

// ── Layout ───────────────────────────────────────────────────────────

/// Declared shape and element type of a buffer. Never changed by a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    shape: Vec<usize>,
    dtype: DataType,
}

impl Layout {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DataType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Number of elements. A zero-dimensional shape holds one element.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// [`numel`](Self::numel), or `None` if the product overflows `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
    }

    pub fn len_bytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Layout of one of `parts` equal chunks taken along the leading axis.
    ///
    /// Returns `None` for zero-dimensional layouts, for `parts == 0`, and when
    /// the leading extent is not divisible by `parts`.
    pub fn chunk(&self, parts: usize) -> Option<Layout> {
        let (&lead, rest) = self.shape.split_first()?;
        if parts == 0 || lead % parts != 0 {
            return None;
        }
        let mut shape = Vec::with_capacity(self.shape.len());
        shape.push(lead / parts);
        shape.extend_from_slice(rest);
        Some(Layout::new(shape, self.dtype))
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

// ── Buffer ───────────────────────────────────────────────────────────

/// Common accessors of [`BufferRef`] and [`BufferMut`].
pub trait Buffer {
    /// Raw base address.
    fn as_u64(&self) -> u64;

    fn layout(&self) -> &Layout;

    fn shape(&self) -> &[usize] {
        self.layout().shape()
    }

    fn dtype(&self) -> DataType {
        self.layout().dtype()
    }

    fn len_bytes(&self) -> usize {
        self.layout().len_bytes()
    }
}

fn shaped_layout(
    len: usize,
    shape: impl Into<Vec<usize>>,
    dtype: DataType,
) -> Result<Layout> {
    let layout = Layout::new(shape, dtype);
    match layout.checked_numel() {
        Some(n) if n == len => Ok(layout),
        Some(n) => Err(CommError::shape_mismatch(
            "buffer",
            format!("shape {:?} holds {n} elements, slice has {len}", layout.shape()),
        )),
        None => Err(CommError::shape_mismatch(
            "buffer",
            format!("shape {:?} overflows the element count", layout.shape()),
        )),
    }
}

// ── BufferRef ────────────────────────────────────────────────────────

/// Read-only view: `send` payloads and collective inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRef<'a> {
    ptr: u64,
    layout: Layout,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> BufferRef<'a> {
    /// One-dimensional view over a host slice.
    pub fn from_slice<T: Element>(data: &'a [T]) -> Self {
        Self {
            ptr: data.as_ptr() as u64,
            layout: Layout::new([data.len()], T::DTYPE),
            _marker: PhantomData,
        }
    }

    /// View over a host slice with an explicit shape.
    pub fn from_slice_shaped<T: Element>(
        data: &'a [T],
        shape: impl Into<Vec<usize>>,
    ) -> Result<Self> {
        Ok(Self {
            ptr: data.as_ptr() as u64,
            layout: shaped_layout(data.len(), shape, T::DTYPE)?,
            _marker: PhantomData,
        })
    }

    /// Wrap a raw address.
    ///
    /// # Safety
    /// `ptr` must point to at least `numel(shape) * dtype.size_in_bytes()`
    /// readable bytes in host or device memory, valid for `'a`.
    ///
    /// Device memory may only be handed to a communicator whose
    /// [`MemoryLocator`](super::MemoryLocator) has a runtime that recognizes
    /// it. A locator without a runtime classifies every address as host
    /// memory, and host memory is read directly.
    pub unsafe fn from_raw(ptr: u64, shape: impl Into<Vec<usize>>, dtype: DataType) -> Self {
        Self {
            ptr,
            layout: Layout::new(shape, dtype),
            _marker: PhantomData,
        }
    }

    /// Bytes of a host-resident buffer.
    ///
    /// # Safety
    /// The buffer must be host-resident.
    pub(crate) unsafe fn host_bytes(&self) -> &[u8] {
        let len = self.layout.len_bytes();
        if len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, len) }
    }
}

impl Buffer for BufferRef<'_> {
    fn as_u64(&self) -> u64 {
        self.ptr
    }

    fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl std::fmt::Display for BufferRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferRef(0x{:x}, {})", self.ptr, self.layout)
    }
}

// ── BufferMut ────────────────────────────────────────────────────────

/// Writable view: `recv` targets, collective outputs, in-place `bcast`.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferMut<'a> {
    ptr: u64,
    layout: Layout,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> BufferMut<'a> {
    /// One-dimensional view over a mutable host slice.
    pub fn from_slice<T: Element>(data: &'a mut [T]) -> Self {
        Self {
            ptr: data.as_mut_ptr() as u64,
            layout: Layout::new([data.len()], T::DTYPE),
            _marker: PhantomData,
        }
    }

    /// View over a mutable host slice with an explicit shape.
    pub fn from_slice_shaped<T: Element>(
        data: &'a mut [T],
        shape: impl Into<Vec<usize>>,
    ) -> Result<Self> {
        let layout = shaped_layout(data.len(), shape, T::DTYPE)?;
        Ok(Self {
            ptr: data.as_mut_ptr() as u64,
            layout,
            _marker: PhantomData,
        })
    }

    /// Wrap a raw address.
    ///
    /// # Safety
    /// `ptr` must point to at least `numel(shape) * dtype.size_in_bytes()`
    /// writable bytes in host or device memory, valid and not aliased for `'a`.
    ///
    /// Device memory may only be handed to a communicator whose
    /// [`MemoryLocator`](super::MemoryLocator) has a runtime that recognizes
    /// it. A locator without a runtime classifies every address as host
    /// memory, and host memory is read directly.
    pub unsafe fn from_raw(ptr: u64, shape: impl Into<Vec<usize>>, dtype: DataType) -> Self {
        Self {
            ptr,
            layout: Layout::new(shape, dtype),
            _marker: PhantomData,
        }
    }

    /// Read-only view of the same memory.
    pub fn view(&self) -> BufferRef<'_> {
        BufferRef {
            ptr: self.ptr,
            layout: self.layout.clone(),
            _marker: PhantomData,
        }
    }

    /// Shorter-lived writable view of the same memory.
    pub fn reborrow(&mut self) -> BufferMut<'_> {
        BufferMut {
            ptr: self.ptr,
            layout: self.layout.clone(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// The buffer must be host-resident.
    pub(crate) unsafe fn host_bytes(&self) -> &[u8] {
        let len = self.layout.len_bytes();
        if len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, len) }
    }

    /// # Safety
    /// The buffer must be host-resident.
    pub(crate) unsafe fn host_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.layout.len_bytes();
        if len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, len) }
    }
}

impl Buffer for BufferMut<'_> {
    fn as_u64(&self) -> u64 {
        self.ptr
    }

    fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl std::fmt::Display for BufferMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferMut(0x{:x}, {})", self.ptr, self.layout)
    }
}
