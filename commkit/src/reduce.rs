//! Element-wise reduction over byte slices, used by the in-process transport.
//!
//! Elements are read and written in native byte order, the order host
//! buffers hold them in. Integer sums wrap.

use crate::error::{CommError, Result};
use crate::types::{DataType, ReduceOp};

trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Alignment-safe element access on byte slices.
trait NeBytes: Sized {
    const SIZE: usize;
    fn read_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, bytes: &mut [u8]);
}

macro_rules! impl_ne_bytes {
    ($($ty:ty),*) => {
        $(
            impl NeBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn read_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_ne_bytes(raw)
                }

                #[inline]
                fn write_ne(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_ne_bytes!(i8, i32, i64, u8, u32, u64, f32, f64);

/// `dst[i] = op(dst[i], src[i])` for every `dtype` element.
///
/// Both slices must have the same length, a multiple of the element size.
pub(crate) fn reduce_slice(
    dst: &mut [u8],
    src: &[u8],
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    if dst.len() != src.len() || dst.len() % dtype.size_in_bytes() != 0 {
        return Err(CommError::shape_mismatch(
            "reduce",
            format!(
                "cannot combine {} and {} bytes as {dtype}",
                dst.len(),
                src.len()
            ),
        ));
    }
    match dtype {
        DataType::F32 => reduce_typed::<f32>(dst, src, op),
        DataType::F64 => reduce_typed::<f64>(dst, src, op),
        DataType::I8 => reduce_typed::<i8>(dst, src, op),
        DataType::I32 => reduce_typed::<i32>(dst, src, op),
        DataType::I64 => reduce_typed::<i64>(dst, src, op),
        DataType::U8 => reduce_typed::<u8>(dst, src, op),
        DataType::U32 => reduce_typed::<u32>(dst, src, op),
        DataType::U64 => reduce_typed::<u64>(dst, src, op),
    }
    Ok(())
}

fn reduce_typed<T: Reducible + NeBytes>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    for (d, s) in dst.chunks_exact_mut(T::SIZE).zip(src.chunks_exact(T::SIZE)) {
        T::reduce(T::read_ne(d), T::read_ne(s), op).write_ne(d);
    }
}
