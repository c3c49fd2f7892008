//! Host-memory transport capability.
//!
//! Communicators validate arguments and stage device data; the transport only
//! moves bytes. Every method is blocking and every collective must be called
//! by all ranks of the group in the same order.

mod local;

#[cfg(feature = "mpi")]
mod mpi;

pub use local::LocalTransport;

#[cfg(feature = "mpi")]
pub use self::mpi::MpiTransport;

use crate::error::Result;
use crate::memory::Layout;
use crate::types::{DataType, Rank, ReduceOp, Tag};

/// Point-to-point and collective byte movement over a fixed rank group.
///
/// Rooted operations ignore the buffer that is unused on non-root ranks, so
/// callers may pass an empty slice there. Length agreement between ranks is
/// the caller's job; a transport may still report a disagreement it observes.
pub trait Transport {
    fn rank(&self) -> Rank;

    fn size(&self) -> u32;

    /// Whether buffers handed to this transport may live in device memory.
    /// Communicators refuse device-resident arguments otherwise.
    fn accepts_device_memory(&self) -> bool {
        false
    }

    /// `layout` describes `data` and travels with the message where the
    /// transport can carry it.
    fn send(&mut self, data: &[u8], layout: &Layout, dest: Rank, tag: Tag) -> Result<()>;

    /// Receive the next message from `source` with `tag` into `buf`, laid out
    /// as `layout`. A message that does not fit is reported as a shape
    /// mismatch and stays queued.
    fn recv(&mut self, buf: &mut [u8], layout: &Layout, source: Rank, tag: Tag) -> Result<()>;

    /// In-place broadcast of the root's `buf`.
    fn bcast(&mut self, buf: &mut [u8], root: Rank) -> Result<()>;

    /// `send` is read on the root only and holds `size` chunks of `recv.len()` bytes.
    fn scatter(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()>;

    /// `recv` is written on the root only and receives `size` chunks of `send.len()` bytes.
    fn gather(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()>;

    fn allgather(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()>;

    /// `recv` is written on the root only.
    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()>;

    fn allreduce(&mut self, send: &[u8], recv: &mut [u8], dtype: DataType, op: ReduceOp)
    -> Result<()>;

    /// `send` holds one equal chunk per destination rank, in rank order.
    fn alltoall(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()>;

    fn barrier(&mut self) -> Result<()>;

    /// Collective: ranks passing the same `color` share the returned group,
    /// ordered by `(key, rank)`.
    fn split(&mut self, color: u32, key: u32) -> Result<Self>
    where
        Self: Sized;

    /// Collective: same membership and order, independent message space.
    fn dup(&mut self) -> Result<Self>
    where
        Self: Sized;
}
