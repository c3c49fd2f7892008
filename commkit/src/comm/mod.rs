//! The communicator abstraction and its three backends.
//!
//! All backends share the argument validation in `check`, so a call that
//! fails on one backend fails the same way on the others, before any data
//! moves.

mod check;
mod device_aware;
mod host;
mod null;

pub use device_aware::DeviceAwareCommunicator;
pub use host::HostCommunicator;
pub use null::NullCommunicator;

use crate::error::Result;
use crate::memory::{BufferMut, BufferRef};
use crate::types::{Rank, ReduceOp, Tag};

/// Point-to-point, collective and group-management operations over a fixed
/// group of ranks.
///
/// Every call blocks until it has completed for the calling rank. Collectives
/// must be entered by every rank of the group, in the same order. Rooted
/// operations only read (or write) the root's copy of the root-side buffer;
/// other ranks may pass an empty host buffer there.
pub trait Communicator {
    fn rank(&self) -> Rank;

    fn size(&self) -> u32;

    /// Send `data` to `dest`. The caller may reuse `data` as soon as this returns.
    fn send(&mut self, data: &BufferRef<'_>, dest: Rank, tag: Tag) -> Result<()>;

    /// Overwrite `buf` with one message from `source` carrying `tag`.
    fn recv(&mut self, buf: &mut BufferMut<'_>, source: Rank, tag: Tag) -> Result<()>;

    /// Overwrite every rank's `data` with the root's `data`, in place.
    fn bcast(&mut self, data: &mut BufferMut<'_>, root: Rank) -> Result<()>;

    /// Split the root's `send` along its leading axis into `size` equal
    /// chunks; rank `i` receives chunk `i` into `recv`.
    fn scatter(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>, root: Rank)
    -> Result<()>;

    /// Concatenate every rank's `send` along the leading axis into the root's `recv`.
    fn gather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>, root: Rank)
    -> Result<()>;

    fn allgather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()>;

    /// Element-wise reduction of every rank's `send` into the root's `recv`.
    fn reduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()>;

    fn allreduce(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>, op: ReduceOp)
    -> Result<()>;

    /// `send` holds one chunk per destination rank; `recv` receives the chunk
    /// each peer addressed to this rank, in rank order.
    fn alltoall(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()>;

    fn barrier(&mut self) -> Result<()>;

    /// Partition the group by `color`; within a new group ranks are ordered by
    /// `key`, ties broken by current rank. The original is left untouched.
    fn split(&mut self, color: u32, key: u32) -> Result<Self>
    where
        Self: Sized;

    /// Independent communicator with the same membership and rank order.
    fn dup(&mut self) -> Result<Self>
    where
        Self: Sized;
}

/// Caller-supplied host staging buffers for a two-buffer collective.
///
/// Each buffer is only used when the matching argument is device-resident and
/// staging is required; it must be host-resident with exactly that argument's
/// layout.
#[derive(Debug, Default)]
pub struct Staging<'b> {
    pub send: Option<BufferMut<'b>>,
    pub recv: Option<BufferMut<'b>>,
}

impl<'b> Staging<'b> {
    /// No caller-supplied staging: buffers are allocated per call when needed.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_send(mut self, buf: BufferMut<'b>) -> Self {
        self.send = Some(buf);
        self
    }

    pub fn with_recv(mut self, buf: BufferMut<'b>) -> Self {
        self.recv = Some(buf);
        self
    }
}
