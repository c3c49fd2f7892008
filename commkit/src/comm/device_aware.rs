//! Device-aware backend.
//!
//! Every buffer argument is classified first. Host-resident arguments go to
//! the transport untouched. Device-resident arguments are staged: inputs are
//! copied into a host staging buffer before the transport call, outputs are
//! received into one and copied back into the caller's device buffer after
//! it. When the transport handles device memory itself, nothing is staged.
//!
//! Only the arguments a rank actually reads or writes are staged: the root
//! side of `scatter`, `gather` and `reduce` is staged on the root only.

use std::sync::Arc;

use super::{Communicator, HostCommunicator, Staging, check};
use crate::config::Capabilities;
use crate::device::{DeviceRuntime, MemorySpace};
use crate::error::Result;
use crate::memory::{Buffer, BufferMut, BufferRef, MemoryLocator, StagingBuffer, StagingManager};
use crate::transport::Transport;
use crate::types::{Rank, ReduceOp, Tag};

/// Communicator that routes device-resident buffers through host staging
/// buffers unless the transport can take them directly.
pub struct DeviceAwareCommunicator<T> {
    host: HostCommunicator<T>,
    staging: StagingManager,
    direct: bool,
}

impl<T: Transport> DeviceAwareCommunicator<T> {
    /// `direct`: skip staging and hand device buffers to the transport. Only
    /// honoured when the transport reports
    /// [`accepts_device_memory`](Transport::accepts_device_memory); otherwise
    /// device buffers are staged as usual.
    pub fn new(transport: T, locator: MemoryLocator, direct: bool) -> Self {
        let direct = if direct && !transport.accepts_device_memory() {
            tracing::warn!(
                "direct device transport requested but the transport takes host memory only; \
                 staging instead"
            );
            false
        } else {
            direct
        };
        Self {
            host: HostCommunicator::with_locator(transport, locator.clone()),
            staging: StagingManager::new(locator),
            direct,
        }
    }

    /// Build from process capability flags. Staging is skipped when
    /// [`Capabilities::direct_device_transport`] holds.
    pub fn from_capabilities(
        transport: T,
        caps: &Capabilities,
        runtime: Option<Arc<dyn DeviceRuntime>>,
    ) -> Self {
        let locator = MemoryLocator::from_capabilities(caps, runtime);
        Self::new(transport, locator, caps.direct_device_transport())
    }

    /// Whether device buffers bypass staging.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn locator(&self) -> &MemoryLocator {
        self.staging.locator()
    }

    pub fn transport(&self) -> &T {
        self.host.transport()
    }

    fn needs_staging<B: Buffer + ?Sized>(&self, buf: &B) -> bool {
        !self.direct && self.staging.locator().locate(buf) == MemorySpace::Device
    }

    /// Stage an input the transport will read. `None`: use the caller's buffer.
    fn stage_in<'s>(
        &self,
        operation: &'static str,
        data: &BufferRef<'_>,
        supplied: Option<BufferMut<'s>>,
        active: bool,
    ) -> Result<Option<StagingBuffer<'s>>> {
        if !active {
            return Ok(None);
        }
        if !self.needs_staging(data) {
            if let Some(buf) = &supplied {
                self.staging.validate(data.layout(), buf)?;
            }
            return Ok(None);
        }
        let mut staged = self.staging.acquire(data.layout(), supplied)?;
        tracing::debug!(
            operation,
            rank = self.rank(),
            layout = %data.layout(),
            owned = staged.is_owned(),
            "staging input"
        );
        self.staging.copy_to_host(data, &mut staged)?;
        Ok(Some(staged))
    }

    /// Stage an output the transport will write. Copied back by [`Self::unstage`].
    fn stage_out<'s>(
        &self,
        operation: &'static str,
        buf: &BufferMut<'_>,
        supplied: Option<BufferMut<'s>>,
        active: bool,
    ) -> Result<Option<StagingBuffer<'s>>> {
        if !active {
            return Ok(None);
        }
        if !self.needs_staging(buf) {
            if let Some(s) = &supplied {
                self.staging.validate(buf.layout(), s)?;
            }
            return Ok(None);
        }
        let staged = self.staging.acquire(buf.layout(), supplied)?;
        tracing::debug!(
            operation,
            rank = self.rank(),
            layout = %buf.layout(),
            owned = staged.is_owned(),
            "staging output"
        );
        Ok(Some(staged))
    }

    fn unstage(&self, staged: Option<StagingBuffer<'_>>, buf: &mut BufferMut<'_>) -> Result<()> {
        match staged {
            Some(s) => self.staging.copy_to_device(&s, buf),
            None => Ok(()),
        }
    }

    pub fn send_staged(
        &mut self,
        data: &BufferRef<'_>,
        dest: Rank,
        tag: Tag,
        staging: Option<BufferMut<'_>>,
    ) -> Result<()> {
        check::peer("send", "destination", dest, self.size())?;
        let staged = self.stage_in("send", data, staging, true)?;
        self.host.send(&input(&staged, data), dest, tag)
    }

    pub fn recv_staged(
        &mut self,
        buf: &mut BufferMut<'_>,
        source: Rank,
        tag: Tag,
        staging: Option<BufferMut<'_>>,
    ) -> Result<()> {
        check::peer("recv", "source", source, self.size())?;
        let mut staged = self.stage_out("recv", buf, staging, true)?;
        self.host.recv(&mut output(&mut staged, buf), source, tag)?;
        self.unstage(staged, buf)
    }

    /// In-place broadcast. The root copies its device data out before the
    /// transport call; every other rank copies the result in after it.
    pub fn bcast_staged(
        &mut self,
        data: &mut BufferMut<'_>,
        root: Rank,
        staging: Option<BufferMut<'_>>,
    ) -> Result<()> {
        check::peer("bcast", "root", root, self.size())?;
        let is_root = self.rank() == root;

        if !self.needs_staging(data) {
            if let Some(s) = &staging {
                self.staging.validate(data.layout(), s)?;
            }
            return self.host.bcast(data, root);
        }

        let mut staged = self.staging.acquire(data.layout(), staging)?;
        tracing::debug!(
            rank = self.rank(),
            root,
            layout = %data.layout(),
            owned = staged.is_owned(),
            "staging bcast"
        );
        if is_root {
            self.staging.copy_to_host(&data.view(), &mut staged)?;
        }
        self.host.bcast(&mut staged.view_mut(), root)?;
        if !is_root {
            self.staging.copy_to_device(&staged, data)?;
        }
        Ok(())
    }

    pub fn scatter_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
        staging: Staging<'_>,
    ) -> Result<()> {
        let is_root = self.rank() == root;
        check::scatter(self.rank(), self.size(), send.layout(), recv.layout(), root)?;
        let staged_send = self.stage_in("scatter", send, staging.send, is_root)?;
        let mut staged_recv = self.stage_out("scatter", recv, staging.recv, true)?;
        self.host.scatter(
            &input(&staged_send, send),
            &mut output(&mut staged_recv, recv),
            root,
        )?;
        self.unstage(staged_recv, recv)
    }

    pub fn gather_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
        staging: Staging<'_>,
    ) -> Result<()> {
        let is_root = self.rank() == root;
        check::gather(self.rank(), self.size(), send.layout(), recv.layout(), root)?;
        let staged_send = self.stage_in("gather", send, staging.send, true)?;
        let mut staged_recv = self.stage_out("gather", recv, staging.recv, is_root)?;
        self.host.gather(
            &input(&staged_send, send),
            &mut output(&mut staged_recv, recv),
            root,
        )?;
        self.unstage(staged_recv, recv)
    }

    pub fn allgather_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        staging: Staging<'_>,
    ) -> Result<()> {
        check::allgather(self.size(), send.layout(), recv.layout())?;
        let staged_send = self.stage_in("allgather", send, staging.send, true)?;
        let mut staged_recv = self.stage_out("allgather", recv, staging.recv, true)?;
        self.host
            .allgather(&input(&staged_send, send), &mut output(&mut staged_recv, recv))?;
        self.unstage(staged_recv, recv)
    }

    pub fn reduce_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        root: Rank,
        staging: Staging<'_>,
    ) -> Result<()> {
        let is_root = self.rank() == root;
        check::reduce(self.rank(), self.size(), send.layout(), recv.layout(), root)?;
        let staged_send = self.stage_in("reduce", send, staging.send, true)?;
        let mut staged_recv = self.stage_out("reduce", recv, staging.recv, is_root)?;
        self.host.reduce(
            &input(&staged_send, send),
            &mut output(&mut staged_recv, recv),
            op,
            root,
        )?;
        self.unstage(staged_recv, recv)
    }

    pub fn allreduce_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        staging: Staging<'_>,
    ) -> Result<()> {
        check::same_layout("allreduce", send.layout(), recv.layout())?;
        let staged_send = self.stage_in("allreduce", send, staging.send, true)?;
        let mut staged_recv = self.stage_out("allreduce", recv, staging.recv, true)?;
        self.host.allreduce(
            &input(&staged_send, send),
            &mut output(&mut staged_recv, recv),
            op,
        )?;
        self.unstage(staged_recv, recv)
    }

    pub fn alltoall_staged(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        staging: Staging<'_>,
    ) -> Result<()> {
        check::alltoall(self.size(), send.layout(), recv.layout())?;
        let staged_send = self.stage_in("alltoall", send, staging.send, true)?;
        let mut staged_recv = self.stage_out("alltoall", recv, staging.recv, true)?;
        self.host
            .alltoall(&input(&staged_send, send), &mut output(&mut staged_recv, recv))?;
        self.unstage(staged_recv, recv)
    }

    fn derive(&self, host: HostCommunicator<T>) -> Self {
        Self {
            host,
            staging: self.staging.clone(),
            direct: self.direct,
        }
    }
}

/// The buffer the transport should read: the staged copy if there is one.
fn input<'v>(staged: &'v Option<StagingBuffer<'_>>, original: &'v BufferRef<'_>) -> BufferRef<'v> {
    match staged {
        Some(s) => s.view(),
        None => original.clone(),
    }
}

/// The buffer the transport should write: the staging buffer if there is one.
fn output<'v>(
    staged: &'v mut Option<StagingBuffer<'_>>,
    original: &'v mut BufferMut<'_>,
) -> BufferMut<'v> {
    match staged {
        Some(s) => s.view_mut(),
        None => original.reborrow(),
    }
}

impl<T: Transport> Communicator for DeviceAwareCommunicator<T> {
    fn rank(&self) -> Rank {
        self.host.rank()
    }

    fn size(&self) -> u32 {
        self.host.size()
    }

    fn send(&mut self, data: &BufferRef<'_>, dest: Rank, tag: Tag) -> Result<()> {
        self.send_staged(data, dest, tag, None)
    }

    fn recv(&mut self, buf: &mut BufferMut<'_>, source: Rank, tag: Tag) -> Result<()> {
        self.recv_staged(buf, source, tag, None)
    }

    fn bcast(&mut self, data: &mut BufferMut<'_>, root: Rank) -> Result<()> {
        self.bcast_staged(data, root, None)
    }

    fn scatter(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        self.scatter_staged(send, recv, root, Staging::none())
    }

    fn gather(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        self.gather_staged(send, recv, root, Staging::none())
    }

    fn allgather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        self.allgather_staged(send, recv, Staging::none())
    }

    fn reduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        self.reduce_staged(send, recv, op, root, Staging::none())
    }

    fn allreduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
    ) -> Result<()> {
        self.allreduce_staged(send, recv, op, Staging::none())
    }

    fn alltoall(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        self.alltoall_staged(send, recv, Staging::none())
    }

    fn barrier(&mut self) -> Result<()> {
        self.host.barrier()
    }

    fn split(&mut self, color: u32, key: u32) -> Result<Self> {
        let host = self.host.split(color, key)?;
        Ok(self.derive(host))
    }

    fn dup(&mut self) -> Result<Self> {
        let host = self.host.dup()?;
        Ok(self.derive(host))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DeviceAwareCommunicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAwareCommunicator")
            .field("host", &self.host)
            .field("locator", self.staging.locator())
            .field("direct", &self.direct)
            .finish()
    }
}
