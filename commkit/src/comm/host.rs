use super::{Communicator, check};
use crate::device::MemorySpace;
use crate::error::{CommError, Result};
use crate::memory::{Buffer, BufferMut, BufferRef, MemoryLocator};
use crate::transport::Transport;
use crate::types::{Rank, ReduceOp, Tag};

/// Backend that hands host buffers straight to the transport.
///
/// Buffers the locator classifies as device memory are refused with a
/// protocol error before any transport call, unless the transport reports
/// [`accepts_device_memory`](Transport::accepts_device_memory).
#[derive(Debug)]
pub struct HostCommunicator<T> {
    transport: T,
    locator: MemoryLocator,
}

impl<T: Transport> HostCommunicator<T> {
    /// Host-only communicator: every buffer is taken to be host memory.
    pub fn new(transport: T) -> Self {
        Self::with_locator(transport, MemoryLocator::host_only())
    }

    /// Communicator that classifies buffers with `locator` and refuses
    /// device-resident ones the transport cannot take.
    pub fn with_locator(transport: T, locator: MemoryLocator) -> Self {
        Self { transport, locator }
    }

    pub fn locator(&self) -> &MemoryLocator {
        &self.locator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn derive(&self, transport: T) -> Self {
        Self::with_locator(transport, self.locator.clone())
    }

    /// Refuse a device-resident argument the transport cannot dereference.
    fn admit<B: Buffer + ?Sized>(
        &self,
        operation: &'static str,
        role: &str,
        buf: &B,
    ) -> Result<()> {
        if self.transport.accepts_device_memory()
            || self.locator.locate(buf) == MemorySpace::Host
        {
            return Ok(());
        }
        Err(CommError::protocol(
            operation,
            format!("{role} buffer is device-resident; the transport takes host memory only"),
        ))
    }

    fn bytes<'v>(
        &self,
        op: &'static str,
        role: &str,
        buf: &'v BufferRef<'_>,
    ) -> Result<&'v [u8]> {
        self.admit(op, role, buf)?;
        // SAFETY: host-resident, or the transport takes device memory.
        Ok(unsafe { buf.host_bytes() })
    }

    fn bytes_mut<'v>(
        &self,
        op: &'static str,
        role: &str,
        buf: &'v mut BufferMut<'_>,
    ) -> Result<&'v mut [u8]> {
        self.admit(op, role, buf)?;
        // SAFETY: as in `bytes`.
        Ok(unsafe { buf.host_bytes_mut() })
    }
}

impl<T: Transport> Communicator for HostCommunicator<T> {
    fn rank(&self) -> Rank {
        self.transport.rank()
    }

    fn size(&self) -> u32 {
        self.transport.size()
    }

    fn send(&mut self, data: &BufferRef<'_>, dest: Rank, tag: Tag) -> Result<()> {
        check::peer("send", "destination", dest, self.size())?;
        let bytes = self.bytes("send", "send", data)?;
        self.transport.send(bytes, data.layout(), dest, tag)
    }

    fn recv(&mut self, buf: &mut BufferMut<'_>, source: Rank, tag: Tag) -> Result<()> {
        check::peer("recv", "source", source, self.size())?;
        let layout = buf.layout().clone();
        let bytes = self.bytes_mut("recv", "recv", buf)?;
        self.transport.recv(bytes, &layout, source, tag)
    }

    fn bcast(&mut self, data: &mut BufferMut<'_>, root: Rank) -> Result<()> {
        check::peer("bcast", "root", root, self.size())?;
        let bytes = self.bytes_mut("bcast", "data", data)?;
        self.transport.bcast(bytes, root)
    }

    fn scatter(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        let rank = self.rank();
        check::scatter(rank, self.size(), send.layout(), recv.layout(), root)?;
        let send: &[u8] = if rank == root {
            self.bytes("scatter", "send", send)?
        } else {
            &[]
        };
        let recv = self.bytes_mut("scatter", "recv", recv)?;
        self.transport.scatter(send, recv, root)
    }

    fn gather(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        let rank = self.rank();
        check::gather(rank, self.size(), send.layout(), recv.layout(), root)?;
        let send = self.bytes("gather", "send", send)?;
        let recv: &mut [u8] = if rank == root {
            self.bytes_mut("gather", "recv", recv)?
        } else {
            &mut []
        };
        self.transport.gather(send, recv, root)
    }

    fn allgather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        check::allgather(self.size(), send.layout(), recv.layout())?;
        let send = self.bytes("allgather", "send", send)?;
        let recv = self.bytes_mut("allgather", "recv", recv)?;
        self.transport.allgather(send, recv)
    }

    fn reduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        let rank = self.rank();
        check::reduce(rank, self.size(), send.layout(), recv.layout(), root)?;
        let dtype = send.dtype();
        let send = self.bytes("reduce", "send", send)?;
        let recv: &mut [u8] = if rank == root {
            self.bytes_mut("reduce", "recv", recv)?
        } else {
            &mut []
        };
        self.transport.reduce(send, recv, dtype, op, root)
    }

    fn allreduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
    ) -> Result<()> {
        check::same_layout("allreduce", send.layout(), recv.layout())?;
        let dtype = send.dtype();
        let send = self.bytes("allreduce", "send", send)?;
        let recv = self.bytes_mut("allreduce", "recv", recv)?;
        self.transport.allreduce(send, recv, dtype, op)
    }

    fn alltoall(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        check::alltoall(self.size(), send.layout(), recv.layout())?;
        let send = self.bytes("alltoall", "send", send)?;
        let recv = self.bytes_mut("alltoall", "recv", recv)?;
        self.transport.alltoall(send, recv)
    }

    fn barrier(&mut self) -> Result<()> {
        self.transport.barrier()
    }

    fn split(&mut self, color: u32, key: u32) -> Result<Self> {
        let transport = self.transport.split(color, key)?;
        Ok(self.derive(transport))
    }

    fn dup(&mut self) -> Result<Self> {
        let transport = self.transport.dup()?;
        Ok(self.derive(transport))
    }
}
