use std::collections::{HashMap, VecDeque};

use super::{Communicator, check};
use crate::device::MemorySpace;
use crate::error::{CommError, Result};
use crate::memory::{Buffer, BufferMut, BufferRef, Layout, MemoryLocator, StagingManager};
use crate::types::{Rank, ReduceOp, Tag};

#[derive(Debug)]
struct Message {
    layout: Layout,
    payload: Vec<u8>,
}

/// Single-process backend: rank 0 of a group of one.
///
/// Sends are copied into a per-tag FIFO and received back from it; every
/// collective reduces to validation plus a copy from input to output.
/// Device-resident buffers are read and written through the memory locator's
/// runtime, so the backend also works for serial runs on a device.
#[derive(Debug, Default)]
pub struct NullCommunicator {
    queues: HashMap<Tag, VecDeque<Message>>,
    staging: StagingManager,
}

impl NullCommunicator {
    /// Host-only single-process communicator.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locator(locator: MemoryLocator) -> Self {
        Self {
            queues: HashMap::new(),
            staging: StagingManager::new(locator),
        }
    }

    /// Number of queued, not yet received messages for `tag`.
    pub fn pending(&self, tag: Tag) -> usize {
        self.queues.get(&tag).map_or(0, VecDeque::len)
    }

    fn fresh(&self) -> Self {
        Self::with_locator(self.staging.locator().clone())
    }

    /// Deep copy of a buffer's contents.
    fn read(&self, data: &BufferRef<'_>) -> Result<Vec<u8>> {
        match self.staging.locator().locate(data) {
            // SAFETY: classified host-resident.
            MemorySpace::Host => Ok(unsafe { data.host_bytes() }.to_vec()),
            MemorySpace::Device => {
                let mut host = self.staging.acquire(data.layout(), None)?;
                self.staging.copy_to_host(data, &mut host)?;
                Ok(host.as_bytes().to_vec())
            }
        }
    }

    /// `payload.len()` must equal `buf.len_bytes()`.
    fn write(&self, buf: &mut BufferMut<'_>, payload: &[u8]) -> Result<()> {
        match self.staging.locator().locate(buf) {
            MemorySpace::Host => {
                // SAFETY: classified host-resident.
                unsafe { buf.host_bytes_mut() }.copy_from_slice(payload);
                Ok(())
            }
            MemorySpace::Device => {
                let mut host = self.staging.acquire(buf.layout(), None)?;
                host.as_bytes_mut().copy_from_slice(payload);
                self.staging.copy_to_device(&host, buf)
            }
        }
    }

    fn copy_through(&self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        let bytes = self.read(send)?;
        self.write(recv, &bytes)
    }
}

impl Communicator for NullCommunicator {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn send(&mut self, data: &BufferRef<'_>, dest: Rank, tag: Tag) -> Result<()> {
        check::peer("send", "destination", dest, 1)?;
        let payload = self.read(data)?;
        self.queues.entry(tag).or_default().push_back(Message {
            layout: data.layout().clone(),
            payload,
        });
        tracing::trace!(tag, pending = self.pending(tag), "queued");
        Ok(())
    }

    fn recv(&mut self, buf: &mut BufferMut<'_>, source: Rank, tag: Tag) -> Result<()> {
        check::peer("recv", "source", source, 1)?;
        let front = self
            .queues
            .get(&tag)
            .and_then(VecDeque::front)
            .ok_or(CommError::EmptyQueue { tag })?;
        check::same_layout("recv", &front.layout, buf.layout())?;

        let Some(msg) = self.queues.get_mut(&tag).and_then(VecDeque::pop_front) else {
            return Err(CommError::EmptyQueue { tag });
        };
        if let Err(e) = self.write(buf, &msg.payload) {
            // Leave the message for a retry.
            self.queues.entry(tag).or_default().push_front(msg);
            return Err(e);
        }
        Ok(())
    }

    fn bcast(&mut self, _data: &mut BufferMut<'_>, root: Rank) -> Result<()> {
        check::peer("bcast", "root", root, 1)
    }

    fn scatter(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        check::scatter(0, 1, send.layout(), recv.layout(), root)?;
        self.copy_through(send, recv)
    }

    fn gather(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        check::gather(0, 1, send.layout(), recv.layout(), root)?;
        self.copy_through(send, recv)
    }

    fn allgather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        check::allgather(1, send.layout(), recv.layout())?;
        self.copy_through(send, recv)
    }

    fn reduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        _op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        check::reduce(0, 1, send.layout(), recv.layout(), root)?;
        self.copy_through(send, recv)
    }

    fn allreduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        _op: ReduceOp,
    ) -> Result<()> {
        check::same_layout("allreduce", send.layout(), recv.layout())?;
        self.copy_through(send, recv)
    }

    fn alltoall(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        check::alltoall(1, send.layout(), recv.layout())?;
        self.copy_through(send, recv)
    }

    fn barrier(&mut self) -> Result<()> {
        Ok(())
    }

    fn split(&mut self, color: u32, _key: u32) -> Result<Self> {
        if color != 0 {
            return Err(CommError::protocol(
                "split",
                format!(
                    "colour {color} would leave rank 0 without a group; only colour 0 is valid"
                ),
            ));
        }
        Ok(self.fresh())
    }

    fn dup(&mut self) -> Result<Self> {
        Ok(self.fresh())
    }
}
