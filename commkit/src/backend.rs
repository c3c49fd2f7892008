//! One-time backend selection from capability flags.

use std::sync::Arc;

use crate::comm::{Communicator, DeviceAwareCommunicator, HostCommunicator, NullCommunicator};
use crate::config::Capabilities;
use crate::device::DeviceRuntime;
use crate::error::Result;
use crate::memory::{BufferMut, BufferRef, MemoryLocator};
use crate::transport::Transport;
use crate::types::{Rank, ReduceOp, Tag};

/// The communicator backend chosen for this process. Fixed at construction.
#[derive(Debug)]
pub enum Backend<T> {
    Null(NullCommunicator),
    Host(HostCommunicator<T>),
    DeviceAware(DeviceAwareCommunicator<T>),
}

impl<T: Transport> Backend<T> {
    /// Pick a backend:
    /// - no transport, or `caps.transport` unset: [`Backend::Null`]
    /// - transport, `caps.device_runtime` and a runtime: [`Backend::DeviceAware`]
    /// - otherwise: [`Backend::Host`]
    pub fn select(
        caps: &Capabilities,
        transport: Option<T>,
        runtime: Option<Arc<dyn DeviceRuntime>>,
    ) -> Self {
        // A supplied runtime always classifies, so device memory is refused
        // or copied rather than read as host memory.
        let classifier = runtime
            .clone()
            .map(MemoryLocator::with_runtime)
            .unwrap_or_default();

        let backend = match transport {
            Some(t) if caps.transport => match runtime {
                Some(rt) if caps.device_runtime => Backend::DeviceAware(
                    DeviceAwareCommunicator::from_capabilities(t, caps, Some(rt)),
                ),
                rt => {
                    if rt.is_some() {
                        tracing::warn!(
                            "device runtime supplied but not flagged available; host transport only"
                        );
                    } else if caps.device_runtime {
                        tracing::warn!("device runtime flagged available but none supplied");
                    }
                    Backend::Host(HostCommunicator::with_locator(t, classifier))
                }
            },
            transport => {
                if transport.is_some() {
                    tracing::warn!(
                        "transport supplied but not flagged available; running serially"
                    );
                }
                Backend::Null(NullCommunicator::with_locator(classifier))
            }
        };

        tracing::info!(
            backend = backend.name(),
            rank = backend.rank(),
            size = backend.size(),
            direct_device_transport = caps.direct_device_transport(),
            "communicator backend selected"
        );
        backend
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Null(_) => "null",
            Backend::Host(_) => "host",
            Backend::DeviceAware(_) => "device-aware",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $c:ident => $call:expr) => {
        match $self {
            Backend::Null($c) => $call,
            Backend::Host($c) => $call,
            Backend::DeviceAware($c) => $call,
        }
    };
}

impl<T: Transport> Communicator for Backend<T> {
    fn rank(&self) -> Rank {
        delegate!(self, c => c.rank())
    }

    fn size(&self) -> u32 {
        delegate!(self, c => c.size())
    }

    fn send(&mut self, data: &BufferRef<'_>, dest: Rank, tag: Tag) -> Result<()> {
        delegate!(self, c => c.send(data, dest, tag))
    }

    fn recv(&mut self, buf: &mut BufferMut<'_>, source: Rank, tag: Tag) -> Result<()> {
        delegate!(self, c => c.recv(buf, source, tag))
    }

    fn bcast(&mut self, data: &mut BufferMut<'_>, root: Rank) -> Result<()> {
        delegate!(self, c => c.bcast(data, root))
    }

    fn scatter(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        delegate!(self, c => c.scatter(send, recv, root))
    }

    fn gather(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        delegate!(self, c => c.gather(send, recv, root))
    }

    fn allgather(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        delegate!(self, c => c.allgather(send, recv))
    }

    fn reduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        delegate!(self, c => c.reduce(send, recv, op, root))
    }

    fn allreduce(
        &mut self,
        send: &BufferRef<'_>,
        recv: &mut BufferMut<'_>,
        op: ReduceOp,
    ) -> Result<()> {
        delegate!(self, c => c.allreduce(send, recv, op))
    }

    fn alltoall(&mut self, send: &BufferRef<'_>, recv: &mut BufferMut<'_>) -> Result<()> {
        delegate!(self, c => c.alltoall(send, recv))
    }

    fn barrier(&mut self) -> Result<()> {
        delegate!(self, c => c.barrier())
    }

    fn split(&mut self, color: u32, key: u32) -> Result<Self> {
        Ok(match self {
            Backend::Null(c) => Backend::Null(c.split(color, key)?),
            Backend::Host(c) => Backend::Host(c.split(color, key)?),
            Backend::DeviceAware(c) => Backend::DeviceAware(c.split(color, key)?),
        })
    }

    fn dup(&mut self) -> Result<Self> {
        Ok(match self {
            Backend::Null(c) => Backend::Null(c.dup()?),
            Backend::Host(c) => Backend::Host(c.dup()?),
            Backend::DeviceAware(c) => Backend::DeviceAware(c.dup()?),
        })
    }
}
