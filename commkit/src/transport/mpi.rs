//! MPI transport.
//!
//! The caller must initialize MPI (`mpi::initialize()`) and keep the returned
//! `Universe` alive for as long as any `MpiTransport` exists. MPI aborts the
//! job on communication failures, so these methods only fail on argument
//! errors detected before the call.

use mpi::collective::SystemOperation;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;

use super::Transport;
use crate::error::{CommError, Result};
use crate::memory::Layout;
use crate::types::{DataType, Rank, ReduceOp, Tag};

/// [`Transport`] over an MPI communicator.
pub struct MpiTransport {
    comm: SimpleCommunicator,
    device_aware: bool,
}

impl MpiTransport {
    /// Wrap the world communicator.
    pub fn world() -> Self {
        Self::from_communicator(SimpleCommunicator::world())
    }

    pub fn from_communicator(comm: SimpleCommunicator) -> Self {
        Self {
            comm,
            device_aware: false,
        }
    }

    /// Hand device-resident buffers straight to MPI. Inherited by splits
    /// and duplicates.
    ///
    /// # Safety
    /// The MPI library must be built device-aware (for example CUDA-aware
    /// Open MPI) for the device runtime whose pointers reach this transport.
    pub unsafe fn assume_device_aware(mut self) -> Self {
        self.device_aware = true;
        self
    }

    fn derive(&self, comm: SimpleCommunicator) -> Self {
        Self {
            comm,
            device_aware: self.device_aware,
        }
    }

    fn peer(&self, rank: Rank) -> Result<i32> {
        if rank >= self.size() {
            return Err(CommError::protocol(
                "transport",
                format!("rank {rank} outside [0, {})", self.size()),
            ));
        }
        Ok(rank as i32)
    }
}

/// Reduction-operator lookup.
fn system_op(op: ReduceOp) -> SystemOperation {
    match op {
        ReduceOp::Sum => SystemOperation::sum(),
        ReduceOp::Max => SystemOperation::max(),
        ReduceOp::Min => SystemOperation::min(),
    }
}

/// Reinterpret host bytes as `T` elements.
fn typed<T: Copy>(bytes: &[u8]) -> Result<&[T]> {
    if bytes.is_empty() {
        return Ok(&[]);
    }
    // SAFETY: every bit pattern is a valid value of the scalar types used here.
    let (head, body, tail) = unsafe { bytes.align_to::<T>() };
    if !head.is_empty() || !tail.is_empty() {
        return Err(CommError::transport("reduction buffer is misaligned for its dtype"));
    }
    Ok(body)
}

fn typed_mut<T: Copy>(bytes: &mut [u8]) -> Result<&mut [T]> {
    if bytes.is_empty() {
        return Ok(&mut []);
    }
    // SAFETY: as in `typed`.
    let (head, body, tail) = unsafe { bytes.align_to_mut::<T>() };
    if !head.is_empty() || !tail.is_empty() {
        return Err(CommError::transport("reduction buffer is misaligned for its dtype"));
    }
    Ok(body)
}

/// Run `$body` with `$s`/`$r` bound to the typed views of `$send`/`$recv`.
macro_rules! with_typed {
    ($dtype:expr, $send:expr, $recv:expr, |$s:ident, $r:ident| $body:expr) => {
        match $dtype {
            DataType::F32 => {
                let $s = typed::<f32>($send)?;
                let $r = typed_mut::<f32>($recv)?;
                $body
            }
            DataType::F64 => {
                let $s = typed::<f64>($send)?;
                let $r = typed_mut::<f64>($recv)?;
                $body
            }
            DataType::I8 => {
                let $s = typed::<i8>($send)?;
                let $r = typed_mut::<i8>($recv)?;
                $body
            }
            DataType::I32 => {
                let $s = typed::<i32>($send)?;
                let $r = typed_mut::<i32>($recv)?;
                $body
            }
            DataType::I64 => {
                let $s = typed::<i64>($send)?;
                let $r = typed_mut::<i64>($recv)?;
                $body
            }
            DataType::U8 => {
                let $s = typed::<u8>($send)?;
                let $r = typed_mut::<u8>($recv)?;
                $body
            }
            DataType::U32 => {
                let $s = typed::<u32>($send)?;
                let $r = typed_mut::<u32>($recv)?;
                $body
            }
            DataType::U64 => {
                let $s = typed::<u64>($send)?;
                let $r = typed_mut::<u64>($recv)?;
                $body
            }
        }
    };
}

impl Transport for MpiTransport {
    fn rank(&self) -> Rank {
        self.comm.rank() as Rank
    }

    fn size(&self) -> u32 {
        self.comm.size() as u32
    }

    fn accepts_device_memory(&self) -> bool {
        self.device_aware
    }

    /// MPI moves untyped bytes, so only the length of `layout` is checked.
    fn send(&mut self, data: &[u8], _layout: &Layout, dest: Rank, tag: Tag) -> Result<()> {
        let dest = self.peer(dest)?;
        self.comm
            .process_at_rank(dest)
            .send_with_tag(data, tag as i32);
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], layout: &Layout, source: Rank, tag: Tag) -> Result<()> {
        let source = self.peer(source)?;
        let process = self.comm.process_at_rank(source);
        // Probing leaves the message queued when it does not fit.
        let status = process.probe_with_tag(tag as i32);
        let count = status.count(u8::equivalent_datatype());
        if count < 0 || count as usize != buf.len() {
            return Err(CommError::shape_mismatch(
                "recv",
                format!("message holds {count} bytes, recv is {layout}"),
            ));
        }
        process.receive_into_with_tag(buf, tag as i32);
        Ok(())
    }

    fn bcast(&mut self, buf: &mut [u8], root: Rank) -> Result<()> {
        let root = self.peer(root)?;
        self.comm.process_at_rank(root).broadcast_into(buf);
        Ok(())
    }

    fn scatter(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()> {
        let root = self.peer(root)?;
        let root_process = self.comm.process_at_rank(root);
        if self.comm.rank() == root {
            root_process.scatter_into_root(send, recv);
        } else {
            root_process.scatter_into(recv);
        }
        Ok(())
    }

    fn gather(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()> {
        let root = self.peer(root)?;
        let root_process = self.comm.process_at_rank(root);
        if self.comm.rank() == root {
            root_process.gather_into_root(send, recv);
        } else {
            root_process.gather_into(send);
        }
        Ok(())
    }

    fn allgather(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        self.comm.all_gather_into(send, recv);
        Ok(())
    }

    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        let root = self.peer(root)?;
        let root_process = self.comm.process_at_rank(root);
        let is_root = self.comm.rank() == root;
        with_typed!(dtype, send, recv, |s, r| {
            if is_root {
                root_process.reduce_into_root(s, r, system_op(op));
            } else {
                root_process.reduce_into(s, system_op(op));
            }
        });
        Ok(())
    }

    fn allreduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        let comm = &self.comm;
        with_typed!(dtype, send, recv, |s, r| comm.all_reduce_into(s, r, system_op(op)));
        Ok(())
    }

    fn alltoall(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        self.comm.all_to_all_into(send, recv);
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        self.comm.barrier();
        Ok(())
    }

    fn split(&mut self, color: u32, key: u32) -> Result<Self> {
        let color = i32::try_from(color)
            .map_err(|_| CommError::protocol("split", format!("colour {color} exceeds i32")))?;
        let key = i32::try_from(key)
            .map_err(|_| CommError::protocol("split", format!("key {key} exceeds i32")))?;
        self.comm
            .split_by_color_with_key(Color::with_value(color), key)
            .map(|comm| self.derive(comm))
            .ok_or_else(|| CommError::transport("MPI split returned no communicator"))
    }

    fn dup(&mut self) -> Result<Self> {
        Ok(self.derive(self.comm.duplicate()))
    }
}
