//! Eager argument validation shared by every backend.
//!
//! Each check runs on the calling rank only and only looks at the buffers
//! that rank actually reads or writes.

use crate::error::{CommError, Result};
use crate::memory::Layout;
use crate::types::Rank;

pub(crate) fn peer(operation: &'static str, role: &str, rank: Rank, size: u32) -> Result<()> {
    if rank >= size {
        return Err(CommError::protocol(
            operation,
            format!("{role} rank {rank} outside [0, {size})"),
        ));
    }
    Ok(())
}

pub(crate) fn same_layout(operation: &'static str, send: &Layout, recv: &Layout) -> Result<()> {
    if send != recv {
        return Err(CommError::shape_mismatch(
            operation,
            format!("send is {send}, recv is {recv}"),
        ));
    }
    Ok(())
}

/// `part` must be one of `parts` equal leading-axis chunks of `whole`, either
/// as is or with its leading extent of 1 dropped (`[size, n]` splits into
/// `[1, n]` or `[n]`). With a single part this is plain layout equality.
fn chunk_of(operation: &'static str, whole: &Layout, part: &Layout, parts: u32) -> Result<()> {
    if parts == 1 {
        return same_layout(operation, whole, part);
    }
    match whole.chunk(parts as usize) {
        Some(chunk) if &chunk == part || is_squeezed(&chunk, part) => Ok(()),
        Some(chunk) => Err(CommError::shape_mismatch(
            operation,
            format!("{whole} splits into {parts} chunks of {chunk}, other side is {part}"),
        )),
        None => Err(CommError::shape_mismatch(
            operation,
            format!("{whole} cannot be split into {parts} equal chunks"),
        )),
    }
}

/// `part` is `chunk` without its leading axis of extent 1.
fn is_squeezed(chunk: &Layout, part: &Layout) -> bool {
    chunk.dtype() == part.dtype()
        && matches!(chunk.shape().split_first(), Some((&1, rest)) if rest == part.shape())
}

pub(crate) fn scatter(
    rank: Rank,
    size: u32,
    send: &Layout,
    recv: &Layout,
    root: Rank,
) -> Result<()> {
    peer("scatter", "root", root, size)?;
    if rank == root {
        chunk_of("scatter", send, recv, size)?;
    }
    Ok(())
}

pub(crate) fn gather(
    rank: Rank,
    size: u32,
    send: &Layout,
    recv: &Layout,
    root: Rank,
) -> Result<()> {
    peer("gather", "root", root, size)?;
    if rank == root {
        chunk_of("gather", recv, send, size)?;
    }
    Ok(())
}

pub(crate) fn allgather(size: u32, send: &Layout, recv: &Layout) -> Result<()> {
    chunk_of("allgather", recv, send, size)
}

pub(crate) fn reduce(
    rank: Rank,
    size: u32,
    send: &Layout,
    recv: &Layout,
    root: Rank,
) -> Result<()> {
    peer("reduce", "root", root, size)?;
    if rank == root {
        same_layout("reduce", send, recv)?;
    }
    Ok(())
}

pub(crate) fn alltoall(size: u32, send: &Layout, recv: &Layout) -> Result<()> {
    same_layout("alltoall", send, recv)?;
    if size > 1 && send.chunk(size as usize).is_none() {
        return Err(CommError::shape_mismatch(
            "alltoall",
            format!("{send} cannot be split into {size} equal chunks"),
        ));
    }
    Ok(())
}
