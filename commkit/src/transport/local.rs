//! In-process transport: one endpoint per rank, connected by unbounded
//! channels.
//!
//! Every message carries a route `(comm_id, source, lane)`. The lane is either
//! a point-to-point tag or the sequence number of a collective call, so
//! point-to-point and collective traffic never consume each other's messages.
//! Messages that arrive for a route nobody is waiting on are stashed and
//! handed out in arrival order later. Point-to-point messages carry the
//! sender's layout; a receive that does not match it fails and leaves the
//! message at the head of its route.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use super::Transport;
use crate::config::LocalConfig;
use crate::error::{CommError, Result};
use crate::memory::Layout;
use crate::reduce::reduce_slice;
use crate::types::{DataType, Rank, ReduceOp, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    P2p(Tag),
    Collective(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Route {
    comm_id: u64,
    /// World rank of the sender.
    source: Rank,
    lane: Lane,
}

struct Envelope {
    route: Route,
    parcel: Parcel,
}

struct Parcel {
    /// Sender's layout. Collective payloads carry none.
    layout: Option<Layout>,
    payload: Vec<u8>,
}

struct Mailbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    stash: HashMap<Route, VecDeque<Parcel>>,
}

/// Per-rank state shared by a transport and every communicator split or
/// duplicated from it.
struct Endpoint {
    world_rank: Rank,
    peers: Vec<mpsc::UnboundedSender<Envelope>>,
    mailbox: Mutex<Mailbox>,
    rt: tokio::runtime::Runtime,
    recv_timeout: Duration,
}

impl Endpoint {
    fn lock_mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, dest: Rank, route: Route, parcel: Parcel) -> Result<()> {
        let tx = self
            .peers
            .get(dest as usize)
            .ok_or_else(|| CommError::transport(format!("no endpoint for world rank {dest}")))?;
        tracing::trace!(
            from = self.world_rank,
            to = dest,
            comm_id = route.comm_id,
            lane = ?route.lane,
            bytes = parcel.payload.len(),
            "deliver"
        );
        tx.send(Envelope { route, parcel })
            .map_err(|_| CommError::transport(format!("rank {dest} has shut down")))
    }

    /// Block until a message for `route` is available and hand it out if
    /// `accept` passes. A rejected message stays at the head of its route.
    fn take(&self, route: Route, accept: impl Fn(&Parcel) -> Result<()>) -> Result<Parcel> {
        let mut guard = self.lock_mailbox();
        let Mailbox { rx, stash } = &mut *guard;

        if let Some(queue) = stash.get_mut(&route) {
            if let Some(parcel) = queue.front() {
                accept(parcel)?;
                return queue
                    .pop_front()
                    .ok_or_else(|| CommError::transport("stash emptied while held"));
            }
        }

        let deadline = tokio::time::Instant::now() + self.recv_timeout;
        loop {
            let next = self
                .rt
                .block_on(async { tokio::time::timeout_at(deadline, rx.recv()).await });
            match next {
                Ok(Some(env)) if env.route == route => {
                    if let Err(e) = accept(&env.parcel) {
                        stash.entry(route).or_default().push_front(env.parcel);
                        return Err(e);
                    }
                    return Ok(env.parcel);
                }
                Ok(Some(env)) => {
                    tracing::trace!(rank = self.world_rank, lane = ?env.route.lane, "stash");
                    stash.entry(env.route).or_default().push_back(env.parcel);
                }
                Ok(None) => {
                    return Err(CommError::transport(format!(
                        "rank {}: mailbox closed",
                        self.world_rank
                    )));
                }
                Err(_) => {
                    return Err(CommError::transport(format!(
                        "rank {}: timed out after {:?} waiting for {:?} from rank {}",
                        self.world_rank, self.recv_timeout, route.lane, route.source
                    )));
                }
            }
        }
    }
}

/// In-process [`Transport`] endpoint for one rank.
///
/// Created in full meshes by [`bootstrap_local`](Self::bootstrap_local); move
/// each endpoint to its own thread to drive it.
pub struct LocalTransport {
    endpoint: Arc<Endpoint>,
    comm_id: u64,
    rank: Rank,
    /// Communicator rank -> world rank.
    rank_map: Arc<[Rank]>,
    /// Collective calls made on this communicator so far.
    seq: u64,
    /// Splits and dups made from this communicator so far.
    generation: u64,
    /// Device pointers are host-dereferenceable for this mesh.
    device_memory: bool,
}

impl LocalTransport {
    /// Create a fully connected mesh of `world_size` endpoints with default config.
    pub fn bootstrap_local(world_size: u32) -> Result<Vec<Self>> {
        Self::bootstrap_local_with_config(world_size, &LocalConfig::default())
    }

    pub fn bootstrap_local_with_config(world_size: u32, config: &LocalConfig) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(CommError::transport("world size must be at least 1"));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..world_size).map(|_| mpsc::unbounded_channel()).unzip();
        let rank_map: Arc<[Rank]> = (0..world_size).collect();

        let mut transports = Vec::with_capacity(world_size as usize);
        for (rank, rx) in (0..world_size).zip(receivers) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| CommError::transport(format!("tokio runtime: {e}")))?;
            let endpoint = Endpoint {
                world_rank: rank,
                peers: senders.clone(),
                mailbox: Mutex::new(Mailbox {
                    rx,
                    stash: HashMap::new(),
                }),
                rt,
                recv_timeout: config.recv_timeout,
            };
            transports.push(LocalTransport {
                endpoint: Arc::new(endpoint),
                comm_id: 0,
                rank,
                rank_map: Arc::clone(&rank_map),
                seq: 0,
                generation: 0,
                device_memory: false,
            });
        }

        tracing::debug!(world_size, "local mesh bootstrapped");
        Ok(transports)
    }

    /// Let communicators hand device-resident buffers to this endpoint and
    /// every communicator split or duplicated from it.
    ///
    /// # Safety
    /// Every device address passed through this endpoint must be readable
    /// and writable from the host, as with emulated or unified memory.
    pub unsafe fn assume_device_memory(mut self) -> Self {
        self.device_memory = true;
        self
    }

    /// Identifier of this communicator's message space. Zero for the world.
    pub fn comm_id(&self) -> u64 {
        self.comm_id
    }

    fn world_rank_of(&self, rank: Rank) -> Result<Rank> {
        self.rank_map.get(rank as usize).copied().ok_or_else(|| {
            CommError::protocol(
                "transport",
                format!("rank {rank} outside [0, {})", self.rank_map.len()),
            )
        })
    }

    fn next_lane(&mut self) -> Lane {
        let lane = Lane::Collective(self.seq);
        self.seq += 1;
        lane
    }

    fn route_from(&self, source: Rank, lane: Lane) -> Result<Route> {
        Ok(Route {
            comm_id: self.comm_id,
            source: self.world_rank_of(source)?,
            lane,
        })
    }

    fn post(&self, dest: Rank, lane: Lane, payload: Vec<u8>) -> Result<()> {
        self.post_parcel(dest, lane, Parcel { layout: None, payload })
    }

    fn post_parcel(&self, dest: Rank, lane: Lane, parcel: Parcel) -> Result<()> {
        let route = Route {
            comm_id: self.comm_id,
            source: self.endpoint.world_rank,
            lane,
        };
        self.endpoint
            .deliver(self.world_rank_of(dest)?, route, parcel)
    }

    fn fetch(&self, source: Rank, lane: Lane, expected: usize) -> Result<Vec<u8>> {
        let route = self.route_from(source, lane)?;
        let parcel = self.endpoint.take(route, |p| {
            if p.payload.len() != expected {
                return Err(CommError::transport(format!(
                    "expected {expected} bytes from rank {source}, got {}",
                    p.payload.len()
                )));
            }
            Ok(())
        })?;
        Ok(parcel.payload)
    }

    fn fetch_into(&self, source: Rank, lane: Lane, dst: &mut [u8]) -> Result<()> {
        let payload = self.fetch(source, lane, dst.len())?;
        dst.copy_from_slice(&payload);
        Ok(())
    }

    fn others(&self) -> impl Iterator<Item = Rank> + use<> {
        let me = self.rank;
        (0..self.size()).filter(move |&r| r != me)
    }

    /// Every rank contributes `send`; `recv` receives all contributions in rank order.
    fn exchange(&self, lane: Lane, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let chunk = send.len();
        expect_len("allgather", recv.len(), chunk * self.size() as usize)?;
        for r in self.others() {
            self.post(r, lane, send.to_vec())?;
        }
        for r in 0..self.size() {
            let dst = &mut recv[r as usize * chunk..(r as usize + 1) * chunk];
            if r == self.rank {
                dst.copy_from_slice(send);
            } else {
                self.fetch_into(r, lane, dst)?;
            }
        }
        Ok(())
    }

    /// Fold every rank's `send` into `recv` in rank order, so all ranks
    /// folding the same contributions produce identical results.
    fn fold(
        &self,
        lane: Lane,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        for r in 0..self.size() {
            let part = if r == self.rank {
                Cow::Borrowed(send)
            } else {
                Cow::Owned(self.fetch(r, lane, send.len())?)
            };
            if r == 0 {
                recv.copy_from_slice(&part);
            } else {
                reduce_slice(recv, &part, dtype, op)?;
            }
        }
        Ok(())
    }

    fn child(&self, comm_id: u64, rank: Rank, rank_map: Arc<[Rank]>) -> Self {
        LocalTransport {
            endpoint: Arc::clone(&self.endpoint),
            comm_id,
            rank,
            rank_map,
            seq: 0,
            generation: 0,
            device_memory: self.device_memory,
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.rank_map.len() as u32
    }

    fn accepts_device_memory(&self) -> bool {
        self.device_memory
    }

    fn send(&mut self, data: &[u8], layout: &Layout, dest: Rank, tag: Tag) -> Result<()> {
        let parcel = Parcel {
            layout: Some(layout.clone()),
            payload: data.to_vec(),
        };
        self.post_parcel(dest, Lane::P2p(tag), parcel)
    }

    fn recv(&mut self, buf: &mut [u8], layout: &Layout, source: Rank, tag: Tag) -> Result<()> {
        let route = self.route_from(source, Lane::P2p(tag))?;
        let len = buf.len();
        let parcel = self.endpoint.take(route, |p| match &p.layout {
            Some(sent) if sent != layout => Err(CommError::shape_mismatch(
                "recv",
                format!("send is {sent}, recv is {layout}"),
            )),
            _ if p.payload.len() != len => Err(CommError::shape_mismatch(
                "recv",
                format!("message holds {} bytes, recv is {layout}", p.payload.len()),
            )),
            _ => Ok(()),
        })?;
        buf.copy_from_slice(&parcel.payload);
        Ok(())
    }

    fn bcast(&mut self, buf: &mut [u8], root: Rank) -> Result<()> {
        self.world_rank_of(root)?;
        let lane = self.next_lane();
        if self.rank == root {
            for r in self.others() {
                self.post(r, lane, buf.to_vec())?;
            }
            Ok(())
        } else {
            self.fetch_into(root, lane, buf)
        }
    }

    fn scatter(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()> {
        self.world_rank_of(root)?;
        let lane = self.next_lane();
        if self.rank != root {
            return self.fetch_into(root, lane, recv);
        }

        let chunk = recv.len();
        expect_len("scatter", send.len(), chunk * self.size() as usize)?;
        for r in 0..self.size() {
            let part = &send[r as usize * chunk..(r as usize + 1) * chunk];
            if r == self.rank {
                recv.copy_from_slice(part);
            } else {
                self.post(r, lane, part.to_vec())?;
            }
        }
        Ok(())
    }

    fn gather(&mut self, send: &[u8], recv: &mut [u8], root: Rank) -> Result<()> {
        self.world_rank_of(root)?;
        let lane = self.next_lane();
        if self.rank != root {
            return self.post(root, lane, send.to_vec());
        }

        let chunk = send.len();
        expect_len("gather", recv.len(), chunk * self.size() as usize)?;
        for r in 0..self.size() {
            let dst = &mut recv[r as usize * chunk..(r as usize + 1) * chunk];
            if r == self.rank {
                dst.copy_from_slice(send);
            } else {
                self.fetch_into(r, lane, dst)?;
            }
        }
        Ok(())
    }

    fn allgather(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let lane = self.next_lane();
        self.exchange(lane, send, recv)
    }

    fn reduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        self.world_rank_of(root)?;
        let lane = self.next_lane();
        if self.rank != root {
            return self.post(root, lane, send.to_vec());
        }
        expect_len("reduce", recv.len(), send.len())?;
        self.fold(lane, send, recv, dtype, op)
    }

    fn allreduce(
        &mut self,
        send: &[u8],
        recv: &mut [u8],
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        expect_len("allreduce", recv.len(), send.len())?;
        let lane = self.next_lane();
        for r in self.others() {
            self.post(r, lane, send.to_vec())?;
        }
        self.fold(lane, send, recv, dtype, op)
    }

    fn alltoall(&mut self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let size = self.size() as usize;
        expect_len("alltoall", recv.len(), send.len())?;
        if send.len() % size != 0 {
            return Err(CommError::shape_mismatch(
                "alltoall",
                format!("{} bytes do not split into {size} chunks", send.len()),
            ));
        }
        let chunk = send.len() / size;
        let lane = self.next_lane();

        for r in self.others() {
            let part = &send[r as usize * chunk..(r as usize + 1) * chunk];
            self.post(r, lane, part.to_vec())?;
        }
        for r in 0..self.size() {
            let dst = &mut recv[r as usize * chunk..(r as usize + 1) * chunk];
            if r == self.rank {
                dst.copy_from_slice(&send[r as usize * chunk..(r as usize + 1) * chunk]);
            } else {
                self.fetch_into(r, lane, dst)?;
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        let lane = self.next_lane();
        if self.size() == 1 {
            return Ok(());
        }
        // Gather to rank 0, then release.
        if self.rank == 0 {
            for r in self.others() {
                self.fetch(r, lane, 0)?;
            }
            for r in self.others() {
                self.post(r, lane, Vec::new())?;
            }
            Ok(())
        } else {
            self.post(0, lane, Vec::new())?;
            self.fetch(0, lane, 0).map(|_| ())
        }
    }

    fn split(&mut self, color: u32, key: u32) -> Result<Self> {
        let size = self.size() as usize;
        let lane = self.next_lane();

        let mut mine = [0u8; 8];
        mine[..4].copy_from_slice(&color.to_le_bytes());
        mine[4..].copy_from_slice(&key.to_le_bytes());
        let mut all = vec![0u8; 8 * size];
        self.exchange(lane, &mine, &mut all)?;

        let mut group: Vec<(Rank, u32)> = all
            .chunks_exact(8)
            .zip(0..)
            .filter_map(|(entry, r)| {
                let c = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                let k = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
                (c == color).then_some((r, k))
            })
            .collect();
        group.sort_by_key(|&(r, k)| (k, r));

        let new_rank = group
            .iter()
            .position(|&(r, _)| r == self.rank)
            .ok_or_else(|| CommError::transport("split: own rank missing from its colour group"))?
            as Rank;
        let rank_map: Arc<[Rank]> = group
            .iter()
            .map(|&(r, _)| self.rank_map[r as usize])
            .collect();

        let comm_id = fnv1a_comm_id([
            &self.comm_id.to_le_bytes()[..],
            &self.generation.to_le_bytes()[..],
            &b"split"[..],
            &color.to_le_bytes()[..],
        ]);
        self.generation += 1;

        tracing::debug!(
            rank = self.rank,
            color,
            key,
            new_rank,
            new_size = rank_map.len(),
            comm_id,
            "split"
        );
        Ok(self.child(comm_id, new_rank, rank_map))
    }

    fn dup(&mut self) -> Result<Self> {
        let comm_id = fnv1a_comm_id([
            &self.comm_id.to_le_bytes()[..],
            &self.generation.to_le_bytes()[..],
            &b"dup"[..],
        ]);
        self.generation += 1;
        tracing::debug!(rank = self.rank, comm_id, "dup");
        Ok(self.child(comm_id, self.rank, Arc::clone(&self.rank_map)))
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("rank", &self.rank)
            .field("size", &self.rank_map.len())
            .field("comm_id", &self.comm_id)
            .field("world_rank", &self.endpoint.world_rank)
            .field("device_memory", &self.device_memory)
            .finish()
    }
}

fn expect_len(operation: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(CommError::shape_mismatch(
            operation,
            format!("buffer holds {actual} bytes, expected {expected}"),
        ));
    }
    Ok(())
}

/// Non-zero FNV-1a hash; zero is reserved for the world communicator.
fn fnv1a_comm_id<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for part in parts {
        for &b in part {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    }
    if h == 0 { 1 } else { h }
}
