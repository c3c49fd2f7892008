pub mod backend;
pub mod comm;
pub mod config;
pub mod device;
pub mod error;
pub mod memory;
pub(crate) mod reduce;
pub mod transport;
pub mod types;

pub use backend::Backend;
pub use comm::{Communicator, DeviceAwareCommunicator, HostCommunicator, NullCommunicator, Staging};
pub use config::{Capabilities, LocalConfig};
pub use device::{DeviceAlloc, DeviceRuntime, EmulatedDevice, MemorySpace};
pub use error::{CommError, Result};
pub use memory::{
    Buffer, BufferMut, BufferRef, Element, HostBuffer, Layout, MemoryLocator, StagingBuffer,
    StagingManager,
};
pub use transport::{LocalTransport, Transport};
pub use types::{DEFAULT_ROOT, DEFAULT_TAG, DataType, Rank, ReduceOp, Tag};

#[cfg(feature = "cuda")]
pub use device::CudaRuntime;

#[cfg(feature = "mpi")]
pub use transport::MpiTransport;
