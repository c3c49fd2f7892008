mod buffer;
mod locator;
mod staging;

pub use buffer::{Buffer, BufferMut, BufferRef, Element, Layout};
pub use locator::MemoryLocator;
pub use staging::{HostBuffer, StagingBuffer, StagingManager};
