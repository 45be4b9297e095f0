//! Concurrency substrate.
//!
//! - [`IoServicePool`]: N event loops, one OS thread each. Sockets are
//!   assigned round-robin when they are created and stay on that worker.
//! - [`LogicQueue`]: one thread draining a FIFO. Request handling and
//!   interleaved RTP writes are serialized through it.

pub mod io_pool;
pub mod logic;

pub use io_pool::{IoPoolHandle, IoServicePool, IoWorker};
pub use logic::{LogicQueue, LogicSender};
