//! Host port allocation library.
//!
//! Containers publish their code-server port on a host TCP port. This crate
//! picks that port: a stable hash of the container name gives a seed inside a
//! configured range, and the allocator probes upward from the seed until it
//! finds a port nobody is listening on.

pub mod allocator;
pub mod range;

pub use allocator::{seed_port, PortAllocator, PortError, PortProbe, TcpProbe};
pub use range::PortRange;
