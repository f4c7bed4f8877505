//! Name-seeded port allocation.
//!
//! The allocator derives a deterministic seed port from a container name so
//! the same workspace lands on the same host port across restarts whenever
//! that port is still free. From the seed it probes upward one port at a time
//! and returns the first port that accepts a throwaway bind.
//!
//! A probe only proves the port was free at probe time. The listener is
//! released before the container engine binds the port, so callers must treat
//! a port conflict reported by the engine as retryable and allocate again.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace};

use crate::range::PortRange;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port between {seed} and {ceiling}")]
    Exhausted { seed: u16, ceiling: u16 },

    #[error("invalid port range: {0}")]
    InvalidRange(String),
}

/// Answers whether a host port can currently be bound.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding a TCP listener and dropping it immediately.
///
/// Any bind failure (`EADDRINUSE`, permission refusal, ...) counts as busy.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: IpAddr,
}

impl TcpProbe {
    pub fn new(host: IpAddr) -> Self {
        Self { host }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl PortProbe for TcpProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(self.host, port)).is_ok()
    }
}

/// Stable seed port for `name` inside `range`.
///
/// Seeds fall in the lower half of the range so that upward probing from any
/// seed still has at least half the range to work with.
pub fn seed_port(name: &str, range: &PortRange) -> u16 {
    let digest = Sha256::digest(name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(prefix);

    let window = (u64::from(range.ceiling) - u64::from(range.floor)) / 2 + 1;
    // hash % window < window <= ceiling - floor + 1, so this stays within u16
    range.floor + (hash % window) as u16
}

/// Hands out host ports for containers.
#[derive(Clone)]
pub struct PortAllocator {
    range: PortRange,
    probe: Arc<dyn PortProbe>,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// Allocator probing with real TCP binds on `host`.
    pub fn new(range: PortRange, host: IpAddr) -> Self {
        Self::with_probe(range, Arc::new(TcpProbe::new(host)))
    }

    pub fn with_probe(range: PortRange, probe: Arc<dyn PortProbe>) -> Self {
        Self { range, probe }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Find a free port for the container called `name`.
    ///
    /// `preferred` (usually the port the container was last bound to) is tried
    /// first when it lies in range. Ports in `exclude` are never returned;
    /// callers pass ports the engine already refused during this operation.
    pub fn allocate(
        &self,
        name: &str,
        preferred: Option<u16>,
        exclude: &[u16],
    ) -> Result<u16, PortError> {
        if let Some(port) = preferred {
            if self.range.contains(port) && !exclude.contains(&port) && self.probe.is_free(port) {
                debug!(name, port, "reusing preferred port");
                return Ok(port);
            }
        }

        let seed = seed_port(name, &self.range);
        for port in seed..=self.range.ceiling {
            if exclude.contains(&port) {
                continue;
            }
            if self.probe.is_free(port) {
                debug!(name, seed, port, "allocated port");
                return Ok(port);
            }
            trace!(name, port, "port busy, probing next");
        }

        Err(PortError::Exhausted {
            seed,
            ceiling: self.range.ceiling,
        })
    }
}
