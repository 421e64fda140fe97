//! Trait boundaries to the outside world.
//!
//! The engine never touches a platform clipboard API or an mDNS stack
//! directly. Instead it depends on these traits, the same way the desktop
//! application's `uc-core` crate keeps its domain logic independent of
//! concrete device/storage/network adapters. Callers embedding this crate
//! supply the implementations; none ship here.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("clipboard adapter unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard read failed: {0}")]
    Read(String),
    #[error("clipboard write failed: {0}")]
    Write(String),
    #[error("peer locator failed: {0}")]
    Locator(String),
}

/// A single snapshot of clipboard content, as read from or written to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Text(String),
    Files(Vec<std::path::PathBuf>),
}

/// Abstracts over the host's clipboard so the engine can be tested without a
/// display server and ported to a new OS by swapping one implementation.
#[async_trait]
pub trait ClipboardAdapter: Send + Sync {
    async fn read(&self) -> Result<Option<ClipboardContent>, AdapterError>;
    async fn write(&self, content: ClipboardContent) -> Result<(), AdapterError>;
}

/// A peer discovered on the local network, as handed to the supervisor by a
/// [`PeerLocator`] implementation (mDNS, a static list, a pairing exchange).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub device_id: String,
    pub addr: SocketAddr,
}

/// Discovers candidate peers. The engine does not implement any discovery
/// protocol itself; this is the seam a locator plugs into.
#[async_trait]
pub trait PeerLocator: Send + Sync {
    async fn locate(&self) -> Result<Vec<PeerAddr>, AdapterError>;
}

/// Injected time source so reconnect-schedule and loop-suppression logic can
/// be driven deterministically in tests instead of depending on wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
