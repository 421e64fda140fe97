//! clipshare-core: the synchronization engine behind a peer-to-peer clipboard
//! sharing service.
//!
//! This crate implements the seven cooperating components described in the
//! design: an encrypted-channel [`crypto`] context, a [`codec`] for typed
//! clipboard frames, a [`device`] identity/token store, a [`handshake`]
//! engine, a chunked [`transfer`] engine, a loop-suppressing [`arbiter`], and
//! a [`supervisor`] that ties transport lifecycle and reconnection together.
//!
//! The OS clipboard, peer discovery, and the transport's accept/connect step
//! are modeled as external collaborators via the traits in [`ports`]; this
//! crate ships no platform clipboard backend and no mDNS implementation.

pub mod arbiter;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod handshake;
pub mod ports;
pub mod supervisor;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::ClipshareError;
