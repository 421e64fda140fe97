//! Unified error type for the synchronization engine.
//!
//! Each component defines its own `thiserror`-derived error enum
//! (`CryptoError`, `ParseError`, `HandshakeError`, `TransferError`,
//! `TransportError`, `AdapterError`). This module collects them into a single
//! top-level error the [`crate::supervisor`] surfaces to callers, mirroring
//! the unified `AppError` pattern used at the outermost layer of the
//! application this engine was extracted from.

use crate::codec::ParseError;
use crate::crypto::CryptoError;
use crate::handshake::HandshakeError;
use crate::ports::AdapterError;
use crate::transfer::TransferError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClipshareError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("clipboard adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClipshareError>;
