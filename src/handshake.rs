//! Pre-session handshake: device authentication followed by key agreement.
//!
//! Both phases exchange plaintext JSON frames over the same [`Transport`]
//! the session will later reuse for AEAD traffic, following the same
//! command/response shape as the application's pairing exchange, but typed
//! with `serde` structs instead of a hand-rolled command enum.

use crate::crypto::CryptoContext;
use crate::device;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const STEP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake step timed out")]
    Timeout,
    #[error("peer rejected authentication: {0}")]
    Unauthorized(String),
    #[error("stored token was rejected; clearing it")]
    TokenInvalid,
    #[error("malformed handshake message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthRequest {
    identity: String,
    signature: String,
    first_time: bool,
    device_name: String,
    platform: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status")]
enum AuthResponse {
    #[serde(rename = "first_authorized")]
    FirstAuthorized { token: String },
    #[serde(rename = "authorized")]
    Authorized,
    #[serde(rename = "unauthorized")]
    Unauthorized { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum KeyExchangeMessage {
    #[serde(rename = "key_exchange_server")]
    Server { public_key: String },
    #[serde(rename = "key_exchange_client")]
    Client { public_key: String },
    #[serde(rename = "key_exchange_complete")]
    Complete { status: String },
}

async fn send_json<T: Serialize>(
    transport: &mut dyn Transport,
    value: &T,
) -> Result<(), HandshakeError> {
    let bytes = serde_json::to_vec(value).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    tokio::time::timeout(STEP_TIMEOUT, transport.send(bytes))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    Ok(())
}

async fn recv_json<T: for<'de> Deserialize<'de>>(
    transport: &mut dyn Transport,
) -> Result<T, HandshakeError> {
    let bytes = tokio::time::timeout(STEP_TIMEOUT, transport.recv())
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    serde_json::from_slice(&bytes).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

/// Decision a responder's pairing policy makes for a first-time device.
/// Injected so callers can gate pairing behind a UI prompt, an allowlist, or
/// auto-accept.
pub trait PairingPolicy: Send + Sync {
    fn accept_new_device(&self, identity: &str) -> bool;
}

pub struct AlwaysAccept;

impl PairingPolicy for AlwaysAccept {
    fn accept_new_device(&self, _identity: &str) -> bool {
        true
    }
}

/// Runs the initiator (participant) side of both handshake phases.
///
/// Returns a [`CryptoContext`] with the shared key already established, and
/// a new token to persist if pairing happened for the first time.
pub async fn run_initiator(
    transport: &mut dyn Transport,
    identity: &str,
    device_name: &str,
    platform: &str,
    stored_token: Option<&str>,
) -> Result<(CryptoContext, Option<String>), HandshakeError> {
    let first_time = stored_token.is_none();
    let signature = stored_token
        .map(|token| device::sign(token, identity))
        .unwrap_or_default();

    send_json(
        transport,
        &AuthRequest {
            identity: identity.to_string(),
            signature,
            first_time,
            device_name: device_name.to_string(),
            platform: platform.to_string(),
        },
    )
    .await?;

    let response: AuthResponse = recv_json(transport).await?;
    let new_token = match response {
        AuthResponse::FirstAuthorized { token } => Some(token),
        AuthResponse::Authorized => None,
        AuthResponse::Unauthorized { reason } => {
            // A rejection while reauthenticating with a stored token means
            // the peer no longer recognizes it (it was revoked, or the
            // peer's own state was reset); a rejection on first pairing
            // just means pairing was declined. Only the former should make
            // the caller clear its token store and re-pair from scratch.
            if stored_token.is_some() {
                return Err(HandshakeError::TokenInvalid);
            }
            return Err(HandshakeError::Unauthorized(reason));
        }
    };

    let key_exchange_server: KeyExchangeMessage = recv_json(transport).await?;
    let server_pem = match key_exchange_server {
        KeyExchangeMessage::Server { public_key } => public_key,
        _ => return Err(HandshakeError::Malformed("expected key_exchange_server".into())),
    };

    let ctx = CryptoContext::generate_pair();
    ctx.accept_peer(&server_pem)?;

    send_json(
        transport,
        &KeyExchangeMessage::Client {
            public_key: ctx.public_bytes(),
        },
    )
    .await?;

    let complete: KeyExchangeMessage = recv_json(transport).await?;
    match complete {
        KeyExchangeMessage::Complete { status } if status == "success" => Ok((ctx, new_token)),
        _ => Err(HandshakeError::Malformed("expected key_exchange_complete".into())),
    }
}

/// Runs the responder (coordinator) side of both handshake phases.
///
/// `known_token` is the token previously issued to this identity, if any.
/// Returns the established [`CryptoContext`] plus a freshly issued token
/// when this was a first-time pairing.
pub async fn run_responder(
    transport: &mut dyn Transport,
    known_token: Option<&str>,
    policy: &dyn PairingPolicy,
) -> Result<(CryptoContext, Option<String>), HandshakeError> {
    let request: AuthRequest = recv_json(transport).await?;

    let issued_token = if request.first_time {
        if policy.accept_new_device(&request.identity) {
            let token = generate_token();
            send_json(
                transport,
                &AuthResponse::FirstAuthorized {
                    token: token.clone(),
                },
            )
            .await?;
            Some(token)
        } else {
            send_json(
                transport,
                &AuthResponse::Unauthorized {
                    reason: "pairing declined".to_string(),
                },
            )
            .await?;
            return Err(HandshakeError::Unauthorized("pairing declined".to_string()));
        }
    } else {
        match known_token {
            Some(token) if device::verify(token, &request.identity, &request.signature) => {
                send_json(transport, &AuthResponse::Authorized).await?;
                None
            }
            Some(_) => {
                send_json(
                    transport,
                    &AuthResponse::Unauthorized {
                        reason: "token mismatch".to_string(),
                    },
                )
                .await?;
                return Err(HandshakeError::TokenInvalid);
            }
            None => {
                send_json(
                    transport,
                    &AuthResponse::Unauthorized {
                        reason: "unknown device".to_string(),
                    },
                )
                .await?;
                return Err(HandshakeError::Unauthorized("unknown device".to_string()));
            }
        }
    };

    let ctx = CryptoContext::generate_pair();
    send_json(
        transport,
        &KeyExchangeMessage::Server {
            public_key: ctx.public_bytes(),
        },
    )
    .await?;

    let key_exchange_client: KeyExchangeMessage = recv_json(transport).await?;
    let client_pem = match key_exchange_client {
        KeyExchangeMessage::Client { public_key } => public_key,
        _ => return Err(HandshakeError::Malformed("expected key_exchange_client".into())),
    };
    ctx.accept_peer(&client_pem)?;

    send_json(
        transport,
        &KeyExchangeMessage::Complete {
            status: "success".to_string(),
        },
    )
    .await?;

    Ok((ctx, issued_token))
}

fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    /// Drives the initiator and responder concurrently over a pair of
    /// channel-backed transports that actually shuttle bytes between them.
    async fn run_pair(
        stored_token: Option<String>,
        known_token: Option<String>,
    ) -> Result<
        (
            Result<(CryptoContext, Option<String>), HandshakeError>,
            Result<(CryptoContext, Option<String>), HandshakeError>,
        ),
        (),
    > {
        let (tx_a_to_b, rx_a_to_b) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let (tx_b_to_a, rx_b_to_a) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

        struct ChannelTransport {
            tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
            rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
        }

        #[async_trait::async_trait]
        impl Transport for ChannelTransport {
            async fn send(&mut self, bytes: Vec<u8>) -> Result<(), crate::transport::TransportError> {
                self.tx
                    .send(bytes)
                    .map_err(|_| crate::transport::TransportError::Closed)
            }
            async fn recv(&mut self) -> Result<Vec<u8>, crate::transport::TransportError> {
                self.rx.recv().await.ok_or(crate::transport::TransportError::Closed)
            }
            async fn close(&mut self) -> Result<(), crate::transport::TransportError> {
                Ok(())
            }
        }

        let mut initiator_transport = ChannelTransport {
            tx: tx_a_to_b,
            rx: rx_b_to_a,
        };
        let mut responder_transport = ChannelTransport {
            tx: tx_b_to_a,
            rx: rx_a_to_b,
        };
        let initiator = tokio::spawn(async move {
            run_initiator(
                &mut initiator_transport,
                "device-a",
                "Device A",
                "linux",
                stored_token.as_deref(),
            )
            .await
        });
        let responder = tokio::spawn(async move {
            run_responder(&mut responder_transport, known_token.as_deref(), &AlwaysAccept)
                .await
        });

        Ok((initiator.await.unwrap(), responder.await.unwrap()))
    }

    #[tokio::test]
    async fn first_time_pairing_establishes_shared_key_and_issues_token() {
        let (initiator_result, responder_result) = run_pair(None, None).await.unwrap();
        let (initiator_ctx, initiator_token) = initiator_result.unwrap();
        let (responder_ctx, responder_token) = responder_result.unwrap();

        assert!(initiator_ctx.has_shared());
        assert!(responder_ctx.has_shared());
        assert!(initiator_token.is_some());
        assert_eq!(initiator_token, responder_token);
    }

    #[tokio::test]
    async fn known_token_reauthenticates_without_issuing_a_new_one() {
        let token = "established-token".to_string();
        let (initiator_result, responder_result) =
            run_pair(Some(token.clone()), Some(token)).await.unwrap();

        let (_, initiator_token) = initiator_result.unwrap();
        let (_, responder_token) = responder_result.unwrap();
        assert_eq!(initiator_token, None);
        assert_eq!(responder_token, None);
    }

    #[tokio::test]
    async fn mismatched_token_is_rejected() {
        let (initiator_result, responder_result) = run_pair(
            Some("wrong-token".to_string()),
            Some("real-token".to_string()),
        )
        .await
        .unwrap();

        assert!(matches!(
            initiator_result.unwrap_err(),
            HandshakeError::TokenInvalid
        ));
        assert!(matches!(responder_result.unwrap_err(), HandshakeError::TokenInvalid));
    }
}
