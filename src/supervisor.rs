//! Session lifecycle: connect, run sender/receiver tasks while connected,
//! and reconnect on an escalating schedule after any disconnect.
//!
//! Grounded in the connection manager's broadcast-and-reconnect shape,
//! generalized into an explicit state machine plus a fixed backoff
//! schedule instead of an ad hoc retry loop.

use crate::arbiter::{ArbiterState, ContentKind, Fingerprint, LocalDecision, RemoteDecision};
use crate::codec::{self, Frame};
use crate::config::Config;
use crate::crypto::CryptoContext;
use crate::ports::{Clock, ClipboardAdapter, ClipboardContent};
use crate::transfer::{should_request, FileCache, ReceiveEngine, SendPlan};
use crate::transport::Transport;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Filenames this session has advertised, mapped back to their local path so
/// a later `FILE_REQUEST` for a file outside the auto-send threshold can
/// still be served.
type LocalFileIndex = Arc<Mutex<HashMap<String, PathBuf>>>;

/// The fixed reconnect backoff schedule; after the last entry, the delay
/// holds at its final value forever until a successful handshake resets it.
pub const RECONNECT_SCHEDULE_SECS: [u64; 5] = [15, 30, 60, 180, 300];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tracks position in [`RECONNECT_SCHEDULE_SECS`], advancing on failure and
/// resetting to the start on a successful handshake.
pub struct ReconnectPolicy {
    index: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { index: 0 }
    }
}

impl ReconnectPolicy {
    pub fn current_delay(&self) -> Duration {
        let secs = RECONNECT_SCHEDULE_SECS[self.index.min(RECONNECT_SCHEDULE_SECS.len() - 1)];
        Duration::from_secs(secs)
    }

    pub fn advance(&mut self) {
        if self.index < RECONNECT_SCHEDULE_SECS.len() - 1 {
            self.index += 1;
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Drives one peer session's sender loop: observes the clipboard, consults
/// the arbiter, and writes frames through the encrypted transport.
pub async fn run_sender(
    transport: Arc<Mutex<dyn Transport>>,
    crypto: Arc<CryptoContext>,
    arbiter: Arc<Mutex<ArbiterState>>,
    clipboard: Arc<dyn ClipboardAdapter>,
    clock: Arc<dyn Clock>,
    config: Config,
    local_index: LocalFileIndex,
) -> Result<(), crate::error::ClipshareError> {
    let mut interval = tokio::time::interval(config.clipboard_check_interval());
    loop {
        interval.tick().await;
        let Some(content) = clipboard.read().await? else {
            continue;
        };
        match content {
            ClipboardContent::Text(text) => {
                let fingerprint = Fingerprint::of_text(&text);
                let decision = {
                    let mut guard = arbiter.lock().await;
                    guard.observe_local(ContentKind::Text, fingerprint, Some(&text), clock.now())
                };
                if let LocalDecision::Send = decision {
                    send_frame(&transport, &crypto, Frame::Text { content: text }).await?;
                }
            }
            ClipboardContent::Files(paths) => {
                let triples: Vec<(String, u64, u64)> = paths
                    .iter()
                    .filter_map(|p| {
                        let meta = std::fs::metadata(p).ok()?;
                        let mtime = meta
                            .modified()
                            .ok()?
                            .duration_since(std::time::UNIX_EPOCH)
                            .ok()?
                            .as_secs();
                        Some((p.to_string_lossy().to_string(), meta.len(), mtime))
                    })
                    .collect();
                let fingerprint = Fingerprint::of_file_list(triples);
                let decision = {
                    let mut guard = arbiter.lock().await;
                    guard.observe_local(ContentKind::FileList, fingerprint, None, clock.now())
                };
                if let LocalDecision::Send = decision {
                    let plan = SendPlan::build(&paths)?;
                    {
                        let mut index = local_index.lock().await;
                        for entry in &plan.entries {
                            index.insert(entry.filename.clone(), PathBuf::from(&entry.path));
                        }
                    }
                    send_frame(
                        &transport,
                        &crypto,
                        Frame::FileList {
                            entries: plan.entries.clone(),
                        },
                    )
                    .await?;
                    // Only files at or under the auto-send threshold stream
                    // immediately; larger files wait for an explicit
                    // FILE_REQUEST (§4.5.4).
                    let frames =
                        plan.chunk_frames_under(config.chunk_size_bytes, config.max_file_size_auto)?;
                    for frame in frames {
                        send_frame(&transport, &crypto, frame).await?;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    transport: &Arc<Mutex<dyn Transport>>,
    crypto: &Arc<CryptoContext>,
    frame: Frame,
) -> Result<(), crate::error::ClipshareError> {
    let plaintext = codec::serialize(frame);
    let record = crypto.encrypt(&plaintext)?;
    transport.lock().await.send(record).await?;
    Ok(())
}

/// Events the receiver surfaces to whatever drives file-request policy and
/// the clipboard adapter. Kept separate from [`Frame`] so a caller doesn't
/// need to know about the wire format.
pub enum InboundEvent {
    TextApplied(String),
    FileListAdvertised(Vec<crate::codec::FileListEntry>),
    FileCompleted { filename: String, path: std::path::PathBuf, digest: String },
    FileRequested { filename: String },
}

/// Drives one peer session's receive loop: reads frames, decrypts them,
/// and dispatches by type to the arbiter or the file transfer engine.
pub async fn run_receiver(
    transport: Arc<Mutex<dyn Transport>>,
    crypto: Arc<CryptoContext>,
    arbiter: Arc<Mutex<ArbiterState>>,
    clipboard: Arc<dyn ClipboardAdapter>,
    receive_engine: Arc<Mutex<ReceiveEngine>>,
    cache: Arc<Mutex<FileCache>>,
    clock: Arc<dyn Clock>,
    config: Config,
    local_index: LocalFileIndex,
    mut on_event: impl FnMut(InboundEvent),
) -> Result<(), crate::error::ClipshareError> {
    let max_frame_bytes = config.max_frame_bytes;
    loop {
        let record = transport.lock().await.recv().await?;
        let plaintext = match crypto.decrypt(&record) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let frame = match codec::parse(&plaintext, max_frame_bytes) {
            Ok(frame) => frame,
            Err(_) => continue,
        };

        match frame {
            Frame::Text { content } => {
                let fingerprint = Fingerprint::of_text(&content);
                let decision = {
                    let mut guard = arbiter.lock().await;
                    guard.apply_remote(fingerprint, clock.now())
                };
                if let RemoteDecision::Applied = decision {
                    clipboard
                        .write(ClipboardContent::Text(content.clone()))
                        .await?;
                    on_event(InboundEvent::TextApplied(content));
                }
            }
            Frame::FileList { entries } => {
                for entry in &entries {
                    let wants_it = should_request(&mut *cache.lock().await, entry);
                    if wants_it {
                        send_frame(
                            &transport,
                            &crypto,
                            Frame::FileRequest {
                                filename: entry.filename.clone(),
                                path: entry.path.clone(),
                                hash: entry.hash.clone(),
                            },
                        )
                        .await?;
                    }
                }
                on_event(InboundEvent::FileListAdvertised(entries));
            }
            Frame::FileRequest { filename, .. } => {
                let local_path = local_index.lock().await.get(&filename).cloned();
                match local_path {
                    Some(path) => {
                        let plan = SendPlan::build(&[path])?;
                        for frame in plan.chunk_frames_for(&filename, config.chunk_size_bytes)? {
                            send_frame(&transport, &crypto, frame).await?;
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                    None => {
                        log::warn!("ignoring FILE_REQUEST for unknown file {filename}");
                    }
                }
                on_event(InboundEvent::FileRequested { filename });
            }
            Frame::FileChunk {
                filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                chunk_digest,
                whole_file_digest,
            } => {
                let outcome = {
                    let mut guard = receive_engine.lock().await;
                    guard.on_chunk(
                        &filename,
                        chunk_index,
                        total_chunks,
                        chunk_bytes,
                        &chunk_digest,
                        whole_file_digest,
                    )
                };
                match outcome {
                    crate::transfer::ReceiveOutcome::Completed { filename, path, digest } => {
                        cache.lock().await.insert(digest.clone(), path.clone());
                        on_event(InboundEvent::FileCompleted { filename, path, digest });
                    }
                    crate::transfer::ReceiveOutcome::Failed { .. } => {}
                    crate::transfer::ReceiveOutcome::InProgress => {}
                }
            }
        }
    }
}

use crate::device::{DeviceId, TokenStore};
use crate::handshake::{self, AlwaysAccept, PairingPolicy};
use crate::ports::PeerLocator;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Connects to a located peer, runs the full handshake, then keeps the
/// session alive by racing the sender and receiver tasks, reconnecting on
/// an escalating schedule whenever either one ends.
pub struct SessionSupervisor {
    device_id: DeviceId,
    device_name: String,
    platform: String,
    token_store: TokenStore,
    pairing_policy: Box<dyn PairingPolicy>,
    config: Config,
    running: Arc<AtomicBool>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<SessionState>,
}

impl SessionSupervisor {
    pub fn new(
        device_id: DeviceId,
        device_name: String,
        platform: String,
        token_store: TokenStore,
        config: Config,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            device_id,
            device_name,
            platform,
            token_store,
            pairing_policy: Box::new(AlwaysAccept),
            config,
            running: Arc::new(AtomicBool::new(true)),
            policy: ReconnectPolicy::default(),
            state_tx,
        }
    }

    /// A handle that, when dropped to `false`, makes the next connect
    /// attempt and in-flight wait abort rather than reconnecting.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Subscribes to state-machine transitions (§4.7.1).
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    /// Runs the participant side: locate a peer, connect, handshake, serve
    /// the session, and reconnect per the escalating schedule until
    /// shutdown is requested.
    pub async fn run_participant(
        &mut self,
        locator: Arc<dyn PeerLocator>,
        clipboard: Arc<dyn ClipboardAdapter>,
        clock: Arc<dyn Clock>,
        cache_path: std::path::PathBuf,
        dest_dir: std::path::PathBuf,
    ) {
        while self.running.load(Ordering::SeqCst) {
            self.set_state(SessionState::Connecting);
            let peers = match locator.locate().await {
                Ok(peers) => peers,
                Err(_) => Vec::new(),
            };
            let Some(peer) = peers.into_iter().next() else {
                self.set_state(SessionState::Disconnected);
                self.wait_before_retry().await;
                continue;
            };

            let url = format!("ws://{}", peer.addr);
            let transport = match crate::transport::WebSocketTransport::connect(&url).await {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("connect to {url} failed: {e}, retrying in {:?}", self.policy.current_delay());
                    self.set_state(SessionState::Disconnected);
                    self.wait_before_retry().await;
                    continue;
                }
            };
            let transport: Arc<Mutex<dyn Transport>> = Arc::new(Mutex::new(transport));

            let stored_token = self.token_store.load();
            let handshake_result = {
                let mut guard = transport.lock().await;
                handshake::run_initiator(
                    &mut *guard,
                    &self.device_id.0,
                    &self.device_name,
                    &self.platform,
                    stored_token.as_deref(),
                )
                .await
            };

            let (crypto, new_token) = match handshake_result {
                Ok(pair) => pair,
                Err(handshake::HandshakeError::TokenInvalid) => {
                    log::warn!("stored token rejected by peer, clearing it and re-pairing");
                    let _ = self.token_store.invalidate();
                    self.set_state(SessionState::Disconnected);
                    self.wait_before_retry().await;
                    continue;
                }
                Err(e) => {
                    log::warn!("handshake failed: {e}, retrying in {:?}", self.policy.current_delay());
                    self.set_state(SessionState::Disconnected);
                    self.wait_before_retry().await;
                    continue;
                }
            };
            if let Some(token) = new_token {
                let _ = self.token_store.store(&token);
            }

            self.set_state(SessionState::Connected);
            self.policy.reset();

            self.serve_session(
                transport,
                Arc::new(crypto),
                clipboard.clone(),
                clock.clone(),
                cache_path.clone(),
                dest_dir.clone(),
            )
            .await;

            self.set_state(SessionState::Disconnected);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.wait_before_retry().await;
        }
    }

    /// Runs the coordinator side: bind, accept inbound connections, and for
    /// each one run the responder handshake and serve the session, reusing
    /// the same sender/receiver wiring [`Self::run_participant`] uses. Runs
    /// until shutdown is requested or the listener itself fails.
    pub async fn run_coordinator(
        &mut self,
        clipboard: Arc<dyn ClipboardAdapter>,
        clock: Arc<dyn Clock>,
        cache_path: std::path::PathBuf,
        dest_dir: std::path::PathBuf,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.default_port)).await?;
        log::info!("coordinator listening on {}", listener.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            let running = self.running.clone();
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = async {
                    while running.load(Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                } => break,
            };
            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    continue;
                }
            };

            let transport = match crate::transport::WebSocketTransport::accept(stream).await {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("websocket upgrade from {peer_addr} failed: {e}");
                    continue;
                }
            };
            let transport: Arc<Mutex<dyn Transport>> = Arc::new(Mutex::new(transport));

            let known_token = self.token_store.load();
            let handshake_result = {
                let mut guard = transport.lock().await;
                handshake::run_responder(
                    &mut *guard,
                    known_token.as_deref(),
                    self.pairing_policy.as_ref(),
                )
                .await
            };

            let (crypto, new_token) = match handshake_result {
                Ok(pair) => pair,
                Err(handshake::HandshakeError::TokenInvalid) => {
                    log::warn!("rejected reauth from {peer_addr}, clearing stored token");
                    let _ = self.token_store.invalidate();
                    continue;
                }
                Err(e) => {
                    log::warn!("handshake with {peer_addr} failed: {e}");
                    continue;
                }
            };
            if let Some(token) = new_token {
                let _ = self.token_store.store(&token);
            }

            self.set_state(SessionState::Connected);
            self.policy.reset();

            self.serve_session(
                transport,
                Arc::new(crypto),
                clipboard.clone(),
                clock.clone(),
                cache_path.clone(),
                dest_dir.clone(),
            )
            .await;

            self.set_state(SessionState::Disconnected);
        }
        Ok(())
    }

    /// Runs the sender/receiver tasks for one already-handshaked session
    /// until either ends or shutdown is requested. Shared by both the
    /// participant and coordinator entry points.
    pub async fn serve_session(
        &self,
        transport: Arc<Mutex<dyn Transport>>,
        crypto: Arc<CryptoContext>,
        clipboard: Arc<dyn ClipboardAdapter>,
        clock: Arc<dyn Clock>,
        cache_path: std::path::PathBuf,
        dest_dir: std::path::PathBuf,
    ) {
        let arbiter = Arc::new(Mutex::new(ArbiterState::new(
            self.config.update_delay(),
            self.config.temp_path_indicators.clone(),
        )));
        let receive_engine = Arc::new(Mutex::new(ReceiveEngine::new(dest_dir)));
        let cache = Arc::new(Mutex::new(FileCache::load(&cache_path)));
        let local_index: LocalFileIndex = Arc::new(Mutex::new(HashMap::new()));

        let sender = tokio::spawn({
            let transport = transport.clone();
            let crypto = crypto.clone();
            let arbiter = arbiter.clone();
            let clipboard = clipboard.clone();
            let clock = clock.clone();
            let config = self.config.clone();
            let local_index = local_index.clone();
            async move {
                run_sender(transport, crypto, arbiter, clipboard, clock, config, local_index).await
            }
        });

        let config = self.config.clone();
        let cache_for_receiver = cache.clone();
        let receiver = tokio::spawn(async move {
            run_receiver(
                transport,
                crypto,
                arbiter,
                clipboard,
                receive_engine,
                cache_for_receiver,
                clock,
                config,
                local_index,
                |_event| {},
            )
            .await
        });

        let sender_abort = sender.abort_handle();
        let receiver_abort = receiver.abort_handle();
        let running = self.running.clone();

        tokio::select! {
            res = sender => {
                receiver_abort.abort();
                if let Ok(Err(e)) = res {
                    log::error!("sender task ended abnormally: {e}");
                }
            }
            res = receiver => {
                sender_abort.abort();
                if let Ok(Err(e)) = res {
                    log::error!("receiver task ended abnormally: {e}");
                }
            }
            _ = async {
                while running.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            } => {
                log::info!("shutdown requested, tearing down active session");
                sender_abort.abort();
                receiver_abort.abort();
            }
        }

        if let Err(e) = cache.lock().await.persist(&cache_path) {
            log::warn!("failed to persist file cache: {e}");
        }
    }

    async fn wait_before_retry(&mut self) {
        let delay = self.policy.current_delay();
        self.policy.advance();
        let running = self.running.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                while running.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            } => {}
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
