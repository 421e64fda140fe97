//! Chunked file transfer: sending local files, reassembling inbound
//! chunks, verifying integrity, and a content-addressed cache of completed
//! transfers.
//!
//! The stat-then-stream approach and the chunk/whole-file digest split
//! follow the application's content processor, generalized away from its
//! image-specific handling since that is out of scope here.

use crate::codec::{FileListEntry, Frame};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("chunk failed its digest check for {filename}#{chunk_index}")]
    BadChunk { filename: String, chunk_index: u64 },
    #[error("transfer for {0} is missing chunks and cannot be assembled")]
    MissingChunk(String),
    #[error("assembled file digest mismatch for {0}")]
    DigestMismatch(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes the SHA-256 digest of a byte slice, hex-encoded.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Streams a file once to compute its whole-file digest.
pub fn digest_file(path: &Path) -> Result<String, TransferError> {
    let bytes = std::fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

/// One outgoing file, already stat'd, ready to be chunked.
pub struct OutgoingFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// Builds the `FILE_LIST` entries and per-chunk frames for a batch of local
/// paths. Frames-only: the caller owns handing them to the encrypted send
/// path.
pub struct SendPlan {
    pub entries: Vec<FileListEntry>,
    files: Vec<OutgoingFile>,
}

impl SendPlan {
    /// Stats each path; missing or non-regular files are skipped.
    pub fn build(paths: &[PathBuf]) -> Result<Self, TransferError> {
        let mut files = Vec::new();
        let mut entries = Vec::new();
        for path in paths {
            let meta = match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());
            let hash = digest_file(path)?;
            entries.push(FileListEntry {
                filename: filename.clone(),
                size: meta.len(),
                path: path.to_string_lossy().to_string(),
                hash: hash.clone(),
            });
            files.push(OutgoingFile {
                path: path.clone(),
                filename,
                size: meta.len(),
            });
        }
        Ok(Self { entries, files })
    }

    /// Produces the `FILE_CHUNK` frames for every file in the plan, in
    /// order, ready to be sent after the `FILE_LIST` frame.
    pub fn chunk_frames(&self, chunk_size: u64) -> Result<Vec<Frame>, TransferError> {
        self.chunk_frames_under(chunk_size, u64::MAX)
    }

    /// Like [`Self::chunk_frames`], but only chunks files at or under
    /// `max_size`; larger files are left to be served later in response to an
    /// explicit `FILE_REQUEST` (§4.5.4).
    pub fn chunk_frames_under(&self, chunk_size: u64, max_size: u64) -> Result<Vec<Frame>, TransferError> {
        let mut frames = Vec::new();
        for file in &self.files {
            if file.size > max_size {
                continue;
            }
            frames.extend(chunk_one_file(&file.path, &file.filename, file.size, chunk_size)?);
        }
        Ok(frames)
    }

    /// Chunks a single file in the plan by filename, for responding to a
    /// targeted `FILE_REQUEST`.
    pub fn chunk_frames_for(&self, filename: &str, chunk_size: u64) -> Result<Vec<Frame>, TransferError> {
        match self.files.iter().find(|f| f.filename == filename) {
            Some(file) => chunk_one_file(&file.path, &file.filename, file.size, chunk_size),
            None => Ok(Vec::new()),
        }
    }
}

fn chunk_one_file(
    path: &Path,
    filename: &str,
    size: u64,
    chunk_size: u64,
) -> Result<Vec<Frame>, TransferError> {
    let bytes = std::fs::read(path)?;
    let whole_file_digest = digest_bytes(&bytes);
    let total_chunks = size.div_ceil(chunk_size).max(1);
    let mut frames = Vec::with_capacity(total_chunks as usize);
    for i in 0..total_chunks {
        let start = (i * chunk_size) as usize;
        let end = ((i + 1) * chunk_size).min(size) as usize;
        let chunk = &bytes[start..end];
        frames.push(Frame::FileChunk {
            filename: filename.to_string(),
            chunk_index: i,
            total_chunks,
            chunk_bytes: chunk.to_vec(),
            chunk_digest: digest_bytes(chunk),
            whole_file_digest: if i == 0 {
                Some(whole_file_digest.clone())
            } else {
                None
            },
        });
    }
    Ok(frames)
}

/// State of one in-progress inbound file, keyed by filename in the owning
/// [`ReceiveEngine`].
struct InboundTransfer {
    expected_chunks: u64,
    expected_digest: Option<String>,
    received: BTreeMap<u64, Vec<u8>>,
    destination_path: PathBuf,
}

pub enum ReceiveOutcome {
    InProgress,
    Completed { filename: String, path: PathBuf, digest: String },
    Failed { filename: String, error: TransferError },
}

/// Reassembles inbound chunk streams and owns the destination directory
/// files land in.
pub struct ReceiveEngine {
    dest_dir: PathBuf,
    transfers: HashMap<String, InboundTransfer>,
}

impl ReceiveEngine {
    pub fn new(dest_dir: PathBuf) -> Self {
        Self {
            dest_dir,
            transfers: HashMap::new(),
        }
    }

    pub fn on_chunk(
        &mut self,
        filename: &str,
        chunk_index: u64,
        total_chunks: u64,
        chunk_bytes: Vec<u8>,
        chunk_digest: &str,
        whole_file_digest: Option<String>,
    ) -> ReceiveOutcome {
        if digest_bytes(&chunk_bytes) != chunk_digest {
            log::warn!("dropping chunk {chunk_index} of {filename}: digest mismatch");
            return ReceiveOutcome::InProgress;
        }

        if !self.transfers.contains_key(filename) {
            let destination_path = self.dest_dir.join(filename);
            if destination_path.exists() {
                let _ = std::fs::remove_file(&destination_path);
            }
            self.transfers.insert(
                filename.to_string(),
                InboundTransfer {
                    expected_chunks: total_chunks,
                    expected_digest: None,
                    received: BTreeMap::new(),
                    destination_path,
                },
            );
        }

        let transfer = self.transfers.get_mut(filename).unwrap();
        if chunk_index == 0 {
            if let Some(digest) = whole_file_digest {
                transfer.expected_digest = Some(digest);
            }
        }
        transfer.received.entry(chunk_index).or_insert(chunk_bytes);

        if transfer.received.len() as u64 != transfer.expected_chunks {
            return ReceiveOutcome::InProgress;
        }

        let transfer = self.transfers.remove(filename).unwrap();
        self.assemble(filename, transfer)
    }

    fn assemble(&self, filename: &str, transfer: InboundTransfer) -> ReceiveOutcome {
        let mut assembled = Vec::new();
        for i in 0..transfer.expected_chunks {
            match transfer.received.get(&i) {
                Some(bytes) => assembled.extend_from_slice(bytes),
                None => {
                    log::warn!("abandoning transfer of {filename}: chunk {i} never arrived");
                    return ReceiveOutcome::Failed {
                        filename: filename.to_string(),
                        error: TransferError::MissingChunk(filename.to_string()),
                    }
                }
            }
        }

        if let Some(expected) = &transfer.expected_digest {
            let actual = digest_bytes(&assembled);
            if &actual != expected {
                log::warn!("abandoning transfer of {filename}: whole-file digest mismatch");
                return ReceiveOutcome::Failed {
                    filename: filename.to_string(),
                    error: TransferError::DigestMismatch(filename.to_string()),
                };
            }
        }

        if let Err(e) = std::fs::write(&transfer.destination_path, &assembled) {
            return ReceiveOutcome::Failed {
                filename: filename.to_string(),
                error: TransferError::Io(e),
            };
        }

        ReceiveOutcome::Completed {
            filename: filename.to_string(),
            path: transfer.destination_path,
            digest: transfer
                .expected_digest
                .unwrap_or_else(|| digest_bytes(&assembled)),
        }
    }
}

/// Persistent digest-to-path mapping, reloaded at startup. A corrupt or
/// missing cache file is treated as empty rather than a fatal error.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct FileCache {
    #[serde(flatten)]
    entries: HashMap<String, PathBuf>,
}

impl FileCache {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(&self.entries).unwrap_or_default();
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn insert(&mut self, digest: String, path: PathBuf) {
        self.entries.insert(digest, path);
    }

    /// Looks up `digest`, dropping the entry if the referenced path no
    /// longer exists.
    pub fn lookup(&mut self, digest: &str) -> Option<PathBuf> {
        match self.entries.get(digest) {
            Some(path) if path.exists() => Some(path.clone()),
            Some(_) => {
                self.entries.remove(digest);
                None
            }
            None => None,
        }
    }
}

/// Determines whether a file advertised in a `FILE_LIST` should trigger a
/// `FILE_REQUEST`: true when its digest isn't already in the cache.
pub fn should_request(cache: &mut FileCache, entry: &FileListEntry) -> bool {
    cache.lookup(&entry.hash).is_none()
}
