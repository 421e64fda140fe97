//! Wire format for clipboard frames.
//!
//! A self-describing JSON encoding with a `type` discriminator, the same
//! shape as the application's `WebSocketMessage`/`ClipboardTransferMessage`
//! pair, but collapsed into one tagged enum per the simplified frame set.
//! Binary chunk payloads are embedded as base64 strings inside the JSON
//! object rather than sent as a separate binary frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("frame exceeds maximum size of {max} bytes (got {actual})")]
    TooLarge { max: u64, actual: u64 },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListEntry {
    pub filename: String,
    pub size: u64,
    pub path: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text {
        content: String,
    },
    FileList {
        entries: Vec<FileListEntry>,
    },
    FileRequest {
        filename: String,
        path: String,
        hash: String,
    },
    FileChunk {
        filename: String,
        chunk_index: u64,
        total_chunks: u64,
        chunk_bytes: Vec<u8>,
        chunk_digest: String,
        whole_file_digest: Option<String>,
    },
}

/// On-the-wire shape. Kept private: callers interact only with [`Frame`].
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum WireFrame {
    #[serde(rename = "TEXT")]
    Text { content: String },
    #[serde(rename = "FILE_LIST")]
    FileList { entries: Vec<WireFileListEntry> },
    #[serde(rename = "FILE_REQUEST")]
    FileRequest {
        filename: String,
        path: String,
        hash: String,
    },
    #[serde(rename = "FILE_CHUNK")]
    FileChunk {
        filename: String,
        chunk_index: u64,
        total_chunks: u64,
        #[serde(
            serialize_with = "serialize_bytes",
            deserialize_with = "deserialize_bytes"
        )]
        chunk_bytes: Vec<u8>,
        chunk_digest: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        whole_file_digest: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct WireFileListEntry {
    filename: String,
    size: u64,
    path: String,
    hash: String,
}

fn serialize_bytes<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn deserialize_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use base64::Engine;
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(serde::de::Error::custom)
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text { content } => WireFrame::Text { content },
            Frame::FileList { entries } => WireFrame::FileList {
                entries: entries
                    .into_iter()
                    .map(|e| WireFileListEntry {
                        filename: e.filename,
                        size: e.size,
                        path: e.path,
                        hash: e.hash,
                    })
                    .collect(),
            },
            Frame::FileRequest {
                filename,
                path,
                hash,
            } => WireFrame::FileRequest {
                filename,
                path,
                hash,
            },
            Frame::FileChunk {
                filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                chunk_digest,
                whole_file_digest,
            } => WireFrame::FileChunk {
                filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                chunk_digest,
                whole_file_digest,
            },
        }
    }
}

impl From<WireFrame> for Frame {
    fn from(wire: WireFrame) -> Self {
        match wire {
            WireFrame::Text { content } => Frame::Text { content },
            WireFrame::FileList { entries } => Frame::FileList {
                entries: entries
                    .into_iter()
                    .map(|e| FileListEntry {
                        filename: e.filename,
                        size: e.size,
                        path: e.path,
                        hash: e.hash,
                    })
                    .collect(),
            },
            WireFrame::FileRequest {
                filename,
                path,
                hash,
            } => Frame::FileRequest {
                filename,
                path,
                hash,
            },
            WireFrame::FileChunk {
                filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                chunk_digest,
                whole_file_digest,
            } => Frame::FileChunk {
                filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                chunk_digest,
                whole_file_digest,
            },
        }
    }
}

/// Serializes `frame` to its JSON wire form.
pub fn serialize(frame: Frame) -> Vec<u8> {
    let wire: WireFrame = frame.into();
    serde_json::to_vec(&wire).expect("Frame always serializes")
}

/// Parses a wire-format frame, enforcing the maximum decoded size.
pub fn parse(bytes: &[u8], max_frame_bytes: u64) -> Result<Frame, ParseError> {
    if bytes.len() as u64 > max_frame_bytes {
        return Err(ParseError::TooLarge {
            max: max_frame_bytes,
            actual: bytes.len() as u64,
        });
    }
    let wire: WireFrame = serde_json::from_slice(bytes)?;
    if let WireFrame::FileChunk {
        chunk_index,
        whole_file_digest,
        ..
    } = &wire
    {
        if *chunk_index == 0 && whole_file_digest.is_none() {
            return Err(ParseError::MissingField("whole_file_digest"));
        }
    }
    Ok(wire.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trips() {
        let frame = Frame::Text {
            content: "hello clipboard".to_string(),
        };
        let bytes = serialize(frame.clone());
        let parsed = parse(&bytes, 1024).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn file_chunk_round_trips_with_base64_body() {
        let frame = Frame::FileChunk {
            filename: "notes.txt".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_bytes: vec![1, 2, 3, 4, 5],
            chunk_digest: "abc123".to_string(),
            whole_file_digest: Some("def456".to_string()),
        };
        let bytes = serialize(frame.clone());
        let parsed = parse(&bytes, 1024).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn first_chunk_without_whole_file_digest_is_rejected() {
        let bytes = br#"{"type":"FILE_CHUNK","filename":"a","chunk_index":0,"total_chunks":2,"chunk_bytes":"AQ==","chunk_digest":"x"}"#;
        let err = parse(bytes, 1024).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("whole_file_digest")));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = Frame::Text {
            content: "x".repeat(100),
        };
        let bytes = serialize(frame);
        let err = parse(&bytes, 10).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let bytes = br#"{"type":"BOGUS"}"#;
        let err = parse(bytes, 1024).unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn invalid_base64_chunk_fails_to_parse() {
        let bytes = br#"{"type":"FILE_CHUNK","filename":"a","chunk_index":0,"total_chunks":1,"chunk_bytes":"not-base64!!","chunk_digest":"x","whole_file_digest":"y"}"#;
        let err = parse(bytes, 1024).unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }
}
