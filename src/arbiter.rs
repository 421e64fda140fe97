//! Loop suppression: the invariant that keeps two peers from ping-ponging
//! the same clipboard content back and forth forever.
//!
//! Grounded in the dedup logic of `ClipboardTransferMessage::is_duplicate`
//! and `WebSocketMessage::is_duplicate`, generalized into explicit
//! local/remote fingerprint bookkeeping with a suppression window rather
//! than a single last-seen key.

use md5::{Digest, Md5};
use std::time::{Duration, SystemTime};

/// A content identifier used only for dedup; collisions in adversarial
/// input are not a security concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of_text(content: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(content.as_bytes());
        Fingerprint(hasher.finalize().into())
    }

    /// Digest over the sorted `(absolute_path, size, mtime)` triples of a
    /// file list. Per the pinned scheme, comparisons after a completed
    /// receive use the whole-file digest instead, not this fingerprint.
    pub fn of_file_list(mut entries: Vec<(String, u64, u64)>) -> Self {
        entries.sort();
        let mut hasher = Md5::new();
        for (path, size, mtime) in entries {
            hasher.update(path.as_bytes());
            hasher.update(size.to_le_bytes());
            hasher.update(mtime.to_le_bytes());
        }
        Fingerprint(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    FileList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Suppressed,
    Duplicate,
    Echo,
    TempPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDecision {
    Skip(SkipReason),
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    Ignore,
    Applied,
}

/// Per-session dedup state. One instance lives for the lifetime of a peer
/// connection.
pub struct ArbiterState {
    update_delay: Duration,
    temp_path_indicators: Vec<String>,
    last_local_fingerprint: Option<Fingerprint>,
    last_local_time: Option<SystemTime>,
    last_remote_fingerprint: Option<Fingerprint>,
    last_remote_time: Option<SystemTime>,
    suppress_until: Option<SystemTime>,
}

impl ArbiterState {
    pub fn new(update_delay: Duration, temp_path_indicators: Vec<String>) -> Self {
        Self {
            update_delay,
            temp_path_indicators,
            last_local_fingerprint: None,
            last_local_time: None,
            last_remote_fingerprint: None,
            last_remote_time: None,
            suppress_until: None,
        }
    }

    /// Returns true if `candidate_text` looks like a path inside this
    /// implementation's own scratch directory, which should never be
    /// echoed back out as clipboard text.
    fn looks_like_temp_path(&self, candidate_text: &str) -> bool {
        self.temp_path_indicators
            .iter()
            .any(|indicator| candidate_text.contains(indicator.as_str()))
    }

    pub fn observe_local(
        &mut self,
        kind: ContentKind,
        fingerprint: Fingerprint,
        raw_text: Option<&str>,
        now: SystemTime,
    ) -> LocalDecision {
        if let Some(suppress_until) = self.suppress_until {
            if now < suppress_until {
                return LocalDecision::Skip(SkipReason::Suppressed);
            }
        }
        if self.last_local_fingerprint == Some(fingerprint) {
            return LocalDecision::Skip(SkipReason::Duplicate);
        }
        if let (Some(remote_fp), Some(remote_time)) =
            (self.last_remote_fingerprint, self.last_remote_time)
        {
            if remote_fp == fingerprint {
                if let Ok(elapsed) = now.duration_since(remote_time) {
                    if elapsed < 2 * self.update_delay {
                        return LocalDecision::Skip(SkipReason::Echo);
                    }
                } else {
                    return LocalDecision::Skip(SkipReason::Echo);
                }
            }
        }
        if kind == ContentKind::Text {
            if let Some(text) = raw_text {
                if self.looks_like_temp_path(text) {
                    return LocalDecision::Skip(SkipReason::TempPath);
                }
            }
        }
        self.last_local_fingerprint = Some(fingerprint);
        self.last_local_time = Some(now);
        LocalDecision::Send
    }

    pub fn apply_remote(&mut self, fingerprint: Fingerprint, now: SystemTime) -> RemoteDecision {
        if self.last_local_fingerprint == Some(fingerprint) {
            return RemoteDecision::Ignore;
        }
        self.last_local_fingerprint = Some(fingerprint);
        self.last_local_time = Some(now);
        self.last_remote_fingerprint = Some(fingerprint);
        self.last_remote_time = Some(now);
        self.suppress_until = Some(now + self.update_delay);
        RemoteDecision::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ArbiterState {
        ArbiterState::new(Duration::from_millis(750), vec!["unipaste_files".to_string()])
    }

    #[test]
    fn first_observation_sends() {
        let mut s = state();
        let fp = Fingerprint::of_text("hello");
        let decision = s.observe_local(ContentKind::Text, fp, Some("hello"), SystemTime::now());
        assert_eq!(decision, LocalDecision::Send);
    }

    #[test]
    fn duplicate_local_observation_is_skipped() {
        let mut s = state();
        let fp = Fingerprint::of_text("hello");
        let now = SystemTime::now();
        assert_eq!(s.observe_local(ContentKind::Text, fp, Some("hello"), now), LocalDecision::Send);
        assert_eq!(
            s.observe_local(ContentKind::Text, fp, Some("hello"), now),
            LocalDecision::Skip(SkipReason::Duplicate)
        );
    }

    #[test]
    fn remote_apply_suppresses_immediate_local_echo() {
        let mut s = state();
        let fp = Fingerprint::of_text("from peer");
        let now = SystemTime::now();
        assert_eq!(s.apply_remote(fp, now), RemoteDecision::Applied);

        // The write we just performed should show up as a local observation
        // with the identical fingerprint; it must be suppressed, not resent.
        let decision = s.observe_local(ContentKind::Text, fp, Some("from peer"), now);
        assert_eq!(decision, LocalDecision::Skip(SkipReason::Suppressed));
    }

    #[test]
    fn applying_own_echo_remotely_is_ignored() {
        let mut s = state();
        let fp = Fingerprint::of_text("mine");
        let now = SystemTime::now();
        s.observe_local(ContentKind::Text, fp, Some("mine"), now);
        // A moment later the same content arrives back from the peer.
        let decision = s.apply_remote(fp, now + Duration::from_millis(10));
        assert_eq!(decision, RemoteDecision::Ignore);
    }

    #[test]
    fn echo_window_expires_after_two_update_delays() {
        let mut s = state();
        let fp = Fingerprint::of_text("from peer");
        let t0 = SystemTime::now();
        s.apply_remote(fp, t0);

        let later = t0 + Duration::from_millis(750 * 2) + Duration::from_millis(1);
        let decision = s.observe_local(ContentKind::Text, fp, Some("from peer"), later);
        assert_eq!(decision, LocalDecision::Send);
    }

    #[test]
    fn temp_path_text_is_rejected() {
        let mut s = state();
        let text = "/tmp/unipaste_files/received.txt";
        let fp = Fingerprint::of_text(text);
        let decision = s.observe_local(ContentKind::Text, fp, Some(text), SystemTime::now());
        assert_eq!(decision, LocalDecision::Skip(SkipReason::TempPath));
    }

    #[test]
    fn file_list_fingerprint_is_order_independent() {
        let a = Fingerprint::of_file_list(vec![
            ("/a".to_string(), 1, 100),
            ("/b".to_string(), 2, 200),
        ]);
        let b = Fingerprint::of_file_list(vec![
            ("/b".to_string(), 2, 200),
            ("/a".to_string(), 1, 100),
        ]);
        assert_eq!(a, b);
    }
}
