//! Cross-component scenarios that exercise the crypto, codec, and arbiter
//! pieces together the way a live session would chain them, without a real
//! transport or clipboard.

use clipshare::arbiter::{ArbiterState, ContentKind, Fingerprint, LocalDecision, RemoteDecision};
use clipshare::codec::{self, Frame};
use clipshare::crypto::CryptoContext;
use std::time::{Duration, SystemTime};

#[test]
fn text_round_trip_with_no_echo() {
    let _ = env_logger::builder().is_test(true).try_init();

    let alice = CryptoContext::generate_pair();
    let bob = CryptoContext::generate_pair();
    alice.accept_peer(&bob.public_bytes()).unwrap();
    bob.accept_peer(&alice.public_bytes()).unwrap();

    let mut a_arbiter = ArbiterState::new(Duration::from_millis(750), vec![]);
    let mut b_arbiter = ArbiterState::new(Duration::from_millis(750), vec![]);

    let now = SystemTime::now();
    let fp = Fingerprint::of_text("hello");
    let decision = a_arbiter.observe_local(ContentKind::Text, fp, Some("hello"), now);
    assert_eq!(decision, LocalDecision::Send);

    // A encrypts and sends the TEXT frame.
    let frame = Frame::Text {
        content: "hello".to_string(),
    };
    let plaintext = codec::serialize(frame);
    let record = alice.encrypt(&plaintext).unwrap();

    // B decrypts, parses, and applies.
    let decrypted = bob.decrypt(&record).unwrap();
    let parsed = codec::parse(&decrypted, 1024).unwrap();
    let content = match parsed {
        Frame::Text { content } => content,
        _ => panic!("expected Text frame"),
    };
    assert_eq!(content, "hello");

    let b_fp = Fingerprint::of_text(&content);
    let applied = b_arbiter.apply_remote(b_fp, now);
    assert_eq!(applied, RemoteDecision::Applied);

    // B's own clipboard write now looks like a local observation with the
    // identical fingerprint; it must not be re-sent back to A.
    let bounce_decision = b_arbiter.observe_local(ContentKind::Text, b_fp, Some("hello"), now);
    assert_ne!(bounce_decision, LocalDecision::Send);
}

#[test]
fn file_transfer_round_trip_with_duplicate_chunk() {
    use clipshare::transfer::{ReceiveEngine, ReceiveOutcome};

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("photo.bin");
    std::fs::write(&src, vec![9u8; 600 * 1024]).unwrap();

    let plan = clipshare::transfer::SendPlan::build(&[src]).unwrap();
    assert_eq!(plan.entries.len(), 1);
    let frames = plan.chunk_frames(256 * 1024).unwrap();
    assert_eq!(frames.len(), 3);

    let mut engine = ReceiveEngine::new(dir.path().to_path_buf());
    let mut last_outcome = None;
    for frame in &frames {
        if let Frame::FileChunk {
            filename,
            chunk_index,
            total_chunks,
            chunk_bytes,
            chunk_digest,
            whole_file_digest,
        } = frame.clone()
        {
            // Deliver chunk 1 twice to simulate a network retransmission.
            if chunk_index == 1 {
                engine.on_chunk(
                    &filename,
                    chunk_index,
                    total_chunks,
                    chunk_bytes.clone(),
                    &chunk_digest,
                    whole_file_digest.clone(),
                );
            }
            last_outcome = Some(engine.on_chunk(
                &filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                &chunk_digest,
                whole_file_digest,
            ));
        }
    }

    match last_outcome.unwrap() {
        ReceiveOutcome::Completed { digest, path, .. } => {
            assert_eq!(digest, plan.entries[0].hash);
            assert_eq!(std::fs::read(path).unwrap().len(), 600 * 1024);
        }
        _ => panic!("expected transfer to complete"),
    }
}

#[test]
fn large_file_waits_for_explicit_request() {
    use clipshare::transfer::{ReceiveEngine, ReceiveOutcome};

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.bin");
    std::fs::write(&src, vec![3u8; 10_000]).unwrap();

    let plan = clipshare::transfer::SendPlan::build(&[src]).unwrap();

    // Below the threshold: nothing is withheld.
    let all_frames = plan.chunk_frames_under(4096, 20_000).unwrap();
    assert_eq!(all_frames.len(), 3);

    // At a threshold below the file's size, auto-send yields nothing...
    let withheld = plan.chunk_frames_under(4096, 1024).unwrap();
    assert!(withheld.is_empty());

    // ...but the targeted lookup a FILE_REQUEST handler uses still works.
    let requested = plan.chunk_frames_for("big.bin", 4096).unwrap();
    assert_eq!(requested.len(), 3);

    let mut engine = ReceiveEngine::new(dir.path().to_path_buf());
    let mut last = None;
    for frame in &requested {
        if let Frame::FileChunk {
            filename,
            chunk_index,
            total_chunks,
            chunk_bytes,
            chunk_digest,
            whole_file_digest,
        } = frame.clone()
        {
            last = Some(engine.on_chunk(
                &filename,
                chunk_index,
                total_chunks,
                chunk_bytes,
                &chunk_digest,
                whole_file_digest,
            ));
        }
    }
    assert!(matches!(last.unwrap(), ReceiveOutcome::Completed { .. }));
}
