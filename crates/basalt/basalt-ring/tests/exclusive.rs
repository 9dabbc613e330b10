//! Exclusive ring handoff between one producer and one reader.
//!
//! ```bash
//! cargo test -p basalt-ring --test exclusive -- --nocapture
//! ```

use basalt_ring::{ConsumeError, ExclusiveState, PublishError, RingConfig, exclusive};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SLOT: usize = 64;

fn seq_of(payload: &[u8]) -> u64 {
    u64::from_le_bytes(payload[..8].try_into().unwrap())
}

#[test]
fn delivers_in_order_exactly_once() {
    let (mut tx, mut rx) = exclusive::channel::<SLOT>(RingConfig::new(4));
    let mut out = [0u8; SLOT];

    for round in 0..5u64 {
        for i in 0..4u64 {
            tx.publish_bytes(&(round * 4 + i).to_le_bytes()).unwrap();
        }
        for i in 0..4u64 {
            assert_eq!(rx.try_consume(&mut out), Ok(Some(8)));
            assert_eq!(seq_of(&out), round * 4 + i);
        }
        assert_eq!(rx.try_consume(&mut out), Ok(None));
    }
    assert_eq!(tx.overwritten(), 0);
    assert_eq!(rx.skipped(), 0);
}

#[test]
fn oversize_publish_leaves_slot_untouched() {
    let (mut tx, mut rx) = exclusive::channel::<SLOT>(RingConfig::new(2));

    let res = tx.publish_bytes(&[0u8; SLOT + 8]);
    assert_eq!(
        res,
        Err(PublishError::Oversize {
            requested: SLOT + 8,
            capacity: SLOT
        })
    );
    assert_eq!(tx.published(), 0);
    assert_eq!(tx.slot_state(0), ExclusiveState::Idle);

    assert_eq!(tx.publish_bytes(b"fits"), Ok(0));
    let mut out = [0u8; SLOT];
    assert_eq!(rx.try_consume(&mut out), Ok(Some(4)));
    assert_eq!(&out[..4], b"fits");
}

#[test]
fn producer_backs_off_from_a_slot_being_read() {
    let (mut tx, mut rx) = exclusive::channel::<SLOT>(RingConfig::new(1));
    tx.publish_bytes(b"first").unwrap();

    let mut attempt = None;
    let consumed = rx
        .try_consume_with(|payload| {
            // The reader holds the slot: the producer must not overwrite it.
            attempt = Some(tx.publish_bytes(b"second"));
            Ok::<_, ()>(payload.to_vec())
        })
        .unwrap();

    assert_eq!(consumed.as_deref(), Some(&b"first"[..]));
    assert_eq!(attempt, Some(Err(PublishError::Contention { index: 0 })));
    assert_eq!(tx.published(), 1);

    // The retry goes to the same slot and is delivered.
    assert_eq!(tx.publish_bytes(b"second"), Ok(1));
    let mut out = [0u8; SLOT];
    assert_eq!(rx.try_consume(&mut out), Ok(Some(6)));
    assert_eq!(&out[..6], b"second");
}

/// Producer paced so it never laps the reader: every message arrives once,
/// in order, with no reclaims.
#[test]
fn threaded_handoff_is_lossless_when_reader_keeps_pace() {
    const TOTAL: u64 = 100_000;
    const CAPACITY: usize = 16;

    let (mut tx, mut rx) = exclusive::channel::<SLOT>(RingConfig::new(CAPACITY));
    let consumed = Arc::new(AtomicU64::new(0));

    std::thread::scope(|s| {
        let progress = consumed.clone();
        let reader = s.spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            let mut out = [0u8; SLOT];
            let mut expected = 0u64;
            while expected < TOTAL {
                assert!(Instant::now() < deadline, "reader stalled at {expected}");
                match rx.try_consume(&mut out) {
                    Ok(Some(n)) => {
                        assert_eq!(n, 8);
                        assert_eq!(seq_of(&out), expected, "duplicate or missing message");
                        expected += 1;
                        progress.store(expected, Ordering::Release);
                    }
                    Ok(None) | Err(ConsumeError::Contention { .. }) => std::hint::spin_loop(),
                    Err(e) => panic!("unexpected consume error: {e}"),
                }
            }
            rx.skipped()
        });

        let mut seq = 0u64;
        while seq < TOTAL {
            if seq - consumed.load(Ordering::Acquire) >= CAPACITY as u64 {
                std::hint::spin_loop();
                continue;
            }
            match tx.publish_bytes(&seq.to_le_bytes()) {
                Ok(published) => {
                    assert_eq!(published, seq);
                    seq += 1;
                }
                Err(PublishError::Contention { .. }) => std::hint::spin_loop(),
                Err(e) => panic!("unexpected publish error: {e}"),
            }
        }

        assert_eq!(reader.join().unwrap(), 0);
    });
    assert_eq!(tx.overwritten(), 0);
}

/// Unpaced producer on a tiny ring: contention on both sides is frequent.
/// The reader must only ever see real, increasing sequences, and everything
/// it did not receive must be accounted for as skipped.
#[test]
fn contended_handoff_never_yields_phantom_messages() {
    const TOTAL: u64 = 50_000;

    let (mut tx, mut rx) = exclusive::channel::<SLOT>(RingConfig::new(2));
    let done = Arc::new(AtomicU64::new(0));

    std::thread::scope(|s| {
        let finished = done.clone();
        let reader = s.spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            let mut out = [0u8; SLOT];
            let mut received = 0u64;
            let mut contention = 0u64;
            let mut last: Option<u64> = None;
            loop {
                assert!(Instant::now() < deadline, "reader stalled at {}", rx.cursor());
                match rx.try_consume(&mut out) {
                    Ok(Some(_)) => {
                        let seq = seq_of(&out);
                        assert_eq!(seq, rx.cursor() - 1, "payload from another sequence");
                        if let Some(prev) = last {
                            assert!(seq > prev, "sequence went backwards: {prev} -> {seq}");
                        }
                        last = Some(seq);
                        received += 1;
                    }
                    Ok(None) => {
                        if finished.load(Ordering::Acquire) == 1 && rx.cursor() == TOTAL {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                    Err(ConsumeError::Contention { .. }) => contention += 1,
                    Err(e) => panic!("unexpected consume error: {e}"),
                }
            }
            (received, rx.skipped(), contention)
        });

        let mut seq = 0u64;
        while seq < TOTAL {
            match tx.publish_bytes(&seq.to_le_bytes()) {
                Ok(_) => seq += 1,
                Err(PublishError::Contention { .. }) => std::hint::spin_loop(),
                Err(e) => panic!("unexpected publish error: {e}"),
            }
        }
        done.store(1, Ordering::Release);

        let (received, skipped, _contention) = reader.join().unwrap();
        assert_eq!(received + skipped, TOTAL);
        assert!(received >= 2, "the last lap is always delivered");
    });
}
