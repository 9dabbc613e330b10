//! Broadcast ring behaviour across threads and readers.
//!
//! ```bash
//! cargo test -p basalt-ring --test broadcast -- --nocapture
//! ```

use basalt_ring::{BroadcastState, BroadcastWriter, ConsumeError, PublishError, ReadStatus, RingConfig};
use std::convert::Infallible;
use std::time::{Duration, Instant};

const SLOT: usize = 64;

/// Payload for `seq`: the sequence number followed by a seq-derived fill
/// byte, with a seq-derived length. Any mix of two publishes is detectable.
fn encode(seq: u64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&seq.to_le_bytes());
    buf[8..].fill((seq as u8) ^ 0x5A);
}

fn encoded_len(seq: u64) -> usize {
    8 + (seq % (SLOT as u64 - 7)) as usize
}

fn assert_consistent(expected_seq: u64, payload: &[u8]) {
    let seq = u64::from_le_bytes(payload[..8].try_into().unwrap());
    assert_eq!(seq, expected_seq, "payload belongs to another sequence");
    assert_eq!(payload.len(), encoded_len(seq), "size from another publish");
    let fill = (seq as u8) ^ 0x5A;
    assert!(payload[8..].iter().all(|&b| b == fill), "torn payload for seq {seq}");
}

#[test]
fn two_readers_fan_out_the_same_messages() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
    let mut first = writer.subscribe();
    let mut second = writer.subscribe();

    writer.publish_bytes(b"AAAA").unwrap();
    writer.publish_bytes(b"BBBB").unwrap();

    let mut out = [0u8; SLOT];
    for reader in [&mut first, &mut second] {
        assert_eq!(reader.try_read(&mut out), Ok(Some(4)));
        assert_eq!(&out[..4], b"AAAA");
        assert_eq!(reader.try_read(&mut out), Ok(Some(4)));
        assert_eq!(&out[..4], b"BBBB");
        assert_eq!(reader.try_read(&mut out), Ok(None));
        assert_eq!(reader.cursor(), 2);
    }
}

#[test]
fn raw_cursor_reads_do_not_consume() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
    let reader = writer.subscribe();
    writer.publish_bytes(b"A").unwrap();

    let mut out = [0u8; SLOT];
    assert_eq!(reader.read_at(0, &mut out), Ok(ReadStatus::Ready(1)));
    assert_eq!(reader.read_at(0, &mut out), Ok(ReadStatus::Ready(1)));
    assert_eq!(reader.read_at(1, &mut out), Ok(ReadStatus::NotReady));
    assert_eq!(reader.cursor(), 0);
    assert_eq!(writer.slot_state(0), BroadcastState::Published { version: 1 });
}

#[test]
fn oversize_publish_leaves_ring_untouched() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
    let mut reader = writer.subscribe();
    let before = writer.slot_state(0);

    let res = writer.publish(SLOT + 1, |_| -> Result<(), Infallible> {
        panic!("fill must not run for an oversize payload")
    });
    assert_eq!(
        res,
        Err(PublishError::Oversize {
            requested: SLOT + 1,
            capacity: SLOT
        })
    );
    assert_eq!(writer.published(), 0);
    assert_eq!(writer.slot_state(0), before);

    assert_eq!(writer.publish_bytes(&[1u8; SLOT]), Ok(0));
    let mut out = [0u8; SLOT];
    assert_eq!(reader.try_read(&mut out), Ok(Some(SLOT)));
}

#[test]
fn lapped_reader_never_sees_old_data() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
    let mut reader = writer.subscribe();
    for seq in 0..10u64 {
        writer.publish(encoded_len(seq), |buf| {
            encode(seq, buf);
            Ok::<(), Infallible>(())
        })
        .unwrap();
    }

    let mut out = [0u8; SLOT];
    for stale in 0..6 {
        assert_eq!(reader.read_at(stale, &mut out), Ok(ReadStatus::Stale));
    }

    // Fast-forwards to the oldest retained message.
    let n = reader.try_read(&mut out).unwrap().expect("retained message");
    assert_consistent(6, &out[..n]);
    assert_eq!(reader.overruns(), 6);

    for seq in 7..10 {
        let n = reader.try_read(&mut out).unwrap().expect("retained message");
        assert_consistent(seq, &out[..n]);
    }
    assert_eq!(reader.try_read(&mut out), Ok(None));
    assert_eq!(reader.overruns(), 6);
}

#[test]
fn short_buffer_is_reported_and_cursor_kept() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
    let mut reader = writer.subscribe();
    writer.publish_bytes(&[3u8; 32]).unwrap();

    let mut small = [0u8; 16];
    assert_eq!(
        reader.try_read(&mut small),
        Err(ConsumeError::BufferTooSmall {
            needed: 32,
            available: 16
        })
    );
    assert_eq!(reader.cursor(), 0);
}

#[test]
fn non_power_of_two_capacity_wraps_correctly() {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(3));
    let mut reader = writer.subscribe();
    let mut out = [0u8; SLOT];

    for seq in 0..20u64 {
        writer.publish(encoded_len(seq), |buf| {
            encode(seq, buf);
            Ok::<(), Infallible>(())
        })
        .unwrap();
        let n = reader.try_read(&mut out).unwrap().expect("just published");
        assert_consistent(seq, &out[..n]);
    }
}

/// Concurrent writer and readers: every successful read must be exactly the
/// publish its cursor names, however far the readers fall behind.
#[test]
fn concurrent_readers_never_observe_torn_payloads() {
    const TOTAL: u64 = 200_000;
    const READERS: usize = 3;

    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(64));
    let readers: Vec<_> = (0..READERS).map(|_| writer.subscribe()).collect();

    std::thread::scope(|s| {
        let handles: Vec<_> = readers
            .into_iter()
            .map(|mut reader| {
                s.spawn(move || {
                    let deadline = Instant::now() + Duration::from_secs(30);
                    let mut out = [0u8; SLOT];
                    let mut received = 0u64;
                    while reader.cursor() < TOTAL {
                        assert!(Instant::now() < deadline, "reader stalled at {}", reader.cursor());
                        match reader.try_read(&mut out).unwrap() {
                            Some(n) => {
                                assert_consistent(reader.cursor() - 1, &out[..n]);
                                received += 1;
                            }
                            None => std::hint::spin_loop(),
                        }
                    }
                    (received, reader.overruns())
                })
            })
            .collect();

        for seq in 0..TOTAL {
            writer
                .publish(encoded_len(seq), |buf| {
                    encode(seq, buf);
                    Ok::<(), Infallible>(())
                })
                .unwrap();
        }

        for handle in handles {
            let (received, overruns) = handle.join().unwrap();
            assert_eq!(received + overruns, TOTAL);
            assert!(received > 0);
        }
    });
}
