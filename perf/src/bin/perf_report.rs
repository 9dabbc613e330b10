use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use basalt_perf::{
    Batching, HEADER_LEN, Measurement, ProcessUsage, Summary, banner, human_bytes, per_op,
    pin_to_cpu, print_measurements, read_stamp, stamp,
};
use basalt_ring::{
    BroadcastWriter, ConsumeError, DEFAULT_SLOT_SIZE, PublishError, RingConfig, exclusive,
    slot_stride,
};

const EVENTS: u64 = 200_000;
const CAPACITY: usize = 65536;

/// One producer → one consumer run across two pinned threads.
#[derive(Debug, serde::Serialize)]
struct HandoffRun {
    mode: &'static str,
    latency: Option<Summary>,
    received: u64,
    lost: u64,
    producer_contention: u64,
    consumer_contention: u64,
}

struct ConsumerSide {
    samples: Vec<u64>,
    lost: u64,
    contention: u64,
}

fn main() {
    let usage_before = ProcessUsage::now();

    banner("basalt ring perf report");
    let stride = slot_stride::<DEFAULT_SLOT_SIZE>();
    println!(
        "  payload {DEFAULT_SLOT_SIZE} B per slot, stride {stride} B, {CAPACITY} slots = {}",
        human_bytes((CAPACITY * stride) as u64)
    );

    let mut single = broadcast_hot_path();
    single.extend(exclusive_hot_path());

    let handoffs = [broadcast_handoff(), exclusive_handoff()];
    for run in &handoffs {
        print_handoff(run);
    }

    let usage = ProcessUsage::now().since(&usage_before);
    banner("PROCESS");
    println!("  peak RSS              {}", human_bytes(usage.peak_rss_bytes));
    println!("  minor faults          {}", usage.minor_faults);
    println!("  ctx switches vol/inv  {}/{}", usage.voluntary_switches, usage.involuntary_switches);
    println!(
        "  cpu user/sys          {:.3}s/{:.3}s",
        usage.cpu_user_us as f64 / 1e6,
        usage.cpu_system_us as f64 / 1e6
    );

    save_json(&single, &handoffs, &usage);
}

fn broadcast_hot_path() -> Vec<Measurement> {
    banner("BROADCAST, one thread");
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(CAPACITY));
    let payload = [0x42u8; 32];
    let mut out = [0u8; DEFAULT_SLOT_SIZE];

    let mut rows = vec![per_op("publish_bytes 32 B", Batching::default(), || {
        black_box(writer.publish_bytes(black_box(&payload)).ok());
    })];
    let mut idle = writer.subscribe_tail();
    rows.push(per_op("try_read, nothing new", Batching::default(), || {
        black_box(idle.try_read(&mut out).ok());
    }));
    let mut follower = writer.subscribe_tail();
    rows.push(per_op("publish + try_read 32 B", Batching::default(), || {
        let _ = writer.publish_bytes(&payload);
        black_box(follower.try_read(&mut out).ok());
    }));

    print_measurements(&rows);
    rows
}

fn exclusive_hot_path() -> Vec<Measurement> {
    banner("EXCLUSIVE, one thread");
    let (mut tx, mut rx) = exclusive::channel::<DEFAULT_SLOT_SIZE>(RingConfig::new(CAPACITY));
    let payload = [0x24u8; 32];
    let mut out = [0u8; DEFAULT_SLOT_SIZE];

    let rows = vec![
        per_op("publish + try_consume 32 B", Batching::default(), || {
            let _ = tx.publish_bytes(&payload);
            black_box(rx.try_consume(&mut out).ok());
        }),
        per_op("try_consume, nothing new", Batching::default(), || {
            black_box(rx.try_consume(&mut out).ok());
        }),
        // Nothing is consumed here, so past the first lap every publish reclaims.
        per_op("publish over unread slot", Batching::default(), || {
            black_box(tx.publish_bytes(&payload).ok());
        }),
    ];

    print_measurements(&rows);
    rows
}

fn broadcast_handoff() -> HandoffRun {
    let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(CAPACITY));
    let mut reader = writer.subscribe();
    let epoch = Instant::now();
    let start = Arc::new(Barrier::new(2));

    let consumer = {
        let start = start.clone();
        thread::spawn(move || {
            pin_to_cpu(1);
            let mut side = ConsumerSide::new();
            let mut out = [0u8; DEFAULT_SLOT_SIZE];
            start.wait();
            loop {
                match reader.try_read(&mut out) {
                    Ok(Some(_)) => {
                        if side.record(&out, epoch) {
                            break;
                        }
                    }
                    Ok(None) => std::hint::spin_loop(),
                    Err(e) => panic!("broadcast read failed: {e}"),
                }
            }
            side.lost = reader.overruns();
            side
        })
    };

    start.wait();
    pin_to_cpu(0);
    let mut header = [0u8; HEADER_LEN];
    for seq in 0..EVENTS {
        stamp(&mut header, seq, epoch.elapsed().as_nanos() as u64);
        writer.publish_bytes(&header).expect("header fits a slot");
    }

    consumer.join().expect("consumer panicked").finish("broadcast", 0)
}

fn exclusive_handoff() -> HandoffRun {
    let (mut tx, mut rx) = exclusive::channel::<DEFAULT_SLOT_SIZE>(RingConfig::new(CAPACITY));
    let epoch = Instant::now();
    let start = Arc::new(Barrier::new(2));

    let consumer = {
        let start = start.clone();
        thread::spawn(move || {
            pin_to_cpu(1);
            let mut side = ConsumerSide::new();
            let mut out = [0u8; DEFAULT_SLOT_SIZE];
            start.wait();
            loop {
                match rx.try_consume(&mut out) {
                    Ok(Some(_)) => {
                        if side.record(&out, epoch) {
                            break;
                        }
                    }
                    Ok(None) => std::hint::spin_loop(),
                    Err(ConsumeError::Contention { .. }) => side.contention += 1,
                    Err(e) => panic!("exclusive consume failed: {e}"),
                }
            }
            side.lost = rx.skipped();
            side
        })
    };

    start.wait();
    pin_to_cpu(0);
    let mut header = [0u8; HEADER_LEN];
    let mut contention = 0u64;
    for seq in 0..EVENTS {
        loop {
            stamp(&mut header, seq, epoch.elapsed().as_nanos() as u64);
            match tx.publish_bytes(&header) {
                Ok(_) => break,
                Err(PublishError::Contention { .. }) => contention += 1,
                Err(e) => panic!("exclusive publish failed: {e}"),
            }
        }
    }

    consumer.join().expect("consumer panicked").finish("exclusive", contention)
}

impl ConsumerSide {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(EVENTS as usize),
            lost: 0,
            contention: 0,
        }
    }

    /// Records one delivery; true once the last event arrived.
    fn record(&mut self, payload: &[u8], epoch: Instant) -> bool {
        let now = epoch.elapsed().as_nanos() as u64;
        let (seq, sent) = read_stamp(payload).expect("payload carries a header");
        self.samples.push(now.saturating_sub(sent));
        seq == EVENTS - 1
    }

    fn finish(mut self, mode: &'static str, producer_contention: u64) -> HandoffRun {
        HandoffRun {
            mode,
            received: self.samples.len() as u64,
            latency: Summary::of(&mut self.samples),
            lost: self.lost,
            producer_contention,
            consumer_contention: self.contention,
        }
    }
}

fn print_handoff(run: &HandoffRun) {
    banner(&format!("{} HANDOFF, {EVENTS} events, 2 threads", run.mode.to_uppercase()));
    if let Some(s) = &run.latency {
        println!(
            "  stamp → copied ns   p50 {}  p90 {}  p99 {}  p99.9 {}  p99.99 {}  max {}",
            s.p50_ns, s.p90_ns, s.p99_ns, s.p999_ns, s.p9999_ns, s.max_ns
        );
        println!("  mean {:.1} ns, stddev {:.1} ns", s.mean_ns, s.stddev_ns);
    }
    println!(
        "  received {}, lost {}, contention producer/consumer {}/{}",
        run.received, run.lost, run.producer_contention, run.consumer_contention
    );
}

fn save_json(single: &[Measurement], handoffs: &[HandoffRun], usage: &ProcessUsage) {
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let path = format!("{dir}/{unix_secs}_ring.json");
    let doc = serde_json::json!({
        "unix_secs": unix_secs,
        "slot_payload": DEFAULT_SLOT_SIZE,
        "capacity": CAPACITY,
        "single_thread": single,
        "handoff": handoffs,
        "process": usage,
    });

    let saved = std::fs::create_dir_all(dir).and_then(|()| {
        let text = serde_json::to_string_pretty(&doc).map_err(std::io::Error::other)?;
        std::fs::write(&path, text)
    });
    match saved {
        Ok(()) => println!("\n  saved {path}"),
        Err(e) => eprintln!("\n  could not save {path}: {e}"),
    }
}
