//! Measurement helpers shared by the criterion benches and `perf_report`.

use std::time::Instant;

// ─── Latency summaries ──────────────────────────────────────────────────────

/// Distribution of a set of nanosecond samples.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Summary {
    pub samples: usize,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub stddev_ns: f64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub p9999_ns: u64,
}

/// A named measurement as printed and saved by the report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Measurement {
    pub label: String,
    pub summary: Summary,
}

impl Summary {
    /// Summarises `samples`, sorting them in place.
    ///
    /// Returns `None` for an empty slice.
    pub fn of(samples: &mut [u64]) -> Option<Self> {
        samples.sort_unstable();
        let (&min_ns, &max_ns) = (samples.first()?, samples.last()?);
        let n = samples.len() as f64;
        let mean_ns = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
        let stddev_ns = (samples.iter().map(|&x| (x as f64 - mean_ns).powi(2)).sum::<f64>() / n).sqrt();

        Some(Self {
            samples: samples.len(),
            min_ns,
            max_ns,
            mean_ns,
            stddev_ns,
            p50_ns: nearest_rank(samples, 50.0),
            p90_ns: nearest_rank(samples, 90.0),
            p99_ns: nearest_rank(samples, 99.0),
            p999_ns: nearest_rank(samples, 99.9),
            p9999_ns: nearest_rank(samples, 99.99),
        })
    }
}

fn nearest_rank(sorted: &[u64], pct: f64) -> u64 {
    let rank = (pct * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// ─── Batched timing ─────────────────────────────────────────────────────────

/// How [`per_op`] splits its run.
#[derive(Debug, Clone, Copy)]
pub struct Batching {
    pub warmup_ops: usize,
    pub batches: usize,
    pub ops_per_batch: usize,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            warmup_ops: 100_000,
            batches: 1_000,
            ops_per_batch: 10_000,
        }
    }
}

/// Average nanoseconds per call of `op`, one sample per batch.
///
/// A single ring operation is cheaper than reading the clock, so each sample
/// covers a whole batch.
pub fn per_op<F: FnMut()>(label: &str, batching: Batching, mut op: F) -> Measurement {
    (0..batching.warmup_ops).for_each(|_| op());

    let per_batch = batching.ops_per_batch.max(1) as u128;
    let mut samples: Vec<u64> = (0..batching.batches.max(1))
        .map(|_| {
            let t0 = Instant::now();
            for _ in 0..per_batch {
                op();
            }
            (t0.elapsed().as_nanos() / per_batch).max(1) as u64
        })
        .collect();

    Measurement {
        label: label.to_owned(),
        summary: Summary::of(&mut samples).unwrap_or_else(|| unreachable!("at least one batch")),
    }
}

// ─── Message headers ────────────────────────────────────────────────────────

pub const HEADER_LEN: usize = 16;

/// Writes a message header: sequence number then send time.
pub fn stamp(buf: &mut [u8; HEADER_LEN], seq: u64, sent_ns: u64) {
    let (seq_bytes, sent_bytes) = buf.split_at_mut(8);
    seq_bytes.copy_from_slice(&seq.to_le_bytes());
    sent_bytes.copy_from_slice(&sent_ns.to_le_bytes());
}

/// Reads back what [`stamp`] wrote at the start of `buf`.
pub fn read_stamp(buf: &[u8]) -> Option<(u64, u64)> {
    let seq = u64::from_le_bytes(buf.get(..8)?.try_into().ok()?);
    let sent = u64::from_le_bytes(buf.get(8..HEADER_LEN)?.try_into().ok()?);
    Some((seq, sent))
}

// ─── Process usage ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessUsage {
    pub peak_rss_bytes: u64,
    pub minor_faults: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub cpu_user_us: u64,
    pub cpu_system_us: u64,
}

impl ProcessUsage {
    pub fn now() -> Self {
        // SAFETY: rusage is plain data that getrusage fills in.
        let ru = unsafe {
            let mut ru: libc::rusage = std::mem::zeroed();
            libc::getrusage(libc::RUSAGE_SELF, &mut ru);
            ru
        };
        // Linux reports KiB, macOS bytes.
        let rss_unit = if cfg!(target_os = "linux") { 1024 } else { 1 };
        let micros = |tv: libc::timeval| tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64;
        Self {
            peak_rss_bytes: ru.ru_maxrss as u64 * rss_unit,
            minor_faults: ru.ru_minflt as u64,
            voluntary_switches: ru.ru_nvcsw as u64,
            involuntary_switches: ru.ru_nivcsw as u64,
            cpu_user_us: micros(ru.ru_utime),
            cpu_system_us: micros(ru.ru_stime),
        }
    }

    /// Counters accumulated since `earlier`. Peak RSS is kept as is.
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            peak_rss_bytes: self.peak_rss_bytes,
            minor_faults: self.minor_faults.saturating_sub(earlier.minor_faults),
            voluntary_switches: self.voluntary_switches.saturating_sub(earlier.voluntary_switches),
            involuntary_switches: self.involuntary_switches.saturating_sub(earlier.involuntary_switches),
            cpu_user_us: self.cpu_user_us.saturating_sub(earlier.cpu_user_us),
            cpu_system_us: self.cpu_system_us.saturating_sub(earlier.cpu_system_us),
        }
    }
}

/// Pins the calling thread to `cpu`. A no-op off Linux.
pub fn pin_to_cpu(cpu: usize) {
    #[cfg(target_os = "linux")]
    // SAFETY: the set is zero-initialised before use and only read by the call.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = cpu;
}

// ─── Printing ───────────────────────────────────────────────────────────────

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn banner(title: &str) {
    let rule = "═".repeat(80);
    println!("\n{rule}\n  {title}\n{rule}");
}

pub fn print_measurements(rows: &[Measurement]) {
    println!(
        "  {:<34} {:>7} {:>7} {:>7} {:>7} {:>8} {:>8}",
        "ns/op", "min", "p50", "p90", "p99", "p99.9", "max"
    );
    for m in rows {
        let s = &m.summary;
        println!(
            "  {:<34} {:>7} {:>7} {:>7} {:>7} {:>8} {:>8}",
            m.label, s.min_ns, s.p50_ns, s.p90_ns, s.p99_ns, s.p999_ns, s.max_ns
        );
    }
}
