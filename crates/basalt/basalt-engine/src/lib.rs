//! Drives a basalt ring end to end: one producer thread publishing
//! `Message {id}` payloads and one or more consumer threads polling until a
//! shared running flag drops.

mod poll;
mod report;

pub use poll::Idle;
pub use report::{ConsumerStats, ProducerStats, SessionReport};

use basalt_config::{ConfigError, DriverConfig, Mode};
use basalt_ring::{
    BroadcastReader, BroadcastWriter, ConsumeError, ExclusiveReader, ExclusiveWriter,
    PublishError, RingConfig, exclusive,
};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Payload bytes per slot used by the driver.
pub const SLOT_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("publish failed")]
    Publish(#[from] PublishError),

    #[error("consume failed")]
    Consume(#[from] ConsumeError),

    #[error("{role} gave up after {streak} consecutive contentions")]
    ContentionLimit { role: &'static str, streak: u64 },

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Producer side of either ring discipline.
trait Sink: Send {
    fn send(&mut self, payload: &[u8]) -> Result<u64, PublishError>;

    fn overwritten(&self) -> u64 {
        0
    }
}

/// Consumer side of either ring discipline.
trait Source: Send {
    fn poll(&mut self, out: &mut [u8]) -> Result<Option<usize>, ConsumeError>;

    fn skipped(&self) -> u64;
}

impl Sink for BroadcastWriter<SLOT_SIZE> {
    fn send(&mut self, payload: &[u8]) -> Result<u64, PublishError> {
        self.publish_bytes(payload)
    }
}

impl Sink for ExclusiveWriter<SLOT_SIZE> {
    fn send(&mut self, payload: &[u8]) -> Result<u64, PublishError> {
        self.publish_bytes(payload)
    }

    fn overwritten(&self) -> u64 {
        ExclusiveWriter::overwritten(self)
    }
}

impl Source for BroadcastReader<SLOT_SIZE> {
    fn poll(&mut self, out: &mut [u8]) -> Result<Option<usize>, ConsumeError> {
        self.try_read(out)
    }

    fn skipped(&self) -> u64 {
        self.overruns()
    }
}

impl Source for ExclusiveReader<SLOT_SIZE> {
    fn poll(&mut self, out: &mut [u8]) -> Result<Option<usize>, ConsumeError> {
        self.try_consume(out)
    }

    fn skipped(&self) -> u64 {
        ExclusiveReader::skipped(self)
    }
}

/// Counts consecutive contentions against the configured limit.
struct Streak {
    current: u64,
    limit: u64,
}

impl Streak {
    fn hit(&mut self, role: &'static str) -> Result<(), EngineError> {
        self.current += 1;
        if self.limit != 0 && self.current >= self.limit {
            warn!(role, streak = self.current, "contention limit reached");
            return Err(EngineError::ContentionLimit {
                role,
                streak: self.current,
            });
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.current = 0;
    }
}

pub struct BasaltEngine {
    config: DriverConfig,
}

impl BasaltEngine {
    pub fn new(config: DriverConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Runs one session for `duration_ms` and reports the totals.
    pub fn run(&self) -> Result<SessionReport, EngineError> {
        let ring = RingConfig::new(self.config.capacity);
        info!(
            mode = ?self.config.mode,
            capacity = self.config.capacity,
            consumers = self.config.consumers,
            duration_ms = self.config.duration_ms,
            "starting session"
        );

        let report = match self.config.mode {
            Mode::Broadcast => {
                let writer: BroadcastWriter<SLOT_SIZE> = BroadcastWriter::new(ring);
                let readers: Vec<_> = (0..self.config.consumers).map(|_| writer.subscribe()).collect();
                self.drive(writer, readers)?
            }
            Mode::Exclusive => {
                let (tx, rx) = exclusive::channel::<SLOT_SIZE>(ring);
                self.drive(tx, vec![rx])?
            }
        };

        info!(
            published = report.producer.published,
            received = report.received(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "session finished"
        );
        Ok(report)
    }

    fn drive<W: Sink, R: Source>(&self, writer: W, readers: Vec<R>) -> Result<SessionReport, EngineError> {
        let running = AtomicBool::new(true);
        let duration = Duration::from_millis(self.config.duration_ms);
        let start = Instant::now();

        let (producer, consumers) = thread::scope(|s| {
            let running = &running;
            let producer = s.spawn(move || {
                let res = self.produce(writer, running);
                running.store(false, Ordering::Release);
                res
            });
            let consumers: Vec<_> = readers
                .into_iter()
                .enumerate()
                .map(|(id, reader)| {
                    s.spawn(move || {
                        let res = self.consume(id, reader, running);
                        if res.is_err() {
                            running.store(false, Ordering::Release);
                        }
                        res
                    })
                })
                .collect();

            while running.load(Ordering::Acquire) {
                let left = duration.saturating_sub(start.elapsed());
                if left.is_zero() {
                    break;
                }
                thread::sleep(left.min(Duration::from_millis(10)));
            }
            running.store(false, Ordering::Release);

            let producer = producer.join().map_err(|_| EngineError::Panicked("producer"));
            let consumers: Vec<_> = consumers
                .into_iter()
                .map(|h| h.join().map_err(|_| EngineError::Panicked("consumer")))
                .collect();
            (producer, consumers)
        });

        let producer = producer??;
        let consumers = consumers
            .into_iter()
            .map(|c| c.and_then(|stats| stats))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionReport {
            mode: self.config.mode,
            elapsed: start.elapsed(),
            producer,
            consumers,
        })
    }

    fn produce<W: Sink>(&self, mut writer: W, running: &AtomicBool) -> Result<ProducerStats, EngineError> {
        let idle = Idle::new(self.config.poll, Duration::from_micros(self.config.sleep_us));
        let interval = Duration::from_micros(self.config.publish_interval_us);
        let mut streak = Streak {
            current: 0,
            limit: self.config.max_contention_retries,
        };
        let mut stats = ProducerStats::default();
        let mut message = String::with_capacity(SLOT_SIZE);
        let mut id = 0u64;

        while running.load(Ordering::Acquire) {
            message.clear();
            // Writing to a String cannot fail.
            let _ = write!(message, "Message {id}");

            match writer.send(message.as_bytes()) {
                Ok(seq) => {
                    trace!(seq, id, "published");
                    stats.published += 1;
                    id += 1;
                    streak.clear();
                    idle.reset();
                    if !interval.is_zero() {
                        thread::sleep(interval);
                    }
                }
                Err(PublishError::Contention { index }) => {
                    trace!(index, "slot busy");
                    stats.contention += 1;
                    streak.hit("producer")?;
                    idle.wait();
                }
                Err(e) => return Err(e.into()),
            }
        }

        stats.overwritten = writer.overwritten();
        debug!(
            published = stats.published,
            contention = stats.contention,
            overwritten = stats.overwritten,
            "producer done"
        );
        Ok(stats)
    }

    fn consume<R: Source>(&self, id: usize, mut reader: R, running: &AtomicBool) -> Result<ConsumerStats, EngineError> {
        let idle = Idle::new(self.config.poll, Duration::from_micros(self.config.sleep_us));
        let mut streak = Streak {
            current: 0,
            limit: self.config.max_contention_retries,
        };
        let mut stats = ConsumerStats {
            id,
            ..Default::default()
        };
        let mut buf = [0u8; SLOT_SIZE];

        while running.load(Ordering::Acquire) {
            match reader.poll(&mut buf) {
                Ok(Some(n)) => {
                    trace!(consumer = id, payload = %String::from_utf8_lossy(&buf[..n]), "received");
                    stats.received += 1;
                    streak.clear();
                    idle.reset();
                }
                Ok(None) => idle.wait(),
                Err(ConsumeError::Contention { index }) => {
                    trace!(consumer = id, index, "slot reclaimed");
                    stats.contention += 1;
                    streak.hit("consumer")?;
                    idle.wait();
                }
                Err(e) => return Err(e.into()),
            }
        }

        stats.skipped = reader.skipped();
        debug!(
            consumer = id,
            received = stats.received,
            skipped = stats.skipped,
            contention = stats.contention,
            "consumer done"
        );
        Ok(stats)
    }
}
