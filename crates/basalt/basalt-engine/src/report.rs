use basalt_config::Mode;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub published: u64,
    /// Publishes refused because the reader held the slot.
    pub contention: u64,
    /// Unread messages reclaimed (exclusive mode only).
    pub overwritten: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub id: usize,
    pub received: u64,
    /// Messages the producer lapped before this consumer got to them.
    pub skipped: u64,
    pub contention: u64,
}

/// Totals of one driver session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub mode: Mode,
    pub elapsed: Duration,
    pub producer: ProducerStats,
    pub consumers: Vec<ConsumerStats>,
}

impl SessionReport {
    pub fn publish_rate(&self) -> f64 {
        per_second(self.producer.published, self.elapsed)
    }

    pub fn received(&self) -> u64 {
        self.consumers.iter().map(|c| c.received).sum()
    }

    pub fn receive_rate(&self) -> f64 {
        per_second(self.received(), self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { 0.0 } else { count as f64 / secs }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} session, {:.3}s: published {} ({:.0} msg/s), contention {}, overwritten {}",
            self.mode,
            self.elapsed.as_secs_f64(),
            self.producer.published,
            self.publish_rate(),
            self.producer.contention,
            self.producer.overwritten,
        )?;
        for c in &self.consumers {
            writeln!(
                f,
                "  consumer {}: received {} ({:.0} msg/s), skipped {}, contention {}",
                c.id,
                c.received,
                per_second(c.received, self.elapsed),
                c.skipped,
                c.contention,
            )?;
        }
        Ok(())
    }
}
