use basalt_config::PollStrategy;
use crossbeam_utils::Backoff;
use std::time::Duration;

/// What a producer or consumer thread does on an empty iteration.
pub struct Idle {
    strategy: PollStrategy,
    sleep: Duration,
    backoff: Backoff,
}

impl Idle {
    pub fn new(strategy: PollStrategy, sleep: Duration) -> Self {
        Self {
            strategy,
            sleep,
            backoff: Backoff::new(),
        }
    }

    #[inline]
    pub fn wait(&self) {
        match self.strategy {
            PollStrategy::Spin => std::hint::spin_loop(),
            PollStrategy::Yield => std::thread::yield_now(),
            PollStrategy::Sleep => std::thread::sleep(self.sleep),
            PollStrategy::Backoff => self.backoff.snooze(),
        }
    }

    /// Call after useful work so backoff starts short again.
    #[inline]
    pub fn reset(&self) {
        if self.strategy == PollStrategy::Backoff {
            self.backoff.reset();
        }
    }
}
