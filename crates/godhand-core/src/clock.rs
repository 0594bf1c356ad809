//! Time source for retry and reconnect delays, injectable in tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeps on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_clock_records_without_waiting() {
        let clock = RecordingClock::new();
        let started = std::time::Instant::now();
        clock.sleep(Duration::from_secs(3)).await;
        clock.sleep(Duration::from_secs(3)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_advances_virtual_time() {
        let before = tokio::time::Instant::now();
        TokioClock.sleep(Duration::from_secs(3)).await;
        assert!(before.elapsed() >= Duration::from_secs(3));
    }
}
