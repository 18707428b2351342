use std::time::{Duration, Instant, SystemTime};

use mdns_core::SleepWakeSource;
use tokio::sync::mpsc;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SLEEP_WAKE_FUDGE: Duration = Duration::from_secs(5);

/// Detects process suspension by comparing wall-clock drift against the
/// monotonic clock every 60 seconds: a gap beyond the 5 s fudge means the
/// process (and its timers) were asleep, not just slow.
#[derive(Debug, Default)]
pub struct WallClockSleepWakeSource;

impl WallClockSleepWakeSource {
    pub fn new() -> Self {
        Self
    }
}

impl SleepWakeSource for WallClockSleepWakeSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut monotonic = Instant::now();
            let mut wall = SystemTime::now();
            loop {
                tokio::time::sleep(CHECK_INTERVAL).await;
                let now_monotonic = Instant::now();
                let now_wall = SystemTime::now();

                let monotonic_elapsed = now_monotonic.duration_since(monotonic);
                let wall_elapsed = now_wall.duration_since(wall).unwrap_or(Duration::ZERO);

                if wall_elapsed > monotonic_elapsed + SLEEP_WAKE_FUDGE {
                    tracing::info!(
                        monotonic_elapsed_secs = monotonic_elapsed.as_secs(),
                        wall_elapsed_secs = wall_elapsed.as_secs(),
                        "detected wall clock jump, signaling wake"
                    );
                    if tx.send(()).is_err() {
                        return;
                    }
                }

                monotonic = now_monotonic;
                wall = now_wall;
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_returns_a_live_receiver() {
        let source = WallClockSleepWakeSource::new();
        let mut rx = source.subscribe();
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "no wake event should fire before the first check interval");
    }
}
