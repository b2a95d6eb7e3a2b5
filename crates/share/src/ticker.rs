//! Periodic progress lines for a running transfer.

use std::sync::Arc;
use std::time::Duration;

use cowshare_transfer::TransferProgress;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Interval between progress lines.
pub const DEFAULT_TICK: Duration = Duration::from_secs(2);

/// Logs the state of a [`TransferProgress`] until stopped.
pub struct ProgressTicker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn start(label: String, progress: Arc<TransferProgress>, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => log_line(&label, &progress),
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stops the ticker after it has written its current line.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

fn log_line(label: &str, progress: &TransferProgress) {
    let percent = progress.fraction() * 100.0;
    let speed = human_bytes(progress.bytes_per_second() as u64);
    match progress.eta() {
        Some(eta) => info!(
            file = label,
            done = progress.transferred(),
            total = progress.total(),
            "{percent:.1}% at {speed}/s, {}s left",
            eta.as_secs()
        ),
        None => info!(
            file = label,
            done = progress.transferred(),
            total = progress.total(),
            "{percent:.1}% at {speed}/s"
        ),
    }
}

/// Formats a byte count with a binary unit.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_on_request() {
        let progress = Arc::new(TransferProgress::new(100));
        let ticker = ProgressTicker::start("f".into(), Arc::clone(&progress), DEFAULT_TICK);
        progress.add(50);
        tokio::time::advance(Duration::from_secs(5)).await;
        ticker.stop().await;
    }
}
