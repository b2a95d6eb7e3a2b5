use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Receives the size of every acknowledged block.
pub type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// Byte counter for one transfer, fed by the engine's progress sink.
pub struct TransferProgress {
    total: u64,
    transferred: AtomicU64,
    speed: SpeedCalculator,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            transferred: AtomicU64::new(0),
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Adds `bytes` to the transferred count.
    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::AcqRel);
        self.speed.add_sample(bytes);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        (self.transferred() as f64 / total as f64).min(1.0)
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    pub fn eta(&self) -> Option<Duration> {
        self.speed
            .eta(self.total().saturating_sub(self.transferred()))
    }

    /// Returns a sink that feeds this counter.
    pub fn sink(self: &Arc<Self>) -> ProgressSink {
        let progress = Arc::clone(self);
        Arc::new(move |bytes| progress.add(bytes))
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.lock();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_sink_accumulates() {
        let progress = Arc::new(TransferProgress::new(1000));
        let sink = progress.sink();
        sink(300);
        sink(200);
        assert_eq!(progress.transferred(), 500);
        assert!((progress.fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_transfer_is_done() {
        let progress = TransferProgress::new(0);
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn fraction_never_exceeds_one() {
        let progress = TransferProgress::new(10);
        progress.add(25);
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(progress.eta().unwrap_or_default(), Duration::ZERO);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_multiple_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
        assert!(calc.eta(10_000).is_some());
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.lock().samples.len() <= 5);
    }
}
