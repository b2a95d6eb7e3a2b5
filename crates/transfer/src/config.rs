use std::time::Duration;

use crate::TransferError;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 1_200_000;

/// Largest block size the object store accepts.
pub const MAX_BLOCK_SIZE: usize = 4_194_304;

/// Block size used when a larger one was requested.
pub const FALLBACK_BLOCK_SIZE: usize = 524_288;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Downloads at or below this size use a single range.
pub const RANGE_THRESHOLD: u64 = 10 * 1024 * 1024;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Replaces an oversized block size with [`FALLBACK_BLOCK_SIZE`].
pub fn clamp_block_size(requested: usize) -> usize {
    if requested > MAX_BLOCK_SIZE {
        FALLBACK_BLOCK_SIZE
    } else {
        requested
    }
}

/// How failed blocks are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the block succeeds.
    pub max_attempts: Option<u32>,
    /// Pause before a failed block is requeued.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry forever with the default pause.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Give up on a block after `attempts` failures.
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Returns a copy with a different pause.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns `true` once `attempts` failures exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub block_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Compare the store's MD5 of each uploaded block with a local one.
    pub verify_checksum: bool,
    pub range_threshold: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            verify_checksum: false,
            range_threshold: RANGE_THRESHOLD,
        }
    }
}

impl TransferConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.block_size == 0 {
            return Err(TransferError::InvalidConfig("block size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfig("concurrency must be positive".into()));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(TransferError::InvalidConfig(
                "max attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TransferConfig::default();
        assert_eq!(config.block_size, 1_200_000);
        assert_eq!(config.concurrency, 3);
        assert!(config.retry.max_attempts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = TransferConfig {
            concurrency: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_block_size_rejected() {
        let config = TransferConfig {
            block_size: 0,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_block_falls_back() {
        assert_eq!(clamp_block_size(MAX_BLOCK_SIZE), MAX_BLOCK_SIZE);
        assert_eq!(clamp_block_size(MAX_BLOCK_SIZE + 1), FALLBACK_BLOCK_SIZE);
        assert_eq!(clamp_block_size(1024), 1024);
    }

    #[test]
    fn unbounded_never_exhausts() {
        let policy = RetryPolicy::unbounded();
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn bounded_exhausts_at_limit() {
        let policy = RetryPolicy::bounded(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
