use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::TransferError;

/// An acknowledged block, ready for the merge payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub index: u32,
    pub token: String,
}

/// Outcome of [`CompletionMap::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// First acknowledgement for this index.
    New,
    /// The index was already acknowledged; the new token was dropped.
    Duplicate,
    /// The index is not part of this session.
    OutOfRange,
}

/// Block index → completion token, shared by all workers of one transfer.
///
/// One write-once slot per block: the first token recorded for an index
/// wins and later ones are ignored, so a block that is acknowledged twice
/// still appears once in the merge payload.
pub struct CompletionMap {
    slots: Box<[OnceLock<String>]>,
    recorded: AtomicU32,
}

impl CompletionMap {
    /// Creates a map for blocks `1..=total`.
    pub fn new(total: u32) -> Self {
        Self {
            slots: (0..total).map(|_| OnceLock::new()).collect(),
            recorded: AtomicU32::new(0),
        }
    }

    /// Number of blocks in the session.
    pub fn total(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of distinct indices acknowledged so far.
    pub fn len(&self) -> u32 {
        self.recorded.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` once every block has a token.
    pub fn is_complete(&self) -> bool {
        self.len() == self.total()
    }

    /// Returns `true` if `index` belongs to this session.
    pub fn contains_index(&self, index: u32) -> bool {
        index >= 1 && index <= self.total()
    }

    /// Records the token for `index`.
    pub fn record(&self, index: u32, token: impl Into<String>) -> Recorded {
        let Some(slot) = self.slot(index) else {
            return Recorded::OutOfRange;
        };
        match slot.set(token.into()) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::AcqRel);
                Recorded::New
            }
            Err(_) => Recorded::Duplicate,
        }
    }

    /// Token recorded for `index`, if any.
    pub fn get(&self, index: u32) -> Option<&str> {
        self.slot(index)?.get().map(String::as_str)
    }

    /// Lists every block in index order.
    ///
    /// Fails unless all blocks have been acknowledged.
    pub fn ordered_parts(&self) -> Result<Vec<CompletedPart>, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::Incomplete {
                expected: self.total(),
                recorded: self.len(),
            });
        }

        let mut parts = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.iter().enumerate() {
            let token = slot.get().ok_or(TransferError::Incomplete {
                expected: self.total(),
                recorded: self.len(),
            })?;
            parts.push(CompletedPart {
                index: i as u32 + 1,
                token: token.clone(),
            });
        }
        Ok(parts)
    }

    fn slot(&self, index: u32) -> Option<&OnceLock<String>> {
        if index == 0 {
            return None;
        }
        self.slots.get(index as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn parts_sorted_regardless_of_arrival() {
        let map = CompletionMap::new(3);
        assert_eq!(map.record(3, "c"), Recorded::New);
        assert_eq!(map.record(1, "a"), Recorded::New);
        assert!(!map.is_complete());
        assert_eq!(map.record(2, "b"), Recorded::New);
        assert!(map.is_complete());

        let parts = map.ordered_parts().unwrap();
        let indices: Vec<u32> = parts.iter().map(|p| p.index).collect();
        let tokens: Vec<&str> = parts.iter().map(|p| p.token.as_str()).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_ack_keeps_first_token() {
        let map = CompletionMap::new(2);
        assert_eq!(map.record(1, "first"), Recorded::New);
        assert_eq!(map.record(1, "second"), Recorded::Duplicate);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(1), Some("first"));
    }

    #[test]
    fn out_of_range_rejected() {
        let map = CompletionMap::new(2);
        assert_eq!(map.record(0, "x"), Recorded::OutOfRange);
        assert_eq!(map.record(3, "x"), Recorded::OutOfRange);
        assert!(map.is_empty());
        assert!(map.contains_index(2));
        assert!(!map.contains_index(3));
    }

    #[test]
    fn incomplete_map_cannot_finalize() {
        let map = CompletionMap::new(3);
        map.record(1, "a");
        map.record(3, "c");
        match map.ordered_parts() {
            Err(TransferError::Incomplete { expected, recorded }) => {
                assert_eq!(expected, 3);
                assert_eq!(recorded, 2);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn empty_session_is_complete() {
        let map = CompletionMap::new(0);
        assert!(map.is_complete());
        assert!(map.ordered_parts().unwrap().is_empty());
    }

    #[test]
    fn concurrent_inserts_count_once() {
        let map = Arc::new(CompletionMap::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for index in 1..=64 {
                        map.record(index, format!("t{t}-{index}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 64);
        assert!(map.is_complete());
        assert_eq!(map.ordered_parts().unwrap().len(), 64);
    }
}
