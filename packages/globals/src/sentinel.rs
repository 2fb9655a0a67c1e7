use std::cell::Cell;
use std::time::{Duration, Instant};

/// Sticky "stored values may be missing" flag, set when a persistent save
/// fails and cleared by the next successful save.
pub trait AbsenceSentinel {
    fn is_set(&self) -> bool;

    fn set(&self);

    fn clear(&self);
}

pub const DEFAULT_SENTINEL_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Sentinel that expires on its own after `lifetime`
pub struct MemorySentinel {
    lifetime: Duration,
    expires_at: Cell<Option<Instant>>,
}

impl Default for MemorySentinel {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL_LIFETIME)
    }
}

impl MemorySentinel {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            expires_at: Cell::new(None),
        }
    }
}

impl AbsenceSentinel for MemorySentinel {
    fn is_set(&self) -> bool {
        match self.expires_at.get() {
            Some(expires_at) if Instant::now() < expires_at => true,
            Some(_) => {
                self.expires_at.set(None);
                false
            }
            None => false,
        }
    }

    fn set(&self) {
        self.expires_at.set(Some(Instant::now() + self.lifetime));
    }

    fn clear(&self) {
        self.expires_at.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_set_and_clear() {
        let sentinel = MemorySentinel::default();
        assert!(!sentinel.is_set());
        sentinel.set();
        assert!(sentinel.is_set());
        sentinel.clear();
        assert!(!sentinel.is_set());
    }

    #[test]
    fn test_sentinel_expires() {
        let sentinel = MemorySentinel::new(Duration::ZERO);
        sentinel.set();
        assert!(!sentinel.is_set());
    }
}
