//! In-memory credential slot with an idle timeout.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The credentials a signed-in client holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug)]
struct Slot {
    tokens: Tokens,
    last_activity: Instant,
}

/// Holds at most one set of tokens.
///
/// Reading after `idle_timeout` without activity clears the slot. Any other
/// read counts as activity.
#[derive(Debug)]
pub struct TokenStore {
    slot: Mutex<Option<Slot>>,
    idle_timeout: Duration,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl TokenStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, tokens: Tokens) {
        self.set_at(tokens, Instant::now());
    }

    pub fn set_at(&self, tokens: Tokens, now: Instant) {
        *self.lock() = Some(Slot {
            tokens,
            last_activity: now,
        });
    }

    pub fn get(&self) -> Option<Tokens> {
        self.get_at(Instant::now())
    }

    pub fn get_at(&self, now: Instant) -> Option<Tokens> {
        let mut slot = self.lock();
        let expired = slot
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.last_activity) >= self.idle_timeout);
        if expired {
            tracing::debug!("client session idle; clearing tokens");
            *slot = None;
            return None;
        }
        let current = slot.as_mut()?;
        current.last_activity = now;
        Some(current.tokens.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|t| t.access_token)
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Tokens {
        Tokens {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
        }
    }

    #[test]
    fn test_read_within_timeout_extends_activity() {
        let store = TokenStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.set_at(tokens(), start);

        assert_eq!(store.get_at(start + Duration::from_secs(45)), Some(tokens()));
        // 90s after set but only 45s after the last read.
        assert_eq!(store.get_at(start + Duration::from_secs(90)), Some(tokens()));
    }

    #[test]
    fn test_read_after_timeout_clears() {
        let store = TokenStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.set_at(tokens(), start);

        assert_eq!(store.get_at(start + Duration::from_secs(61)), None);
        // Cleared, not just hidden.
        assert_eq!(store.get_at(start), None);
    }

    #[test]
    fn test_default_timeout_and_clear() {
        let store = TokenStore::default();
        store.set(tokens());
        assert_eq!(store.access_token().as_deref(), Some("access"));
        store.clear();
        assert!(store.get().is_none());
    }
}
