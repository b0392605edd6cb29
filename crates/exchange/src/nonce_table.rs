use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Replay-protection table: every nonce seen across the life of the
/// session is remembered until it ages out, so a retried or duplicated
/// message is processed at most once.
#[derive(Default)]
pub struct NonceTable {
    seen: HashMap<String, Instant>,
}

impl NonceTable {
    pub fn new() -> Self {
        Self { seen: HashMap::new() }
    }

    /// Returns `true` if `nonce` had not been seen before (and records it).
    /// Returns `false` on a replay.
    pub fn insert_if_new(&mut self, nonce: &str) -> bool {
        if self.seen.contains_key(nonce) {
            return false;
        }
        self.seen.insert(nonce.to_string(), Instant::now());
        true
    }

    pub fn purge_expired(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < max_age);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_nonce_is_rejected_on_second_insert() {
        let mut table = NonceTable::new();
        assert!(table.insert_if_new("abc"));
        assert!(!table.insert_if_new("abc"));
    }

    #[test]
    fn purge_drops_only_entries_past_max_age() {
        let mut table = NonceTable::new();
        table.insert_if_new("abc");
        table.purge_expired(Duration::from_secs(0));
        assert!(table.is_empty());
    }
}
