//! API key rotation with 429 cooldown, shared shape with the LLM router's
//! key pool.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct KeyState {
    key: String,
    cooldown_until: Option<Instant>,
}

pub struct KeyPool {
    keys: Mutex<Vec<KeyState>>,
    cursor: Mutex<usize>,
    cooldown: Duration,
}

impl KeyPool {
    pub fn new(keys: Vec<String>, cooldown: Duration) -> Self {
        Self {
            keys: Mutex::new(
                keys.into_iter()
                    .map(|key| KeyState { key, cooldown_until: None })
                    .collect(),
            ),
            cursor: Mutex::new(0),
            cooldown,
        }
    }

    /// Round-robin over keys not currently cooling down; `None` if all are.
    pub fn next_available(&self) -> Option<String> {
        let keys = self.keys.lock();
        if keys.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let now = Instant::now();
        for _ in 0..keys.len() {
            let idx = *cursor % keys.len();
            *cursor = (*cursor + 1) % keys.len();
            let state = &keys[idx];
            if state.cooldown_until.is_none_or(|t| t <= now) {
                return Some(state.key.clone());
            }
        }
        None
    }

    pub fn mark_cooldown(&self, key: &str) {
        let mut keys = self.keys.lock();
        if let Some(state) = keys.iter_mut().find(|s| s.key == key) {
            state.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_round_robin() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()], Duration::from_secs(60));
        assert_eq!(pool.next_available(), Some("a".into()));
        assert_eq!(pool.next_available(), Some("b".into()));
        assert_eq!(pool.next_available(), Some("a".into()));
    }

    #[test]
    fn cooled_down_key_is_skipped() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()], Duration::from_secs(60));
        pool.mark_cooldown("a");
        assert_eq!(pool.next_available(), Some("b".into()));
        assert_eq!(pool.next_available(), Some("b".into()));
    }

    #[test]
    fn all_cooled_returns_none() {
        let pool = KeyPool::new(vec!["a".into()], Duration::from_secs(60));
        pool.mark_cooldown("a");
        assert_eq!(pool.next_available(), None);
    }
}
