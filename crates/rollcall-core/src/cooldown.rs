//! Per-key debounce: one reaction per key per cooldown window.

use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;
use std::fmt;

/// What a cooldown entry is keyed on.
///
/// All unknown faces share one key, independent of unknown-face clustering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    Identity(String),
    Unknown,
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownKey::Identity(name) => f.write_str(name),
            CooldownKey::Unknown => f.write_str("unknown"),
        }
    }
}

/// Last accepted time per key for the running session.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
    last_accepted: HashMap<CooldownKey, DateTime<Local>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept `key` at `now` iff it has no entry or `now - last >= window`.
    ///
    /// A rejected call leaves the tracker untouched. A `now` earlier than the
    /// stored time is always rejected.
    pub fn accept(&mut self, key: &CooldownKey, now: DateTime<Local>) -> bool {
        if let Some(last) = self.last_accepted.get(key) {
            if now.signed_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(key.clone(), now);
        true
    }

    pub fn last_accepted(&self, key: &CooldownKey) -> Option<DateTime<Local>> {
        self.last_accepted.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_accepted.clear();
    }
}
