//! Word counter fed by `Count` messages

use std::collections::HashMap;

use relay_core::{Message, Receiver};

/// Running totals keyed by word
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WordCounts {
    counts: HashMap<String, i64>,
}

impl WordCounts {
    /// Add `delta` to `key`
    pub fn add(&mut self, key: &str, delta: i64) {
        if let Some(count) = self.counts.get_mut(key) {
            *count += delta;
        } else {
            self.counts.insert(key.to_string(), delta);
        }
    }

    /// Current total for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// The `n` highest totals, ties broken alphabetically
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<(&str, i64)> {
        let mut entries: Vec<_> = self
            .counts
            .iter()
            .map(|(word, count)| (word.as_str(), *count))
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.truncate(n);
        entries
    }

    /// Consume `inbox` until it closes
    pub fn consume(inbox: &Receiver<Message>) -> Self {
        let mut counts = Self::default();
        for message in inbox {
            match message {
                Message::Count { key, delta, .. } => counts.add(&key, delta),
                other => tracing::warn!(kind = other.kind(), "Counter ignored message"),
            }
        }
        tracing::debug!(words = counts.len(), "Counter finished");
        counts
    }
}
