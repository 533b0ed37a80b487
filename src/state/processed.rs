use std::collections::{HashSet, VecDeque};

/// Bounded, insertion-ordered set of processed issue keys
///
/// Once `cap` keys are held, inserting a new key evicts the oldest one.
#[derive(Debug, Clone)]
pub struct ProcessedSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    cap: usize,
}

impl ProcessedSet {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Builds a set from keys ordered oldest first
    ///
    /// Duplicates are dropped and only the newest `cap` keys are kept.
    pub fn from_keys<I>(keys: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = Self::new(cap);
        for key in keys {
            set.insert(key);
        }
        set
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    /// Adds `key`, returning `false` if it was already present
    pub fn insert(&mut self, key: String) -> bool {
        if self.members.contains(&key) {
            return false;
        }

        self.members.insert(key.clone());
        self.order.push_back(key);

        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys ordered oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
