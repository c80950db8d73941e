//! Temporary ids already replaced by the remote authority

use std::collections::{HashMap, VecDeque};

/// Remaps kept before the oldest are forgotten
pub const REMAP_CAPACITY: usize = 1024;

/// Bounded map from accepted temporary ids to their persistent ids.
///
/// Callers may still hold a record snapshot taken before its create was
/// accepted; this lets their later writes land on the right record. Only the
/// most recent [`REMAP_CAPACITY`] remaps are kept.
#[derive(Debug)]
pub struct RemapTable {
    ids: HashMap<String, u64>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for RemapTable {
    fn default() -> Self {
        Self::with_capacity(REMAP_CAPACITY)
    }
}

impl RemapTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, temp_id: String, id: u64) {
        if self.ids.insert(temp_id.clone(), id).is_none() {
            self.order.push_back(temp_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub fn get(&self, temp_id: &str) -> Option<u64> {
        self.ids.get(temp_id).copied()
    }

    /// Forget every temporary id that points at a record that no longer exists
    pub fn forget_target(&mut self, id: u64) {
        self.ids.retain(|_, target| *target != id);
        let ids = &self.ids;
        self.order.retain(|temp_id| ids.contains_key(temp_id));
    }
}
